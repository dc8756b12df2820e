use clap::Subcommand;

pub mod md5;
pub mod path;

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Print the filesystem path of a tracked path's cache object.
    Path(path::Options),

    /// Print the recorded content hash of a tracked path.
    Md5(md5::Options),
}
