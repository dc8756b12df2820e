//! DAG builder.
//!
//! Builds the set of schedulable computation units from a collection of
//! parsed records. Records sharing a byte-identical `meta.computation.cmd`
//! are co-outputs of one computation and collapse into a single
//! [`Unit`]; the remaining units are leveled by Kahn's algorithm so the
//! executor can dispatch within a level without regard to order.

use std::collections::{BTreeMap, HashMap, HashSet};

use color_eyre::Result;
use itertools::Itertools;

use crate::path::RelPath;
use crate::record::Record;

/// Opaque identifier for a computation unit, stable for the lifetime of one
/// `Dag`.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct UnitId(usize);

impl UnitId {
    /// The unit's index into `Dag::units`.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A computation unit: one or more co-output records sharing the same
/// command, scheduled and executed together.
#[derive(Clone, Debug)]
pub struct Unit {
    pub id: UnitId,
    /// The shared command, if any (absent for pure-data records, which
    /// form their own singleton unit and never execute).
    pub cmd: Option<String>,
    /// Paths of every record file contributing to this unit.
    pub record_paths: Vec<RelPath>,
    /// Union of outputs across member records.
    pub outs: Vec<RelPath>,
    /// Union of dependency paths across member records.
    pub deps: Vec<RelPath>,
}

/// An error building the DAG: a dependency cycle or two units claiming the
/// same output.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("dependency cycle involving: {}", .0.iter().map(|p| p.to_string()).join(", "))]
    Cycle(Vec<RelPath>),
    #[error("output {path} is claimed by more than one computation")]
    ConflictingOutputs { path: RelPath },
}

/// The built DAG: units grouped into levels such that every unit in level
/// `i` depends only on units in levels `< i`.
pub struct Dag {
    pub units: Vec<Unit>,
    pub levels: Vec<Vec<UnitId>>,
}

/// Build a DAG from the given `(path, record)` pairs.
pub fn build(records: &[(RelPath, Record)]) -> Result<Dag, PlanError> {
    // Group records into computation units by byte-identical cmd. A record
    // with no computation is its own singleton unit (never executes).
    let mut groups: BTreeMap<Option<String>, Vec<usize>> = BTreeMap::new();
    for (idx, (_, record)) in records.iter().enumerate() {
        let cmd = record.computation.as_ref().and_then(|c| c.cmd.clone());
        match cmd {
            Some(cmd) => groups.entry(Some(cmd)).or_default().push(idx),
            None => groups.entry(None).or_default().extend([idx]),
        }
    }

    // Records with no cmd never share a unit with one another either; only
    // a shared, present cmd string groups records together.
    let mut members: Vec<Vec<usize>> = Vec::new();
    for (cmd, idxs) in groups {
        if cmd.is_none() {
            members.extend(idxs.into_iter().map(|i| vec![i]));
        } else {
            members.push(idxs);
        }
    }

    let mut units = Vec::with_capacity(members.len());
    let mut output_owner: HashMap<RelPath, UnitId> = HashMap::new();
    for (i, member_idxs) in members.iter().enumerate() {
        let id = UnitId(i);
        let cmd = records[member_idxs[0]]
            .1
            .computation
            .as_ref()
            .and_then(|c| c.cmd.clone());

        let mut record_paths = Vec::new();
        let mut outs = Vec::new();
        let mut deps_set: HashSet<RelPath> = HashSet::new();
        for &idx in member_idxs {
            let (path, record) = &records[idx];
            record_paths.push(path.clone());
            for out in &record.outs {
                outs.push(out.path.clone());
                if let Some(existing) = output_owner.insert(out.path.clone(), id)
                    && existing != id
                {
                    return Err(PlanError::ConflictingOutputs {
                        path: out.path.clone(),
                    });
                }
            }
            if let Some(computation) = &record.computation {
                deps_set.extend(computation.deps.keys().cloned());
            }
        }

        units.push(Unit {
            id,
            cmd,
            record_paths,
            outs,
            deps: deps_set.into_iter().sorted().collect(),
        });
    }

    let levels = level_order(&units, &output_owner)?;
    Ok(Dag { units, levels })
}

/// Level-schedule units with Kahn's algorithm: a unit's level is one more
/// than the maximum level of any unit producing one of its dependencies;
/// units depending on nothing tracked start at level 0.
fn level_order(
    units: &[Unit],
    output_owner: &HashMap<RelPath, UnitId>,
) -> Result<Vec<Vec<UnitId>>, PlanError> {
    let mut predecessors: HashMap<UnitId, HashSet<UnitId>> =
        units.iter().map(|u| (u.id, HashSet::new())).collect();
    let mut successors: HashMap<UnitId, HashSet<UnitId>> =
        units.iter().map(|u| (u.id, HashSet::new())).collect();

    for unit in units {
        for dep in &unit.deps {
            if let Some(&producer) = output_owner.get(dep)
                && producer != unit.id
            {
                predecessors.get_mut(&unit.id).unwrap().insert(producer);
                successors.get_mut(&producer).unwrap().insert(unit.id);
            }
        }
    }

    let mut indegree: HashMap<UnitId, usize> = predecessors
        .iter()
        .map(|(id, preds)| (*id, preds.len()))
        .collect();

    let mut levels = Vec::new();
    let mut remaining: HashSet<UnitId> = units.iter().map(|u| u.id).collect();
    let mut ready: Vec<UnitId> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .sorted()
        .collect();

    while !ready.is_empty() {
        for id in &ready {
            remaining.remove(id);
        }
        levels.push(ready.clone());

        let mut next_ready = HashSet::new();
        for id in &ready {
            for &succ in &successors[id] {
                let entry = indegree.get_mut(&succ).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    next_ready.insert(succ);
                }
            }
        }
        ready = next_ready.into_iter().sorted().collect();
    }

    if !remaining.is_empty() {
        let cycle_paths = remaining
            .iter()
            .flat_map(|id| units[id.0].record_paths.clone())
            .sorted()
            .collect();
        return Err(PlanError::Cycle(cycle_paths));
    }

    Ok(levels)
}
