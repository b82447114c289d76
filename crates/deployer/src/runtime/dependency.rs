//! Static dependency analysis and wave prediction

use crate::config::{DeployFile, UnitSpec};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// A unit placed into a predicted wave
#[derive(Debug, Clone)]
pub struct PlannedUnit {
    /// Unit id
    pub id: String,
    /// Unit declaration
    pub spec: UnitSpec,
}

/// Dependency graph of a deploy file, grouped into waves.
///
/// Wave `n` holds the units whose dependencies all sit in waves before `n`.
/// The scheduler does not use this; it only predicts what a run will do.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Units grouped by wave, declaration order within a wave
    pub waves: Vec<Vec<PlannedUnit>>,
}

impl DependencyGraph {
    /// Build the graph, rejecting unknown dependencies and cycles
    pub fn build(deploy_file: &DeployFile) -> Result<Self, DependencyError> {
        for (id, unit) in &deploy_file.units {
            for dep in &unit.depends_on {
                if !deploy_file.units.contains_key(dep) {
                    return Err(DependencyError::UnknownDependency {
                        unit: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let waves = Self::group_into_waves(&deploy_file.units)?;
        Ok(Self { waves })
    }

    /// Kahn's algorithm, one wave per round
    fn group_into_waves(
        units: &IndexMap<String, UnitSpec>,
    ) -> Result<Vec<Vec<PlannedUnit>>, DependencyError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for (id, unit) in units {
            in_degree.entry(id.as_str()).or_insert(0);
            let unique: HashSet<&str> = unit.depends_on.iter().map(String::as_str).collect();
            for dep in unique {
                *in_degree.entry(id.as_str()).or_insert(0) += 1;
                dependents.entry(dep).or_default().push(id.as_str());
            }
        }

        let mut current: Vec<&str> = units
            .keys()
            .map(String::as_str)
            .filter(|id| in_degree[id] == 0)
            .collect();

        let mut waves = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            let mut next: Vec<&str> = Vec::new();
            for id in &current {
                for dependent in dependents.get(id).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }

            placed += current.len();
            waves.push(
                current
                    .iter()
                    .map(|id| PlannedUnit {
                        id: id.to_string(),
                        spec: units[*id].clone(),
                    })
                    .collect(),
            );

            // Keep declaration order within a wave
            next.sort_by_key(|id| units.get_index_of(*id));
            current = next;
        }

        if placed != units.len() {
            let mut cycle: Vec<String> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            cycle.sort();
            return Err(DependencyError::CyclicDependency(cycle));
        }

        Ok(waves)
    }

    /// All units in a valid deploy order
    pub fn deploy_order(&self) -> impl Iterator<Item = &PlannedUnit> {
        self.waves.iter().flatten()
    }

    /// Number of units in the graph
    pub fn len(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// Whether the graph has no units
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

/// Errors that can occur when building the dependency graph
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Unit '{unit}' depends on unknown unit '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },

    #[error("Cyclic dependency detected involving units: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),
}
