//! Deploy plan for dry-run mode

use crate::config::{merge, ConfigMap, DeployFile};
use crate::runtime::dependency::{DependencyError, DependencyGraph};
use std::fmt;

/// Predicted waves of a deploy file
#[derive(Debug)]
pub struct DeployPlan {
    /// Units grouped by predicted wave
    pub waves: Vec<Vec<DeployPlanUnit>>,
    /// Global configuration
    pub global: ConfigMap,
}

/// A unit in the deploy plan
#[derive(Debug)]
pub struct DeployPlanUnit {
    pub id: String,
    pub type_name: String,
    pub dependencies: Vec<String>,
    pub config: ConfigMap,
    pub options: ConfigMap,
}

impl DeployPlan {
    /// Build the plan for a deploy file
    pub fn build(deploy_file: &DeployFile) -> Result<Self, DependencyError> {
        let graph = DependencyGraph::build(deploy_file)?;

        let waves = graph
            .waves
            .into_iter()
            .map(|wave| {
                wave.into_iter()
                    .map(|unit| DeployPlanUnit {
                        config: merge(&deploy_file.config, &unit.spec.config),
                        id: unit.id,
                        type_name: unit.spec.name,
                        dependencies: unit.spec.depends_on,
                        options: unit.spec.options,
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            waves,
            global: deploy_file.config.clone(),
        })
    }

    /// Number of units in the plan
    pub fn unit_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }
}

/// Display the deploy plan in a human-readable format
impl fmt::Display for DeployPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Deploy Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;

        if !self.global.is_empty() {
            writeln!(f, "Global config:")?;
            for (key, value) in &self.global {
                writeln!(f, "  {}: {}", key, value)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Units ({} in {} waves):", self.unit_count(), self.waves.len())?;
        for (i, wave) in self.waves.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "  Wave {}:", i + 1)?;
            for unit in wave {
                writeln!(f, "    - {} ({})", unit.id, unit.type_name)?;

                if !unit.dependencies.is_empty() {
                    writeln!(f, "      Depends on: {}", unit.dependencies.join(", "))?;
                }

                if !unit.config.is_empty() {
                    writeln!(f, "      Config:")?;
                    for (key, value) in &unit.config {
                        writeln!(f, "        {}: {}", key, value)?;
                    }
                }

                if !unit.options.is_empty() {
                    writeln!(f, "      Options:")?;
                    for (key, value) in &unit.options {
                        writeln!(f, "        {}: {}", key, value)?;
                    }
                }
            }
        }

        Ok(())
    }
}
