//! Deploy file schema definitions

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object, used for global config, unit config and passthrough options
pub type ConfigMap = Map<String, Value>;

/// Root deploy file configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployFile {
    /// Global configuration (applied to all units unless overridden)
    #[serde(default)]
    pub config: ConfigMap,

    /// Unit definitions (ordered map for deterministic dispatch order)
    #[serde(default, alias = "verticles")]
    pub units: IndexMap<String, UnitSpec>,
}

/// A single declared unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Name of the implementation to start
    pub name: String,

    /// Units that must be started first
    #[serde(default, rename = "dependsOn", alias = "depends_on")]
    pub depends_on: Vec<String>,

    /// Unit-local configuration, merged over the global config
    #[serde(default)]
    pub config: ConfigMap,

    /// Any other field, forwarded verbatim to the deploy adapter
    #[serde(flatten)]
    pub options: ConfigMap,
}

impl UnitSpec {
    /// Create a unit spec with no dependencies or configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            config: ConfigMap::new(),
            options: ConfigMap::new(),
        }
    }

    /// Add a dependency
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Set a unit-local config value
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Set a passthrough deployment option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Document format of a deploy file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Pick the format from a resource name, defaulting to JSON
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".yaml") || lower.ends_with(".yml") {
            DocumentFormat::Yaml
        } else {
            DocumentFormat::Json
        }
    }
}

impl DeployFile {
    /// Load deploy file from a file on disk
    pub fn from_file(path: &str) -> Result<Self, DeployFileError> {
        let content = std::fs::read_to_string(path).map_err(|e| DeployFileError::Io {
            path: path.to_string(),
            source: e,
        })?;
        Self::parse(&content, DocumentFormat::from_name(path))
    }

    /// Parse a deploy file in the given format
    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self, DeployFileError> {
        match format {
            DocumentFormat::Json => Self::from_json(content),
            DocumentFormat::Yaml => Self::from_yaml(content),
        }
    }

    /// Parse deploy file from a JSON string
    pub fn from_json(content: &str) -> Result<Self, DeployFileError> {
        let deploy_file: DeployFile = serde_json::from_str(content)?;
        deploy_file.validate()?;
        Ok(deploy_file)
    }

    /// Parse deploy file from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, DeployFileError> {
        let deploy_file: DeployFile = serde_yaml::from_str(content)?;
        deploy_file.validate()?;
        Ok(deploy_file)
    }

    /// Validate the shape of the deploy file.
    ///
    /// Only the shape is checked here. Cycles and dependencies on unknown units
    /// are left to the scheduler, which reports them as unsatisfiable at run time.
    pub fn validate(&self) -> Result<(), DeployFileError> {
        for (id, unit) in &self.units {
            if id.trim().is_empty() {
                return Err(DeployFileError::Validation(
                    "unit ids must not be empty".to_string(),
                ));
            }
            if unit.name.trim().is_empty() {
                return Err(DeployFileError::Validation(format!(
                    "Unit '{}': 'name' must not be empty",
                    id
                )));
            }
        }

        Ok(())
    }

    /// Ids of all declared units, in declaration order
    pub fn unit_ids(&self) -> Vec<&str> {
        self.units.keys().map(String::as_str).collect()
    }
}

/// Errors that can occur when loading a deploy file
#[derive(Debug, thiserror::Error)]
pub enum DeployFileError {
    #[error("Failed to read deploy file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse deploy file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse deploy file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
