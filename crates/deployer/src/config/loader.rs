//! Deploy file discovery on disk and among packaged resources

use super::deploy_file::{DeployFile, DeployFileError, DocumentFormat};
use rust_embed::RustEmbed;
use std::fmt;
use std::path::PathBuf;

/// Conventional name of the deploy file
pub const DEFAULT_CONFIG_NAME: &str = "deployer.json";

/// Environment variable holding an explicit deploy file path
pub const CONFIG_ENV_VAR: &str = "DEPLOYER_CONFIG";

/// Resources packaged into the binary at build time.
///
/// Drop a `deployer.json` into `resources/` to ship a self-contained deployer.
#[derive(RustEmbed)]
#[folder = "resources/"]
pub struct PackagedResources;

/// Where a deploy file was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A file on the local filesystem
    File(PathBuf),
    /// A resource embedded into the binary
    Embedded(String),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Embedded(name) => write!(f, "embedded:{}", name),
        }
    }
}

/// Locates the deploy file.
///
/// Lookup order: explicit path, then the conventional name in the search
/// directory, then the conventional name among embedded resources.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    explicit: Option<PathBuf>,
    search_dir: PathBuf,
    name: String,
}

impl Default for ConfigLocator {
    fn default() -> Self {
        Self {
            explicit: None,
            search_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            name: DEFAULT_CONFIG_NAME.to_string(),
        }
    }
}

impl ConfigLocator {
    /// Create a locator using the working directory and the conventional name
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a locator honouring `DEPLOYER_CONFIG`
    pub fn from_env() -> Self {
        let locator = Self::new();
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => locator.with_path(PathBuf::from(path)),
            _ => locator,
        }
    }

    /// Use an explicit path instead of searching
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    /// Search this directory for the conventional name
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dir = dir.into();
        self
    }

    /// Use a different resource name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Find the deploy file without reading it
    pub fn locate<E: RustEmbed>(&self) -> Option<ConfigSource> {
        if let Some(path) = &self.explicit {
            return path.is_file().then(|| ConfigSource::File(path.clone()));
        }

        let candidate = self.search_dir.join(&self.name);
        if candidate.is_file() {
            return Some(ConfigSource::File(candidate));
        }

        E::get(&self.name).map(|_| ConfigSource::Embedded(self.name.clone()))
    }

    /// Find, read and parse the deploy file
    pub fn load<E: RustEmbed>(&self) -> Result<(ConfigSource, DeployFile), ConfigLoadError> {
        let source = self.locate::<E>().ok_or_else(|| ConfigLoadError::NotFound {
            searched: self.searched(),
        })?;

        let deploy_file = match &source {
            ConfigSource::File(path) => DeployFile::from_file(&path.to_string_lossy()),
            ConfigSource::Embedded(name) => read_embedded::<E>(name),
        }
        .map_err(|e| ConfigLoadError::Invalid {
            source_name: source.to_string(),
            source: e,
        })?;

        Ok((source, deploy_file))
    }

    fn searched(&self) -> Vec<String> {
        match &self.explicit {
            Some(path) => vec![path.display().to_string()],
            None => vec![
                self.search_dir.join(&self.name).display().to_string(),
                format!("embedded:{}", self.name),
            ],
        }
    }
}

fn read_embedded<E: RustEmbed>(name: &str) -> Result<DeployFile, DeployFileError> {
    let file = E::get(name).ok_or_else(|| DeployFileError::Io {
        path: format!("embedded:{}", name),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })?;
    let content = std::str::from_utf8(&file.data).map_err(|e| DeployFileError::Io {
        path: format!("embedded:{}", name),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    DeployFile::parse(content, DocumentFormat::from_name(name))
}

/// Load the deploy file, treating a missing or invalid file as "nothing to
/// deploy".
pub fn load_configuration(locator: &ConfigLocator) -> Option<(ConfigSource, DeployFile)> {
    log::info!("Looking for the deployer configuration");
    match locator.load::<PackagedResources>() {
        Ok((source, deploy_file)) => {
            log::info!("Deployer configuration loaded from {}", source);
            Some((source, deploy_file))
        }
        Err(e @ ConfigLoadError::NotFound { .. }) => {
            log::info!("{}", e);
            None
        }
        Err(e) => {
            log::error!("{}", e);
            None
        }
    }
}

/// Errors that can occur when locating a deploy file
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("No deployer configuration found (searched: {})", .searched.join(", "))]
    NotFound { searched: Vec<String> },

    #[error("Deployer configuration '{source_name}' is invalid: {source}")]
    Invalid {
        source_name: String,
        #[source]
        source: DeployFileError,
    },
}
