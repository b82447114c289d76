//! Deploy adapters - the capability that actually starts a unit

use crate::config::ConfigMap;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Identifier of a started unit instance, as returned by the adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Create a fresh random instance id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything an adapter needs to start one unit
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Unit id from the deploy file
    pub unit_id: String,
    /// Implementation to start (the unit's `name`)
    pub type_name: String,
    /// Global config merged with the unit's local config
    pub config: ConfigMap,
    /// Passthrough deployment options
    pub options: ConfigMap,
}

/// Starts units on behalf of the scheduler.
///
/// Implementations never see scheduler state; they only receive one
/// [`DeployRequest`] per unit.
#[async_trait]
pub trait DeployAdapter: Send + Sync + 'static {
    /// Start the unit described by `request`
    async fn deploy(&self, request: DeployRequest) -> Result<InstanceId, DeployError>;
}

/// Errors reported by a deploy adapter
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("No implementation registered for '{0}'")]
    UnknownType(String),

    #[error("Invalid deployment option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("Failed to start: {0}")]
    StartFailed(String),

    #[error(transparent)]
    Process(#[from] super::process::ProcessError),
}

/// Context handed to a [`UnitFactory`] when a unit is started
#[derive(Debug, Clone)]
pub struct UnitContext {
    /// Unit id from the deploy file
    pub unit_id: String,
    /// Merged configuration
    pub config: ConfigMap,
    /// Passthrough deployment options
    pub options: ConfigMap,
}

/// An in-process unit implementation
#[async_trait]
pub trait UnitFactory: Send + Sync {
    /// Start a unit; an error rejects the start
    async fn start(&self, ctx: UnitContext) -> Result<(), DeployError>;
}

/// Adapter starting in-process units registered by type name
#[derive(Default, Clone)]
pub struct RegistryAdapter {
    factories: Arc<RwLock<HashMap<String, Arc<dyn UnitFactory>>>>,
}

impl RegistryAdapter {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation under a type name
    pub fn register(&self, type_name: impl Into<String>, factory: impl UnitFactory + 'static) {
        let type_name = type_name.into();
        log::debug!("Registering unit type '{}'", type_name);
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(type_name, Arc::new(factory));
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn factory(&self, type_name: &str) -> Option<Arc<dyn UnitFactory>> {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(type_name)
            .cloned()
    }
}

#[async_trait]
impl DeployAdapter for RegistryAdapter {
    async fn deploy(&self, request: DeployRequest) -> Result<InstanceId, DeployError> {
        let Some(factory) = self.factory(&request.type_name) else {
            log::warn!(
                "[{}] Unknown unit type '{}', registered types: {}",
                request.unit_id,
                request.type_name,
                self.type_names().join(", ")
            );
            return Err(DeployError::UnknownType(request.type_name));
        };

        factory
            .start(UnitContext {
                unit_id: request.unit_id,
                config: request.config,
                options: request.options,
            })
            .await?;

        Ok(InstanceId::generate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct RequireField(&'static str);

    #[async_trait]
    impl UnitFactory for RequireField {
        async fn start(&self, ctx: UnitContext) -> Result<(), DeployError> {
            if ctx.config.contains_key(self.0) {
                Ok(())
            } else {
                Err(DeployError::StartFailed("wrong config".to_string()))
            }
        }
    }

    fn request(type_name: &str, config: ConfigMap) -> DeployRequest {
        DeployRequest {
            unit_id: "unit".to_string(),
            type_name: type_name.to_string(),
            config,
            options: ConfigMap::new(),
        }
    }

    #[tokio::test]
    async fn test_registered_type_starts() {
        let adapter = RegistryAdapter::new();
        adapter.register("checker", RequireField("field3"));

        let mut config = ConfigMap::new();
        config.insert("field3".to_string(), json!("text"));

        let id = adapter.deploy(request("checker", config)).await.unwrap();
        assert!(!id.0.is_empty());
    }

    #[tokio::test]
    async fn test_instance_ids_are_unique() {
        let adapter = RegistryAdapter::new();
        adapter.register("any", RequireField("k"));

        let mut config = ConfigMap::new();
        config.insert("k".to_string(), json!(1));

        let a = adapter.deploy(request("any", config.clone())).await.unwrap();
        let b = adapter.deploy(request("any", config)).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let adapter = RegistryAdapter::new();
        let result = adapter.deploy(request("nope", ConfigMap::new())).await;
        assert!(matches!(result, Err(DeployError::UnknownType(name)) if name == "nope"));
    }

    #[tokio::test]
    async fn test_factory_rejection_is_propagated() {
        let adapter = RegistryAdapter::new();
        adapter.register("checker", RequireField("field3"));

        let result = adapter.deploy(request("checker", ConfigMap::new())).await;
        assert!(matches!(result, Err(DeployError::StartFailed(_))));
    }

    #[test]
    fn test_type_names_sorted() {
        let adapter = RegistryAdapter::new();
        adapter.register("b", RequireField("k"));
        adapter.register("a", RequireField("k"));
        assert_eq!(adapter.type_names(), vec!["a", "b"]);
    }
}
