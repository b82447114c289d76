//! Global/unit configuration merging

use super::ConfigMap;

/// Merge unit-local configuration over the global configuration.
///
/// Keys are overridden at the top level only; nested objects are replaced,
/// never merged recursively.
pub fn merge(global: &ConfigMap, local: &ConfigMap) -> ConfigMap {
    let mut merged = global.clone();
    for (key, value) in local {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
