//! Compute Engine providers for the declarative engine

pub mod address;
pub mod compute;
pub mod instance;
pub mod rest;
pub mod simulated;

use declarative::{Properties, ProviderError, ProviderRegistry};
use serde_json::Value;
use std::sync::Arc;

pub use address::AddressProvider;
pub use compute::ComputeApi;
pub use instance::InstanceProvider;
pub use rest::RestCompute;
pub use simulated::SimulatedCompute;

pub const ADDRESS_KIND: &str = "gcp:compute/address:Address";
pub const INSTANCE_KIND: &str = "gcp:compute/instance:Instance";

/// Registry with every provider bound to one compute backend.
pub fn registry(api: Arc<dyn ComputeApi>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(AddressProvider::new(Arc::clone(&api)));
    registry.register(InstanceProvider::new(api));
    registry
}

/// Top-level fields of an API object as properties.
pub(crate) fn into_properties(value: Value) -> Properties {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => Properties::new(),
    }
}

pub(crate) fn required_str<'a>(inputs: &'a Properties, key: &str) -> Result<&'a str, ProviderError> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::failed(format!("missing input '{key}'")))
}
