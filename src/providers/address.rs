//! Reserved external IP address

use super::compute::{ComputeApi, ResourcePath, Scope};
use super::{ADDRESS_KIND, into_properties, required_str};
use declarative::{Created, Properties, PropertyDiff, Provider, ProviderError};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Inputs forwarded verbatim to the insert request
const PASSTHROUGH: &[&str] = &["addressType", "networkTier", "description"];

/// Provider for `gcp:compute/address:Address`.
///
/// Addresses cannot be changed after creation, so every input change
/// replaces the address.
#[derive(Debug, Clone)]
pub struct AddressProvider {
    api: Arc<dyn ComputeApi>,
}

impl AddressProvider {
    pub fn new(api: Arc<dyn ComputeApi>) -> Self {
        Self { api }
    }

    fn request_body(name: &str, inputs: &Properties) -> Value {
        let mut body = Map::new();
        body.insert("name".into(), Value::from(name));
        for key in PASSTHROUGH {
            if let Some(value) = inputs.get(*key) {
                body.insert((*key).to_string(), value.clone());
            }
        }
        Value::Object(body)
    }
}

impl Provider for AddressProvider {
    fn kind(&self) -> &str {
        ADDRESS_KIND
    }

    fn create(&self, inputs: &Properties) -> Result<Created, ProviderError> {
        let name = required_str(inputs, "name")?;
        let region = required_str(inputs, "region")?;
        let scope = Scope::Region(region.to_string());

        self.api
            .insert(&scope, "addresses", &Self::request_body(name, inputs))?;
        let path = ResourcePath::new(scope, "addresses", name);
        let outputs = into_properties(self.api.get(&path)?);
        log::info!("Reserved address {path}");

        Ok(Created {
            id: path.to_string(),
            outputs,
        })
    }

    fn read(&self, id: &str) -> Result<Properties, ProviderError> {
        let path: ResourcePath = id.parse()?;
        Ok(into_properties(self.api.get(&path)?))
    }

    fn update(
        &self,
        id: &str,
        _olds: &Properties,
        _news: &Properties,
        diff: &PropertyDiff,
    ) -> Result<Properties, ProviderError> {
        let keys: Vec<&str> = diff.keys().into_iter().collect();
        Err(ProviderError::failed(format!(
            "address {id} cannot be updated in place (changed: {})",
            keys.join(", ")
        )))
    }

    fn delete(&self, id: &str) -> Result<(), ProviderError> {
        let path: ResourcePath = id.parse()?;
        self.api.delete(&path)?;
        log::info!("Released address {path}");
        Ok(())
    }

    fn replace_semantics(&self, _property: &str) -> Option<bool> {
        Some(true)
    }
}
