//! Provider trait for resource kinds
//!
//! A provider implements create/read/update/delete/diff for one resource
//! kind. The engine never looks inside resource properties itself; all
//! kind-specific behavior lives behind this trait.

use crate::error::{Error, ProviderError, Result};
use crate::types::PropertyDiff;
use crate::value::{PlannedProperties, Properties};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Provider-assigned physical ID
    pub id: String,
    pub outputs: Properties,
}

/// One changed property as judged by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub property: String,
    /// `Some(false)` updatable in place, `Some(true)` forces replacement,
    /// `None` when the provider does not say
    pub requires_replacement: Option<bool>,
}

/// Provider verdict on a set of input changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub changes: Vec<PropertyChange>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Whether any change forces replacement.
    ///
    /// Changes with unspecified semantics count as replacements.
    pub fn requires_replacement(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.requires_replacement != Some(false))
    }

    pub fn changed_properties(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.property.as_str())
    }
}

/// Capability set for one resource kind
///
/// # Example
///
/// ```ignore
/// use declarative::{Created, Properties, Provider, ProviderError, PropertyDiff};
///
/// #[derive(Debug)]
/// struct BucketProvider;
///
/// impl Provider for BucketProvider {
///     fn kind(&self) -> &str {
///         "cloud:storage/bucket:Bucket"
///     }
///
///     fn create(&self, inputs: &Properties) -> Result<Created, ProviderError> {
///         // call the cloud API ...
///         Ok(Created { id: "bucket-123".into(), outputs: inputs.clone() })
///     }
///
///     fn read(&self, id: &str) -> Result<Properties, ProviderError> {
///         Err(ProviderError::NotFound { id: id.into() })
///     }
///
///     fn update(
///         &self,
///         _id: &str,
///         _olds: &Properties,
///         news: &Properties,
///         _diff: &PropertyDiff,
///     ) -> Result<Properties, ProviderError> {
///         Ok(news.clone())
///     }
///
///     fn delete(&self, _id: &str) -> Result<(), ProviderError> {
///         Ok(())
///     }
///
///     fn replace_semantics(&self, property: &str) -> Option<bool> {
///         Some(property != "labels")
///     }
/// }
/// ```
pub trait Provider: Send + Sync + fmt::Debug {
    /// Resource kind this provider manages, e.g. `gcp:compute/address:Address`
    fn kind(&self) -> &str;

    /// Create a resource, returning its physical ID and outputs
    fn create(&self, inputs: &Properties) -> std::result::Result<Created, ProviderError>;

    /// Read the live outputs of a resource
    ///
    /// Returns [`ProviderError::NotFound`] if it no longer exists.
    fn read(&self, id: &str) -> std::result::Result<Properties, ProviderError>;

    /// Update a resource in place
    fn update(
        &self,
        id: &str,
        olds: &Properties,
        news: &Properties,
        diff: &PropertyDiff,
    ) -> std::result::Result<Properties, ProviderError>;

    /// Delete a resource
    fn delete(&self, id: &str) -> std::result::Result<(), ProviderError>;

    /// Whether changing `property` forces replacement
    ///
    /// Used by the default [`diff`](Self::diff). `None` means unknown,
    /// which the engine treats as a replacement.
    fn replace_semantics(&self, _property: &str) -> Option<bool> {
        None
    }

    /// Whether an in-place update leaves output `property` as it was
    ///
    /// While a resource is planned for update, references to its other
    /// outputs are unknown at plan time.
    fn output_survives_update(&self, _property: &str) -> bool {
        false
    }

    /// Classify the changes between recorded and planned inputs
    ///
    /// The default compares top-level keys and consults
    /// [`replace_semantics`](Self::replace_semantics).
    fn diff(
        &self,
        olds: &Properties,
        news: &PlannedProperties,
    ) -> std::result::Result<DiffResult, ProviderError> {
        let changes = PropertyDiff::planned(olds, news)
            .keys()
            .into_iter()
            .map(|property| PropertyChange {
                property: property.to_string(),
                requires_replacement: self.replace_semantics(property),
            })
            .collect();
        Ok(DiffResult { changes })
    }
}

/// A shared provider handle.
pub type SharedProvider = Arc<dyn Provider>;

/// Providers by resource kind.
#[derive(Debug, Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, SharedProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own kind, replacing any previous one.
    pub fn register(&mut self, provider: impl Provider + 'static) {
        let provider: SharedProvider = Arc::new(provider);
        self.providers.insert(provider.kind().to_string(), provider);
    }

    pub fn get(&self, kind: &str) -> Option<&SharedProvider> {
        self.providers.get(kind)
    }

    /// Look up the provider for a resource, failing with [`Error::UnknownKind`].
    pub fn require(&self, kind: &str, resource: &str) -> Result<&SharedProvider> {
        self.get(kind).ok_or_else(|| Error::UnknownKind {
            kind: kind.to_string(),
            resource: resource.to_string(),
        })
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use crate::value::planned;
    use serde_json::json;

    fn props(pairs: &[(&str, serde_json::Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_default_diff_uses_replace_semantics() {
        let provider = MockProvider::new("test:Instance").updatable(["machineType"]);
        let olds = props(&[("machineType", json!("e2-small")), ("zone", json!("a"))]);
        let news = props(&[("machineType", json!("e2-medium")), ("zone", json!("b"))]);

        let diff = provider.diff(&olds, &planned(&news)).unwrap();
        assert_eq!(
            diff.changes,
            vec![
                PropertyChange {
                    property: "machineType".into(),
                    requires_replacement: Some(false),
                },
                PropertyChange {
                    property: "zone".into(),
                    requires_replacement: None,
                },
            ]
        );
        assert!(diff.requires_replacement());
    }

    #[test]
    fn test_in_place_only_diff() {
        let diff = DiffResult {
            changes: vec![PropertyChange {
                property: "labels".into(),
                requires_replacement: Some(false),
            }],
        };
        assert!(!diff.requires_replacement());
        assert_eq!(diff.changed_properties().collect::<Vec<_>>(), vec!["labels"]);
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(MockProvider::new("test:Address"));
        assert!(registry.require("test:Address", "ip1").is_ok());
        let err = registry.require("test:Disk", "disk1").unwrap_err();
        assert!(matches!(err, Error::UnknownKind { ref resource, .. } if resource == "disk1"));
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec!["test:Address"]);
    }
}
