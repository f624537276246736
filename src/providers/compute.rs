//! Compute Engine API surface shared by the providers
//!
//! Resources are addressed by their API path relative to the project,
//! e.g. `regions/europe-west1/addresses/wp-1-ip`. That path doubles as the
//! physical ID recorded in state.

use declarative::ProviderError;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where a resource lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Region(String),
    Zone(String),
}

impl Scope {
    pub fn name(&self) -> &str {
        match self {
            Self::Region(name) | Self::Zone(name) => name,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Region(r) => write!(f, "regions/{r}"),
            Self::Zone(z) => write!(f, "zones/{z}"),
        }
    }
}

/// API path of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    pub scope: Scope,
    pub collection: String,
    pub name: String,
}

impl ResourcePath {
    pub fn new(scope: Scope, collection: &str, name: &str) -> Self {
        Self {
            scope,
            collection: collection.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.scope, self.collection, self.name)
    }
}

impl FromStr for ResourcePath {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let scope = match parts.as_slice() {
            ["regions", r, _, _] => Scope::Region((*r).to_string()),
            ["zones", z, _, _] => Scope::Zone((*z).to_string()),
            _ => {
                return Err(ComputeError::InvalidResponse(format!(
                    "'{s}' is not a regional or zonal resource path"
                )));
            }
        };
        Ok(Self::new(scope, parts[2], parts[3]))
    }
}

/// Errors from a compute backend.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("{path} not found")]
    NotFound { path: String },

    #[error("HTTP request failed: {message}")]
    Http { message: String, status: Option<u16> },

    #[error("operation {operation} failed: {message}")]
    Operation { operation: String, message: String },

    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    #[error("missing credentials: set {0}")]
    MissingCredentials(&'static str),

    #[error("simulated cloud I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ComputeError> for ProviderError {
    fn from(err: ComputeError) -> Self {
        match err {
            ComputeError::NotFound { path } => Self::NotFound { id: path },
            other => Self::failed(other.to_string()),
        }
    }
}

/// Minimal Compute Engine v1 surface.
///
/// `insert`, `delete` and `action` return once the resulting operation is
/// done.
pub trait ComputeApi: Send + Sync + fmt::Debug {
    /// Fetch a resource; [`ComputeError::NotFound`] if absent.
    fn get(&self, path: &ResourcePath) -> Result<Value, ComputeError>;

    /// Create a resource in `collection` under `scope`.
    fn insert(&self, scope: &Scope, collection: &str, body: &Value) -> Result<(), ComputeError>;

    fn delete(&self, path: &ResourcePath) -> Result<(), ComputeError>;

    /// Invoke a custom method such as `setLabels` or `stop`.
    fn action(&self, path: &ResourcePath, verb: &str, body: &Value) -> Result<(), ComputeError>;
}

/// Self link of a subnetwork, looked up by name and region.
pub fn subnetwork_self_link(
    api: &dyn ComputeApi,
    region: &str,
    name: &str,
) -> Result<String, ComputeError> {
    let path = ResourcePath::new(Scope::Region(region.to_string()), "subnetworks", name);
    let subnet = api.get(&path)?;
    subnet
        .get("selfLink")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ComputeError::InvalidResponse(format!("{path} has no selfLink")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_path_round_trip() {
        let path = ResourcePath::new(Scope::Zone("europe-west1-b".into()), "instances", "wp-7");
        assert_eq!(path.to_string(), "zones/europe-west1-b/instances/wp-7");
        assert_eq!(path.to_string().parse::<ResourcePath>().unwrap(), path);
    }

    #[test]
    fn test_resource_path_rejects_global() {
        assert!("global/networks/default".parse::<ResourcePath>().is_err());
        assert!("regions/x/addresses".parse::<ResourcePath>().is_err());
    }

    #[test]
    fn test_not_found_maps_to_provider_not_found() {
        let err: ProviderError = ComputeError::NotFound {
            path: "regions/r/addresses/a".into(),
        }
        .into();
        assert!(err.is_not_found());

        let err: ProviderError = ComputeError::MissingCredentials("TOKEN").into();
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "missing credentials: set TOKEN");
    }
}
