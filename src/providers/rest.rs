//! Compute Engine REST v1 backend.
//!
//! Authentication is a bearer token taken from the environment; obtaining
//! one (e.g. `gcloud auth print-access-token`) is left to the caller.

use super::compute::{ComputeApi, ComputeError, ResourcePath, Scope};
use serde_json::Value;

/// Environment variable holding the OAuth access token
pub const ENV_ACCESS_TOKEN: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

const API_BASE: &str = "https://compute.googleapis.com/compute/v1";

/// Each `wait` call blocks server-side for up to two minutes.
const MAX_WAITS: usize = 15;

/// Compute Engine client for one project.
pub struct RestCompute {
    agent: ureq::Agent,
    api_base: String,
    project: String,
    token: String,
}

impl std::fmt::Debug for RestCompute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestCompute")
            .field("api_base", &self.api_base)
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

impl RestCompute {
    /// Create a client using the token from [`ENV_ACCESS_TOKEN`].
    pub fn from_env(project: impl Into<String>) -> Result<Self, ComputeError> {
        let token = std::env::var(ENV_ACCESS_TOKEN)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ComputeError::MissingCredentials(ENV_ACCESS_TOKEN))?;
        Ok(Self::new(project, token.trim()))
    }

    pub fn new(project: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            api_base: API_BASE.to_string(),
            project: project.into(),
            token: token.into(),
        }
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn collection_url(&self, scope: &Scope, collection: &str) -> String {
        format!(
            "{}/projects/{}/{}/{}",
            self.api_base, self.project, scope, collection
        )
    }

    fn resource_url(&self, path: &ResourcePath) -> String {
        format!("{}/projects/{}/{}", self.api_base, self.project, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn map_error(err: ureq::Error, path: &str) -> ComputeError {
        match err {
            ureq::Error::StatusCode(404) => ComputeError::NotFound {
                path: path.to_string(),
            },
            ureq::Error::StatusCode(code) => ComputeError::Http {
                message: format!("HTTP {code} for {path}"),
                status: Some(code),
            },
            other => ComputeError::Http {
                message: other.to_string(),
                status: None,
            },
        }
    }

    fn read(mut response: ureq::http::Response<ureq::Body>) -> Result<Value, ComputeError> {
        response
            .body_mut()
            .read_json()
            .map_err(|e| ComputeError::InvalidResponse(e.to_string()))
    }

    fn post(&self, url: &str, body: Option<&Value>, path: &str) -> Result<Value, ComputeError> {
        log::debug!("POST {url}");
        let request = self
            .agent
            .post(url)
            .header("Authorization", &self.bearer());
        let response = match body {
            Some(body) => request.send_json(body),
            None => request.send_empty(),
        }
        .map_err(|e| Self::map_error(e, path))?;
        Self::read(response)
    }

    /// Block until a zonal or regional operation is DONE.
    fn wait(&self, mut operation: Value, path: &str) -> Result<(), ComputeError> {
        for _ in 0..MAX_WAITS {
            let name = operation
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();

            if operation.get("status").and_then(Value::as_str) == Some("DONE") {
                if let Some(message) = operation
                    .pointer("/error/errors/0/message")
                    .and_then(Value::as_str)
                {
                    return Err(ComputeError::Operation {
                        operation: name,
                        message: message.to_string(),
                    });
                }
                log::debug!("Operation {name} on {path} done");
                return Ok(());
            }

            let self_link = operation
                .get("selfLink")
                .and_then(Value::as_str)
                .ok_or_else(|| ComputeError::InvalidResponse(format!("operation {name} has no selfLink")))?;
            log::debug!("Waiting for operation {name}");
            operation = self.post(&format!("{self_link}/wait"), None, path)?;
        }
        Err(ComputeError::Operation {
            operation: path.to_string(),
            message: "timed out waiting for completion".into(),
        })
    }
}

impl ComputeApi for RestCompute {
    fn get(&self, path: &ResourcePath) -> Result<Value, ComputeError> {
        let url = self.resource_url(path);
        log::debug!("GET {url}");
        let response = self
            .agent
            .get(&url)
            .header("Authorization", &self.bearer())
            .call()
            .map_err(|e| Self::map_error(e, &path.to_string()))?;
        Self::read(response)
    }

    fn insert(&self, scope: &Scope, collection: &str, body: &Value) -> Result<(), ComputeError> {
        let url = self.collection_url(scope, collection);
        let path = format!("{scope}/{collection}");
        let operation = self.post(&url, Some(body), &path)?;
        self.wait(operation, &path)
    }

    fn delete(&self, path: &ResourcePath) -> Result<(), ComputeError> {
        let url = self.resource_url(path);
        let display = path.to_string();
        log::debug!("DELETE {url}");
        let response = self
            .agent
            .delete(&url)
            .header("Authorization", &self.bearer())
            .call()
            .map_err(|e| Self::map_error(e, &display))?;
        self.wait(Self::read(response)?, &display)
    }

    fn action(&self, path: &ResourcePath, verb: &str, body: &Value) -> Result<(), ComputeError> {
        let url = format!("{}/{}", self.resource_url(path), verb);
        let display = path.to_string();
        let operation = self.post(&url, Some(body), &display)?;
        self.wait(operation, &display)
    }
}
