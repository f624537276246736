//! Local fake of the Compute Engine API backed by a JSON file.
//!
//! Used by `--simulate` and the tests. It keeps just enough behavior to
//! exercise the providers: name conflicts, reserved addresses, instance
//! power state and fingerprint checks on labels and metadata.

use super::compute::{ComputeApi, ComputeError, ResourcePath, Scope};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

const PROJECT: &str = "simulated";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Cloud {
    #[serde(default)]
    counter: u64,
    /// Resources keyed by their API path
    #[serde(default)]
    resources: BTreeMap<String, Value>,
}

impl Cloud {
    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

/// A fake cloud persisted at one file path.
#[derive(Debug)]
pub struct SimulatedCompute {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SimulatedCompute {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn io_error(&self, source: std::io::Error) -> ComputeError {
        ComputeError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn load(&self) -> Result<Cloud, ComputeError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| ComputeError::InvalidResponse(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Cloud::default()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, cloud: &Cloud) -> Result<(), ComputeError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }
        let content = serde_json::to_string_pretty(cloud)
            .map_err(|e| ComputeError::InvalidResponse(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| self.io_error(e))
    }

    /// Run `f` against the cloud, saving the result if it succeeds.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Cloud) -> Result<R, ComputeError>,
    ) -> Result<R, ComputeError> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut cloud = self.load()?;
        let result = f(&mut cloud)?;
        self.save(&cloud)?;
        Ok(result)
    }
}

fn self_link(path: &str) -> String {
    format!("https://www.googleapis.com/compute/v1/projects/{PROJECT}/{path}")
}

fn bad_request(message: impl Into<String>, status: u16) -> ComputeError {
    ComputeError::Http {
        message: message.into(),
        status: Some(status),
    }
}

fn not_found(path: &ResourcePath) -> ComputeError {
    ComputeError::NotFound {
        path: path.to_string(),
    }
}

/// Fill in the fields the API assigns on insert.
fn materialize(cloud: &mut Cloud, scope: &Scope, collection: &str, body: &Value) -> Result<Value, ComputeError> {
    let Some(mut resource) = body.as_object().cloned() else {
        return Err(bad_request("request body must be an object", 400));
    };
    let Some(name) = resource.get("name").and_then(Value::as_str).map(str::to_string) else {
        return Err(bad_request("resource name is required", 400));
    };

    let n = cloud.next();
    let path = format!("{scope}/{collection}/{name}");
    resource.insert("kind".into(), json!(format!("compute#{}", collection.trim_end_matches('s'))));
    resource.insert("id".into(), json!(format!("{}", 1_000_000 + n)));
    resource.insert("selfLink".into(), json!(self_link(&path)));
    resource.insert("creationTimestamp".into(), json!(Utc::now().to_rfc3339()));

    match (scope, collection) {
        (Scope::Region(region), "addresses") => {
            resource.insert("region".into(), json!(self_link(&format!("regions/{region}"))));
            resource
                .entry("address")
                .or_insert_with(|| json!(format!("203.0.113.{}", n % 254 + 1)));
            resource.insert("status".into(), json!("RESERVED"));
        }
        (Scope::Zone(zone), "instances") => {
            resource.insert("zone".into(), json!(self_link(&format!("zones/{zone}"))));
            resource.insert("status".into(), json!("RUNNING"));
            resource.insert("labelFingerprint".into(), json!(format!("fp-{n}")));
            let metadata = resource
                .entry("metadata")
                .or_insert_with(|| json!({}));
            if let Some(metadata) = metadata.as_object_mut() {
                metadata.insert("fingerprint".into(), json!(format!("fp-{n}")));
            }
            if let Some(nics) = resource.get_mut("networkInterfaces").and_then(Value::as_array_mut) {
                for (i, nic) in nics.iter_mut().enumerate() {
                    let Some(nic) = nic.as_object_mut() else { continue };
                    nic.insert("networkIP".into(), json!(format!("10.128.0.{}", n % 250 + 2 + i as u64)));
                    if let Some(configs) = nic.get_mut("accessConfigs").and_then(Value::as_array_mut) {
                        for config in configs.iter_mut().filter_map(Value::as_object_mut) {
                            config
                                .entry("natIP")
                                .or_insert_with(|| json!(format!("198.51.100.{}", n % 254 + 1)));
                        }
                    }
                }
            }
        }
        _ => {
            return Err(bad_request(
                format!("the simulated cloud does not support {scope}/{collection}"),
                400,
            ));
        }
    }
    Ok(Value::Object(resource))
}

fn check_fingerprint(current: Option<&Value>, given: Option<&Value>) -> Result<(), ComputeError> {
    if current == given {
        Ok(())
    } else {
        Err(bad_request("fingerprint does not match; read the resource again", 412))
    }
}

fn instance_action(resource: &mut Map<String, Value>, verb: &str, body: &Value, n: u64) -> Result<(), ComputeError> {
    match verb {
        "stop" => {
            resource.insert("status".into(), json!("TERMINATED"));
        }
        "start" => {
            resource.insert("status".into(), json!("RUNNING"));
        }
        "setMachineType" => {
            if resource.get("status").and_then(Value::as_str) != Some("TERMINATED") {
                return Err(bad_request("instance must be stopped to change its machine type", 400));
            }
            let machine_type = body
                .get("machineType")
                .cloned()
                .ok_or_else(|| bad_request("machineType is required", 400))?;
            resource.insert("machineType".into(), machine_type);
        }
        "setLabels" => {
            check_fingerprint(resource.get("labelFingerprint"), body.get("labelFingerprint"))?;
            resource.insert("labels".into(), body.get("labels").cloned().unwrap_or_else(|| json!({})));
            resource.insert("labelFingerprint".into(), json!(format!("fp-{n}")));
        }
        "setMetadata" => {
            let current = resource.get("metadata").and_then(|m| m.get("fingerprint"));
            check_fingerprint(current, body.get("fingerprint"))?;
            let mut metadata = body.as_object().cloned().unwrap_or_default();
            metadata.insert("fingerprint".into(), json!(format!("fp-{n}")));
            resource.insert("metadata".into(), Value::Object(metadata));
        }
        other => return Err(bad_request(format!("unknown method '{other}'"), 400)),
    }
    Ok(())
}

/// The instance holding a reserved address as its external IP.
fn address_user(cloud: &Cloud, path: &ResourcePath) -> Option<String> {
    if path.collection != "addresses" {
        return None;
    }
    let ip = cloud.resources.get(&path.to_string())?.get("address")?.clone();
    cloud
        .resources
        .iter()
        .filter(|(key, _)| key.contains("/instances/"))
        .find(|(_, vm)| {
            vm["networkInterfaces"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|nic| nic["accessConfigs"].as_array())
                .flatten()
                .any(|config| config["natIP"] == ip)
        })
        .map(|(key, _)| key.clone())
}

impl ComputeApi for SimulatedCompute {
    fn get(&self, path: &ResourcePath) -> Result<Value, ComputeError> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let cloud = self.load()?;
        let key = path.to_string();
        if let Some(resource) = cloud.resources.get(&key) {
            return Ok(resource.clone());
        }
        // Every region has whatever subnetwork is asked for
        if path.collection == "subnetworks" {
            return Ok(json!({
                "kind": "compute#subnetwork",
                "name": path.name,
                "region": self_link(&path.scope.to_string()),
                "ipCidrRange": "10.128.0.0/20",
                "selfLink": self_link(&key),
            }));
        }
        Err(not_found(path))
    }

    fn insert(&self, scope: &Scope, collection: &str, body: &Value) -> Result<(), ComputeError> {
        self.mutate(|cloud| {
            let resource = materialize(cloud, scope, collection, body)?;
            let name = resource.get("name").and_then(Value::as_str).unwrap_or_default();
            let key = format!("{scope}/{collection}/{name}");
            if cloud.resources.contains_key(&key) {
                return Err(bad_request(format!("{key} already exists"), 409));
            }
            log::debug!("simulated insert {key}");
            cloud.resources.insert(key, resource);
            Ok(())
        })
    }

    fn delete(&self, path: &ResourcePath) -> Result<(), ComputeError> {
        self.mutate(|cloud| {
            if let Some(user) = address_user(cloud, path) {
                return Err(bad_request(format!("{path} is in use by {user}"), 400));
            }
            log::debug!("simulated delete {path}");
            cloud
                .resources
                .remove(&path.to_string())
                .map(|_| ())
                .ok_or_else(|| not_found(path))
        })
    }

    fn action(&self, path: &ResourcePath, verb: &str, body: &Value) -> Result<(), ComputeError> {
        self.mutate(|cloud| {
            let n = cloud.next();
            let resource = cloud
                .resources
                .get_mut(&path.to_string())
                .and_then(Value::as_object_mut)
                .ok_or_else(|| not_found(path))?;
            if path.collection != "instances" {
                return Err(bad_request(format!("{path} has no method '{verb}'"), 400));
            }
            log::debug!("simulated {verb} on {path}");
            instance_action(resource, verb, body, n)
        })
    }
}
