//! Compute Engine VM instance

use super::compute::{ComputeApi, ComputeError, ResourcePath, Scope};
use super::{INSTANCE_KIND, into_properties, required_str};
use declarative::{Created, Properties, PropertyDiff, Provider, ProviderError};
use serde_json::{Value, json};
use std::sync::Arc;

/// Properties that can change without recreating the VM
const UPDATABLE: &[&str] = &["machineType", "labels", "metadata"];

/// Outputs an in-place update never changes
const STABLE_OUTPUTS: &[&str] = &["id", "name", "selfLink", "zone", "natIp"];

const DEFAULT_DISK_TYPE: &str = "pd-balanced";
const DEFAULT_DISK_SIZE_GB: u64 = 10;

/// Provider for `gcp:compute/instance:Instance`.
///
/// Inputs use a flattened shape (`bootDisk`, `networkInterface`,
/// `metadata` as a plain map) that is expanded into the API request body.
/// Outputs are the live instance plus `natIp`, the first external address.
#[derive(Debug, Clone)]
pub struct InstanceProvider {
    api: Arc<dyn ComputeApi>,
}

impl InstanceProvider {
    pub fn new(api: Arc<dyn ComputeApi>) -> Self {
        Self { api }
    }

    fn outputs(&self, path: &ResourcePath) -> Result<Properties, ComputeError> {
        let live = self.api.get(path)?;
        let nat_ip = nat_ip(&live);
        let mut outputs = into_properties(live);
        outputs.insert("natIp".into(), Value::from(nat_ip));
        Ok(outputs)
    }

    /// Stop, resize, start. The API only accepts machine type changes on a
    /// stopped instance.
    fn resize(&self, path: &ResourcePath, zone: &str, machine_type: &str) -> Result<(), ComputeError> {
        log::info!("Stopping {path} to change machine type to {machine_type}");
        self.api.action(path, "stop", &Value::Null)?;
        self.api.action(
            path,
            "setMachineType",
            &json!({ "machineType": machine_type_url(zone, machine_type) }),
        )?;
        self.api.action(path, "start", &Value::Null)
    }

    fn set_labels(&self, path: &ResourcePath, labels: &Value) -> Result<(), ComputeError> {
        let live = self.api.get(path)?;
        let fingerprint = live.get("labelFingerprint").cloned().unwrap_or(Value::Null);
        self.api.action(
            path,
            "setLabels",
            &json!({ "labels": labels, "labelFingerprint": fingerprint }),
        )
    }

    fn set_metadata(&self, path: &ResourcePath, metadata: &Value) -> Result<(), ComputeError> {
        let live = self.api.get(path)?;
        let fingerprint = live
            .pointer("/metadata/fingerprint")
            .cloned()
            .unwrap_or(Value::Null);
        self.api.action(
            path,
            "setMetadata",
            &json!({ "items": metadata_items(metadata), "fingerprint": fingerprint }),
        )
    }
}

// ============================================================================
// Request body
// ============================================================================

fn machine_type_url(zone: &str, machine_type: &str) -> String {
    format!("zones/{zone}/machineTypes/{machine_type}")
}

/// `debian-cloud/debian-12` names the latest image of a family.
fn image_url(image: &str) -> String {
    match image.split_once('/') {
        Some((project, family)) if !family.contains('/') => {
            format!("projects/{project}/global/images/family/{family}")
        }
        _ => image.to_string(),
    }
}

/// Metadata map to the API's `[{key, value}]` list.
fn metadata_items(metadata: &Value) -> Value {
    let items: Vec<Value> = metadata
        .as_object()
        .into_iter()
        .flatten()
        .map(|(key, value)| {
            let value = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_string);
            json!({ "key": key, "value": value })
        })
        .collect();
    Value::Array(items)
}

fn boot_disk(zone: &str, disk: Option<&Value>) -> Value {
    let disk = disk.cloned().unwrap_or_else(|| json!({}));
    let size = disk
        .get("size")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_DISK_SIZE_GB);
    let disk_type = disk
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_DISK_TYPE);

    let mut params = json!({
        "diskSizeGb": size.to_string(),
        "diskType": format!("zones/{zone}/diskTypes/{disk_type}"),
    });
    if let Some(image) = disk.get("image").and_then(Value::as_str) {
        params["sourceImage"] = Value::from(image_url(image));
    }
    json!({ "boot": true, "autoDelete": true, "initializeParams": params })
}

fn network_interface(nic: Option<&Value>) -> Value {
    let nic = nic.cloned().unwrap_or_else(|| json!({}));
    let mut access = json!({
        "name": "External NAT",
        "type": "ONE_TO_ONE_NAT",
        "networkTier": nic.get("networkTier").cloned().unwrap_or_else(|| json!("PREMIUM")),
    });
    if let Some(ip) = nic.get("natIp").filter(|ip| !ip.is_null()) {
        access["natIP"] = ip.clone();
    }

    let mut interface = json!({ "accessConfigs": [access] });
    if let Some(subnet) = nic.get("subnetwork") {
        interface["subnetwork"] = subnet.clone();
    }
    interface
}

fn request_body(name: &str, zone: &str, inputs: &Properties) -> Result<Value, ProviderError> {
    let machine_type = required_str(inputs, "machineType")?;
    let mut body = json!({
        "name": name,
        "machineType": machine_type_url(zone, machine_type),
        "disks": [boot_disk(zone, inputs.get("bootDisk"))],
        "networkInterfaces": [network_interface(inputs.get("networkInterface"))],
    });

    if let Some(tags) = inputs.get("tags") {
        body["tags"] = json!({ "items": tags });
    }
    if let Some(metadata) = inputs.get("metadata") {
        body["metadata"] = json!({ "items": metadata_items(metadata) });
    }
    if let Some(scopes) = inputs.get("serviceAccountScopes") {
        body["serviceAccounts"] = json!([{ "email": "default", "scopes": scopes }]);
    }
    if let Some(labels) = inputs.get("labels") {
        body["labels"] = labels.clone();
    }
    Ok(body)
}

/// First external NAT address of a live instance, empty if none.
pub fn nat_ip(instance: &Value) -> String {
    instance
        .pointer("/networkInterfaces/0/accessConfigs/0/natIP")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// ============================================================================
// Provider
// ============================================================================

impl Provider for InstanceProvider {
    fn kind(&self) -> &str {
        INSTANCE_KIND
    }

    fn create(&self, inputs: &Properties) -> Result<Created, ProviderError> {
        let name = required_str(inputs, "name")?;
        let zone = required_str(inputs, "zone")?;
        let scope = Scope::Zone(zone.to_string());

        let body = request_body(name, zone, inputs)?;
        self.api.insert(&scope, "instances", &body)?;
        let path = ResourcePath::new(scope, "instances", name);
        let outputs = self.outputs(&path)?;
        log::info!("Created instance {path}");

        Ok(Created {
            id: path.to_string(),
            outputs,
        })
    }

    fn read(&self, id: &str) -> Result<Properties, ProviderError> {
        let path: ResourcePath = id.parse()?;
        Ok(self.outputs(&path)?)
    }

    fn update(
        &self,
        id: &str,
        _olds: &Properties,
        news: &Properties,
        diff: &PropertyDiff,
    ) -> Result<Properties, ProviderError> {
        let path: ResourcePath = id.parse()?;
        let keys = diff.keys();
        if let Some(key) = keys.iter().find(|k| !UPDATABLE.contains(*k)) {
            return Err(ProviderError::failed(format!(
                "instance property '{key}' cannot be updated in place"
            )));
        }

        if keys.contains("machineType") {
            let machine_type = required_str(news, "machineType")?;
            self.resize(&path, path.scope.name(), machine_type)?;
        }
        if keys.contains("labels") {
            let labels = news.get("labels").cloned().unwrap_or_else(|| json!({}));
            self.set_labels(&path, &labels)?;
        }
        if keys.contains("metadata") {
            let metadata = news.get("metadata").cloned().unwrap_or_else(|| json!({}));
            self.set_metadata(&path, &metadata)?;
        }

        Ok(self.outputs(&path)?)
    }

    fn delete(&self, id: &str) -> Result<(), ProviderError> {
        let path: ResourcePath = id.parse()?;
        self.api.delete(&path)?;
        log::info!("Deleted instance {path}");
        Ok(())
    }

    fn replace_semantics(&self, property: &str) -> Option<bool> {
        Some(!UPDATABLE.contains(&property))
    }

    fn output_survives_update(&self, property: &str) -> bool {
        STABLE_OUTPUTS.contains(&property)
    }
}
