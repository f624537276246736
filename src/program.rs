//! The WordPress development host
//!
//! Declares a reserved external address and a Debian VM that uses it.
//! Configuration comes from the stack's `gcp` and `wp` namespaces:
//!
//! ```toml
//! [gcp]
//! project = "my-project"
//! region = "europe-west1"
//! zone = "europe-west1-b"
//!
//! [wp]
//! networkName = "default"
//! subnetName = "default"
//! machineType = "e2-small"
//! # vmName = "wp-blog"
//! ```

use crate::providers::compute::{self, ComputeApi};
use crate::providers::{ADDRESS_KIND, INSTANCE_KIND};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::{Config, Graph, GraphBuilder, Input, inputs};
use regex::Regex;
use serde_json::json;
use std::sync::LazyLock;

/// Project name, used to lay out state on disk
pub const PROJECT: &str = "wordpress-host";

const MAX_NAME_LEN: usize = 63;

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]").expect("valid regex"));
static REPEATED_DASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{2,}").expect("valid regex"));

/// Process environment the program reads.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Public key installed for the `debian` user
    pub ssh_pub_key: String,
    pub build_number: Option<String>,
    pub now: DateTime<Utc>,
}

impl Environment {
    pub fn from_env() -> Self {
        Self {
            ssh_pub_key: std::env::var("SSH_PUB_KEY")
                .unwrap_or_default()
                .trim()
                .to_string(),
            build_number: std::env::var("BUILD_NUMBER")
                .ok()
                .filter(|b| !b.is_empty()),
            now: Utc::now(),
        }
    }
}

/// Turn arbitrary text into a valid Compute Engine resource name.
///
/// Names are lowercase letters, digits and dashes, start with a letter,
/// end with a letter or digit and are at most 63 characters long.
pub fn sanitize(name: &str) -> String {
    let lower = name.to_lowercase();
    let replaced = INVALID_CHARS.replace_all(&lower, "-");
    let collapsed = REPEATED_DASHES.replace_all(&replaced, "-");
    let mut name = collapsed.trim_matches('-').to_string();

    if name.is_empty() {
        name = "wp".to_string();
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        name.insert(0, 'w');
    }
    name.truncate(MAX_NAME_LEN);
    if !name.ends_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        name.pop();
        name.push('0');
    }
    name
}

/// Name of the VM: `wp:vmName`, else the CI build number, else a timestamp.
pub fn vm_name(config: &Config, env: &Environment) -> String {
    if let Some(name) = config.namespace("wp").get("vmName") {
        return sanitize(name);
    }
    match &env.build_number {
        Some(build) => sanitize(&format!("wp-{build}")),
        None => sanitize(&format!("wp-{}", env.now.format("%Y%m%d%H%M%S"))),
    }
}

/// Declare the stack's resources.
pub fn build(config: &Config, env: &Environment, api: &dyn ComputeApi) -> Result<Graph> {
    let gcp = config.namespace("gcp");
    let wp = config.namespace("wp");
    let region = gcp.require("region")?;
    let zone = gcp.require("zone")?;
    let network = wp.require("networkName")?;
    let subnet_name = wp.require("subnetName")?;
    let machine_type = wp.require("machineType")?;

    let vm_name = vm_name(config, env);
    log::info!("Declaring WordPress host '{vm_name}' on network '{network}'");

    let subnetwork = compute::subnetwork_self_link(api, region, subnet_name)
        .with_context(|| format!("Failed to look up subnetwork '{subnet_name}' in {region}"))?;

    let mut builder = GraphBuilder::new();

    let address = builder.declare(
        ADDRESS_KIND,
        format!("{vm_name}-addr"),
        inputs([
            ("name", Input::from(format!("{vm_name}-ip"))),
            ("region", Input::from(region)),
            ("addressType", Input::from("EXTERNAL")),
            ("networkTier", Input::from("PREMIUM")),
            ("description", Input::from(format!("Reserved for {vm_name}"))),
        ]),
    )?;

    let metadata = Input::map([
        ("block-project-ssh-keys", Input::from("TRUE")),
        ("ssh-keys", Input::from(format!("debian:{}", env.ssh_pub_key))),
    ]);
    let network_interface = Input::map([
        ("subnetwork", Input::from(subnetwork)),
        ("natIp", Input::from(address.output("address"))),
        ("networkTier", Input::from("PREMIUM")),
    ]);

    let instance = builder.declare(
        INSTANCE_KIND,
        vm_name.clone(),
        inputs([
            ("name", Input::from(vm_name.as_str())),
            ("zone", Input::from(zone)),
            ("machineType", Input::from(machine_type)),
            ("tags", Input::list(["wp-public"])),
            ("metadata", metadata),
            (
                "bootDisk",
                Input::from(json!({
                    "image": "debian-cloud/debian-12",
                    "size": 20,
                    "type": "pd-balanced",
                })),
            ),
            ("networkInterface", network_interface),
            (
                "serviceAccountScopes",
                Input::list(["https://www.googleapis.com/auth/cloud-platform"]),
            ),
            (
                "labels",
                Input::map([("role", "wordpress-host"), ("env", "dev")]),
            ),
        ]),
    )?;

    builder.export("vmName", vm_name);
    builder.export("vmIp", instance.output("natIp"));

    Ok(builder.finalize()?)
}
