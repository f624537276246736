//! Refresh recorded outputs from the live resources

use crate::error::{Error, Result};
use crate::provider::ProviderRegistry;
use crate::state::Snapshot;
use chrono::Utc;

/// What a refresh changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Records whose outputs changed
    pub updated: Vec<String>,
    /// Records whose resource no longer exists
    pub removed: Vec<String>,
    pub unchanged: usize,
}

impl RefreshSummary {
    pub fn has_drift(&self) -> bool {
        !self.updated.is_empty() || !self.removed.is_empty()
    }
}

/// Read every recorded resource and fold the live outputs into `snapshot`.
///
/// Resources that no longer exist are dropped so the next plan recreates
/// them. Any other read failure aborts the refresh.
pub fn refresh_snapshot(
    snapshot: &mut Snapshot,
    providers: &ProviderRegistry,
) -> Result<RefreshSummary> {
    let mut summary = RefreshSummary::default();
    let names: Vec<String> = snapshot.resources.keys().cloned().collect();

    for name in names {
        let Some(record) = snapshot.resources.get_mut(&name) else {
            continue;
        };
        let provider = providers.require(&record.kind, &name)?;

        match provider.read(&record.id) {
            Ok(outputs) if outputs == record.outputs => summary.unchanged += 1,
            Ok(outputs) => {
                log::info!("{name}: outputs changed outside of this tool");
                record.outputs = outputs;
                record.updated_at = Utc::now();
                summary.updated.push(name);
            }
            Err(e) if e.is_not_found() => {
                log::warn!("{name}: resource {} no longer exists", record.id);
                snapshot.resources.remove(&name);
                summary.removed.push(name);
            }
            Err(source) => {
                return Err(Error::Provider {
                    resource: name,
                    operation: "read",
                    source,
                });
            }
        }
    }

    Ok(summary)
}
