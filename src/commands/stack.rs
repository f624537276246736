//! Read-only and maintenance commands on a stack's state

use anyhow::Result;

use super::{Outcome, Session};
use crate::Context;
use crate::cli::OutputsArgs;
use crate::engine;
use crate::ui;

/// Print exported values from the last run.
pub fn outputs(ctx: &Context, args: &OutputsArgs) -> Result<Outcome> {
    let session = Session::open(ctx)?;
    let snapshot = session.store().read()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot.outputs)?);
        return Ok(Outcome::Done);
    }

    if snapshot.outputs.is_empty() {
        ui::info(&format!("Stack '{}' has no outputs", session.stack));
        return Ok(Outcome::Done);
    }

    ui::header(&format!("Stack {}", session.stack));
    if let Some(updated) = snapshot.updated_at {
        ui::kv("updated", &updated.to_rfc3339());
    }
    ui::kv("resources", &snapshot.len().to_string());
    engine::print_outputs(&snapshot.outputs);
    Ok(Outcome::Done)
}

/// Remove a stale lock.
pub fn unlock(ctx: &Context) -> Result<Outcome> {
    let session = Session::open(ctx)?;
    match session.store().force_unlock()? {
        Some(info) => ui::success(&format!("Removed lock held by {info}")),
        None => ui::info(&format!("Stack '{}' is not locked", session.stack)),
    }
    Ok(Outcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::apply::tests::{apply, session};
    use tempfile::TempDir;

    #[test]
    fn test_unlock_releases_stale_lock() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path(), "e2-small");
        assert_eq!(apply(&session), Outcome::Done);

        // A crashed run leaves its lock behind
        let mut crashed = session.store();
        crashed.load().unwrap();
        std::mem::forget(crashed);
        assert!(session.store().load().is_err());

        let info = session.store().force_unlock().unwrap();
        assert_eq!(info.map(|i| i.pid), Some(std::process::id()));
        assert!(session.store().load().is_ok());
    }
}
