//! `preview`: show the plan without changing anything

use anyhow::{Context as AnyhowContext, Result};
use declarative::refresh_snapshot;

use super::{Outcome, Session};
use crate::Context;
use crate::cli::PreviewArgs;
use crate::engine;
use crate::providers;

pub fn run(ctx: &Context, args: &PreviewArgs) -> Result<Outcome> {
    let session = Session::open(ctx)?;
    let api = session.compute()?;
    let graph = session.program(api.as_ref())?;
    let registry = providers::registry(api);

    // Fails while another run holds the lock; released before planning
    let mut store = session.store();
    let mut snapshot = store
        .load()
        .with_context(|| format!("Failed to load state for stack '{}'", session.stack))?;
    store.abort();

    if args.refresh {
        refresh_snapshot(&mut snapshot, &registry)?;
    }

    let plan = declarative::plan(&graph, &snapshot, &registry)?;
    engine::display_plan(&plan);
    log::debug!("Planned {} operations in {} waves", plan.len(), plan.waves().len());

    Ok(if plan.has_changes() {
        Outcome::Done
    } else {
        Outcome::NoChanges
    })
}
