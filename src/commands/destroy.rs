//! `destroy`: delete every recorded resource

use anyhow::Result;
use declarative::{AutoConfirm, Graph};

use super::apply::{RunOptions, reconcile};
use super::{Outcome, Session};
use crate::Context;
use crate::cli::DestroyArgs;
use crate::engine::PromptConfirm;

pub fn run(ctx: &Context, args: &DestroyArgs) -> Result<Outcome> {
    let session = Session::open(ctx)?;
    let api = session.compute()?;

    // Nothing declared: every record plans as a delete, dependents first
    let graph = Graph::empty();
    let opts = RunOptions {
        yes: args.yes,
        jobs: args.jobs,
        refresh: false,
        prompt: "Destroy these resources?",
    };
    if opts.yes {
        reconcile(ctx, &session, api, &graph, &opts, &mut AutoConfirm)
    } else {
        reconcile(ctx, &session, api, &graph, &opts, &mut PromptConfirm)
    }
}
