//! Stack commands
//!
//! Each command opens a [`Session`] for the selected stack and reports an
//! [`Outcome`] that `main` turns into the process exit code.

pub mod apply;
pub mod destroy;
pub mod preview;
pub mod stack;

use anyhow::{Context as AnyhowContext, Result};
use declarative::{Config, Graph, StateStore};
use std::path::PathBuf;
use std::sync::Arc;

use crate::Context;
use crate::paths;
use crate::program::{self, Environment, PROJECT};
use crate::providers::{ComputeApi, RestCompute, SimulatedCompute};

/// How a command finished, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Everything requested was done
    Done,
    /// The plan had nothing to change
    NoChanges,
    /// The user declined the confirmation prompt
    Declined,
    /// Some operations failed or the run was interrupted
    Failed,
}

impl Outcome {
    pub fn exit_code(self, detailed: bool) -> u8 {
        match self {
            Self::Done | Self::Declined => 0,
            Self::NoChanges if detailed => 3,
            Self::NoChanges => 0,
            Self::Failed => 2,
        }
    }
}

/// Configuration and storage locations of one stack.
pub struct Session {
    pub stack: String,
    pub config: Config,
    state_dir: PathBuf,
    simulate: bool,
}

impl Session {
    /// Load the stack configuration and apply `--config` overrides.
    pub fn open(ctx: &Context) -> Result<Self> {
        let path = ctx
            .config_file
            .clone()
            .unwrap_or_else(|| paths::default_config_file(&ctx.stack));
        let mut config = Config::load(&path)
            .with_context(|| format!("Failed to load stack config {}", path.display()))?;
        if config.is_empty() {
            log::info!("No configuration found at {}", path.display());
        }
        for assignment in &ctx.config_overrides {
            config.apply_override(assignment)?;
        }

        Ok(Self {
            stack: ctx.stack.clone(),
            config,
            state_dir: paths::state_dir()?,
            simulate: ctx.simulate,
        })
    }

    /// State store for this stack; the lock is taken on `load`.
    pub fn store(&self) -> StateStore {
        StateStore::open(
            paths::stack_state_file(&self.state_dir, PROJECT, &self.stack),
            self.stack.clone(),
        )
    }

    /// The compute backend: the simulated cloud or the REST API.
    pub fn compute(&self) -> Result<Arc<dyn ComputeApi>> {
        if self.simulate {
            let path = paths::simulated_cloud_file(&self.state_dir, PROJECT);
            log::info!("Using simulated cloud at {}", path.display());
            return Ok(Arc::new(SimulatedCompute::open(path)));
        }

        let project = self.config.namespace("gcp").require("project")?;
        let api = RestCompute::from_env(project)
            .context("Cannot reach the Compute Engine API (use --simulate for a local run)")?;
        Ok(Arc::new(api))
    }

    /// Evaluate the WordPress host program into a resource graph.
    pub fn program(&self, api: &dyn ComputeApi) -> Result<Graph> {
        program::build(&self.config, &Environment::from_env(), api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Outcome::Done.exit_code(false), 0);
        assert_eq!(Outcome::Declined.exit_code(true), 0);
        assert_eq!(Outcome::NoChanges.exit_code(false), 0);
        assert_eq!(Outcome::NoChanges.exit_code(true), 3);
        assert_eq!(Outcome::Failed.exit_code(false), 2);
    }
}
