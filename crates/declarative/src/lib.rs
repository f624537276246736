//! # Declarative
//!
//! A reconciliation engine for declaratively described infrastructure.
//!
//! A program declares resources and the references between them. The
//! engine compares that desired graph with the last recorded state,
//! plans the minimal set of creates, updates, replacements and deletes,
//! and applies them concurrently through providers while recording every
//! change durably.
//!
//! ## Core Concepts
//!
//! - **Graph**: resources, their inputs and the output references linking them
//! - **Snapshot**: the persisted record of what was applied last time
//! - **Plan**: one operation per resource, ordered by dependencies
//! - **Provider**: create/read/update/delete/diff for one resource kind
//! - **Executor**: applies a plan on a worker pool, committing as it goes
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     ExecuteOptions, GraphBuilder, Inputs, NoProgress, ProviderRegistry, StateStore,
//!     execute, inputs, plan,
//! };
//!
//! let mut builder = GraphBuilder::new();
//! let ip = builder.declare("gcp:compute/address:Address", "web-addr", Inputs::new())?;
//! let vm = builder.declare(
//!     "gcp:compute/instance:Instance",
//!     "web",
//!     inputs([("natIp", ip.output("address"))]),
//! )?;
//! builder.export("vmIp", vm.output("natIp"));
//! let graph = builder.finalize()?;
//!
//! let mut providers = ProviderRegistry::new();
//! // providers.register(AddressProvider::new(..)); ...
//!
//! let mut store = StateStore::open("state/dev.json", "dev");
//! let snapshot = store.load()?;
//! let plan = plan(&graph, &snapshot, &providers)?;
//! let txn = store.begin(snapshot)?;
//! let report = execute(
//!     &plan,
//!     &graph,
//!     &providers,
//!     txn,
//!     &ExecuteOptions::default(),
//!     &mut NoProgress,
//! )?;
//! ```
//!
//! ## Callback Traits
//!
//! - [`ProgressCallback`]: Receives progress updates
//! - [`ConfirmCallback`]: Handles user confirmations
//!
//! These keep the engine free of any particular terminal UI.

pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod refresh;
pub mod state;
pub mod types;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use config::{Config, Namespace};
pub use context::{AbortSignal, AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback};
pub use diff::{DiffSummary, Operation, compute_operations, group_by_type};
pub use error::{Error, ErrorCategory, ProviderError, Result};
pub use executor::execute;
pub use graph::{Graph, GraphBuilder, Node, NodeHandle, ResourceOptions};
pub use planner::{Phase, Plan, Step, plan};
pub use provider::{Created, DiffResult, PropertyChange, Provider, ProviderRegistry, SharedProvider};
pub use refresh::{RefreshSummary, refresh_snapshot};
pub use state::{LockInfo, STATE_VERSION, Snapshot, StateRecord, StateStore, Transaction};
pub use types::{
    ApplyReport, ExecuteOptions, ExecuteSummary, OpStatus, OperationKind, OperationResult,
    PropertyDiff,
};
pub use value::{Input, Inputs, OutputRef, Planned, PlannedProperties, Properties, inputs, planned};
