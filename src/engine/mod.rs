//! Terminal front end for the declarative engine
//!
//! The engine itself lives in the `declarative` crate; this module renders
//! plans, asks for confirmation and reports results.

pub mod differ;
pub mod executor;

pub use differ::display_plan;
pub use executor::{PromptConfirm, print_outputs, print_summary};
