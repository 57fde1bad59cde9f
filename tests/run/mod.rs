mod bdd_steps;
mod scenarios;
mod test_helpers;

pub use test_helpers::{RunContext, run_context};
