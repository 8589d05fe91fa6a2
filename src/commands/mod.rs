// ABOUTME: Command implementations behind the CLI
// ABOUTME: Exports the run and state commands

pub mod run;
pub mod state;

pub use run::run;
pub use state::state;
