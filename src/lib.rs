// Public library surface for integration tests (and potential reuse).
// The binary lives in main.rs and goes through cli::run_main.

pub mod cli;
pub mod core;
pub mod logging;
pub mod platform;
