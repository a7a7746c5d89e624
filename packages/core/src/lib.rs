// Library root: exposes the watcher modules to the binary and to the
// integration tests in `tests/`.

pub mod alerts;
pub mod calendar;
pub mod error;
pub mod masking;
pub mod metrics;
pub mod pipeline;
pub mod services;
pub mod state;
pub mod summary;

// Ambient modules used by the binary.
pub mod cli;
pub mod config;
pub mod logging;
