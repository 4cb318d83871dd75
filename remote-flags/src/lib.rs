pub mod api;
pub mod config;
pub mod environments;
pub mod flags;
pub mod metrics_utils;
pub mod projects;
pub mod router;
pub mod rules;
pub mod server;
pub mod store;
pub mod validation;

// Not behind cfg(test): the integration tests under tests/ use these too.
pub mod test_utils;
