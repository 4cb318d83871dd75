pub mod environment_models;
pub mod environment_operations;
