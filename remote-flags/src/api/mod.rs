pub mod admin;
pub mod auth;
pub mod errors;
pub mod evaluation;

pub use errors::FlagError;
