pub mod flag_evaluation;
pub mod flag_models;
