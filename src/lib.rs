pub mod clap_args;
pub mod config;
pub mod driver;
pub mod execution_plan;
pub mod infrastructure;
pub mod process_control;
pub mod results;
pub mod runner;
