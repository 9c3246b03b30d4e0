pub mod config;
pub mod lock;
pub mod orchestrator;
pub mod runner;
