//! Pipeline orchestration
//!
//! - `routing`: picks the next stage from the run state
//! - `controller`: drives a single run, checkpointing every transition
//! - `manager`: the run control surface shared by all runs of a process

pub mod controller;
pub mod manager;
pub mod routing;

pub use controller::RunController;
pub use manager::RunManager;
pub use routing::{Route, Transition};
