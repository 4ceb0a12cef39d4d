//! Worker process management
//!
//! This module contains the `WorkerProcess` handle around one spawned engine
//! and the `Supervisor` that drives the request/response protocol against it.

mod process;
mod supervisor;

pub use process::{ReadEvent, WorkerProcess};
pub use supervisor::{Supervisor, SupervisorState};
