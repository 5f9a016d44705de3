/*!
 * Core Module
 * Configuration, errors, identifiers and serialization helpers
 */

pub mod bincode;
pub mod config;
pub mod errors;
pub mod id;
pub mod limits;

// Re-export commonly used types
pub use config::{CoordinatorConfig, ManagerLayout};
pub use errors::{CoordinatorError, ManagerError, ManagerResult, Result, SharedMemoryError};
pub use id::{GroupId, WorkerId};
