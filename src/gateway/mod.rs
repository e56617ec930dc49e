//! Gateway module - admission control, worker pool and failover dispatch

pub mod admission;
pub mod dispatch;
pub mod health_check;
pub mod pool;
pub mod prompt;

pub use admission::AdmissionController;
pub use dispatch::{DispatchEngine, DispatchSettings, PendingBackoff};
pub use pool::{Backend, BackendPool};
pub use prompt::PromptPolicy;
