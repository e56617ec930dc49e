//! Backend module - backend trait, worker and cloud clients

pub mod cloud_backend;
pub mod http_backend;
pub mod traits;

pub use traits::{
    DispatchOutcome, FailureKind, GenerationRequest, ImageBackend, WorkerConnector,
};
