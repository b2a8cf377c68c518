//! Remote model worker protocol: payload assembly, HTTP client and response
//! classification.

pub mod client;
pub mod errors;
pub mod payload;
pub mod protocol;

pub use client::{HttpModelWorker, HttpWorkerProvider, ModelWorker, WorkerProvider};
pub use errors::{WorkerError, WorkerResult};
pub use payload::RunPayload;
pub use protocol::TaskStatus;
