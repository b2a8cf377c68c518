//! # System Constants
//!
//! Wire-protocol constants shared with the remote model workers, status groupings
//! used by run discovery, and engine-wide defaults.

// Re-export the status type for convenience
pub use crate::state_machine::Status;

/// HTTP protocol spoken by seismicity forecast model workers
pub mod worker_protocol {
    /// Collection endpoint, relative to a worker's base URL
    pub const RUN_ENDPOINT: &str = "v1/sfm/run";

    /// Status codes a worker reports for a task, either as the HTTP status or
    /// as `data.attributes.status_code` in the response body
    pub mod status_codes {
        pub const COMPLETE: u16 = 200;
        pub const ACCEPTED: u16 = 202;
        pub const NOT_AVAILABLE: u16 = 204;
        pub const METHOD_NOT_ALLOWED: u16 = 405;
        pub const TASK_ERROR: u16 = 418;
        pub const UNPROCESSABLE: u16 = 422;
        pub const PROCESSING: u16 = 423;
        pub const INTERNAL_ERROR: u16 = 500;

        /// Codes that end a task on the worker side with an error
        pub const TERMINAL_ERRORS: &[u16] = &[
            NOT_AVAILABLE,
            METHOD_NOT_ALLOWED,
            TASK_ERROR,
            UNPROCESSABLE,
            INTERNAL_ERROR,
        ];
    }
}

/// Status groupings used when selecting runs for work
pub mod status_groups {
    use super::Status;

    /// Statuses a run may be dispatched from
    pub const DISPATCHABLE: &[Status] = &[Status::Pending, Status::Prepared, Status::Running];

    /// Statuses after which no transition happens without an external reset
    pub const TERMINAL: &[Status] = &[Status::Complete, Status::Error, Status::Cancelled];

    /// Statuses that prove a run's inputs have been consumed by a worker
    pub const STARTED: &[Status] = &[Status::Dispatched, Status::Complete];

    /// Statuses skipped entirely by discovery
    pub const SKIPPED: &[Status] = &[
        Status::Complete,
        Status::Dispatched,
        Status::Error,
        Status::Cancelled,
        Status::OnHold,
    ];
}

/// Engine-wide defaults
pub mod system {
    pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;
    pub const DEFAULT_MAX_CONCURRENT_REMOTE_CALLS: usize = 4;
    pub const MAX_CONCURRENT_REMOTE_CALLS_LIMIT: usize = 64;
    /// Name of the reservation guarding payload encoding
    pub const PAYLOAD_ENCODER_RESOURCE: &str = "payload_encoder";
}
