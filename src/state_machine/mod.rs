// Status model for the forecast hierarchy
//
// Run-level transitions are guarded and applied on `ModelRun`; everything above
// the run level is derived by aggregation.

pub mod aggregation;
pub mod events;
pub mod guards;
pub mod states;

pub use aggregation::{aggregate_forecast, AggregatedStatuses, EntityStatus};
pub use events::{EntityKind, RunTransition, StatusChange, TransitionOutcome};
pub use guards::{GuardError, GuardResult};
pub use states::Status;
