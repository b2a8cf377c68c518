use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use proptest::strategy::Just;

use seismo_forecast::models::{ModelResult, RemoteTaskId};
use seismo_forecast::orchestration::BackoffCalculatorConfig;
use seismo_forecast::state_machine::{RunTransition, Status};

/// Strategy for remote task ids as workers hand them out
pub fn task_id_strategy() -> impl Strategy<Value = RemoteTaskId> {
    "[a-f0-9]{8}(-[a-f0-9]{4}){0,3}".prop_map(RemoteTaskId::new)
}

/// Strategy for any run status
pub fn status_strategy() -> impl Strategy<Value = Status> {
    prop::sample::select(Status::ALL.to_vec())
}

/// Strategy for a single transition offered to a run
pub fn transition_strategy() -> impl Strategy<Value = RunTransition> {
    prop_oneof![
        task_id_strategy().prop_map(|runid| RunTransition::Dispatch {
            runid,
            dispatched_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        }),
        Just(RunTransition::Complete {
            result: ModelResult::default()
        }),
        "[a-z ]{1,20}".prop_map(|detail| RunTransition::Fail { detail }),
        Just(RunTransition::Cancel),
        Just(RunTransition::Reset),
        Just(RunTransition::Hold),
        Just(RunTransition::Release),
    ]
}

/// Strategy for sequences of transitions, legal or not
pub fn transition_sequence_strategy() -> impl Strategy<Value = Vec<RunTransition>> {
    prop::collection::vec(transition_strategy(), 0..24)
}

/// Strategy for valid backoff settings
pub fn backoff_config_strategy() -> impl Strategy<Value = BackoffCalculatorConfig> {
    (1u64..2_000, 1u64..64, 1.1f64..4.0).prop_flat_map(|(base, factor, multiplier)| {
        (0.0..(multiplier - 1.0).min(0.5)).prop_map(move |max_jitter| BackoffCalculatorConfig {
            base_delay_ms: base,
            max_delay_ms: base * factor,
            multiplier,
            jitter_enabled: max_jitter > 0.0,
            max_jitter,
        })
    })
}
