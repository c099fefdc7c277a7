use std::time::Duration;

use proptest::prelude::*;

use buildexec::exec::{progress_percent, StuckPolicy};
use buildexec::interrupt::{CauseSet, InterruptionCause};

fn cause_strategy() -> impl Strategy<Value = InterruptionCause> {
    prop_oneof![
        "[a-c]".prop_map(InterruptionCause::user),
        Just(InterruptionCause::shutdown()),
        proptest::option::of("[x-z]").prop_map(InterruptionCause::programmatic),
    ]
}

proptest! {
    #[test]
    fn cause_set_keeps_first_occurrence_order(causes in proptest::collection::vec(cause_strategy(), 0..20)) {
        let set: CauseSet = causes.iter().cloned().collect();

        let mut expected: Vec<InterruptionCause> = Vec::new();
        for cause in &causes {
            if !expected.contains(cause) {
                expected.push(cause.clone());
            }
        }
        prop_assert_eq!(set.to_vec(), expected.clone());
        prop_assert_eq!(set.len(), expected.len());
    }

    #[test]
    fn re_adding_known_causes_changes_nothing(causes in proptest::collection::vec(cause_strategy(), 1..10)) {
        let mut set: CauseSet = causes.iter().cloned().collect();
        let before = set.to_vec();

        for cause in causes {
            prop_assert!(!set.insert(cause));
        }
        prop_assert_eq!(set.to_vec(), before);
    }

    #[test]
    fn progress_stays_in_range(elapsed_ms in 0u64..10_000_000, estimate_ms in 1u64..1_000_000) {
        let pct = progress_percent(
            Duration::from_millis(elapsed_ms),
            Some(Duration::from_millis(estimate_ms)),
        );
        prop_assert!((0..=99).contains(&pct));
    }

    #[test]
    fn stuck_only_beyond_factor_times_estimate(elapsed_ms in 0u64..10_000_000, estimate_ms in 1u64..100_000) {
        let policy = StuckPolicy::default();
        let stuck = policy.is_stuck(
            Duration::from_millis(elapsed_ms),
            Some(Duration::from_millis(estimate_ms)),
        );
        prop_assert_eq!(stuck, elapsed_ms > estimate_ms * 10);
    }
}
