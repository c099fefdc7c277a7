mod common;
use crate::common::{init_tracing, mock_settings, wait_finished, TIMEOUT};

use std::sync::Arc;
use std::time::Duration;

use buildexec::clock::{Clock, MockClock};
use buildexec::exec::{progress_percent, time_span_string, StuckPolicy};
use buildexec::queue::{RunContext, SubTask, WorkUnit};
use buildexec_test_utils::fakes::{
    fake_executor, work_unit, Behaviour, FakeComputer, FakeQueue, Gate, RecordingContext,
    ScriptedTask,
};

const HOUR: Duration = Duration::from_secs(60 * 60);

#[test]
fn test_progress_and_stuck_with_estimate() {
    init_tracing();
    let clock = MockClock::new();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, mock_settings(&clock));
    let gate = Gate::new();
    let task = ScriptedTask::with_estimate(
        "compile",
        Behaviour::Gate(gate.clone()),
        Some(Duration::from_secs(10)),
    );
    let ctx = RecordingContext::new();

    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(gate.wait_entered(TIMEOUT));

    clock.advance(Duration::from_secs(5));
    assert_eq!(executor.elapsed_time(), Duration::from_secs(5));
    assert_eq!(executor.progress(), 50);
    assert_eq!(executor.estimated_remaining_time(), Some(Duration::from_secs(5)));
    assert_eq!(executor.estimated_remaining_time_string(), "5 sec");
    assert_eq!(executor.timestamp_string(), "5 sec");
    assert!(!executor.is_likely_stuck());

    clock.advance(Duration::from_secs(96));
    assert_eq!(executor.progress(), 99);
    assert!(executor.is_likely_stuck());
    assert_eq!(executor.estimated_remaining_time(), None);
    assert_eq!(executor.estimated_remaining_time_string(), "N/A");

    gate.open();
    assert!(wait_finished(&executor));
}

#[test]
fn test_stuck_without_estimate_after_a_day() {
    init_tracing();
    let clock = MockClock::new();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, mock_settings(&clock));
    let gate = Gate::new();
    let task = ScriptedTask::new("soak", Behaviour::Gate(gate.clone()));
    let ctx = RecordingContext::new();

    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(gate.wait_entered(TIMEOUT));

    clock.advance(23 * HOUR);
    assert_eq!(executor.progress(), -1);
    assert!(!executor.is_likely_stuck());

    clock.advance(2 * HOUR);
    assert!(executor.is_likely_stuck());
    assert_eq!(executor.timestamp_string(), "1 day 1 hr");
    assert_eq!(executor.estimated_remaining_time_string(), "N/A");

    gate.open();
    assert!(wait_finished(&executor));
}

#[test]
fn test_parked_executor_reports_nothing() {
    let clock = MockClock::new();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, mock_settings(&clock));

    clock.advance(48 * HOUR);
    assert_eq!(executor.progress(), -1);
    assert!(!executor.is_likely_stuck());
    assert_eq!(executor.elapsed_time(), Duration::ZERO);
    assert_eq!(executor.estimated_remaining_time(), None);
    assert!(executor.time_spent_in_queue().is_none());
}

#[test]
fn test_idle_start_of_parked_executor() {
    let clock = MockClock::new();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, mock_settings(&clock));

    assert_eq!(executor.idle_start(), executor.creation_time());

    let reconnected = clock.now() + Duration::from_secs(3);
    computer.set_connect_time(reconnected);
    assert_eq!(executor.idle_start(), reconnected);
}

#[test]
fn test_idle_start_of_busy_executor() {
    init_tracing();
    let clock = MockClock::new();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, mock_settings(&clock));
    let gate = Gate::new();
    let task = ScriptedTask::with_estimate(
        "package",
        Behaviour::Gate(gate.clone()),
        Some(Duration::from_secs(60)),
    );
    let ctx = RecordingContext::new();

    let started = clock.now();
    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(gate.wait_entered(TIMEOUT));

    assert_eq!(executor.idle_start(), started + Duration::from_secs(60));

    // Past the estimate, it is always "a little while from now".
    clock.advance(Duration::from_secs(50));
    assert_eq!(executor.idle_start(), clock.now() + Duration::from_secs(15));

    gate.open();
    assert!(wait_finished(&executor));
}

#[test]
fn test_time_spent_in_queue() {
    init_tracing();
    let clock = MockClock::new();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, mock_settings(&clock));
    let gate = Gate::new();
    let task = ScriptedTask::new("compile", Behaviour::Gate(gate.clone()));
    let ctx = RecordingContext::new();

    let work: Arc<dyn SubTask> = task.clone();
    let context: Arc<dyn RunContext> = ctx.clone();
    let unit = WorkUnit::with_queued_at(work, context, clock.now());
    clock.advance(Duration::from_secs(2));

    executor.start(unit).unwrap();
    assert!(gate.wait_entered(TIMEOUT));
    assert_eq!(executor.time_spent_in_queue(), Some(Duration::from_secs(2)));

    gate.open();
    assert!(wait_finished(&executor));
}

#[test]
fn test_progress_percent_bounds() {
    let ten = Some(Duration::from_secs(10));
    assert_eq!(progress_percent(Duration::from_secs(5), ten), 50);
    assert_eq!(progress_percent(Duration::ZERO, ten), 0);
    assert_eq!(progress_percent(Duration::from_secs(20), ten), 99);
    assert_eq!(progress_percent(Duration::from_secs(5), None), -1);
    assert_eq!(progress_percent(Duration::from_secs(5), Some(Duration::ZERO)), -1);
}

#[test]
fn test_stuck_policy_thresholds() {
    let policy = StuckPolicy::default();
    let ten = Some(Duration::from_secs(10));
    assert!(!policy.is_stuck(Duration::from_secs(100), ten));
    assert!(policy.is_stuck(Duration::from_secs(101), ten));
    assert!(!policy.is_stuck(24 * HOUR, None));
    assert!(policy.is_stuck(24 * HOUR + Duration::from_secs(1), None));

    let strict = StuckPolicy {
        estimate_factor: 2,
        no_estimate_limit: HOUR,
    };
    assert!(strict.is_stuck(Duration::from_secs(21), ten));
    assert!(strict.is_stuck(2 * HOUR, None));
}

#[test]
fn test_time_span_strings() {
    assert_eq!(time_span_string(Duration::ZERO), "0 ms");
    assert_eq!(time_span_string(Duration::from_millis(850)), "850 ms");
    assert_eq!(time_span_string(Duration::from_secs(1)), "1 sec");
    assert_eq!(time_span_string(Duration::from_secs(184)), "3 min 4 sec");
    assert_eq!(time_span_string(HOUR), "1 hr");
    assert_eq!(time_span_string(26 * HOUR), "1 day 2 hr");
    assert_eq!(time_span_string(48 * HOUR), "2 days");
}
