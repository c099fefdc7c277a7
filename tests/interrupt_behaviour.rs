mod common;
use crate::common::{init_tracing, wait_finished, wait_until, TIMEOUT};

use std::sync::{Arc, Barrier};

use buildexec::exec::{
    impersonating, on_behalf_of, AsynchronousExecution, ExecutorSettings, SlotPhase,
};
use buildexec::interrupt::InterruptionCause;
use buildexec::types::BuildResult;
use buildexec_test_utils::fakes::{
    fake_executor, work_unit, Behaviour, FakeComputer, FakeQueue, RecordingBody,
    RecordingContext, RecordingTarget, ScriptedTask,
};

#[test]
fn test_abort_by_user_records_cause_and_result() {
    init_tracing();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, ExecutorSettings::default());
    let task = ScriptedTask::new("deploy", Behaviour::UntilInterrupted);
    let ctx = RecordingContext::new();

    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(wait_until(TIMEOUT, || task.executable().runs() == 1));

    executor.abort_by("alice");
    assert!(wait_finished(&executor));

    assert!(executor.is_stop_requested());
    assert_eq!(executor.abort_result(), BuildResult::Aborted);
    assert_eq!(
        executor.interrupt_causes(),
        vec![InterruptionCause::user("alice")]
    );

    let ends = ctx.ends();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].error.as_deref(), Some("interrupted"));
    assert_eq!(ctx.aborts(), vec!["interrupted".to_string()]);

    let target = RecordingTarget::default();
    let mut listener = Vec::new();
    executor
        .record_cause_of_interruption(&target, &mut listener)
        .unwrap();
    assert_eq!(target.causes(), vec![InterruptionCause::user("alice")]);
    assert_eq!(String::from_utf8(listener).unwrap(), "Aborted by alice\n");

    // Causes are drained: a second report is a no-op.
    let mut again = Vec::new();
    executor
        .record_cause_of_interruption(&target, &mut again)
        .unwrap();
    assert_eq!(target.calls(), 1);
    assert!(again.is_empty());
    assert!(executor.interrupt_causes().is_empty());
}

#[test]
fn test_latest_result_wins_and_causes_are_deduplicated() {
    init_tracing();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, ExecutorSettings::default());
    let task = ScriptedTask::new("deploy", Behaviour::UntilInterrupted);
    let ctx = RecordingContext::new();

    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(wait_until(TIMEOUT, || task.executable().runs() == 1));

    executor.interrupt_with(BuildResult::Failure, [InterruptionCause::user("a")]);
    executor.interrupt_with(
        BuildResult::NotBuilt,
        [InterruptionCause::user("a"), InterruptionCause::user("b")],
    );

    assert!(wait_finished(&executor));
    assert_eq!(executor.abort_result(), BuildResult::NotBuilt);
    assert_eq!(
        executor.interrupt_causes(),
        vec![InterruptionCause::user("a"), InterruptionCause::user("b")]
    );
}

#[test]
fn test_causeless_interrupt_records_result_only() {
    init_tracing();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, ExecutorSettings::default());
    let task = ScriptedTask::new("deploy", Behaviour::UntilInterrupted);
    let ctx = RecordingContext::new();

    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(wait_until(TIMEOUT, || task.executable().runs() == 1));

    executor.interrupt();
    assert!(wait_finished(&executor));

    assert_eq!(executor.interrupt_result(), Some(BuildResult::Aborted));
    assert!(executor.interrupt_causes().is_empty());

    let target = RecordingTarget::default();
    let mut listener = Vec::new();
    executor
        .record_cause_of_interruption(&target, &mut listener)
        .unwrap();
    assert_eq!(target.calls(), 0);
    assert!(listener.is_empty());
}

#[test]
fn test_self_interrupt_only_raises_stop_signal() {
    init_tracing();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, ExecutorSettings::default());
    let task = ScriptedTask::new("introspective", Behaviour::SelfInterrupt);
    let ctx = RecordingContext::new();

    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(wait_finished(&executor));

    assert!(executor.is_stop_requested());
    assert!(executor.interrupt_result().is_none());
    assert!(executor.interrupt_causes().is_empty());
    assert_eq!(executor.abort_result(), BuildResult::Aborted);
    assert_eq!(ctx.ends()[0].error.as_deref(), Some("interrupted"));
}

#[test]
fn test_stop_without_executable_does_nothing() {
    init_tracing();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, ExecutorSettings::default());

    assert!(!executor.stop());
    assert_eq!(executor.phase(), SlotPhase::Parked);
    assert!(computer.removed().is_empty());
}

#[test]
fn test_stop_interrupts_running_executable() {
    init_tracing();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, ExecutorSettings::default());
    let task = ScriptedTask::new("deploy", Behaviour::UntilInterrupted);
    let ctx = RecordingContext::new();

    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(wait_until(TIMEOUT, || task.executable().runs() == 1));

    assert!(executor.stop());
    assert!(wait_finished(&executor));
    assert_eq!(ctx.ends()[0].error.as_deref(), Some("interrupted"));
}

#[test]
fn test_shutdown_interrupt_reaches_async_body() {
    init_tracing();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, ExecutorSettings::default());
    let (body, interrupts) = RecordingBody::new(true);
    let handle = AsynchronousExecution::new(body);
    let task = ScriptedTask::new("long-haul", Behaviour::Async(handle.clone()));
    let ctx = RecordingContext::new();

    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(wait_until(TIMEOUT, || {
        executor.phase() == SlotPhase::AsyncSuspended && handle.executor().is_some()
    }));

    executor.interrupt_for_shutdown();

    assert_eq!(*interrupts.lock(), vec![true]);
    assert_eq!(
        executor.interrupt_causes(),
        vec![InterruptionCause::shutdown()]
    );
    // The continuation owns cancellation; the worker's stop signal is untouched.
    assert!(!executor.is_stop_requested());

    handle.completed(Some(buildexec::errors::TaskError::Interrupted));
    assert!(wait_finished(&executor));
    assert_eq!(ctx.ends()[0].error.as_deref(), Some("interrupted"));
}

#[test]
fn test_impersonating_code_sees_the_stop_signal() {
    init_tracing();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, ExecutorSettings::default());
    let task = ScriptedTask::new("deploy", Behaviour::UntilInterrupted);
    let ctx = RecordingContext::new();

    let observe = impersonating(executor.clone(), |ctx| {
        (ctx.executor().number(), ctx.is_interrupted(), ctx.abort_result())
    });

    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(wait_until(TIMEOUT, || task.executable().runs() == 1));

    let from_helper = std::thread::spawn(move || observe()).join().unwrap();
    assert_eq!(from_helper, (0, false, BuildResult::Aborted));

    executor.interrupt_with(BuildResult::NotBuilt, Vec::<InterruptionCause>::new());
    assert!(wait_finished(&executor));
    let after = on_behalf_of(&executor, |ctx| (ctx.is_interrupted(), ctx.abort_result()));
    assert_eq!(after, (true, BuildResult::NotBuilt));
}

#[test]
fn test_concurrent_interrupts_merge_causes() {
    init_tracing();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, ExecutorSettings::default());
    let task = ScriptedTask::new("deploy", Behaviour::UntilInterrupted);
    let ctx = RecordingContext::new();

    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(wait_until(TIMEOUT, || task.executable().runs() == 1));

    let barrier = Arc::new(Barrier::new(2));
    let aborts: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|user| {
            let executor = Arc::clone(&executor);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                executor.interrupt_with(BuildResult::Aborted, [InterruptionCause::user(user)]);
            })
        })
        .collect();
    for abort in aborts {
        abort.join().unwrap();
    }
    assert!(wait_finished(&executor));

    let causes = executor.interrupt_causes();
    assert_eq!(causes.len(), 2);
    assert!(causes.contains(&InterruptionCause::user("a")));
    assert!(causes.contains(&InterruptionCause::user("b")));
    assert_eq!(executor.abort_result(), BuildResult::Aborted);
    assert_eq!(ctx.ends().len(), 1);
}

#[test]
fn test_shutdown_during_async_handoff_is_forwarded_as_shutdown() {
    init_tracing();
    let computer = FakeComputer::new("node-a");
    let queue = FakeQueue::new();
    let executor = fake_executor(&computer, &queue, 0, ExecutorSettings::default());
    let (body, interrupts) = RecordingBody::new(false);
    let handle = AsynchronousExecution::new(body);
    let task = ScriptedTask::new("long-haul", Behaviour::AsyncAfterShutdown(handle.clone()));
    let ctx = RecordingContext::new();

    executor.start(work_unit(&task, &ctx)).unwrap();
    assert!(wait_until(TIMEOUT, || !interrupts.lock().is_empty()));

    assert_eq!(*interrupts.lock(), vec![true]);
    assert_eq!(
        executor.interrupt_causes(),
        vec![InterruptionCause::shutdown()]
    );

    handle.completed(Some(buildexec::errors::TaskError::Interrupted));
    assert!(wait_finished(&executor));
    assert_eq!(ctx.ends().len(), 1);
}
