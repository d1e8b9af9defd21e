mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cloudviz_core::model::{JobId, JobKind, JobStatus, StatusUpdate};
use cloudviz_core::{
    AwaitOptions, CoordinatorConfig, JobCoordinator, JobFailure, JobOutcome, JobRecord,
    PushSource, Session, TransportError, UpdateSource,
};

use support::{
    PushScript, ScriptedBackend, ScriptedPush, azure_store, completed, config, inventory,
    network_down, pending, running,
};

const JOB: &str = "job-42";

fn coordinator(
    backend: &Arc<ScriptedBackend>,
    push: Option<&Arc<ScriptedPush>>,
    session: Arc<Session>,
    config: CoordinatorConfig,
) -> JobCoordinator {
    JobCoordinator::new(
        JobRecord::new(JobId::from(JOB), JobKind::Extraction),
        backend.clone(),
        push.map(|p| p.clone() as Arc<dyn PushSource>),
        session,
        Arc::new(config),
    )
}

/// The paused clock lands on timer deadlines up to millisecond rounding.
fn assert_elapsed(started: tokio::time::Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "expected ~{expected:?}, waited {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn polling_follows_job_to_completion_with_monotonic_progress() {
    let backend = Arc::new(ScriptedBackend::new());
    backend
        .script_status(JOB, [pending(), running(40), running(90), completed()])
        .await;
    backend.script_result(JOB, [inventory(azure_store())]).await;

    let mut coordinator = coordinator(&backend, None, Session::shared(4), config(true, false));
    let mut snapshots = coordinator.watch();
    let observer = tokio::spawn(async move {
        let mut seen = Vec::new();
        while snapshots.changed().await.is_ok() {
            let record = snapshots.borrow_and_update().clone();
            seen.push((record.status(), record.progress()));
        }
        seen
    });

    let outcome = coordinator.await_result(AwaitOptions::new()).await;

    let JobOutcome::Completed { record, result } = &outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(record.status(), JobStatus::Completed);
    assert_eq!(record.progress(), 100);
    assert_eq!(record.terminal_source(), Some(UpdateSource::Poll));
    assert!(record.completed_at().is_some());
    assert_eq!(result.inventory().map(|s| s.resources.len()), Some(3));
    assert_eq!(backend.status_calls(), 4);
    assert_eq!(backend.result_calls(), 1);

    drop(coordinator);
    let seen = observer.await.expect("observer task");
    assert_eq!(seen.last(), Some(&(JobStatus::Completed, 100)));
    assert!(
        seen.windows(2).all(|pair| pair[0].1 <= pair[1].1),
        "progress went backwards: {seen:?}"
    );
    assert!(seen.contains(&(JobStatus::Running, 40)));
    assert!(seen.contains(&(JobStatus::Running, 90)));
}

#[tokio::test(start_paused = true)]
async fn poll_budget_exhaustion_fails_the_job_locally() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script_status(JOB, [network_down()]).await;

    let mut coordinator = coordinator(&backend, None, Session::shared(4), config(true, false));
    let outcome = coordinator.await_result(AwaitOptions::new()).await;

    match outcome.failure() {
        Some(JobFailure::TransportExhausted { attempts, last_error }) => {
            assert_eq!(*attempts, 5);
            assert!(last_error.contains("connection refused"));
        }
        other => panic!("expected transport exhaustion, got {other:?}"),
    }
    assert_eq!(outcome.record().status(), JobStatus::Failed);
    assert_eq!(outcome.record().terminal_source(), Some(UpdateSource::Local));
    assert_eq!(backend.status_calls(), 5);
    assert_eq!(backend.result_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn a_success_resets_the_failure_budget() {
    let backend = Arc::new(ScriptedBackend::new());
    backend
        .script_status(
            JOB,
            [
                network_down(),
                network_down(),
                network_down(),
                network_down(),
                running(50),
                network_down(),
                network_down(),
                network_down(),
                network_down(),
                completed(),
            ],
        )
        .await;
    backend.script_result(JOB, [inventory(azure_store())]).await;

    let mut coordinator = coordinator(&backend, None, Session::shared(4), config(true, false));
    let outcome = coordinator.await_result(AwaitOptions::new()).await;

    assert!(outcome.is_completed(), "got {outcome:?}");
    assert_eq!(backend.status_calls(), 10);
}

#[tokio::test(start_paused = true)]
async fn backend_failure_is_reported_with_its_message() {
    let backend = Arc::new(ScriptedBackend::new());
    backend
        .script_status(
            JOB,
            [running(10), Ok(StatusUpdate::failed("subscription not found"))],
        )
        .await;

    let mut coordinator = coordinator(&backend, None, Session::shared(4), config(true, false));
    let outcome = coordinator.await_result(AwaitOptions::new()).await;

    assert_eq!(
        outcome.failure(),
        Some(&JobFailure::BackendFailure {
            message: "subscription not found".into()
        })
    );
    assert_eq!(outcome.record().error(), Some("subscription not found"));
    assert_eq!(backend.result_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_job_is_rejected_without_retrying() {
    let backend = Arc::new(ScriptedBackend::new());

    let mut coordinator = coordinator(&backend, None, Session::shared(4), config(true, false));
    let outcome = coordinator.await_result(AwaitOptions::new()).await;

    assert!(matches!(
        outcome.failure(),
        Some(JobFailure::Rejected { status: 404, .. })
    ));
    assert_eq!(backend.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn deadline_stops_both_channels() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script_status(JOB, [running(10)]).await;
    let push = Arc::new(ScriptedPush::new());
    push.script(JOB, PushScript::hang_after(vec![(Duration::from_millis(100), running(15))]))
        .await;

    let mut coordinator =
        coordinator(&backend, Some(&push), Session::shared(4), config(true, true));
    let outcome = coordinator
        .await_result(AwaitOptions::new().with_deadline(Duration::from_secs(1)))
        .await;

    assert!(matches!(outcome, JobOutcome::TimedOut { .. }), "got {outcome:?}");
    assert_eq!(outcome.record().status(), JobStatus::Running);
    assert_eq!(outcome.record().progress(), 15);
    assert_eq!(push.active_streams(), 0);
    let polls = backend.status_calls();
    assert_eq!(polls, 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.status_calls(), polls);
    assert_eq!(push.subscribe_calls(), 1);
    assert!(coordinator.outcome().is_none());
}

#[tokio::test(start_paused = true)]
async fn configured_default_deadline_applies() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script_status(JOB, [running(10)]).await;
    let config = CoordinatorConfig {
        default_deadline_ms: Some(5_000),
        ..config(true, false)
    };

    let mut coordinator = coordinator(&backend, None, Session::shared(4), config);
    let started = tokio::time::Instant::now();
    let outcome = coordinator.await_result(AwaitOptions::new()).await;

    assert!(matches!(outcome, JobOutcome::TimedOut { .. }));
    assert_elapsed(started, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn timed_out_wait_can_be_resumed() {
    let backend = Arc::new(ScriptedBackend::new());
    backend
        .script_status(JOB, [running(20), running(60), completed()])
        .await;
    backend.script_result(JOB, [inventory(azure_store())]).await;

    let mut coordinator = coordinator(&backend, None, Session::shared(4), config(true, false));
    let first = coordinator
        .await_result(AwaitOptions::new().with_deadline(Duration::from_secs(1)))
        .await;
    assert!(matches!(first, JobOutcome::TimedOut { .. }));
    assert_eq!(first.record().progress(), 20);

    let second = coordinator.await_result(AwaitOptions::new()).await;
    assert!(second.is_completed());
    assert_eq!(coordinator.outcome(), Some(&second));

    let calls = backend.status_calls();
    let third = coordinator.await_result(AwaitOptions::new()).await;
    assert_eq!(third, second);
    assert_eq!(backend.status_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn caller_cancellation_stops_tracking() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script_status(JOB, [running(30)]).await;
    let push = Arc::new(ScriptedPush::new());
    push.script(JOB, PushScript::hang_after(Vec::new())).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        trigger.cancel();
    });

    let mut coordinator =
        coordinator(&backend, Some(&push), Session::shared(4), config(true, true));
    let started = tokio::time::Instant::now();
    let outcome = coordinator
        .await_result(AwaitOptions::new().with_cancel(cancel))
        .await;

    assert!(matches!(outcome, JobOutcome::Cancelled { .. }), "got {outcome:?}");
    assert_elapsed(started, Duration::from_secs(3));
    assert_eq!(push.active_streams(), 0);

    let polls = backend.status_calls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.status_calls(), polls);
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_token_returns_immediately() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script_status(JOB, [running(30)]).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut coordinator = coordinator(&backend, None, Session::shared(4), config(true, false));
    let outcome = coordinator
        .await_result(AwaitOptions::new().with_cancel(cancel))
        .await;

    assert!(matches!(outcome, JobOutcome::Cancelled { .. }));
    assert_eq!(outcome.record().status(), JobStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn push_and_poll_converge_on_one_terminal_status() {
    let backend = Arc::new(ScriptedBackend::new());
    backend
        .script_status(JOB, [running(10), running(50), completed()])
        .await;
    backend.script_result(JOB, [inventory(azure_store())]).await;
    let push = Arc::new(ScriptedPush::new());
    push.script(
        JOB,
        PushScript::hang_after(vec![
            (Duration::from_millis(500), running(30)),
            (Duration::from_millis(3_000), completed()),
        ]),
    )
    .await;

    let mut coordinator =
        coordinator(&backend, Some(&push), Session::shared(4), config(true, true));
    let started = tokio::time::Instant::now();
    let outcome = coordinator.await_result(AwaitOptions::new()).await;

    let JobOutcome::Completed { record, .. } = &outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    // Push reports COMPLETED at 3.5s, before the poll tick at 4s.
    assert_eq!(record.terminal_source(), Some(UpdateSource::Push));
    assert_elapsed(started, Duration::from_millis(3_500));
    assert_eq!(backend.result_calls(), 1);
    assert_eq!(backend.status_calls(), 2);
    assert_eq!(push.active_streams(), 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.status_calls(), 2);
    assert_eq!(backend.result_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn simultaneous_completion_is_accepted_once() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script_status(JOB, [running(10), completed()]).await;
    backend.script_result(JOB, [inventory(azure_store())]).await;
    let push = Arc::new(ScriptedPush::new());
    push.script(
        JOB,
        PushScript::hang_after(vec![(Duration::from_millis(2_000), completed())]),
    )
    .await;

    // The poll tick and the push event both report COMPLETED at 2s.
    let mut coordinator =
        coordinator(&backend, Some(&push), Session::shared(4), config(true, true));
    let mut snapshots = coordinator.watch();
    let observer = tokio::spawn(async move {
        let mut terminal = 0;
        while snapshots.changed().await.is_ok() {
            if snapshots.borrow_and_update().is_terminal() {
                terminal += 1;
            }
        }
        terminal
    });

    let started = tokio::time::Instant::now();
    let first = coordinator.await_result(AwaitOptions::new()).await;
    assert!(first.is_completed());
    assert!(first.record().terminal_source().is_some());
    assert_elapsed(started, Duration::from_millis(2_000));
    assert_eq!(backend.result_calls(), 1);
    assert_eq!(push.active_streams(), 0);
    let polls = backend.status_calls();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let second = coordinator.await_result(AwaitOptions::new()).await;
    assert_eq!(second, first);
    assert_eq!(backend.result_calls(), 1);
    assert_eq!(backend.status_calls(), polls);

    drop(coordinator);
    assert_eq!(observer.await.expect("observer"), 1);
}

#[tokio::test(start_paused = true)]
async fn late_terminal_from_the_other_channel_is_ignored() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script_status(JOB, [running(10), completed()]).await;
    backend.script_result(JOB, [inventory(azure_store())]).await;
    let push = Arc::new(ScriptedPush::new());
    push.script(
        JOB,
        PushScript::hang_after(vec![(
            Duration::from_millis(2_000),
            Ok(StatusUpdate::failed("stale failure")),
        )]),
    )
    .await;

    // The poll at 2s and the push event at 2s land together; whichever is
    // accepted first decides, and the record never flips afterwards.
    let mut coordinator =
        coordinator(&backend, Some(&push), Session::shared(4), config(true, true));
    let outcome = coordinator.await_result(AwaitOptions::new()).await;

    match (&outcome, outcome.record().terminal_source()) {
        (JobOutcome::Completed { .. }, Some(UpdateSource::Poll)) => {}
        (JobOutcome::Failed { failure, .. }, Some(UpdateSource::Push)) => {
            assert_eq!(
                failure,
                &JobFailure::BackendFailure {
                    message: "stale failure".into()
                }
            );
        }
        other => panic!("inconsistent terminal outcome: {other:?}"),
    }
    let again = coordinator.await_result(AwaitOptions::new()).await;
    assert_eq!(again, outcome);
}

#[tokio::test(start_paused = true)]
async fn lost_push_channel_falls_back_to_polling() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script_status(JOB, [running(70), completed()]).await;
    backend.script_result(JOB, [inventory(azure_store())]).await;
    let push = Arc::new(ScriptedPush::new());
    push.script(
        JOB,
        PushScript::Refuse(TransportError::transport("event stream unavailable")),
    )
    .await;

    let mut coordinator =
        coordinator(&backend, Some(&push), Session::shared(4), config(false, true));
    let outcome = coordinator.await_result(AwaitOptions::new()).await;

    assert!(outcome.is_completed(), "got {outcome:?}");
    assert_eq!(outcome.record().terminal_source(), Some(UpdateSource::Poll));
    assert_eq!(push.subscribe_calls(), 1);
    assert_eq!(backend.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn closed_push_stream_keeps_its_progress_and_demotes() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script_status(JOB, [running(20), completed()]).await;
    backend.script_result(JOB, [inventory(azure_store())]).await;
    let push = Arc::new(ScriptedPush::new());
    push.script(
        JOB,
        PushScript::close_after(vec![(Duration::from_millis(100), running(55))]),
    )
    .await;

    let mut coordinator =
        coordinator(&backend, Some(&push), Session::shared(4), config(false, true));
    let mut snapshots = coordinator.watch();
    let observer = tokio::spawn(async move {
        let mut progress = Vec::new();
        while snapshots.changed().await.is_ok() {
            progress.push(snapshots.borrow_and_update().progress());
        }
        progress
    });

    let outcome = coordinator.await_result(AwaitOptions::new()).await;
    assert!(outcome.is_completed(), "got {outcome:?}");
    assert_eq!(outcome.record().terminal_source(), Some(UpdateSource::Poll));
    assert_eq!(push.active_streams(), 0);

    drop(coordinator);
    let progress = observer.await.expect("observer task");
    // The poll reporting 20% after push reported 55% must not lower progress.
    assert_eq!(progress.first(), Some(&55));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.iter().all(|p| *p >= 55), "progress dipped: {progress:?}");
}

#[tokio::test(start_paused = true)]
async fn session_invalidation_fails_the_job() {
    let session = Session::shared(4);
    session.set_token(cloudviz_core::model::AuthToken::new("t-1", 3600));
    let backend = Arc::new(ScriptedBackend::with_session(Arc::clone(&session)));
    backend.script_status(JOB, [running(25)]).await;
    let push = Arc::new(ScriptedPush::new());
    push.script(JOB, PushScript::hang_after(Vec::new())).await;

    let invalidator = Arc::clone(&session);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        invalidator.invalidate();
    });

    let mut coordinator = coordinator(&backend, Some(&push), session, config(true, true));
    let outcome = coordinator.await_result(AwaitOptions::new()).await;

    assert_eq!(outcome.failure(), Some(&JobFailure::SessionInvalid));
    assert_eq!(outcome.record().status(), JobStatus::Failed);
    assert_eq!(push.active_streams(), 0);
    // Polls at 0s and 2s succeed; the one at 4s finds no session.
    assert_eq!(backend.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn result_fetch_retries_transport_errors() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script_status(JOB, [completed()]).await;
    backend
        .script_result(
            JOB,
            [
                Err(TransportError::transport("reset by peer")),
                Err(TransportError::transport("reset by peer")),
                inventory(azure_store()),
            ],
        )
        .await;

    let mut coordinator = coordinator(&backend, None, Session::shared(4), config(true, false));
    let outcome = coordinator.await_result(AwaitOptions::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(backend.result_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn missing_result_after_completion_is_not_cached() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script_status(JOB, [completed()]).await;
    backend
        .script_result(
            JOB,
            [
                Err(TransportError::client(404, "result expired")),
                inventory(azure_store()),
            ],
        )
        .await;

    let mut coordinator = coordinator(&backend, None, Session::shared(4), config(true, false));
    let first = coordinator.await_result(AwaitOptions::new()).await;
    assert!(matches!(
        first.failure(),
        Some(JobFailure::Rejected { status: 404, .. })
    ));
    assert!(coordinator.outcome().is_none());

    // The record is already terminal, so the retry goes straight to the result.
    let second = coordinator.await_result(AwaitOptions::new()).await;
    assert!(second.is_completed());
    assert_eq!(backend.status_calls(), 1);
}
