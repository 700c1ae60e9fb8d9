use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio::time::{timeout, Duration};

use crate::agent_loop::types::RunOutcome;
use crate::confirmation::ConfirmationDecision;
use crate::error::ErrorCode;
use crate::planner::{ActionMode, PlanResponse};
use crate::skills::{Skill, SkillSource};
use crate::tools::FnAction;
use crate::types::{
    ActionCall, IterationPhase, ObservationContent, Step, StepSource, UsageTotals,
    INTERRUPTED_SENTINEL,
};

use super::super::events::StreamMessage;


use support::*;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn planner_usage() -> UsageTotals {
    UsageTotals {
        prompt_tokens: 100,
        completion_tokens: 20,
        cached_tokens: 0,
        cost_usd: 0.01,
    }
}

#[tokio::test]
async fn final_message_on_first_turn_completes() {
    let planner = ScriptedPlanner::new(|_, _| Ok(PlanResponse::final_message("hello there")));
    let scheduler = test_scheduler(planner.clone(), ActionRegistry::new(), 5);
    let (sink, events) = capture_events();

    let report = scheduler
        .run(RunRequest::new("conv", user_trajectory("hi")).with_event_sink(sink))
        .await;

    match report.outcome {
        RunOutcome::Completed {
            final_message,
            limit_reached,
        } => {
            assert_eq!(final_message.as_deref(), Some("hello there"));
            assert!(!limit_reached);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(report.turns, 1);
    assert_eq!(kinds(&events), vec!["final"]);
    assert_eq!(
        sources(&report.trajectory),
        vec![StepSource::User, StepSource::Agent]
    );
}

#[tokio::test]
async fn actions_run_and_results_feed_the_next_turn() {
    let executions = Arc::new(AtomicUsize::new(0));
    let planner = ScriptedPlanner::new(|turn, _| match turn {
        1 => Ok(PlanResponse::actions(vec![read_call("c1", "/tmp/a.txt")])),
        _ => Ok(PlanResponse::final_message("read it")),
    });
    let scheduler = test_scheduler(
        planner.clone(),
        registry(vec![read_action(Duration::ZERO, executions.clone())]),
        5,
    );
    let (sink, events) = capture_events();

    let report = timeout(
        TEST_TIMEOUT,
        scheduler.run(RunRequest::new("conv", user_trajectory("read a")).with_event_sink(sink)),
    )
    .await
    .expect("run timed out");

    assert!(matches!(report.outcome, RunOutcome::Completed { .. }));
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(
        kinds(&events),
        vec!["planned", "dispatching", "resolved", "final"]
    );
    assert_eq!(
        sources(&report.trajectory),
        vec![
            StepSource::User,
            StepSource::Agent,
            StepSource::System,
            StepSource::Agent
        ]
    );
    let observed = &report.trajectory.steps()[2].observations;
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].source_call_id, "c1");
    assert_eq!(observed[0].content.as_text(), "contents of /tmp/a.txt");

    // The second turn saw the observation.
    let seen = planner.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].steps.len(), 3);
}

#[tokio::test]
async fn event_sequence_numbers_increase() {
    let executions = Arc::new(AtomicUsize::new(0));
    let planner = ScriptedPlanner::new(|turn, _| match turn {
        1 => Ok(PlanResponse::actions(vec![read_call("c1", "/tmp/a")])),
        _ => Ok(PlanResponse::final_message("done")),
    });
    let scheduler = test_scheduler(
        planner,
        registry(vec![read_action(Duration::ZERO, executions)]),
        5,
    );
    let (sink, events) = capture_events();
    let request = RunRequest::new("conv", user_trajectory("go")).with_event_sink(sink);
    let run_id = request.run_id;

    scheduler.run(request).await;

    let events = events.lock().expect("event lock");
    let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
    assert!(events.iter().all(|event| event.run_id == Some(run_id)));
    assert!(events.iter().all(|event| event.conversation_id == "conv"));
}

#[tokio::test]
async fn iteration_limit_ends_with_warning_instead_of_error() {
    let executions = Arc::new(AtomicUsize::new(0));
    // Always asks for a new file, so the run never converges.
    let planner = ScriptedPlanner::new(|turn, _| {
        Ok(PlanResponse::actions(vec![read_call(
            &format!("c{turn}"),
            &format!("/tmp/{turn}.txt"),
        )]))
    });
    let scheduler = test_scheduler(
        planner.clone(),
        registry(vec![read_action(Duration::ZERO, executions.clone())]),
        5,
    );
    let (sink, events) = capture_events();

    let report = timeout(
        TEST_TIMEOUT,
        scheduler.run(RunRequest::new("conv", user_trajectory("loop")).with_event_sink(sink)),
    )
    .await
    .expect("run timed out");

    match report.outcome {
        RunOutcome::Completed {
            final_message,
            limit_reached,
        } => {
            assert!(final_message.is_none());
            assert!(limit_reached);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(report.turns, 5);
    // The fifth turn's calls are never run.
    assert_eq!(executions.load(Ordering::SeqCst), 4);

    let seen = planner.seen();
    assert_eq!(seen.len(), 5);
    assert!(seen[..4].iter().all(|request| request.mode == ActionMode::Auto));
    assert_eq!(seen[4].mode, ActionMode::None);

    let records = records(&events);
    let last = records.last().expect("final record");
    assert_eq!(last.phase, IterationPhase::Final);
    assert_eq!(last.turn, 5);
    let warning = last.warning.as_deref().unwrap_or_default();
    assert!(warning.contains("iteration limit (5)"), "{warning}");
}

#[tokio::test]
async fn run_level_limit_overrides_config() {
    let planner = ScriptedPlanner::new(|turn, _| {
        Ok(PlanResponse::actions(vec![read_call(
            &format!("c{turn}"),
            &format!("/tmp/{turn}"),
        )]))
    });
    let scheduler = test_scheduler(
        planner.clone(),
        registry(vec![read_action(Duration::ZERO, Arc::new(AtomicUsize::new(0)))]),
        25,
    );

    let report = scheduler
        .run(RunRequest::new("conv", user_trajectory("go")).with_max_iterations(2))
        .await;

    assert_eq!(report.turns, 2);
    assert_eq!(planner.seen().len(), 2);
}

#[tokio::test]
async fn limit_warning_stays_at_its_first_position() {
    let planner = ScriptedPlanner::new(|turn, _| {
        if turn < 10 {
            Ok(PlanResponse::actions(vec![read_call(
                &format!("c{turn}"),
                &format!("/tmp/{turn}"),
            )]))
        } else {
            Ok(PlanResponse::final_message("done"))
        }
    });
    let scheduler = test_scheduler(
        planner.clone(),
        registry(vec![read_action(Duration::ZERO, Arc::new(AtomicUsize::new(0)))]),
        10,
    );

    let report = timeout(
        TEST_TIMEOUT,
        scheduler.run(RunRequest::new("conv", user_trajectory("go"))),
    )
    .await
    .expect("run timed out");
    assert!(matches!(
        report.outcome,
        RunOutcome::Completed {
            limit_reached: false,
            ..
        }
    ));

    let seen = planner.seen();
    assert!(seen[..8].iter().all(|request| request.warning_index().is_none()));
    // user + 8 turns of (agent, observations)
    assert_eq!(seen[8].warning_index(), Some(17));
    assert_eq!(seen[9].warning_index(), Some(17));
    assert!(seen[9].steps.len() > seen[8].steps.len());
    let last_turn_warning = seen[9].steps[17].message.as_deref().unwrap_or_default();
    assert!(last_turn_warning.contains("last turn"), "{last_turn_warning}");

    // Never persisted.
    assert!(report.trajectory.steps().iter().all(|step| !step.ephemeral));
}

#[tokio::test]
async fn repeated_action_is_skipped_with_a_durable_warning() {
    let executions = Arc::new(AtomicUsize::new(0));
    let planner = ScriptedPlanner::new(|turn, _| match turn {
        1 | 2 => Ok(PlanResponse::actions(vec![ActionCall::new(
            format!("c{turn}"),
            "read",
            json!({ "file": "/tmp/a" }),
        )])),
        _ => Ok(PlanResponse::final_message("done")),
    });
    let scheduler = test_scheduler(
        planner.clone(),
        registry(vec![read_action(Duration::ZERO, executions.clone())]),
        5,
    );
    let (sink, events) = capture_events();

    let report = scheduler
        .run(RunRequest::new("conv", user_trajectory("go")).with_event_sink(sink))
        .await;

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(report.turns, 3);
    let records = records(&events);
    let warned: Vec<_> = records.iter().filter(|record| record.is_warning()).collect();
    assert_eq!(warned.len(), 1);
    assert_eq!(warned[0].turn, 2);
    assert!(warned[0]
        .warning
        .as_deref()
        .unwrap_or_default()
        .starts_with("Repeated action: read"));

    let system_steps: Vec<&Step> = report
        .trajectory
        .steps()
        .iter()
        .filter(|step| step.source == StepSource::System && step.message.is_some())
        .collect();
    assert_eq!(system_steps.len(), 1);
    // The planner saw the warning on turn 3.
    assert!(planner.seen()[2]
        .steps
        .iter()
        .any(|step| step.source == StepSource::System && step.message.is_some()));
}

#[tokio::test]
async fn repeated_warning_names_each_action_once() {
    let planner = ScriptedPlanner::new(|turn, _| match turn {
        1 | 2 => Ok(PlanResponse::actions(vec![
            read_call(&format!("r{turn}a"), "/tmp/a"),
            ActionCall::new(format!("s{turn}"), "summarize", json!({ "text": "t" })),
            read_call(&format!("r{turn}b"), "/tmp/b"),
        ])),
        _ => Ok(PlanResponse::final_message("done")),
    });
    let scheduler = test_scheduler(
        planner,
        registry(vec![
            read_action(Duration::ZERO, Arc::new(AtomicUsize::new(0))),
            summarize_action(),
        ]),
        5,
    );
    let (sink, events) = capture_events();

    scheduler
        .run(RunRequest::new("conv", user_trajectory("go")).with_event_sink(sink))
        .await;

    let warning = records(&events)
        .into_iter()
        .find_map(|record| record.warning)
        .expect("repeat warning");
    assert!(
        warning.starts_with("Repeated action: read, summarize was already called"),
        "{warning}"
    );
}

#[tokio::test]
async fn repeated_call_with_message_becomes_the_final_answer() {
    let executions = Arc::new(AtomicUsize::new(0));
    let planner = ScriptedPlanner::new(|turn, _| {
        let call = read_call(&format!("c{turn}"), "/tmp/a");
        match turn {
            1 => Ok(PlanResponse::actions(vec![call])),
            _ => Ok(PlanResponse {
                action_calls: vec![call],
                message: Some("Here is the file".to_string()),
                ..PlanResponse::default()
            }),
        }
    });
    let scheduler = test_scheduler(
        planner,
        registry(vec![read_action(Duration::ZERO, executions.clone())]),
        5,
    );

    let report = scheduler
        .run(RunRequest::new("conv", user_trajectory("go")))
        .await;

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    match report.outcome {
        RunOutcome::Completed { final_message, .. } => {
            assert_eq!(final_message.as_deref(), Some("Here is the file"))
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn mixed_batch_runs_only_the_fresh_calls() {
    let executions = Arc::new(AtomicUsize::new(0));
    let planner = ScriptedPlanner::new(|turn, _| match turn {
        1 => Ok(PlanResponse::actions(vec![read_call("c1", "/tmp/a")])),
        2 => Ok(PlanResponse::actions(vec![
            read_call("c2", "/tmp/a"),
            read_call("c3", "/tmp/b"),
        ])),
        _ => Ok(PlanResponse::final_message("done")),
    });
    let scheduler = test_scheduler(
        planner,
        registry(vec![read_action(Duration::ZERO, executions.clone())]),
        5,
    );
    let (sink, events) = capture_events();

    scheduler
        .run(RunRequest::new("conv", user_trajectory("go")).with_event_sink(sink))
        .await;

    assert_eq!(executions.load(Ordering::SeqCst), 2);
    let dispatched: Vec<String> = records(&events)
        .into_iter()
        .filter(|record| record.phase == IterationPhase::Dispatching && record.turn == 2)
        .flat_map(|record| record.action_calls)
        .map(|call| call.id)
        .collect();
    assert_eq!(dispatched, vec!["c3".to_string()]);
}

#[tokio::test]
async fn new_user_message_resets_repeat_detection() {
    let executions = Arc::new(AtomicUsize::new(0));
    let history = Trajectory::from_steps(vec![
        Step::user("read a"),
        Step::agent(None, vec![read_call("old", "/tmp/a")]),
        Step::observations(vec![crate::types::ObservationResult::ok(
            "old",
            ObservationContent::from("stale"),
        )]),
        Step::agent(Some("done".to_string()), Vec::new()),
        Step::user("read it again"),
    ])
    .expect("history");
    let planner = ScriptedPlanner::new(|turn, _| match turn {
        1 => Ok(PlanResponse::actions(vec![read_call("new", "/tmp/a")])),
        _ => Ok(PlanResponse::final_message("fresh")),
    });
    let scheduler = test_scheduler(
        planner,
        registry(vec![read_action(Duration::ZERO, executions.clone())]),
        5,
    );

    let report = scheduler.run(RunRequest::new("conv", history)).await;

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert!(matches!(report.outcome, RunOutcome::Completed { .. }));
}

#[tokio::test]
async fn billing_failure_ends_the_run() {
    let planner = ScriptedPlanner::new(|_, _| {
        Err(crate::error::ForemanError::planner(
            "out of credits",
            Some(ErrorCode::InsufficientQuota),
        ))
    });
    let scheduler = test_scheduler(planner.clone(), ActionRegistry::new(), 5);

    let report = scheduler
        .run(RunRequest::new("conv", user_trajectory("go")))
        .await;

    match report.outcome {
        RunOutcome::Failed(err) => assert!(err.is_billing()),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(planner.seen().len(), 1);
}

#[tokio::test]
async fn planner_error_is_reported_and_the_loop_continues() {
    let planner = ScriptedPlanner::new(|turn, _| match turn {
        1 => Err(crate::error::ForemanError::planner(
            "backend hiccup",
            Some(ErrorCode::ServerError),
        )),
        _ => Ok(PlanResponse::final_message("recovered")),
    });
    let scheduler = test_scheduler(planner, ActionRegistry::new(), 5);
    let (sink, events) = capture_events();

    let report = scheduler
        .run(RunRequest::new("conv", user_trajectory("go")).with_event_sink(sink))
        .await;

    assert_eq!(report.turns, 2);
    assert!(matches!(report.outcome, RunOutcome::Completed { .. }));
    let records = records(&events);
    assert_eq!(records[0].phase, IterationPhase::Planned);
    let warning = records[0].warning.as_deref().unwrap_or_default();
    assert!(warning.contains("no actions and no message"), "{warning}");
    assert!(warning.contains("backend hiccup"), "{warning}");
}

#[tokio::test]
async fn empty_plan_uses_up_a_turn() {
    let planner = ScriptedPlanner::new(|turn, _| match turn {
        1 => Ok(PlanResponse {
            message: Some("   ".to_string()),
            ..PlanResponse::default()
        }),
        _ => Ok(PlanResponse::final_message("ok")),
    });
    let scheduler = test_scheduler(planner, ActionRegistry::new(), 5);
    let (sink, events) = capture_events();

    let report = scheduler
        .run(RunRequest::new("conv", user_trajectory("go")).with_event_sink(sink))
        .await;

    assert_eq!(report.turns, 2);
    assert_eq!(kinds(&events), vec!["planned", "final"]);
    assert!(records(&events)[0].is_warning());
}

#[tokio::test]
async fn pause_before_planning_never_calls_the_planner() {
    let planner = ScriptedPlanner::new(|_, _| Ok(PlanResponse::final_message("unused")));
    let scheduler = test_scheduler(planner.clone(), ActionRegistry::new(), 5);
    let token = CancellationToken::new();
    token.cancel();
    let (sink, events) = capture_events();

    let report = scheduler
        .run(
            RunRequest::new("conv", user_trajectory("go"))
                .with_cancellation(token)
                .with_event_sink(sink),
        )
        .await;

    assert!(report.outcome.is_paused());
    assert!(planner.seen().is_empty());
    assert_eq!(kinds(&events), vec!["paused"]);
    assert_eq!(report.trajectory.len(), 1);
}

#[tokio::test]
async fn cancel_after_dispatching_event_marks_every_call_interrupted() {
    let executions = Arc::new(AtomicUsize::new(0));
    let planner = ScriptedPlanner::new(|_, _| {
        Ok(PlanResponse::actions(vec![
            read_call("c1", "/tmp/a"),
            read_call("c2", "/tmp/b"),
        ]))
    });
    let scheduler = test_scheduler(
        planner,
        registry(vec![read_action(Duration::from_secs(30), executions.clone())]),
        5,
    );
    let token = CancellationToken::new();
    let (capture, events) = capture_events();
    let cancel_on_dispatch = token.clone();
    let sink: RunEventSink = Arc::new(move |event: RunEvent| {
        if event.message.kind() == "dispatching" {
            cancel_on_dispatch.cancel();
        }
        capture(event);
    });

    let report = timeout(
        TEST_TIMEOUT,
        scheduler.run(
            RunRequest::new("conv", user_trajectory("go"))
                .with_cancellation(token)
                .with_event_sink(sink),
        ),
    )
    .await
    .expect("run timed out");

    assert!(report.outcome.is_paused());
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert_eq!(
        kinds(&events),
        vec!["planned", "dispatching", "resolved", "paused"]
    );
    let resolved = &records(&events)[2];
    let results = resolved.action_results.as_ref().expect("results");
    assert_eq!(results.len(), 2);
    assert!(results
        .iter()
        .all(|result| result.content.as_text() == INTERRUPTED_SENTINEL));

    // Every call still has exactly one observation.
    let last = report.trajectory.steps().last().expect("observation step");
    assert_eq!(last.observations.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_dispatch_keeps_settled_results() {
    let slow = FnAction::new(
        "slow",
        "Takes a while",
        crate::tools::ActionParameters::empty(),
        |_args, _ctx| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ObservationContent::from("late"))
        },
    );
    let planner = ScriptedPlanner::new(|_, _| {
        Ok(PlanResponse::actions(vec![
            read_call("fast", "/tmp/a"),
            ActionCall::new("slow", "slow", json!({})),
        ]))
    });
    let scheduler = test_scheduler(
        planner,
        registry(vec![
            read_action(Duration::from_millis(5), Arc::new(AtomicUsize::new(0))),
            slow,
        ]),
        5,
    );
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    let (sink, events) = capture_events();

    let report = scheduler
        .run(
            RunRequest::new("conv", user_trajectory("go"))
                .with_cancellation(token)
                .with_event_sink(sink),
        )
        .await;

    assert!(report.outcome.is_paused());
    let records = records(&events);
    let resolved = records
        .iter()
        .find(|record| record.phase == IterationPhase::Resolved)
        .expect("resolved record");
    let results = resolved.action_results.as_ref().expect("results");
    assert_eq!(results[0].source_call_id, "fast");
    assert_eq!(results[0].content.as_text(), "contents of /tmp/a");
    assert_eq!(results[1].source_call_id, "slow");
    assert!(results[1].is_interrupted());
    assert_eq!(
        records.last().map(|record| record.phase),
        Some(IterationPhase::Paused)
    );
}

#[tokio::test]
async fn paused_run_resumes_from_its_trajectory() {
    let executions = Arc::new(AtomicUsize::new(0));
    let planner = ScriptedPlanner::new(|_, request| {
        let answered = request
            .trajectory
            .iter()
            .any(|step| !step.observations.is_empty());
        if answered {
            Ok(PlanResponse::final_message("resumed"))
        } else {
            Ok(PlanResponse::actions(vec![read_call("c1", "/tmp/a")]))
        }
    });
    let scheduler = test_scheduler(
        planner,
        registry(vec![read_action(Duration::ZERO, executions.clone())]),
        5,
    );
    let token = CancellationToken::new();
    let cancel_on_resolve = token.clone();
    let sink: RunEventSink = Arc::new(move |event: RunEvent| {
        if event.message.kind() == "resolved" {
            cancel_on_resolve.cancel();
        }
    });

    let paused = scheduler
        .run(
            RunRequest::new("conv", user_trajectory("go"))
                .with_cancellation(token)
                .with_event_sink(sink),
        )
        .await;
    assert!(paused.outcome.is_paused());
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let resumed = scheduler
        .run(RunRequest::new("conv", paused.trajectory))
        .await;
    match resumed.outcome {
        RunOutcome::Completed { final_message, .. } => {
            assert_eq!(final_message.as_deref(), Some("resumed"))
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interrupted_call_runs_again_after_resume() {
    let executions = Arc::new(AtomicUsize::new(0));
    let planner = ScriptedPlanner::new(|turn, request| {
        let answered = request
            .trajectory
            .iter()
            .flat_map(|step| step.observations.iter())
            .any(|result| !result.is_interrupted());
        if answered {
            Ok(PlanResponse::final_message("done"))
        } else {
            Ok(PlanResponse::actions(vec![read_call(&format!("c{turn}"), "/tmp/a")]))
        }
    });
    let scheduler = test_scheduler(
        planner,
        registry(vec![read_action(Duration::ZERO, executions.clone())]),
        3,
    );
    let token = CancellationToken::new();
    let cancel_on_dispatch = token.clone();
    let sink: RunEventSink = Arc::new(move |event: RunEvent| {
        if event.message.kind() == "dispatching" {
            cancel_on_dispatch.cancel();
        }
    });

    let paused = scheduler
        .run(
            RunRequest::new("conv", user_trajectory("go"))
                .with_cancellation(token)
                .with_event_sink(sink),
        )
        .await;
    assert!(paused.outcome.is_paused());
    assert_eq!(executions.load(Ordering::SeqCst), 0);

    let (sink, events) = capture_events();
    let resumed = timeout(
        TEST_TIMEOUT,
        scheduler.run(RunRequest::new("conv", paused.trajectory).with_event_sink(sink)),
    )
    .await
    .expect("run timed out");

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert!(records(&events).iter().all(|record| !record.is_warning()));
    match resumed.outcome {
        RunOutcome::Completed {
            final_message,
            limit_reached,
        } => {
            assert_eq!(final_message.as_deref(), Some("done"));
            assert!(!limit_reached);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn usage_from_planner_and_actions_is_merged() {
    let planner = ScriptedPlanner::new(|turn, _| match turn {
        1 => {
            let call = ActionCall::new("s1", "summarize", json!({ "text": "long" }));
            Ok(PlanResponse::actions(vec![call]).with_usage(planner_usage()))
        }
        _ => Ok(PlanResponse::final_message("short").with_usage(planner_usage())),
    });
    let scheduler = test_scheduler(planner, registry(vec![summarize_action()]), 5);
    let (sink, events) = capture_events();

    let report = scheduler
        .run(RunRequest::new("conv", user_trajectory("go")).with_event_sink(sink))
        .await;

    assert_eq!(report.usage.prompt_tokens, 240);
    assert_eq!(report.usage.completion_tokens, 50);
    assert!((report.usage.cost_usd - 0.022).abs() < 1e-9);

    let resolved = records(&events)
        .into_iter()
        .find(|record| record.phase == IterationPhase::Resolved)
        .expect("resolved record");
    let turn_usage = resolved.usage.expect("turn usage");
    assert_eq!(turn_usage.prompt_tokens, 140);
    assert_eq!(turn_usage.completion_tokens, 30);
}

#[tokio::test]
async fn risky_action_waits_for_confirmation_inside_the_run_stream() {
    let executions = Arc::new(AtomicUsize::new(0));
    let counter = executions.clone();
    let delete = FnAction::new(
        "delete",
        "Delete a file",
        crate::tools::ActionParameters::object()
            .path("file", "File to delete", true)
            .build(),
        move |_args, _ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ObservationContent::from("deleted"))
            }
        },
    )
    .risky("file_write");
    let planner = ScriptedPlanner::new(|turn, _| match turn {
        1 => Ok(PlanResponse::actions(vec![ActionCall::new(
            "d1",
            "delete",
            json!({ "file": "/etc/hosts" }),
        )])),
        _ => Ok(PlanResponse::final_message("gone")),
    });
    let scheduler = test_scheduler(planner, registry(vec![delete]), 5);
    let gate = ConfirmationGate::new();
    let responder = gate.clone();
    let (capture, events) = capture_events();
    let sink: RunEventSink = Arc::new(move |event: RunEvent| {
        let request = match &event.message {
            StreamMessage::ConfirmationRequest { request } => Some(request.clone()),
            _ => None,
        };
        capture(event);
        if let Some(request) = request {
            responder
                .respond(
                    "conv",
                    request.request_id.as_str(),
                    ConfirmationDecision::select("allow"),
                )
                .expect("respond");
        }
    });

    let report = timeout(
        TEST_TIMEOUT,
        scheduler.run(
            RunRequest::new("conv", user_trajectory("delete hosts"))
                .with_confirmations(gate.clone())
                .with_event_sink(sink),
        ),
    )
    .await
    .expect("run timed out");

    assert!(matches!(report.outcome, RunOutcome::Completed { .. }));
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(
        kinds(&events),
        vec![
            "planned",
            "dispatching",
            "confirmation_request",
            "confirmation_response",
            "resolved",
            "final"
        ]
    );
    let events = events.lock().expect("event lock");
    let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
    match &events[2].message {
        StreamMessage::ConfirmationRequest { request } => {
            assert_eq!(request.slot.as_deref(), Some("delete:file_write"))
        }
        other => panic!("unexpected message: {other:?}"),
    }
    assert!(gate.pending("conv").is_empty());
}

struct FixedSkills;

#[async_trait]
impl SkillSource for FixedSkills {
    async fn load_all(&self) -> crate::error::Result<Vec<Skill>> {
        Ok(vec![Skill {
            name: "git".to_string(),
            description: "Working with git".to_string(),
            content: "Use small commits.".to_string(),
        }])
    }
}

#[tokio::test]
async fn skills_are_offered_to_the_planner() {
    let planner = ScriptedPlanner::new(|_, _| Ok(PlanResponse::final_message("ok")));
    let scheduler = test_scheduler(planner.clone(), ActionRegistry::new(), 5).with_skills(
        crate::skills::SkillCache::new(Arc::new(FixedSkills), Duration::from_secs(60)),
    );

    scheduler
        .run(RunRequest::new("conv", user_trajectory("go")))
        .await;

    assert_eq!(planner.seen()[0].skills, vec!["git".to_string()]);
}

#[tokio::test]
async fn handle_streams_events_and_reports() {
    let planner = ScriptedPlanner::new(|_, _| Ok(PlanResponse::final_message("streamed")));
    let scheduler = test_scheduler(planner, ActionRegistry::new(), 5);
    let (sink, captured) = capture_events();

    let mut handle =
        scheduler.start(RunRequest::new("conv", user_trajectory("go")).with_event_sink(sink));
    let stream = handle.events().expect("event stream");
    assert!(handle.events().is_none());

    let report = timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("run timed out")
        .expect("report");
    let streamed: Vec<RunEvent> = timeout(TEST_TIMEOUT, stream.collect())
        .await
        .expect("stream did not end");

    assert_eq!(report.outcome.status().to_string(), "completed");
    assert_eq!(streamed.len(), 1);
    assert_eq!(streamed[0].message.kind(), "final");
    // The caller's own sink still receives everything.
    assert_eq!(kinds(&captured), vec!["final"]);
}

#[tokio::test]
async fn handle_pause_stops_a_running_action() {
    let executions = Arc::new(AtomicUsize::new(0));
    let planner = ScriptedPlanner::new(|_, _| {
        Ok(PlanResponse::actions(vec![read_call("c1", "/tmp/a")]))
    });
    let scheduler = test_scheduler(
        planner,
        registry(vec![read_action(Duration::from_secs(30), executions.clone())]),
        5,
    );

    let mut handle = scheduler.start(RunRequest::new("conv", user_trajectory("go")));
    let mut stream = handle.events().expect("event stream");
    let dispatching = timeout(TEST_TIMEOUT, async {
        while let Some(event) = stream.next().await {
            if event.message.kind() == "dispatching" {
                return true;
            }
        }
        false
    })
    .await
    .expect("no dispatching event");
    assert!(dispatching);

    handle.pause();
    let report = timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("run timed out")
        .expect("report");

    assert!(report.outcome.is_paused());
    let last = report.trajectory.steps().last().expect("observations");
    assert!(last.observations[0].is_interrupted());
}
