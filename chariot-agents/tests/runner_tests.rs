use chariot::builders::*;
use chariot::runtime::Arity;
use chariot::{Node, Plan, Runtime, RuntimeError, Value};
use chariot_agents::{EventKind, EventSink, EventStatus, PlanRunner, RunMode};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

type Log = Arc<Mutex<Vec<Value>>>;

/// Runtime with a `record(value)` builtin whose calls land in the log.
fn recording_runtime() -> (Runtime, Log) {
    let runtime = Runtime::new();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    runtime
        .register_builtin("record", Arity::Fixed(1), move |args| {
            sink.lock().unwrap().push(args[0].clone());
            Ok(Value::Null)
        })
        .unwrap();
    (runtime, log)
}

/// Builds `plan("T", array("x"), trigger, guard, array(steps...), drop)` in
/// `runtime` and returns it. Predicates and steps are function nodes.
fn build_plan(runtime: &Runtime, trigger: Node, guard: Node, steps: Vec<Node>, drop: Node) -> Plan {
    let program = BlockBuilder::new("runner.ch")
        .stmt(call(
            "setq",
            vec![
                var("p"),
                call(
                    "plan",
                    vec![
                        text("T"),
                        call("array", vec![text("x")]),
                        trigger,
                        guard,
                        call("array", steps),
                        drop,
                    ],
                ),
            ],
        ))
        .build()
        .unwrap();
    runtime.execute(&program).unwrap();
    match runtime.get_variable("p").unwrap() {
        Some(Value::Plan(plan)) => plan,
        other => panic!("expected plan, got {:?}", other),
    }
}

fn yes() -> Node {
    thunk(boolean(true))
}

fn no() -> Node {
    thunk(boolean(false))
}

fn no_vars() -> HashMap<String, Value> {
    HashMap::new()
}

#[test]
fn eligible_plan_runs_its_steps() {
    let (runtime, log) = recording_runtime();
    let plan = build_plan(
        &runtime,
        yes(),
        yes(),
        vec![
            thunk(call("record", vec![num(1.0)])),
            thunk(call("record", vec![num(2.0)])),
        ],
        no(),
    );
    let ran = PlanRunner::new(&runtime)
        .run_plan_once_bdi(&plan, &no_vars())
        .unwrap();
    assert!(ran);
    assert_eq!(
        *log.lock().unwrap(),
        vec![Value::Number(1.0), Value::Number(2.0)]
    );
}

#[test]
fn false_guard_is_a_no_op_in_bdi_and_dry_run() {
    let (runtime, log) = recording_runtime();
    let plan = build_plan(
        &runtime,
        yes(),
        no(),
        vec![thunk(call("record", vec![num(1.0)]))],
        no(),
    );
    let runner = PlanRunner::new(&runtime);
    assert!(!runner.run_plan_once_bdi(&plan, &no_vars()).unwrap());
    assert!(!runner
        .run_plan_once_ex(&plan, RunMode::DryRun, &no_vars())
        .unwrap());
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn run_plan_once_reports_true_even_when_gated_out() {
    let (runtime, log) = recording_runtime();
    let plan = build_plan(
        &runtime,
        no(),
        yes(),
        vec![thunk(call("record", vec![num(1.0)]))],
        no(),
    );
    assert!(PlanRunner::new(&runtime).run_plan_once(&plan).unwrap());
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn runs_never_touch_the_callers_globals() {
    let (runtime, _log) = recording_runtime();
    runtime.set_variable("count", Value::Number(0.0)).unwrap();
    let plan = build_plan(
        &runtime,
        yes(),
        yes(),
        vec![thunk(call(
            "setq",
            vec![var("count"), call("add", vec![var("count"), num(1.0)])],
        ))],
        no(),
    );

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let runtime = runtime.clone();
            let plan = plan.clone();
            thread::spawn(move || {
                PlanRunner::new(&runtime)
                    .run_plan_once_bdi(&plan, &HashMap::new())
                    .unwrap()
            })
        })
        .collect();
    for worker in workers {
        assert!(worker.join().unwrap());
    }
    assert_eq!(
        runtime.get_variable("count").unwrap(),
        Some(Value::Number(0.0))
    );
}

#[test]
fn helpers_closing_over_a_local_frame_update_the_run_copy() {
    let (runtime, log) = recording_runtime();
    // mk() returns a closure over mk's frame; `inc` is that closure
    let bump = thunk(call(
        "setq",
        vec![var("count"), call("add", vec![var("count"), num(1.0)])],
    ));
    let program = BlockBuilder::new("runner.ch")
        .stmt(call("setq", vec![var("count"), num(0.0)]))
        .stmt(call(
            "setq",
            vec![
                var("mk"),
                func(&[], BlockBuilder::new("runner.ch").stmt(bump).build().unwrap()),
            ],
        ))
        .stmt(call("setq", vec![var("inc"), call("mk", vec![])]))
        .build()
        .unwrap();
    runtime.execute(&program).unwrap();
    let plan = build_plan(
        &runtime,
        yes(),
        yes(),
        vec![
            thunk(call("inc", vec![])),
            thunk(call("record", vec![var("count")])),
        ],
        no(),
    );

    assert!(PlanRunner::new(&runtime)
        .run_plan_once_bdi(&plan, &no_vars())
        .unwrap());
    assert_eq!(*log.lock().unwrap(), vec![Value::Number(1.0)]);
    assert_eq!(
        runtime.get_variable("count").unwrap(),
        Some(Value::Number(0.0))
    );
}

#[test]
fn steps_share_the_instance_scope_and_see_overlay_vars() {
    let (runtime, log) = recording_runtime();
    let plan = build_plan(
        &runtime,
        thunk(call("equal", vec![var("mode"), text("go")])),
        yes(),
        vec![
            thunk(call("setq", vec![var("partial"), call("add", vec![var("x"), num(1.0)])])),
            thunk(call("record", vec![var("partial")])),
        ],
        no(),
    );
    let runner = PlanRunner::new(&runtime);

    // without the overlay the trigger fails to resolve `mode` and counts as false
    assert!(!runner.run_plan_once_bdi(&plan, &no_vars()).unwrap());

    let vars = HashMap::from([
        ("mode".to_string(), Value::string("go")),
        ("x".to_string(), Value::Number(41.0)),
    ]);
    assert!(runner.run_plan_once_bdi(&plan, &vars).unwrap());
    assert_eq!(*log.lock().unwrap(), vec![Value::Number(42.0)]);
    assert_eq!(runtime.get_variable("partial").unwrap(), None);
}

#[test]
fn drop_between_steps_stops_the_run() {
    let (runtime, log) = recording_runtime();
    runtime.set_variable("stopNow", Value::Boolean(false)).unwrap();
    let sink = EventSink::new(16);
    let mut events = sink.subscribe();
    let plan = build_plan(
        &runtime,
        yes(),
        yes(),
        vec![
            func(
                &[],
                BlockBuilder::new("runner.ch")
                    .stmt(call("record", vec![num(0.0)]))
                    .stmt(call("setq", vec![var("stopNow"), boolean(true)]))
                    .build()
                    .unwrap(),
            ),
            thunk(call("record", vec![num(1.0)])),
        ],
        thunk(var("stopNow")),
    );

    let ran = PlanRunner::new(&runtime)
        .with_agent("worker")
        .with_sink(sink)
        .run_plan_once_bdi(&plan, &no_vars())
        .unwrap();
    assert!(ran);
    assert_eq!(*log.lock().unwrap(), vec![Value::Number(0.0)]);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.agent.as_deref(), Some("worker"));
        seen.push((event.kind, event.step, event.status));
    }
    assert_eq!(
        seen,
        vec![
            (EventKind::Plan, None, EventStatus::Start),
            (EventKind::Step, Some(0), EventStatus::Start),
            (EventKind::Step, Some(0), EventStatus::Finish),
            (EventKind::Plan, Some(1), EventStatus::Drop),
        ]
    );
}

#[test]
fn failing_step_aborts_with_step_failure() {
    let (runtime, log) = recording_runtime();
    let plan = build_plan(
        &runtime,
        yes(),
        yes(),
        vec![
            thunk(call("record", vec![num(0.0)])),
            thunk(call("missingFunction", vec![])),
            thunk(call("record", vec![num(2.0)])),
        ],
        no(),
    );
    let err = PlanRunner::new(&runtime).run_plan_once(&plan).unwrap_err();
    assert_eq!(err.kind(), "StepFailureError");
    match err {
        RuntimeError::StepFailure { plan, step, source } => {
            assert_eq!(plan, "T");
            assert_eq!(step, 1);
            assert_eq!(source.kind(), "UndefinedNameError");
        }
        other => panic!("expected step failure, got {:?}", other),
    }
    assert_eq!(*log.lock().unwrap(), vec![Value::Number(0.0)]);
}

#[test]
fn forcing_modes_skip_predicates() {
    let (runtime, log) = recording_runtime();
    let plan = build_plan(
        &runtime,
        no(),
        no(),
        vec![thunk(call("record", vec![text("ran")]))],
        yes(),
    );
    let runner = PlanRunner::new(&runtime);
    assert!(!runner
        .run_plan_once_ex(&plan, RunMode::GuardOnly, &no_vars())
        .unwrap());
    assert!(!runner
        .run_plan_once_ex(&plan, RunMode::Force, &no_vars())
        .unwrap());
    assert!(log.lock().unwrap().is_empty());
    assert!(runner
        .run_plan_once_ex(&plan, RunMode::ForceAll, &no_vars())
        .unwrap());
    assert_eq!(*log.lock().unwrap(), vec![Value::string("ran")]);
}

#[test]
fn erroring_predicate_counts_as_false() {
    let (runtime, _log) = recording_runtime();
    let plan = build_plan(
        &runtime,
        thunk(call("sub", vec![text("a"), num(1.0)])),
        yes(),
        vec![],
        no(),
    );
    assert!(!PlanRunner::new(&runtime)
        .run_plan_once_bdi(&plan, &no_vars())
        .unwrap());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn bdi_runs_iff_trigger_and_guard_hold_and_drop_does_not(
        trigger in any::<bool>(),
        guard in any::<bool>(),
        drop in any::<bool>(),
    ) {
        let (runtime, log) = recording_runtime();
        let plan = build_plan(
            &runtime,
            thunk(boolean(trigger)),
            thunk(boolean(guard)),
            vec![thunk(call("record", vec![num(1.0)]))],
            thunk(boolean(drop)),
        );
        let runner = PlanRunner::new(&runtime);
        let expected = trigger && guard && !drop;

        let would_run = runner.run_plan_once_ex(&plan, RunMode::DryRun, &no_vars()).unwrap();
        prop_assert_eq!(would_run, expected);
        prop_assert!(log.lock().unwrap().is_empty());

        let fallback = runner
            .run_plan_once_ex(&plan, RunMode::parse("anything-else"), &no_vars())
            .unwrap();
        prop_assert_eq!(fallback, expected);

        let ran = runner.run_plan_once_bdi(&plan, &no_vars()).unwrap();
        prop_assert_eq!(ran, expected);
        prop_assert_eq!(log.lock().unwrap().len(), if expected { 2 } else { 0 });
    }
}
