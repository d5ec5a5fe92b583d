use chariot::builders::*;
use chariot::persistence::{load_tree, save_tree};
use chariot::{Block, CaptureKind, Function, Node, Runtime, RuntimeResult, Value};
use pretty_assertions::assert_eq;

fn block(stmts: Vec<Node>) -> Block {
    BlockBuilder::new("plans.ch").stmts(stmts).build().unwrap()
}

/// `plan("cool", array("target"), trigger, guard, array(step), drop)`
fn cooling_plan() -> Node {
    call(
        "plan",
        vec![
            text("cool"),
            call("array", vec![text("target")]),
            thunk(boolean(true)),
            thunk(call("bigger", vec![var("temp"), num(70.0)])),
            call(
                "array",
                vec![thunk(call("setq", vec![var("temp"), var("target")]))],
            ),
            thunk(boolean(false)),
        ],
    )
}

fn run_on(runtime: &Runtime, stmts: Vec<Node>) -> RuntimeResult<Value> {
    runtime.execute(&block(stmts))
}

#[test]
fn plan_builtin_produces_a_plan_value() {
    let runtime = Runtime::new();
    let result = run_on(
        &runtime,
        vec![
            call("setq", vec![var("p"), cooling_plan()]),
            call(
                "array",
                vec![
                    call("typeOf", vec![var("p")]),
                    call("getProp", vec![var("p"), text("name")]),
                    call("length", vec![call("getProp", vec![var("p"), text("params")])]),
                    call("length", vec![call("getProp", vec![var("p"), text("Steps")])]),
                ],
            ),
        ],
    )
    .unwrap();
    assert_eq!(
        result,
        Value::array(vec![
            Value::string("P"),
            Value::string("cool"),
            Value::Number(1.0),
            Value::Number(1.0),
        ])
    );
}

#[test]
fn plan_arguments_are_validated_in_order() {
    let runtime = Runtime::new();
    let err = run_on(
        &runtime,
        vec![call(
            "plan",
            vec![
                num(1.0),
                call("array", vec![]),
                thunk(boolean(true)),
                thunk(boolean(true)),
                call("array", vec![]),
                thunk(boolean(false)),
            ],
        )],
    )
    .unwrap_err();
    assert_eq!(err.kind(), "ArgumentError");
    assert!(err.to_string().contains("name must be string"));

    let err = run_on(
        &runtime,
        vec![call(
            "plan",
            vec![
                text("p"),
                call("array", vec![]),
                thunk(boolean(true)),
                thunk(boolean(true)),
                call("array", vec![num(3.0)]),
                thunk(boolean(false)),
            ],
        )],
    )
    .unwrap_err();
    assert!(err.to_string().contains("steps must be array of functions"));
}

#[test]
fn plan_components_must_capture_the_global_scope() {
    let runtime = Runtime::new();
    let factory = func(&["limit"], block(vec![cooling_plan()]));
    let err = run_on(
        &runtime,
        vec![
            call("setq", vec![var("factory"), factory]),
            call("factory", vec![num(3.0)]),
        ],
    )
    .unwrap_err();
    assert_eq!(err.kind(), "ArgumentError");
    assert!(err.to_string().contains("must capture only the global scope"));
}

#[test]
fn set_prop_updates_and_rejects_unknown_keys() {
    let runtime = Runtime::new();
    let result = run_on(
        &runtime,
        vec![
            call("setq", vec![var("p"), cooling_plan()]),
            call("setProp", vec![var("p"), text("name"), text("chill")]),
            call("getProp", vec![var("p"), text("name")]),
        ],
    )
    .unwrap();
    assert_eq!(result, Value::string("chill"));

    let err = run_on(
        &runtime,
        vec![call("setProp", vec![var("p"), text("owner"), text("me")])],
    )
    .unwrap_err();
    assert_eq!(err.kind(), "UnknownPropertyError");
    assert_eq!(err.to_string(), "property 'owner' not found in Plan");

    let err = run_on(
        &runtime,
        vec![call("setProp", vec![var("p"), text("guard"), num(1.0)])],
    )
    .unwrap_err();
    assert_eq!(err.kind(), "ArgumentError");
    // rejected updates leave the plan as it was
    let guard = run_on(
        &runtime,
        vec![call("typeOf", vec![call("getProp", vec![var("p"), text("guard")])])],
    )
    .unwrap();
    assert_eq!(guard, Value::string("F"));
}

#[test]
fn components_are_named_after_the_plan_through_set_prop() {
    let runtime = Runtime::new();
    run_on(
        &runtime,
        vec![
            call("setq", vec![var("p"), cooling_plan()]),
            call("setProp", vec![var("p"), text("guard"), thunk(boolean(true))]),
            call(
                "setProp",
                vec![
                    var("p"),
                    text("steps"),
                    call("array", vec![thunk(num(1.0)), thunk(num(2.0))]),
                ],
            ),
        ],
    )
    .unwrap();
    let Some(Value::Plan(plan)) = runtime.get_variable("p").unwrap() else {
        panic!("expected plan");
    };
    let def = plan.snapshot().unwrap();
    assert_eq!(def.guard.name.as_deref(), Some("cool.guard"));
    let steps: Vec<_> = def.steps.iter().map(|s| s.display_name().to_string()).collect();
    assert_eq!(steps, vec!["cool.step[0]", "cool.step[1]"]);

    run_on(
        &runtime,
        vec![call("setProp", vec![var("p"), text("name"), text("chill")])],
    )
    .unwrap();
    let def = plan.snapshot().unwrap();
    assert_eq!(def.trigger.name.as_deref(), Some("chill.trigger"));
    assert_eq!(def.guard.name.as_deref(), Some("chill.guard"));
    assert_eq!(def.drop.name.as_deref(), Some("chill.drop"));
    assert_eq!(def.steps[1].name.as_deref(), Some("chill.step[1]"));

    // arity errors carry the component name
    let step = Value::Function(Function::Closure(def.steps[0].clone()));
    let err = runtime.call(&step, vec![Value::Number(1.0)]).unwrap_err();
    assert!(err.to_string().contains("chill.step[0]"));
}

#[test]
fn clone_runtime_isolates_globals_and_rebinds_closures() {
    let runtime = Runtime::new();
    run_on(
        &runtime,
        vec![
            call("setq", vec![var("count"), num(0.0)]),
            call("setq", vec![var("limits"), call("map", vec![text("max"), num(1.0)])]),
            call(
                "setq",
                vec![
                    var("bump"),
                    thunk(call(
                        "setq",
                        vec![var("count"), call("add", vec![var("count"), num(1.0)])],
                    )),
                ],
            ),
        ],
    )
    .unwrap();

    let copy = runtime.clone_runtime().unwrap();
    let bump = copy.get_variable("bump").unwrap().unwrap();
    copy.call(&bump, vec![]).unwrap();
    copy.call(&bump, vec![]).unwrap();
    run_on(&copy, vec![call("setProp", vec![var("limits"), text("max"), num(9.0)])]).unwrap();

    assert_eq!(copy.get_variable("count").unwrap(), Some(Value::Number(2.0)));
    assert_eq!(runtime.get_variable("count").unwrap(), Some(Value::Number(0.0)));
    let original_max = run_on(&runtime, vec![call("getProp", vec![var("limits"), text("max")])]);
    assert_eq!(original_max.unwrap(), Value::Number(1.0));
}

#[test]
fn clone_runtime_copies_frames_captured_by_local_closures() {
    let runtime = Runtime::new();
    // tick and peek both close over the same frame of `counter`
    let counter = func(
        &[],
        block(vec![
            call("setq", vec![var("n"), num(0.0)]),
            call(
                "setq",
                vec![
                    var("tick"),
                    thunk(call("setq", vec![var("n"), call("add", vec![var("n"), num(1.0)])])),
                ],
            ),
            call("setq", vec![var("peek"), thunk(var("n"))]),
            call("array", vec![var("tick"), var("peek")]),
        ]),
    );
    run_on(
        &runtime,
        vec![
            call("setq", vec![var("counter"), counter]),
            call("setq", vec![var("pair"), call("counter", vec![])]),
        ],
    )
    .unwrap();
    let Some(Value::Array(pair)) = runtime.get_variable("pair").unwrap() else {
        panic!("expected array");
    };
    let tick = pair.read().unwrap()[0].clone();
    let Value::Function(Function::Closure(closure)) = &tick else {
        panic!("expected closure");
    };
    assert_eq!(closure.capture, CaptureKind::Local);
    runtime.call(&tick, vec![]).unwrap();

    let copy = runtime.clone_runtime().unwrap();
    let Some(Value::Array(copied)) = copy.get_variable("pair").unwrap() else {
        panic!("expected array");
    };
    let (copied_tick, copied_peek) = {
        let items = copied.read().unwrap();
        (items[0].clone(), items[1].clone())
    };
    let Value::Function(Function::Closure(copied_closure)) = &copied_tick else {
        panic!("expected closure");
    };
    assert_eq!(copied_closure.capture, CaptureKind::Local);
    assert!(copied_closure.scope.global().same_scope(copy.global_scope()));

    copy.call(&copied_tick, vec![]).unwrap();
    copy.call(&copied_tick, vec![]).unwrap();
    assert_eq!(copy.call(&copied_peek, vec![]).unwrap(), Value::Number(3.0));
    let peek = pair.read().unwrap()[1].clone();
    assert_eq!(runtime.call(&peek, vec![]).unwrap(), Value::Number(1.0));
}

#[test]
fn saved_plans_reload_onto_a_new_runtime() {
    let source = Runtime::new();
    let tree = run_on(
        &source,
        vec![
            call("setq", vec![var("root"), call("create", vec![text("agent")])]),
            call("setAttribute", vec![var("root"), text("plan"), cooling_plan()]),
            call("setAttribute", vec![var("root"), text("owner"), text("ops")]),
            var("root"),
        ],
    )
    .unwrap();
    let Value::Tree(node) = tree else {
        panic!("expected tree");
    };
    let bytes = save_tree(&node).unwrap();

    let target = Runtime::new();
    let loaded = load_tree(&bytes, &target).unwrap();
    assert_eq!(loaded.name(), "agent");
    assert_eq!(
        loaded.attribute("owner").unwrap(),
        Some(Value::string("ops"))
    );
    let Some(Value::Plan(plan)) = loaded.attribute("plan").unwrap() else {
        panic!("expected plan attribute");
    };
    let def = plan.snapshot().unwrap();
    assert_eq!(def.name, "cool");
    assert_eq!(def.params, vec!["target".to_string()]);
    assert_eq!(def.steps.len(), 1);
    assert_eq!(def.guard.capture, CaptureKind::Global);
    assert!(def.guard.scope.same_scope(target.global_scope()));

    target.set_variable("temp", Value::Number(80.0)).unwrap();
    let guard = Value::Function(Function::Closure(def.guard.clone()));
    assert_eq!(target.call(&guard, vec![]).unwrap(), Value::Boolean(true));
}

#[test]
fn local_closures_cannot_be_saved() {
    let runtime = Runtime::new();
    let make = func(&["n"], block(vec![thunk(var("n"))]));
    let tree = run_on(
        &runtime,
        vec![
            call("setq", vec![var("make"), make]),
            call("setq", vec![var("root"), call("create", vec![text("r")])]),
            call(
                "setAttribute",
                vec![var("root"), text("f"), call("make", vec![num(1.0)])],
            ),
            var("root"),
        ],
    )
    .unwrap();
    let Value::Tree(node) = tree else {
        panic!("expected tree");
    };
    let err = save_tree(&node).unwrap_err();
    assert_eq!(err.kind(), "PersistenceError");
}
