use chariot::builders::*;
use chariot::{Block, CaptureKind, Function, Node, Runtime, RuntimeConfig, RuntimeResult, Value};
use pretty_assertions::assert_eq;

fn block(stmts: Vec<Node>) -> Block {
    BlockBuilder::new("eval.ch").stmts(stmts).build().unwrap()
}

fn run(stmts: Vec<Node>) -> RuntimeResult<Value> {
    Runtime::new().execute(&block(stmts))
}

#[test]
fn closures_share_their_captured_scope() {
    let runtime = Runtime::new();
    let program = block(vec![
        call("setq", vec![var("count"), num(0.0)]),
        call(
            "setq",
            vec![
                var("bump"),
                func(
                    &[],
                    block(vec![call(
                        "setq",
                        vec![var("count"), call("add", vec![var("count"), num(1.0)])],
                    )]),
                ),
            ],
        ),
        call("bump", vec![]),
        call("bump", vec![]),
        var("count"),
    ]);
    assert_eq!(runtime.execute(&program).unwrap(), Value::Number(2.0));
}

#[test]
fn inner_closures_capture_locals() {
    let runtime = Runtime::new();
    let make_adder = func(
        &["n"],
        block(vec![func(&["x"], block(vec![call("add", vec![var("x"), var("n")])]))]),
    );
    let program = block(vec![
        call("setq", vec![var("makeAdder"), make_adder]),
        call("setq", vec![var("add5"), call("makeAdder", vec![num(5.0)])]),
        call("add5", vec![num(2.0)]),
    ]);
    assert_eq!(runtime.execute(&program).unwrap(), Value::Number(7.0));

    match runtime.get_variable("add5").unwrap() {
        Some(Value::Function(Function::Closure(closure))) => {
            assert_eq!(closure.capture, CaptureKind::Local)
        }
        other => panic!("expected closure, got {:?}", other),
    }
    match runtime.get_variable("makeAdder").unwrap() {
        Some(Value::Function(Function::Closure(closure))) => {
            assert_eq!(closure.capture, CaptureKind::Global)
        }
        other => panic!("expected closure, got {:?}", other),
    }
}

#[test]
fn while_honours_break_and_continue() {
    // total = 1 + 2 + 4 + 5; 3 is skipped and the loop stops at 6
    let body = block(vec![
        call("setq", vec![var("i"), call("add", vec![var("i"), num(1.0)])]),
        if_else(
            call("equal", vec![var("i"), num(3.0)]),
            block(vec![cont()]),
            None,
        ),
        if_else(
            call("equal", vec![var("i"), num(6.0)]),
            block(vec![brk()]),
            None,
        ),
        call("setq", vec![var("total"), call("add", vec![var("total"), var("i")])]),
    ]);
    let result = run(vec![
        call("setq", vec![var("i"), num(0.0)]),
        call("setq", vec![var("total"), num(0.0)]),
        while_loop(call("smaller", vec![var("i"), num(10.0)]), body),
        var("total"),
    ])
    .unwrap();
    assert_eq!(result, Value::Number(12.0));
}

#[test]
fn switch_matches_by_equality_or_condition() {
    let pick = |subject: Node| {
        run(vec![
            call("setq", vec![var("out"), text("none")]),
            switch(
                Some(subject),
                vec![
                    case(num(1.0), block(vec![call("setq", vec![var("out"), text("one")])])),
                    case(num(2.0), block(vec![call("setq", vec![var("out"), text("two")])])),
                ],
                Some(block(vec![call("setq", vec![var("out"), text("other")])])),
            ),
            var("out"),
        ])
        .unwrap()
    };
    assert_eq!(pick(num(2.0)), Value::string("two"));
    assert_eq!(pick(num(9.0)), Value::string("other"));

    let result = run(vec![
        call("setq", vec![var("t"), num(75.0)]),
        call("setq", vec![var("out"), text("")]),
        switch(
            None,
            vec![
                case(
                    call("smaller", vec![var("t"), num(60.0)]),
                    block(vec![call("setq", vec![var("out"), text("cold")])]),
                ),
                case(
                    call("bigger", vec![var("t"), num(70.0)]),
                    block(vec![call("setq", vec![var("out"), text("hot")])]),
                ),
                case(
                    boolean(true),
                    block(vec![call("setq", vec![var("out"), text("also")])]),
                ),
            ],
            None,
        ),
        var("out"),
    ])
    .unwrap();
    assert_eq!(result, Value::string("hot"));
}

#[test]
fn return_unwinds_loops_inside_functions() {
    let find = func(
        &["limit"],
        block(vec![
            call("setq", vec![var("i"), num(0.0)]),
            while_loop(
                boolean(true),
                block(vec![
                    call("setq", vec![var("i"), call("add", vec![var("i"), num(1.0)])]),
                    if_else(
                        call("equal", vec![var("i"), var("limit")]),
                        block(vec![ret(Some(call("add", vec![var("i"), num(100.0)])))]),
                        None,
                    ),
                ]),
            ),
        ]),
    );
    let result = run(vec![
        call("setq", vec![var("find"), find]),
        call("find", vec![num(4.0)]),
    ])
    .unwrap();
    assert_eq!(result, Value::Number(104.0));
}

#[test]
fn branches_get_their_own_scope() {
    let err = run(vec![
        if_else(
            boolean(true),
            block(vec![call("declare", vec![var("tmp"), text("N"), num(1.0)])]),
            None,
        ),
        var("tmp"),
    ])
    .unwrap_err();
    assert_eq!(err.kind(), "UndefinedNameError");
}

#[test]
fn and_or_short_circuit_with_null_rules() {
    assert_eq!(
        run(vec![call("and", vec![boolean(false), var("undefined")])]).unwrap(),
        Value::Boolean(false)
    );
    assert_eq!(
        run(vec![call("and", vec![null(), boolean(true)])]).unwrap(),
        Value::Boolean(false)
    );
    assert_eq!(
        run(vec![call("or", vec![null(), var("undefined")])]).unwrap(),
        Value::Boolean(true)
    );
    assert_eq!(
        run(vec![call("or", vec![boolean(false), boolean(false)])]).unwrap(),
        Value::Boolean(false)
    );
    let err = run(vec![call("and", vec![num(1.0), boolean(true)])]).unwrap_err();
    assert_eq!(err.kind(), "TypeError");
}

#[test]
fn typed_declarations_coerce_or_fail() {
    assert_eq!(
        run(vec![
            call("declare", vec![var("x"), text("N"), text("42")]),
            var("x"),
        ])
        .unwrap(),
        Value::Number(42.0)
    );
    let err = run(vec![
        call("declare", vec![var("x"), text("N")]),
        call("setq", vec![var("x"), call("array", vec![])]),
    ])
    .unwrap_err();
    assert_eq!(err.kind(), "TypeError");

    let err = run(vec![call("declare", vec![var("x"), text("Q")])]).unwrap_err();
    assert_eq!(err.kind(), "ArgumentError");

    assert_eq!(
        run(vec![
            call("declare", vec![var("v")]),
            call("typeOf", vec![var("v")]),
        ])
        .unwrap(),
        Value::string("V")
    );
}

#[test]
fn declare_global_escapes_function_scope() {
    let setup = func(
        &[],
        block(vec![call(
            "declareGlobal",
            vec![var("shared"), text("S"), text("ready")],
        )]),
    );
    let result = run(vec![
        call("setq", vec![var("setup"), setup]),
        call("setup", vec![]),
        var("shared"),
    ])
    .unwrap();
    assert_eq!(result, Value::string("ready"));
}

#[test]
fn call_failures_are_typed() {
    let err = run(vec![call("nothingHere", vec![])]).unwrap_err();
    assert_eq!(err.kind(), "UndefinedNameError");
    assert_eq!(err.to_string(), "function 'nothingHere' not defined");

    let err = run(vec![
        call("setq", vec![var("notFn"), num(3.0)]),
        call("notFn", vec![]),
    ])
    .unwrap_err();
    assert_eq!(err.kind(), "TypeError");

    let err = run(vec![
        call("setq", vec![var("f"), func(&["a", "b"], block(vec![var("a")]))]),
        call("f", vec![num(1.0)]),
    ])
    .unwrap_err();
    assert_eq!(err.kind(), "ArgumentError");
}

#[test]
fn break_outside_loop_is_invalid() {
    let err = run(vec![brk()]).unwrap_err();
    assert_eq!(err.kind(), "InvalidProgram");

    let err = run(vec![
        call("setq", vec![var("f"), func(&[], block(vec![cont()]))]),
        while_loop(boolean(true), block(vec![call("f", vec![])])),
    ])
    .unwrap_err();
    assert_eq!(err.kind(), "InvalidProgram");
}

#[test]
fn runaway_recursion_hits_the_depth_limit() {
    let runtime = Runtime::with_config(RuntimeConfig {
        max_call_depth: 32,
        ..RuntimeConfig::default()
    });
    let program = block(vec![
        call(
            "setq",
            vec![var("loop"), func(&[], block(vec![call("loop", vec![])]))],
        ),
        call("loop", vec![]),
    ]);
    let err = runtime.execute(&program).unwrap_err();
    assert_eq!(err.kind(), "RecursionLimit");
}

#[test]
fn recursion_within_the_limit_succeeds() {
    let fact = func(
        &["n"],
        block(vec![
            if_else(
                call("smaller", vec![var("n"), num(2.0)]),
                block(vec![ret(Some(num(1.0)))]),
                None,
            ),
            call(
                "mul",
                vec![var("n"), call("fact", vec![call("sub", vec![var("n"), num(1.0)])])],
            ),
        ]),
    );
    let runtime = Runtime::new();
    runtime
        .register_builtin("mul", chariot::runtime::Arity::Fixed(2), |args| {
            match (&args[0], &args[1]) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
                _ => Ok(Value::Null),
            }
        })
        .unwrap();
    let program = block(vec![
        call("setq", vec![var("fact"), fact]),
        call("fact", vec![num(5.0)]),
    ]);
    assert_eq!(runtime.execute(&program).unwrap(), Value::Number(120.0));
}
