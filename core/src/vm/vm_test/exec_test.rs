use super::*;
use crate::ast::{AssignTarget, TableItem};
use crate::op::UnOp;

#[test]
fn return_literal() {
    assert_eq!(eval(vec![ret(vec![Expr::Int(42)])]), vec![Val::Int(42)]);
}

#[test]
fn arithmetic_precedence_via_tree() {
    // 1 + 2 * 3
    let e = add(Expr::Int(1), mul(Expr::Int(2), Expr::Int(3)));
    assert_eq!(eval(vec![ret(vec![e])]), vec![Val::Int(7)]);
}

#[test]
fn integer_division_widens_to_float() {
    let e = Expr::bin(Expr::Int(1), BinOp::Arith(ArithOp::Div), Expr::Int(2));
    assert_eq!(eval(vec![ret(vec![e])]), vec![Val::Float(0.5)]);
}

#[test]
fn locals_and_reassignment() {
    let body = vec![
        local("x", Expr::Int(1)),
        assign("x", add(Expr::name("x"), Expr::Int(5))),
        ret(vec![Expr::name("x")]),
    ];
    assert_eq!(eval(body), vec![Val::Int(6)]);
}

#[test]
fn while_loop_accumulates() {
    // local i = 0; local s = 0; while i < 5 do s = s + i; i = i + 1 end; return s
    let body = vec![
        local("i", Expr::Int(0)),
        local("s", Expr::Int(0)),
        Stmt::While(
            lt(Expr::name("i"), Expr::Int(5)),
            vec![
                assign("s", add(Expr::name("s"), Expr::name("i"))),
                assign("i", add(Expr::name("i"), Expr::Int(1))),
            ],
        ),
        ret(vec![Expr::name("s")]),
    ];
    assert_eq!(eval(body), vec![Val::Int(10)]);
}

#[test]
fn if_elseif_else_picks_the_right_arm() {
    fn classify(n: i64) -> Vec<Val> {
        let body = vec![
            local("n", Expr::Int(n)),
            Stmt::If {
                arms: vec![
                    (lt(Expr::name("n"), Expr::Int(0)), vec![ret(vec![Expr::str("neg")])]),
                    (
                        Expr::bin(Expr::name("n"), BinOp::Cmp(CmpOp::Eq), Expr::Int(0)),
                        vec![ret(vec![Expr::str("zero")])],
                    ),
                ],
                else_body: Some(vec![ret(vec![Expr::str("pos")])]),
            },
        ];
        eval(body)
    }
    assert_eq!(classify(-1), vec![Val::str("neg")]);
    assert_eq!(classify(0), vec![Val::str("zero")]);
    assert_eq!(classify(3), vec![Val::str("pos")]);
}

#[test]
fn multiple_returns_nil_pad() {
    // local f = function() return 1, 2 end; local a, b, c = f(); return a, b, c
    let body = vec![
        local("f", func(&[], vec![ret(vec![Expr::Int(1), Expr::Int(2)])])),
        Stmt::Local(
            vec!["a".into(), "b".into(), "c".into()],
            vec![call("f", vec![])],
        ),
        ret(vec![Expr::name("a"), Expr::name("b"), Expr::name("c")]),
    ];
    assert_eq!(eval(body), vec![Val::Int(1), Val::Int(2), Val::Nil]);
}

#[test]
fn globals_live_in_env() {
    let body = vec![
        assign("answer", Expr::Int(10)),
        ret(vec![add(Expr::name("answer"), Expr::Int(1))]),
    ];
    assert_eq!(eval(body), vec![Val::Int(11)]);
}

#[test]
fn global_writes_are_visible_through_the_env_table() {
    let env = new_env();
    let body = vec![assign("marker", Expr::str("here"))];
    let mut ctx = ExecContext::default();
    eval_in(body, Arc::clone(&env), &mut ctx);
    assert_eq!(env.get_str("marker"), Val::str("here"));
}

#[test]
fn table_constructor_items_and_pairs() {
    // local t = {10, 20, k = 3}; return t[1] + t[2] + t.k
    let body = vec![
        local(
            "t",
            Expr::Table(vec![
                TableItem::Item(Expr::Int(10)),
                TableItem::Item(Expr::Int(20)),
                TableItem::Pair(Expr::str("k"), Expr::Int(3)),
            ]),
        ),
        ret(vec![add(
            add(
                Expr::index(Expr::name("t"), Expr::Int(1)),
                Expr::index(Expr::name("t"), Expr::Int(2)),
            ),
            Expr::index(Expr::name("t"), Expr::str("k")),
        )]),
    ];
    assert_eq!(eval(body), vec![Val::Int(33)]);
}

#[test]
fn index_assignment() {
    let body = vec![
        local("t", Expr::Table(vec![])),
        Stmt::Assign(
            vec![AssignTarget::Index(Expr::name("t"), Expr::str("x"))],
            vec![Expr::Int(9)],
        ),
        ret(vec![Expr::index(Expr::name("t"), Expr::str("x"))]),
    ];
    assert_eq!(eval(body), vec![Val::Int(9)]);
}

#[test]
fn concat_coerces_numbers() {
    let e = Expr::bin(
        Expr::bin(Expr::str("a"), BinOp::Concat, Expr::str("b")),
        BinOp::Concat,
        Expr::Int(1),
    );
    assert_eq!(eval(vec![ret(vec![e])]), vec![Val::str("ab1")]);
}

#[test]
fn and_or_short_circuit() {
    // `false and g()` must not call g; g is nil, calling it would error.
    let e = Expr::bin(Expr::False, BinOp::And, call("g", vec![]));
    assert_eq!(eval(vec![ret(vec![e])]), vec![Val::Bool(false)]);

    let e = Expr::bin(Expr::Nil, BinOp::Or, Expr::Int(5));
    assert_eq!(eval(vec![ret(vec![e])]), vec![Val::Int(5)]);
}

#[test]
fn unary_operators() {
    assert_eq!(
        eval(vec![ret(vec![Expr::Un(UnOp::Len, Box::new(Expr::str("abc")))])]),
        vec![Val::Int(3)]
    );
    assert_eq!(
        eval(vec![ret(vec![Expr::Un(UnOp::Neg, Box::new(Expr::Int(4)))])]),
        vec![Val::Int(-4)]
    );
    assert_eq!(
        eval(vec![ret(vec![Expr::Un(UnOp::Not, Box::new(Expr::Nil))])]),
        vec![Val::Bool(true)]
    );
}

#[test]
fn vararg_function_forwards_all_values() {
    // local f = function(...) return ... end; return f(1, 2, 3)
    let body = vec![
        local("f", vararg_func(&[], vec![ret(vec![Expr::Vararg])])),
        ret(vec![call("f", vec![Expr::Int(1), Expr::Int(2), Expr::Int(3)])]),
    ];
    assert_eq!(eval(body), vec![Val::Int(1), Val::Int(2), Val::Int(3)]);
}

#[test]
fn call_tail_spreads_into_arguments() {
    // f(0, g()) where g returns 1, 2
    let body = vec![
        local(
            "f",
            func(
                &["a", "b", "c"],
                vec![ret(vec![add(
                    add(Expr::name("a"), Expr::name("b")),
                    Expr::name("c"),
                )])],
            ),
        ),
        local("g", func(&[], vec![ret(vec![Expr::Int(1), Expr::Int(2)])])),
        ret(vec![call("f", vec![Expr::Int(0), call("g", vec![])])]),
    ];
    assert_eq!(eval(body), vec![Val::Int(3)]);
}

#[test]
fn return_tail_mixes_fixed_and_spread() {
    // local g = function() return 2, 3 end; return 1, g()
    let body = vec![
        local("g", func(&[], vec![ret(vec![Expr::Int(2), Expr::Int(3)])])),
        ret(vec![Expr::Int(1), call("g", vec![])]),
    ];
    assert_eq!(eval(body), vec![Val::Int(1), Val::Int(2), Val::Int(3)]);
}

#[test]
fn closures_share_a_captured_local() {
    // local x = 0
    // local inc = function() x = x + 1 end
    // inc(); inc()
    // return x
    let body = vec![
        local("x", Expr::Int(0)),
        local("inc", func(&[], vec![assign("x", add(Expr::name("x"), Expr::Int(1)))])),
        Stmt::Expr(call("inc", vec![])),
        Stmt::Expr(call("inc", vec![])),
        ret(vec![Expr::name("x")]),
    ];
    assert_eq!(eval(body), vec![Val::Int(2)]);
}

#[test]
fn two_closures_see_each_others_writes() {
    let body = vec![
        local("x", Expr::Int(1)),
        local("set", func(&["v"], vec![assign("x", Expr::name("v"))])),
        local("get", func(&[], vec![ret(vec![Expr::name("x")])])),
        Stmt::Expr(call("set", vec![Expr::Int(77)])),
        ret(vec![call("get", vec![])]),
    ];
    assert_eq!(eval(body), vec![Val::Int(77)]);
}

#[test]
fn later_local_does_not_write_into_a_captured_cell() {
    // do local x = 1; keep = function() return x end end
    // local y = 99
    // return keep()
    //
    // y reuses x's register once the do-block ends; the closure must still
    // see x's cell, not y's initializer.
    let body = vec![
        Stmt::Do(vec![
            local("x", Expr::Int(1)),
            assign("keep", func(&[], vec![ret(vec![Expr::name("x")])])),
        ]),
        local("y", Expr::Int(99)),
        ret(vec![call("keep", vec![])]),
    ];
    assert_eq!(eval(body), vec![Val::Int(1)]);
}

#[test]
fn loop_body_local_gets_a_fresh_cell_each_iteration() {
    // local i = 1; local t = {}
    // while i < 3 do
    //   local x = i
    //   t[i] = function() return x end
    //   i = i + 1
    // end
    // return t[1](), t[2]()
    let body = vec![
        local("i", Expr::Int(1)),
        local("t", Expr::Table(vec![])),
        Stmt::While(
            lt(Expr::name("i"), Expr::Int(3)),
            vec![
                local("x", Expr::name("i")),
                Stmt::Assign(
                    vec![AssignTarget::Index(Expr::name("t"), Expr::name("i"))],
                    vec![func(&[], vec![ret(vec![Expr::name("x")])])],
                ),
                assign("i", add(Expr::name("i"), Expr::Int(1))),
            ],
        ),
        ret(vec![
            Expr::call(Expr::index(Expr::name("t"), Expr::Int(1)), vec![]),
            Expr::call(Expr::index(Expr::name("t"), Expr::Int(2)), vec![]),
        ]),
    ];
    assert_eq!(eval(body), vec![Val::Int(1), Val::Int(2)]);
}

#[test]
fn recursion_through_a_global() {
    // fact = function(n) if n < 2 then return 1 end return n * fact(n - 1) end
    let fact_body = vec![
        Stmt::If {
            arms: vec![(lt(Expr::name("n"), Expr::Int(2)), vec![ret(vec![Expr::Int(1)])])],
            else_body: None,
        },
        ret(vec![mul(
            Expr::name("n"),
            call(
                "fact",
                vec![Expr::bin(Expr::name("n"), BinOp::Arith(ArithOp::Sub), Expr::Int(1))],
            ),
        )]),
    ];
    let body = vec![
        assign("fact", func(&["n"], fact_body)),
        ret(vec![call("fact", vec![Expr::Int(5)])]),
    ];
    assert_eq!(eval(body), vec![Val::Int(120)]);
}

#[test]
fn calling_nil_is_a_type_error() {
    let msg = eval_err(vec![Stmt::Expr(call("no_such_function", vec![]))]);
    assert!(msg.contains("attempt to call a nil value"), "{msg}");
}

#[test]
fn arith_type_error_names_the_operand() {
    let e = add(Expr::Int(1), Expr::True);
    let msg = eval_err(vec![ret(vec![e])]);
    assert!(msg.contains("arithmetic"), "{msg}");
    assert!(msg.contains("boolean"), "{msg}");
}

#[test]
fn error_report_includes_the_frame_chain() {
    // inner() errors; the trace mentions the chunk.
    let body = vec![
        local("inner", func(&[], vec![Stmt::Expr(call("nope", vec![]))])),
        Stmt::Expr(call("inner", vec![])),
    ];
    let msg = eval_err(body);
    assert!(msg.contains("runtime error"), "{msg}");
    assert!(msg.contains("main"), "{msg}");
}

#[test]
fn unbounded_recursion_overflows_cleanly() {
    let body = vec![
        assign("loop", func(&[], vec![ret(vec![call("loop", vec![])])])),
        Stmt::Expr(call("loop", vec![])),
    ];
    let msg = eval_err(body);
    assert!(msg.contains("stack overflow"), "{msg}");
}
