use super::*;
use crate::vm::{Control, Flow, NativeFunction};

#[test]
fn pcall_reports_success_with_all_results() {
    let body = vec![ret(vec![call(
        "pcall",
        vec![func(&[], vec![ret(vec![Expr::Int(1), Expr::Int(2)])])],
    )])];
    assert_eq!(eval(body), vec![Val::Bool(true), Val::Int(1), Val::Int(2)]);
}

#[test]
fn pcall_forwards_arguments() {
    let body = vec![ret(vec![call(
        "pcall",
        vec![
            func(&["a"], vec![ret(vec![add(Expr::name("a"), Expr::Int(1))])]),
            Expr::Int(10),
        ],
    )])];
    assert_eq!(eval(body), vec![Val::Bool(true), Val::Int(11)]);
}

#[test]
fn pcall_catches_an_explicit_error() {
    let body = vec![ret(vec![call(
        "pcall",
        vec![func(&[], vec![Stmt::Expr(call("error", vec![Expr::str("bang")]))])],
    )])];
    assert_eq!(eval(body), vec![Val::Bool(false), Val::str("bang")]);
}

#[test]
fn pcall_preserves_a_table_error_payload() {
    // pcall(function() error({code = 7}) end) hands the table back.
    let body = vec![
        Stmt::Local(
            vec!["ok".into(), "e".into()],
            vec![call(
                "pcall",
                vec![func(
                    &[],
                    vec![Stmt::Expr(call(
                        "error",
                        vec![Expr::Table(vec![crate::ast::TableItem::Pair(
                            Expr::str("code"),
                            Expr::Int(7),
                        )])],
                    ))],
                )],
            )],
        ),
        ret(vec![Expr::name("ok"), Expr::index(Expr::name("e"), Expr::str("code"))]),
    ];
    assert_eq!(eval(body), vec![Val::Bool(false), Val::Int(7)]);
}

#[test]
fn pcall_catches_runtime_type_errors() {
    let body = vec![Stmt::Local(
        vec!["ok".into(), "e".into()],
        vec![call(
            "pcall",
            vec![func(&[], vec![ret(vec![add(Expr::Nil, Expr::Int(1))])])],
        )],
    ), ret(vec![Expr::name("ok")])];
    assert_eq!(eval(body), vec![Val::Bool(false)]);
}

#[test]
fn pcall_catches_stack_overflow() {
    let body = vec![
        assign("loop", func(&[], vec![ret(vec![call("loop", vec![])])])),
        ret(vec![call("pcall", vec![Expr::name("loop")])]),
    ];
    assert_eq!(eval(body), vec![Val::Bool(false), Val::str("stack overflow")]);
}

#[test]
fn protection_survives_suspension() {
    // pcall(function() return yield(1) end): suspend inside the
    // protected region, resume, and the pcall frame is still there.
    let body = vec![ret(vec![call(
        "pcall",
        vec![func(&[], vec![ret(vec![call("yield", vec![Expr::Int(1)])])])],
    )])];
    let f = chunk_fn(body, new_env());
    let mut ctx = ExecContext::default();
    let s = match ctx.start(&f, &[]).unwrap() {
        Outcome::Suspended(s) => s,
        Outcome::Done(v) => panic!("ran to completion: {v:?}"),
    };
    assert_eq!(s.values(), &[Val::Int(1)]);
    // Yield marker, inner closure, pcall wrapper, chunk.
    assert_eq!(s.depth(), 4);

    match ctx.resume(s, vec![Val::Int(99)]).unwrap() {
        Outcome::Done(v) => assert_eq!(v, vec![Val::Bool(true), Val::Int(99)]),
        Outcome::Suspended(s) => panic!("still suspended: {s:?}"),
    }
}

#[test]
fn error_raised_after_resume_is_still_caught() {
    // pcall(function() local v = yield(); error(v) end)
    let body = vec![ret(vec![call(
        "pcall",
        vec![func(
            &[],
            vec![
                local("v", call("yield", vec![])),
                Stmt::Expr(call("error", vec![Expr::name("v")])),
            ],
        )],
    )])];
    let f = chunk_fn(body, new_env());
    let mut ctx = ExecContext::default();
    let s = match ctx.start(&f, &[]).unwrap() {
        Outcome::Suspended(s) => s,
        Outcome::Done(v) => panic!("ran to completion: {v:?}"),
    };
    match ctx.resume(s, vec![Val::str("late")]).unwrap() {
        Outcome::Done(v) => assert_eq!(v, vec![Val::Bool(false), Val::str("late")]),
        Outcome::Suspended(s) => panic!("still suspended: {s:?}"),
    }
}

#[test]
fn fatal_errors_pass_through_pcall() {
    fn misuse(_ctx: &mut ExecContext, _args: &[Val]) -> Flow {
        Err(Control::fatal("host misuse"))
    }
    let env = new_env();
    env.set_str("misuse", NativeFunction::new("misuse", misuse));
    let body = vec![ret(vec![call("pcall", vec![Expr::name("misuse")])])];
    let f = chunk_fn(body, env);
    let mut ctx = ExecContext::default();
    let err = ctx.start(&f, &[]).unwrap_err();
    assert!(err.to_string().contains("engine contract violation"), "{err}");
}

#[test]
fn nested_pcall_catches_at_the_innermost_frame() {
    // pcall(function() return pcall(function() error("inner") end) end)
    let inner = call(
        "pcall",
        vec![func(&[], vec![Stmt::Expr(call("error", vec![Expr::str("inner")]))])],
    );
    let body = vec![ret(vec![call("pcall", vec![func(&[], vec![ret(vec![inner])])])])];
    assert_eq!(
        eval(body),
        vec![Val::Bool(true), Val::Bool(false), Val::str("inner")]
    );
}
