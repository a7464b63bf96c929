//! try/catch/finally semantics: exactly-once finally, completion
//! override, cross-frame propagation, and delete/typeof edge cases.

mod common;

use common::*;
use paserati_runtime::Paserati;
use paserati_runtime::ast::*;

fn run(body: Vec<Stmt>) -> Paserati {
    let mut vm = Paserati::new();
    let program = vm.compile(&program(body), "exceptions.ts").unwrap();
    vm.interpret(program).unwrap();
    vm
}

fn bump(name: &str) -> Stmt {
    expr_stmt(assign(name, add(ident(name), num(1.0))))
}

#[test]
fn test_finally_runs_once_on_normal_completion() {
    let body = vec![
        expr_stmt(assign("runs", num(0.0))),
        try_finally(vec![expr_stmt(num(1.0))], vec![bump("runs")]),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("runs").unwrap().as_int32(), Some(1));
}

#[test]
fn test_finally_runs_once_on_throw() {
    let body = vec![
        expr_stmt(assign("runs", num(0.0))),
        expr_stmt(assign("caught", boolean(false))),
        try_catch(
            vec![Stmt::new(StmtKind::Try {
                block: vec![throw_(str_("x"))],
                handler: None,
                finalizer: Some(vec![bump("runs")]),
            })],
            "e",
            vec![expr_stmt(assign("caught", boolean(true)))],
        ),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("runs").unwrap().as_int32(), Some(1));
    assert_eq!(vm.get_global("caught").unwrap().as_boolean(), Some(true));
}

#[test]
fn test_finally_runs_once_on_return() {
    let body = vec![
        expr_stmt(assign("runs", num(0.0))),
        func_decl(
            "f",
            &[],
            vec![Stmt::new(StmtKind::Try {
                block: vec![ret(num(1.0))],
                handler: None,
                finalizer: Some(vec![bump("runs")]),
            })],
        ),
        expr_stmt(assign("r", call(ident("f"), vec![]))),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("runs").unwrap().as_int32(), Some(1));
    assert_eq!(vm.get_global("r").unwrap().as_int32(), Some(1));
}

#[test]
fn test_return_in_finally_overrides_pending_return() {
    // function f() { try { return 1; } finally { return 2; } }  =>  2
    let body = vec![
        func_decl(
            "f",
            &[],
            vec![Stmt::new(StmtKind::Try {
                block: vec![ret(num(1.0))],
                handler: None,
                finalizer: Some(vec![ret(num(2.0))]),
            })],
        ),
        expr_stmt(assign("r", call(ident("f"), vec![]))),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("r").unwrap().as_int32(), Some(2));
}

#[test]
fn test_outer_finally_has_the_final_word() {
    // Nested finally returns: the outermost wins.
    // try { try { return 1 } finally { return 2 } } finally { return 3 }  =>  3
    let inner = Stmt::new(StmtKind::Try {
        block: vec![ret(num(1.0))],
        handler: None,
        finalizer: Some(vec![ret(num(2.0))]),
    });
    let body = vec![
        func_decl(
            "f",
            &[],
            vec![Stmt::new(StmtKind::Try {
                block: vec![inner],
                handler: None,
                finalizer: Some(vec![ret(num(3.0))]),
            })],
        ),
        expr_stmt(assign("r", call(ident("f"), vec![]))),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("r").unwrap().as_int32(), Some(3));
}

#[test]
fn test_finally_preserves_throw_when_it_completes_normally() {
    let body = vec![
        expr_stmt(assign("caught", null())),
        expr_stmt(assign("runs", num(0.0))),
        try_catch(
            vec![Stmt::new(StmtKind::Try {
                block: vec![throw_(str_("original"))],
                handler: None,
                finalizer: Some(vec![bump("runs")]),
            })],
            "e",
            vec![expr_stmt(assign("caught", ident("e")))],
        ),
    ];
    let vm = run(body);
    let caught = vm.get_global("caught").unwrap();
    assert_eq!(caught.as_string().unwrap().as_str(), "original");
    assert_eq!(vm.get_global("runs").unwrap().as_int32(), Some(1));
}

#[test]
fn test_throw_propagates_across_frames() {
    // function a() { throw "boom"; }  function b() { a(); }
    // try { b(); } catch (e) { got = e; }
    let body = vec![
        func_decl("a", &[], vec![throw_(str_("boom"))]),
        func_decl("b", &[], vec![expr_stmt(call(ident("a"), vec![]))]),
        expr_stmt(assign("got", null())),
        try_catch(
            vec![expr_stmt(call(ident("b"), vec![]))],
            "e",
            vec![expr_stmt(assign("got", ident("e")))],
        ),
    ];
    let vm = run(body);
    let got = vm.get_global("got").unwrap();
    assert_eq!(got.as_string().unwrap().as_str(), "boom");
}

#[test]
fn test_catch_rethrow_reaches_outer_catch() {
    let body = vec![
        expr_stmt(assign("outer", null())),
        try_catch(
            vec![try_catch(
                vec![throw_(str_("inner"))],
                "e",
                vec![throw_(add(ident("e"), str_("!")))],
            )],
            "e2",
            vec![expr_stmt(assign("outer", ident("e2")))],
        ),
    ];
    let vm = run(body);
    let outer = vm.get_global("outer").unwrap();
    assert_eq!(outer.as_string().unwrap().as_str(), "inner!");
}

#[test]
fn test_break_through_finally_runs_cleanup() {
    // while loop: break inside try-finally runs the finally on the way out
    let body = vec![
        expr_stmt(assign("runs", num(0.0))),
        expr_stmt(assign("after", boolean(false))),
        Stmt::new(StmtKind::While {
            test: boolean(true),
            body: Box::new(Stmt::new(StmtKind::Try {
                block: vec![Stmt::new(StmtKind::Break(None))],
                handler: None,
                finalizer: Some(vec![bump("runs")]),
            })),
        }),
        expr_stmt(assign("after", boolean(true))),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("runs").unwrap().as_int32(), Some(1));
    assert_eq!(vm.get_global("after").unwrap().as_boolean(), Some(true));
}

#[test]
fn test_delete_semantics() {
    // delete o.p: p is gone, reads give undefined, delete reports true
    let body = vec![
        const_("o", object(vec![("p", num(1.0)), ("q", num(2.0))])),
        expr_stmt(assign(
            "deleted",
            Expr::new(ExprKind::Delete {
                object: Box::new(ident("o")),
                prop: PropAccess::Static("p".into()),
            }),
        )),
        expr_stmt(assign("has_p", bin(BinaryOp::In, str_("p"), ident("o")))),
        expr_stmt(assign("read_p", member(ident("o"), "p"))),
        expr_stmt(assign("read_q", member(ident("o"), "q"))),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("deleted").unwrap().as_boolean(), Some(true));
    assert_eq!(vm.get_global("has_p").unwrap().as_boolean(), Some(false));
    assert!(vm.get_global("read_p").unwrap().is_undefined());
    assert_eq!(vm.get_global("read_q").unwrap().as_int32(), Some(2));
}

#[test]
fn test_delete_array_length_is_false() {
    let body = vec![
        const_("arr", array(vec![num(1.0), num(2.0)])),
        expr_stmt(assign(
            "deleted",
            Expr::new(ExprKind::Delete {
                object: Box::new(ident("arr")),
                prop: PropAccess::Static("length".into()),
            }),
        )),
        expr_stmt(assign("len", member(ident("arr"), "length"))),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("deleted").unwrap().as_boolean(), Some(false));
    assert_eq!(vm.get_global("len").unwrap().as_int32(), Some(2));
}

#[test]
fn test_typeof_unresolved_name() {
    let body = vec![expr_stmt(assign(
        "t",
        Expr::new(ExprKind::Unary {
            op: UnaryOp::TypeOf,
            expr: Box::new(ident("undefinedVar")),
        }),
    ))];
    let vm = run(body);
    let t = vm.get_global("t").unwrap();
    assert_eq!(t.as_string().unwrap().as_str(), "undefined");
}

#[test]
fn test_uncaught_throw_surfaces_to_host() {
    let mut vm = Paserati::new();
    let body = vec![throw_(str_("unhandled"))];
    let compiled = vm.compile(&program(body), "exceptions.ts").unwrap();
    let err = vm.interpret(compiled).unwrap_err();
    assert!(err.to_string().contains("unhandled"));
}
