//! Closure and upvalue semantics, end to end.
//!
//! The counter pattern is the canonical check that every closure over a
//! binding shares one cell: `make(0)` returns a closure whose `n++`
//! observes and mutates the captured binding across calls.

mod common;

use common::*;
use paserati_runtime::ast::*;
use paserati_runtime::{Paserati, Value};

fn run(body: Vec<Stmt>) -> Paserati {
    let mut vm = Paserati::new();
    let program = vm.compile(&program(body), "closures.ts").unwrap();
    vm.interpret(program).unwrap();
    vm
}

#[test]
fn test_counter_closure_returns_0_1_2() {
    // function make(n) { return () => n++; }
    // const f = make(0); a = f(); b = f(); c = f();
    let body = vec![
        func_decl(
            "make",
            &["n"],
            vec![ret(arrow(&[], vec![ret(post_inc("n"))]))],
        ),
        const_("f", call(ident("make"), vec![num(0.0)])),
        expr_stmt(assign("a", call(ident("f"), vec![]))),
        expr_stmt(assign("b", call(ident("f"), vec![]))),
        expr_stmt(assign("c", call(ident("f"), vec![]))),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("a").unwrap().as_int32(), Some(0));
    assert_eq!(vm.get_global("b").unwrap().as_int32(), Some(1));
    assert_eq!(vm.get_global("c").unwrap().as_int32(), Some(2));
}

#[test]
fn test_closures_over_same_binding_share_one_cell() {
    // function make(n) { return [() => n++, () => n]; }
    // const pair = make(10); pair[0](); observed = pair[1]();
    let body = vec![
        func_decl(
            "make",
            &["n"],
            vec![ret(array(vec![
                arrow(&[], vec![ret(post_inc("n"))]),
                arrow(&[], vec![ret(ident("n"))]),
            ]))],
        ),
        const_("pair", call(ident("make"), vec![num(10.0)])),
        expr_stmt(call(index(ident("pair"), num(0.0)), vec![])),
        expr_stmt(assign(
            "observed",
            call(index(ident("pair"), num(1.0)), vec![]),
        )),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("observed").unwrap().as_int32(), Some(11));
}

#[test]
fn test_loop_iterations_get_fresh_let_bindings() {
    // fs = []; for (let i = 0; i < 3; i++) { fs[i] = () => i; }
    // each closure sees its own iteration's value
    let loop_body = Stmt::new(StmtKind::Block(vec![expr_stmt(assign_index(
        ident("fs"),
        ident("i"),
        arrow(&[], vec![ret(ident("i"))]),
    ))]));
    let body = vec![
        expr_stmt(assign("fs", array(vec![]))),
        Stmt::new(StmtKind::For {
            init: Some(ForInit::VarDecl {
                kind: DeclKind::Let,
                declarations: vec![(Pattern::Ident("i".into()), Some(num(0.0)))],
            }),
            test: Some(bin(BinaryOp::Lt, ident("i"), num(3.0))),
            update: Some(post_inc("i")),
            body: Box::new(loop_body),
        }),
        expr_stmt(assign("r0", call(index(ident("fs"), num(0.0)), vec![]))),
        expr_stmt(assign("r2", call(index(ident("fs"), num(2.0)), vec![]))),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("r0").unwrap().as_int32(), Some(0));
    assert_eq!(vm.get_global("r2").unwrap().as_int32(), Some(2));
}

#[test]
fn test_arrow_captures_enclosing_this() {
    // o = { tag: 7, get: function() { return (() => this.tag)(); } };
    let get_fn = Expr::new(ExprKind::Function(Box::new(Function::new(
        None,
        vec![],
        vec![ret(call(arrow(&[], vec![ret(member(this(), "tag"))]), vec![]))],
    ))));
    let body = vec![
        const_(
            "o",
            Expr::new(ExprKind::Object(vec![
                ObjectProp::KeyValue {
                    key: PropName::Ident("tag".into()),
                    value: num(7.0),
                },
                ObjectProp::KeyValue {
                    key: PropName::Ident("get".into()),
                    value: get_fn,
                },
            ])),
        ),
        expr_stmt(assign("result", call_method(ident("o"), "get", vec![]))),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("result").unwrap().as_int32(), Some(7));
}

#[test]
fn test_tdz_read_through_closure_is_runtime_error() {
    // f = () => captured; r = null; try { f(); } catch (e) { r = e.name; }
    // let captured = 1;   <- closure runs before initialization
    let body = vec![
        const_("f", arrow(&[], vec![ret(ident("captured"))])),
        expr_stmt(assign("r", null())),
        try_catch(
            vec![expr_stmt(call(ident("f"), vec![]))],
            "e",
            vec![expr_stmt(assign("r", member(ident("e"), "name")))],
        ),
        let_("captured", num(1.0)),
    ];
    let vm = run(body);
    let name = vm.get_global("r").unwrap();
    assert_eq!(name.as_string().unwrap().as_str(), "ReferenceError");
}

#[test]
fn test_bound_function_behaves_like_direct_call() {
    let mut vm = Paserati::new();
    // Host-side bind: the BoundFunction value kind
    vm.register_native("bindTo", 2, |_, args, _| {
        let target = args.first().cloned().unwrap_or_else(Value::undefined);
        let this = args.get(1).cloned().unwrap_or_else(Value::undefined);
        let bound_args = args.get(2..).unwrap_or(&[]).to_vec();
        Ok(Value::bound_function(target, this, bound_args))
    });

    let body = vec![
        func_decl("tagOf", &[], vec![ret(member(this(), "tag"))]),
        const_("obj", object(vec![("tag", num(9.0))])),
        const_(
            "bound",
            call(ident("bindTo"), vec![ident("tagOf"), ident("obj")]),
        ),
        expr_stmt(assign("viaBound", call(ident("bound"), vec![]))),
        expr_stmt(assign(
            "viaMethod",
            call_method(
                Expr::new(ExprKind::Object(vec![
                    ObjectProp::KeyValue {
                        key: PropName::Ident("tag".into()),
                        value: num(9.0),
                    },
                    ObjectProp::KeyValue {
                        key: PropName::Ident("m".into()),
                        value: ident("tagOf"),
                    },
                ])),
                "m",
                vec![],
            ),
        )),
    ];
    let compiled = vm.compile(&program(body), "bind.ts").unwrap();
    vm.interpret(compiled).unwrap();
    assert_eq!(vm.get_global("viaBound").unwrap().as_int32(), Some(9));
    assert_eq!(vm.get_global("viaMethod").unwrap().as_int32(), Some(9));
}
