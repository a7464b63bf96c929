//! Generator protocol, end to end: creation-time argument validation,
//! the next/throw/return state machine, and finally blocks across
//! suspensions.

mod common;

use common::*;
use paserati_runtime::ast::*;
use paserati_runtime::{Paserati, PropertyKey};

fn run(body: Vec<Stmt>) -> Paserati {
    let mut vm = Paserati::new();
    let program = vm.compile(&program(body), "generators.ts").unwrap();
    vm.interpret(program).unwrap();
    vm
}

fn result_pair(vm: &Paserati, name: &str) -> (Option<i32>, bool) {
    let obj = vm
        .get_global(name)
        .and_then(|v| v.as_object())
        .expect("iterator result object");
    let value = obj
        .get(&PropertyKey::string("value"))
        .and_then(|v| v.as_int32());
    let done = obj
        .get(&PropertyKey::string("done"))
        .and_then(|v| v.as_boolean())
        .unwrap_or(false);
    (value, done)
}

#[test]
fn test_next_sequence_is_deterministic() {
    // function* g() { yield 1; yield 2; return 3; }
    let body = vec![
        generator_decl(
            "g",
            vec![],
            vec![
                expr_stmt(yield_(num(1.0))),
                expr_stmt(yield_(num(2.0))),
                ret(num(3.0)),
            ],
        ),
        const_("it", call(ident("g"), vec![])),
        expr_stmt(assign("a", call_method(ident("it"), "next", vec![]))),
        expr_stmt(assign("b", call_method(ident("it"), "next", vec![]))),
        expr_stmt(assign("c", call_method(ident("it"), "next", vec![]))),
        expr_stmt(assign("d", call_method(ident("it"), "next", vec![]))),
    ];
    let vm = run(body);
    assert_eq!(result_pair(&vm, "a"), (Some(1), false));
    assert_eq!(result_pair(&vm, "b"), (Some(2), false));
    assert_eq!(result_pair(&vm, "c"), (Some(3), true));
    assert_eq!(result_pair(&vm, "d"), (None, true));
}

#[test]
fn test_sent_values_reach_the_yield_expression() {
    // function* g() { const got = yield 1; yield got + 1; }
    let body = vec![
        generator_decl(
            "g",
            vec![],
            vec![
                const_("got", yield_(num(1.0))),
                expr_stmt(yield_(add(ident("got"), num(1.0)))),
            ],
        ),
        const_("it", call(ident("g"), vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        expr_stmt(assign(
            "second",
            call_method(ident("it"), "next", vec![num(41.0)]),
        )),
    ];
    let vm = run(body);
    assert_eq!(result_pair(&vm, "second"), (Some(42), false));
}

#[test]
fn test_destructuring_param_throws_at_creation_time() {
    // function* g([x]) { yield x; }
    // try { g(null); } catch (e) { caught = true; }
    // The throw happens when g(null) runs — before any next() — and is
    // catchable by the surrounding try.
    let param = Param {
        pattern: Pattern::Array {
            elements: vec![Some(ArrayPatternElem {
                pattern: Pattern::Ident("x".into()),
                default: None,
            })],
            rest: None,
        },
        default: None,
    };
    let body = vec![
        generator_decl("g", vec![param], vec![expr_stmt(yield_(ident("x")))]),
        expr_stmt(assign("caught", boolean(false))),
        expr_stmt(assign("created", boolean(false))),
        try_catch(
            vec![
                expr_stmt(call(ident("g"), vec![null()])),
                expr_stmt(assign("created", boolean(true))),
            ],
            "e",
            vec![expr_stmt(assign("caught", boolean(true)))],
        ),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("caught").unwrap().as_boolean(), Some(true));
    assert_eq!(vm.get_global("created").unwrap().as_boolean(), Some(false));
}

#[test]
fn test_return_completes_and_prevents_further_yields() {
    let body = vec![
        generator_decl(
            "g",
            vec![],
            vec![
                expr_stmt(yield_(num(1.0))),
                expr_stmt(yield_(num(2.0))),
            ],
        ),
        const_("it", call(ident("g"), vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        expr_stmt(assign(
            "ret",
            call_method(ident("it"), "return", vec![num(5.0)]),
        )),
        expr_stmt(assign("after", call_method(ident("it"), "next", vec![]))),
    ];
    let vm = run(body);
    assert_eq!(result_pair(&vm, "ret"), (Some(5), true));
    assert_eq!(result_pair(&vm, "after"), (None, true));
}

#[test]
fn test_throw_into_suspended_generator_is_catchable_inside() {
    // function* g() { try { yield 1; } catch (e) { yield e + 1; } }
    let body = vec![
        generator_decl(
            "g",
            vec![],
            vec![try_catch(
                vec![expr_stmt(yield_(num(1.0)))],
                "e",
                vec![expr_stmt(yield_(add(ident("e"), num(1.0))))],
            )],
        ),
        const_("it", call(ident("g"), vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        expr_stmt(assign(
            "caught",
            call_method(ident("it"), "throw", vec![num(9.0)]),
        )),
    ];
    let vm = run(body);
    assert_eq!(result_pair(&vm, "caught"), (Some(10), false));
}

#[test]
fn test_throw_on_completed_generator_rethrows() {
    let body = vec![
        generator_decl("g", vec![], vec![ret(num(1.0))]),
        const_("it", call(ident("g"), vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        expr_stmt(assign("rethrown", null())),
        try_catch(
            vec![expr_stmt(call_method(
                ident("it"),
                "throw",
                vec![str_("boom")],
            ))],
            "e",
            vec![expr_stmt(assign("rethrown", ident("e")))],
        ),
    ];
    let vm = run(body);
    let rethrown = vm.get_global("rethrown").unwrap();
    assert_eq!(rethrown.as_string().unwrap().as_str(), "boom");
}

#[test]
fn test_finally_runs_on_generator_return() {
    // cleanup must run exactly once when return() unwinds a yield
    // inside try/finally
    let body = vec![
        expr_stmt(assign("cleanup", num(0.0))),
        generator_decl(
            "g",
            vec![],
            vec![Stmt::new(StmtKind::Try {
                block: vec![
                    expr_stmt(yield_(num(1.0))),
                    expr_stmt(yield_(num(2.0))),
                ],
                handler: None,
                finalizer: Some(vec![expr_stmt(assign(
                    "cleanup",
                    add(ident("cleanup"), num(1.0)),
                ))]),
            })],
        ),
        const_("it", call(ident("g"), vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        expr_stmt(assign(
            "ret",
            call_method(ident("it"), "return", vec![num(7.0)]),
        )),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("cleanup").unwrap().as_int32(), Some(1));
    assert_eq!(result_pair(&vm, "ret"), (Some(7), true));
}

#[test]
fn test_for_of_over_generator() {
    let body = vec![
        generator_decl(
            "g",
            vec![],
            vec![
                expr_stmt(yield_(num(1.0))),
                expr_stmt(yield_(num(2.0))),
                expr_stmt(yield_(num(3.0))),
            ],
        ),
        expr_stmt(assign("total", num(0.0))),
        Stmt::new(StmtKind::ForOf {
            left: ForHead::VarDecl {
                kind: DeclKind::Const,
                pattern: Pattern::Ident("x".into()),
            },
            iterable: call(ident("g"), vec![]),
            body: Box::new(expr_stmt(assign("total", add(ident("total"), ident("x"))))),
        }),
    ];
    let vm = run(body);
    assert_eq!(vm.get_global("total").unwrap().as_int32(), Some(6));
}
