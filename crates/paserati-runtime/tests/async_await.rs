//! Async/await and the microtask queue: top-level await, reaction
//! ordering, and settlement through timers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use paserati_runtime::ast::*;
use paserati_runtime::{JsPromise, Paserati, Value};

/// Install a minimal `Promise.resolve` / `Promise.reject` surface — the
/// contract the VM expects the (out-of-scope) builtin library to provide.
fn vm_with_promise() -> Paserati {
    let mut vm = Paserati::new();
    let namespace = vm.register_namespace("Promise");
    namespace.set(
        paserati_runtime::PropertyKey::string("resolve"),
        Value::native_function("resolve", 1, |_, args, _| {
            let value = args.first().cloned().unwrap_or_else(Value::undefined);
            let promise = JsPromise::new();
            promise.resolve(value);
            Ok(Value::promise(promise))
        }),
    );
    namespace.set(
        paserati_runtime::PropertyKey::string("reject"),
        Value::native_function("reject", 1, |_, args, _| {
            let reason = args.first().cloned().unwrap_or_else(Value::undefined);
            Ok(Value::promise(JsPromise::rejected(reason)))
        }),
    );
    vm
}

#[test]
fn test_top_level_await_drains_microtasks() {
    // v = await Promise.resolve(42).then(x => x + 1);  =>  43
    let mut vm = vm_with_promise();
    let body = vec![expr_stmt(assign(
        "v",
        await_(call_method(
            call_method(ident("Promise"), "resolve", vec![num(42.0)]),
            "then",
            vec![arrow(&["x"], vec![ret(add(ident("x"), num(1.0)))])],
        )),
    ))];
    let compiled = vm.compile(&program(body), "async.ts").unwrap();
    vm.interpret(compiled).unwrap();
    assert_eq!(vm.get_global("v").unwrap().as_int32(), Some(43));
}

#[test]
fn test_async_function_returns_promise() {
    // async function f() { const a = await Promise.resolve(1); return a + 1; }
    // f().then(v => { r = v; });
    let mut vm = vm_with_promise();
    let body = vec![
        async_decl(
            "f",
            &[],
            vec![
                const_(
                    "a",
                    await_(call_method(ident("Promise"), "resolve", vec![num(1.0)])),
                ),
                ret(add(ident("a"), num(1.0))),
            ],
        ),
        expr_stmt(assign("r", num(0.0))),
        expr_stmt(call_method(
            call(ident("f"), vec![]),
            "then",
            vec![arrow(&["v"], vec![expr_stmt(assign("r", ident("v")))])],
        )),
    ];
    let compiled = vm.compile(&program(body), "async.ts").unwrap();
    vm.interpret(compiled).unwrap();
    assert_eq!(vm.get_global("r").unwrap().as_int32(), Some(2));
}

#[test]
fn test_reactions_run_in_fifo_order() {
    // Reactions enqueue in registration order; one scheduled during the
    // drain joins the same cycle.
    let mut vm = vm_with_promise();
    let append = |s: &str| {
        expr_stmt(call_method(
            call_method(ident("Promise"), "resolve", vec![num(0.0)]),
            "then",
            vec![arrow(
                &[],
                vec![expr_stmt(assign("order", add(ident("order"), str_(s))))],
            )],
        ))
    };
    let body = vec![
        expr_stmt(assign("order", str_(""))),
        append("a"),
        append("b"),
    ];
    let compiled = vm.compile(&program(body), "async.ts").unwrap();
    vm.interpret(compiled).unwrap();
    assert_eq!(
        vm.get_global("order")
            .unwrap()
            .as_string()
            .unwrap()
            .as_str(),
        "ab"
    );
}

#[test]
fn test_await_rejected_promise_is_catchable() {
    // async function f() { try { await Promise.reject("bad"); } catch (e) { return e; } }
    let mut vm = vm_with_promise();
    let body = vec![
        async_decl(
            "f",
            &[],
            vec![try_catch(
                vec![expr_stmt(await_(call_method(
                    ident("Promise"),
                    "reject",
                    vec![str_("bad")],
                )))],
                "e",
                vec![ret(ident("e"))],
            )],
        ),
        expr_stmt(assign("r", null())),
        expr_stmt(call_method(
            call(ident("f"), vec![]),
            "then",
            vec![arrow(&["v"], vec![expr_stmt(assign("r", ident("v")))])],
        )),
    ];
    let compiled = vm.compile(&program(body), "async.ts").unwrap();
    vm.interpret(compiled).unwrap();
    let r = vm.get_global("r").unwrap();
    assert_eq!(r.as_string().unwrap().as_str(), "bad");
}

#[test]
fn test_async_rejection_propagates_to_then_handler() {
    // async function f() { throw "oops"; }
    // f().then(undefined-handler, e => { got = e; })
    let mut vm = vm_with_promise();
    let body = vec![
        async_decl("f", &[], vec![throw_(str_("oops"))]),
        expr_stmt(assign("got", null())),
        expr_stmt(call_method(
            call(ident("f"), vec![]),
            "then",
            vec![
                undefined(),
                arrow(&["e"], vec![expr_stmt(assign("got", ident("e")))]),
            ],
        )),
    ];
    let compiled = vm.compile(&program(body), "async.ts").unwrap();
    vm.interpret(compiled).unwrap();
    let got = vm.get_global("got").unwrap();
    assert_eq!(got.as_string().unwrap().as_str(), "oops");
}

#[test]
fn test_await_plain_value_continues() {
    let mut vm = vm_with_promise();
    let body = vec![expr_stmt(assign("v", await_(num(5.0))))];
    let compiled = vm.compile(&program(body), "async.ts").unwrap();
    vm.interpret(compiled).unwrap();
    assert_eq!(vm.get_global("v").unwrap().as_int32(), Some(5));
}

#[test]
fn test_top_level_await_settled_by_timer() {
    // The awaited promise settles from a host timer; interpret() pumps
    // the event loop until it does.
    let mut vm = vm_with_promise();
    let pending = JsPromise::new();
    vm.set_global("pendingPromise", Value::promise(pending.clone()));

    let to_settle = Arc::clone(&pending);
    let settle = Value::native_function("settle", 0, move |_, _, _| {
        to_settle.resolve(Value::int32(99));
        Ok(Value::undefined())
    });
    vm.set_timeout(Duration::from_millis(5), settle);

    let body = vec![expr_stmt(assign("v", await_(ident("pendingPromise"))))];
    let compiled = vm.compile(&program(body), "async.ts").unwrap();
    vm.interpret(compiled).unwrap();
    assert_eq!(vm.get_global("v").unwrap().as_int32(), Some(99));
}

#[test]
fn test_unsettled_top_level_await_completes_with_promise() {
    // Nothing will ever settle this promise: the script's result is the
    // unsettled promise itself.
    let mut vm = vm_with_promise();
    vm.set_global("never", Value::promise(JsPromise::new()));
    let body = vec![expr_stmt(assign("v", await_(ident("never"))))];
    let compiled = vm.compile(&program(body), "async.ts").unwrap();
    let result = vm.interpret(compiled).unwrap();
    assert!(result.is_promise());
    assert!(result.as_promise().unwrap().is_pending());
}
