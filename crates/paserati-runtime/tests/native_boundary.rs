//! Exceptions across the native boundary.
//!
//! bytecode → native → bytecode → throw must unwind through both native
//! frames into the script's catch, and the boundary sentinel must be
//! clear afterwards so later calls (class instantiation, more natives)
//! behave — the regression that once hung the engine.

mod common;

use common::*;
use paserati_runtime::ast::*;
use paserati_runtime::{Paserati, Value, VmError};

#[test]
fn test_native_throw_caught_by_script() {
    let mut vm = Paserati::new();
    // A JSON.parse-alike that rejects its input via the error channel
    vm.register_native("parseData", 1, |_, _args, _| {
        Err(VmError::SyntaxError(
            "Unexpected token i in JSON at position 1".to_string(),
        ))
    });

    let body = vec![
        expr_stmt(assign("caught", null())),
        try_catch(
            vec![expr_stmt(call(ident("parseData"), vec![str_("{invalid}")]))],
            "e",
            vec![expr_stmt(assign("caught", member(ident("e"), "name")))],
        ),
    ];
    let compiled = vm.compile(&program(body), "boundary.ts").unwrap();
    vm.interpret(compiled).unwrap();
    let name = vm.get_global("caught").unwrap();
    assert_eq!(name.as_string().unwrap().as_str(), "SyntaxError");
}

#[test]
fn test_throw_unwinds_through_reentrant_native() {
    let mut vm = Paserati::new();
    vm.register_native("parseData", 1, |_, _args, _| {
        Err(VmError::SyntaxError("Unexpected token".to_string()))
    });
    // An Array.prototype.map-alike: reenters the VM per element
    vm.register_native("mapOver", 2, |_, args, ncx| {
        let items = args
            .first()
            .and_then(|v| v.as_array().cloned())
            .map(|a| a.elements_vec())
            .unwrap_or_default();
        let callback = args.get(1).cloned().unwrap_or_else(Value::undefined);
        let out = std::sync::Arc::new(paserati_runtime::JsObject::array(0, Value::null()));
        for item in items {
            let mapped = ncx.call_function(&callback, Value::undefined(), &[item])?;
            out.push_element(mapped);
        }
        Ok(Value::array(out))
    });

    // try { mapOver([1,2], x => parseData(x)); } catch (e) { caught = e.name; }
    // function Widget() { this.ok = true; }
    // after = new Widget().ok;   <- must not hang after the unwind
    let body = vec![
        expr_stmt(assign("caught", null())),
        try_catch(
            vec![expr_stmt(call(
                ident("mapOver"),
                vec![
                    array(vec![num(1.0), num(2.0)]),
                    arrow(&["x"], vec![ret(call(ident("parseData"), vec![ident("x")]))]),
                ],
            ))],
            "e",
            vec![expr_stmt(assign("caught", member(ident("e"), "name")))],
        ),
        func_decl(
            "Widget",
            &[],
            vec![expr_stmt(assign_member(this(), "ok", boolean(true)))],
        ),
        expr_stmt(assign(
            "after",
            member(new_(ident("Widget"), vec![]), "ok"),
        )),
    ];
    let compiled = vm.compile(&program(body), "boundary.ts").unwrap();
    vm.interpret(compiled).unwrap();

    let name = vm.get_global("caught").unwrap();
    assert_eq!(name.as_string().unwrap().as_str(), "SyntaxError");
    assert_eq!(vm.get_global("after").unwrap().as_boolean(), Some(true));
    // The sentinel must be fully cleared once the turn is over
    assert!(!vm.context_mut().in_native());
}

#[test]
fn test_script_throw_crosses_native_into_outer_catch() {
    let mut vm = Paserati::new();
    vm.register_native("invoke", 1, |_, args, ncx| {
        let callback = args.first().cloned().unwrap_or_else(Value::undefined);
        ncx.call_function(&callback, Value::undefined(), &[])
    });

    // try { invoke(() => { throw "inner"; }); } catch (e) { got = e; }
    let body = vec![
        expr_stmt(assign("got", null())),
        try_catch(
            vec![expr_stmt(call(
                ident("invoke"),
                vec![arrow(&[], vec![throw_(str_("inner"))])],
            ))],
            "e",
            vec![expr_stmt(assign("got", ident("e")))],
        ),
    ];
    let compiled = vm.compile(&program(body), "boundary.ts").unwrap();
    vm.interpret(compiled).unwrap();
    let got = vm.get_global("got").unwrap();
    assert_eq!(got.as_string().unwrap().as_str(), "inner");
}

#[test]
fn test_uncaught_native_error_reaches_host_with_stack() {
    let mut vm = Paserati::new();
    vm.register_native("explode", 0, |_, _, _| {
        Err(VmError::type_error("exploded"))
    });
    let body = vec![func_decl(
        "boom",
        &[],
        vec![ret(call(ident("explode"), vec![]))],
    ), expr_stmt(call(ident("boom"), vec![]))];
    let compiled = vm.compile(&program(body), "boundary.ts").unwrap();
    let err = vm.interpret(compiled).unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("TypeError") || rendered.contains("exploded"));
    assert!(!vm.context_mut().in_native());
}
