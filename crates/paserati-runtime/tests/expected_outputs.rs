//! Literal-output checks, run against a host-registered builtin surface.
//! The library itself lives with the host; these natives exercise the
//! registration and reentry contracts the VM promises it.

mod common;

use common::*;
use paserati_runtime::ast::*;
use paserati_runtime::{Paserati, PropertyKey, Value, VmError};

fn vm_with_builtins() -> Paserati {
    let mut vm = Paserati::new();

    let math = vm.register_namespace("Math");
    math.set(
        PropertyKey::string("abs"),
        Value::native_function("abs", 1, |_, args, _| {
            let n = args.first().and_then(|v| v.as_number()).unwrap_or(f64::NAN);
            Ok(Value::number(n.abs()))
        }),
    );
    math.set(
        PropertyKey::string("sqrt"),
        Value::native_function("sqrt", 1, |_, args, _| {
            let n = args.first().and_then(|v| v.as_number()).unwrap_or(f64::NAN);
            Ok(Value::number(n.sqrt()))
        }),
    );
    math.set(
        PropertyKey::string("pow"),
        Value::native_function("pow", 2, |_, args, _| {
            let base = args.first().and_then(|v| v.as_number()).unwrap_or(f64::NAN);
            let exp = args.get(1).and_then(|v| v.as_number()).unwrap_or(f64::NAN);
            Ok(Value::number(base.powf(exp)))
        }),
    );

    let string_proto = vm.register_constructor("String");
    string_proto.set(
        PropertyKey::string("trim"),
        Value::native_function("trim", 0, |this, _, _| {
            let s = this
                .as_string()
                .map(|s| s.as_str().trim().to_string())
                .unwrap_or_default();
            Ok(Value::str(&s))
        }),
    );

    let array_proto = vm.register_constructor("Array");
    array_proto.set(
        PropertyKey::string("reduce"),
        Value::native_function("reduce", 2, |this, args, ncx| {
            let elements = this
                .as_array()
                .map(|a| a.elements_vec())
                .ok_or_else(|| VmError::type_error("reduce called on non-array"))?;
            let callback = args
                .first()
                .cloned()
                .filter(|f| f.is_callable())
                .ok_or_else(|| VmError::type_error("reduce callback is not a function"))?;
            let mut acc = args.get(1).cloned().unwrap_or_else(Value::undefined);
            for (i, element) in elements.into_iter().enumerate() {
                acc = ncx.call_function(
                    &callback,
                    Value::undefined(),
                    &[acc, element, Value::int32(i as i32)],
                )?;
            }
            Ok(acc)
        }),
    );

    vm
}

fn eval_expr(vm: &mut Paserati, expr: Expr) -> Value {
    let body = vec![expr_stmt(assign("__result", expr))];
    let compiled = vm.compile(&program(body), "expected.ts").unwrap();
    vm.interpret(compiled).unwrap();
    vm.get_global("__result").unwrap()
}

#[test]
fn test_math_composite_is_17() {
    // Math.abs(-5) + Math.sqrt(16) + Math.pow(2, 3) => 17
    let mut vm = vm_with_builtins();
    let expr = add(
        add(
            call_method(ident("Math"), "abs", vec![num(-5.0)]),
            call_method(ident("Math"), "sqrt", vec![num(16.0)]),
        ),
        call_method(ident("Math"), "pow", vec![num(2.0), num(3.0)]),
    );
    assert_eq!(eval_expr(&mut vm, expr).as_number(), Some(17.0));
}

#[test]
fn test_trim_length_is_5() {
    // "  hello  ".trim().length => 5
    let mut vm = vm_with_builtins();
    let expr = member(call_method(str_("  hello  "), "trim", vec![]), "length");
    assert_eq!(eval_expr(&mut vm, expr).as_int32(), Some(5));
}

#[test]
fn test_reduce_sum_is_6() {
    // [1,2,3].reduce((a, b) => a + b, 0) => 6
    let mut vm = vm_with_builtins();
    let expr = call_method(
        array(vec![num(1.0), num(2.0), num(3.0)]),
        "reduce",
        vec![
            arrow(&["a", "b"], vec![ret(add(ident("a"), ident("b")))]),
            num(0.0),
        ],
    );
    assert_eq!(eval_expr(&mut vm, expr).as_int32(), Some(6));
}

#[test]
fn test_delete_object_literal_prop_is_true() {
    // delete ({a: 1}).a => true
    let mut vm = vm_with_builtins();
    let expr = Expr::new(ExprKind::Delete {
        object: Box::new(object(vec![("a", num(1.0))])),
        prop: PropAccess::Static("a".into()),
    });
    assert_eq!(eval_expr(&mut vm, expr).as_boolean(), Some(true));
}

#[test]
fn test_typeof_undefined_var_is_undefined() {
    let mut vm = vm_with_builtins();
    let expr = Expr::new(ExprKind::Unary {
        op: UnaryOp::TypeOf,
        expr: Box::new(ident("undefinedVar")),
    });
    assert_eq!(
        eval_expr(&mut vm, expr).as_string().unwrap().as_str(),
        "undefined"
    );
}

#[test]
fn test_string_concat_and_numeric_add() {
    let mut vm = vm_with_builtins();
    assert_eq!(
        eval_expr(&mut vm, add(num(1.0), num(2.0))).as_int32(),
        Some(3)
    );
    assert_eq!(
        eval_expr(&mut vm, add(str_("1"), num(2.0)))
            .as_string()
            .unwrap()
            .as_str(),
        "12"
    );
    // int32 overflow escapes to doubles
    assert_eq!(
        eval_expr(&mut vm, add(num(2147483647.0), num(1.0))).as_number(),
        Some(2147483648.0)
    );
}

#[test]
fn test_nan_comparisons() {
    let mut vm = vm_with_builtins();
    let nan = bin(BinaryOp::Div, num(0.0), num(0.0));
    assert_eq!(
        eval_expr(&mut vm, strict_eq(nan.clone(), nan)).as_boolean(),
        Some(false)
    );
    let zero_eq = strict_eq(num(0.0), Expr::new(ExprKind::Unary {
        op: UnaryOp::Neg,
        expr: Box::new(num(0.0)),
    }));
    assert_eq!(eval_expr(&mut vm, zero_eq).as_boolean(), Some(true));
}

#[test]
fn test_switch_with_fallthrough_and_default() {
    let mut vm = vm_with_builtins();
    // switch (2) { case 1: t += "one"; case 2: t += "two"; case 3: t += "three"; break; default: t += "other"; }
    let case = |n: f64, tag: &str, with_break: bool| {
        let mut body = vec![expr_stmt(assign("t", add(ident("t"), str_(tag))))];
        if with_break {
            body.push(Stmt::new(StmtKind::Break(None)));
        }
        SwitchCase {
            test: Some(num(n)),
            body,
        }
    };
    let body = vec![
        expr_stmt(assign("t", str_(""))),
        Stmt::new(StmtKind::Switch {
            discriminant: num(2.0),
            cases: vec![
                case(1.0, "one", false),
                case(2.0, "two", false),
                case(3.0, "three", true),
                SwitchCase {
                    test: None,
                    body: vec![expr_stmt(assign("t", add(ident("t"), str_("other"))))],
                },
            ],
        }),
    ];
    let compiled = vm.compile(&program(body), "expected.ts").unwrap();
    vm.interpret(compiled).unwrap();
    assert_eq!(
        vm.get_global("t").unwrap().as_string().unwrap().as_str(),
        "twothree"
    );
}
