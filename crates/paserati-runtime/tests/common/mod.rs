//! AST builders shared by the integration suites.
//!
//! The front end (parser/checker) is outside this workspace, so tests
//! construct the typed AST directly.

#![allow(dead_code)]

use paserati_runtime::ast::*;

pub fn num(n: f64) -> Expr {
    Expr::new(ExprKind::Number(n))
}

pub fn str_(s: &str) -> Expr {
    Expr::new(ExprKind::String(s.to_string()))
}

pub fn boolean(b: bool) -> Expr {
    Expr::new(ExprKind::Bool(b))
}

pub fn undefined() -> Expr {
    Expr::new(ExprKind::Undefined)
}

pub fn null() -> Expr {
    Expr::new(ExprKind::Null)
}

pub fn ident(name: &str) -> Expr {
    Expr::new(ExprKind::Ident(name.to_string()))
}

pub fn this() -> Expr {
    Expr::new(ExprKind::This)
}

pub fn bin(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::new(ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

pub fn add(lhs: Expr, rhs: Expr) -> Expr {
    bin(BinaryOp::Add, lhs, rhs)
}

pub fn strict_eq(lhs: Expr, rhs: Expr) -> Expr {
    bin(BinaryOp::StrictEq, lhs, rhs)
}

pub fn cond(test: Expr, consequent: Expr, alternate: Expr) -> Expr {
    Expr::new(ExprKind::Cond {
        test: Box::new(test),
        consequent: Box::new(consequent),
        alternate: Box::new(alternate),
    })
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::Call {
        callee: Box::new(callee),
        args: args.into_iter().map(Argument::Expr).collect(),
        optional: false,
    })
}

pub fn call_method(object: Expr, name: &str, args: Vec<Expr>) -> Expr {
    call(member(object, name), args)
}

pub fn member(object: Expr, name: &str) -> Expr {
    Expr::new(ExprKind::Member {
        object: Box::new(object),
        prop: PropAccess::Static(name.to_string()),
        optional: false,
    })
}

pub fn index(object: Expr, key: Expr) -> Expr {
    Expr::new(ExprKind::Member {
        object: Box::new(object),
        prop: PropAccess::Computed(Box::new(key)),
        optional: false,
    })
}

pub fn new_(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::New {
        callee: Box::new(callee),
        args: args.into_iter().map(Argument::Expr).collect(),
    })
}

pub fn assign(name: &str, value: Expr) -> Expr {
    Expr::new(ExprKind::Assign {
        target: AssignTarget::Ident(name.to_string()),
        op: None,
        value: Box::new(value),
    })
}

pub fn assign_member(object: Expr, name: &str, value: Expr) -> Expr {
    Expr::new(ExprKind::Assign {
        target: AssignTarget::Member {
            object: Box::new(object),
            prop: PropAccess::Static(name.to_string()),
        },
        op: None,
        value: Box::new(value),
    })
}

pub fn assign_index(object: Expr, key: Expr, value: Expr) -> Expr {
    Expr::new(ExprKind::Assign {
        target: AssignTarget::Member {
            object: Box::new(object),
            prop: PropAccess::Computed(Box::new(key)),
        },
        op: None,
        value: Box::new(value),
    })
}

pub fn post_inc(name: &str) -> Expr {
    Expr::new(ExprKind::Update {
        increment: true,
        prefix: false,
        target: AssignTarget::Ident(name.to_string()),
    })
}

pub fn array(items: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::Array(
        items.into_iter().map(ArrayElement::Item).collect(),
    ))
}

pub fn object(props: Vec<(&str, Expr)>) -> Expr {
    Expr::new(ExprKind::Object(
        props
            .into_iter()
            .map(|(key, value)| ObjectProp::KeyValue {
                key: PropName::Ident(key.to_string()),
                value,
            })
            .collect(),
    ))
}

pub fn await_(expr: Expr) -> Expr {
    Expr::new(ExprKind::Await(Box::new(expr)))
}

pub fn yield_(expr: Expr) -> Expr {
    Expr::new(ExprKind::Yield {
        arg: Some(Box::new(expr)),
        delegate: false,
    })
}

// ---- statements ----

pub fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::new(StmtKind::Expr(expr))
}

pub fn let_(name: &str, init: Expr) -> Stmt {
    Stmt::new(StmtKind::VarDecl {
        kind: DeclKind::Let,
        declarations: vec![(Pattern::Ident(name.to_string()), Some(init))],
    })
}

pub fn const_(name: &str, init: Expr) -> Stmt {
    Stmt::new(StmtKind::VarDecl {
        kind: DeclKind::Const,
        declarations: vec![(Pattern::Ident(name.to_string()), Some(init))],
    })
}

pub fn const_pattern(pattern: Pattern, init: Expr) -> Stmt {
    Stmt::new(StmtKind::VarDecl {
        kind: DeclKind::Const,
        declarations: vec![(pattern, Some(init))],
    })
}

pub fn ret(expr: Expr) -> Stmt {
    Stmt::new(StmtKind::Return(Some(expr)))
}

pub fn ret_none() -> Stmt {
    Stmt::new(StmtKind::Return(None))
}

pub fn block(stmts: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::Block(stmts))
}

pub fn if_(test: Expr, consequent: Stmt) -> Stmt {
    Stmt::new(StmtKind::If {
        test,
        consequent: Box::new(consequent),
        alternate: None,
    })
}

pub fn throw_(expr: Expr) -> Stmt {
    Stmt::new(StmtKind::Throw(expr))
}

pub fn try_catch(block_stmts: Vec<Stmt>, param: &str, catch_body: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::Try {
        block: block_stmts,
        handler: Some(CatchClause {
            param: Some(Pattern::Ident(param.to_string())),
            body: catch_body,
        }),
        finalizer: None,
    })
}

pub fn try_finally(block_stmts: Vec<Stmt>, finalizer: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::Try {
        block: block_stmts,
        handler: None,
        finalizer: Some(finalizer),
    })
}

pub fn params(names: &[&str]) -> Vec<Param> {
    names
        .iter()
        .map(|name| Param {
            pattern: Pattern::Ident(name.to_string()),
            default: None,
        })
        .collect()
}

pub fn function(name: &str, param_names: &[&str], body: Vec<Stmt>) -> Function {
    Function::new(Some(name.to_string()), params(param_names), body)
}

pub fn func_decl(name: &str, param_names: &[&str], body: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::FunctionDecl(function(name, param_names, body)))
}

pub fn generator_decl(name: &str, param_patterns: Vec<Param>, body: Vec<Stmt>) -> Stmt {
    let mut func = Function::new(Some(name.to_string()), param_patterns, body);
    func.kind = FunctionKind::Generator;
    Stmt::new(StmtKind::FunctionDecl(func))
}

pub fn async_decl(name: &str, param_names: &[&str], body: Vec<Stmt>) -> Stmt {
    let mut func = Function::new(Some(name.to_string()), params(param_names), body);
    func.kind = FunctionKind::Async;
    Stmt::new(StmtKind::FunctionDecl(func))
}

pub fn func_expr(param_names: &[&str], body: Vec<Stmt>) -> Expr {
    Expr::new(ExprKind::Function(Box::new(Function::new(
        None,
        params(param_names),
        body,
    ))))
}

pub fn arrow(param_names: &[&str], body: Vec<Stmt>) -> Expr {
    let mut func = Function::new(None, params(param_names), body);
    func.kind = FunctionKind::Arrow;
    Expr::new(ExprKind::Function(Box::new(func)))
}

pub fn program(body: Vec<Stmt>) -> Program {
    Program::new(body)
}
