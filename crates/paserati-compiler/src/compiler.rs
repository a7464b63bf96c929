//! AST lowering
//!
//! Walks the typed AST and emits register bytecode through [`CodeGen`].
//! Expressions compile into a register holding their value; statement
//! boundaries roll temporaries back. Control flow lowers to conditional
//! branches, exceptions to handler push/pop with pending completions,
//! and break/continue crossing protected regions inline the cleanup.

use paserati_bytecode::{
    ChunkIndex, ConstantIndex, ExceptionEntry, HandlerKind, Instruction, JumpOffset, LocalIndex,
    Program as BytecodeProgram, Register,
};

use crate::ast::*;
use crate::codegen::{CodeGen, ControlScope, Resolved};
use crate::error::{CompileError, CompileResult};

/// How a pattern consumes its source value
#[derive(Clone, Copy, PartialEq, Eq)]
enum BindMode {
    /// Initialize freshly declared bindings
    Declare,
    /// Assign through existing bindings / properties
    Assign,
}

/// The bytecode compiler
pub struct Compiler {
    cg: CodeGen,
}

impl Compiler {
    /// Create a compiler for one source origin
    pub fn new(origin: &str) -> Self {
        Self {
            cg: CodeGen::new(origin),
        }
    }

    /// Compile a whole program. The entry chunk is compiled as an async
    /// body when the top level awaits.
    pub fn compile(mut self, program: &Program) -> CompileResult<BytecodeProgram> {
        let kind = if stmts_contain_await(&program.body) {
            FunctionKind::Async
        } else {
            FunctionKind::Normal
        };
        self.cg.enter_function(Some("<main>".to_string()), kind);
        if kind == FunctionKind::Async {
            // Top-level await: detach immediately, before any user code
            self.cg.fc().emit(Instruction::CreateGenerator);
        }
        self.hoist_var_names(&program.body);
        self.hoist_block_prologue(&program.body)?;
        for stmt in &program.body {
            self.compile_stmt(stmt)?;
        }
        self.cg.fc().emit(Instruction::ReturnUndefined);
        let entry = self.cg.exit_function();
        Ok(self.cg.finish(entry))
    }

    fn err(&self, message: impl Into<String>, span: Span) -> CompileError {
        CompileError::compile(message, self.cg.origin(), span.line, span.column)
    }

    // ================================================================
    // Statements
    // ================================================================

    fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        self.cg.mark_span(stmt.span);
        let checkpoint = self.cg.fc().regs.position();
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                let reg = self.compile_expr(expr)?;
                self.cg.fc().regs.free(reg);
            }
            StmtKind::VarDecl { kind, declarations } => {
                self.compile_var_decl(*kind, declarations, stmt.span)?;
            }
            StmtKind::FunctionDecl(_) => {
                // Compiled by the enclosing block's hoist pass
            }
            StmtKind::ClassDecl(class) => {
                let value = self.compile_class_value(class, stmt.span)?;
                let name = class
                    .name
                    .clone()
                    .ok_or_else(|| self.err("class declaration requires a name", stmt.span))?;
                self.store_ident(&name, value, stmt.span, true)?;
                self.cg.fc().regs.free(value);
            }
            StmtKind::Return(arg) => {
                self.compile_return(arg.as_ref(), stmt.span)?;
            }
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                let cond = self.compile_expr(test)?;
                let jump_else = self.cg.fc().emit(Instruction::JumpIfFalse {
                    cond,
                    offset: JumpOffset(0),
                });
                self.cg.fc().regs.free(cond);
                self.compile_stmt(consequent)?;
                match alternate {
                    Some(alternate) => {
                        let jump_end = self.cg.fc().emit(Instruction::Jump {
                            offset: JumpOffset(0),
                        });
                        self.cg.fc().patch_jump_to_here(jump_else);
                        self.compile_stmt(alternate)?;
                        self.cg.fc().patch_jump_to_here(jump_end);
                    }
                    None => {
                        self.cg.fc().patch_jump_to_here(jump_else);
                    }
                }
            }
            StmtKind::Block(stmts) => {
                self.compile_block(stmts)?;
            }
            StmtKind::While { test, body } => {
                self.compile_while(None, test, body)?;
            }
            StmtKind::DoWhile { body, test } => {
                self.compile_do_while(None, body, test)?;
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                self.compile_for(None, init.as_ref(), test.as_ref(), update.as_ref(), body)?;
            }
            StmtKind::ForIn { left, object, body } => {
                self.compile_for_in(None, left, object, body)?;
            }
            StmtKind::ForOf {
                left,
                iterable,
                body,
            } => {
                self.compile_for_of(None, left, iterable, body)?;
            }
            StmtKind::Break(label) => {
                self.compile_break(label.as_deref(), stmt.span)?;
            }
            StmtKind::Continue(label) => {
                self.compile_continue(label.as_deref(), stmt.span)?;
            }
            StmtKind::Labeled { label, body } => {
                self.compile_labeled(label, body)?;
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                self.compile_switch(discriminant, cases)?;
            }
            StmtKind::Throw(expr) => {
                let src = self.compile_expr(expr)?;
                self.cg.fc().emit(Instruction::Throw { src });
                self.cg.fc().regs.free(src);
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => {
                self.compile_try(block, handler.as_ref(), finalizer.as_ref())?;
            }
            StmtKind::Empty => {}
        }
        self.cg.fc().regs.restore(checkpoint);
        Ok(())
    }

    fn compile_block(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        self.cg.fc().enter_scope();
        self.hoist_block_prologue(stmts)?;
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        self.close_scope();
        Ok(())
    }

    fn close_scope(&mut self) {
        let captured = self.cg.fc().exit_scope();
        for local in captured {
            self.cg.fc().emit(Instruction::CloseUpvalue {
                local_idx: LocalIndex(local),
            });
        }
    }

    /// Pre-declare the block's lexical bindings in the dead zone and
    /// hoist its function declarations.
    fn hoist_block_prologue(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        // Lexical declarations first: holes guard closures created by
        // hoisted functions that capture them.
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::VarDecl {
                    kind: kind @ (DeclKind::Let | DeclKind::Const),
                    declarations,
                } => {
                    let mut names = Vec::new();
                    for (pattern, _) in declarations {
                        pattern.bound_names(&mut names);
                    }
                    for name in names {
                        if self.cg.fc_ref().declared_in_current_scope(&name) {
                            return Err(self.err(
                                format!("Identifier '{}' has already been declared", name),
                                stmt.span,
                            ));
                        }
                        let local = self
                            .cg
                            .fc()
                            .declare(&name, *kind == DeclKind::Const, true);
                        let hole = self.cg.fc().regs.alloc();
                        self.cg.fc().emit(Instruction::LoadHole { dst: hole });
                        self.cg.fc().emit(Instruction::SetLocal {
                            idx: LocalIndex(local),
                            src: hole,
                        });
                        self.cg.fc().regs.free(hole);
                    }
                }
                StmtKind::ClassDecl(class) => {
                    if let Some(name) = &class.name {
                        let local = self.cg.fc().declare(name, false, true);
                        let hole = self.cg.fc().regs.alloc();
                        self.cg.fc().emit(Instruction::LoadHole { dst: hole });
                        self.cg.fc().emit(Instruction::SetLocal {
                            idx: LocalIndex(local),
                            src: hole,
                        });
                        self.cg.fc().regs.free(hole);
                    }
                }
                _ => {}
            }
        }

        // Function declarations: declare every name before compiling any
        // body, so mutually recursive functions resolve each other as
        // locals instead of globals.
        let mut hoisted = Vec::new();
        for stmt in stmts {
            if let StmtKind::FunctionDecl(func) = &stmt.kind {
                let name = func
                    .name
                    .clone()
                    .ok_or_else(|| self.err("function declaration requires a name", stmt.span))?;
                let local = self.cg.fc().declare(&name, false, false);
                hoisted.push((local, func));
            }
        }
        for (local, func) in hoisted {
            let chunk = self.compile_function(func)?;
            let dst = self.cg.fc().regs.alloc();
            self.cg.fc().emit(Instruction::MakeClosure {
                dst,
                chunk: ChunkIndex(chunk),
            });
            self.cg.fc().emit(Instruction::SetLocal {
                idx: LocalIndex(local),
                src: dst,
            });
            self.cg.fc().regs.free(dst);
        }
        Ok(())
    }

    /// Declare every `var`-bound name of the function body up front
    fn hoist_var_names(&mut self, stmts: &[Stmt]) {
        let mut names = Vec::new();
        collect_var_names(stmts, &mut names);
        for name in names {
            self.cg.fc().declare(&name, false, false);
        }
    }

    fn compile_var_decl(
        &mut self,
        kind: DeclKind,
        declarations: &[(Pattern, Option<Expr>)],
        span: Span,
    ) -> CompileResult<()> {
        for (pattern, init) in declarations {
            match init {
                Some(init) => {
                    let value = self.compile_expr(init)?;
                    self.bind_pattern(pattern, value, BindMode::Declare, span)?;
                    self.cg.fc().regs.free(value);
                }
                None => {
                    if kind == DeclKind::Const {
                        return Err(self.err("Missing initializer in const declaration", span));
                    }
                    // let x; initializes to undefined (ends the TDZ)
                    if let Pattern::Ident(name) = pattern {
                        let value = self.cg.fc().regs.alloc();
                        self.cg.fc().emit(Instruction::LoadUndefined { dst: value });
                        self.store_ident(name, value, span, true)?;
                        self.cg.fc().regs.free(value);
                    }
                }
            }
        }
        Ok(())
    }

    fn compile_return(&mut self, arg: Option<&Expr>, span: Span) -> CompileResult<()> {
        let Some(arg) = arg else {
            self.cg.fc().emit(Instruction::ReturnUndefined);
            return Ok(());
        };
        self.compile_return_expr(arg, span)
    }

    /// Compile an expression in return position. Both arms of a
    /// conditional are themselves in return position, so
    /// `return c ? f(x) : g(y)` tail-calls on either path.
    fn compile_return_expr(&mut self, arg: &Expr, span: Span) -> CompileResult<()> {
        if let ExprKind::Cond {
            test,
            consequent,
            alternate,
        } = &arg.kind
        {
            let cond = self.compile_expr(test)?;
            let jump_else = self.cg.fc().emit(Instruction::JumpIfFalse {
                cond,
                offset: JumpOffset(0),
            });
            self.cg.fc().regs.free(cond);
            self.compile_return_expr(consequent, span)?;
            self.cg.fc().patch_jump_to_here(jump_else);
            return self.compile_return_expr(alternate, span);
        }

        // Tail position: a plain call as the returned expression reuses
        // the frame, as long as no protected region needs this frame to
        // unwind through.
        if let ExprKind::Call {
            callee,
            args,
            optional: false,
        } = &arg.kind
        {
            let plain_callee = !matches!(callee.kind, ExprKind::Member { .. });
            let no_spread = args.iter().all(|a| matches!(a, Argument::Expr(_)));
            let kind = self.cg.fc_ref().kind;
            let tail_ok = plain_callee
                && no_spread
                && self.cg.fc_ref().handler_depth == 0
                && matches!(kind, FunctionKind::Normal | FunctionKind::Arrow);
            if tail_ok {
                let func = self.compile_expr(callee)?;
                let (first_arg, argc) = self.compile_args_block(args, span)?;
                self.cg.fc().emit(Instruction::TailCall {
                    func,
                    first_arg,
                    argc,
                });
                return Ok(());
            }
        }

        let src = self.compile_expr(arg)?;
        self.cg.fc().emit(Instruction::Return { src });
        self.cg.fc().regs.free(src);
        Ok(())
    }

    // ---- loops ----

    fn compile_while(
        &mut self,
        label: Option<&str>,
        test: &Expr,
        body: &Stmt,
    ) -> CompileResult<()> {
        let loop_start = self.cg.fc().current_index();
        let cond = self.compile_expr(test)?;
        let exit_jump = self.cg.fc().emit(Instruction::JumpIfFalse {
            cond,
            offset: JumpOffset(0),
        });
        self.cg.fc().regs.free(cond);

        self.cg.fc().control.push(ControlScope::Loop {
            label: label.map(str::to_string),
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            iter: None,
        });
        self.compile_stmt(body)?;
        let back = self.cg.fc().current_index();
        self.cg.fc().emit(Instruction::Jump {
            offset: JumpOffset((loop_start as i64 - back as i64) as i32),
        });
        self.cg.fc().patch_jump_to_here(exit_jump);
        self.finish_loop_scope(loop_start)?;
        Ok(())
    }

    fn compile_do_while(
        &mut self,
        label: Option<&str>,
        body: &Stmt,
        test: &Expr,
    ) -> CompileResult<()> {
        let loop_start = self.cg.fc().current_index();
        self.cg.fc().control.push(ControlScope::Loop {
            label: label.map(str::to_string),
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            iter: None,
        });
        self.compile_stmt(body)?;

        let continue_target = self.cg.fc().current_index();
        let cond = self.compile_expr(test)?;
        let back = self.cg.fc().current_index();
        self.cg.fc().emit(Instruction::JumpIfTrue {
            cond,
            offset: JumpOffset((loop_start as i64 - back as i64) as i32),
        });
        self.cg.fc().regs.free(cond);
        self.finish_loop_scope(continue_target)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_for(
        &mut self,
        label: Option<&str>,
        init: Option<&ForInit>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> CompileResult<()> {
        self.cg.fc().enter_scope();

        match init {
            Some(ForInit::VarDecl { kind, declarations }) => {
                if matches!(kind, DeclKind::Let | DeclKind::Const) {
                    let mut names = Vec::new();
                    for (pattern, _) in declarations {
                        pattern.bound_names(&mut names);
                    }
                    for name in &names {
                        self.cg.fc().declare(name, *kind == DeclKind::Const, true);
                    }
                }
                self.compile_var_decl(*kind, declarations, Span::default())?;
            }
            Some(ForInit::Expr(expr)) => {
                let reg = self.compile_expr(expr)?;
                self.cg.fc().regs.free(reg);
            }
            None => {}
        }

        let loop_start = self.cg.fc().current_index();
        let exit_jump = match test {
            Some(test) => {
                let cond = self.compile_expr(test)?;
                let jump = self.cg.fc().emit(Instruction::JumpIfFalse {
                    cond,
                    offset: JumpOffset(0),
                });
                self.cg.fc().regs.free(cond);
                Some(jump)
            }
            None => None,
        };

        self.cg.fc().control.push(ControlScope::Loop {
            label: label.map(str::to_string),
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            iter: None,
        });
        self.compile_stmt(body)?;

        // Per-iteration binding: captured loop variables detach here so
        // each iteration's closures see their own snapshot.
        let continue_target = self.cg.fc().current_index();
        for local in self.cg.fc_ref().captured_in_current_scope() {
            self.cg.fc().emit(Instruction::CloseUpvalue {
                local_idx: LocalIndex(local),
            });
        }
        if let Some(update) = update {
            let reg = self.compile_expr(update)?;
            self.cg.fc().regs.free(reg);
        }
        let back = self.cg.fc().current_index();
        self.cg.fc().emit(Instruction::Jump {
            offset: JumpOffset((loop_start as i64 - back as i64) as i32),
        });
        if let Some(jump) = exit_jump {
            self.cg.fc().patch_jump_to_here(jump);
        }
        self.finish_loop_scope(continue_target)?;
        self.close_scope();
        Ok(())
    }

    fn compile_for_in(
        &mut self,
        label: Option<&str>,
        left: &ForHead,
        object: &Expr,
        body: &Stmt,
    ) -> CompileResult<()> {
        self.cg.fc().enter_scope();

        let obj = self.compile_expr(object)?;
        let keys = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::ForInKeys { dst: keys, obj });
        self.cg.fc().regs.free(obj);

        let len = self.cg.fc().regs.alloc();
        let length_name = ConstantIndex(self.cg.add_string("length"));
        let ic = self.cg.fc().alloc_ic();
        self.cg.fc().emit(Instruction::GetProp {
            dst: len,
            obj: keys,
            name: length_name,
            ic,
        });

        let index = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::LoadInt32 {
            dst: index,
            value: 0,
        });

        let loop_start = self.cg.fc().current_index();
        let cond = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::Lt {
            dst: cond,
            lhs: index,
            rhs: len,
        });
        let exit_jump = self.cg.fc().emit(Instruction::JumpIfFalse {
            cond,
            offset: JumpOffset(0),
        });
        self.cg.fc().regs.free(cond);

        let key = self.cg.fc().regs.alloc();
        let elem_ic = self.cg.fc().alloc_ic();
        self.cg.fc().emit(Instruction::GetIndex {
            dst: key,
            obj: keys,
            key: index,
            ic: elem_ic,
        });
        self.bind_for_head(left, key)?;
        self.cg.fc().regs.free(key);

        self.cg.fc().control.push(ControlScope::Loop {
            label: label.map(str::to_string),
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            iter: None,
        });
        self.compile_stmt(body)?;

        let continue_target = self.cg.fc().current_index();
        for local in self.cg.fc_ref().captured_in_current_scope() {
            self.cg.fc().emit(Instruction::CloseUpvalue {
                local_idx: LocalIndex(local),
            });
        }
        self.cg.fc().emit(Instruction::Inc {
            dst: index,
            src: index,
        });
        let back = self.cg.fc().current_index();
        self.cg.fc().emit(Instruction::Jump {
            offset: JumpOffset((loop_start as i64 - back as i64) as i32),
        });
        self.cg.fc().patch_jump_to_here(exit_jump);
        self.finish_loop_scope(continue_target)?;

        self.cg.fc().regs.free(index);
        self.cg.fc().regs.free(len);
        self.cg.fc().regs.free(keys);
        self.close_scope();
        Ok(())
    }

    fn compile_for_of(
        &mut self,
        label: Option<&str>,
        left: &ForHead,
        iterable: &Expr,
        body: &Stmt,
    ) -> CompileResult<()> {
        self.cg.fc().enter_scope();

        let src = self.compile_expr(iterable)?;
        let iter = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::GetIterator { dst: iter, src });
        self.cg.fc().regs.free(src);

        // Abrupt completions (throw, return) close the iterator through
        // this finally; break/continue close it inline at the exit site.
        let handler = self.cg.fc().emit(Instruction::PushHandler {
            kind: HandlerKind::Finally,
            target: JumpOffset(0),
        });
        let region_start = self.cg.fc().current_index();
        self.cg.fc().handler_depth += 1;

        let loop_start = self.cg.fc().current_index();
        let value = self.cg.fc().regs.alloc();
        let done = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::IteratorNext {
            dst: value,
            done,
            iter,
        });
        let exit_jump = self.cg.fc().emit(Instruction::JumpIfTrue {
            cond: done,
            offset: JumpOffset(0),
        });
        self.bind_for_head(left, value)?;

        self.cg.fc().control.push(ControlScope::Loop {
            label: label.map(str::to_string),
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            iter: Some(iter),
        });
        self.compile_stmt(body)?;

        let continue_target = self.cg.fc().current_index();
        for local in self.cg.fc_ref().captured_in_current_scope() {
            self.cg.fc().emit(Instruction::CloseUpvalue {
                local_idx: LocalIndex(local),
            });
        }
        let back = self.cg.fc().current_index();
        self.cg.fc().emit(Instruction::Jump {
            offset: JumpOffset((loop_start as i64 - back as i64) as i32),
        });

        // Normal exhaustion: uninstall the handler, no return() call
        self.cg.fc().patch_jump_to_here(exit_jump);
        self.cg.fc().emit(Instruction::PopHandler);
        self.cg.fc().handler_depth -= 1;
        let end_jump = self.cg.fc().emit(Instruction::Jump {
            offset: JumpOffset(0),
        });

        // Abrupt path: close, then resume the pending completion
        let handler_pc = self.cg.fc().current_index();
        self.cg.fc().patch_jump_to_here(handler);
        self.cg.fc().emit(Instruction::IteratorClose { iter });
        self.cg.fc().emit(Instruction::EndFinally);
        self.cg.fc().exception_table.push(ExceptionEntry {
            start: region_start as u32,
            end: handler_pc as u32,
            handler: handler_pc as u32,
            kind: HandlerKind::Finally,
        });

        // Break sites did their own PopHandler + IteratorClose; they
        // land here, past the normal-exit cleanup.
        self.cg.fc().patch_jump_to_here(end_jump);
        self.finish_loop_scope(continue_target)?;
        self.cg.fc().regs.free(done);
        self.cg.fc().regs.free(value);
        self.cg.fc().regs.free(iter);
        self.close_scope();
        Ok(())
    }

    fn bind_for_head(&mut self, head: &ForHead, value: Register) -> CompileResult<()> {
        match head {
            ForHead::VarDecl { kind, pattern } => {
                if matches!(kind, DeclKind::Let | DeclKind::Const) {
                    let mut names = Vec::new();
                    pattern.bound_names(&mut names);
                    for name in &names {
                        if !self.cg.fc_ref().declared_in_current_scope(name) {
                            self.cg.fc().declare(name, *kind == DeclKind::Const, true);
                        }
                    }
                }
                self.bind_pattern(pattern, value, BindMode::Declare, Span::default())
            }
            ForHead::Pattern(pattern) => {
                self.bind_pattern(pattern, value, BindMode::Assign, Span::default())
            }
        }
    }

    /// Pop the finished loop scope, patching continue jumps to
    /// `continue_target` and break jumps to the current index.
    fn finish_loop_scope(&mut self, continue_target: usize) -> CompileResult<()> {
        let scope = self
            .cg
            .fc()
            .control
            .pop()
            .ok_or_else(|| self.err("unbalanced loop scope", Span::default()))?;
        let ControlScope::Loop {
            break_jumps,
            continue_jumps,
            ..
        } = scope
        else {
            return Err(self.err("unbalanced loop scope", Span::default()));
        };
        for jump in continue_jumps {
            let offset = (continue_target as i64 - jump as i64) as i32;
            self.cg.fc().patch_jump(jump, offset);
        }
        for jump in break_jumps {
            self.cg.fc().patch_jump_to_here(jump);
        }
        Ok(())
    }

    // ---- break / continue ----

    fn compile_break(&mut self, label: Option<&str>, span: Span) -> CompileResult<()> {
        self.compile_loop_exit(label, span, true)
    }

    fn compile_continue(&mut self, label: Option<&str>, span: Span) -> CompileResult<()> {
        self.compile_loop_exit(label, span, false)
    }

    fn compile_loop_exit(
        &mut self,
        label: Option<&str>,
        span: Span,
        is_break: bool,
    ) -> CompileResult<()> {
        enum Cleanup {
            Finally(Vec<Stmt>),
            Iter(Register),
        }

        // Walk the control stack innermost-out, collecting the cleanup
        // each crossed region requires.
        let mut cleanups: Vec<Cleanup> = Vec::new();
        let mut target: Option<usize> = None;
        for (i, scope) in self.cg.fc_ref().control.iter().enumerate().rev() {
            match scope {
                ControlScope::Loop {
                    label: scope_label,
                    iter,
                    ..
                } => {
                    let matches_label = match label {
                        Some(wanted) => scope_label.as_deref() == Some(wanted),
                        None => true,
                    };
                    if matches_label {
                        // Breaking out of a for-of closes its iterator;
                        // continue stays inside it.
                        if is_break {
                            if let Some(iter) = iter {
                                cleanups.push(Cleanup::Iter(*iter));
                            }
                        }
                        target = Some(i);
                        break;
                    }
                    // A labeled exit crossing an inner for-of entirely
                    if let Some(iter) = iter {
                        cleanups.push(Cleanup::Iter(*iter));
                    }
                }
                ControlScope::LabeledBlock {
                    label: scope_label, ..
                } => {
                    if is_break && label == Some(scope_label.as_str()) {
                        target = Some(i);
                        break;
                    }
                }
                ControlScope::Finally { body } => {
                    cleanups.push(Cleanup::Finally(body.clone()));
                }
                ControlScope::Switch { .. } => {
                    if is_break && label.is_none() {
                        target = Some(i);
                        break;
                    }
                }
            }
        }

        let Some(target) = target else {
            let what = if is_break { "break" } else { "continue" };
            return Err(self.err(format!("Illegal {} statement", what), span));
        };

        // Each crossed protected region: uninstall its handler, run its
        // cleanup inline, then leave.
        for cleanup in cleanups {
            self.cg.fc().emit(Instruction::PopHandler);
            match cleanup {
                Cleanup::Iter(iter) => {
                    self.cg.fc().emit(Instruction::IteratorClose { iter });
                }
                Cleanup::Finally(body) => {
                    for stmt in &body {
                        self.compile_stmt(stmt)?;
                    }
                }
            }
        }

        let jump = self.cg.fc().emit(Instruction::Jump {
            offset: JumpOffset(0),
        });
        match &mut self.cg.fc().control[target] {
            ControlScope::Loop {
                break_jumps,
                continue_jumps,
                ..
            } => {
                if is_break {
                    break_jumps.push(jump);
                } else {
                    continue_jumps.push(jump);
                }
            }
            ControlScope::LabeledBlock { break_jumps, .. } | ControlScope::Switch { break_jumps } => {
                break_jumps.push(jump);
            }
            ControlScope::Finally { .. } => unreachable!("finally cannot be an exit target"),
        }
        Ok(())
    }

    fn compile_labeled(&mut self, label: &str, body: &Stmt) -> CompileResult<()> {
        match &body.kind {
            StmtKind::While { test, body } => self.compile_while(Some(label), test, body),
            StmtKind::DoWhile { body, test } => self.compile_do_while(Some(label), body, test),
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => self.compile_for(Some(label), init.as_ref(), test.as_ref(), update.as_ref(), body),
            StmtKind::ForIn { left, object, body } => {
                self.compile_for_in(Some(label), left, object, body)
            }
            StmtKind::ForOf {
                left,
                iterable,
                body,
            } => self.compile_for_of(Some(label), left, iterable, body),
            _ => {
                self.cg.fc().control.push(ControlScope::LabeledBlock {
                    label: label.to_string(),
                    break_jumps: Vec::new(),
                });
                self.compile_stmt(body)?;
                let scope = self.cg.fc().control.pop();
                if let Some(ControlScope::LabeledBlock { break_jumps, .. }) = scope {
                    for jump in break_jumps {
                        self.cg.fc().patch_jump_to_here(jump);
                    }
                }
                Ok(())
            }
        }
    }

    fn compile_switch(&mut self, discriminant: &Expr, cases: &[SwitchCase]) -> CompileResult<()> {
        self.cg.fc().enter_scope();
        let disc = self.compile_expr(discriminant)?;

        // Dispatch: one fused equality branch per case, in source order
        let mut case_jumps = Vec::with_capacity(cases.len());
        let mut default_index = None;
        for (i, case) in cases.iter().enumerate() {
            match &case.test {
                Some(test) => {
                    let test_reg = self.compile_expr(test)?;
                    let jump = self.cg.fc().emit(Instruction::JumpIfEq {
                        lhs: disc,
                        rhs: test_reg,
                        offset: JumpOffset(0),
                    });
                    self.cg.fc().regs.free(test_reg);
                    case_jumps.push(Some(jump));
                }
                None => {
                    default_index = Some(i);
                    case_jumps.push(None);
                }
            }
        }
        let no_match_jump = self.cg.fc().emit(Instruction::Jump {
            offset: JumpOffset(0),
        });

        self.cg.fc().control.push(ControlScope::Switch {
            break_jumps: Vec::new(),
        });

        // Bodies in source order; execution falls through between them
        let mut default_pc = None;
        for (i, case) in cases.iter().enumerate() {
            let body_pc = self.cg.fc().current_index();
            if let Some(jump) = case_jumps[i] {
                self.cg.fc().patch_jump_to_here(jump);
            }
            if default_index == Some(i) {
                default_pc = Some(body_pc);
            }
            for stmt in &case.body {
                self.compile_stmt(stmt)?;
            }
        }

        // No matching case: jump to default if present, else past the end
        match default_pc {
            Some(pc) => {
                let offset = (pc as i64 - no_match_jump as i64) as i32;
                self.cg.fc().patch_jump(no_match_jump, offset);
            }
            None => {
                self.cg.fc().patch_jump_to_here(no_match_jump);
            }
        }

        let scope = self.cg.fc().control.pop();
        if let Some(ControlScope::Switch { break_jumps }) = scope {
            for jump in break_jumps {
                self.cg.fc().patch_jump_to_here(jump);
            }
        }
        self.cg.fc().regs.free(disc);
        self.close_scope();
        Ok(())
    }

    // ---- exceptions ----

    fn compile_try(
        &mut self,
        block: &[Stmt],
        handler: Option<&CatchClause>,
        finalizer: Option<&Vec<Stmt>>,
    ) -> CompileResult<()> {
        // finally wraps the whole try/catch
        let finally_push = finalizer.map(|body| {
            let index = self.cg.fc().emit(Instruction::PushHandler {
                kind: HandlerKind::Finally,
                target: JumpOffset(0),
            });
            self.cg.fc().handler_depth += 1;
            self.cg.fc().control.push(ControlScope::Finally {
                body: body.clone(),
            });
            index
        });
        let finally_region_start = self.cg.fc().current_index();

        let catch_push = handler.map(|_| {
            let index = self.cg.fc().emit(Instruction::PushHandler {
                kind: HandlerKind::Catch,
                target: JumpOffset(0),
            });
            self.cg.fc().handler_depth += 1;
            index
        });
        let catch_region_start = self.cg.fc().current_index();

        self.compile_block(block)?;

        let mut after_catch_jump = None;
        if let Some(catch_push) = catch_push {
            let region_end = self.cg.fc().current_index();
            self.cg.fc().emit(Instruction::PopHandler);
            self.cg.fc().handler_depth -= 1;
            after_catch_jump = Some(self.cg.fc().emit(Instruction::Jump {
                offset: JumpOffset(0),
            }));

            let catch_pc = self.cg.fc().current_index();
            self.cg.fc().patch_jump_to_here(catch_push);
            self.cg.fc().exception_table.push(ExceptionEntry {
                start: catch_region_start as u32,
                end: region_end as u32,
                handler: catch_pc as u32,
                kind: HandlerKind::Catch,
            });

            let clause = handler.expect("catch clause checked above");
            self.cg.fc().enter_scope();
            let exc = self.cg.fc().regs.alloc();
            self.cg.fc().emit(Instruction::Catch { dst: exc });
            if let Some(param) = &clause.param {
                let mut names = Vec::new();
                param.bound_names(&mut names);
                for name in &names {
                    self.cg.fc().declare(name, false, true);
                }
                self.bind_pattern(param, exc, BindMode::Declare, Span::default())?;
            }
            self.cg.fc().regs.free(exc);
            self.hoist_block_prologue(&clause.body)?;
            for stmt in &clause.body {
                self.compile_stmt(stmt)?;
            }
            self.close_scope();
        }
        if let Some(jump) = after_catch_jump {
            self.cg.fc().patch_jump_to_here(jump);
        }

        if let Some(finally_push) = finally_push {
            let body = finalizer.expect("finalizer checked above").clone();
            self.cg.fc().control.pop();
            let region_end = self.cg.fc().current_index();
            self.cg.fc().emit(Instruction::PopHandler);
            self.cg.fc().handler_depth -= 1;

            // Normal fallthrough copy of the finally body
            for stmt in &body {
                self.compile_stmt(stmt)?;
            }
            let end_jump = self.cg.fc().emit(Instruction::Jump {
                offset: JumpOffset(0),
            });

            // Abrupt copy: entered by the runtime with the completion
            // stashed; EndFinally resumes it
            let handler_pc = self.cg.fc().current_index();
            self.cg.fc().patch_jump_to_here(finally_push);
            self.cg.fc().exception_table.push(ExceptionEntry {
                start: finally_region_start as u32,
                end: region_end as u32,
                handler: handler_pc as u32,
                kind: HandlerKind::Finally,
            });
            for stmt in &body {
                self.compile_stmt(stmt)?;
            }
            self.cg.fc().emit(Instruction::EndFinally);
            self.cg.fc().patch_jump_to_here(end_jump);
        }
        Ok(())
    }

    // ================================================================
    // Expressions
    // ================================================================

    fn compile_expr(&mut self, expr: &Expr) -> CompileResult<Register> {
        self.cg.mark_span(expr.span);
        match &expr.kind {
            ExprKind::Number(n) => {
                let dst = self.cg.fc().regs.alloc();
                if n.fract() == 0.0
                    && *n >= i32::MIN as f64
                    && *n <= i32::MAX as f64
                    && (*n != 0.0 || n.is_sign_positive())
                {
                    self.cg.fc().emit(Instruction::LoadInt32 {
                        dst,
                        value: *n as i32,
                    });
                } else {
                    let idx = ConstantIndex(self.cg.add_number(*n));
                    self.cg.fc().emit(Instruction::LoadConst { dst, idx });
                }
                Ok(dst)
            }
            ExprKind::String(s) => {
                let idx = ConstantIndex(self.cg.add_string(s));
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::LoadConst { dst, idx });
                Ok(dst)
            }
            ExprKind::Bool(b) => {
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(if *b {
                    Instruction::LoadTrue { dst }
                } else {
                    Instruction::LoadFalse { dst }
                });
                Ok(dst)
            }
            ExprKind::Null => {
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::LoadNull { dst });
                Ok(dst)
            }
            ExprKind::Undefined => {
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::LoadUndefined { dst });
                Ok(dst)
            }
            ExprKind::BigInt(digits) => {
                let idx = ConstantIndex(self.cg.add_bigint(digits));
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::LoadConst { dst, idx });
                Ok(dst)
            }
            ExprKind::RegExp { pattern, flags } => {
                let idx = ConstantIndex(self.cg.add_regexp(pattern, flags));
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::LoadConst { dst, idx });
                Ok(dst)
            }
            ExprKind::Ident(name) => self.load_ident(name, expr.span),
            ExprKind::This => {
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::LoadThis { dst });
                Ok(dst)
            }
            ExprKind::Array(elements) => self.compile_array_literal(elements),
            ExprKind::Object(props) => self.compile_object_literal(props, expr.span),
            ExprKind::Function(func) => {
                let chunk = self.compile_function(func)?;
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::MakeClosure {
                    dst,
                    chunk: ChunkIndex(chunk),
                });
                Ok(dst)
            }
            ExprKind::Class(class) => self.compile_class_value(class, expr.span),
            ExprKind::Unary { op, expr: operand } => self.compile_unary(*op, operand, expr.span),
            ExprKind::Delete { object, prop } => self.compile_delete(object, prop, expr.span),
            ExprKind::Binary { op, lhs, rhs } => self.compile_binary(*op, lhs, rhs),
            ExprKind::Logical { op, lhs, rhs } => self.compile_logical(*op, lhs, rhs),
            ExprKind::Assign { target, op, value } => {
                self.compile_assign(target, *op, value, expr.span)
            }
            ExprKind::Update {
                increment,
                prefix,
                target,
            } => self.compile_update(*increment, *prefix, target, expr.span),
            ExprKind::Cond {
                test,
                consequent,
                alternate,
            } => {
                let dst = self.cg.fc().regs.alloc();
                let cond = self.compile_expr(test)?;
                let jump_else = self.cg.fc().emit(Instruction::JumpIfFalse {
                    cond,
                    offset: JumpOffset(0),
                });
                self.cg.fc().regs.free(cond);

                let then_reg = self.compile_expr(consequent)?;
                self.cg.fc().emit(Instruction::Move {
                    dst,
                    src: then_reg,
                });
                self.cg.fc().regs.free(then_reg);
                let jump_end = self.cg.fc().emit(Instruction::Jump {
                    offset: JumpOffset(0),
                });

                self.cg.fc().patch_jump_to_here(jump_else);
                let else_reg = self.compile_expr(alternate)?;
                self.cg.fc().emit(Instruction::Move {
                    dst,
                    src: else_reg,
                });
                self.cg.fc().regs.free(else_reg);
                self.cg.fc().patch_jump_to_here(jump_end);
                Ok(dst)
            }
            ExprKind::Call {
                callee,
                args,
                optional,
            } => self.compile_call(callee, args, *optional, expr.span),
            ExprKind::New { callee, args } => self.compile_new(callee, args, expr.span),
            ExprKind::Member {
                object,
                prop,
                optional,
            } => self.compile_member(object, prop, *optional, expr.span),
            ExprKind::Yield { arg, delegate } => self.compile_yield(arg.as_deref(), *delegate, expr.span),
            ExprKind::Await(arg) => {
                if self.cg.fc_ref().kind != FunctionKind::Async {
                    return Err(self.err("await is only valid in async functions", expr.span));
                }
                let src = self.compile_expr(arg)?;
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::Await { dst, src });
                self.cg.fc().regs.free(src);
                Ok(dst)
            }
            ExprKind::Sequence(exprs) => {
                let mut last = None;
                for (i, e) in exprs.iter().enumerate() {
                    let reg = self.compile_expr(e)?;
                    if i + 1 == exprs.len() {
                        last = Some(reg);
                    } else {
                        self.cg.fc().regs.free(reg);
                    }
                }
                last.ok_or_else(|| self.err("empty sequence expression", expr.span))
            }
        }
    }

    fn load_ident(&mut self, name: &str, span: Span) -> CompileResult<Register> {
        let dst = self.cg.fc().regs.alloc();
        match self.cg.resolve(name) {
            Resolved::Local { tdz_live: true, .. } => {
                return Err(self.err(
                    format!("Cannot access '{}' before initialization", name),
                    span,
                ));
            }
            Resolved::Local { index, .. } => {
                self.cg.fc().emit(Instruction::GetLocal {
                    dst,
                    idx: LocalIndex(index),
                });
            }
            Resolved::Upvalue { index, tdz, .. } => {
                if tdz {
                    let name_idx = ConstantIndex(self.cg.add_string(name));
                    self.cg.fc().emit(Instruction::GetUpvalueChecked {
                        dst,
                        idx: LocalIndex(index),
                        name: name_idx,
                    });
                } else {
                    self.cg.fc().emit(Instruction::GetUpvalue {
                        dst,
                        idx: LocalIndex(index),
                    });
                }
            }
            Resolved::Global(name) => {
                let name_idx = ConstantIndex(self.cg.add_string(&name));
                self.cg.fc().emit(Instruction::GetGlobal {
                    dst,
                    name: name_idx,
                });
            }
        }
        Ok(dst)
    }

    /// Store `src` into a named binding. `declaring` marks pattern /
    /// declaration initialization, which may write into the dead zone
    /// (ending it) and into const bindings.
    fn store_ident(
        &mut self,
        name: &str,
        src: Register,
        span: Span,
        declaring: bool,
    ) -> CompileResult<()> {
        match self.cg.resolve(name) {
            Resolved::Local {
                index,
                is_const,
                tdz_live,
                ..
            } => {
                if !declaring {
                    if is_const {
                        return Err(
                            self.err("Assignment to constant variable", span)
                        );
                    }
                    if tdz_live {
                        return Err(self.err(
                            format!("Cannot access '{}' before initialization", name),
                            span,
                        ));
                    }
                }
                self.cg.fc().emit(Instruction::SetLocal {
                    idx: LocalIndex(index),
                    src,
                });
                if declaring {
                    self.cg.fc().clear_tdz(name);
                }
            }
            Resolved::Upvalue {
                index,
                is_const,
                tdz,
            } => {
                if is_const && !declaring {
                    return Err(self.err("Assignment to constant variable", span));
                }
                if tdz && !declaring {
                    let name_idx = ConstantIndex(self.cg.add_string(name));
                    self.cg.fc().emit(Instruction::SetUpvalueChecked {
                        idx: LocalIndex(index),
                        src,
                        name: name_idx,
                    });
                } else {
                    self.cg.fc().emit(Instruction::SetUpvalue {
                        idx: LocalIndex(index),
                        src,
                    });
                }
            }
            Resolved::Global(name) => {
                let name_idx = ConstantIndex(self.cg.add_string(&name));
                self.cg.fc().emit(Instruction::SetGlobal {
                    name: name_idx,
                    src,
                });
            }
        }
        Ok(())
    }

    fn compile_array_literal(&mut self, elements: &[ArrayElement]) -> CompileResult<Register> {
        let dst = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::NewArray { dst, len: 0 });
        for element in elements {
            match element {
                ArrayElement::Item(expr) => {
                    let src = self.compile_expr(expr)?;
                    self.cg.fc().emit(Instruction::AppendArray { arr: dst, src });
                    self.cg.fc().regs.free(src);
                }
                ArrayElement::Spread(expr) => {
                    let src = self.compile_expr(expr)?;
                    self.cg
                        .fc()
                        .emit(Instruction::AppendSpread { arr: dst, src });
                    self.cg.fc().regs.free(src);
                }
                ArrayElement::Hole => {
                    let src = self.cg.fc().regs.alloc();
                    self.cg.fc().emit(Instruction::LoadHole { dst: src });
                    self.cg.fc().emit(Instruction::AppendArray { arr: dst, src });
                    self.cg.fc().regs.free(src);
                }
            }
        }
        Ok(dst)
    }

    fn compile_object_literal(
        &mut self,
        props: &[ObjectProp],
        span: Span,
    ) -> CompileResult<Register> {
        let dst = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::NewObject { dst });
        for prop in props {
            match prop {
                ObjectProp::KeyValue { key, value } => {
                    self.compile_object_member(dst, key, value, span)?;
                }
                ObjectProp::Shorthand(name) => {
                    let value = self.load_ident(name, span)?;
                    let name_idx = ConstantIndex(self.cg.add_string(name));
                    let ic = self.cg.fc().alloc_ic();
                    self.cg.fc().emit(Instruction::SetProp {
                        obj: dst,
                        name: name_idx,
                        src: value,
                        ic,
                    });
                    self.cg.fc().regs.free(value);
                }
                ObjectProp::Method { key, func } => {
                    let chunk = self.compile_function(func)?;
                    let value = self.cg.fc().regs.alloc();
                    self.cg.fc().emit(Instruction::MakeClosure {
                        dst: value,
                        chunk: ChunkIndex(chunk),
                    });
                    self.store_object_key(dst, key, value, span)?;
                    self.cg.fc().regs.free(value);
                }
                ObjectProp::Getter { key, func } => {
                    let key_reg = self.prop_name_register(key, span)?;
                    let chunk = self.compile_function(func)?;
                    let value = self.cg.fc().regs.alloc();
                    self.cg.fc().emit(Instruction::MakeClosure {
                        dst: value,
                        chunk: ChunkIndex(chunk),
                    });
                    self.cg.fc().emit(Instruction::DefineGetter {
                        obj: dst,
                        key: key_reg,
                        func: value,
                    });
                    self.cg.fc().regs.free(value);
                    self.cg.fc().regs.free(key_reg);
                }
                ObjectProp::Setter { key, func } => {
                    let key_reg = self.prop_name_register(key, span)?;
                    let chunk = self.compile_function(func)?;
                    let value = self.cg.fc().regs.alloc();
                    self.cg.fc().emit(Instruction::MakeClosure {
                        dst: value,
                        chunk: ChunkIndex(chunk),
                    });
                    self.cg.fc().emit(Instruction::DefineSetter {
                        obj: dst,
                        key: key_reg,
                        func: value,
                    });
                    self.cg.fc().regs.free(value);
                    self.cg.fc().regs.free(key_reg);
                }
                ObjectProp::Spread(expr) => {
                    let src = self.compile_expr(expr)?;
                    self.cg
                        .fc()
                        .emit(Instruction::CopyDataProps { dst, src });
                    self.cg.fc().regs.free(src);
                }
            }
        }
        Ok(dst)
    }

    fn compile_object_member(
        &mut self,
        obj: Register,
        key: &PropName,
        value: &Expr,
        span: Span,
    ) -> CompileResult<()> {
        // Evaluation order: key, then value
        match key {
            PropName::Ident(name) | PropName::String(name) => {
                let value_reg = self.compile_expr(value)?;
                let name_idx = ConstantIndex(self.cg.add_string(name));
                let ic = self.cg.fc().alloc_ic();
                self.cg.fc().emit(Instruction::SetProp {
                    obj,
                    name: name_idx,
                    src: value_reg,
                    ic,
                });
                self.cg.fc().regs.free(value_reg);
            }
            _ => {
                let key_reg = self.prop_name_register(key, span)?;
                let value_reg = self.compile_expr(value)?;
                let ic = self.cg.fc().alloc_ic();
                self.cg.fc().emit(Instruction::SetIndex {
                    obj,
                    key: key_reg,
                    src: value_reg,
                    ic,
                });
                self.cg.fc().regs.free(value_reg);
                self.cg.fc().regs.free(key_reg);
            }
        }
        Ok(())
    }

    fn store_object_key(
        &mut self,
        obj: Register,
        key: &PropName,
        value: Register,
        span: Span,
    ) -> CompileResult<()> {
        match key {
            PropName::Ident(name) | PropName::String(name) => {
                let name_idx = ConstantIndex(self.cg.add_string(name));
                let ic = self.cg.fc().alloc_ic();
                self.cg.fc().emit(Instruction::SetProp {
                    obj,
                    name: name_idx,
                    src: value,
                    ic,
                });
            }
            _ => {
                let key_reg = self.prop_name_register(key, span)?;
                let ic = self.cg.fc().alloc_ic();
                self.cg.fc().emit(Instruction::SetIndex {
                    obj,
                    key: key_reg,
                    src: value,
                    ic,
                });
                self.cg.fc().regs.free(key_reg);
            }
        }
        Ok(())
    }

    /// Materialize a property name into a register
    fn prop_name_register(&mut self, key: &PropName, span: Span) -> CompileResult<Register> {
        match key {
            PropName::Ident(name) | PropName::String(name) => {
                let idx = ConstantIndex(self.cg.add_string(name));
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::LoadConst { dst, idx });
                Ok(dst)
            }
            PropName::Number(n) => {
                let dst = self.cg.fc().regs.alloc();
                let idx = ConstantIndex(self.cg.add_number(*n));
                self.cg.fc().emit(Instruction::LoadConst { dst, idx });
                Ok(dst)
            }
            PropName::Computed(expr) => self.compile_expr(expr),
            PropName::Private(name) => {
                let Some(idx) = self.cg.resolve_private(name) else {
                    return Err(self.err(
                        format!("Private field '#{}' must be declared in an enclosing class", name),
                        span,
                    ));
                };
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::LoadConst {
                    dst,
                    idx: ConstantIndex(idx),
                });
                Ok(dst)
            }
        }
    }

    fn compile_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> CompileResult<Register> {
        // typeof on an unresolved name must not throw ReferenceError
        if op == UnaryOp::TypeOf {
            if let ExprKind::Ident(name) = &operand.kind {
                if matches!(self.cg.resolve(name), Resolved::Global(_)) {
                    let name_idx = ConstantIndex(self.cg.add_string(name));
                    let dst = self.cg.fc().regs.alloc();
                    self.cg.fc().emit(Instruction::TypeOfName {
                        dst,
                        name: name_idx,
                    });
                    return Ok(dst);
                }
            }
        }

        let src = self.compile_expr(operand)?;
        let dst = self.cg.fc().regs.alloc();
        match op {
            UnaryOp::Neg => {
                self.cg.fc().emit(Instruction::Neg { dst, src });
            }
            UnaryOp::Plus => {
                self.cg.fc().emit(Instruction::ToNumber { dst, src });
            }
            UnaryOp::Not => {
                self.cg.fc().emit(Instruction::Not { dst, src });
            }
            UnaryOp::BitNot => {
                self.cg.fc().emit(Instruction::BitNot { dst, src });
            }
            UnaryOp::TypeOf => {
                self.cg.fc().emit(Instruction::TypeOf { dst, src });
            }
            UnaryOp::Void => {
                self.cg.fc().emit(Instruction::LoadUndefined { dst });
            }
        }
        self.cg.fc().regs.free(src);
        let _ = span;
        Ok(dst)
    }

    fn compile_delete(
        &mut self,
        object: &Expr,
        prop: &PropAccess,
        span: Span,
    ) -> CompileResult<Register> {
        let obj = self.compile_expr(object)?;
        let key = match prop {
            PropAccess::Static(name) => {
                let idx = ConstantIndex(self.cg.add_string(name));
                let key = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::LoadConst { dst: key, idx });
                key
            }
            PropAccess::Computed(expr) => self.compile_expr(expr)?,
            PropAccess::Private(_) => {
                return Err(self.err("Private fields can not be deleted", span));
            }
        };
        let dst = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::DeleteProp { dst, obj, key });
        self.cg.fc().regs.free(key);
        self.cg.fc().regs.free(obj);
        Ok(dst)
    }

    fn compile_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> CompileResult<Register> {
        // `x === null` / `x === undefined` / `x == null` dominate real
        // code; the single-register tests skip the generic comparison's
        // scratch registers.
        if let Some(result) = self.try_nullish_test(op, lhs, rhs)? {
            return Ok(result);
        }
        let lhs = self.compile_expr(lhs)?;
        let rhs = self.compile_expr(rhs)?;
        let dst = self.cg.fc().regs.alloc();
        let instruction = match op {
            BinaryOp::Add => Instruction::Add { dst, lhs, rhs },
            BinaryOp::Sub => Instruction::Sub { dst, lhs, rhs },
            BinaryOp::Mul => Instruction::Mul { dst, lhs, rhs },
            BinaryOp::Div => Instruction::Div { dst, lhs, rhs },
            BinaryOp::Mod => Instruction::Mod { dst, lhs, rhs },
            BinaryOp::Pow => Instruction::Pow { dst, lhs, rhs },
            BinaryOp::BitAnd => Instruction::BitAnd { dst, lhs, rhs },
            BinaryOp::BitOr => Instruction::BitOr { dst, lhs, rhs },
            BinaryOp::BitXor => Instruction::BitXor { dst, lhs, rhs },
            BinaryOp::Shl => Instruction::Shl { dst, lhs, rhs },
            BinaryOp::Shr => Instruction::Shr { dst, lhs, rhs },
            BinaryOp::Ushr => Instruction::Ushr { dst, lhs, rhs },
            BinaryOp::Eq => Instruction::Eq { dst, lhs, rhs },
            BinaryOp::StrictEq => Instruction::StrictEq { dst, lhs, rhs },
            BinaryOp::Ne => Instruction::Ne { dst, lhs, rhs },
            BinaryOp::StrictNe => Instruction::StrictNe { dst, lhs, rhs },
            BinaryOp::Lt => Instruction::Lt { dst, lhs, rhs },
            BinaryOp::Le => Instruction::Le { dst, lhs, rhs },
            BinaryOp::Gt => Instruction::Gt { dst, lhs, rhs },
            BinaryOp::Ge => Instruction::Ge { dst, lhs, rhs },
            BinaryOp::In => Instruction::In { dst, lhs, rhs },
            BinaryOp::InstanceOf => Instruction::InstanceOf { dst, lhs, rhs },
        };
        self.cg.fc().emit(instruction);
        self.cg.fc().regs.free(rhs);
        self.cg.fc().regs.free(lhs);
        Ok(dst)
    }

    /// Specialize null/undefined comparisons to the single-register
    /// tests. Returns None when the generic comparison applies.
    fn try_nullish_test(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> CompileResult<Option<Register>> {
        let (operand, against) = match (&lhs.kind, &rhs.kind) {
            (ExprKind::Null | ExprKind::Undefined, _) => (rhs, &lhs.kind),
            (_, ExprKind::Null | ExprKind::Undefined) => (lhs, &rhs.kind),
            _ => return Ok(None),
        };
        let negate = matches!(op, BinaryOp::StrictNe | BinaryOp::Ne);
        let src = match op {
            // Abstract equality against null/undefined matches both
            BinaryOp::Eq | BinaryOp::Ne => {
                let src = self.compile_expr(operand)?;
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::IsNullish { dst, src });
                self.cg.fc().regs.free(src);
                dst
            }
            BinaryOp::StrictEq | BinaryOp::StrictNe => {
                let src = self.compile_expr(operand)?;
                let dst = self.cg.fc().regs.alloc();
                self.cg.fc().emit(if matches!(against, ExprKind::Null) {
                    Instruction::IsNull { dst, src }
                } else {
                    Instruction::IsUndefined { dst, src }
                });
                self.cg.fc().regs.free(src);
                dst
            }
            _ => return Ok(None),
        };
        if negate {
            let dst = self.cg.fc().regs.alloc();
            self.cg.fc().emit(Instruction::Not { dst, src });
            self.cg.fc().regs.free(src);
            return Ok(Some(dst));
        }
        Ok(Some(src))
    }

    fn compile_logical(
        &mut self,
        op: LogicalOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> CompileResult<Register> {
        let result = self.compile_expr(lhs)?;
        let skip = match op {
            LogicalOp::And => self.cg.fc().emit(Instruction::JumpIfFalse {
                cond: result,
                offset: JumpOffset(0),
            }),
            LogicalOp::Or => self.cg.fc().emit(Instruction::JumpIfTrue {
                cond: result,
                offset: JumpOffset(0),
            }),
            LogicalOp::Nullish => self.cg.fc().emit(Instruction::JumpIfNotNullish {
                src: result,
                offset: JumpOffset(0),
            }),
        };
        let rhs_reg = self.compile_expr(rhs)?;
        self.cg.fc().emit(Instruction::Move {
            dst: result,
            src: rhs_reg,
        });
        self.cg.fc().regs.free(rhs_reg);
        self.cg.fc().patch_jump_to_here(skip);
        Ok(result)
    }

    fn compile_assign(
        &mut self,
        target: &AssignTarget,
        op: Option<BinaryOp>,
        value: &Expr,
        span: Span,
    ) -> CompileResult<Register> {
        match target {
            AssignTarget::Ident(name) => {
                let result = match op {
                    None => self.compile_expr(value)?,
                    Some(op) => {
                        let current = self.load_ident(name, span)?;
                        let rhs = self.compile_expr(value)?;
                        let dst = self.cg.fc().regs.alloc();
                        self.emit_binary_op(op, dst, current, rhs);
                        self.cg.fc().regs.free(rhs);
                        self.cg.fc().regs.free(current);
                        dst
                    }
                };
                self.store_ident(name, result, span, false)?;
                Ok(result)
            }
            AssignTarget::Member { object, prop } => {
                let obj = self.compile_expr(object)?;
                let result = match op {
                    None => self.compile_expr(value)?,
                    Some(op) => {
                        let current = self.emit_member_get(obj, prop, span)?;
                        let rhs = self.compile_expr(value)?;
                        let dst = self.cg.fc().regs.alloc();
                        self.emit_binary_op(op, dst, current, rhs);
                        self.cg.fc().regs.free(rhs);
                        self.cg.fc().regs.free(current);
                        dst
                    }
                };
                self.emit_member_set(obj, prop, result, span)?;
                self.cg.fc().regs.free(obj);
                Ok(result)
            }
            AssignTarget::Pattern(pattern) => {
                if op.is_some() {
                    return Err(
                        self.err("Compound assignment cannot target a pattern", span)
                    );
                }
                let result = self.compile_expr(value)?;
                self.bind_pattern(pattern, result, BindMode::Assign, span)?;
                Ok(result)
            }
        }
    }

    fn emit_binary_op(&mut self, op: BinaryOp, dst: Register, lhs: Register, rhs: Register) {
        let instruction = match op {
            BinaryOp::Add => Instruction::Add { dst, lhs, rhs },
            BinaryOp::Sub => Instruction::Sub { dst, lhs, rhs },
            BinaryOp::Mul => Instruction::Mul { dst, lhs, rhs },
            BinaryOp::Div => Instruction::Div { dst, lhs, rhs },
            BinaryOp::Mod => Instruction::Mod { dst, lhs, rhs },
            BinaryOp::Pow => Instruction::Pow { dst, lhs, rhs },
            BinaryOp::BitAnd => Instruction::BitAnd { dst, lhs, rhs },
            BinaryOp::BitOr => Instruction::BitOr { dst, lhs, rhs },
            BinaryOp::BitXor => Instruction::BitXor { dst, lhs, rhs },
            BinaryOp::Shl => Instruction::Shl { dst, lhs, rhs },
            BinaryOp::Shr => Instruction::Shr { dst, lhs, rhs },
            BinaryOp::Ushr => Instruction::Ushr { dst, lhs, rhs },
            other => {
                debug_assert!(false, "non-compound operator {:?}", other);
                Instruction::Nop
            }
        };
        self.cg.fc().emit(instruction);
    }

    fn emit_member_get(
        &mut self,
        obj: Register,
        prop: &PropAccess,
        span: Span,
    ) -> CompileResult<Register> {
        let dst = self.cg.fc().regs.alloc();
        match prop {
            PropAccess::Static(name) => {
                let name_idx = ConstantIndex(self.cg.add_string(name));
                let ic = self.cg.fc().alloc_ic();
                self.cg.fc().emit(Instruction::GetProp {
                    dst,
                    obj,
                    name: name_idx,
                    ic,
                });
            }
            PropAccess::Computed(expr) => {
                let key = self.compile_expr(expr)?;
                let ic = self.cg.fc().alloc_ic();
                self.cg.fc().emit(Instruction::GetIndex { dst, obj, key, ic });
                self.cg.fc().regs.free(key);
            }
            PropAccess::Private(name) => {
                let key = self.prop_name_register(&PropName::Private(name.clone()), span)?;
                let ic = self.cg.fc().alloc_ic();
                self.cg.fc().emit(Instruction::GetIndex { dst, obj, key, ic });
                self.cg.fc().regs.free(key);
            }
        }
        Ok(dst)
    }

    fn emit_member_set(
        &mut self,
        obj: Register,
        prop: &PropAccess,
        src: Register,
        span: Span,
    ) -> CompileResult<()> {
        match prop {
            PropAccess::Static(name) => {
                let name_idx = ConstantIndex(self.cg.add_string(name));
                let ic = self.cg.fc().alloc_ic();
                self.cg.fc().emit(Instruction::SetProp {
                    obj,
                    name: name_idx,
                    src,
                    ic,
                });
            }
            PropAccess::Computed(expr) => {
                let key = self.compile_expr(expr)?;
                let ic = self.cg.fc().alloc_ic();
                self.cg.fc().emit(Instruction::SetIndex { obj, key, src, ic });
                self.cg.fc().regs.free(key);
            }
            PropAccess::Private(name) => {
                let key = self.prop_name_register(&PropName::Private(name.clone()), span)?;
                let ic = self.cg.fc().alloc_ic();
                self.cg.fc().emit(Instruction::SetIndex { obj, key, src, ic });
                self.cg.fc().regs.free(key);
            }
        }
        Ok(())
    }

    fn compile_update(
        &mut self,
        increment: bool,
        prefix: bool,
        target: &AssignTarget,
        span: Span,
    ) -> CompileResult<Register> {
        let (old, store): (Register, Box<dyn FnOnce(&mut Self, Register) -> CompileResult<()>>) =
            match target {
                AssignTarget::Ident(name) => {
                    let old = self.load_ident(name, span)?;
                    let name = name.clone();
                    (
                        old,
                        Box::new(move |this, new| this.store_ident(&name, new, span, false)),
                    )
                }
                AssignTarget::Member { object, prop } => {
                    let obj = self.compile_expr(object)?;
                    let old = self.emit_member_get(obj, prop, span)?;
                    let prop = prop.clone();
                    (
                        old,
                        Box::new(move |this, new| {
                            this.emit_member_set(obj, &prop, new, span)?;
                            this.cg.fc().regs.free(obj);
                            Ok(())
                        }),
                    )
                }
                AssignTarget::Pattern(_) => {
                    return Err(self.err("Invalid update expression target", span));
                }
            };

        // Coerce the old value so postfix returns a number
        let old_num = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::ToNumber {
            dst: old_num,
            src: old,
        });
        self.cg.fc().regs.free(old);

        let new = self.cg.fc().regs.alloc();
        self.cg.fc().emit(if increment {
            Instruction::Inc {
                dst: new,
                src: old_num,
            }
        } else {
            Instruction::Dec {
                dst: new,
                src: old_num,
            }
        });
        store(self, new)?;

        if prefix {
            self.cg.fc().regs.free(old_num);
            Ok(new)
        } else {
            self.cg.fc().regs.free(new);
            Ok(old_num)
        }
    }

    fn compile_call(
        &mut self,
        callee: &Expr,
        args: &[Argument],
        optional: bool,
        span: Span,
    ) -> CompileResult<Register> {
        let has_spread = args.iter().any(|a| matches!(a, Argument::Spread(_)));

        // Method call: fuse the property load and pass the receiver
        if let ExprKind::Member {
            object,
            prop,
            optional: member_optional,
        } = &callee.kind
        {
            let obj = self.compile_expr(object)?;
            let dst = self.cg.fc().regs.alloc();

            let nullish_skip = if *member_optional || optional {
                let jump = self.cg.fc().emit(Instruction::JumpIfNullish {
                    src: obj,
                    offset: JumpOffset(0),
                });
                Some(jump)
            } else {
                None
            };

            match (prop, has_spread) {
                (PropAccess::Static(name), false) => {
                    let name_idx = ConstantIndex(self.cg.add_string(name));
                    let ic = self.cg.fc().alloc_ic();
                    let (first_arg, argc) = self.compile_args_block(args, span)?;
                    self.cg.fc().emit(Instruction::CallMethod {
                        dst,
                        obj,
                        name: name_idx,
                        first_arg,
                        argc,
                        ic,
                    });
                }
                _ => {
                    // Computed or spread method call: load the function,
                    // then call with an explicit receiver
                    let func = self.emit_member_get(obj, prop, span)?;
                    let spread = self.compile_args_array(args)?;
                    self.cg.fc().emit(Instruction::CallSpread {
                        dst,
                        func,
                        this: obj,
                        spread,
                    });
                    self.cg.fc().regs.free(spread);
                    self.cg.fc().regs.free(func);
                }
            }

            if let Some(jump) = nullish_skip {
                let end = self.cg.fc().emit(Instruction::Jump {
                    offset: JumpOffset(0),
                });
                self.cg.fc().patch_jump_to_here(jump);
                self.cg.fc().emit(Instruction::LoadUndefined { dst });
                self.cg.fc().patch_jump_to_here(end);
            }
            self.cg.fc().regs.free(obj);
            return Ok(dst);
        }

        let func = self.compile_expr(callee)?;
        let dst = self.cg.fc().regs.alloc();

        let nullish_skip = if optional {
            Some(self.cg.fc().emit(Instruction::JumpIfNullish {
                src: func,
                offset: JumpOffset(0),
            }))
        } else {
            None
        };

        if has_spread {
            let this = self.cg.fc().regs.alloc();
            self.cg.fc().emit(Instruction::LoadUndefined { dst: this });
            let spread = self.compile_args_array(args)?;
            self.cg.fc().emit(Instruction::CallSpread {
                dst,
                func,
                this,
                spread,
            });
            self.cg.fc().regs.free(spread);
            self.cg.fc().regs.free(this);
        } else {
            let (first_arg, argc) = self.compile_args_block(args, span)?;
            self.cg.fc().emit(Instruction::Call {
                dst,
                func,
                first_arg,
                argc,
            });
        }

        if let Some(jump) = nullish_skip {
            let end = self.cg.fc().emit(Instruction::Jump {
                offset: JumpOffset(0),
            });
            self.cg.fc().patch_jump_to_here(jump);
            self.cg.fc().emit(Instruction::LoadUndefined { dst });
            self.cg.fc().patch_jump_to_here(end);
        }
        self.cg.fc().regs.free(func);
        Ok(dst)
    }

    /// Compile plain arguments into a fresh contiguous register block
    fn compile_args_block(
        &mut self,
        args: &[Argument],
        span: Span,
    ) -> CompileResult<(Register, u8)> {
        let argc = args.len();
        if argc > u8::MAX as usize {
            return Err(self.err("too many arguments", span));
        }
        let first = self.cg.fc().regs.alloc_block(argc as u16);
        for (i, arg) in args.iter().enumerate() {
            let Argument::Expr(expr) = arg else {
                return Err(self.err("unexpected spread argument", span));
            };
            let value = self.compile_expr(expr)?;
            self.cg.fc().emit(Instruction::Move {
                dst: Register(first.0 + i as u16),
                src: value,
            });
            self.cg.fc().regs.free(value);
        }
        Ok((first, argc as u8))
    }

    /// Compile arguments (possibly with spreads) into one array
    fn compile_args_array(&mut self, args: &[Argument]) -> CompileResult<Register> {
        let arr = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::NewArray { dst: arr, len: 0 });
        for arg in args {
            match arg {
                Argument::Expr(expr) => {
                    let src = self.compile_expr(expr)?;
                    self.cg.fc().emit(Instruction::AppendArray { arr, src });
                    self.cg.fc().regs.free(src);
                }
                Argument::Spread(expr) => {
                    let src = self.compile_expr(expr)?;
                    self.cg.fc().emit(Instruction::AppendSpread { arr, src });
                    self.cg.fc().regs.free(src);
                }
            }
        }
        Ok(arr)
    }

    fn compile_new(
        &mut self,
        callee: &Expr,
        args: &[Argument],
        span: Span,
    ) -> CompileResult<Register> {
        let ctor = self.compile_expr(callee)?;
        let dst = self.cg.fc().regs.alloc();
        let has_spread = args.iter().any(|a| matches!(a, Argument::Spread(_)));
        if has_spread {
            let spread = self.compile_args_array(args)?;
            self.cg.fc().emit(Instruction::NewSpread { dst, ctor, spread });
            self.cg.fc().regs.free(spread);
        } else {
            let (first_arg, argc) = self.compile_args_block(args, span)?;
            self.cg.fc().emit(Instruction::New {
                dst,
                ctor,
                first_arg,
                argc,
            });
        }
        self.cg.fc().regs.free(ctor);
        Ok(dst)
    }

    fn compile_member(
        &mut self,
        object: &Expr,
        prop: &PropAccess,
        optional: bool,
        span: Span,
    ) -> CompileResult<Register> {
        let obj = self.compile_expr(object)?;
        if optional {
            let dst = self.cg.fc().regs.alloc();
            let skip = self.cg.fc().emit(Instruction::JumpIfNullish {
                src: obj,
                offset: JumpOffset(0),
            });
            let value = self.emit_member_get(obj, prop, span)?;
            self.cg.fc().emit(Instruction::Move { dst, src: value });
            self.cg.fc().regs.free(value);
            let end = self.cg.fc().emit(Instruction::Jump {
                offset: JumpOffset(0),
            });
            self.cg.fc().patch_jump_to_here(skip);
            self.cg.fc().emit(Instruction::LoadUndefined { dst });
            self.cg.fc().patch_jump_to_here(end);
            self.cg.fc().regs.free(obj);
            return Ok(dst);
        }
        let dst = self.emit_member_get(obj, prop, span)?;
        self.cg.fc().regs.free(obj);
        Ok(dst)
    }

    fn compile_yield(
        &mut self,
        arg: Option<&Expr>,
        delegate: bool,
        span: Span,
    ) -> CompileResult<Register> {
        if self.cg.fc_ref().kind != FunctionKind::Generator {
            return Err(self.err("yield is only valid in generator functions", span));
        }

        if delegate {
            // yield*: drain the inner iterable, yielding each value; the
            // expression's value is the inner iterator's return value.
            let src = self.compile_expr(arg.ok_or_else(|| {
                self.err("yield* requires an argument", span)
            })?)?;
            let iter = self.cg.fc().regs.alloc();
            self.cg.fc().emit(Instruction::GetIterator { dst: iter, src });
            self.cg.fc().regs.free(src);

            let value = self.cg.fc().regs.alloc();
            let done = self.cg.fc().regs.alloc();
            let sent = self.cg.fc().regs.alloc();
            let loop_start = self.cg.fc().current_index();
            self.cg.fc().emit(Instruction::IteratorNext {
                dst: value,
                done,
                iter,
            });
            let exit = self.cg.fc().emit(Instruction::JumpIfTrue {
                cond: done,
                offset: JumpOffset(0),
            });
            self.cg.fc().emit(Instruction::Yield {
                dst: sent,
                src: value,
            });
            let back = self.cg.fc().current_index();
            self.cg.fc().emit(Instruction::Jump {
                offset: JumpOffset((loop_start as i64 - back as i64) as i32),
            });
            self.cg.fc().patch_jump_to_here(exit);
            self.cg.fc().regs.free(sent);
            self.cg.fc().regs.free(done);
            self.cg.fc().regs.free(iter);
            Ok(value)
        } else {
            let src = match arg {
                Some(arg) => self.compile_expr(arg)?,
                None => {
                    let reg = self.cg.fc().regs.alloc();
                    self.cg.fc().emit(Instruction::LoadUndefined { dst: reg });
                    reg
                }
            };
            let dst = self.cg.fc().regs.alloc();
            self.cg.fc().emit(Instruction::Yield { dst, src });
            self.cg.fc().regs.free(src);
            Ok(dst)
        }
    }

    // ================================================================
    // Patterns
    // ================================================================

    fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        src: Register,
        mode: BindMode,
        span: Span,
    ) -> CompileResult<()> {
        match pattern {
            Pattern::Ident(name) => {
                if mode == BindMode::Declare {
                    // var bindings were hoisted; let/const were
                    // pre-declared in the dead zone by the block prologue
                    if matches!(self.cg.resolve(name), Resolved::Global(_)) {
                        self.cg.fc().declare(name, false, false);
                    }
                }
                self.store_ident(name, src, span, mode == BindMode::Declare)
            }
            Pattern::Array { elements, rest } => {
                let iter = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::GetIterator { dst: iter, src });

                let done = self.cg.fc().regs.alloc();
                for element in elements {
                    let value = self.cg.fc().regs.alloc();
                    self.cg.fc().emit(Instruction::IteratorNext {
                        dst: value,
                        done,
                        iter,
                    });
                    if let Some(elem) = element {
                        self.apply_default(value, elem.default.as_ref())?;
                        self.bind_pattern(&elem.pattern, value, mode, span)?;
                    }
                    self.cg.fc().regs.free(value);
                }

                if let Some(rest) = rest {
                    let arr = self.cg.fc().regs.alloc();
                    self.cg.fc().emit(Instruction::NewArray { dst: arr, len: 0 });
                    let value = self.cg.fc().regs.alloc();
                    let loop_start = self.cg.fc().current_index();
                    self.cg.fc().emit(Instruction::IteratorNext {
                        dst: value,
                        done,
                        iter,
                    });
                    let exit = self.cg.fc().emit(Instruction::JumpIfTrue {
                        cond: done,
                        offset: JumpOffset(0),
                    });
                    self.cg.fc().emit(Instruction::AppendArray { arr, src: value });
                    let back = self.cg.fc().current_index();
                    self.cg.fc().emit(Instruction::Jump {
                        offset: JumpOffset((loop_start as i64 - back as i64) as i32),
                    });
                    self.cg.fc().patch_jump_to_here(exit);
                    self.cg.fc().regs.free(value);
                    self.bind_pattern(rest, arr, mode, span)?;
                    self.cg.fc().regs.free(arr);
                }
                self.cg.fc().regs.free(done);
                self.cg.fc().regs.free(iter);
                Ok(())
            }
            Pattern::Object { props, rest } => {
                // Keep the key names for the rest exclusion set
                let mut excluded: Vec<Register> = Vec::new();
                for prop in props {
                    let value = self.cg.fc().regs.alloc();
                    match &prop.key {
                        PropName::Ident(name) | PropName::String(name) => {
                            let name_idx = ConstantIndex(self.cg.add_string(name));
                            let ic = self.cg.fc().alloc_ic();
                            self.cg.fc().emit(Instruction::GetProp {
                                dst: value,
                                obj: src,
                                name: name_idx,
                                ic,
                            });
                            if rest.is_some() {
                                let key = self.prop_name_register(&prop.key, span)?;
                                excluded.push(key);
                            }
                        }
                        _ => {
                            let key = self.prop_name_register(&prop.key, span)?;
                            let ic = self.cg.fc().alloc_ic();
                            self.cg.fc().emit(Instruction::GetIndex {
                                dst: value,
                                obj: src,
                                key,
                                ic,
                            });
                            if rest.is_some() {
                                excluded.push(key);
                            } else {
                                self.cg.fc().regs.free(key);
                            }
                        }
                    }
                    self.apply_default(value, prop.default.as_ref())?;
                    self.bind_pattern(&prop.value, value, mode, span)?;
                    self.cg.fc().regs.free(value);
                }

                if let Some(rest) = rest {
                    // The exclusion keys must sit in one contiguous span
                    let count = excluded.len();
                    let first = self.cg.fc().regs.alloc_block(count as u16);
                    for (i, key) in excluded.iter().enumerate() {
                        self.cg.fc().emit(Instruction::Move {
                            dst: Register(first.0 + i as u16),
                            src: *key,
                        });
                    }
                    let dst = self.cg.fc().regs.alloc();
                    self.cg.fc().emit(Instruction::CopyRestProps {
                        dst,
                        src,
                        exclude_start: first,
                        exclude_count: count as u8,
                    });
                    self.bind_pattern(rest, dst, mode, span)?;
                    self.cg.fc().regs.free(dst);
                }
                for key in excluded {
                    self.cg.fc().regs.free(key);
                }
                Ok(())
            }
        }
    }

    /// On undefined, replace `value` with the compiled default
    fn apply_default(&mut self, value: Register, default: Option<&Expr>) -> CompileResult<()> {
        let Some(default) = default else {
            return Ok(());
        };
        let is_undef = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::IsUndefined {
            dst: is_undef,
            src: value,
        });
        let skip = self.cg.fc().emit(Instruction::JumpIfFalse {
            cond: is_undef,
            offset: JumpOffset(0),
        });
        self.cg.fc().regs.free(is_undef);
        let fallback = self.compile_expr(default)?;
        self.cg.fc().emit(Instruction::Move {
            dst: value,
            src: fallback,
        });
        self.cg.fc().regs.free(fallback);
        self.cg.fc().patch_jump_to_here(skip);
        Ok(())
    }

    // ================================================================
    // Functions & classes
    // ================================================================

    fn compile_function(&mut self, func: &Function) -> CompileResult<u32> {
        self.compile_function_with_prologue(func, |_| Ok(()))
    }

    fn compile_function_with_prologue(
        &mut self,
        func: &Function,
        prologue: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<u32> {
        self.cg.enter_function(func.name.clone(), func.kind);
        self.cg.mark_span(func.span);

        // Parameter slots must occupy locals 0..param_count (the VM
        // copies arguments there), so declare every slot before any
        // pattern introduces its inner bindings. Defaults and
        // destructuring then run in order, with earlier parameters in
        // scope for later defaults.
        let param_count = func.params.len();
        if param_count > u8::MAX as usize {
            return Err(self.err("too many parameters", func.span));
        }
        self.cg.fc().param_count = param_count as u8;

        let mut param_slots = Vec::with_capacity(param_count);
        for (i, param) in func.params.iter().enumerate() {
            let local = match &param.pattern {
                Pattern::Ident(name) => self.cg.fc().declare(name, false, false),
                _ => {
                    let synthetic = format!("@param{}", i);
                    self.cg.fc().declare(&synthetic, false, false)
                }
            };
            debug_assert_eq!(local as usize, i);
            param_slots.push(local);
        }
        let rest_slot = func.rest.as_ref().map(|rest| {
            self.cg.fc().has_rest = true;
            let local = match rest {
                Pattern::Ident(name) => self.cg.fc().declare(name, false, false),
                _ => self.cg.fc().declare("@rest", false, false),
            };
            debug_assert_eq!(local as usize, param_count);
            local
        });

        for (param, local) in func.params.iter().zip(&param_slots) {
            self.init_param_default(*local, param.default.as_ref())?;
            if !matches!(param.pattern, Pattern::Ident(_)) {
                let mut names = Vec::new();
                param.pattern.bound_names(&mut names);
                for name in &names {
                    self.cg.fc().declare(name, false, false);
                }
                let src = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::GetLocal {
                    dst: src,
                    idx: LocalIndex(*local),
                });
                self.bind_pattern(&param.pattern, src, BindMode::Declare, func.span)?;
                self.cg.fc().regs.free(src);
            }
        }
        if let (Some(rest), Some(local)) = (&func.rest, rest_slot) {
            if !matches!(rest, Pattern::Ident(_)) {
                let mut names = Vec::new();
                rest.bound_names(&mut names);
                for name in &names {
                    self.cg.fc().declare(name, false, false);
                }
                let src = self.cg.fc().regs.alloc();
                self.cg.fc().emit(Instruction::GetLocal {
                    dst: src,
                    idx: LocalIndex(local),
                });
                self.bind_pattern(rest, src, BindMode::Declare, func.span)?;
                self.cg.fc().regs.free(src);
            }
        }

        // Generator/async bodies detach after the parameter prologue, so
        // argument destructuring throws at the call site.
        if matches!(func.kind, FunctionKind::Generator | FunctionKind::Async) {
            self.cg.fc().emit(Instruction::CreateGenerator);
        }

        prologue(self)?;

        self.hoist_var_names(&func.body);
        self.hoist_block_prologue(&func.body)?;
        for stmt in &func.body {
            self.compile_stmt(stmt)?;
        }
        self.cg.fc().emit(Instruction::ReturnUndefined);
        Ok(self.cg.exit_function())
    }

    fn init_param_default(&mut self, local: u16, default: Option<&Expr>) -> CompileResult<()> {
        let Some(default) = default else {
            return Ok(());
        };
        let current = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::GetLocal {
            dst: current,
            idx: LocalIndex(local),
        });
        let is_undef = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::IsUndefined {
            dst: is_undef,
            src: current,
        });
        let skip = self.cg.fc().emit(Instruction::JumpIfFalse {
            cond: is_undef,
            offset: JumpOffset(0),
        });
        let value = self.compile_expr(default)?;
        self.cg.fc().emit(Instruction::SetLocal {
            idx: LocalIndex(local),
            src: value,
        });
        self.cg.fc().regs.free(value);
        self.cg.fc().patch_jump_to_here(skip);
        self.cg.fc().regs.free(is_undef);
        self.cg.fc().regs.free(current);
        Ok(())
    }

    fn compile_class_value(&mut self, class: &Class, span: Span) -> CompileResult<Register> {
        self.cg.enter_private_scope();

        // Private names resolve anywhere inside the class body
        for member in &class.members {
            let key = match member {
                ClassMember::Method { key, .. } => key,
                ClassMember::Field { key, .. } => key,
            };
            if let PropName::Private(name) = key {
                self.cg.declare_private(name);
            }
        }

        // The constructor chunk gets the instance field initializers as
        // its prologue, so every `new` sees initialized fields.
        let instance_fields: Vec<(&PropName, Option<&Expr>)> = class
            .members
            .iter()
            .filter_map(|m| match m {
                ClassMember::Field {
                    key,
                    value,
                    is_static: false,
                } => Some((key, value.as_ref())),
                _ => None,
            })
            .collect();

        let ctor_func = class.members.iter().find_map(|m| match m {
            ClassMember::Method {
                func,
                kind: MethodKind::Constructor,
                ..
            } => Some(func.clone()),
            _ => None,
        });
        let ctor_func = ctor_func.unwrap_or_else(|| Function {
            name: class.name.clone(),
            params: Vec::new(),
            rest: None,
            body: Vec::new(),
            kind: FunctionKind::Normal,
            return_type: Type::Any,
            span,
        });
        let ctor_func = Function {
            name: class.name.clone().or(ctor_func.name.clone()),
            ..ctor_func
        };

        let field_keys: Vec<PropName> = instance_fields.iter().map(|(k, _)| (*k).clone()).collect();
        let field_values: Vec<Option<Expr>> =
            instance_fields.iter().map(|(_, v)| v.cloned()).collect();
        let ctor_chunk = self.compile_function_with_prologue(&ctor_func, move |this| {
            for (key, value) in field_keys.iter().zip(field_values.iter()) {
                let this_reg = this.cg.fc().regs.alloc();
                this.cg.fc().emit(Instruction::LoadThis { dst: this_reg });
                let value_reg = match value {
                    Some(value) => this.compile_expr(value)?,
                    None => {
                        let reg = this.cg.fc().regs.alloc();
                        this.cg.fc().emit(Instruction::LoadUndefined { dst: reg });
                        reg
                    }
                };
                this.store_object_key(this_reg, key, value_reg, span)?;
                this.cg.fc().regs.free(value_reg);
                this.cg.fc().regs.free(this_reg);
            }
            Ok(())
        })?;

        let ctor = self.cg.fc().regs.alloc();
        self.cg.fc().emit(Instruction::MakeClosure {
            dst: ctor,
            chunk: ChunkIndex(ctor_chunk),
        });

        let proto = self.cg.fc().regs.alloc();
        let proto_name = ConstantIndex(self.cg.add_string("prototype"));
        let proto_ic = self.cg.fc().alloc_ic();
        self.cg.fc().emit(Instruction::GetProp {
            dst: proto,
            obj: ctor,
            name: proto_name,
            ic: proto_ic,
        });

        for member in &class.members {
            match member {
                ClassMember::Method {
                    kind: MethodKind::Constructor,
                    ..
                } => {}
                ClassMember::Method {
                    key,
                    func,
                    is_static,
                    kind,
                } => {
                    let target = if *is_static { ctor } else { proto };
                    let chunk = self.compile_function(func)?;
                    let method = self.cg.fc().regs.alloc();
                    self.cg.fc().emit(Instruction::MakeClosure {
                        dst: method,
                        chunk: ChunkIndex(chunk),
                    });
                    match kind {
                        MethodKind::Getter => {
                            let key_reg = self.prop_name_register(key, span)?;
                            self.cg.fc().emit(Instruction::DefineGetter {
                                obj: target,
                                key: key_reg,
                                func: method,
                            });
                            self.cg.fc().regs.free(key_reg);
                        }
                        MethodKind::Setter => {
                            let key_reg = self.prop_name_register(key, span)?;
                            self.cg.fc().emit(Instruction::DefineSetter {
                                obj: target,
                                key: key_reg,
                                func: method,
                            });
                            self.cg.fc().regs.free(key_reg);
                        }
                        _ => {
                            self.store_object_key(target, key, method, span)?;
                        }
                    }
                    self.cg.fc().regs.free(method);
                }
                ClassMember::Field {
                    key,
                    value,
                    is_static: true,
                } => {
                    let value_reg = match value {
                        Some(value) => self.compile_expr(value)?,
                        None => {
                            let reg = self.cg.fc().regs.alloc();
                            self.cg.fc().emit(Instruction::LoadUndefined { dst: reg });
                            reg
                        }
                    };
                    self.store_object_key(ctor, key, value_reg, span)?;
                    self.cg.fc().regs.free(value_reg);
                }
                ClassMember::Field { .. } => {}
            }
        }

        self.cg.fc().regs.free(proto);
        self.cg.exit_private_scope();
        Ok(ctor)
    }
}

/// Do the statements await at their own level (not inside a nested
/// function)? Decides whether the entry chunk compiles as an async body.
fn stmts_contain_await(stmts: &[Stmt]) -> bool {
    stmts.iter().any(stmt_contains_await)
}

fn stmt_contains_await(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Expr(e) | StmtKind::Throw(e) => expr_contains_await(e),
        StmtKind::VarDecl { declarations, .. } => declarations
            .iter()
            .any(|(_, init)| init.as_ref().map(expr_contains_await).unwrap_or(false)),
        StmtKind::Return(e) => e.as_ref().map(expr_contains_await).unwrap_or(false),
        StmtKind::If {
            test,
            consequent,
            alternate,
        } => {
            expr_contains_await(test)
                || stmt_contains_await(consequent)
                || alternate.as_deref().map(stmt_contains_await).unwrap_or(false)
        }
        StmtKind::Block(stmts) => stmts_contain_await(stmts),
        StmtKind::While { test, body } => expr_contains_await(test) || stmt_contains_await(body),
        StmtKind::DoWhile { body, test } => stmt_contains_await(body) || expr_contains_await(test),
        StmtKind::For {
            init,
            test,
            update,
            body,
        } => {
            let init_awaits = match init {
                Some(ForInit::VarDecl { declarations, .. }) => declarations
                    .iter()
                    .any(|(_, i)| i.as_ref().map(expr_contains_await).unwrap_or(false)),
                Some(ForInit::Expr(e)) => expr_contains_await(e),
                None => false,
            };
            init_awaits
                || test.as_ref().map(expr_contains_await).unwrap_or(false)
                || update.as_ref().map(expr_contains_await).unwrap_or(false)
                || stmt_contains_await(body)
        }
        StmtKind::ForIn { object, body, .. } => {
            expr_contains_await(object) || stmt_contains_await(body)
        }
        StmtKind::ForOf { iterable, body, .. } => {
            expr_contains_await(iterable) || stmt_contains_await(body)
        }
        StmtKind::Labeled { body, .. } => stmt_contains_await(body),
        StmtKind::Switch {
            discriminant,
            cases,
        } => {
            expr_contains_await(discriminant)
                || cases.iter().any(|c| {
                    c.test.as_ref().map(expr_contains_await).unwrap_or(false)
                        || stmts_contain_await(&c.body)
                })
        }
        StmtKind::Try {
            block,
            handler,
            finalizer,
        } => {
            stmts_contain_await(block)
                || handler
                    .as_ref()
                    .map(|h| stmts_contain_await(&h.body))
                    .unwrap_or(false)
                || finalizer
                    .as_ref()
                    .map(|f| stmts_contain_await(f))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

fn expr_contains_await(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Await(_) => true,
        ExprKind::Unary { expr, .. } => expr_contains_await(expr),
        ExprKind::Delete { object, prop } => {
            expr_contains_await(object)
                || matches!(prop, PropAccess::Computed(e) if expr_contains_await(e))
        }
        ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
            expr_contains_await(lhs) || expr_contains_await(rhs)
        }
        ExprKind::Assign { value, target, .. } => {
            expr_contains_await(value)
                || matches!(target, AssignTarget::Member { object, .. } if expr_contains_await(object))
        }
        ExprKind::Cond {
            test,
            consequent,
            alternate,
        } => {
            expr_contains_await(test)
                || expr_contains_await(consequent)
                || expr_contains_await(alternate)
        }
        ExprKind::Call { callee, args, .. } | ExprKind::New { callee, args } => {
            expr_contains_await(callee)
                || args.iter().any(|a| match a {
                    Argument::Expr(e) | Argument::Spread(e) => expr_contains_await(e),
                })
        }
        ExprKind::Member { object, prop, .. } => {
            expr_contains_await(object)
                || matches!(prop, PropAccess::Computed(e) if expr_contains_await(e))
        }
        ExprKind::Array(elements) => elements.iter().any(|e| match e {
            ArrayElement::Item(e) | ArrayElement::Spread(e) => expr_contains_await(e),
            ArrayElement::Hole => false,
        }),
        ExprKind::Object(props) => props.iter().any(|p| match p {
            ObjectProp::KeyValue { value, .. } => expr_contains_await(value),
            ObjectProp::Spread(e) => expr_contains_await(e),
            _ => false,
        }),
        ExprKind::Sequence(exprs) => exprs.iter().any(expr_contains_await),
        ExprKind::Yield { arg, .. } => arg.as_deref().map(expr_contains_await).unwrap_or(false),
        _ => false,
    }
}

/// Collect `var`-declared names across nested statements (not functions)
fn collect_var_names(stmts: &[Stmt], out: &mut Vec<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::VarDecl {
                kind: DeclKind::Var,
                declarations,
            } => {
                for (pattern, _) in declarations {
                    pattern.bound_names(out);
                }
            }
            StmtKind::If {
                consequent,
                alternate,
                ..
            } => {
                collect_var_names(std::slice::from_ref(consequent), out);
                if let Some(alternate) = alternate {
                    collect_var_names(std::slice::from_ref(alternate), out);
                }
            }
            StmtKind::Block(stmts) => collect_var_names(stmts, out),
            StmtKind::While { body, .. }
            | StmtKind::DoWhile { body, .. }
            | StmtKind::Labeled { body, .. } => {
                collect_var_names(std::slice::from_ref(body), out);
            }
            StmtKind::For { init, body, .. } => {
                if let Some(ForInit::VarDecl {
                    kind: DeclKind::Var,
                    declarations,
                }) = init
                {
                    for (pattern, _) in declarations {
                        pattern.bound_names(out);
                    }
                }
                collect_var_names(std::slice::from_ref(body), out);
            }
            StmtKind::ForIn { left, body, .. } | StmtKind::ForOf { left, body, .. } => {
                if let ForHead::VarDecl {
                    kind: DeclKind::Var,
                    pattern,
                } = left
                {
                    pattern.bound_names(out);
                }
                collect_var_names(std::slice::from_ref(body), out);
            }
            StmtKind::Switch { cases, .. } => {
                for case in cases {
                    collect_var_names(&case.body, out);
                }
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => {
                collect_var_names(block, out);
                if let Some(handler) = handler {
                    collect_var_names(&handler.body, out);
                }
                if let Some(finalizer) = finalizer {
                    collect_var_names(finalizer, out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;

    fn num(n: f64) -> Expr {
        Expr::new(ExprKind::Number(n))
    }

    fn ident(name: &str) -> Expr {
        Expr::new(ExprKind::Ident(name.to_string()))
    }

    fn let_decl(name: &str, init: Expr) -> Stmt {
        Stmt::new(StmtKind::VarDecl {
            kind: DeclKind::Let,
            declarations: vec![(Pattern::Ident(name.to_string()), Some(init))],
        })
    }

    fn compile_ok(body: Vec<Stmt>) -> BytecodeProgram {
        Compiler::new("test.ts")
            .compile(&Program::new(body))
            .expect("compile failed")
    }

    #[test]
    fn test_compile_arithmetic() {
        let body = vec![
            let_decl("x", num(1.0)),
            Stmt::new(StmtKind::Expr(Expr::new(ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(ident("x")),
                rhs: Box::new(num(2.0)),
            }))),
        ];
        let program = compile_ok(body);
        let chunk = program.entry_chunk().unwrap();
        assert!(chunk
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::Add { .. })));
    }

    #[test]
    fn test_tdz_read_is_compile_error() {
        let body = vec![
            Stmt::new(StmtKind::Expr(ident("x"))),
            let_decl("x", num(1.0)),
        ];
        let err = Compiler::new("test.ts")
            .compile(&Program::new(body))
            .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Compile);
        assert!(err.message.contains("before initialization"));
    }

    #[test]
    fn test_const_assign_is_compile_error() {
        let body = vec![
            Stmt::new(StmtKind::VarDecl {
                kind: DeclKind::Const,
                declarations: vec![(Pattern::Ident("c".into()), Some(num(1.0)))],
            }),
            Stmt::new(StmtKind::Expr(Expr::new(ExprKind::Assign {
                target: AssignTarget::Ident("c".into()),
                op: None,
                value: Box::new(num(2.0)),
            }))),
        ];
        let err = Compiler::new("test.ts")
            .compile(&Program::new(body))
            .unwrap_err();
        assert!(err.message.contains("constant"));
    }

    #[test]
    fn test_typeof_unresolved_uses_typeof_name() {
        let body = vec![Stmt::new(StmtKind::Expr(Expr::new(ExprKind::Unary {
            op: UnaryOp::TypeOf,
            expr: Box::new(ident("undefinedVar")),
        })))];
        let program = compile_ok(body);
        let chunk = program.entry_chunk().unwrap();
        assert!(chunk
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::TypeOfName { .. })));
        assert!(!chunk
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::GetGlobal { .. })));
    }

    #[test]
    fn test_tail_call_emitted_in_tail_position() {
        let callee = Function {
            name: Some("loop".into()),
            params: vec![Param {
                pattern: Pattern::Ident("n".into()),
                default: None,
            }],
            rest: None,
            body: vec![Stmt::new(StmtKind::Return(Some(Expr::new(
                ExprKind::Call {
                    callee: Box::new(ident("loop")),
                    args: vec![Argument::Expr(ident("n"))],
                    optional: false,
                },
            ))))],
            kind: FunctionKind::Normal,
            return_type: Type::Any,
            span: Span::default(),
        };
        let body = vec![Stmt::new(StmtKind::FunctionDecl(callee))];
        let program = compile_ok(body);
        let has_tail_call = program
            .chunks
            .iter()
            .any(|c| c.instructions.iter().any(|i| matches!(i, Instruction::TailCall { .. })));
        assert!(has_tail_call);
    }

    #[test]
    fn test_no_tail_call_inside_try() {
        let callee = Function {
            name: Some("f".into()),
            params: vec![],
            rest: None,
            body: vec![Stmt::new(StmtKind::Try {
                block: vec![Stmt::new(StmtKind::Return(Some(Expr::new(
                    ExprKind::Call {
                        callee: Box::new(ident("f")),
                        args: vec![],
                        optional: false,
                    },
                ))))],
                handler: Some(CatchClause {
                    param: None,
                    body: vec![],
                }),
                finalizer: None,
            })],
            kind: FunctionKind::Normal,
            return_type: Type::Any,
            span: Span::default(),
        };
        let program = compile_ok(vec![Stmt::new(StmtKind::FunctionDecl(callee))]);
        let has_tail_call = program
            .chunks
            .iter()
            .any(|c| c.instructions.iter().any(|i| matches!(i, Instruction::TailCall { .. })));
        assert!(!has_tail_call);
    }

    #[test]
    fn test_generator_prologue_then_create() {
        let gen = Function {
            name: Some("g".into()),
            params: vec![Param {
                pattern: Pattern::Array {
                    elements: vec![Some(ArrayPatternElem {
                        pattern: Pattern::Ident("x".into()),
                        default: None,
                    })],
                    rest: None,
                },
                default: None,
            }],
            rest: None,
            body: vec![Stmt::new(StmtKind::Expr(Expr::new(ExprKind::Yield {
                arg: Some(Box::new(ident("x"))),
                delegate: false,
            })))],
            kind: FunctionKind::Generator,
            return_type: Type::Any,
            span: Span::default(),
        };
        let program = compile_ok(vec![Stmt::new(StmtKind::FunctionDecl(gen))]);
        let chunk = program
            .chunks
            .iter()
            .find(|c| c.flags.is_generator)
            .expect("generator chunk");
        // Destructuring (GetIterator) precedes CreateGenerator: argument
        // validation throws at the call site, before the generator exists
        let create_at = chunk
            .instructions
            .iter()
            .position(|i| matches!(i, Instruction::CreateGenerator))
            .expect("CreateGenerator");
        let iter_at = chunk
            .instructions
            .iter()
            .position(|i| matches!(i, Instruction::GetIterator { .. }))
            .expect("GetIterator");
        assert!(iter_at < create_at);
        assert!(chunk
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::Yield { .. })));
    }

    #[test]
    fn test_top_level_await_makes_entry_async() {
        let body = vec![Stmt::new(StmtKind::Expr(Expr::new(ExprKind::Await(
            Box::new(num(1.0)),
        ))))];
        let program = compile_ok(body);
        let entry = program.entry_chunk().unwrap();
        assert!(entry.flags.is_async);
        assert!(matches!(
            entry.instructions[0],
            Instruction::CreateGenerator
        ));
    }

    #[test]
    fn test_try_finally_exception_table() {
        let body = vec![Stmt::new(StmtKind::Try {
            block: vec![Stmt::new(StmtKind::Expr(num(1.0)))],
            handler: None,
            finalizer: Some(vec![Stmt::new(StmtKind::Expr(num(2.0)))]),
        })];
        let program = compile_ok(body);
        let entry = program.entry_chunk().unwrap();
        assert_eq!(entry.exception_table.len(), 1);
        assert_eq!(entry.exception_table[0].kind, HandlerKind::Finally);
        // Both the fallthrough copy and the abrupt copy end the region
        assert!(entry
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::EndFinally)));
    }

    #[test]
    fn test_for_of_closes_iterator_on_break() {
        let body = vec![Stmt::new(StmtKind::ForOf {
            left: ForHead::VarDecl {
                kind: DeclKind::Const,
                pattern: Pattern::Ident("x".into()),
            },
            iterable: ident("items"),
            body: Box::new(Stmt::new(StmtKind::Break(None))),
        })];
        let program = compile_ok(body);
        let entry = program.entry_chunk().unwrap();
        let closes = entry
            .instructions
            .iter()
            .filter(|i| matches!(i, Instruction::IteratorClose { .. }))
            .count();
        // One close on the abrupt path, one inlined at the break site
        assert_eq!(closes, 2);
    }

    #[test]
    fn test_private_name_outside_class_errors() {
        let body = vec![Stmt::new(StmtKind::Expr(Expr::new(ExprKind::Member {
            object: Box::new(ident("obj")),
            prop: PropAccess::Private("secret".into()),
            optional: false,
        })))];
        let err = Compiler::new("test.ts")
            .compile(&Program::new(body))
            .unwrap_err();
        assert!(err.message.contains("Private field"));
    }

    #[test]
    fn test_deterministic_output() {
        let build = || {
            let body = vec![
                let_decl("a", num(1.0)),
                let_decl("b", Expr::new(ExprKind::String("hi".into()))),
            ];
            compile_ok(body).to_bytes().unwrap()
        };
        assert_eq!(build(), build());
    }
}
