//! Statement lowering (spec §4.3.4): control flow, declarations, loops,
//! `switch`, and `goto`/labels.
//!
//! Grounded on the same single-pass, patch-the-jump-after-the-fact approach
//! `compile_ternary`/`compile_logical` use in `expr.rs` — a loop's
//! break/continue targets are collected as pending patch sites on a
//! [`super::LoopContext`] pushed for the loop's duration, resolved once its
//! body (and, for `for`, its increment) is fully compiled.

use zym_core::opcode::{self, OpCode};

use crate::ast::{Expr, Stmt, SwitchCase};
use crate::config::TcoMode;

use super::functions::mangle;
use super::{CgResult, CodeGenError, Compiler, LoopContext};

impl<'h> Compiler<'h> {
    pub(crate) fn compile_block_statements(&mut self, stmts: &[Stmt]) -> CgResult<()> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> CgResult<()> {
        match stmt {
            Stmt::Expr(expr) => {
                let mark = self.register_mark();
                self.compile_expr(expr)?;
                self.free_to(mark);
                Ok(())
            }
            Stmt::VarDecl { name, qualifier, init, line } => self.compile_var_decl(name, *qualifier, init, *line),
            Stmt::FuncDecl { name, params, body, line } => self.compile_function_decl(name, params, body, *line),
            // Struct schemas are registered at hoist time
            // (`functions.rs::hoist_block`) and never need a runtime
            // binding: field access resolves at compile time against
            // `Compiler::struct_schemas`.
            Stmt::StructDecl { .. } => Ok(()),
            // Enum schemas are also registered at hoist time, but spec
            // §4.3.7 additionally requires a runtime-reachable global
            // ("`__enum_schema_<name>`") so printing can resolve a bare
            // `Value::Enum` tag back to a variant name. Emit that binding
            // here, once, the first time the declaration is actually
            // compiled (hoisting runs once per block so this statement is
            // visited exactly once per declaration).
            Stmt::EnumDecl { name, line, .. } => self.compile_enum_decl(name, *line),
            Stmt::Return { value, line } => self.compile_return(value, *line),
            Stmt::If { cond, then_branch, else_branch, line } => {
                self.compile_if(cond, then_branch, else_branch.as_deref(), *line)
            }
            Stmt::While { cond, body, line } => self.compile_while(cond, body, *line),
            Stmt::DoWhile { body, cond, line } => self.compile_do_while(body, cond, *line),
            Stmt::For { init, cond, increment, body, line } => {
                self.compile_for(init.as_deref(), cond.as_ref(), increment.as_ref(), body, *line)
            }
            Stmt::Break { line } => self.compile_break(*line),
            Stmt::Continue { line } => self.compile_continue(*line),
            Stmt::Block(body) => {
                self.push_scope();
                self.hoist_block(body, 0)?;
                self.compile_block_statements(body)?;
                self.pop_scope(0);
                Ok(())
            }
            Stmt::Switch { discriminant, cases, default, line } => {
                self.compile_switch(discriminant, cases, default.as_deref(), *line)
            }
            Stmt::Goto { label, line } => self.compile_goto(label, *line),
            Stmt::Label { name, line } => self.compile_label(name, *line),
        }
    }

    fn compile_var_decl(&mut self, name: &str, qualifier: zym_core::qualifier::Qualifier, init: &Option<Expr>, line: u32) -> CgResult<()> {
        let is_global = self.current_ref().is_global_scope;

        if !is_global {
            // A local's home register is whichever register its initializer
            // (or the `LoadNull` standing in for a missing one) naturally
            // lands in at the current watermark, so a declaration never
            // needs an extra Move.
            let reg = match init {
                Some(expr) => self.compile_expr(expr)?,
                None => {
                    let r = self.alloc_register(line)?;
                    self.emit_abc(OpCode::LoadNull, r, 0, 0, line);
                    r
                }
            };
            self.declare_local(name, qualifier, reg, line)?;
            return Ok(());
        }

        let reg = self.alloc_register(line)?;
        match init {
            Some(expr) => {
                let value_reg = self.compile_expr(expr)?;
                if value_reg != reg {
                    self.emit_abc(OpCode::Move, reg, value_reg, 0, line);
                }
            }
            None => {
                self.emit_abc(OpCode::LoadNull, reg, 0, 0, line);
            }
        }
        self.define_global_from_register(name, reg, line)?;
        self.free_to(reg);
        Ok(())
    }

    fn compile_return(&mut self, value: &Option<Expr>, line: u32) -> CgResult<()> {
        if self.frames.len() < 2 && self.current_ref().is_global_scope {
            return Err(CodeGenError::ReturnOutsideFunction { line });
        }
        if let Some(Expr::Call { callee, args, .. }) = value {
            if let Some(args) = self.self_tail_call_args(callee, args) {
                return self.compile_tail_call_self(&args, line);
            }
        }
        let mark = self.register_mark();
        self.emit_abc(OpCode::CloseFrameUpvalues, 0, 0, 0, line);
        let reg = match value {
            Some(expr) => self.compile_expr(expr)?,
            None => {
                let r = self.alloc_register(line)?;
                self.emit_abc(OpCode::LoadNull, r, 0, 0, line);
                r
            }
        };
        self.emit_abc(OpCode::Return, reg, 0, 0, line);
        self.free_to(mark);
        Ok(())
    }

    /// `return f(args)` rewrites to `TAIL_CALL_SELF` (spec §4.3.9) only when
    /// every one of these holds: TCO isn't disabled, we're inside a real
    /// function (not the top-level script), the callee is a bare name, and
    /// that name/arity combination mangles to the enclosing function's own
    /// binding — i.e. direct self-recursion, the one case `TcoMode::Safe`
    /// covers. `Smart`/`Aggressive` (non-self tail calls, tail calls nested
    /// inside `if`/`switch` branches) are not implemented; see DESIGN.md's
    /// "Tail-call modes" entry. Returns a clone of `args` to end the borrow
    /// on `self` before codegen needs `&mut self` again.
    fn self_tail_call_args(&self, callee: &Expr, args: &[Expr]) -> Option<Vec<Expr>> {
        if self.config.tco_mode == TcoMode::Off {
            return None;
        }
        if self.frames.len() < 2 {
            return None;
        }
        let Expr::Identifier(name) = callee else {
            return None;
        };
        let frame = self.current_ref();
        if mangle(name, args.len() as u8) != mangle(&frame.name, frame.arity) {
            return None;
        }
        Some(args.to_vec())
    }

    /// Emit the rewritten self tail call: evaluate every argument into a
    /// fresh register window above all live locals (so evaluating a later
    /// argument can still read an earlier parameter's current value without
    /// the write-back clobbering it), close this frame's upvalues exactly as
    /// an ordinary `return` would, then hand the window to `TAIL_CALL_SELF`,
    /// which copies it down into the parameter registers and jumps back to
    /// the function's entry point instead of pushing a new call frame.
    fn compile_tail_call_self(&mut self, args: &[Expr], line: u32) -> CgResult<()> {
        if args.len() > 250 {
            return Err(CodeGenError::TooManyArguments { line });
        }
        self.emit_abc(OpCode::CloseFrameUpvalues, 0, 0, 0, line);
        let mark = self.register_mark();
        let base = mark;
        for arg in args {
            let arg_reg = self.alloc_register(line)?;
            self.compile_expr_into(arg, arg_reg, line)?;
        }
        self.emit_abc(OpCode::TailCallSelf, base, args.len() as u8, 0, line);
        self.free_to(mark);
        Ok(())
    }

    fn compile_if(&mut self, cond: &Expr, then_branch: &[Stmt], else_branch: Option<&[Stmt]>, line: u32) -> CgResult<()> {
        let mark = self.register_mark();
        let cond_reg = self.compile_expr(cond)?;
        self.free_to(mark);
        let else_jump = self.emit_jump(OpCode::JumpIfFalse, line);
        self.patch_jump_operand(else_jump, cond_reg);

        self.push_scope();
        self.hoist_block(then_branch, 0)?;
        self.compile_block_statements(then_branch)?;
        self.pop_scope(line);

        if let Some(else_body) = else_branch {
            let end_jump = self.emit_jump(OpCode::Jump, line);
            self.patch_jump(else_jump);
            self.push_scope();
            self.hoist_block(else_body, 0)?;
            self.compile_block_statements(else_body)?;
            self.pop_scope(line);
            self.patch_jump(end_jump);
        } else {
            self.patch_jump(else_jump);
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &[Stmt], line: u32) -> CgResult<()> {
        let loop_start = self.current_ref().chunk.len();
        let mark = self.register_mark();
        let cond_reg = self.compile_expr(cond)?;
        self.free_to(mark);
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse, line);
        self.patch_jump_operand(exit_jump, cond_reg);

        self.current().loops.push(LoopContext { break_patches: Vec::new(), continue_patches: Vec::new(), register_floor: mark });
        self.push_scope();
        self.hoist_block(body, 0)?;
        self.compile_block_statements(body)?;
        self.pop_scope(line);
        let ctx = self.current().loops.pop().expect("pushed above");
        for idx in ctx.continue_patches {
            self.patch_jump(idx);
        }

        self.emit_loop(loop_start, line);
        self.patch_jump(exit_jump);
        for idx in ctx.break_patches {
            self.patch_jump(idx);
        }
        Ok(())
    }

    fn compile_do_while(&mut self, body: &[Stmt], cond: &Expr, line: u32) -> CgResult<()> {
        let loop_start = self.current_ref().chunk.len();
        let mark = self.register_mark();

        self.current().loops.push(LoopContext { break_patches: Vec::new(), continue_patches: Vec::new(), register_floor: mark });
        self.push_scope();
        self.hoist_block(body, 0)?;
        self.compile_block_statements(body)?;
        self.pop_scope(line);

        // `continue` in a do-while re-enters at the condition check, not the
        // loop header, since the body has already run once unconditionally:
        // patch_jump() targets "here", and here is the condition check.
        let ctx = self.current().loops.pop().expect("pushed above");
        for idx in ctx.continue_patches {
            self.patch_jump(idx);
        }

        let cond_reg = self.compile_expr(cond)?;
        self.free_to(mark);
        let repeat_jump = self.emit_jump(OpCode::JumpIfFalse, line);
        self.patch_jump_operand(repeat_jump, cond_reg);
        // `repeat_jump` skips the loop-back when the condition is false;
        // when true, fall through into an unconditional jump to the top.
        self.emit_loop(loop_start, line);
        self.patch_jump(repeat_jump);

        for idx in ctx.break_patches {
            self.patch_jump(idx);
        }
        Ok(())
    }

    fn compile_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        increment: Option<&Expr>,
        body: &[Stmt],
        line: u32,
    ) -> CgResult<()> {
        self.push_scope();
        if let Some(init_stmt) = init {
            self.compile_stmt(init_stmt)?;
        }

        let loop_start = self.current_ref().chunk.len();
        let exit_jump = match cond {
            Some(cond_expr) => {
                let mark = self.register_mark();
                let cond_reg = self.compile_expr(cond_expr)?;
                self.free_to(mark);
                let jump = self.emit_jump(OpCode::JumpIfFalse, line);
                self.patch_jump_operand(jump, cond_reg);
                Some(jump)
            }
            None => None,
        };

        let floor = self.register_mark();
        self.current().loops.push(LoopContext { break_patches: Vec::new(), continue_patches: Vec::new(), register_floor: floor });
        self.push_scope();
        self.hoist_block(body, 0)?;
        self.compile_block_statements(body)?;
        self.pop_scope(line);
        let ctx = self.current().loops.pop().expect("pushed above");
        for idx in ctx.continue_patches {
            self.patch_jump(idx);
        }

        if let Some(increment_expr) = increment {
            let mark = self.register_mark();
            self.compile_expr(increment_expr)?;
            self.free_to(mark);
        }

        self.emit_loop(loop_start, line);
        if let Some(jump) = exit_jump {
            self.patch_jump(jump);
        }
        for idx in ctx.break_patches {
            self.patch_jump(idx);
        }
        self.pop_scope(line);
        Ok(())
    }

    fn compile_break(&mut self, line: u32) -> CgResult<()> {
        if self.current_ref().loops.is_empty() {
            return Err(CodeGenError::BreakOutsideLoop { line });
        }
        let floor = self.current_ref().loops.last().expect("checked above").register_floor;
        self.free_to(floor);
        let jump = self.emit_jump(OpCode::Jump, line);
        self.current().loops.last_mut().expect("checked above").break_patches.push(jump);
        Ok(())
    }

    fn compile_continue(&mut self, line: u32) -> CgResult<()> {
        if self.current_ref().loops.is_empty() {
            return Err(CodeGenError::ContinueOutsideLoop { line });
        }
        let floor = self.current_ref().loops.last().expect("checked above").register_floor;
        self.free_to(floor);
        let jump = self.emit_jump(OpCode::Jump, line);
        self.current().loops.last_mut().expect("checked above").continue_patches.push(jump);
        Ok(())
    }

    /// `switch` lowers to a cascade of equality tests against the
    /// discriminant, each guarding its case body — there is no jump-table
    /// opcode in this instruction set, so this is the same shape a chain of
    /// `if (d == case) {...} else if ...` would compile to.
    fn compile_switch(&mut self, discriminant: &Expr, cases: &[SwitchCase], default: Option<&[Stmt]>, line: u32) -> CgResult<()> {
        let disc_mark = self.register_mark();
        let disc_reg = self.compile_expr(discriminant)?;

        let mut end_jumps = Vec::new();
        for case in cases {
            let case_mark = self.register_mark();
            let case_reg = self.compile_expr(&case.value)?;
            let eq_reg = self.alloc_register(line)?;
            self.emit_abc(OpCode::Eq, eq_reg, disc_reg, case_reg, line);
            let skip_jump = self.emit_jump(OpCode::JumpIfFalse, line);
            self.patch_jump_operand(skip_jump, eq_reg);
            self.free_to(case_mark);

            self.push_scope();
            self.hoist_block(&case.body, 0)?;
            self.compile_block_statements(&case.body)?;
            self.pop_scope(line);

            end_jumps.push(self.emit_jump(OpCode::Jump, line));
            self.patch_jump(skip_jump);
        }

        if let Some(default_body) = default {
            self.push_scope();
            self.hoist_block(default_body, 0)?;
            self.compile_block_statements(default_body)?;
            self.pop_scope(line);
        }

        for jump in end_jumps {
            self.patch_jump(jump);
        }
        self.free_to(disc_mark);
        Ok(())
    }

    fn compile_goto(&mut self, label: &str, line: u32) -> CgResult<()> {
        let depth = self.current_ref().scopes.len();
        let jump = self.emit_jump(OpCode::Jump, line);
        self.current().pending_gotos.push((label.to_string(), jump, depth, line));
        Ok(())
    }

    fn compile_label(&mut self, name: &str, line: u32) -> CgResult<()> {
        let depth = self.current_ref().scopes.len();
        let offset = self.current_ref().chunk.len();
        if self.current().labels.insert(name.to_string(), (offset, depth)).is_some() {
            return Err(CodeGenError::DuplicateLabel { label: name.to_string(), line });
        }
        Ok(())
    }

    /// Resolve every `goto` recorded against the current frame's label table,
    /// called once the frame's body (and therefore every label in it) is
    /// fully compiled. A `goto` into a label whose scope is more deeply
    /// nested than the goto site would skip that scope's local
    /// initialization, so that combination is rejected (spec §4.3.4).
    pub(crate) fn resolve_pending_gotos(&mut self) -> CgResult<()> {
        let frame = self.current();
        let pending = std::mem::take(&mut frame.pending_gotos);
        for (label, jump_index, goto_depth, line) in pending {
            let frame = self.current_ref();
            let (target, label_depth) = *frame
                .labels
                .get(&label)
                .ok_or_else(|| CodeGenError::UnknownLabel { label: label.clone(), line })?;
            if label_depth > goto_depth {
                return Err(CodeGenError::GotoIntoScope { label: label.clone(), line });
            }
            let word = frame.chunk.code[jump_index];
            let (op, a, _) = opcode::unpack_abx_signed(word).expect("jump word");
            let offset = target as i32 - jump_index as i32 - 1;
            self.current().chunk.patch_word(jump_index, opcode::pack_abx_signed(op, a, offset as i16));
        }
        Ok(())
    }

}
