//! Expression lowering (spec §4.3.3-§4.3.7).
//!
//! Every `compile_expr` call allocates a fresh result register at (or above)
//! the current watermark and returns it; callers that need a value in a
//! *specific* register use [`Compiler::compile_expr_into`] instead, which
//! compiles into a scratch register when the natural result lands elsewhere
//! and `Clone`s it over rather than threading a destination through every
//! recursive call. Binary/unary/logical/comparison ops only ever emit the
//! base ABC forms (see `codegen/mod.rs`'s module doc comment).

use zym_core::object::ObjRef;
use zym_core::opcode::OpCode;
use zym_core::qualifier::Qualifier;
use zym_core::value::Value;

use crate::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};

use super::{CgResult, CodeGenError, Compiler};

/// Where a resolved identifier lives, before loading it into a register.
enum NameBinding {
    Local(u8),
    Upvalue(u8),
    Global,
}

impl<'h> Compiler<'h> {
    /// Compile `expr`, returning the register holding its value. The
    /// register is always >= the watermark in effect when this call began.
    pub(crate) fn compile_expr(&mut self, expr: &Expr) -> CgResult<u8> {
        match expr {
            Expr::Null => {
                let r = self.alloc_register(0)?;
                self.emit_abc(OpCode::LoadNull, r, 0, 0, 0);
                Ok(r)
            }
            Expr::Bool(b) => {
                let r = self.alloc_register(0)?;
                self.emit_abc(if *b { OpCode::LoadTrue } else { OpCode::LoadFalse }, r, 0, 0, 0);
                Ok(r)
            }
            Expr::Number(n) => {
                let line = 0;
                let r = self.alloc_register(line)?;
                let idx = self.add_constant(Value::Double(*n))?;
                self.load_const_into(r, idx, line);
                Ok(r)
            }
            Expr::Str(s) => {
                let line = 0;
                let r = self.alloc_register(line)?;
                let obj = self.heap.intern_string(s);
                let idx = self.add_constant(Value::Object(obj))?;
                self.load_const_into(r, idx, line);
                Ok(r)
            }
            Expr::Identifier(name) => self.compile_identifier(name, 0),
            Expr::Unary { op, operand, line } => self.compile_unary(op, operand, *line),
            Expr::Binary { op, left, right, line } => self.compile_binary(op, left, right, *line),
            Expr::Logical { op, left, right, line } => self.compile_logical(op, left, right, *line),
            Expr::Ternary { cond, then_branch, else_branch, line } => {
                self.compile_ternary(cond, then_branch, else_branch, *line)
            }
            Expr::Assign { target, value, is_slot_rebind, line } => {
                self.compile_assign(target, value, *is_slot_rebind, *line)
            }
            Expr::Call { callee, args, line } => self.compile_call(callee, args, *line),
            Expr::Index { container, index, line } => self.compile_index_get(container, index, *line),
            Expr::Property { container, name, line } => self.compile_property_get(container, name, *line),
            Expr::List(items) => self.compile_list(items, 0),
            Expr::Map(entries) => self.compile_map(entries, 0),
            Expr::StructInitNamed { name, fields, line } => self.compile_struct_named_init(name, fields, *line),
            Expr::MakeRef { qualifier, target, line } => self.compile_make_ref(*qualifier, target, *line),
            Expr::TypeOf { operand, line } => {
                let src = self.compile_expr(operand)?;
                let r = self.alloc_register(*line)?;
                self.emit_abc(OpCode::TypeOf, r, src, 0, *line);
                Ok(r)
            }
            Expr::Clone { operand, line } => {
                let src = self.compile_expr(operand)?;
                let r = self.alloc_register(*line)?;
                self.emit_abc(OpCode::Clone, r, src, 0, *line);
                Ok(r)
            }
            Expr::Spread { line, .. } => Err(CodeGenError::InvalidSpreadContext { line: *line }),
            Expr::FuncLiteral { params, body, line } => self.compile_func_literal(params, body, *line),
        }
    }

    /// Compile `expr`, then move/clone its value into `dest` if it didn't
    /// already land there. Used for call arguments and other fixed-window
    /// positions where the destination register is chosen by the caller.
    pub(crate) fn compile_expr_into(&mut self, expr: &Expr, dest: u8, line: u32) -> CgResult<()> {
        let r = self.compile_expr(expr)?;
        if r != dest {
            self.emit_abc(OpCode::Move, dest, r, 0, line);
        }
        Ok(())
    }

    /// Resolve `name` (local / upvalue / global / hoisted-function / ambiguous
    /// overload) and write its value directly into `dest`, without going
    /// through a separate "compile then move" step. This is the primitive
    /// [`Compiler::compile_identifier`] and the dispatcher-construction path
    /// in `functions.rs` both build on.
    pub(crate) fn compile_identifier_into(&mut self, name: &str, dest: u8, line: u32) -> CgResult<()> {
        if let Some((reg, qualifier)) = self.resolve_local(name) {
            if qualifier.is_reference_kind() {
                self.emit_abc(OpCode::DerefRef, dest, reg, 0, line);
            } else if reg != dest {
                self.emit_abc(OpCode::Move, dest, reg, 0, line);
            }
            return Ok(());
        }
        if let Some(idx) = self.resolve_upvalue(name) {
            self.emit_abc(OpCode::GetUpvalue, dest, idx, 0, line);
            return Ok(());
        }
        if let Some(mangled) = self.resolve_bare_function_name(name, line)? {
            return self.get_global_into(&mangled, dest, line);
        }
        if self.is_ambiguous_function_name(name) {
            let src = self.compile_dispatcher_reference(name, line)?;
            if src != dest {
                self.emit_abc(OpCode::Move, dest, src, 0, line);
            }
            return Ok(());
        }
        self.get_global_into(name, dest, line)
    }

    fn compile_identifier(&mut self, name: &str, line: u32) -> CgResult<u8> {
        let r = self.alloc_register(line)?;
        self.compile_identifier_into(name, r, line)?;
        Ok(r)
    }

    fn resolve_binding(&mut self, name: &str) -> NameBinding {
        if let Some((reg, _)) = self.resolve_local(name) {
            return NameBinding::Local(reg);
        }
        if let Some(idx) = self.resolve_upvalue(name) {
            return NameBinding::Upvalue(idx);
        }
        NameBinding::Global
    }

    fn compile_unary(&mut self, op: &UnaryOp, operand: &Expr, line: u32) -> CgResult<u8> {
        let src = self.compile_expr(operand)?;
        let r = self.alloc_register(line)?;
        let opcode = match op {
            UnaryOp::Neg => OpCode::Neg,
            UnaryOp::Not => OpCode::Not,
            UnaryOp::BNot => OpCode::BNot,
        };
        self.emit_abc(opcode, r, src, 0, line);
        Ok(r)
    }

    /// Base ABC form, chosen when the right operand isn't a numeric literal
    /// (spec §4.3.5). `x + y` always emits this, never a peephole form.
    fn compile_binary(&mut self, op: &BinaryOp, left: &Expr, right: &Expr, line: u32) -> CgResult<u8> {
        if let Expr::Number(n) = right {
            return self.compile_binary_literal(op, left, *n, line);
        }
        let l = self.compile_expr(left)?;
        let r = self.compile_expr(right)?;
        let dest = self.alloc_register(line)?;
        self.emit_abc(Self::base_opcode(op), dest, l, r, line);
        Ok(dest)
    }

    /// `x <op> <literal>` (spec §4.3.5 peephole selection). The `_I`/`_L`
    /// forms are in-place (`a:8|bx:16` leaves no room for a separate left
    /// register alongside a 16-bit immediate) so the left operand is first
    /// moved into the destination register, then the immediate or inline
    /// double literal is applied to it directly — this still avoids the
    /// constant-pool load and spare register a materialized-literal base
    /// form would need. An integral literal fitting `i16` prefers `_I`;
    /// anything else (including every non-integral double) uses `_L`.
    fn compile_binary_literal(&mut self, op: &BinaryOp, left: &Expr, n: f64, line: u32) -> CgResult<u8> {
        let l = self.compile_expr(left)?;
        let dest = self.alloc_register(line)?;
        if l != dest {
            self.emit_abc(OpCode::Move, dest, l, 0, line);
        }
        let fits_i16 = n.fract() == 0.0 && n >= i16::MIN as f64 && n <= i16::MAX as f64;
        if fits_i16 {
            self.emit_abx(Self::immediate_opcode(op), dest, (n as i16) as u16, line);
        } else {
            self.emit_abx(Self::literal_opcode(op), dest, 0, line);
            self.current().chunk.write_f64_literal(n, line);
        }
        Ok(dest)
    }

    fn base_opcode(op: &BinaryOp) -> OpCode {
        match op {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Sub => OpCode::Sub,
            BinaryOp::Mul => OpCode::Mul,
            BinaryOp::Div => OpCode::Div,
            BinaryOp::Mod => OpCode::Mod,
            BinaryOp::BAnd => OpCode::BAnd,
            BinaryOp::BOr => OpCode::BOr,
            BinaryOp::BXor => OpCode::BXor,
            BinaryOp::BLShift => OpCode::BLShift,
            BinaryOp::BRShiftI => OpCode::BRShiftI,
            BinaryOp::BRShiftU => OpCode::BRShiftU,
            BinaryOp::Eq => OpCode::Eq,
            BinaryOp::Ne => OpCode::Ne,
            BinaryOp::Lt => OpCode::Lt,
            BinaryOp::Le => OpCode::Le,
            BinaryOp::Gt => OpCode::Gt,
            BinaryOp::Ge => OpCode::Ge,
        }
    }

    fn immediate_opcode(op: &BinaryOp) -> OpCode {
        match op {
            BinaryOp::Add => OpCode::AddI,
            BinaryOp::Sub => OpCode::SubI,
            BinaryOp::Mul => OpCode::MulI,
            BinaryOp::Div => OpCode::DivI,
            BinaryOp::Mod => OpCode::ModI,
            BinaryOp::BAnd => OpCode::BAndI,
            BinaryOp::BOr => OpCode::BOrI,
            BinaryOp::BXor => OpCode::BXorI,
            BinaryOp::BLShift => OpCode::BLShiftI,
            BinaryOp::BRShiftI => OpCode::BRShiftII,
            BinaryOp::BRShiftU => OpCode::BRShiftUI,
            BinaryOp::Eq => OpCode::EqI,
            BinaryOp::Ne => OpCode::NeI,
            BinaryOp::Lt => OpCode::LtI,
            BinaryOp::Le => OpCode::LeI,
            BinaryOp::Gt => OpCode::GtI,
            BinaryOp::Ge => OpCode::GeI,
        }
    }

    fn literal_opcode(op: &BinaryOp) -> OpCode {
        match op {
            BinaryOp::Add => OpCode::AddL,
            BinaryOp::Sub => OpCode::SubL,
            BinaryOp::Mul => OpCode::MulL,
            BinaryOp::Div => OpCode::DivL,
            BinaryOp::Mod => OpCode::ModL,
            BinaryOp::BAnd => OpCode::BAndL,
            BinaryOp::BOr => OpCode::BOrL,
            BinaryOp::BXor => OpCode::BXorL,
            BinaryOp::BLShift => OpCode::BLShiftL,
            BinaryOp::BRShiftI => OpCode::BRShiftIL,
            BinaryOp::BRShiftU => OpCode::BRShiftUL,
            BinaryOp::Eq => OpCode::EqL,
            BinaryOp::Ne => OpCode::NeL,
            BinaryOp::Lt => OpCode::LtL,
            BinaryOp::Le => OpCode::LeL,
            BinaryOp::Gt => OpCode::GtL,
            BinaryOp::Ge => OpCode::GeL,
        }
    }

    /// `&&`/`||` short-circuit: evaluate `left` into the result register,
    /// skip `right` if it already decides the outcome, otherwise evaluate
    /// `right` into the same register. `JumpIfFalse` always tests for
    /// falsiness, so `||` tests a `Not`-negated copy of the left value to
    /// get "skip if truthy" out of the same opcode.
    fn compile_logical(&mut self, op: &LogicalOp, left: &Expr, right: &Expr, line: u32) -> CgResult<u8> {
        let dest = self.alloc_register(line)?;
        let l = self.compile_expr(left)?;
        self.emit_abc(OpCode::Move, dest, l, 0, line);
        self.free_to(dest.wrapping_add(1));

        let skip_jump = self.emit_jump(OpCode::JumpIfFalse, line);
        match op {
            LogicalOp::And => {
                self.patch_jump_operand(skip_jump, dest);
            }
            LogicalOp::Or => {
                let not_reg = self.alloc_register(line)?;
                self.emit_abc(OpCode::Not, not_reg, dest, 0, line);
                self.patch_jump_operand(skip_jump, not_reg);
                self.free_to(not_reg);
            }
        }

        let r = self.compile_expr(right)?;
        self.emit_abc(OpCode::Move, dest, r, 0, line);
        self.free_to(dest.wrapping_add(1));
        self.patch_jump(skip_jump);

        self.free_to(dest.wrapping_add(1));
        Ok(dest)
    }

    /// Patch an already-emitted `JumpIfFalse`'s `a` operand (the register it
    /// tests) after the fact, since the test register isn't known until the
    /// left operand is compiled.
    pub(crate) fn patch_jump_operand(&mut self, index: usize, test_reg: u8) {
        let word = self.current_ref().chunk.code[index];
        let (op, _, bx) = zym_core::opcode::unpack_abx_signed(word).expect("jump word");
        self.current().chunk.patch_word(index, zym_core::opcode::pack_abx_signed(op, test_reg, bx));
    }

    fn compile_ternary(&mut self, cond: &Expr, then_branch: &Expr, else_branch: &Expr, line: u32) -> CgResult<u8> {
        let cond_reg = self.compile_expr(cond)?;
        self.free_to(cond_reg);
        let else_jump = self.emit_jump(OpCode::JumpIfFalse, line);
        self.patch_jump_operand(else_jump, cond_reg);

        let dest = self.alloc_register(line)?;
        let then_reg = self.compile_expr(then_branch)?;
        self.emit_abc(OpCode::Move, dest, then_reg, 0, line);
        self.free_to(dest.wrapping_add(1));
        let end_jump = self.emit_jump(OpCode::Jump, line);

        self.patch_jump(else_jump);
        self.free_to(dest);
        let else_reg = self.compile_expr(else_branch)?;
        self.emit_abc(OpCode::Move, dest, else_reg, 0, line);
        self.free_to(dest.wrapping_add(1));
        self.patch_jump(end_jump);

        self.free_to(dest.wrapping_add(1));
        Ok(dest)
    }

    /// Lower `target = value` (and, via the parser's compound-assignment
    /// desugaring, `target += value` etc.) per spec §4.3.3: a `ref`/`slot`
    /// local writes through via `SetRef`; an `Index`/`Property` target uses
    /// `SetIndex`/`SetProperty`; a plain identifier resolves to a local
    /// move, an upvalue `SetUpvalue`, or a global `SetGlobal`.
    fn compile_assign(&mut self, target: &Expr, value: &Expr, _is_slot_rebind: bool, line: u32) -> CgResult<u8> {
        match target {
            Expr::Identifier(name) => {
                if let Some((reg, qualifier)) = self.resolve_local(name) {
                    let value_reg = self.compile_expr(value)?;
                    if qualifier.is_reference_kind() {
                        self.emit_abc(OpCode::SetRef, reg, value_reg, 0, line);
                    } else if value_reg != reg {
                        self.emit_abc(OpCode::Move, reg, value_reg, 0, line);
                    }
                    return Ok(value_reg);
                }
                if let Some(idx) = self.resolve_upvalue(name) {
                    let value_reg = self.compile_expr(value)?;
                    self.emit_abc(OpCode::SetUpvalue, value_reg, idx, 0, line);
                    return Ok(value_reg);
                }
                let value_reg = self.compile_expr(value)?;
                self.set_global_from(name, value_reg, line)?;
                Ok(value_reg)
            }
            Expr::Index { container, index, line: iline } => {
                let container_reg = self.compile_expr(container)?;
                let index_reg = self.compile_expr(index)?;
                let value_reg = self.compile_expr(value)?;
                self.emit_abc(OpCode::SetIndex, container_reg, index_reg, value_reg, *iline);
                Ok(value_reg)
            }
            Expr::Property { container, name, line: pline } => {
                let container_reg = self.compile_expr(container)?;
                let key_reg = self.alloc_register(*pline)?;
                let key_idx = self.global_name_const(name)?;
                self.load_const_into(key_reg, key_idx, *pline);
                let value_reg = self.compile_expr(value)?;
                self.emit_abc(OpCode::SetProperty, container_reg, key_reg, value_reg, *pline);
                Ok(value_reg)
            }
            _ => Err(CodeGenError::InvalidAssignmentTarget { line }),
        }
    }

    /// Lower a call expression: detects the two non-call-opcode special
    /// cases first (struct positional-literal `P(3, 4)`, bare-identifier
    /// callee naming a known struct schema; and a dispatcher reference used
    /// directly as a callee falls through to the normal `Call` path since a
    /// `Dispatcher` object is itself callable at runtime), then falls back
    /// to a normal register-window call.
    fn compile_call(&mut self, callee: &Expr, args: &[Expr], line: u32) -> CgResult<u8> {
        if let Expr::Identifier(name) = callee {
            if self.struct_schemas.contains_key(name) && self.resolve_binding_is_global(name) {
                return self.compile_struct_positional_init(name, args, line);
            }
        }

        if args.len() > 250 {
            return Err(CodeGenError::TooManyArguments { line });
        }

        let base = self.register_mark();
        let callee_reg = self.alloc_register(line)?;
        self.compile_callee_into(callee, callee_reg, line)?;
        for arg in args {
            let arg_reg = self.alloc_register(line)?;
            self.compile_expr_into(arg, arg_reg, line)?;
        }
        self.emit_abc(OpCode::Call, base, (args.len() + 1) as u8, 0, line);
        self.free_to(base.wrapping_add(1));
        Ok(base)
    }

    /// True only when `name` isn't shadowed by a local or upvalue in the
    /// current scope chain — the condition under which a bare identifier
    /// matching a struct/enum schema name is treated as that schema rather
    /// than an ordinary variable reference (spec §4.3.6).
    fn resolve_binding_is_global(&mut self, name: &str) -> bool {
        matches!(self.resolve_binding(name), NameBinding::Global)
    }

    fn compile_callee_into(&mut self, callee: &Expr, dest: u8, line: u32) -> CgResult<()> {
        if let Expr::Identifier(name) = callee {
            return self.compile_identifier_into(name, dest, line);
        }
        self.compile_expr_into(callee, dest, line)
    }

    fn compile_index_get(&mut self, container: &Expr, index: &Expr, line: u32) -> CgResult<u8> {
        let container_reg = self.compile_expr(container)?;
        let index_reg = self.compile_expr(index)?;
        let dest = self.alloc_register(line)?;
        self.emit_abc(OpCode::GetIndex, dest, container_reg, index_reg, line);
        Ok(dest)
    }

    /// `container.name` (spec §4.3.6): a bare unshadowed `Enum.Variant`
    /// reference compiles to a compile-time `Value::Enum` constant instead
    /// of a runtime property lookup, since the enum's variant set is fully
    /// known at compile time and variant "access" has no associated heap
    /// object to fetch.
    fn compile_property_get(&mut self, container: &Expr, name: &str, line: u32) -> CgResult<u8> {
        if let Expr::Identifier(enum_name) = container {
            if self.resolve_binding_is_global(enum_name) {
                if let Some(info) = self.enum_schemas.get(enum_name) {
                    let variant_index = info
                        .variants
                        .iter()
                        .position(|v| v == name)
                        .ok_or_else(|| CodeGenError::UnknownEnumVariant {
                            enum_name: enum_name.clone(),
                            variant: name.to_string(),
                            line,
                        })?;
                    let type_id = info.type_id;
                    let dest = self.alloc_register(line)?;
                    let idx = self.add_constant(Value::Enum { type_id, variant_index: variant_index as u16 })?;
                    self.load_const_into(dest, idx, line);
                    return Ok(dest);
                }
            }
        }
        let container_reg = self.compile_expr(container)?;
        let key_reg = self.alloc_register(line)?;
        let key_idx = self.global_name_const(name)?;
        self.load_const_into(key_reg, key_idx, line);
        let dest = self.alloc_register(line)?;
        self.emit_abc(OpCode::GetProperty, dest, container_reg, key_reg, line);
        Ok(dest)
    }

    /// `[a, b, ...c]` (spec §4.3.5). With no spread elements this is the
    /// fast all-at-once `NewList` over a consecutive register window; a
    /// spread element's length isn't known until runtime, so as soon as one
    /// is present the whole literal instead builds an empty list and grows
    /// it in source order via `ListAppend`/`ListExtend` (see DESIGN.md's
    /// "list spread lowering" entry).
    fn compile_list(&mut self, items: &[Expr], line: u32) -> CgResult<u8> {
        if !items.iter().any(|i| matches!(i, Expr::Spread { .. })) {
            let base = self.register_mark();
            for item in items {
                let reg = self.alloc_register(line)?;
                self.compile_expr_into(item, reg, line)?;
            }
            self.emit_abc(OpCode::NewList, base, items.len() as u8, 0, line);
            self.free_to(base.wrapping_add(1));
            return Ok(base);
        }

        let base = self.alloc_register(line)?;
        self.emit_abc(OpCode::NewList, base, 0, 0, line);
        for item in items {
            let mark = self.register_mark();
            if let Expr::Spread { operand, .. } = item {
                let src = self.compile_expr(operand)?;
                self.emit_abc(OpCode::ListExtend, base, src, 0, line);
            } else {
                let src = self.compile_expr(item)?;
                self.emit_abc(OpCode::ListAppend, base, src, 0, line);
            }
            self.free_to(mark);
        }
        Ok(base)
    }

    /// `{ "k": v, ... }` (spec §4.3.5): key/value pairs compile into
    /// consecutive `(key, value)` register pairs starting at `base`.
    fn compile_map(&mut self, entries: &[(String, Expr)], line: u32) -> CgResult<u8> {
        let base = self.register_mark();
        for (key, value) in entries {
            let key_reg = self.alloc_register(line)?;
            let key_obj = self.heap.intern_string(key);
            let key_idx = self.add_constant(Value::Object(key_obj))?;
            self.load_const_into(key_reg, key_idx, line);
            let value_reg = self.alloc_register(line)?;
            self.compile_expr_into(value, value_reg, line)?;
        }
        self.emit_abc(OpCode::NewMap, base, entries.len() as u8, 0, line);
        self.free_to(base.wrapping_add(1));
        Ok(base)
    }

    /// `ref <lvalue>` / `slot <lvalue>` (spec §4.3.3): picks the `Make*Ref`
    /// opcode variant matching the target l-value's shape (local, upvalue,
    /// global, index, or property), and the `Slot`-vs-`Ref` qualifier picks
    /// the flattening-vs-non-flattening sibling within that family.
    fn compile_make_ref(&mut self, qualifier: Qualifier, target: &Expr, line: u32) -> CgResult<u8> {
        let is_slot = matches!(qualifier, Qualifier::Slot);
        match target {
            Expr::Identifier(name) => match self.resolve_binding(name) {
                NameBinding::Local(reg) => {
                    let dest = self.alloc_register(line)?;
                    let op = if is_slot { OpCode::MakeSlotRef } else { OpCode::MakeRef };
                    self.emit_abc(op, dest, reg, 0, line);
                    Ok(dest)
                }
                NameBinding::Upvalue(idx) => {
                    let dest = self.alloc_register(line)?;
                    let op = if is_slot { OpCode::MakeSlotUpvalueRef } else { OpCode::MakeUpvalueRef };
                    self.emit_abc(op, dest, idx, 0, line);
                    Ok(dest)
                }
                NameBinding::Global => {
                    let dest = self.alloc_register(line)?;
                    let idx = self.global_name_const(name)?;
                    let op = if is_slot { OpCode::MakeSlotGlobalRef } else { OpCode::MakeGlobalRef };
                    self.emit_abx(op, dest, idx, line);
                    Ok(dest)
                }
            },
            Expr::Index { container, index, .. } => {
                let container_reg = self.compile_expr(container)?;
                let index_reg = self.compile_expr(index)?;
                let dest = self.alloc_register(line)?;
                let op = if is_slot { OpCode::MakeSlotIndexRef } else { OpCode::MakeIndexRef };
                self.emit_abc(op, dest, container_reg, index_reg, line);
                Ok(dest)
            }
            Expr::Property { container, name, .. } => {
                let container_reg = self.compile_expr(container)?;
                let key_reg = self.alloc_register(line)?;
                let key_idx = self.global_name_const(name)?;
                self.load_const_into(key_reg, key_idx, line);
                let dest = self.alloc_register(line)?;
                let op = if is_slot { OpCode::MakeSlotPropertyRef } else { OpCode::MakePropertyRef };
                self.emit_abc(op, dest, container_reg, key_reg, line);
                Ok(dest)
            }
            _ => Err(CodeGenError::InvalidRefTarget { line }),
        }
    }

    /// `func(params) { body }` as an expression: compiled exactly like a
    /// named nested function, minus a hoisting-table entry, since an
    /// anonymous function literal can never be the target of a forward
    /// call-by-name.
    fn compile_func_literal(&mut self, params: &[crate::ast::Param], body: &[crate::ast::Stmt], line: u32) -> CgResult<u8> {
        let obj: ObjRef = self.compile_function_object("<anonymous>", params, body, line)?;
        let const_idx = self.add_constant(Value::Object(obj))?;
        let dest = self.alloc_register(line)?;
        self.emit_abx(OpCode::Closure, dest, const_idx, line);
        Ok(dest)
    }
}
