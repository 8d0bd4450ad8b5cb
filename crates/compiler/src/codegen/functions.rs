//! Function hoisting, overload mangling, and call-site resolution
//! (spec §4.3.2).
//!
//! Two-pass per block: [`Compiler::hoist_block`] records every direct
//! `func`/`struct`/`enum` declaration's name (and, for functions, arity)
//! before any statement in the block is compiled, so a forward reference
//! to a function declared later in the same block resolves correctly.
//! Declaration tables are compiler-wide rather than rescoped per block —
//! see DESIGN.md's "function hoisting scope" entry for why that's an
//! accepted simplification here.

use zym_core::object::{FunctionData, ObjRef};
use zym_core::opcode::OpCode;
use zym_core::qualifier::{Qualifier, QualifierSignature};
use zym_core::value::Value;

use crate::ast::{Param, Stmt};

use super::{CgResult, CodeGenError, Compiler};

/// Mangle a declared name and arity the same way the compiler's own call
/// sites do (spec §6 uses the identical `name@arity` convention for native
/// registration, so the two namespaces never collide by construction).
pub(crate) fn mangle(name: &str, arity: u8) -> String {
    zym_core::native::mangle(name, arity)
}

impl<'h> Compiler<'h> {
    /// Record every direct `func`/`struct`/`enum` declaration in `stmts`
    /// (not recursing into nested blocks) before compiling any of them.
    pub(crate) fn hoist_block(&mut self, stmts: &[Stmt], _depth: usize) -> CgResult<()> {
        for stmt in stmts {
            match stmt {
                Stmt::FuncDecl { name, params, line, .. } => {
                    let arities = self.declared_functions.entry(name.clone()).or_default();
                    let arity = params.len() as u8;
                    if !arities.contains(&arity) {
                        arities.push(arity);
                    }
                    let _ = line;
                }
                Stmt::StructDecl { name, fields, line } => {
                    self.register_struct_schema(name, fields, *line)?;
                }
                Stmt::EnumDecl { name, variants, line } => {
                    self.register_enum_schema(name, variants, *line)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Compile a function's body into its own [`FunctionData`], returning
    /// the heap object. Pushes/pops a fresh [`super::FunctionFrame`].
    pub(crate) fn compile_function_object(
        &mut self,
        name: &str,
        params: &[Param],
        body: &[Stmt],
        line: u32,
    ) -> CgResult<ObjRef> {
        let arity = params.len() as u8;
        let qualifiers: Vec<Qualifier> = params.iter().map(|p| p.qualifier).collect();
        self.frames.push(super::FunctionFrame::new(name.to_string(), arity, qualifiers.clone(), false));

        for p in params {
            let reg = self.alloc_register(line)?;
            self.declare_local(&p.name, p.qualifier, reg, line)?;
        }

        self.hoist_block(body, 0)?;
        self.compile_block_statements(body)?;
        self.resolve_pending_gotos()?;

        // Implicit trailing `return null;` — harmless if every path already
        // returned explicitly (spec leaves unreachable-code elimination out
        // of scope, matching its constant-folding non-goal).
        self.emit_abc(OpCode::CloseFrameUpvalues, 0, 0, 0, line);
        let null_reg = self.alloc_register(line)?;
        self.emit_abc(OpCode::LoadNull, null_reg, 0, 0, line);
        self.emit_abc(OpCode::Return, null_reg, 0, 0, line);

        let frame = self.frames.pop().expect("pushed above");
        let qualifier_signature = QualifierSignature::compute(&qualifiers);
        let data = FunctionData {
            arity: frame.arity,
            max_regs: frame.max_register,
            upvalues: frame.upvalues.into_boxed_slice(),
            name: Some(name.to_string()),
            module_name: None,
            param_qualifiers: qualifiers.into_boxed_slice(),
            qualifier_signature,
            chunk: frame.chunk,
        };
        Ok(self.heap.alloc_function(data))
    }

    /// Compile a `func name(...) { ... }` declaration: builds the closure,
    /// binds it under its mangled `name@arity`, and — when `name` has only
    /// one declared arity in scope — also binds the bare `name` as a direct
    /// alias so unambiguous calls/references skip the mangled lookup.
    pub(crate) fn compile_function_decl(&mut self, name: &str, params: &[Param], body: &[Stmt], line: u32) -> CgResult<()> {
        let arity = params.len() as u8;
        let mangled = mangle(name, arity);
        let function_obj = self.compile_function_object(name, params, body, line)?;
        let const_idx = self.add_constant(Value::Object(function_obj))?;

        let mark = self.register_mark();
        let dest = self.alloc_register(line)?;
        self.emit_abx(OpCode::Closure, dest, const_idx, line);

        let is_only_overload = self
            .declared_functions
            .get(name)
            .map(|arities| arities.len() == 1)
            .unwrap_or(true);

        if self.current_ref().is_global_scope {
            self.define_global_from_register(&mangled, dest, line)?;
            if is_only_overload {
                self.define_global_from_register(name, dest, line)?;
            }
            self.free_to(mark);
        } else {
            self.declare_local(&mangled, Qualifier::Normal, dest, line)?;
            if is_only_overload {
                self.declare_local(name, Qualifier::Normal, dest, line)?;
            }
        }
        Ok(())
    }

    /// Resolve a bare identifier that isn't a local/upvalue against the
    /// function declaration table: `Some(mangled_name)` if `name` names
    /// exactly one declared function, `None` if it names none (an ordinary
    /// global/native lookup).
    pub(crate) fn resolve_bare_function_name(&self, name: &str, _line: u32) -> CgResult<Option<String>> {
        match self.declared_functions.get(name) {
            None => Ok(None),
            Some(arities) if arities.len() == 1 => Ok(Some(mangle(name, arities[0]))),
            Some(_) => Ok(None),
        }
    }

    /// True if `name` names two or more declared overloads — the case a
    /// bare reference in value (non-call) position must resolve through a
    /// runtime `Dispatcher` rather than a single mangled binding.
    pub(crate) fn is_ambiguous_function_name(&self, name: &str) -> bool {
        self.declared_functions.get(name).map(|a| a.len() > 1).unwrap_or(false)
    }

    /// Build a `Dispatcher` value over every declared overload of `name`,
    /// for a bare reference in value position (spec §3/§4.3.2/§8): each
    /// overload's closure is fetched by its mangled binding into a register,
    /// paired with its arity (as a `Double`), and `MakeDispatcher` gathers
    /// the consecutive pairs into one dispatcher object.
    pub(crate) fn compile_dispatcher_reference(&mut self, name: &str, line: u32) -> CgResult<u8> {
        let arities = self
            .declared_functions
            .get(name)
            .cloned()
            .ok_or_else(|| CodeGenError::UnknownIdentifier { name: name.to_string(), line })?;
        let base = self.register_mark();
        for arity in &arities {
            let arity_reg = self.alloc_register(line)?;
            let idx = self.add_constant(Value::Double(*arity as f64))?;
            self.load_const_into(arity_reg, idx, line);
            let callable_reg = self.alloc_register(line)?;
            self.compile_identifier_into(&mangle(name, *arity), callable_reg, line)?;
        }
        self.emit_abc(OpCode::MakeDispatcher, base, arities.len() as u8, 0, line);
        self.free_to(base.wrapping_add(1));
        Ok(base)
    }

    /// Resolve a direct call `name(args)` against the declaration table by
    /// exact arity match.
    pub(crate) fn resolve_call_target(&self, name: &str, arity: u8) -> Option<String> {
        self.declared_functions
            .get(name)
            .and_then(|arities| arities.iter().find(|a| **a == arity))
            .map(|_| mangle(name, arity))
    }
}
