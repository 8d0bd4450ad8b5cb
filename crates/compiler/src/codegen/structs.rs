//! Struct and enum schema registration, and struct-literal lowering
//! (spec §4.2, §4.3.6).
//!
//! Every struct/enum declaration is registered once, at hoist time, into
//! compiler-wide tables (`Compiler::struct_schemas`/`enum_schemas`) keyed by
//! name — schemas are always known before any literal referencing them is
//! compiled, which is what lets every struct literal (positional call-style
//! `P(3, 4)` or named `P{ x: 3, y: 4 }`) lower to the single
//! `NewStructPositional` opcode with fields already reordered at compile
//! time; `NewStructNamed` is never emitted (see DESIGN.md).

use std::collections::{HashMap, HashSet};

use zym_core::object::{EnumSchemaData, StructSchemaData};
use zym_core::opcode::OpCode;
use zym_core::value::Value;

use crate::ast::{Expr, StructInitField};

/// A named-init field's compiled source: either an explicit expression, or
/// "copy this field from the struct instance compiled into `spread_reg`".
enum FieldSource<'e> {
    Expr(&'e Expr),
    Spread { spread_reg: u8 },
}

use super::{CgResult, CodeGenError, Compiler, EnumSchemaInfo, StructSchemaInfo};

impl<'h> Compiler<'h> {
    pub(crate) fn register_struct_schema(&mut self, name: &str, fields: &[String], line: u32) -> CgResult<()> {
        if self.struct_schemas.contains_key(name) || self.enum_schemas.contains_key(name) {
            return Err(CodeGenError::DuplicateStructOrEnum { name: name.to_string(), line });
        }
        let mut seen = HashSet::new();
        for f in fields {
            if !seen.insert(f.clone()) {
                return Err(CodeGenError::DuplicateStructField { name: f.clone(), line });
            }
        }
        let data = StructSchemaData::new(name.to_string(), fields.to_vec());
        let obj = self.heap.alloc_struct_schema(data);
        self.struct_schemas.insert(
            name.to_string(),
            StructSchemaInfo { obj, field_order: fields.to_vec() },
        );
        Ok(())
    }

    pub(crate) fn register_enum_schema(&mut self, name: &str, variants: &[String], line: u32) -> CgResult<()> {
        if self.struct_schemas.contains_key(name) || self.enum_schemas.contains_key(name) {
            return Err(CodeGenError::DuplicateStructOrEnum { name: name.to_string(), line });
        }
        let type_id = self.next_enum_type_id;
        self.next_enum_type_id = self.next_enum_type_id.checked_add(1).expect("enum type space exhausted");
        let data = EnumSchemaData {
            name: name.to_string(),
            variant_names: variants.to_vec().into_boxed_slice(),
            type_id: type_id as u32,
        };
        let obj = self.heap.alloc_enum_schema(data);
        self.enum_schemas.insert(
            name.to_string(),
            EnumSchemaInfo { obj, type_id, variants: variants.to_vec() },
        );
        Ok(())
    }

    /// Emit the runtime global bindings spec §4.3.7 requires for an enum
    /// declaration: `__enum_schema_<name>` (the schema itself, reachable by
    /// name) and `__enum_schema_by_id:<type_id>` (the key
    /// `Value::display`'s globals lookup actually queries by, since a bare
    /// `Value::Enum` only carries the numeric tag pair, never the name).
    /// Both point at the same heap object `register_enum_schema` already
    /// allocated; this only wires it into the global table so it survives
    /// past compile time.
    pub(crate) fn compile_enum_decl(&mut self, name: &str, line: u32) -> CgResult<()> {
        let info = self.enum_schemas.get(name).expect("registered at hoist time");
        let obj = info.obj;
        let type_id = info.type_id;
        let idx = self.add_constant(Value::Object(obj))?;
        let reg = self.alloc_register(line)?;
        self.load_const_into(reg, idx, line);
        self.define_global_from_register(&format!("__enum_schema_{}", name), reg, line)?;
        self.define_global_from_register(&format!("__enum_schema_by_id:{}", type_id), reg, line)?;
        self.free_to(reg);
        Ok(())
    }

    /// Emit a `NewStructPositional`: loads the schema's field values, in
    /// declared field order, into consecutive registers starting at `base`,
    /// then overwrites `base` with the constructed instance. Spread sources
    /// must already be compiled (into registers below `base`) by the time
    /// this runs, since allocating the field window itself advances the
    /// register watermark past them.
    fn emit_struct_construction(
        &mut self,
        struct_name: &str,
        ordered_values: &HashMap<String, FieldSource<'_>>,
        line: u32,
    ) -> CgResult<u8> {
        let info = self
            .struct_schemas
            .get(struct_name)
            .ok_or_else(|| CodeGenError::UnknownStruct { name: struct_name.to_string(), line })?;
        let field_order = info.field_order.clone();
        let schema_obj = info.obj;

        let base = self.register_mark();
        for field in &field_order {
            let reg = self.alloc_register(line)?;
            match ordered_values.get(field) {
                Some(FieldSource::Expr(expr)) => {
                    let value_reg = self.compile_expr(expr)?;
                    if value_reg != reg {
                        self.emit_abc(OpCode::Clone, reg, value_reg, 0, line);
                    }
                }
                Some(FieldSource::Spread { spread_reg }) => {
                    let scratch_mark = self.register_mark();
                    let key_reg = self.alloc_register(line)?;
                    let key_idx = self.global_name_const(field)?;
                    self.load_const_into(key_reg, key_idx, line);
                    self.emit_abc(OpCode::GetProperty, reg, *spread_reg, key_reg, line);
                    self.free_to(scratch_mark);
                }
                None => {
                    self.emit_abc(OpCode::LoadNull, reg, 0, 0, line);
                }
            }
        }
        let const_idx = self.add_constant(Value::Object(schema_obj))?;
        self.emit_abx(OpCode::NewStructPositional, base, const_idx, line);
        Ok(base)
    }

    /// Lower a `Name(args...)` call-style positional struct literal
    /// (parsed as a generic `Expr::Call`, disambiguated here by checking
    /// the callee name against known struct schemas).
    pub(crate) fn compile_struct_positional_init(
        &mut self,
        struct_name: &str,
        args: &[Expr],
        line: u32,
    ) -> CgResult<u8> {
        let field_order = self
            .struct_schemas
            .get(struct_name)
            .ok_or_else(|| CodeGenError::UnknownStruct { name: struct_name.to_string(), line })?
            .field_order
            .clone();
        if args.len() != field_order.len() {
            return Err(CodeGenError::UnknownStructField {
                struct_name: struct_name.to_string(),
                field: format!("expected {} positional args, found {}", field_order.len(), args.len()),
                line,
            });
        }
        let by_name: HashMap<String, FieldSource<'_>> = field_order
            .iter()
            .cloned()
            .zip(args.iter().map(FieldSource::Expr))
            .collect();
        self.emit_struct_construction(struct_name, &by_name, line)
    }

    /// Lower a `Name{ field: value, ..., ...spread }` named-init literal.
    pub(crate) fn compile_struct_named_init(
        &mut self,
        struct_name: &str,
        fields: &[StructInitField],
        line: u32,
    ) -> CgResult<u8> {
        {
            let exists = self.struct_schemas.contains_key(struct_name);
            if !exists {
                return Err(CodeGenError::UnknownStruct { name: struct_name.to_string(), line });
            }
        }

        // Pass 1: explicit named fields always win, regardless of where a
        // spread appears lexically relative to them.
        let mut by_name: HashMap<String, FieldSource<'_>> = HashMap::new();
        for field in fields {
            if let StructInitField::Named { name, value } = field {
                if by_name.insert(name.clone(), FieldSource::Expr(value)).is_some() {
                    return Err(CodeGenError::DuplicateStructField { name: name.clone(), line });
                }
            }
        }

        let info = self.struct_schemas.get(struct_name).expect("checked above");
        for f in by_name.keys() {
            if !info.field_order.contains(f) {
                return Err(CodeGenError::UnknownStructField {
                    struct_name: struct_name.to_string(),
                    field: f.clone(),
                    line,
                });
            }
        }

        // Pass 2: each spread source is compiled once (into a register below
        // the field window this call is about to allocate) and fills every
        // field not already set by an explicit name; a field already filled
        // by an earlier spread is left alone (first spread to mention it
        // wins among spreads, explicit fields always win over any spread).
        let field_order = self.struct_schemas.get(struct_name).expect("checked above").field_order.clone();
        for field in fields {
            if let StructInitField::Spread(expr) = field {
                let spread_reg = self.compile_expr(expr)?;
                for f in &field_order {
                    by_name.entry(f.clone()).or_insert(FieldSource::Spread { spread_reg });
                }
            }
        }

        self.emit_struct_construction(struct_name, &by_name, line)
    }
}
