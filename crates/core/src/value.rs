//! The tagged `Value` union (spec §3): `Null`, `Bool`, `Double`, `Enum`, and
//! `Object` — each variant admits an O(1) type test by matching on the
//! discriminant alone, no heap touch required except to follow `Object`.

use std::fmt;

use crate::object::{ObjectData, ObjectKind};
use crate::object::ObjRef;

/// See DESIGN.md's "Enum value representation" entry: spec §3 describes
/// `Value::Enum` as carrying two *16-bit* fields, while `EnumSchema` (§3,
/// bullet on object kinds) carries a *32-bit* process-unique `type_id`. We
/// follow §3's literal `Value` layout (16-bit fields, packed inline) and
/// truncate the schema's 32-bit id to its low 16 bits when building a
/// `Value::Enum` constant.
#[derive(Clone, Copy)]
pub enum Value {
    Null,
    Bool(bool),
    Double(f64),
    Enum { type_id: u16, variant_index: u16 },
    Object(ObjRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Double(d) => *d != 0.0,
            Value::Enum { .. } => true,
            Value::Object(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Double(_) => "double",
            Value::Enum { .. } => "enum",
            Value::Object(obj) => match obj.kind() {
                ObjectKind::String => "string",
                ObjectKind::List => "list",
                ObjectKind::Map => "map",
                ObjectKind::Function => "function",
                ObjectKind::Closure => "closure",
                ObjectKind::Upvalue => "upvalue",
                ObjectKind::StructSchema => "struct-schema",
                ObjectKind::StructInstance => "struct",
                ObjectKind::EnumSchema => "enum-schema",
                ObjectKind::NativeFunction => "native-function",
                ObjectKind::NativeContext => "native-context",
                ObjectKind::NativeClosure => "native-closure",
                ObjectKind::NativeReference => "native-reference",
                ObjectKind::Reference => "reference",
                ObjectKind::Int64 => "int64",
                ObjectKind::Dispatcher => "dispatcher",
            },
        }
    }

    /// Structural equality as used by `EQ`/`NE` and the serializer round-trip
    /// property. Enum values equal iff `(type_id, variant_index)` equal
    /// (spec §3 invariant). Object equality for `String` is by content (once
    /// interned, identical content always shares one allocation, so this is
    /// also identity-equal for interned strings); all other object kinds
    /// compare by identity.
    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (
                Value::Enum {
                    type_id: t1,
                    variant_index: v1,
                },
                Value::Enum {
                    type_id: t2,
                    variant_index: v2,
                },
            ) => t1 == t2 && v1 == v2,
            (Value::Object(a), Value::Object(b)) => {
                if a == b {
                    return true;
                }
                match (&a.get().data, &b.get().data) {
                    (ObjectData::String(s1), ObjectData::String(s2)) => {
                        s1.as_str() == s2.as_str()
                    }
                    (ObjectData::Int64(i1), ObjectData::Int64(i2)) => i1 == i2,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Print with cycle protection and a depth cap, per §9 design notes:
    /// recursion limited to depth 100, with `...` printed on cycles.
    pub fn display(&self, globals: &dyn Fn(&str) -> Option<Value>) -> String {
        let mut out = String::new();
        let mut seen: Vec<*const ()> = Vec::new();
        self.write_display(&mut out, globals, &mut seen, 0);
        out
    }

    fn write_display(
        &self,
        out: &mut String,
        globals: &dyn Fn(&str) -> Option<Value>,
        seen: &mut Vec<*const ()>,
        depth: usize,
    ) {
        use std::fmt::Write as _;
        if depth > 100 {
            out.push_str("...");
            return;
        }
        match self {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => {
                let _ = write!(out, "{}", b);
            }
            Value::Double(d) => {
                let _ = write!(out, "{}", d);
            }
            Value::Enum {
                type_id,
                variant_index,
            } => {
                // Enum printing resolves the schema via the compiler-stored
                // `__enum_schema_<name>` global (spec §4.3.7); without a
                // reachable schema we fall back to the raw tag pair.
                if let Some(text) = display_enum_via_globals(*type_id, *variant_index, globals) {
                    out.push_str(&text);
                } else {
                    let _ = write!(out, "<enum {}#{}>", type_id, variant_index);
                }
            }
            Value::Object(obj) => {
                let ptr = obj.as_ptr() as *const ();
                if seen.contains(&ptr) {
                    out.push_str("...");
                    return;
                }
                seen.push(ptr);
                write_object_display(obj, out, globals, seen, depth);
                seen.pop();
            }
        }
    }
}

fn display_enum_via_globals(
    type_id: u16,
    variant_index: u16,
    globals: &dyn Fn(&str) -> Option<Value>,
) -> Option<String> {
    // Callers register every enum schema's name under a well-known key
    // derived from its name at compile time; the global lookup here walks
    // every `__enum_schema_*` the caller is willing to expose. Since core
    // has no notion of "all globals", the embedder-supplied closure is
    // expected to do the by-type_id lookup itself and return the already
    // resolved schema, keyed by the literal string `"__enum_schema_by_id"`.
    let lookup_key = format!("__enum_schema_by_id:{}", type_id);
    if let Some(Value::Object(schema_ref)) = globals(&lookup_key) {
        if let Some(schema) = schema_ref.as_enum_schema() {
            if let Some(name) = schema.variant_names.get(variant_index as usize) {
                return Some(format!("{}.{}", schema.name, name));
            }
        }
    }
    None
}

fn write_object_display(
    obj: &ObjRef,
    out: &mut String,
    globals: &dyn Fn(&str) -> Option<Value>,
    seen: &mut Vec<*const ()>,
    depth: usize,
) {
    use std::fmt::Write as _;
    match &obj.get().data {
        ObjectData::String(s) => out.push_str(s.as_str()),
        ObjectData::List(items) => {
            out.push('[');
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                item.write_display(out, globals, seen, depth + 1);
            }
            out.push(']');
        }
        ObjectData::Map(map) => {
            out.push('{');
            for (i, (k, v)) in map.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}: ", k);
                v.write_display(out, globals, seen, depth + 1);
            }
            out.push('}');
        }
        ObjectData::Function(f) => {
            let name = f.name.as_deref().unwrap_or("<anonymous>");
            let _ = write!(out, "<function {}/{}>", name, f.arity);
        }
        ObjectData::Closure(c) => {
            let fname = unsafe { c.function.as_ref() }
                .as_function_ref()
                .and_then(|f| f.name.clone())
                .unwrap_or_else(|| "<anonymous>".to_string());
            let _ = write!(out, "<closure {}>", fname);
        }
        ObjectData::Upvalue(_) => out.push_str("<upvalue>"),
        ObjectData::StructSchema(s) => {
            let _ = write!(out, "<struct schema {}>", s.name);
        }
        ObjectData::StructInstance(inst) => {
            let schema = unsafe { inst.schema.as_ref() };
            let schema_data = schema.as_struct_schema_ref().expect("schema ptr");
            let _ = write!(out, "{}{{", schema_data.name);
            for (i, field_name) in schema_data.field_names.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}: ", field_name);
                inst.fields.borrow()[i].write_display(out, globals, seen, depth + 1);
            }
            out.push('}');
        }
        ObjectData::EnumSchema(s) => {
            let _ = write!(out, "<enum schema {}>", s.name);
        }
        ObjectData::NativeFunction(n) => {
            let _ = write!(out, "<native {}>", n.signature.name);
        }
        ObjectData::NativeContext(n) => {
            let _ = write!(out, "<native-context {}>", n.type_name);
        }
        ObjectData::NativeClosure(_) => out.push_str("<native-closure>"),
        ObjectData::NativeReference(_) => out.push_str("<native-reference>"),
        ObjectData::Reference(_) => out.push_str("<reference>"),
        ObjectData::Int64(i) => {
            let _ = write!(out, "{}", i);
        }
        ObjectData::Dispatcher(d) => {
            let _ = write!(out, "<dispatcher {} overloads>", d.borrow().overloads.len());
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Double(d) => write!(f, "Double({})", d),
            Value::Enum {
                type_id,
                variant_index,
            } => write!(f, "Enum({}, {})", type_id, variant_index),
            Value::Object(obj) => write!(f, "Object({:?})", obj.kind()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other)
    }
}

// Helper accessors used above; kept private to this module's display logic.
trait ObjectAccess {
    fn as_function_ref(&self) -> Option<&crate::object::FunctionData>;
    fn as_struct_schema_ref(&self) -> Option<&crate::object::StructSchemaData>;
}

impl ObjectAccess for crate::object::Object {
    fn as_function_ref(&self) -> Option<&crate::object::FunctionData> {
        match &self.data {
            ObjectData::Function(f) => Some(f),
            _ => None,
        }
    }
    fn as_struct_schema_ref(&self) -> Option<&crate::object::StructSchemaData> {
        match &self.data {
            ObjectData::StructSchema(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_spec_semantics() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Double(0.0).is_truthy());
        assert!(Value::Double(1.0).is_truthy());
    }

    #[test]
    fn enum_equality_is_by_tag_pair() {
        let a = Value::Enum {
            type_id: 3,
            variant_index: 1,
        };
        let b = Value::Enum {
            type_id: 3,
            variant_index: 1,
        };
        let c = Value::Enum {
            type_id: 3,
            variant_index: 2,
        };
        assert!(a.structural_eq(&b));
        assert!(!a.structural_eq(&c));
    }
}
