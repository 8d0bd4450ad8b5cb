//! First-class references (spec §3, §9): a `Reference` aliases another
//! storage location. Four kinds live on the heap as plain data; a fifth,
//! `NativeReference`, mediates foreign storage via get/set hooks and is
//! stored as its own object kind (see `object::NativeReferenceData`).
//!
//! Dereferencing flattens recursively (a reference can point at a local that
//! itself holds a reference) to a configurable depth cap, guarding against
//! pathological chains — mirroring the teacher's habit of naming defensive
//! constants explicitly (`MAX_VIRTUAL_STACK` in `codegen/state.rs`) rather
//! than looping unbounded.

use crate::object::ObjRef;
use crate::value::Value;

/// Guards against pathological reference chains during flattening.
pub const MAX_DEREF_DEPTH: usize = 64;

/// A first-class reference to another value's storage.
#[derive(Clone, Copy)]
pub enum Reference {
    /// Pointer to a stack slot in a frame's register window.
    Local(*mut Value),
    /// Global variable, looked up by name at deref/assignment time.
    Global(ObjRef),
    /// Pointer to an `Upvalue` object (open or closed).
    Upvalue(ObjRef),
    /// Container + index, e.g. `list[i]`.
    Index { container: Value, index: Value },
    /// Container + key, e.g. `point.x` falling back to map-style access.
    Property { container: Value, key: Value },
}

/// Everything reference flattening needs beyond the `Reference` payload
/// itself: global-table and container access. A real VM frame set
/// implements this directly; the compiler/test harness in this workspace
/// implements it against a plain `HashMap`-backed stand-in.
pub trait RefEnvironment {
    fn get_global(&self, name: &str) -> Result<Value, String>;
    fn set_global(&mut self, name: &str, value: Value) -> Result<(), String>;
    fn get_upvalue(&self, upvalue: ObjRef) -> Result<Value, String>;
    fn set_upvalue(&mut self, upvalue: ObjRef, value: Value) -> Result<(), String>;
    fn get_index(&self, container: &Value, index: &Value) -> Result<Value, String>;
    fn set_index(&mut self, container: &Value, index: &Value, value: Value) -> Result<(), String>;
    fn get_property(&self, container: &Value, key: &Value) -> Result<Value, String>;
    fn set_property(
        &mut self,
        container: &Value,
        key: &Value,
        value: Value,
    ) -> Result<(), String>;
}

fn global_name(global: ObjRef) -> Result<String, String> {
    let s = global
        .as_string()
        .ok_or_else(|| "MAKE_GLOBAL_REF target is not a string".to_string())?;
    Ok(s.as_str().to_string())
}

impl Reference {
    /// Read through this reference, flattening nested references up to
    /// [`MAX_DEREF_DEPTH`] layers.
    pub fn deref(&self, env: &impl RefEnvironment) -> Result<Value, String> {
        self.deref_depth(env, 0)
    }

    fn deref_depth(&self, env: &impl RefEnvironment, depth: usize) -> Result<Value, String> {
        if depth >= MAX_DEREF_DEPTH {
            return Err("reference chain too deep".to_string());
        }
        let value = match self {
            Reference::Local(slot) => unsafe { **slot },
            Reference::Global(name) => env.get_global(&global_name(*name)?)?,
            Reference::Upvalue(uv) => env.get_upvalue(*uv)?,
            Reference::Index { container, index } => env.get_index(container, index)?,
            Reference::Property { container, key } => env.get_property(container, key)?,
        };
        if let Value::Object(obj) = value {
            if let Some(inner) = obj.as_reference() {
                return inner.deref_depth(env, depth + 1);
            }
        }
        Ok(value)
    }

    /// Write through this reference. For `Local`/`Global`/`Upvalue`, a plain
    /// (non-`slot`) assignment writes through every layer of nested
    /// references (spec §8, reference write-through property); `write_slot`
    /// below rebinds only the outermost layer.
    pub fn assign(&self, env: &mut impl RefEnvironment, value: Value) -> Result<(), String> {
        self.assign_depth(env, value, 0)
    }

    fn assign_depth(
        &self,
        env: &mut impl RefEnvironment,
        value: Value,
        depth: usize,
    ) -> Result<(), String> {
        if depth >= MAX_DEREF_DEPTH {
            return Err("reference chain too deep".to_string());
        }
        match self {
            Reference::Local(slot) => {
                let current = unsafe { **slot };
                if let Value::Object(obj) = current {
                    if let Some(inner) = obj.as_reference() {
                        return inner.assign_depth(env, value, depth + 1);
                    }
                }
                unsafe { **slot = value };
                Ok(())
            }
            Reference::Global(name) => {
                let name = global_name(*name)?;
                let current = env.get_global(&name)?;
                if let Value::Object(obj) = current {
                    if let Some(inner) = obj.as_reference() {
                        return inner.assign_depth(env, value, depth + 1);
                    }
                }
                env.set_global(&name, value)
            }
            Reference::Upvalue(uv) => {
                let current = env.get_upvalue(*uv)?;
                if let Value::Object(obj) = current {
                    if let Some(inner) = obj.as_reference() {
                        return inner.assign_depth(env, value, depth + 1);
                    }
                }
                env.set_upvalue(*uv, value)
            }
            Reference::Index { container, index } => env.set_index(container, index, value),
            Reference::Property { container, key } => env.set_property(container, key, value),
        }
    }

    /// `slot x = v`: rebind only this reference layer, without flattening
    /// into whatever the current target holds (spec §4.3.3 / §8).
    pub fn write_slot(&self, env: &mut impl RefEnvironment, value: Value) -> Result<(), String> {
        match self {
            Reference::Local(slot) => {
                unsafe { **slot = value };
                Ok(())
            }
            Reference::Global(name) => env.set_global(&global_name(*name)?, value),
            Reference::Upvalue(uv) => env.set_upvalue(*uv, value),
            Reference::Index { container, index } => env.set_index(container, index, value),
            Reference::Property { container, key } => env.set_property(container, key, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TestEnv {
        globals: HashMap<String, Value>,
    }

    impl RefEnvironment for TestEnv {
        fn get_global(&self, name: &str) -> Result<Value, String> {
            self.globals
                .get(name)
                .copied()
                .ok_or_else(|| format!("undefined global {}", name))
        }
        fn set_global(&mut self, name: &str, value: Value) -> Result<(), String> {
            self.globals.insert(name.to_string(), value);
            Ok(())
        }
        fn get_upvalue(&self, _upvalue: ObjRef) -> Result<Value, String> {
            unimplemented!("not exercised in this test")
        }
        fn set_upvalue(&mut self, _upvalue: ObjRef, _value: Value) -> Result<(), String> {
            unimplemented!("not exercised in this test")
        }
        fn get_index(&self, _c: &Value, _i: &Value) -> Result<Value, String> {
            unimplemented!("not exercised in this test")
        }
        fn set_index(&mut self, _c: &Value, _i: &Value, _v: Value) -> Result<(), String> {
            unimplemented!("not exercised in this test")
        }
        fn get_property(&self, _c: &Value, _k: &Value) -> Result<Value, String> {
            unimplemented!("not exercised in this test")
        }
        fn set_property(&mut self, _c: &Value, _k: &Value, _v: Value) -> Result<(), String> {
            unimplemented!("not exercised in this test")
        }
    }

    #[test]
    fn local_reference_writes_through() {
        let mut x = Value::Double(10.0);
        let mut env = TestEnv {
            globals: HashMap::new(),
        };
        let r = Reference::Local(&mut x as *mut Value);
        r.assign(&mut env, Value::Double(5.0)).unwrap();
        assert_eq!(x.structural_eq(&Value::Double(5.0)), true);
    }

    #[test]
    fn global_reference_round_trips() {
        let mut env = TestEnv {
            globals: HashMap::new(),
        };
        env.globals.insert("x".to_string(), Value::Double(1.0));
        // Build a fake interned-string ObjRef is out of scope for a pure
        // unit test without a heap; the Global-name path is exercised by
        // the compiler's integration tests via a real heap instead.
        let _ = &mut env;
    }
}
