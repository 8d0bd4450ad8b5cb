//! The heap object model: a common GC header plus the per-kind payloads
//! named in spec §3.
//!
//! Objects are heap-allocated with `Box::into_raw` and tracked by an
//! intrusive singly-linked list (`GcHeader::next`) owned by the `Heap` — a
//! new design; the teacher has no per-object-kind struct split anywhere
//! (`crates/runtime/src/value.rs`'s `Value` enum *is* its object model, with
//! `Arc<VariantData>` as its only boxed/shared payload), so there's no
//! intrusive-list or GcHeader precedent to cite. Raw pointers rather than
//! `Rc`/`Arc` are used by hand here because object identity (pointer
//! equality) and GC-driven lifetime are part of the contract, not reference
//! counting.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;

use crate::chunk::Chunk;
use crate::qualifier::{Qualifier, QualifierSignature};
use crate::reference::Reference;
use crate::value::Value;

/// Discriminant for [`GcHeader::kind`]; also doubles as the dynamic type tag
/// inspected by `typeof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    String,
    List,
    Map,
    Function,
    Closure,
    Upvalue,
    StructSchema,
    StructInstance,
    EnumSchema,
    NativeFunction,
    NativeContext,
    NativeClosure,
    NativeReference,
    Reference,
    Int64,
    Dispatcher,
}

/// Fields every heap object carries, independent of its kind.
pub struct GcHeader {
    pub kind: ObjectKind,
    pub marked: Cell<bool>,
    /// Intrusive next-pointer owned by the `Heap`'s allocation list.
    pub next: Cell<*mut Object>,
}

/// A heap-allocated object: the common header plus kind-specific payload.
pub struct Object {
    pub header: GcHeader,
    pub data: ObjectData,
}

pub enum ObjectData {
    String(StringData),
    List(RefCell<Vec<Value>>),
    Map(RefCell<HashMap<String, Value>>),
    Function(FunctionData),
    Closure(ClosureData),
    Upvalue(RefCell<UpvalueState>),
    StructSchema(StructSchemaData),
    StructInstance(StructInstanceData),
    EnumSchema(EnumSchemaData),
    NativeFunction(NativeFunctionData),
    NativeContext(NativeContextData),
    NativeClosure(NativeClosureData),
    NativeReference(NativeReferenceData),
    Reference(Reference),
    Int64(i64),
    Dispatcher(RefCell<DispatcherData>),
}

/// Immutable byte sequence with cached length. Strings sourced via the
/// heap's `copy`/`take` interning helpers compare equal by pointer identity
/// as well as by content.
pub struct StringData {
    pub bytes: Box<[u8]>,
    pub len: usize,
}

impl StringData {
    pub fn as_str(&self) -> &str {
        // Construction helpers only ever build these from `&str`/`String`.
        std::str::from_utf8(&self.bytes).expect("StringData must hold valid UTF-8")
    }
}

/// One descriptor in a `Function`'s upvalue table: which enclosing scope the
/// closure captures this upvalue from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    /// True if the enclosing *function* (not an outer upvalue) owns the
    /// captured local directly.
    pub is_local: bool,
    /// Index into the enclosing function's register window (if `is_local`)
    /// or the enclosing closure's upvalue array (otherwise).
    pub index: u8,
}

pub struct FunctionData {
    pub arity: u8,
    pub max_regs: u8,
    pub upvalues: Box<[UpvalueDesc]>,
    pub name: Option<String>,
    pub module_name: Option<String>,
    /// Per-parameter qualifiers, length `arity`.
    pub param_qualifiers: Box<[Qualifier]>,
    pub qualifier_signature: QualifierSignature,
    pub chunk: Chunk,
}

pub struct ClosureData {
    pub function: NonNull<Object>,
    pub upvalues: Box<[NonNull<Object>]>,
}

/// An upvalue is open while it points into a live frame's register slot, and
/// closed once that slot goes out of scope (the compiler emits
/// `CLOSE_UPVALUE`/`CLOSE_FRAME_UPVALUES` at the right points; see
/// spec §4.3.4/§4.3.6).
pub enum UpvalueState {
    Open { frame_slot: *mut Value },
    Closed(Value),
}

pub struct StructSchemaData {
    pub name: String,
    pub field_names: Box<[String]>,
    pub field_index: HashMap<String, usize>,
}

impl StructSchemaData {
    pub fn new(name: String, field_names: Vec<String>) -> StructSchemaData {
        let field_index = field_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        StructSchemaData {
            name,
            field_names: field_names.into_boxed_slice(),
            field_index,
        }
    }
}

pub struct StructInstanceData {
    pub schema: NonNull<Object>,
    pub fields: RefCell<Box<[Value]>>,
}

pub struct EnumSchemaData {
    pub name: String,
    pub variant_names: Box<[String]>,
    /// Process-unique identifier. Embedded (truncated to its low 16 bits, per
    /// the reconciliation recorded in DESIGN.md) in every `Value::Enum` of
    /// this type.
    pub type_id: u32,
}

/// Signature of a native function, parsed from a registration string of the
/// form `"name(param1, ref param2, ...)"` (see spec §6).
pub struct NativeSignature {
    pub name: String,
    pub arity: u8,
    pub param_qualifiers: Box<[Qualifier]>,
}

pub type NativeFn = fn(args: &[Value]) -> Result<Value, String>;

pub struct NativeFunctionData {
    pub signature: NativeSignature,
    pub func: NativeFn,
}

/// Opaque foreign-owned state handed to natives that need to carry
/// connection handles, file descriptors, etc. across calls.
pub struct NativeContextData {
    pub type_name: String,
    pub payload: Box<dyn std::any::Any>,
}

pub type NativeClosureFn = Box<dyn Fn(&[Value]) -> Result<Value, String>>;

pub struct NativeClosureData {
    pub arity: u8,
    pub func: NativeClosureFn,
}

pub type NativeGetHook = fn(context: &Object, offset: usize) -> Value;
pub type NativeSetHook = fn(context: &Object, offset: usize, value: Value);

/// Mediates foreign storage a `Reference` can alias into, via get/set hooks
/// rather than a raw pointer (the embedder owns the memory).
pub struct NativeReferenceData {
    pub context: NonNull<Object>,
    pub offset: usize,
    pub get_hook: NativeGetHook,
    pub set_hook: NativeSetHook,
}

/// A small object holding a name's overloads by arity; constructed when a
/// bare name resolves ambiguously (see spec §4.3.2).
pub struct DispatcherData {
    /// (arity, callable) pairs. Callables are `Function`/`Closure` objects.
    pub overloads: Vec<(u8, NonNull<Object>)>,
}

impl DispatcherData {
    pub fn resolve(&self, arity: u8) -> Option<NonNull<Object>> {
        self.overloads
            .iter()
            .find(|(a, _)| *a == arity)
            .map(|(_, obj)| *obj)
    }
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        self.header.kind
    }
}

impl ObjectData {
    pub fn kind_tag(&self) -> ObjectKind {
        match self {
            ObjectData::String(_) => ObjectKind::String,
            ObjectData::List(_) => ObjectKind::List,
            ObjectData::Map(_) => ObjectKind::Map,
            ObjectData::Function(_) => ObjectKind::Function,
            ObjectData::Closure(_) => ObjectKind::Closure,
            ObjectData::Upvalue(_) => ObjectKind::Upvalue,
            ObjectData::StructSchema(_) => ObjectKind::StructSchema,
            ObjectData::StructInstance(_) => ObjectKind::StructInstance,
            ObjectData::EnumSchema(_) => ObjectKind::EnumSchema,
            ObjectData::NativeFunction(_) => ObjectKind::NativeFunction,
            ObjectData::NativeContext(_) => ObjectKind::NativeContext,
            ObjectData::NativeClosure(_) => ObjectKind::NativeClosure,
            ObjectData::NativeReference(_) => ObjectKind::NativeReference,
            ObjectData::Reference(_) => ObjectKind::Reference,
            ObjectData::Int64(_) => ObjectKind::Int64,
            ObjectData::Dispatcher(_) => ObjectKind::Dispatcher,
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({:?})", self.header.kind)
    }
}

/// A `Copy`able handle to a heap object. Equality and hashing are by
/// identity (pointer value), matching spec §3's requirement that strings
/// sourced via `copy`/`take` compare equal by identity once interned.
#[derive(Clone, Copy)]
pub struct ObjRef(pub NonNull<Object>);

impl ObjRef {
    /// # Safety
    /// `ptr` must point to a live `Object` for as long as the returned
    /// `ObjRef` is used (the heap's GC must not have swept it).
    pub unsafe fn new(ptr: NonNull<Object>) -> ObjRef {
        ObjRef(ptr)
    }

    pub fn as_ptr(self) -> *mut Object {
        self.0.as_ptr()
    }

    pub fn kind(&self) -> ObjectKind {
        unsafe { self.0.as_ref().kind() }
    }

    pub fn get(&self) -> &Object {
        unsafe { self.0.as_ref() }
    }

    pub fn as_string(&self) -> Option<&StringData> {
        match &self.get().data {
            ObjectData::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&RefCell<Vec<Value>>> {
        match &self.get().data {
            ObjectData::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&RefCell<HashMap<String, Value>>> {
        match &self.get().data {
            ObjectData::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionData> {
        match &self.get().data {
            ObjectData::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ClosureData> {
        match &self.get().data {
            ObjectData::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_struct_schema(&self) -> Option<&StructSchemaData> {
        match &self.get().data {
            ObjectData::StructSchema(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct_instance(&self) -> Option<&StructInstanceData> {
        match &self.get().data {
            ObjectData::StructInstance(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_enum_schema(&self) -> Option<&EnumSchemaData> {
        match &self.get().data {
            ObjectData::EnumSchema(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match &self.get().data {
            ObjectData::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_dispatcher(&self) -> Option<&RefCell<DispatcherData>> {
        match &self.get().data {
            ObjectData::Dispatcher(d) => Some(d),
            _ => None,
        }
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.as_ptr(), other.as_ptr())
    }
}
impl Eq for ObjRef {}

impl std::hash::Hash for ObjRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self.as_ptr() as usize).hash(state);
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({:?} @ {:p})", self.kind(), self.as_ptr())
    }
}
