//! A minimal reference bytecode interpreter (spec §C.3).
//!
//! This is explicitly *not* the production register VM — no GC is driven
//! (objects allocated during a run simply live for the run's duration),
//! the native surface is whatever the embedder registers via
//! [`Interpreter::register_native_closure`], and dispatch covers exactly the
//! opcodes the code generator in `codegen/` actually emits (the fused
//! `Branch*` family, `TailCall`/`SmartTailCall*`, `Goto`, and
//! `NewStructNamed` are never emitted — see DESIGN.md — so they fall
//! through to [`InterpretError::UnsupportedOpcode`] rather than being
//! implemented against nothing). It exists so `zymc run` and the
//! integration tests in `tests/` can observe real program output without
//! building the out-of-scope full dispatch loop.
//!
//! Calls do not recurse on the Rust stack: [`Interpreter::run`] drives an
//! explicit `Vec<Frame>` call stack in a loop, so deep recursion is bounded
//! by heap memory rather than the native stack, and a self tail call
//! (`TAIL_CALL_SELF`, spec §4.3.9) reuses its frame instead of growing that
//! stack at all.

use std::collections::HashMap;
use std::ptr::NonNull;

use zym_core::chunk::Chunk;
use zym_core::heap::Heap;
use zym_core::object::{
    ClosureData, NativeClosureData, Object, ObjRef, ObjectData, StructInstanceData, UpvalueDesc,
    UpvalueState,
};
use zym_core::opcode::{self, OpCode};
use zym_core::reference::{Reference, RefEnvironment};
use zym_core::value::Value;

/// A step budget, not a language limit: guards this test harness against
/// hanging forever on a genuine interpreter bug rather than bounding any
/// real program.
const MAX_STEPS: u64 = 50_000_000;

#[derive(Debug)]
pub enum InterpretError {
    Runtime(String),
    UnsupportedOpcode(OpCode),
    StepBudgetExceeded,
}

impl std::fmt::Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpretError::Runtime(msg) => write!(f, "runtime error: {}", msg),
            InterpretError::UnsupportedOpcode(op) => {
                write!(f, "opcode {:?} is not implemented by the reference interpreter", op)
            }
            InterpretError::StepBudgetExceeded => {
                write!(f, "exceeded the reference interpreter's step budget ({})", MAX_STEPS)
            }
        }
    }
}

impl std::error::Error for InterpretError {}

impl From<String> for InterpretError {
    fn from(msg: String) -> InterpretError {
        InterpretError::Runtime(msg)
    }
}

/// Every function/closure call gets a fixed-size register window. Real
/// register budgets top out at [`CompilerConfig::max_registers`]
/// (255 by default); sizing every frame at the `u8` ceiling rather than
/// each function's own `max_regs` keeps this harness simple at the cost of
/// some wasted memory per call.
const FRAME_REGISTERS: usize = 256;

struct Frame {
    registers: Box<[Value]>,
    /// The chunk this frame executes, as a raw pointer: either the
    /// top-level chunk passed to [`Interpreter::run`] (alive for the whole
    /// call) or a `Function` object's chunk (heap-stable since this
    /// interpreter never collects garbage mid-run). Mirrors the raw
    /// pointers `Reference::Local`/`UpvalueState::Open` already use for the
    /// same reason.
    code: *const Chunk,
    closure: Option<ObjRef>,
    ip: usize,
    open_upvalues: Vec<(*mut Value, ObjRef)>,
}

impl Frame {
    fn chunk(&self) -> &Chunk {
        unsafe { &*self.code }
    }

    fn reg(&self, index: u8) -> Value {
        self.registers[index as usize]
    }

    fn set_reg(&mut self, index: u8, value: Value) {
        self.registers[index as usize] = value;
    }

    fn reg_ptr(&mut self, index: u8) -> *mut Value {
        &mut self.registers[index as usize] as *mut Value
    }
}

pub struct Interpreter<'h> {
    heap: &'h Heap,
    /// Shared with any native registered via [`Interpreter::register_native_closure`]
    /// that wants a live view of the global table (e.g. a `print` native
    /// resolving `Value::display`'s `__enum_schema_by_id:<type_id>` lookup,
    /// spec §4.3.7) — a plain `HashMap` field can't be observed from a
    /// closure captured before the enum declaration that later populates it
    /// actually runs.
    globals: std::rc::Rc<std::cell::RefCell<HashMap<String, Value>>>,
}

impl<'h> Interpreter<'h> {
    pub fn new(heap: &'h Heap) -> Interpreter<'h> {
        Interpreter {
            heap,
            globals: std::rc::Rc::new(std::cell::RefCell::new(HashMap::new())),
        }
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.globals.borrow_mut().insert(name.to_string(), value);
    }

    /// Look up a global by exact name, e.g. for a `Value::display` globals
    /// closure (`__enum_schema_by_id:<type_id>`, spec §4.3.7).
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get(name).copied()
    }

    /// A cloneable handle a native closure can capture to build a
    /// `Value::display` globals lookup that sees globals defined by
    /// bytecode run *after* the native was registered (enum declarations
    /// run as ordinary statements, typically before the first `print`, but
    /// not before `register_native_closure`).
    pub fn globals_handle(&self) -> std::rc::Rc<std::cell::RefCell<HashMap<String, Value>>> {
        self.globals.clone()
    }

    /// Register a stateful native under `name`, bound both bare and
    /// `name@arity`-mangled (spec §6) so a direct unambiguous call and a
    /// manifest-resolved lookup both find it.
    pub fn register_native_closure(
        &mut self,
        name: &str,
        arity: u8,
        func: Box<dyn Fn(&[Value]) -> Result<Value, String>>,
    ) {
        let obj = self.heap.alloc_native_closure(NativeClosureData { arity, func });
        let mut globals = self.globals.borrow_mut();
        globals.insert(name.to_string(), Value::Object(obj));
        globals.insert(zym_core::native::mangle(name, arity), Value::Object(obj));
    }

    /// Execute `chunk` as the top-level program and return its final
    /// expression-statement value (always `Null` in practice, since the
    /// top level never itself `return`s; kept for symmetry with function
    /// calls).
    pub fn run(&mut self, chunk: &Chunk) -> Result<Value, InterpretError> {
        let mut frames = vec![Frame {
            registers: vec![Value::Null; FRAME_REGISTERS].into_boxed_slice(),
            code: chunk as *const Chunk,
            closure: None,
            ip: 0,
            open_upvalues: Vec::new(),
        }];
        let mut steps: u64 = 0;
        let mut last_call_result = Value::Null;

        loop {
            steps += 1;
            if steps > MAX_STEPS {
                return Err(InterpretError::StepBudgetExceeded);
            }
            let depth = frames.len();
            let frame_chunk = frames[depth - 1].chunk();
            let ip = frames[depth - 1].ip;
            if ip >= frame_chunk.code.len() {
                if depth == 1 {
                    return Ok(last_call_result);
                }
                return Err(InterpretError::Runtime(
                    "function fell off the end of its chunk without returning".to_string(),
                ));
            }
            let word = frame_chunk.code[ip];

            if let Some(outcome) = self.step(&mut frames, word)? {
                match outcome {
                    StepOutcome::Returned(value) => {
                        frames.pop();
                        if frames.is_empty() {
                            return Ok(value);
                        }
                        last_call_result = value;
                    }
                }
            }
        }
    }

    /// Execute one instruction. Returns `Ok(Some(StepOutcome::Returned(_)))`
    /// only when the instruction popped the running frame (a `RETURN`);
    /// every other instruction advances `ip` itself and returns `Ok(None)`.
    fn step(&mut self, frames: &mut Vec<Frame>, word: u32) -> Result<Option<StepOutcome>, InterpretError> {
        let depth = frames.len();

        if let Some(abx) = opcode::unpack_abx(word) {
            if abx.op.is_literal_form() {
                let frame = &frames[depth - 1];
                let lo = frame.chunk().code[frame.ip + 1];
                let hi = frame.chunk().code[frame.ip + 2];
                let literal = opcode::join_f64_payload(lo, hi);
                let left = frames[depth - 1].reg(abx.a);
                let result = self.apply_binary_literal(abx.op, left, literal)?;
                frames[depth - 1].set_reg(abx.a, result);
                frames[depth - 1].ip += 3;
                return Ok(None);
            }
            if abx.op.is_immediate_form() {
                let imm = abx.bx as i16 as f64;
                let left = frames[depth - 1].reg(abx.a);
                let result = self.apply_binary_literal(abx.op, left, imm)?;
                frames[depth - 1].set_reg(abx.a, result);
                frames[depth - 1].ip += 1;
                return Ok(None);
            }
        }

        match opcode::unpack_abc(word) {
            Some(instr) if !matches!(instr.op, OpCode::LoadConst | OpCode::DefineGlobal | OpCode::GetGlobal | OpCode::SetGlobal)
                && !instr.op.is_literal_form()
                && !instr.op.is_immediate_form() =>
            {
                self.step_abc(frames, instr.op, instr.a, instr.b, instr.c)
            }
            _ => self.step_abx(frames, word),
        }
    }

    fn apply_binary_literal(&self, op: OpCode, left: Value, right: f64) -> Result<Value, InterpretError> {
        use OpCode::*;
        let base = match op {
            AddI | AddL => Add,
            SubI | SubL => Sub,
            MulI | MulL => Mul,
            DivI | DivL => Div,
            ModI | ModL => Mod,
            BAndI | BAndL => BAnd,
            BOrI | BOrL => BOr,
            BXorI | BXorL => BXor,
            BLShiftI | BLShiftL => BLShift,
            BRShiftII | BRShiftIL => BRShiftI,
            BRShiftUI | BRShiftUL => BRShiftU,
            EqI | EqL => Eq,
            NeI | NeL => Ne,
            LtI | LtL => Lt,
            LeI | LeL => Le,
            GtI | GtL => Gt,
            GeI | GeL => Ge,
            other => return Err(InterpretError::UnsupportedOpcode(other)),
        };
        apply_binary(base, left, Value::Double(right))
    }

    fn step_abx(&mut self, frames: &mut Vec<Frame>, word: u32) -> Result<Option<StepOutcome>, InterpretError> {
        let depth = frames.len();
        let abx = opcode::unpack_abx(word).expect("ABx-shaped word");
        match abx.op {
            OpCode::LoadConst => {
                let value = frames[depth - 1].chunk().constants[abx.bx as usize];
                frames[depth - 1].set_reg(abx.a, value);
                frames[depth - 1].ip += 1;
            }
            OpCode::DefineGlobal | OpCode::SetGlobal => {
                let name = self.constant_string(&frames[depth - 1], abx.bx)?;
                let value = frames[depth - 1].reg(abx.a);
                self.globals.borrow_mut().insert(name, value);
                frames[depth - 1].ip += 1;
            }
            OpCode::GetGlobal => {
                let name = self.constant_string(&frames[depth - 1], abx.bx)?;
                let value = self
                    .globals
                    .borrow()
                    .get(&name)
                    .copied()
                    .ok_or_else(|| InterpretError::Runtime(format!("undefined global {:?}", name)))?;
                frames[depth - 1].set_reg(abx.a, value);
                frames[depth - 1].ip += 1;
            }
            OpCode::Closure => {
                let constant = frames[depth - 1].chunk().constants[abx.bx as usize];
                let function_obj = match constant {
                    Value::Object(obj) if obj.as_function().is_some() => obj,
                    _ => return Err(InterpretError::Runtime("CLOSURE constant is not a function".to_string())),
                };
                let function = function_obj.as_function().expect("checked above");
                let enclosing_closure = frames[depth - 1].closure;
                let mut upvalues = Vec::with_capacity(function.upvalues.len());
                for desc in function.upvalues.iter() {
                    upvalues.push(self.capture_upvalue(frames, desc)?);
                }
                let closure_obj = self.heap.alloc_closure(ClosureData {
                    function: to_non_null(function_obj),
                    upvalues: upvalues.into_boxed_slice(),
                });
                let _ = enclosing_closure;
                frames[depth - 1].set_reg(abx.a, Value::Object(closure_obj));
                frames[depth - 1].ip += 1;
            }
            OpCode::MakeGlobalRef | OpCode::MakeSlotGlobalRef => {
                let name = self.constant_string(&frames[depth - 1], abx.bx)?;
                let name_obj = self.heap.intern_string(&name);
                let reference = self.heap.alloc_reference(Reference::Global(name_obj));
                frames[depth - 1].set_reg(abx.a, Value::Object(reference));
                frames[depth - 1].ip += 1;
            }
            other => return Err(InterpretError::UnsupportedOpcode(other)),
        }
        Ok(None)
    }

    fn constant_string(&self, frame: &Frame, idx: u16) -> Result<String, InterpretError> {
        match frame.chunk().constants[idx as usize] {
            Value::Object(obj) => obj
                .as_string()
                .map(|s| s.as_str().to_string())
                .ok_or_else(|| InterpretError::Runtime("constant is not a string".to_string())),
            _ => Err(InterpretError::Runtime("constant is not a string".to_string())),
        }
    }

    /// Build (or reuse) the upvalue a `CLOSURE` capture descriptor names:
    /// `is_local` captures straight from the enclosing frame's register
    /// file; otherwise it's forwarded from the enclosing closure's own
    /// upvalue array (a capture of a capture). Each `CLOSURE` makes a fresh
    /// `Upvalue` object per local capture rather than interning by register
    /// (see DESIGN.md) — two closures over the same local do not observe
    /// each other's writes through that local in this harness.
    fn capture_upvalue(&self, frames: &mut Vec<Frame>, desc: &UpvalueDesc) -> Result<NonNull<Object>, InterpretError> {
        let depth = frames.len();
        if desc.is_local {
            let frame = &mut frames[depth - 1];
            let slot = frame.reg_ptr(desc.index);
            let upvalue = self.heap.alloc_open_upvalue(slot);
            frame.open_upvalues.push((slot, upvalue));
            Ok(to_non_null(upvalue))
        } else {
            let closure = frames[depth - 1]
                .closure
                .ok_or_else(|| InterpretError::Runtime("upvalue capture outside a closure".to_string()))?;
            let data = closure.as_closure().expect("frame closure is a Closure object");
            Ok(*data
                .upvalues
                .get(desc.index as usize)
                .ok_or_else(|| InterpretError::Runtime("upvalue index out of range".to_string()))?)
        }
    }

    fn step_abc(
        &mut self,
        frames: &mut Vec<Frame>,
        op: OpCode,
        a: u8,
        b: u8,
        c: u8,
    ) -> Result<Option<StepOutcome>, InterpretError> {
        let depth = frames.len();
        macro_rules! bump_ip {
            () => {
                frames[depth - 1].ip += 1
            };
        }
        match op {
            OpCode::Move => {
                let v = frames[depth - 1].reg(b);
                frames[depth - 1].set_reg(a, v);
                bump_ip!();
            }
            OpCode::LoadNull => {
                frames[depth - 1].set_reg(a, Value::Null);
                bump_ip!();
            }
            OpCode::LoadTrue => {
                frames[depth - 1].set_reg(a, Value::Bool(true));
                bump_ip!();
            }
            OpCode::LoadFalse => {
                frames[depth - 1].set_reg(a, Value::Bool(false));
                bump_ip!();
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::BAnd | OpCode::BOr
            | OpCode::BXor | OpCode::BLShift | OpCode::BRShiftI | OpCode::BRShiftU | OpCode::Eq | OpCode::Ne
            | OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                let left = frames[depth - 1].reg(b);
                let right = frames[depth - 1].reg(c);
                let result = apply_binary(op, left, right)?;
                frames[depth - 1].set_reg(a, result);
                bump_ip!();
            }
            OpCode::Neg => {
                let v = as_double(frames[depth - 1].reg(b))?;
                frames[depth - 1].set_reg(a, Value::Double(-v));
                bump_ip!();
            }
            OpCode::Not => {
                let v = frames[depth - 1].reg(b).is_truthy();
                frames[depth - 1].set_reg(a, Value::Bool(!v));
                bump_ip!();
            }
            OpCode::BNot => {
                let v = as_double(frames[depth - 1].reg(b))? as i64;
                frames[depth - 1].set_reg(a, Value::Double(!v as f64));
                bump_ip!();
            }
            OpCode::Jump => {
                let offset = (((b as u32) | ((c as u32) << 8)) as u16) as i16;
                let _ = offset; // ABC view of a jump word is never used; see below.
                unreachable!("jump words are ABx-shaped and handled in step_abx");
            }
            OpCode::Clone => {
                let v = frames[depth - 1].reg(b);
                frames[depth - 1].set_reg(a, clone_value(self.heap, v));
                bump_ip!();
            }
            OpCode::TypeOf => {
                let v = frames[depth - 1].reg(b);
                let name = self.heap.intern_string(v.type_name());
                frames[depth - 1].set_reg(a, Value::Object(name));
                bump_ip!();
            }
            OpCode::NewList => {
                frames[depth - 1].set_reg(a, Value::Object(self.heap.alloc_list(Vec::new())));
                bump_ip!();
            }
            OpCode::ListAppend => {
                let list = frames[depth - 1].reg(a);
                let item = frames[depth - 1].reg(b);
                let list_ref = list
                    .as_object()
                    .and_then(|o| o.as_list())
                    .ok_or_else(|| InterpretError::Runtime("LIST_APPEND target is not a list".to_string()))?;
                list_ref.borrow_mut().push(item);
                bump_ip!();
            }
            OpCode::ListExtend => {
                let list = frames[depth - 1].reg(a);
                let other = frames[depth - 1].reg(b);
                let dest = list
                    .as_object()
                    .and_then(|o| o.as_list())
                    .ok_or_else(|| InterpretError::Runtime("LIST_EXTEND target is not a list".to_string()))?;
                let src = other
                    .as_object()
                    .and_then(|o| o.as_list())
                    .ok_or_else(|| InterpretError::Runtime("LIST_EXTEND source is not a list".to_string()))?;
                let items: Vec<Value> = src.borrow().clone();
                dest.borrow_mut().extend(items);
                bump_ip!();
            }
            OpCode::NewMap => {
                let base = a;
                let mut map = HashMap::new();
                for i in 0..b {
                    let key_reg = base.wrapping_add(i.wrapping_mul(2));
                    let value_reg = base.wrapping_add(i.wrapping_mul(2)).wrapping_add(1);
                    let key = self.string_value(frames[depth - 1].reg(key_reg))?;
                    let value = frames[depth - 1].reg(value_reg);
                    map.insert(key, value);
                }
                frames[depth - 1].set_reg(a, Value::Object(self.heap.alloc_map(map)));
                bump_ip!();
            }
            OpCode::GetIndex => {
                let container = frames[depth - 1].reg(b);
                let index = frames[depth - 1].reg(c);
                let value = self.get_index(&container, &index)?;
                frames[depth - 1].set_reg(a, value);
                bump_ip!();
            }
            OpCode::SetIndex => {
                let container = frames[depth - 1].reg(a);
                let index = frames[depth - 1].reg(b);
                let value = frames[depth - 1].reg(c);
                self.set_index(&container, &index, value)?;
                bump_ip!();
            }
            OpCode::GetProperty => {
                let container = frames[depth - 1].reg(b);
                let key = frames[depth - 1].reg(c);
                let value = self.get_property(&container, &key)?;
                frames[depth - 1].set_reg(a, value);
                bump_ip!();
            }
            OpCode::SetProperty => {
                let container = frames[depth - 1].reg(a);
                let key = frames[depth - 1].reg(b);
                let value = frames[depth - 1].reg(c);
                self.set_property(&container, &key, value)?;
                bump_ip!();
            }
            OpCode::NewStructPositional => {
                unreachable!("NEW_STRUCT_POSITIONAL is ABx-shaped and handled in step_abx");
            }
            OpCode::GetUpvalue => {
                let closure = frames[depth - 1]
                    .closure
                    .ok_or_else(|| InterpretError::Runtime("GET_UPVALUE outside a closure".to_string()))?;
                let value = self.read_upvalue(closure, b)?;
                frames[depth - 1].set_reg(a, value);
                bump_ip!();
            }
            OpCode::SetUpvalue => {
                let closure = frames[depth - 1]
                    .closure
                    .ok_or_else(|| InterpretError::Runtime("SET_UPVALUE outside a closure".to_string()))?;
                let value = frames[depth - 1].reg(a);
                self.write_upvalue(closure, b, value)?;
                bump_ip!();
            }
            OpCode::MakeRef | OpCode::MakeSlotRef => {
                let slot = frames[depth - 1].reg_ptr(b);
                let reference = self.heap.alloc_reference(Reference::Local(slot));
                frames[depth - 1].set_reg(a, Value::Object(reference));
                bump_ip!();
            }
            OpCode::MakeUpvalueRef | OpCode::MakeSlotUpvalueRef => {
                let closure = frames[depth - 1]
                    .closure
                    .ok_or_else(|| InterpretError::Runtime("MAKE_UPVALUE_REF outside a closure".to_string()))?;
                let data = closure.as_closure().expect("closure");
                let uv = *data
                    .upvalues
                    .get(b as usize)
                    .ok_or_else(|| InterpretError::Runtime("upvalue index out of range".to_string()))?;
                let uv_ref = unsafe { ObjRef::new(uv) };
                let reference = self.heap.alloc_reference(Reference::Upvalue(uv_ref));
                frames[depth - 1].set_reg(a, Value::Object(reference));
                bump_ip!();
            }
            OpCode::MakeIndexRef | OpCode::MakeSlotIndexRef => {
                let container = frames[depth - 1].reg(b);
                let index = frames[depth - 1].reg(c);
                let reference = self.heap.alloc_reference(Reference::Index { container, index });
                frames[depth - 1].set_reg(a, Value::Object(reference));
                bump_ip!();
            }
            OpCode::MakePropertyRef | OpCode::MakeSlotPropertyRef => {
                let container = frames[depth - 1].reg(b);
                let key = frames[depth - 1].reg(c);
                let reference = self.heap.alloc_reference(Reference::Property { container, key });
                frames[depth - 1].set_reg(a, Value::Object(reference));
                bump_ip!();
            }
            OpCode::DerefRef => {
                let reference_value = frames[depth - 1].reg(b);
                let reference = reference_value
                    .as_object()
                    .and_then(|o| o.as_reference())
                    .ok_or_else(|| InterpretError::Runtime("DEREF_REF target is not a reference".to_string()))?;
                let value = reference.deref(self)?;
                frames[depth - 1].set_reg(a, value);
                bump_ip!();
            }
            OpCode::SetRef => {
                let reference_value = frames[depth - 1].reg(a);
                let value = frames[depth - 1].reg(b);
                let reference = reference_value
                    .as_object()
                    .and_then(|o| o.as_reference())
                    .ok_or_else(|| InterpretError::Runtime("SET_REF target is not a reference".to_string()))?;
                reference.assign(self, value)?;
                bump_ip!();
            }
            OpCode::MakeDispatcher => {
                let mut overloads = Vec::with_capacity(b as usize);
                for i in 0..b {
                    let pair_base = a.wrapping_add(i.wrapping_mul(2));
                    let arity = as_double(frames[depth - 1].reg(pair_base))? as u8;
                    let callable = frames[depth - 1].reg(pair_base.wrapping_add(1));
                    let obj = callable
                        .as_object()
                        .ok_or_else(|| InterpretError::Runtime("dispatcher overload is not callable".to_string()))?;
                    overloads.push((arity, obj.0));
                }
                let dispatcher = self
                    .heap
                    .alloc_dispatcher(zym_core::object::DispatcherData { overloads });
                frames[depth - 1].set_reg(a, Value::Object(dispatcher));
                bump_ip!();
            }
            OpCode::CloseFrameUpvalues => {
                let frame = &mut frames[depth - 1];
                let floor = unsafe { frame.registers.as_ptr().add(a as usize) } as usize;
                frame.open_upvalues.retain(|(slot, upvalue)| {
                    if (*slot as usize) >= floor {
                        let value = unsafe { **slot };
                        if let ObjectData::Upvalue(state) = &upvalue.get().data {
                            *state.borrow_mut() = UpvalueState::Closed(value);
                        }
                        false
                    } else {
                        true
                    }
                });
                bump_ip!();
            }
            OpCode::Call => {
                let base = a;
                let argc = b.saturating_sub(1);
                let callee = frames[depth - 1].reg(base);
                let args: Vec<Value> = (0..argc).map(|i| frames[depth - 1].reg(base + 1 + i)).collect();
                match self.invoke(frames, callee, &args)? {
                    Invocation::Immediate(value) => {
                        frames[depth - 1].set_reg(base, value);
                        bump_ip!();
                    }
                    Invocation::Pushed => {
                        // The new frame now sits on top of `frames`; the
                        // caller's own `ip` already points past this `CALL`
                        // (bumped before the push so the caller resumes
                        // correctly once the callee returns).
                        frames[depth - 1].ip += 1;
                    }
                }
            }
            OpCode::TailCallSelf => {
                let base = a;
                let argc = b;
                let args: Vec<Value> = (0..argc).map(|i| frames[depth - 1].reg(base + i)).collect();
                let frame = &mut frames[depth - 1];
                for (i, value) in args.into_iter().enumerate() {
                    frame.set_reg(i as u8, value);
                }
                frame.ip = 0;
            }
            OpCode::Return => {
                let value = frames[depth - 1].reg(a);
                return Ok(Some(StepOutcome::Returned(value)));
            }
            other => return Err(InterpretError::UnsupportedOpcode(other)),
        }
        Ok(None)
    }

    fn read_upvalue(&self, closure: ObjRef, index: u8) -> Result<Value, InterpretError> {
        let data = closure.as_closure().expect("closure");
        let uv = *data
            .upvalues
            .get(index as usize)
            .ok_or_else(|| InterpretError::Runtime("upvalue index out of range".to_string()))?;
        let uv_ref = unsafe { ObjRef::new(uv) };
        self.get_upvalue(uv_ref)
    }

    fn write_upvalue(&mut self, closure: ObjRef, index: u8, value: Value) -> Result<(), InterpretError> {
        let data = closure.as_closure().expect("closure");
        let uv = *data
            .upvalues
            .get(index as usize)
            .ok_or_else(|| InterpretError::Runtime("upvalue index out of range".to_string()))?;
        let uv_ref = unsafe { ObjRef::new(uv) };
        Ok(self.set_upvalue(uv_ref, value)?)
    }

    fn string_value(&self, value: Value) -> Result<String, InterpretError> {
        value
            .as_object()
            .and_then(|o| o.as_string())
            .map(|s| s.as_str().to_string())
            .ok_or_else(|| InterpretError::Runtime("expected a string".to_string()))
    }

    fn get_index(&self, container: &Value, index: &Value) -> Result<Value, InterpretError> {
        let obj = container
            .as_object()
            .ok_or_else(|| InterpretError::Runtime("GET_INDEX target is not indexable".to_string()))?;
        if let Some(list) = obj.as_list() {
            let i = as_double(*index)? as usize;
            return list
                .borrow()
                .get(i)
                .copied()
                .ok_or_else(|| InterpretError::Runtime(format!("list index {} out of range", i)));
        }
        if let Some(map) = obj.as_map() {
            let key = self.string_value(*index)?;
            return map
                .borrow()
                .get(&key)
                .copied()
                .ok_or_else(|| InterpretError::Runtime(format!("map has no key {:?}", key)));
        }
        Err(InterpretError::Runtime("GET_INDEX target is not a list or map".to_string()))
    }

    fn set_index(&self, container: &Value, index: &Value, value: Value) -> Result<(), InterpretError> {
        let obj = container
            .as_object()
            .ok_or_else(|| InterpretError::Runtime("SET_INDEX target is not indexable".to_string()))?;
        if let Some(list) = obj.as_list() {
            let i = as_double(*index)? as usize;
            let mut list = list.borrow_mut();
            if i >= list.len() {
                return Err(InterpretError::Runtime(format!("list index {} out of range", i)));
            }
            list[i] = value;
            return Ok(());
        }
        if let Some(map) = obj.as_map() {
            let key = self.string_value(*index)?;
            map.borrow_mut().insert(key, value);
            return Ok(());
        }
        Err(InterpretError::Runtime("SET_INDEX target is not a list or map".to_string()))
    }

    fn get_property(&self, container: &Value, key: &Value) -> Result<Value, InterpretError> {
        let obj = container
            .as_object()
            .ok_or_else(|| InterpretError::Runtime("GET_PROPERTY target has no properties".to_string()))?;
        let key = self.string_value(*key)?;
        if let Some(instance) = obj.as_struct_instance() {
            let schema = unsafe { ObjRef::new(instance.schema) };
            let schema = schema.as_struct_schema().expect("struct instance schema");
            let idx = *schema
                .field_index
                .get(&key)
                .ok_or_else(|| InterpretError::Runtime(format!("struct {} has no field {:?}", schema.name, key)))?;
            return Ok(instance.fields.borrow()[idx]);
        }
        if let Some(map) = obj.as_map() {
            return map
                .borrow()
                .get(&key)
                .copied()
                .ok_or_else(|| InterpretError::Runtime(format!("map has no key {:?}", key)));
        }
        Err(InterpretError::Runtime("GET_PROPERTY target is not a struct or map".to_string()))
    }

    fn set_property(&self, container: &Value, key: &Value, value: Value) -> Result<(), InterpretError> {
        let obj = container
            .as_object()
            .ok_or_else(|| InterpretError::Runtime("SET_PROPERTY target has no properties".to_string()))?;
        let key = self.string_value(*key)?;
        if let Some(instance) = obj.as_struct_instance() {
            let schema = unsafe { ObjRef::new(instance.schema) };
            let schema = schema.as_struct_schema().expect("struct instance schema");
            let idx = *schema
                .field_index
                .get(&key)
                .ok_or_else(|| InterpretError::Runtime(format!("struct {} has no field {:?}", schema.name, key)))?;
            instance.fields.borrow_mut()[idx] = value;
            return Ok(());
        }
        if let Some(map) = obj.as_map() {
            map.borrow_mut().insert(key, value);
            return Ok(());
        }
        Err(InterpretError::Runtime("SET_PROPERTY target is not a struct or map".to_string()))
    }

    /// Dispatch a `CALL`'s callee. `Function`/`Closure` push a new frame for
    /// the main loop to keep stepping (`Invocation::Pushed`); natives and
    /// dispatchers resolve to an immediate value without growing the frame
    /// stack.
    fn invoke(&mut self, frames: &mut Vec<Frame>, callee: Value, args: &[Value]) -> Result<Invocation, InterpretError> {
        let obj = callee
            .as_object()
            .ok_or_else(|| InterpretError::Runtime(format!("{} is not callable", callee.type_name())))?;
        match &obj.get().data {
            ObjectData::Function(function) => {
                if args.len() != function.arity as usize {
                    return Err(InterpretError::Runtime(format!(
                        "function {:?} expects {} arguments, got {}",
                        function.name,
                        function.arity,
                        args.len()
                    )));
                }
                let mut registers = vec![Value::Null; FRAME_REGISTERS].into_boxed_slice();
                registers[..args.len()].copy_from_slice(args);
                frames.push(Frame {
                    registers,
                    code: &function.chunk as *const Chunk,
                    closure: None,
                    ip: 0,
                    open_upvalues: Vec::new(),
                });
                Ok(Invocation::Pushed)
            }
            ObjectData::Closure(closure) => {
                let function_obj = unsafe { ObjRef::new(closure.function) };
                let function = function_obj.as_function().expect("closure's function");
                if args.len() != function.arity as usize {
                    return Err(InterpretError::Runtime(format!(
                        "function {:?} expects {} arguments, got {}",
                        function.name,
                        function.arity,
                        args.len()
                    )));
                }
                let mut registers = vec![Value::Null; FRAME_REGISTERS].into_boxed_slice();
                registers[..args.len()].copy_from_slice(args);
                frames.push(Frame {
                    registers,
                    code: &function.chunk as *const Chunk,
                    closure: Some(obj),
                    ip: 0,
                    open_upvalues: Vec::new(),
                });
                Ok(Invocation::Pushed)
            }
            ObjectData::NativeFunction(native) => {
                let value = (native.func)(args).map_err(InterpretError::Runtime)?;
                Ok(Invocation::Immediate(value))
            }
            ObjectData::NativeClosure(native) => {
                let value = (native.func)(args).map_err(InterpretError::Runtime)?;
                Ok(Invocation::Immediate(value))
            }
            ObjectData::Dispatcher(dispatcher) => {
                let target = dispatcher
                    .borrow()
                    .resolve(args.len() as u8)
                    .ok_or_else(|| InterpretError::Runtime(format!("no overload for arity {}", args.len())))?;
                let target_ref = unsafe { ObjRef::new(target) };
                self.invoke(frames, Value::Object(target_ref), args)
            }
            _ => Err(InterpretError::Runtime(format!("{} is not callable", callee.type_name()))),
        }
    }
}

enum StepOutcome {
    Returned(Value),
}

enum Invocation {
    Immediate(Value),
    Pushed,
}

impl RefEnvironment for Interpreter<'_> {
    fn get_global(&self, name: &str) -> Result<Value, String> {
        self.globals.borrow().get(name).copied().ok_or_else(|| format!("undefined global {:?}", name))
    }

    fn set_global(&mut self, name: &str, value: Value) -> Result<(), String> {
        self.globals.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    fn get_upvalue(&self, upvalue: ObjRef) -> Result<Value, String> {
        match &upvalue.get().data {
            ObjectData::Upvalue(state) => Ok(match &*state.borrow() {
                UpvalueState::Open { frame_slot } => unsafe { **frame_slot },
                UpvalueState::Closed(value) => *value,
            }),
            _ => Err("not an upvalue".to_string()),
        }
    }

    fn set_upvalue(&mut self, upvalue: ObjRef, value: Value) -> Result<(), String> {
        match &upvalue.get().data {
            ObjectData::Upvalue(state) => {
                match &mut *state.borrow_mut() {
                    UpvalueState::Open { frame_slot } => unsafe { **frame_slot = value },
                    UpvalueState::Closed(slot) => *slot = value,
                }
                Ok(())
            }
            _ => Err("not an upvalue".to_string()),
        }
    }

    fn get_index(&self, container: &Value, index: &Value) -> Result<Value, String> {
        self.get_index(container, index).map_err(|e| e.to_string())
    }

    fn set_index(&mut self, container: &Value, index: &Value, value: Value) -> Result<(), String> {
        Interpreter::set_index(self, container, index, value).map_err(|e| e.to_string())
    }

    fn get_property(&self, container: &Value, key: &Value) -> Result<Value, String> {
        self.get_property(container, key).map_err(|e| e.to_string())
    }

    fn set_property(&mut self, container: &Value, key: &Value, value: Value) -> Result<(), String> {
        Interpreter::set_property(self, container, key, value).map_err(|e| e.to_string())
    }
}

fn to_non_null(obj: ObjRef) -> NonNull<Object> {
    NonNull::new(obj.as_ptr()).expect("ObjRef is never null")
}

fn as_double(value: Value) -> Result<f64, InterpretError> {
    match value {
        Value::Double(d) => Ok(d),
        other => Err(InterpretError::Runtime(format!("expected a number, found {}", other.type_name()))),
    }
}

/// Structural `display`-free value clone, matching the `CLONE` opcode's
/// contract (spec §4.3.3's `clone` qualifier/keyword): scalars copy
/// trivially; containers get a fresh shallow copy; every other object kind
/// (functions, references, schemas, ...) is not cloneable and copies by
/// identity, matching how `clone` on a non-container is a no-op in
/// practice.
fn clone_value(heap: &Heap, value: Value) -> Value {
    match value {
        Value::Object(obj) => {
            if let Some(list) = obj.as_list() {
                return Value::Object(heap.alloc_list(list.borrow().clone()));
            }
            if let Some(map) = obj.as_map() {
                return Value::Object(heap.alloc_map(map.borrow().clone()));
            }
            if let Some(instance) = obj.as_struct_instance() {
                let cloned_fields: Vec<Value> = instance.fields.borrow().iter().copied().collect();
                return Value::Object(heap.alloc_struct_instance(StructInstanceData {
                    schema: instance.schema,
                    fields: std::cell::RefCell::new(cloned_fields.into_boxed_slice()),
                }));
            }
            value
        }
        other => other,
    }
}

fn apply_binary(op: OpCode, left: Value, right: Value) -> Result<Value, InterpretError> {
    use OpCode::*;
    match op {
        Eq => return Ok(Value::Bool(left.structural_eq(&right))),
        Ne => return Ok(Value::Bool(!left.structural_eq(&right))),
        _ => {}
    }
    let l = as_double(left)?;
    let r = as_double(right)?;
    let result = match op {
        Add => Value::Double(l + r),
        Sub => Value::Double(l - r),
        Mul => Value::Double(l * r),
        Div => Value::Double(l / r),
        Mod => Value::Double(l % r),
        BAnd => Value::Double(((l as i64) & (r as i64)) as f64),
        BOr => Value::Double(((l as i64) | (r as i64)) as f64),
        BXor => Value::Double(((l as i64) ^ (r as i64)) as f64),
        BLShift => Value::Double(((l as i64) << ((r as i64) & 63)) as f64),
        BRShiftI => Value::Double(((l as i64) >> ((r as i64) & 63)) as f64),
        BRShiftU => Value::Double(((l as u64) >> ((r as i64) & 63)) as f64),
        Lt => Value::Bool(l < r),
        Le => Value::Bool(l <= r),
        Gt => Value::Bool(l > r),
        Ge => Value::Bool(l >= r),
        other => return Err(InterpretError::UnsupportedOpcode(other)),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::parser::Parser;
    use zym_core::heap::Heap;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn run_with_print(src: &str) -> Vec<String> {
        let heap = Heap::new();
        let program = Parser::new(src).parse_program().expect("parse");
        let out = crate::codegen::compile_program(&program, &heap, &CompilerConfig::default()).expect("compile");
        let mut interp = Interpreter::new(&heap);
        let printed = Rc::new(RefCell::new(Vec::new()));
        let sink = printed.clone();
        let globals = interp.globals_handle();
        interp.register_native_closure(
            "print",
            1,
            Box::new(move |args: &[Value]| {
                let lookup = |key: &str| globals.borrow().get(key).copied();
                let text = args[0].display(&lookup);
                sink.borrow_mut().push(text);
                Ok(Value::Null)
            }),
        );
        interp.run(&out.chunk).expect("run");
        printed.borrow().clone()
    }

    #[test]
    fn arithmetic_prints_expected_value() {
        let printed = run_with_print("var x = 2 + 3 * 4; print(x);");
        assert_eq!(printed, vec!["14"]);
    }

    #[test]
    fn self_recursive_tail_call_does_not_grow_native_stack() {
        let printed = run_with_print(
            "func sum(n, acc) { if (n == 0) { return acc; } return sum(n - 1, acc + n); } print(sum(10000, 0));",
        );
        assert_eq!(printed, vec!["50005000"]);
    }

    #[test]
    fn struct_positional_init_reads_fields() {
        let printed = run_with_print(
            "struct P { x, y } var p = P(3, 4); print(p.x + p.y);",
        );
        assert_eq!(printed, vec!["7"]);
    }

    #[test]
    fn reference_parameter_writes_through() {
        let printed = run_with_print(
            "func inc(ref r) { r = r + 1; } var n = 10; inc(ref n); print(n);",
        );
        assert_eq!(printed, vec!["11"]);
    }

    #[test]
    fn enum_variant_displays_as_name_dot_variant() {
        let printed = run_with_print("enum C { R, G, B } print(C.G);");
        assert_eq!(printed, vec!["C.G"]);
    }
}
