use std::io::{self, Write};
use std::time::Instant;

use crate::compiler;
use crate::error::{VmError, VmResult};
use crate::heap::{Heap, RootSet};
use crate::object::{
    NativeFn, Obj, ObjBoundMethod, ObjClosure, ObjInstance, ObjNative, ObjString, ObjUpvalue,
};
use crate::opcode::Op;
use crate::stdlib;
use crate::table::Table;
use crate::value::{ObjRef, Value};

const FRAMES_MAX: usize = 256;
const STACK_MAX: usize = FRAMES_MAX * 64;

// ── Call frame ────────────────────────────────────────────────────────────

/// Activation record: the running closure, the instruction pointer into
/// its chunk and the base of its slots in the operand stack. The slot at
/// `base` holds the callee (or the receiver for methods).
pub struct CallFrame {
    pub closure: ObjRef,
    pub fn_ref: ObjRef,
    pub ip: usize,
    pub base: usize,
}

// ── VM ────────────────────────────────────────────────────────────────────

pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) globals: Table,
    /// The interner's string table: its keys are weak as far as the GC goes.
    pub(crate) strings: Table,
    /// Open upvalues, ordered by strictly decreasing stack slot.
    pub(crate) open_upvalues: Vec<ObjRef>,
    /// In-progress ObjFns of the compiler chain (GC roots).
    pub(crate) compiler_fns: Vec<ObjRef>,
    /// The "init" symbol, interned at construction: initializer lookups
    /// must never miss after a GC.
    pub(crate) init_string: Option<ObjRef>,
    started: Instant,
    out: Box<dyn Write>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    pub fn with_output(out: Box<dyn Write>) -> Self {
        let mut vm = Vm {
            heap: Heap::new(),
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            strings: Table::new(),
            open_upvalues: Vec::new(),
            compiler_fns: Vec::new(),
            init_string: None,
            started: Instant::now(),
            out,
        };
        let init = vm.intern("init");
        vm.init_string = Some(init);
        stdlib::register_globals(&mut vm);
        vm
    }

    // ── Execution ────────────────────────────────────────────────────────

    pub fn interpret(&mut self, source: &str) -> VmResult {
        let (program, lex_errors, parse_errors) = dojo_parser::parse(source);
        if !lex_errors.is_empty() || !parse_errors.is_empty() {
            let msgs = lex_errors
                .iter()
                .map(ToString::to_string)
                .chain(parse_errors.iter().map(ToString::to_string))
                .collect();
            return Err(VmError::Compile(msgs));
        }

        let script = compiler::compile(&program, self)?;

        // frame 0: the script closure, in the reserved slot
        self.push(Value::object(script));
        let closure = self.alloc(Obj::Closure(ObjClosure { function: script, upvalues: Vec::new() }));
        self.stack.pop();
        self.push(Value::object(closure));
        self.call_closure(closure, 0)?;
        self.run()
    }

    fn run(&mut self) -> VmResult {
        macro_rules! vpop {
            () => {
                match self.stack.pop() {
                    Some(v) => v,
                    None => return Err(self.runtime_error("Operand stack underflow.")),
                }
            };
        }
        macro_rules! binary_num {
            ($op:tt, $wrap:path) => {{
                let b = self.peek(0);
                let a = self.peek(1);
                if !a.is_number() || !b.is_number() {
                    return Err(self.runtime_error("Operands must be numbers."));
                }
                self.stack.pop();
                self.stack.pop();
                self.push($wrap(a.as_number() $op b.as_number()));
            }};
        }

        loop {
            let op_byte = self.read_u8();
            let op = match Op::from_u8(op_byte) {
                Some(op) => op,
                None => {
                    return Err(self.runtime_error(&format!("Unknown opcode {}.", op_byte)));
                }
            };

            match op {
                // ── Constants ──────────────────────────────────────────────
                Op::Constant => {
                    let v = self.read_constant();
                    self.push(v);
                }
                Op::Nil => self.push(Value::NIL),
                Op::True => self.push(Value::TRUE),
                Op::False => self.push(Value::FALSE),

                // ── Stack ─────────────────────────────────────────────────
                Op::Pop => {
                    vpop!();
                }
                Op::Popn => {
                    let n = self.read_u8() as usize;
                    let len = self.stack.len();
                    self.stack.truncate(len - n);
                }

                // ── Locals ────────────────────────────────────────────────
                Op::GetLocal => {
                    let slot = self.read_u8() as usize;
                    let base = self.frames.last().unwrap().base;
                    let v = self.stack[base + slot];
                    self.push(v);
                }
                Op::SetLocal => {
                    let slot = self.read_u8() as usize;
                    let base = self.frames.last().unwrap().base;
                    // the value stays on top: assignment is an expression
                    self.stack[base + slot] = self.peek(0);
                }

                // ── Globals ───────────────────────────────────────────────
                Op::GetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string(name).hash;
                    match self.globals.get(name, hash) {
                        Some(v) => self.push(v),
                        None => {
                            let n = self.heap.string(name).chars.to_string();
                            return Err(
                                self.runtime_error(&format!("Undefined Variable '{}'.", n))
                            );
                        }
                    }
                }
                Op::SetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string(name).hash;
                    if self.globals.get(name, hash).is_none() {
                        let n = self.heap.string(name).chars.to_string();
                        return Err(self.runtime_error(&format!("Undefined Variable '{}'.", n)));
                    }
                    let v = self.peek(0);
                    self.globals.put(name, hash, v);
                }
                Op::DefineGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string(name).hash;
                    let v = self.peek(0);
                    self.globals.put(name, hash, v);
                    self.stack.pop();
                }

                // ── Upvalue ───────────────────────────────────────────────
                Op::GetUpvalue => {
                    let idx = self.read_u8() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let uv = self.heap.closure(closure).upvalues[idx];
                    let v = match *self.heap.upvalue(uv) {
                        ObjUpvalue::Open(slot) => self.stack[slot],
                        ObjUpvalue::Closed(v) => v,
                    };
                    self.push(v);
                }
                Op::SetUpvalue => {
                    let idx = self.read_u8() as usize;
                    let v = self.peek(0);
                    let closure = self.frames.last().unwrap().closure;
                    let uv = self.heap.closure(closure).upvalues[idx];
                    match *self.heap.upvalue(uv) {
                        ObjUpvalue::Open(slot) => self.stack[slot] = v,
                        ObjUpvalue::Closed(_) => *self.heap.upvalue_mut(uv) = ObjUpvalue::Closed(v),
                    }
                }
                Op::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    vpop!();
                }

                // ── Properties ─────────────────────────────────────────────
                Op::GetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(0);
                    if !receiver.is_object() {
                        return Err(self.runtime_error("Only instances have properties."));
                    }
                    let hash = self.heap.string(name).hash;
                    let (class_ref, field) = match self.heap.obj(receiver.as_object()) {
                        Obj::Instance(i) => (i.class, i.fields.get(name, hash)),
                        _ => return Err(self.runtime_error("Only instances have properties.")),
                    };
                    match field {
                        Some(v) => {
                            self.stack.pop();
                            self.push(v);
                        }
                        None => self.bind_method(class_ref, name, hash)?,
                    }
                }
                Op::SetProperty => {
                    let name = self.read_string();
                    let target = self.peek(1);
                    if !target.is_object()
                        || !matches!(self.heap.obj(target.as_object()), Obj::Instance(_))
                    {
                        return Err(self.runtime_error("Only instances have fields."));
                    }
                    let hash = self.heap.string(name).hash;
                    let value = self.peek(0);
                    self.heap
                        .instance_mut(target.as_object())
                        .fields
                        .put(name, hash, value);
                    // leave the value as the result of the expression
                    let v = vpop!();
                    vpop!();
                    self.push(v);
                }
                Op::GetSuper => {
                    let name = self.read_string();
                    let hash = self.heap.string(name).hash;
                    let superclass = vpop!();
                    self.bind_method(superclass.as_object(), name, hash)?;
                }

                // ── Comparison ─────────────────────────────────────────────
                Op::Equal => {
                    let b = vpop!();
                    let a = vpop!();
                    self.push(Value::bool(a == b));
                }
                Op::NotEqual => {
                    let b = vpop!();
                    let a = vpop!();
                    self.push(Value::bool(a != b));
                }
                Op::Less => binary_num!(<, Value::bool),
                Op::LessEqual => binary_num!(<=, Value::bool),
                Op::Greater => binary_num!(>, Value::bool),
                Op::GreaterEqual => binary_num!(>=, Value::bool),

                // ── Arithmetic ────────────────────────────────────────────
                Op::Add => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if a.is_number() && b.is_number() {
                        self.stack.pop();
                        self.stack.pop();
                        self.push(Value::number(a.as_number() + b.as_number()));
                    } else if self.is_string(a) && self.is_string(b) {
                        let mut s = self.heap.string(a.as_object()).chars.to_string();
                        s.push_str(&self.heap.string(b.as_object()).chars);
                        // a and b stay on the stack while the interner allocates
                        let r = self.intern(&s);
                        self.stack.pop();
                        self.stack.pop();
                        self.push(Value::object(r));
                    } else {
                        return Err(
                            self.runtime_error("Operands must be two numbers or two strings.")
                        );
                    }
                }
                Op::Subtract => binary_num!(-, Value::number),
                Op::Multiply => binary_num!(*, Value::number),
                Op::Divide => binary_num!(/, Value::number),
                Op::Not => {
                    let v = vpop!();
                    self.push(Value::bool(v.is_falsey()));
                }
                Op::Negate => {
                    let v = self.peek(0);
                    if !v.is_number() {
                        return Err(self.runtime_error("Operand must be a number."));
                    }
                    self.stack.pop();
                    self.push(Value::number(-v.as_number()));
                }

                // ── Template ──────────────────────────────────────────────
                Op::Template => {
                    let spans = self.read_u8() as usize;
                    let count = 2 * spans + 1;
                    let start = self.stack.len() - count;
                    let mut buf = String::new();
                    for i in start..self.stack.len() {
                        buf.push_str(&self.heap.format_value(self.stack[i]));
                    }
                    self.stack.truncate(start);
                    let s = self.intern(&buf);
                    self.push(Value::object(s));
                }

                // ── Jumps ─────────────────────────────────────────────────
                Op::Jump => {
                    let delta = self.read_u16() as usize;
                    self.frames.last_mut().unwrap().ip += delta;
                }
                Op::JumpIfTrue => {
                    let delta = self.read_u16() as usize;
                    if !self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += delta;
                    }
                }
                Op::JumpIfFalse => {
                    let delta = self.read_u16() as usize;
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += delta;
                    }
                }
                Op::Loop => {
                    let delta = self.read_u16() as usize;
                    self.frames.last_mut().unwrap().ip -= delta;
                }

                // ── Calls ─────────────────────────────────────────────────
                Op::Call => {
                    let argc = self.read_u8() as usize;
                    let callee = self.peek(argc);
                    self.call_value(callee, argc)?;
                }
                Op::Invoke => {
                    let name = self.read_string();
                    let argc = self.read_u8() as usize;
                    self.invoke(name, argc)?;
                }
                Op::SuperInvoke => {
                    let name = self.read_string();
                    let argc = self.read_u8() as usize;
                    let superclass = vpop!();
                    let hash = self.heap.string(name).hash;
                    self.invoke_from_class(superclass.as_object(), name, hash, argc)?;
                }
                Op::Closure => {
                    let fn_ref = self.read_constant().as_object();
                    let upvalue_count = self.heap.function(fn_ref).upvalue_count;
                    let closure_ref = self.alloc(Obj::Closure(ObjClosure {
                        function: fn_ref,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    // the closure must be rooted before the captures, which allocate
                    self.push(Value::object(closure_ref));
                    for _ in 0..upvalue_count {
                        let is_local = self.read_u8() != 0;
                        let index = self.read_u8() as usize;
                        let uv = if is_local {
                            let base = self.frames.last().unwrap().base;
                            self.capture_upvalue(base + index)
                        } else {
                            let current = self.frames.last().unwrap().closure;
                            self.heap.closure(current).upvalues[index]
                        };
                        self.heap.closure_mut(closure_ref).upvalues.push(uv);
                    }
                }
                Op::Return => {
                    let result = vpop!();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues(frame.base);
                    self.stack.truncate(frame.base);
                    if self.frames.is_empty() {
                        return Ok(result);
                    }
                    self.push(result);
                }

                // ── Classes ────────────────────────────────────────────────
                Op::Class => {
                    let name = self.read_string();
                    let class = self.alloc(Obj::Class(crate::object::ObjClass {
                        name,
                        methods: Table::new(),
                    }));
                    self.push(Value::object(class));
                }
                Op::Inherit => {
                    let superclass = self.peek(1);
                    if !superclass.is_object()
                        || !matches!(self.heap.obj(superclass.as_object()), Obj::Class(_))
                    {
                        return Err(self.runtime_error("Superclass must be a class."));
                    }
                    let subclass = self.peek(0).as_object();
                    let methods = self.heap.class(superclass.as_object()).methods.clone();
                    self.heap.class_mut(subclass).methods.put_all(&methods);
                    // pop the subclass; the superclass stays behind as the `super` local
                    vpop!();
                }
                Op::Method => {
                    let name = self.read_string();
                    let hash = self.heap.string(name).hash;
                    let method = self.peek(0);
                    let class_ref = self.peek(1).as_object();
                    self.heap.class_mut(class_ref).methods.put(name, hash, method);
                    vpop!();
                }
            }
        }
    }

    // ── Bytecode reading ──────────────────────────────────────────────────

    fn read_u8(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let b = self.heap.function(frame.fn_ref).chunk.code[frame.ip];
        frame.ip += 1;
        b
    }

    fn read_u16(&mut self) -> u16 {
        let lo = self.read_u8() as u16;
        let hi = self.read_u8() as u16;
        lo | (hi << 8)
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_u8() as usize;
        let frame = self.frames.last().unwrap();
        self.heap.function(frame.fn_ref).chunk.constants[idx]
    }

    fn read_string(&mut self) -> ObjRef {
        self.read_constant().as_object()
    }

    // ── Stack ─────────────────────────────────────────────────────────────

    pub(crate) fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn peek(&self, depth: usize) -> Value {
        self.stack[self.stack.len() - depth - 1]
    }

    fn is_string(&self, v: Value) -> bool {
        v.is_object() && matches!(self.heap.obj(v.as_object()), Obj::String(_))
    }

    // ── Calls ─────────────────────────────────────────────────────────────

    fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), VmError> {
        enum CallKind {
            Closure,
            Class,
            Bound(Value, ObjRef),
            Native(u8, NativeFn),
            Bad,
        }

        let kind = if callee.is_object() {
            match self.heap.obj(callee.as_object()) {
                Obj::Closure(_) => CallKind::Closure,
                Obj::Class(_) => CallKind::Class,
                Obj::BoundMethod(b) => CallKind::Bound(b.receiver, b.method),
                Obj::Native(n) => CallKind::Native(n.arity, n.function),
                _ => CallKind::Bad,
            }
        } else {
            CallKind::Bad
        };

        match kind {
            CallKind::Closure => self.call_closure(callee.as_object(), argc),
            CallKind::Class => {
                let class_ref = callee.as_object();
                // the class stays in the callee slot while the instance allocates
                let instance = self.alloc(Obj::Instance(ObjInstance {
                    class: class_ref,
                    fields: Table::new(),
                }));
                let idx = self.stack.len() - argc - 1;
                self.stack[idx] = Value::object(instance);
                if let Some(init) = self.init_string {
                    let hash = self.heap.string(init).hash;
                    if let Some(m) = self.heap.class(class_ref).methods.get(init, hash) {
                        return self.call_closure(m.as_object(), argc);
                    }
                }
                if argc != 0 {
                    return Err(
                        self.runtime_error(&format!("Expected 0 arguments but got {}.", argc))
                    );
                }
                Ok(())
            }
            CallKind::Bound(receiver, method) => {
                let idx = self.stack.len() - argc - 1;
                self.stack[idx] = receiver;
                self.call_closure(method, argc)
            }
            CallKind::Native(arity, function) => {
                if argc != arity as usize {
                    return Err(self.runtime_error(&format!(
                        "Expected {} arguments but got {}.",
                        arity, argc
                    )));
                }
                let first = self.stack.len() - argc;
                let args: Vec<Value> = self.stack.split_off(first);
                self.stack.pop(); // the callee
                match function(self, &args) {
                    Ok(v) => {
                        self.push(v);
                        Ok(())
                    }
                    Err(msg) => Err(self.runtime_error(&msg)),
                }
            }
            CallKind::Bad => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn call_closure(&mut self, closure_ref: ObjRef, argc: usize) -> Result<(), VmError> {
        let fn_ref = self.heap.closure(closure_ref).function;
        let arity = self.heap.function(fn_ref).arity as usize;
        if argc != arity {
            return Err(
                self.runtime_error(&format!("Expected {} arguments but got {}.", arity, argc))
            );
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let base = self.stack.len() - argc - 1;
        self.frames.push(CallFrame { closure: closure_ref, fn_ref, ip: 0, base });
        Ok(())
    }

    fn invoke(&mut self, name: ObjRef, argc: usize) -> Result<(), VmError> {
        let receiver = self.peek(argc);
        if !receiver.is_object() {
            return Err(self.runtime_error("Only instances have methods."));
        }
        let hash = self.heap.string(name).hash;
        let (class_ref, field) = match self.heap.obj(receiver.as_object()) {
            Obj::Instance(i) => (i.class, i.fields.get(name, hash)),
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };
        if let Some(v) = field {
            // a field can shadow a method: the callee takes the slot
            let idx = self.stack.len() - argc - 1;
            self.stack[idx] = v;
            return self.call_value(v, argc);
        }
        self.invoke_from_class(class_ref, name, hash, argc)
    }

    fn invoke_from_class(
        &mut self,
        class_ref: ObjRef,
        name: ObjRef,
        hash: u32,
        argc: usize,
    ) -> Result<(), VmError> {
        match self.heap.class(class_ref).methods.get(name, hash) {
            Some(m) => self.call_closure(m.as_object(), argc),
            None => {
                let n = self.heap.string(name).chars.to_string();
                Err(self.runtime_error(&format!("Undefined property '{}'.", n)))
            }
        }
    }

    fn bind_method(&mut self, class_ref: ObjRef, name: ObjRef, hash: u32) -> Result<(), VmError> {
        let method = match self.heap.class(class_ref).methods.get(name, hash) {
            Some(m) => m.as_object(),
            None => {
                let n = self.heap.string(name).chars.to_string();
                return Err(self.runtime_error(&format!("Undefined property '{}'.", n)));
            }
        };
        let receiver = self.peek(0);
        let bound = self.alloc(Obj::BoundMethod(ObjBoundMethod { receiver, method }));
        self.stack.pop();
        self.push(Value::object(bound));
        Ok(())
    }

    // ── Upvalue ───────────────────────────────────────────────────────────

    pub(crate) fn upvalue_slot(&self, r: ObjRef) -> usize {
        match *self.heap.upvalue(r) {
            ObjUpvalue::Open(slot) => slot,
            ObjUpvalue::Closed(_) => unreachable!("closed upvalue in the open list"),
        }
    }

    /// Reuses the upvalue already open on `slot` if there is one, else
    /// allocates a new one, keeping the list sorted by decreasing slot.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            let s = self.upvalue_slot(self.open_upvalues[i]);
            if s == slot {
                return self.open_upvalues[i];
            }
            if s < slot {
                break;
            }
            i += 1;
        }
        let uv = self.alloc(Obj::Upvalue(ObjUpvalue::Open(slot)));
        self.open_upvalues.insert(i, uv);
        uv
    }

    /// Closes every open upvalue whose slot is >= `last`, copying its
    /// value to the heap. Slots >= last form a prefix of the list.
    pub(crate) fn close_upvalues(&mut self, last: usize) {
        let mut k = 0;
        while k < self.open_upvalues.len() {
            let r = self.open_upvalues[k];
            let slot = self.upvalue_slot(r);
            if slot < last {
                break;
            }
            let v = self.stack[slot];
            *self.heap.upvalue_mut(r) = ObjUpvalue::Closed(v);
            k += 1;
        }
        self.open_upvalues.drain(..k);
    }

    // ── Allocation and GC ─────────────────────────────────────────────────

    /// The single allocation point: checks the watermark (or, with the
    /// gc-stress feature, always collects) before inserting the new
    /// object. Callers must have made every value they want to preserve
    /// reachable from the roots.
    pub(crate) fn alloc(&mut self, obj: Obj) -> ObjRef {
        if cfg!(feature = "gc-stress")
            || self.heap.bytes_allocated() + obj.size() > self.heap.next_gc()
        {
            self.collect_garbage();
        }
        self.heap.insert(obj)
    }

    pub(crate) fn collect_garbage(&mut self) -> usize {
        let roots = RootSet {
            stack: &self.stack,
            frames: &self.frames,
            globals: &self.globals,
            open_upvalues: &self.open_upvalues,
            compiler_fns: &self.compiler_fns,
            init_symbol: self.init_string,
        };
        self.heap.collect(&roots, &mut self.strings)
    }

    /// Returns the canonical string for these bytes, allocating it when
    /// no live string has the same content.
    pub(crate) fn intern(&mut self, s: &str) -> ObjRef {
        let hash = crate::object::hash_string(s);
        if let Some(r) = self.strings.find_string(s, hash, &self.heap) {
            return r;
        }
        let r = self.alloc(Obj::String(ObjString { chars: s.into(), hash }));
        self.strings.put(r, hash, Value::NIL);
        r
    }

    // ── Natives ───────────────────────────────────────────────────────────

    /// Name and function stay on the stack across the allocations.
    pub(crate) fn define_native(&mut self, name: &str, arity: u8, function: NativeFn) {
        let name_ref = self.intern(name);
        self.push(Value::object(name_ref));
        let native = self.alloc(Obj::Native(ObjNative { name: name_ref, arity, function }));
        self.push(Value::object(native));
        let hash = self.heap.string(name_ref).hash;
        let value = self.peek(0);
        self.globals.put(name_ref, hash, value);
        self.stack.pop();
        self.stack.pop();
    }

    pub(crate) fn uptime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub(crate) fn write_line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text)
    }

    // ── Runtime errors ────────────────────────────────────────────────────

    /// Builds the error with one trace line per active frame (innermost
    /// first) and puts the VM back into a clean state.
    fn runtime_error(&mut self, message: &str) -> VmError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = self.heap.function(frame.fn_ref);
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            let name = match function.name {
                Some(n) => format!("{}()", self.heap.string(n).chars),
                None => "script".to_string(),
            };
            trace.push(format!("[Line {}] in {}", line, name));
        }
        self.reset();
        VmError::Runtime { message: message.to_string(), trace }
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
