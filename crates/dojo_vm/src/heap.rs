use crate::object::{Obj, ObjString, ObjUpvalue};
use crate::table::Table;
use crate::value::{ObjRef, Value};
use crate::vm::CallFrame;

/// First GC threshold; after every collection it becomes `bytes * 2`.
const INITIAL_GC_THRESHOLD: usize = 1024 * 1024;

// ── Root set ──────────────────────────────────────────────────────────────

/// Everything a live object must be reachable from at collection time.
/// The string table is NOT a root: its dead entries are evicted by
/// `remove_white` before the sweep.
pub struct RootSet<'a> {
    pub stack: &'a [Value],
    pub frames: &'a [CallFrame],
    pub globals: &'a Table,
    pub open_upvalues: &'a [ObjRef],
    /// The in-progress ObjFns of the active compiler chain.
    pub compiler_fns: &'a [ObjRef],
    pub init_symbol: Option<ObjRef>,
}

// ── Heap ──────────────────────────────────────────────────────────────────

/// Object arena with a free list. ObjRefs are slot indices; a slot freed
/// by the sweep is reused by the next allocation.
pub struct Heap {
    slots: Vec<Option<Obj>>,
    marks: Vec<bool>,
    free: Vec<u32>,
    gray: Vec<ObjRef>,
    bytes_allocated: usize,
    next_gc: usize,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            marks: Vec::new(),
            free: Vec::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_GC_THRESHOLD,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    pub fn insert(&mut self, obj: Obj) -> ObjRef {
        self.bytes_allocated += obj.size();
        match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(obj);
                self.marks[i as usize] = false;
                ObjRef(i)
            }
            None => {
                self.slots.push(Some(obj));
                self.marks.push(false);
                ObjRef((self.slots.len() - 1) as u32)
            }
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn obj(&self, r: ObjRef) -> &Obj {
        match &self.slots[r.0 as usize] {
            Some(o) => o,
            None => unreachable!("reference to a freed slot"),
        }
    }

    fn obj_mut(&mut self, r: ObjRef) -> &mut Obj {
        match &mut self.slots[r.0 as usize] {
            Some(o) => o,
            None => unreachable!("reference to a freed slot"),
        }
    }

    pub fn string(&self, r: ObjRef) -> &ObjString {
        match self.obj(r) {
            Obj::String(s) => s,
            _ => unreachable!("object is not a string"),
        }
    }

    pub fn function(&self, r: ObjRef) -> &crate::object::ObjFn {
        match self.obj(r) {
            Obj::Function(f) => f,
            _ => unreachable!("object is not a function"),
        }
    }

    pub fn function_mut(&mut self, r: ObjRef) -> &mut crate::object::ObjFn {
        match self.obj_mut(r) {
            Obj::Function(f) => f,
            _ => unreachable!("object is not a function"),
        }
    }

    pub fn closure(&self, r: ObjRef) -> &crate::object::ObjClosure {
        match self.obj(r) {
            Obj::Closure(c) => c,
            _ => unreachable!("object is not a closure"),
        }
    }

    pub fn closure_mut(&mut self, r: ObjRef) -> &mut crate::object::ObjClosure {
        match self.obj_mut(r) {
            Obj::Closure(c) => c,
            _ => unreachable!("object is not a closure"),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> &ObjUpvalue {
        match self.obj(r) {
            Obj::Upvalue(u) => u,
            _ => unreachable!("object is not an upvalue"),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut ObjUpvalue {
        match self.obj_mut(r) {
            Obj::Upvalue(u) => u,
            _ => unreachable!("object is not an upvalue"),
        }
    }

    pub fn class(&self, r: ObjRef) -> &crate::object::ObjClass {
        match self.obj(r) {
            Obj::Class(c) => c,
            _ => unreachable!("object is not a class"),
        }
    }

    pub fn class_mut(&mut self, r: ObjRef) -> &mut crate::object::ObjClass {
        match self.obj_mut(r) {
            Obj::Class(c) => c,
            _ => unreachable!("object is not a class"),
        }
    }

    pub fn instance(&self, r: ObjRef) -> &crate::object::ObjInstance {
        match self.obj(r) {
            Obj::Instance(i) => i,
            _ => unreachable!("object is not an instance"),
        }
    }

    pub fn instance_mut(&mut self, r: ObjRef) -> &mut crate::object::ObjInstance {
        match self.obj_mut(r) {
            Obj::Instance(i) => i,
            _ => unreachable!("object is not an instance"),
        }
    }

    // ── Value printing ────────────────────────────────────────────────────

    /// Text of a value: numbers via Display's shortest round-trip form,
    /// objects via a descriptor.
    pub fn format_value(&self, v: Value) -> String {
        if v.is_number() {
            return format!("{}", v.as_number());
        }
        if v.is_nil() {
            return "nil".to_string();
        }
        if v.is_bool() {
            return if v.as_bool() { "true" } else { "false" }.to_string();
        }
        match self.obj(v.as_object()) {
            Obj::String(s) => s.chars.to_string(),
            Obj::Function(f) => match f.name {
                Some(n) => format!("<fn {}>", self.string(n).chars),
                None => "<script>".to_string(),
            },
            Obj::Closure(c) => self.format_value(Value::object(c.function)),
            Obj::BoundMethod(b) => self.format_value(Value::object(b.method)),
            Obj::Upvalue(_) => "<upvalue>".to_string(),
            Obj::Native(_) => "<native fn>".to_string(),
            Obj::Class(c) => format!("<class {}>", self.string(c.name).chars),
            Obj::Instance(i) => {
                format!("<{} instance>", self.string(self.class(i.class).name).chars)
            }
        }
    }

    // ── Garbage collection ────────────────────────────────────────────────

    /// Full mark-sweep. Returns the number of objects freed.
    pub fn collect(&mut self, roots: &RootSet, strings: &mut Table) -> usize {
        self.gray.clear();

        // mark the roots
        for &v in roots.stack {
            mark_value(v, &mut self.marks, &mut self.gray);
        }
        for frame in roots.frames {
            mark(frame.closure, &mut self.marks, &mut self.gray);
        }
        mark_table(roots.globals, &mut self.marks, &mut self.gray);
        for &uv in roots.open_upvalues {
            mark(uv, &mut self.marks, &mut self.gray);
        }
        for &f in roots.compiler_fns {
            mark(f, &mut self.marks, &mut self.gray);
        }
        if let Some(init) = roots.init_symbol {
            mark(init, &mut self.marks, &mut self.gray);
        }

        // trace
        while let Some(r) = self.gray.pop() {
            self.blacken(r);
        }

        // the string table holds its keys weakly
        strings.remove_white(&self.marks);

        self.sweep()
    }

    fn blacken(&mut self, r: ObjRef) {
        let Heap { slots, marks, gray, .. } = self;
        let obj = match &slots[r.0 as usize] {
            Some(o) => o,
            None => unreachable!("gray object already freed"),
        };
        match obj {
            Obj::String(_) => {}
            Obj::Native(n) => mark(n.name, marks, gray),
            Obj::Upvalue(ObjUpvalue::Open(_)) => {}
            Obj::Upvalue(ObjUpvalue::Closed(v)) => mark_value(*v, marks, gray),
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    mark(name, marks, gray);
                }
                for &c in &f.chunk.constants {
                    mark_value(c, marks, gray);
                }
            }
            Obj::Closure(c) => {
                mark(c.function, marks, gray);
                for &uv in &c.upvalues {
                    mark(uv, marks, gray);
                }
            }
            Obj::Class(c) => {
                mark(c.name, marks, gray);
                mark_table(&c.methods, marks, gray);
            }
            Obj::Instance(i) => {
                mark(i.class, marks, gray);
                mark_table(&i.fields, marks, gray);
            }
            Obj::BoundMethod(b) => {
                mark_value(b.receiver, marks, gray);
                mark(b.method, marks, gray);
            }
        }
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for i in 0..self.slots.len() {
            if self.slots[i].is_none() {
                continue;
            }
            if self.marks[i] {
                self.marks[i] = false;
            } else {
                let obj = self.slots[i].take();
                if let Some(obj) = obj {
                    self.bytes_allocated -= obj.size().min(self.bytes_allocated);
                }
                self.free.push(i as u32);
                freed += 1;
            }
        }
        self.next_gc = self.bytes_allocated * 2;
        freed
    }
}

fn mark(r: ObjRef, marks: &mut Vec<bool>, gray: &mut Vec<ObjRef>) {
    let i = r.0 as usize;
    if !marks[i] {
        marks[i] = true;
        gray.push(r);
    }
}

fn mark_value(v: Value, marks: &mut Vec<bool>, gray: &mut Vec<ObjRef>) {
    if v.is_object() {
        mark(v.as_object(), marks, gray);
    }
}

fn mark_table(t: &Table, marks: &mut Vec<bool>, gray: &mut Vec<ObjRef>) {
    for (key, _, value) in t.iter() {
        mark(key, marks, gray);
        mark_value(value, marks, gray);
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
