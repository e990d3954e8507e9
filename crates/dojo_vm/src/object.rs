use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

/// 32-bit FNV-1a, the same hash the string table uses.
pub fn hash_string(s: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for b in s.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, String>;

// ── Heap variants ─────────────────────────────────────────────────────────

/// Immutable, interned string: two live ObjStrings with the same bytes
/// are always the same object.
#[derive(Debug)]
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

/// Function prototype produced by the compiler. Immutable once
/// compilation is done.
#[derive(Debug)]
pub struct ObjFn {
    pub name: Option<ObjRef>,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
}

/// Function + captured upvalues. Closures made from the same
/// declaration share the ObjFn.
#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// Open while the captured stack slot is live, closed (with a copy of
/// the value) when that slot is about to be popped.
#[derive(Debug)]
pub enum ObjUpvalue {
    Open(usize),
    Closed(Value),
}

pub struct ObjNative {
    pub name: ObjRef,
    pub arity: u8,
    pub function: NativeFn,
}

#[derive(Debug)]
pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
}

#[derive(Debug)]
pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

pub enum Obj {
    String(ObjString),
    Function(ObjFn),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Native(ObjNative),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

impl Obj {
    /// Estimate of the bytes held, used for the GC watermark.
    pub fn size(&self) -> usize {
        let base = std::mem::size_of::<Obj>();
        base + match self {
            Obj::String(s) => s.chars.len(),
            Obj::Function(f) => {
                f.chunk.code.len()
                    + f.chunk.lines.len() * std::mem::size_of::<u32>()
                    + f.chunk.constants.len() * std::mem::size_of::<Value>()
            }
            Obj::Closure(c) => c.upvalues.len() * std::mem::size_of::<ObjRef>(),
            Obj::Class(c) => c.methods.capacity_bytes(),
            Obj::Instance(i) => i.fields.capacity_bytes(),
            Obj::Upvalue(_) | Obj::Native(_) | Obj::BoundMethod(_) => 0,
        }
    }
}
