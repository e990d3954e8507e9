use crate::heap::Heap;
use crate::opcode::Op;
use crate::value::Value;

/// Placeholder written by `emit_jump` and recognized by the break
/// patcher: it is never a legal distance after a successful patch.
pub const JUMP_PLACEHOLDER: u8 = 0xff;

/// Bytecode and data of a single compilation unit (a function or the
/// top-level script).
#[derive(Debug, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    /// Source line for each byte of `code` (1:1).
    pub lines: Vec<u32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Emit ──────────────────────────────────────────────────────────────

    pub fn emit(&mut self, op: Op, line: u32) -> usize {
        self.write_byte(op as u8, line)
    }

    pub fn write_byte(&mut self, byte: u8, line: u32) -> usize {
        let offset = self.code.len();
        self.code.push(byte);
        self.lines.push(line);
        offset
    }

    pub fn write_u16(&mut self, v: u16, line: u32) {
        self.write_byte((v & 0xff) as u8, line);
        self.write_byte((v >> 8) as u8, line);
    }

    /// Emits a jump with a placeholder offset; returns the offset of the
    /// first operand byte, to be handed to `patch_jump`.
    pub fn emit_jump(&mut self, op: Op, line: u32) -> usize {
        self.emit(op, line);
        let patch = self.code.len();
        self.write_byte(JUMP_PLACEHOLDER, line);
        self.write_byte(JUMP_PLACEHOLDER, line);
        patch
    }

    /// Writes into the placeholder the distance from the byte after the
    /// operand to the current end of code. false if it exceeds 16 bits.
    pub fn patch_jump(&mut self, patch: usize) -> bool {
        let delta = self.code.len() - patch - 2;
        if delta > u16::MAX as usize {
            return false;
        }
        self.code[patch] = (delta & 0xff) as u8;
        self.code[patch + 1] = (delta >> 8) as u8;
        true
    }

    /// Backward jump to `loop_start`. false if it exceeds 16 bits.
    pub fn emit_loop(&mut self, loop_start: usize, line: u32) -> bool {
        self.emit(Op::Loop, line);
        let delta = self.code.len() + 2 - loop_start;
        if delta > u16::MAX as usize {
            self.write_u16(0, line);
            return false;
        }
        self.write_u16(delta as u16, line);
        true
    }

    // ── Constant pool ─────────────────────────────────────────────────────

    /// None once the pool exceeds 256 entries (the operand is one byte).
    pub fn add_constant(&mut self, v: Value) -> Option<u8> {
        if self.constants.len() >= 256 {
            return None;
        }
        self.constants.push(v);
        Some((self.constants.len() - 1) as u8)
    }

    // ── Reading ───────────────────────────────────────────────────────────

    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        self.code[offset] as u16 | ((self.code[offset + 1] as u16) << 8)
    }

    /// Full length of the instruction at `offset`, operands included.
    /// Closure is variable-length: the heap is needed to read how many
    /// upvalues the referenced function captures.
    pub fn instruction_len(&self, offset: usize, heap: &Heap) -> usize {
        let op = match Op::from_u8(self.code[offset]) {
            Some(op) => op,
            None => return 1,
        };
        if op == Op::Closure {
            let fn_const = self.code[offset + 1] as usize;
            let fn_ref = self.constants[fn_const].as_object();
            return 2 + 2 * heap.function(fn_ref).upvalue_count;
        }
        1 + op.operand_bytes()
    }

    // ── Debug ─────────────────────────────────────────────────────────────

    pub fn disassemble(&self, name: &str, heap: &Heap) -> String {
        let mut out = format!("=== {} ===\n", name);
        let mut i = 0;
        while i < self.code.len() {
            out.push_str(&self.disassemble_instruction(i, heap));
            i += self.instruction_len(i, heap);
        }
        out
    }

    fn disassemble_instruction(&self, i: usize, heap: &Heap) -> String {
        let byte = self.code[i];
        let op = match Op::from_u8(byte) {
            Some(op) => op,
            None => return format!("{:04}  {:4}  ??? ({})\n", i, self.line_at(i), byte),
        };
        let mut out = format!("{:04}  {:4}  {:14}", i, self.line_at(i), format!("{:?}", op));

        match op {
            Op::Constant => {
                let idx = self.code[i + 1];
                out.push_str(&format!(
                    "  #{} {}",
                    idx,
                    heap.format_value(self.constants[idx as usize])
                ));
            }
            Op::GetGlobal
            | Op::SetGlobal
            | Op::DefineGlobal
            | Op::GetProperty
            | Op::SetProperty
            | Op::GetSuper
            | Op::Class
            | Op::Method => {
                let idx = self.code[i + 1];
                out.push_str(&format!(
                    "  #{} {}",
                    idx,
                    heap.format_value(self.constants[idx as usize])
                ));
            }
            Op::GetLocal | Op::SetLocal | Op::GetUpvalue | Op::SetUpvalue | Op::Call
            | Op::Popn | Op::Template => {
                out.push_str(&format!("  {}", self.code[i + 1]));
            }
            Op::Jump | Op::JumpIfTrue | Op::JumpIfFalse => {
                let delta = self.read_u16(i + 1);
                out.push_str(&format!("  +{} → {}", delta, i + 3 + delta as usize));
            }
            Op::Loop => {
                let delta = self.read_u16(i + 1);
                out.push_str(&format!("  -{} → {}", delta, i + 3 - delta as usize));
            }
            Op::Invoke | Op::SuperInvoke => {
                let idx = self.code[i + 1];
                let argc = self.code[i + 2];
                out.push_str(&format!(
                    "  #{} {} ({} args)",
                    idx,
                    heap.format_value(self.constants[idx as usize]),
                    argc
                ));
            }
            Op::Closure => {
                let idx = self.code[i + 1];
                let fn_ref = self.constants[idx as usize].as_object();
                out.push_str(&format!("  #{} {}", idx, heap.format_value(self.constants[idx as usize])));
                let count = heap.function(fn_ref).upvalue_count;
                for u in 0..count {
                    let is_local = self.code[i + 2 + u * 2] != 0;
                    let index = self.code[i + 3 + u * 2];
                    out.push_str(&format!(
                        "\n{:17}| {} {}",
                        "",
                        if is_local { "local" } else { "upvalue" },
                        index
                    ));
                }
            }
            _ => {}
        }
        out.push('\n');
        out
    }
}
