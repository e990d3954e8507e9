use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use dojo_parser::ast::*;

use crate::chunk::{Chunk, JUMP_PLACEHOLDER};
use crate::error::VmError;
use crate::object::{Obj, ObjFn};
use crate::opcode::Op;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_ARITY: usize = 255;

/// Depth sentinel for a local that is declared but not yet initialized:
/// catches `var x = x`.
const UNINITIALIZED: i32 = -1;

// ── Compile-time state ────────────────────────────────────────────────────

/// Local variable: its index in the vector is its slot in the frame.
#[derive(Debug)]
struct Local {
    name: String,
    depth: i32,
    is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueDef {
    index: u8,
    is_local: bool,
}

/// Innermost loop: where `continue` jumps to, and down to which scope
/// depth locals get discarded.
#[derive(Debug, Clone, Copy)]
struct LoopState {
    start: usize,
    scope_depth: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FnKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// Per-function state. The chain of nested compilers is the stack in
/// `Compiler::states`; the ObjFn under construction is registered in
/// `Vm::compiler_fns` as a GC root.
struct FnState {
    fn_ref: ObjRef,
    kind: FnKind,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDef>,
    scope_depth: i32,
    loop_state: Option<LoopState>,
    /// Name → constant-pool index cache, so repeated identifiers do not
    /// duplicate constants.
    names: IndexMap<String, u8, FxBuildHasher>,
}

struct ClassState {
    has_superclass: bool,
}

pub struct Compiler<'a> {
    vm: &'a mut Vm,
    states: Vec<FnState>,
    classes: Vec<ClassState>,
    errors: Vec<String>,
}

/// Compiles the program into the script ObjFn. Errors accumulate across
/// the whole pass; if there is at least one, no function is returned.
pub fn compile(program: &Program, vm: &mut Vm) -> Result<ObjRef, VmError> {
    let mut c = Compiler { vm, states: Vec::new(), classes: Vec::new(), errors: Vec::new() };
    c.begin_fn(None, FnKind::Script);

    for stmt in &program.stmts {
        c.stmt(stmt);
    }

    let last_line = program.stmts.last().map(|s| s.span.line as u32).unwrap_or(0);
    let (fn_ref, _) = c.end_fn(last_line);
    c.vm.compiler_fns.clear();

    if c.errors.is_empty() {
        Ok(fn_ref)
    } else {
        Err(VmError::Compile(c.errors))
    }
}

impl<'a> Compiler<'a> {
    // ── Function chain management ─────────────────────────────────────────

    fn begin_fn(&mut self, name: Option<&str>, kind: FnKind) {
        let name_ref = name.map(|n| self.vm.intern(n));
        // the name stays rooted on the stack while the ObjFn allocates
        if let Some(r) = name_ref {
            self.vm.push(Value::object(r));
        }
        let fn_ref = self.vm.alloc(Obj::Function(ObjFn {
            name: name_ref,
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
        }));
        if name_ref.is_some() {
            self.vm.stack.pop();
        }
        self.vm.compiler_fns.push(fn_ref);

        // slot 0 is reserved: the callee, or `this` in methods
        let slot0 = match kind {
            FnKind::Method | FnKind::Initializer => "this",
            _ => "",
        };
        self.states.push(FnState {
            fn_ref,
            kind,
            locals: vec![Local { name: slot0.to_string(), depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loop_state: None,
            names: IndexMap::default(),
        });
    }

    /// Closes the current function. The caller removes the ObjFn from
    /// `compiler_fns` only after making it reachable elsewhere.
    fn end_fn(&mut self, line: u32) -> (ObjRef, Vec<UpvalueDef>) {
        self.emit_return(line);
        let state = self.states.pop().unwrap();
        self.vm.heap.function_mut(state.fn_ref).upvalue_count = state.upvalues.len();
        (state.fn_ref, state.upvalues)
    }

    fn emit_return(&mut self, line: u32) {
        if self.states.last().unwrap().kind == FnKind::Initializer {
            // an initializer returns the instance, not nil
            self.emit(Op::GetLocal, line);
            self.emit_byte(0, line);
        } else {
            self.emit(Op::Nil, line);
        }
        self.emit(Op::Return, line);
    }

    // ── Emitting ──────────────────────────────────────────────────────────

    fn chunk_mut(&mut self) -> &mut Chunk {
        let fn_ref = self.states.last().unwrap().fn_ref;
        &mut self.vm.heap.function_mut(fn_ref).chunk
    }

    fn code_len(&self) -> usize {
        let fn_ref = self.states.last().unwrap().fn_ref;
        self.vm.heap.function(fn_ref).chunk.code.len()
    }

    fn emit(&mut self, op: Op, line: u32) {
        self.chunk_mut().emit(op, line);
    }

    fn emit_byte(&mut self, byte: u8, line: u32) {
        self.chunk_mut().write_byte(byte, line);
    }

    fn emit_jump(&mut self, op: Op, line: u32) -> usize {
        self.chunk_mut().emit_jump(op, line)
    }

    fn patch_jump(&mut self, patch: usize, line: u32) {
        if !self.chunk_mut().patch_jump(patch) {
            self.error(line, None, "Too much code to jump over.");
        }
    }

    fn emit_loop(&mut self, start: usize, line: u32) {
        if !self.chunk_mut().emit_loop(start, line) {
            self.error(line, None, "Loop body too large.");
        }
    }

    fn make_constant(&mut self, v: Value, line: u32) -> u8 {
        match self.chunk_mut().add_constant(v) {
            Some(idx) => idx,
            None => {
                self.error(line, None, "Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, v: Value, line: u32) {
        let idx = self.make_constant(v, line);
        self.emit(Op::Constant, line);
        self.emit_byte(idx, line);
    }

    /// Constant for a name, deduplicated per function: repeated uses of
    /// the same identifier share one pool index.
    fn identifier_constant(&mut self, name: &str, line: u32) -> u8 {
        if let Some(&idx) = self.states.last().unwrap().names.get(name) {
            return idx;
        }
        let r = self.vm.intern(name);
        let idx = self.make_constant(Value::object(r), line);
        self.states.last_mut().unwrap().names.insert(name.to_string(), idx);
        idx
    }

    fn error(&mut self, line: u32, lexeme: Option<&str>, message: &str) {
        let rendered = match lexeme {
            Some(l) => format!("[line {}] Error at '{}': {}", line, l, message),
            None => format!("[line {}] Error: {}", line, message),
        };
        self.errors.push(rendered);
    }

    // ── Scopes and variables ──────────────────────────────────────────────

    fn begin_scope(&mut self) {
        self.states.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self, line: u32) {
        let flags: Vec<bool> = {
            let state = self.states.last_mut().unwrap();
            state.scope_depth -= 1;
            let mut flags = Vec::new();
            while let Some(l) = state.locals.last() {
                if l.depth <= state.scope_depth {
                    break;
                }
                flags.push(l.is_captured);
                state.locals.pop();
            }
            flags
        };
        self.emit_pops(&flags, line);
    }

    /// Emits POP/POPN/CLOSE_UPVALUE for the locals in `flags` (top
    /// down), without touching compiler state.
    fn emit_pops(&mut self, flags: &[bool], line: u32) {
        let mut run = 0usize;
        for &captured in flags {
            if captured {
                self.flush_pops(run, line);
                run = 0;
                self.emit(Op::CloseUpvalue, line);
            } else {
                run += 1;
            }
        }
        self.flush_pops(run, line);
    }

    fn flush_pops(&mut self, run: usize, line: u32) {
        match run {
            0 => {}
            1 => self.emit(Op::Pop, line),
            n => {
                self.emit(Op::Popn, line);
                self.emit_byte(n as u8, line);
            }
        }
    }

    /// Like the tail of end_scope, but for break/continue: the locals
    /// stay declared for the rest of the loop body.
    fn discard_locals(&mut self, target_depth: i32, line: u32) {
        let flags: Vec<bool> = {
            let state = self.states.last().unwrap();
            state
                .locals
                .iter()
                .rev()
                .take_while(|l| l.depth > target_depth)
                .map(|l| l.is_captured)
                .collect()
        };
        self.emit_pops(&flags, line);
    }

    fn declare_variable(&mut self, name: &str, line: u32) {
        let state = self.states.last().unwrap();
        if state.scope_depth == 0 {
            return; // globals are late-bound
        }
        let mut duplicate = false;
        for local in state.locals.iter().rev() {
            if local.depth != UNINITIALIZED && local.depth < state.scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        let too_many = state.locals.len() >= MAX_LOCALS;
        if duplicate {
            self.error(line, Some(name), "Already a variable with this name in this scope.");
        }
        if too_many {
            self.error(line, Some(name), "Too many local variables in function.");
            return;
        }
        let depth = UNINITIALIZED;
        self.states.last_mut().unwrap().locals.push(Local {
            name: name.to_string(),
            depth,
            is_captured: false,
        });
    }

    fn mark_initialized(&mut self) {
        let state = self.states.last_mut().unwrap();
        if state.scope_depth == 0 {
            return;
        }
        if let Some(local) = state.locals.last_mut() {
            local.depth = state.scope_depth;
        }
    }

    fn define_variable(&mut self, name: &str, line: u32) {
        if self.states.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        let idx = self.identifier_constant(name, line);
        self.emit(Op::DefineGlobal, line);
        self.emit_byte(idx, line);
    }

    fn resolve_local(&mut self, state_idx: usize, name: &str, line: u32) -> Option<u8> {
        let mut uninitialized = false;
        let mut found = None;
        for (i, local) in self.states[state_idx].locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == UNINITIALIZED {
                    uninitialized = true;
                }
                found = Some(i as u8);
                break;
            }
        }
        if uninitialized {
            self.error(line, Some(name), "Cannot reference a local variable in its own initializer");
        }
        found
    }

    /// Walks up the chain: a local of the enclosing function becomes an
    /// is_local upvalue, an upvalue of that one a transitive upvalue.
    fn resolve_upvalue(&mut self, state_idx: usize, name: &str, line: u32) -> Option<u8> {
        if state_idx == 0 {
            return None;
        }
        if let Some(local_idx) = self.resolve_local(state_idx - 1, name, line) {
            self.states[state_idx - 1].locals[local_idx as usize].is_captured = true;
            return Some(self.add_upvalue(state_idx, local_idx, true, line));
        }
        if let Some(up_idx) = self.resolve_upvalue(state_idx - 1, name, line) {
            return Some(self.add_upvalue(state_idx, up_idx, false, line));
        }
        None
    }

    /// Deduplicates: an identical (index, is_local) pair is reused.
    fn add_upvalue(&mut self, state_idx: usize, index: u8, is_local: bool, line: u32) -> u8 {
        for (i, uv) in self.states[state_idx].upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return i as u8;
            }
        }
        if self.states[state_idx].upvalues.len() >= MAX_UPVALUES {
            self.error(line, None, "Too many closure variables in function.");
            return 0;
        }
        self.states[state_idx].upvalues.push(UpvalueDef { index, is_local });
        (self.states[state_idx].upvalues.len() - 1) as u8
    }

    /// Local first, then upvalue, then global by name.
    fn named_variable(&mut self, name: &str, line: u32, store: bool) {
        let current = self.states.len() - 1;
        if let Some(slot) = self.resolve_local(current, name, line) {
            self.emit(if store { Op::SetLocal } else { Op::GetLocal }, line);
            self.emit_byte(slot, line);
        } else if let Some(idx) = self.resolve_upvalue(current, name, line) {
            self.emit(if store { Op::SetUpvalue } else { Op::GetUpvalue }, line);
            self.emit_byte(idx, line);
        } else {
            let idx = self.identifier_constant(name, line);
            self.emit(if store { Op::SetGlobal } else { Op::GetGlobal }, line);
            self.emit_byte(idx, line);
        }
    }

    // ── Statement ─────────────────────────────────────────────────────────

    fn stmt(&mut self, stmt: &Stmt) {
        let line = stmt.span.line as u32;
        match &stmt.inner {
            StmtKind::Expr(e) => {
                self.expr(e);
                self.emit(Op::Pop, line);
            }
            StmtKind::Var { name, initializer } => {
                self.declare_variable(name, line);
                match initializer {
                    Some(e) => self.expr(e),
                    None => self.emit(Op::Nil, line),
                }
                self.define_variable(name, line);
            }
            StmtKind::Fn { name, params, body } => {
                self.declare_variable(name, line);
                // initialized right away: the function may refer to itself
                self.mark_initialized();
                self.function(name, params, body, FnKind::Function, line);
                self.define_variable(name, line);
            }
            StmtKind::Class { name, superclass, methods } => {
                self.class_declaration(name, superclass.as_deref(), methods, line);
            }
            StmtKind::Block(stmts) => {
                self.begin_scope();
                for s in stmts {
                    self.stmt(s);
                }
                self.end_scope(line);
            }
            StmtKind::If { condition, then_branch, else_branch } => {
                self.expr(condition);
                let else_jump = self.emit_jump(Op::JumpIfFalse, line);
                self.emit(Op::Pop, line);
                self.stmt(then_branch);
                let end_jump = self.emit_jump(Op::Jump, line);
                self.patch_jump(else_jump, line);
                self.emit(Op::Pop, line);
                if let Some(e) = else_branch {
                    self.stmt(e);
                }
                self.patch_jump(end_jump, line);
            }
            StmtKind::While { condition, body } => {
                self.while_stmt(condition, body, line);
            }
            StmtKind::For { init, condition, increment, body } => {
                self.for_stmt(init.as_deref(), condition.as_ref(), increment.as_ref(), body, line);
            }
            StmtKind::Return(value) => {
                if self.states.last().unwrap().kind == FnKind::Script {
                    self.error(line, None, "Cannot return from top-level code.");
                }
                match value {
                    Some(e) => {
                        if self.states.last().unwrap().kind == FnKind::Initializer {
                            self.error(line, None, "Cannot return a value from an initializer.");
                        }
                        self.expr(e);
                        self.emit(Op::Return, line);
                    }
                    None => self.emit_return(line),
                }
            }
            StmtKind::Break => {
                match self.states.last().unwrap().loop_state {
                    Some(ls) => {
                        self.discard_locals(ls.scope_depth, line);
                        // left with the 0xff 0xff placeholder: patch_breaks resolves it
                        self.emit_jump(Op::Jump, line);
                    }
                    None => self.error(line, None, "Cannot use 'break' outside of a loop."),
                }
            }
            StmtKind::Continue => {
                match self.states.last().unwrap().loop_state {
                    Some(ls) => {
                        self.discard_locals(ls.scope_depth, line);
                        self.emit_loop(ls.start, line);
                    }
                    None => self.error(line, None, "Cannot use 'continue' outside of a loop."),
                }
            }
        }
    }

    fn while_stmt(&mut self, condition: &Expr, body: &Stmt, line: u32) {
        let region = self.code_len();
        let loop_start = region;
        let scope_depth = self.states.last().unwrap().scope_depth;
        let enclosing = self
            .states
            .last_mut()
            .unwrap()
            .loop_state
            .replace(LoopState { start: loop_start, scope_depth });

        self.expr(condition);
        let exit_jump = self.emit_jump(Op::JumpIfFalse, line);
        self.emit(Op::Pop, line);
        self.stmt(body);
        self.emit_loop(loop_start, line);
        self.patch_jump(exit_jump, line);
        self.emit(Op::Pop, line);
        self.patch_breaks(region, line);

        self.states.last_mut().unwrap().loop_state = enclosing;
    }

    fn for_stmt(
        &mut self,
        init: Option<&Stmt>,
        condition: Option<&Expr>,
        increment: Option<&Expr>,
        body: &Stmt,
        line: u32,
    ) {
        self.begin_scope();
        if let Some(init) = init {
            self.stmt(init);
        }

        let region = self.code_len();
        let mut loop_start = self.code_len();

        let mut exit_jump = None;
        if let Some(cond) = condition {
            self.expr(cond);
            exit_jump = Some(self.emit_jump(Op::JumpIfFalse, line));
            self.emit(Op::Pop, line);
        }

        if let Some(inc) = increment {
            // the body runs before the increment in the flow but sits
            // after it in the bytecode: jump over it, and the body's
            // back-edge lands here
            let body_jump = self.emit_jump(Op::Jump, line);
            let increment_start = self.code_len();
            self.expr(inc);
            self.emit(Op::Pop, line);
            self.emit_loop(loop_start, line);
            loop_start = increment_start; // continue restarts at the increment
            self.patch_jump(body_jump, line);
        }

        let scope_depth = self.states.last().unwrap().scope_depth;
        let enclosing = self
            .states
            .last_mut()
            .unwrap()
            .loop_state
            .replace(LoopState { start: loop_start, scope_depth });

        self.stmt(body);
        self.emit_loop(loop_start, line);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit, line);
            self.emit(Op::Pop, line);
        }
        self.patch_breaks(region, line);

        self.states.last_mut().unwrap().loop_state = enclosing;
        self.end_scope(line);
    }

    /// Scans the bytecode of the just-compiled loop for Jumps followed
    /// by the 0xff 0xff placeholder (the breaks) and points them here.
    /// After a successful patch the placeholder is not a legal distance,
    /// so the scan cannot be fooled.
    fn patch_breaks(&mut self, from: usize, line: u32) {
        let fn_ref = self.states.last().unwrap().fn_ref;
        let offsets: Vec<usize> = {
            let chunk = &self.vm.heap.function(fn_ref).chunk;
            let mut found = Vec::new();
            let mut i = from;
            while i < chunk.code.len() {
                if Op::from_u8(chunk.code[i]) == Some(Op::Jump)
                    && chunk.code[i + 1] == JUMP_PLACEHOLDER
                    && chunk.code[i + 2] == JUMP_PLACEHOLDER
                {
                    found.push(i + 1);
                }
                i += chunk.instruction_len(i, &self.vm.heap);
            }
            found
        };
        for patch in offsets {
            self.patch_jump(patch, line);
        }
    }

    // ── Functions and classes ─────────────────────────────────────────────

    fn function(&mut self, name: &str, params: &[Param], body: &[Stmt], kind: FnKind, line: u32) {
        self.begin_fn(Some(name), kind);
        self.begin_scope();

        if params.len() > MAX_ARITY {
            self.error(line, Some(name), "Cannot have more than 255 parameters.");
        }
        let fn_ref = self.states.last().unwrap().fn_ref;
        self.vm.heap.function_mut(fn_ref).arity = params.len().min(MAX_ARITY) as u8;
        for p in params {
            self.declare_variable(&p.name, p.span.line as u32);
            self.mark_initialized();
        }

        for s in body {
            self.stmt(s);
        }

        // no end_scope: frame teardown discards every slot
        let (fn_ref, upvalues) = self.end_fn(line);
        let idx = self.make_constant(Value::object(fn_ref), line);
        self.emit(Op::Closure, line);
        self.emit_byte(idx, line);
        for uv in &upvalues {
            self.emit_byte(uv.is_local as u8, line);
            self.emit_byte(uv.index, line);
        }
        // the ObjFn is now reachable through the parent's constants
        self.vm.compiler_fns.pop();
    }

    fn class_declaration(
        &mut self,
        name: &str,
        superclass: Option<&str>,
        methods: &[Stmt],
        line: u32,
    ) {
        let name_idx = self.identifier_constant(name, line);
        self.declare_variable(name, line);
        self.emit(Op::Class, line);
        self.emit_byte(name_idx, line);
        self.define_variable(name, line);

        self.classes.push(ClassState { has_superclass: false });

        if let Some(sup) = superclass {
            if sup == name {
                self.error(line, Some(name), "A class cannot inherit from itself.");
            }
            // the superclass stays on the stack as the hidden `super`
            // local, capturable by methods like any other upvalue
            self.named_variable(sup, line, false);
            self.begin_scope();
            self.add_synthetic_local("super", line);
            self.named_variable(name, line, false);
            self.emit(Op::Inherit, line);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(name, line, false);
        for m in methods {
            if let StmtKind::Fn { name: mname, params, body } = &m.inner {
                let mline = m.span.line as u32;
                let midx = self.identifier_constant(mname, mline);
                let kind = if mname == "init" { FnKind::Initializer } else { FnKind::Method };
                self.function(mname, params, body, kind, mline);
                self.emit(Op::Method, mline);
                self.emit_byte(midx, mline);
            }
        }
        self.emit(Op::Pop, line);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope(line);
        }
        self.classes.pop();
    }

    /// An already-initialized local with no duplicate check: used for
    /// the hidden `super` slot.
    fn add_synthetic_local(&mut self, name: &str, line: u32) {
        if self.states.last().unwrap().locals.len() >= MAX_LOCALS {
            self.error(line, Some(name), "Too many local variables in function.");
            return;
        }
        let state = self.states.last_mut().unwrap();
        let depth = state.scope_depth;
        state.locals.push(Local { name: name.to_string(), depth, is_captured: false });
    }

    fn check_super_usage(&mut self, line: u32) {
        if self.classes.is_empty() {
            self.error(line, Some("super"), "Cannot use 'super' outside of a class.");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error(line, Some("super"), "Cannot use 'super' in a class with no superclass.");
        }
    }

    // ── Expressions ───────────────────────────────────────────────────────

    fn expr(&mut self, expr: &Expr) {
        let line = expr.span.line as u32;
        match &expr.inner {
            ExprKind::Number(n) => self.emit_constant(Value::number(*n), line),
            ExprKind::Str(s) => {
                let r = self.vm.intern(s);
                self.emit_constant(Value::object(r), line);
            }
            ExprKind::Template { head, spans } => self.template(head, spans, line),
            ExprKind::True => self.emit(Op::True, line),
            ExprKind::False => self.emit(Op::False, line),
            ExprKind::Nil => self.emit(Op::Nil, line),
            ExprKind::Var(name) => self.named_variable(name, line, false),
            ExprKind::This => {
                if self.classes.is_empty() {
                    self.error(line, Some("this"), "Cannot use 'this' outside of a class.");
                }
                self.named_variable("this", line, false);
            }
            ExprKind::Super { method } => {
                self.check_super_usage(line);
                let idx = self.identifier_constant(method, line);
                self.named_variable("this", line, false);
                self.named_variable("super", line, false);
                self.emit(Op::GetSuper, line);
                self.emit_byte(idx, line);
            }
            ExprKind::Assign { target, value } => match &target.inner {
                ExprKind::Var(name) => {
                    self.expr(value);
                    self.named_variable(name, line, true);
                }
                ExprKind::Property { object, name } => {
                    self.expr(object);
                    self.expr(value);
                    let idx = self.identifier_constant(name, line);
                    self.emit(Op::SetProperty, line);
                    self.emit_byte(idx, line);
                }
                _ => self.error(line, None, "Invalid assignment target."),
            },
            ExprKind::Binary { op: BinOp::And, lhs, rhs } => {
                self.expr(lhs);
                let end = self.emit_jump(Op::JumpIfFalse, line);
                self.emit(Op::Pop, line);
                self.expr(rhs);
                self.patch_jump(end, line);
            }
            ExprKind::Binary { op: BinOp::Or, lhs, rhs } => {
                self.expr(lhs);
                let end = self.emit_jump(Op::JumpIfTrue, line);
                self.emit(Op::Pop, line);
                self.expr(rhs);
                self.patch_jump(end, line);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.expr(lhs);
                self.expr(rhs);
                let instr = match op {
                    BinOp::Add => Op::Add,
                    BinOp::Sub => Op::Subtract,
                    BinOp::Mul => Op::Multiply,
                    BinOp::Div => Op::Divide,
                    BinOp::Eq => Op::Equal,
                    BinOp::Ne => Op::NotEqual,
                    BinOp::Lt => Op::Less,
                    BinOp::Le => Op::LessEqual,
                    BinOp::Gt => Op::Greater,
                    BinOp::Ge => Op::GreaterEqual,
                    BinOp::And | BinOp::Or => unreachable!(),
                };
                self.emit(instr, line);
            }
            ExprKind::Unary { op, operand } => {
                self.expr(operand);
                match op {
                    UnaryOp::Neg => self.emit(Op::Negate, line),
                    UnaryOp::Not => self.emit(Op::Not, line),
                }
            }
            ExprKind::Ternary { condition, then_branch, else_branch } => {
                self.expr(condition);
                let else_jump = self.emit_jump(Op::JumpIfFalse, line);
                self.emit(Op::Pop, line);
                self.expr(then_branch);
                let end_jump = self.emit_jump(Op::Jump, line);
                self.patch_jump(else_jump, line);
                self.emit(Op::Pop, line);
                self.expr(else_branch);
                self.patch_jump(end_jump, line);
            }
            ExprKind::Call { callee, args } => self.call(callee, args, line),
            ExprKind::Property { object, name } => {
                self.expr(object);
                let idx = self.identifier_constant(name, line);
                self.emit(Op::GetProperty, line);
                self.emit_byte(idx, line);
            }
            ExprKind::Error => {
                self.error(line, None, "Found an error node in the AST.");
            }
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], line: u32) {
        if args.len() > MAX_ARITY {
            self.error(line, None, "Cannot have more than 255 arguments.");
        }
        let argc = args.len().min(MAX_ARITY) as u8;
        match &callee.inner {
            // obj.method(args) fused into an Invoke
            ExprKind::Property { object, name } => {
                self.expr(object);
                for a in args {
                    self.expr(a);
                }
                let idx = self.identifier_constant(name, line);
                self.emit(Op::Invoke, line);
                self.emit_byte(idx, line);
                self.emit_byte(argc, line);
            }
            // super.method(args) fused into a SuperInvoke
            ExprKind::Super { method } => {
                self.check_super_usage(line);
                let idx = self.identifier_constant(method, line);
                self.named_variable("this", line, false);
                for a in args {
                    self.expr(a);
                }
                self.named_variable("super", line, false);
                self.emit(Op::SuperInvoke, line);
                self.emit_byte(idx, line);
                self.emit_byte(argc, line);
            }
            _ => {
                self.expr(callee);
                for a in args {
                    self.expr(a);
                }
                self.emit(Op::Call, line);
                self.emit_byte(argc, line);
            }
        }
    }

    /// head, then (expression, fragment) per span; TEMPLATE n pops
    /// 2n+1 values and concatenates them.
    fn template(&mut self, head: &str, spans: &[(Expr, String)], line: u32) {
        let head_ref = self.vm.intern(head);
        self.emit_constant(Value::object(head_ref), line);
        for (e, frag) in spans {
            self.expr(e);
            let frag_ref = self.vm.intern(frag);
            self.emit_constant(Value::object(frag_ref), line);
        }
        self.emit(Op::Template, line);
        self.emit_byte(spans.len() as u8, line);
    }
}
