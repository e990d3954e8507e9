pub mod chunk;
pub mod compiler;
pub mod error;
pub mod heap;
pub mod object;
pub mod opcode;
pub mod stdlib;
pub mod table;
pub mod value;
pub mod vm;

pub use error::{VmError, VmResult};
pub use value::Value;
pub use vm::Vm;

/// Compiles and runs Dojo source on a fresh VM.
pub fn interpret(source: &str) -> VmResult {
    let mut vm = Vm::new();
    vm.interpret(source)
}

// ── Test ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{hash_string, Obj};
    use crate::opcode::Op;
    use crate::value::ObjRef;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    /// Shareable sink that captures `print` output in tests.
    #[derive(Clone, Default)]
    struct Sink(Rc<RefCell<Vec<u8>>>);

    impl io::Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run_capture(src: &str) -> (VmResult, String) {
        let sink = Sink::default();
        let mut vm = Vm::with_output(Box::new(sink.clone()));
        let result = vm.interpret(src);
        let out = String::from_utf8(sink.0.borrow().clone()).unwrap();
        (result, out)
    }

    fn run_ok(src: &str) -> String {
        let (result, out) = run_capture(src);
        if let Err(e) = result {
            panic!("VmError: {}", e);
        }
        out
    }

    fn run_err(src: &str) -> VmError {
        match run_capture(src).0 {
            Err(e) => e,
            Ok(v) => panic!("Expected error, got {:?}", v),
        }
    }

    fn compile_script(vm: &mut Vm, src: &str) -> ObjRef {
        let (program, lex_errors, parse_errors) = dojo_parser::parse(src);
        assert!(lex_errors.is_empty(), "{:?}", lex_errors);
        assert!(parse_errors.is_empty(), "{:?}", parse_errors);
        match compiler::compile(&program, vm) {
            Ok(f) => f,
            Err(e) => panic!("Compile error: {}", e),
        }
    }

    /// The (opcode, offset) instructions of a chunk, to inspect codegen.
    fn instructions(vm: &Vm, fn_ref: ObjRef) -> Vec<(Op, usize)> {
        let chunk = &vm.heap.function(fn_ref).chunk;
        let mut out = Vec::new();
        let mut i = 0;
        while i < chunk.code.len() {
            let op = Op::from_u8(chunk.code[i]).unwrap();
            out.push((op, i));
            i += chunk.instruction_len(i, &vm.heap);
        }
        out
    }

    /// The first nested ObjFn among a function's constants.
    fn nested_fn(vm: &Vm, fn_ref: ObjRef) -> ObjRef {
        vm.heap
            .function(fn_ref)
            .chunk
            .constants
            .iter()
            .find_map(|c| {
                if c.is_object() {
                    if let Obj::Function(_) = vm.heap.obj(c.as_object()) {
                        return Some(c.as_object());
                    }
                }
                None
            })
            .unwrap()
    }

    // ── Expressions and statements ────────────────────────────────────────
    #[test] fn t_print_number()   { assert_eq!(run_ok("print(42.5)"), "42.5\n"); }
    #[test] fn t_print_int_like() { assert_eq!(run_ok("print(2 + 3)"), "5\n"); }
    #[test] fn t_print_string()   { assert_eq!(run_ok(r#"print("hello")"#), "hello\n"); }
    #[test] fn t_print_nil()      { assert_eq!(run_ok("print(nil)"), "nil\n"); }
    #[test] fn t_print_bool()     { assert_eq!(run_ok("print(1 < 2)"), "true\n"); }
    #[test] fn t_arithmetic()     { assert_eq!(run_ok("print((1 + 2) * 3 - 4 / 2)"), "7\n"); }
    #[test] fn t_left_assoc()     { assert_eq!(run_ok("print(10 - 3 - 2)"), "5\n"); }
    #[test] fn t_negate()         { assert_eq!(run_ok("print(-(3 * 4))"), "-12\n"); }
    #[test] fn t_not()            { assert_eq!(run_ok("print(!nil)"), "true\n"); }
    #[test] fn t_zero_is_falsey() { assert_eq!(run_ok("print(!0)"), "true\n"); }
    #[test] fn t_infinity()       { assert_eq!(run_ok("print(1/0)"), "inf\n"); }
    #[test] fn t_string_concat()  { assert_eq!(run_ok(r#"print("foo" + "bar")"#), "foobar\n"); }
    #[test] fn t_equality()       { assert_eq!(run_ok(r#"print("a" == "a")"#), "true\n"); }
    #[test] fn t_not_equal()      { assert_eq!(run_ok("print(1 != 2)"), "true\n"); }
    #[test] fn t_nil_vs_false()   { assert_eq!(run_ok("print(nil == false)"), "false\n"); }
    #[test] fn t_ternary()        { assert_eq!(run_ok("print(1 < 2 ? 10 : 20)"), "10\n"); }
    #[test] fn t_and_short_circuit() { assert_eq!(run_ok("print(false && x)"), "false\n"); }
    #[test] fn t_or_short_circuit()  { assert_eq!(run_ok("print(1 || x)"), "1\n"); }

    // ── Variables and scope ───────────────────────────────────────────────
    #[test] fn t_global_var()   { assert_eq!(run_ok("var x = 42\nprint(x)"), "42\n"); }
    #[test] fn t_global_assign(){ assert_eq!(run_ok("var x = 1; x = 2; print(x)"), "2\n"); }
    #[test] fn t_var_default_nil() { assert_eq!(run_ok("var x\nprint(x)"), "nil\n"); }
    #[test] fn t_assign_is_expr()  { assert_eq!(run_ok("var x; var y = x = 3; print(y)"), "3\n"); }
    #[test] fn t_block_locals() {
        assert_eq!(run_ok("{ var a = 1; var b = 2; print(a + b) } print(9)"), "3\n9\n");
    }
    #[test] fn t_shadowing() {
        assert_eq!(run_ok("var x = 1; { var x = 2; print(x) } print(x)"), "2\n1\n");
    }

    // ── Control flow ──────────────────────────────────────────────────────
    #[test] fn t_if_true()  { assert_eq!(run_ok("if (1 < 2) print(1); else print(2)"), "1\n"); }
    #[test] fn t_if_false() { assert_eq!(run_ok("if (1 > 2) print(1); else print(2)"), "2\n"); }
    #[test] fn t_while() {
        assert_eq!(run_ok("var i = 0; var s = 0; while (i < 5) { s = s + i; i = i + 1 } print(s)"), "10\n");
    }
    #[test] fn t_for() {
        assert_eq!(run_ok("var s = 0; for (var i = 0; i < 5; i = i + 1) s = s + i; print(s)"), "10\n");
    }
    #[test] fn t_for_continue() {
        let src = "var s = 0; for (var i = 0; i < 6; i = i + 1) { if (i == 2) continue; s = s + i } print(s)";
        assert_eq!(run_ok(src), "13\n");
    }
    #[test] fn t_while_break() {
        let src = "var i = 0; while (true) { if (i == 3) break; i = i + 1 } print(i)";
        assert_eq!(run_ok(src), "3\n");
    }
    #[test] fn t_nested_loop_break() {
        let src = "var n = 0\nfor (var i = 0; i < 3; i = i + 1) {\n  for (var j = 0; j < 3; j = j + 1) {\n    if (j == 1) break\n    n = n + 1\n  }\n}\nprint(n)";
        assert_eq!(run_ok(src), "3\n");
    }

    // ── Functions and closures ────────────────────────────────────────────
    #[test] fn t_fn_call() {
        assert_eq!(run_ok("fn add(a, b) { return a + b } print(add(3, 4))"), "7\n");
    }
    #[test] fn t_fn_implicit_nil() {
        assert_eq!(run_ok("fn f() { } print(f())"), "nil\n");
    }
    #[test] fn t_fn_to_string() {
        assert_eq!(run_ok("fn f() { } print(f)"), "<fn f>\n");
    }
    #[test] fn t_local_fn_recursion() {
        let src = "fn outer() { fn fact(n) { if (n < 2) return 1; return n * fact(n - 1) } return fact(5) } print(outer())";
        assert_eq!(run_ok(src), "120\n");
    }
    #[test] fn t_shared_upvalue() {
        let src = "fn outer() { var x = 1; fn set(v) { x = v } fn get() { return x } set(42); return get } print(outer()())";
        assert_eq!(run_ok(src), "42\n");
    }
    #[test] fn t_closed_upvalue_from_block() {
        let src = "var g; { var x = 10; fn get() { return x } g = get } print(g())";
        assert_eq!(run_ok(src), "10\n");
    }
    #[test] fn t_native_clock() {
        assert_eq!(run_ok("print(clock() >= 0)"), "true\n");
    }
    #[test] fn t_transitive_upvalue() {
        let src = "fn a() { var x = 1; fn b() { fn c() { return x } return c } return b()() } print(a())";
        assert_eq!(run_ok(src), "1\n");
    }

    // ── Classes ───────────────────────────────────────────────────────────
    #[test] fn t_class_init_and_fields() {
        let src = "class Point { init(x, y) { this.x = x; this.y = y } sum() { return this.x + this.y } } var p = Point(1, 2); print(p.sum())";
        assert_eq!(run_ok(src), "3\n");
    }
    #[test] fn t_class_to_string() {
        assert_eq!(run_ok("class A { } print(A)"), "<class A>\n");
    }
    #[test] fn t_instance_to_string() {
        assert_eq!(run_ok("class A { } print(A())"), "<A instance>\n");
    }
    #[test] fn t_field_assignment_result() {
        assert_eq!(run_ok("class A { } var a = A(); print(a.v = 7)"), "7\n");
    }
    #[test] fn t_bound_method() {
        let src = "class A { m() { return this.v } } var a = A(); a.v = 42; var f = a.m; print(f())";
        assert_eq!(run_ok(src), "42\n");
    }
    #[test] fn t_method_this_through_closure() {
        let src = "class A { m() { fn inner() { return this.v } return inner() } } var a = A(); a.v = 5; print(a.m())";
        assert_eq!(run_ok(src), "5\n");
    }
    #[test] fn t_field_shadows_method() {
        let src = "class A { m() { return 1 } } fn two() { return 2 } var a = A(); a.m = two; print(a.m())";
        assert_eq!(run_ok(src), "2\n");
    }
    #[test] fn t_inherited_method() {
        let src = "class A { greet() { return \"hi\" } } class B extends A { } print(B().greet())";
        assert_eq!(run_ok(src), "hi\n");
    }

    // ── Template strings ──────────────────────────────────────────────────
    #[test] fn t_template_plain() {
        assert_eq!(run_ok("print(`just text`)"), "just text\n");
    }
    #[test] fn t_template_number_span() {
        assert_eq!(run_ok("print(`n=${1 + 2}!`)"), "n=3!\n");
    }
    #[test] fn t_template_nested() {
        assert_eq!(run_ok("print(`a${`b${1}`}c`)"), "ab1c\n");
    }

    // ── End-to-end scenarios ──────────────────────────────────────────────
    #[test]
    fn t_scenario_closure_counter() {
        let src = "fn makeCounter() { var i = 0; fn inc() { i = i + 1; return i } return inc } var c = makeCounter(); print(c()); print(c()); print(c())";
        assert_eq!(run_ok(src), "1\n2\n3\n");
    }

    #[test]
    fn t_scenario_fibonacci() {
        let src = "fn fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2) } print(fib(10))";
        assert_eq!(run_ok(src), "55\n");
    }

    #[test]
    fn t_scenario_break_from_loop() {
        let src = "var s = 0; for (var i = 0; i < 10; i = i + 1) { if (i == 5) break; s = s + i } print(s)";
        assert_eq!(run_ok(src), "10\n");
    }

    #[test]
    fn t_scenario_inheritance_super() {
        let src = "class A { greet() { return \"A\" } } class B extends A { greet() { return super.greet() + \"B\" } } print(B().greet())";
        assert_eq!(run_ok(src), "AB\n");
    }

    #[test]
    fn t_scenario_template() {
        let src = "var name = \"world\"; print(`hello ${name}, sum=${1+2}`)";
        assert_eq!(run_ok(src), "hello world, sum=3\n");
    }

    #[test]
    fn t_scenario_undefined_variable() {
        match run_err("print(x)") {
            VmError::Runtime { message, trace } => {
                assert!(message.contains("Undefined Variable 'x'"), "{}", message);
                assert!(trace.iter().any(|l| l.contains("in script")), "{:?}", trace);
            }
            other => panic!("{:?}", other),
        }
    }

    // ── Closure independence ──────────────────────────────────────────────
    #[test]
    fn t_closure_independence() {
        let src = "fn makeCounter() { var i = 0; fn inc() { i = i + 1; return i } return inc } var a = makeCounter(); var b = makeCounter(); print(a()); print(a()); print(b())";
        assert_eq!(run_ok(src), "1\n2\n1\n");
    }

    // ── Codegen properties ────────────────────────────────────────────────
    #[test]
    fn t_local_slots_follow_declaration_order() {
        let mut vm = Vm::new();
        let script = compile_script(&mut vm, "fn f(a, b) { return b }");
        let f = nested_fn(&vm, script);
        // slot 0 reserved, a=1, b=2: `return b` reads slot 2
        let chunk = &vm.heap.function(f).chunk;
        let get_local = instructions(&vm, f)
            .into_iter()
            .find(|(op, _)| *op == Op::GetLocal)
            .unwrap();
        assert_eq!(chunk.code[get_local.1 + 1], 2);
    }

    #[test]
    fn t_upvalue_dedup() {
        let mut vm = Vm::new();
        let script =
            compile_script(&mut vm, "fn outer() { var x = 1; fn inner() { return x + x } }");
        let outer = nested_fn(&vm, script);
        let inner = nested_fn(&vm, outer);
        assert_eq!(vm.heap.function(inner).upvalue_count, 1);
    }

    #[test]
    fn t_no_unpatched_break_sentinels() {
        let mut vm = Vm::new();
        let src = "var s = 0; for (var i = 0; i < 10; i = i + 1) { if (i == 5) break; s = s + i } while (s > 0) { s = s - 1; if (s == 2) break }";
        let script = compile_script(&mut vm, src);
        let chunk = &vm.heap.function(script).chunk;
        for (op, offset) in instructions(&vm, script) {
            if op == Op::Jump {
                assert!(
                    chunk.code[offset + 1] != 0xff || chunk.code[offset + 2] != 0xff,
                    "unpatched jump at {}",
                    offset
                );
            }
        }
    }

    // ── Garbage collector ─────────────────────────────────────────────────
    #[test]
    fn t_gc_second_pass_frees_nothing() {
        let mut vm = Vm::new();
        run_in(&mut vm, "var keep = \"alive\"; print(`garbage ${1} here`)");
        vm.collect_garbage();
        assert_eq!(vm.collect_garbage(), 0);
    }

    #[test]
    fn t_gc_preserves_reachable_values() {
        let (result, out) = {
            let sink = Sink::default();
            let mut vm = Vm::with_output(Box::new(sink.clone()));
            let r = vm.interpret("var x = \"keep me\"");
            vm.collect_garbage();
            let r2 = vm.interpret("print(x)");
            let out = String::from_utf8(sink.0.borrow().clone()).unwrap();
            (r.and(r2), out)
        };
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(out, "keep me\n");
    }

    #[test]
    fn t_intern_table_eviction() {
        let mut vm = Vm::new();
        let r = vm.intern("no_root_holds_this");
        let hash = vm.heap.string(r).hash;
        assert!(vm.strings.find_string("no_root_holds_this", hash, &vm.heap).is_some());
        vm.collect_garbage();
        assert!(vm.strings.find_string("no_root_holds_this", hash, &vm.heap).is_none());
    }

    #[test]
    fn t_interning_pointer_equality() {
        let mut vm = Vm::new();
        let a = vm.intern("same string");
        let b = vm.intern("same string");
        assert_eq!(a, b);
        let c = vm.intern("another");
        assert_ne!(a, c);
    }

    #[test]
    fn t_interning_across_literals() {
        // two equal literals in the source share the object: == is true
        assert_eq!(run_ok(r#"print("dup" == "dup")"#), "true\n");
    }

    #[test]
    fn t_open_upvalues_sorted_descending() {
        let mut vm = Vm::new();
        vm.push(Value::number(1.0));
        vm.push(Value::number(2.0));
        vm.push(Value::number(3.0));
        let u2 = vm.capture_upvalue(2);
        let u0 = vm.capture_upvalue(0);
        let u1 = vm.capture_upvalue(1);
        let slots: Vec<usize> =
            vm.open_upvalues.iter().map(|&r| vm.upvalue_slot(r)).collect();
        assert_eq!(slots, vec![2, 1, 0]);
        // capturing the same slot reuses the upvalue
        assert_eq!(vm.capture_upvalue(1), u1);
        assert_ne!(u0, u2);
        vm.close_upvalues(1);
        let slots: Vec<usize> =
            vm.open_upvalues.iter().map(|&r| vm.upvalue_slot(r)).collect();
        assert_eq!(slots, vec![0]);
    }

    fn run_in(vm: &mut Vm, src: &str) {
        if let Err(e) = vm.interpret(src) {
            panic!("VmError: {}", e);
        }
    }

    // ── Compile errors ────────────────────────────────────────────────────
    #[test]
    fn t_self_referential_initializer() {
        let e = run_err("{ var x = x }");
        assert!(e.to_string().contains("own initializer"), "{}", e);
    }
    #[test]
    fn t_duplicate_local() {
        let e = run_err("{ var a = 1; var a = 2 }");
        assert!(e.to_string().contains("Already a variable"), "{}", e);
    }
    #[test]
    fn t_shadowing_in_deeper_scope_is_fine() {
        assert_eq!(run_ok("{ var a = 1; { var a = 2; print(a) } }"), "2\n");
    }
    #[test]
    fn t_break_outside_loop() {
        let e = run_err("break");
        assert!(e.to_string().contains("'break' outside"), "{}", e);
    }
    #[test]
    fn t_continue_outside_loop() {
        let e = run_err("continue");
        assert!(e.to_string().contains("'continue' outside"), "{}", e);
    }
    #[test]
    fn t_return_at_top_level() {
        let e = run_err("return 1");
        assert!(e.to_string().contains("top-level"), "{}", e);
    }
    #[test]
    fn t_return_value_from_init() {
        let e = run_err("class A { init() { return 1 } }");
        assert!(e.to_string().contains("initializer"), "{}", e);
    }
    #[test]
    fn t_this_outside_class() {
        let e = run_err("print(this)");
        assert!(e.to_string().contains("'this' outside"), "{}", e);
    }
    #[test]
    fn t_super_without_superclass() {
        let e = run_err("class A { m() { return super.m() } }");
        assert!(e.to_string().contains("no superclass"), "{}", e);
    }
    #[test]
    fn t_class_inherit_itself() {
        let e = run_err("class A extends A { }");
        assert!(e.to_string().contains("inherit from itself"), "{}", e);
    }
    #[test]
    fn t_compile_errors_are_aggregated() {
        let e = run_err("break\ncontinue");
        match e {
            VmError::Compile(msgs) => assert_eq!(msgs.len(), 2, "{:?}", msgs),
            other => panic!("{:?}", other),
        }
    }
    #[test]
    fn t_compile_error_format() {
        let e = run_err("{ var a = 1; var a = 2 }");
        assert!(e.to_string().starts_with("[line 1] Error at 'a':"), "{}", e);
    }

    // ── Runtime errors ────────────────────────────────────────────────────
    #[test]
    fn t_stack_overflow() {
        match run_err("fn inf() { return inf() } inf()") {
            VmError::Runtime { message, .. } => assert!(message.contains("Stack overflow"), "{}", message),
            other => panic!("{:?}", other),
        }
    }
    #[test]
    fn t_runtime_trace_names_functions() {
        match run_err("fn boom() { return 1 + nil } boom()") {
            VmError::Runtime { message, trace } => {
                assert!(message.contains("Operands must be"), "{}", message);
                assert!(trace[0].contains("in boom()"), "{:?}", trace);
                assert!(trace[1].contains("in script"), "{:?}", trace);
            }
            other => panic!("{:?}", other),
        }
    }
    #[test]
    fn t_call_non_callable() {
        match run_err("var x = 1; x()") {
            VmError::Runtime { message, .. } => {
                assert!(message.contains("Can only call"), "{}", message);
            }
            other => panic!("{:?}", other),
        }
    }
    #[test]
    fn t_arity_mismatch() {
        match run_err("fn f(a) { } f(1, 2)") {
            VmError::Runtime { message, .. } => {
                assert!(message.contains("Expected 1 arguments but got 2"), "{}", message);
            }
            other => panic!("{:?}", other),
        }
    }
    #[test]
    fn t_class_without_init_rejects_args() {
        match run_err("class A { } A(1)") {
            VmError::Runtime { message, .. } => {
                assert!(message.contains("Expected 0 arguments but got 1"), "{}", message);
            }
            other => panic!("{:?}", other),
        }
    }
    #[test]
    fn t_undefined_property() {
        match run_err("class A { } A().missing") {
            VmError::Runtime { message, .. } => {
                assert!(message.contains("Undefined property 'missing'"), "{}", message);
            }
            other => panic!("{:?}", other),
        }
    }
    #[test]
    fn t_property_on_non_instance() {
        match run_err("var x = 1; x.field") {
            VmError::Runtime { message, .. } => {
                assert!(message.contains("Only instances have properties"), "{}", message);
            }
            other => panic!("{:?}", other),
        }
    }
    #[test]
    fn t_superclass_must_be_class() {
        match run_err("var NotAClass = 1; class B extends NotAClass { }") {
            VmError::Runtime { message, .. } => {
                assert!(message.contains("Superclass must be a class"), "{}", message);
            }
            other => panic!("{:?}", other),
        }
    }
    #[test]
    fn t_add_mixed_types_fails() {
        match run_err(r#"print("a" + 1)"#) {
            VmError::Runtime { message, .. } => {
                assert!(message.contains("two numbers or two strings"), "{}", message);
            }
            other => panic!("{:?}", other),
        }
    }

    // ── REPL: globals survive from one interpret to the next ──────────────
    #[test]
    fn t_vm_reuse_keeps_globals() {
        let sink = Sink::default();
        let mut vm = Vm::with_output(Box::new(sink.clone()));
        run_in(&mut vm, "var x = 40");
        run_in(&mut vm, "x = x + 2");
        run_in(&mut vm, "print(x)");
        assert_eq!(String::from_utf8(sink.0.borrow().clone()).unwrap(), "42\n");
    }
    #[test]
    fn t_vm_recovers_after_runtime_error() {
        let sink = Sink::default();
        let mut vm = Vm::with_output(Box::new(sink.clone()));
        assert!(vm.interpret("print(missing)").is_err());
        run_in(&mut vm, "print(7)");
        assert_eq!(String::from_utf8(sink.0.borrow().clone()).unwrap(), "7\n");
    }

    #[test]
    fn t_hash_is_fnv1a() {
        assert_eq!(hash_string("x"), {
            let mut h: u32 = 2166136261;
            h ^= b'x' as u32;
            h.wrapping_mul(16777619)
        });
    }
}
