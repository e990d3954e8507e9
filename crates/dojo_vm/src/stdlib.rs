use crate::value::Value;
use crate::vm::Vm;

/// Registers the native functions among the VM globals.
pub fn register_globals(vm: &mut Vm) {
    vm.define_native("clock", 0, dojo_clock);
    vm.define_native("print", 1, dojo_print);
}

/// `clock() -> number` — seconds elapsed since the VM was created.
fn dojo_clock(vm: &mut Vm, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::number(vm.uptime_seconds()))
}

/// `print(v) -> nil` — stringify to stdout with a trailing newline.
fn dojo_print(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    let text = vm.heap.format_value(args[0]);
    vm.write_line(&text).map_err(|e| e.to_string())?;
    Ok(Value::NIL)
}
