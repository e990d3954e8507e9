use std::env;
use std::fs;
use std::process;

use dojo_vm::{Vm, VmError};

// sysexits-style exit codes: 64 usage, 65 compile error, 70 runtime
// error, 74 unreadable file.
const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;
const EX_IOERR: i32 = 74;

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("Usage: dojo [path]");
            process::exit(EX_USAGE);
        }
    }
}

fn run_file(path: &str) {
    if !path.ends_with(".dojo") {
        eprintln!("Usage: dojo [path] (expected a .dojo file)");
        process::exit(EX_USAGE);
    }
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Could not open file \"{}\": {}", path, e);
            process::exit(EX_IOERR);
        }
    };

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(_) => {}
        Err(e @ VmError::Compile(_)) => {
            eprintln!("{}", e);
            process::exit(EX_DATAERR);
        }
        Err(e @ VmError::Runtime { .. }) => {
            eprintln!("{}", e);
            process::exit(EX_SOFTWARE);
        }
    }
}

fn repl() {
    use std::io::{self, BufRead, Write};
    // one VM for the whole session: globals survive across lines
    let mut vm = Vm::new();
    loop {
        print!("> ");
        io::stdout().flush().unwrap();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                if let Err(e) = vm.interpret(&line) {
                    eprintln!("{}", e);
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }
}
