// Apolo: a small scripting language on a stack-based bytecode VM.
//
// Copyright (C) 2026  The Apolo Developers
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

use std::env::args;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process::exit;

use apolo::vm::{InterpretResult, StdConsole, Vm};

// One VM for the whole session, so definitions carry from line to
// line. Compile and runtime errors are already reported; the REPL
// just moves on to the next line.
fn repl() {
    let mut vm = Vm::new(StdConsole);
    println!("Apolo Lang v2.0");
    println!("Type 'exit' to close.");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("apolo > ");
        let _ = io::stdout().flush();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => {
                println!();
                break;
            }
        };
        let line = line.trim_end();
        if line == "exit" || line == "sair" {
            break;
        }
        vm.interpret(line);
    }
}

fn run_file(path: &str) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {}.", path, err);
            exit(74);
        }
    };

    let mut vm = Vm::new(StdConsole);
    match vm.interpret(&source) {
        InterpretResult::Ok => {}
        InterpretResult::CompileError => exit(65),
        InterpretResult::RuntimeError => exit(70),
    }
}

fn main() {
    let args: Vec<String> = args().collect();
    match args.len() {
        1 => repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("Usage: apolo [path]");
            exit(64);
        }
    }
}
