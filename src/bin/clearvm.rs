// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal launcher: read a compiled module off disk and run it.
//!
//! One positional argument, the module path stem. `.clr.b` is appended.
//! `stdout` carries the `Running:` banner, any `print` output, and a
//! `||`-prefixed diagnostic on failure; `tracing` output goes to `stderr`
//! so a debug build's trace never interleaves with the former.

use std::io::Write;
use std::process::ExitCode;
use std::{env, fs, io};

use clearvm::Vm;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(stem) = env::args().nth(1) else {
        println!("|| usage: clearvm <module>");
        return ExitCode::FAILURE;
    };

    match run(&stem) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            println!("|| {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(stem: &str) -> Result<(), String> {
    let path = format!("{stem}.clr.b");
    println!("Running: {path}");

    let bytes = fs::read(&path).map_err(|e| format!("{path}: {e}"))?;

    #[cfg(feature = "debug-file")]
    tracing::info!(path = %path, bytes = bytes.len(), "loaded module");

    let mut vm = Vm::new();
    vm.execute_code(&bytes).map_err(|e| e.to_string())?;

    io::stdout()
        .write_all(vm.output())
        .map_err(|e| e.to_string())?;

    #[cfg(feature = "debug-mem")]
    {
        let stats = vm.heap_stats();
        println!("|| heap: {} objects, {} bytes", stats.objects, stats.bytes);
    }

    Ok(())
}
