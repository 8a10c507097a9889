//! Command-line runner for Soil binaries.
//!
//! `soil <binary-file> [<program args>...]` loads the image, runs it, and
//! exits with the status passed to the `exit` syscall. Uncaught panics
//! print a stack trace and register dump to stderr and exit nonzero.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use soil_vm::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "soil", version, about = "Run a Soil binary")]
struct Args {
    /// The Soil binary to run.
    binary: PathBuf,

    /// Arguments exposed to the program through the `argc`/`arg` syscalls.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    program_args: Vec<String>,

    /// Execution backend. Defaults to the JIT where a lowering exists for
    /// the host, the interpreter otherwise.
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Log every executed instruction (interpreter backend only).
    #[arg(long)]
    trace_exec: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Backend {
    /// Translate the whole program to machine code up front.
    Jit,
    /// Portable fetch/decode/execute loop.
    Interpreter,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(all(target_arch = "x86_64", unix)) {
            Backend::Jit
        } else {
            Backend::Interpreter
        }
    }
}

fn main() {
    let args = Args::parse();

    let filter = if args.trace_exec {
        EnvFilter::new("soil_vm=trace")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let raw = match fs::read(&args.binary) {
        Ok(raw) => raw,
        Err(error) => {
            eprintln!("soil: cannot read {}: {error}", args.binary.display());
            process::exit(1);
        }
    };

    let params = VmParams::default();
    let image = match Image::parse(&raw, params.mem_size) {
        Ok(image) => image,
        Err(error) => {
            eprintln!("soil: cannot load {}: {error}", args.binary.display());
            process::exit(1);
        }
    };

    debug!(
        name = image.name().unwrap_or("<unnamed>"),
        bytecode_len = image.bytecode().len(),
        labels = image.labels().len(),
        "loaded image",
    );

    let mut vm = Vm::new(image, params);

    let mut program_args = vec![args.binary.display().to_string()];
    program_args.extend(args.program_args.iter().cloned());
    vm.set_args(program_args);

    let state = match args.backend.unwrap_or_default() {
        #[cfg(all(target_arch = "x86_64", unix))]
        Backend::Jit => match soil_vm::jit::run_program(&mut vm) {
            Ok(state) => state,
            Err(error) => {
                eprintln!("soil: cannot translate {}: {error}", args.binary.display());
                process::exit(1);
            }
        },
        #[cfg(not(all(target_arch = "x86_64", unix)))]
        Backend::Jit => {
            eprintln!("soil: no jit lowering for this host, using the interpreter");
            run_interpreted(&mut vm)
        }
        Backend::Interpreter => run_interpreted(&mut vm),
    };

    process::exit(state.exit_code());
}

fn run_interpreted(vm: &mut Vm) -> ProgramState {
    match vm.run() {
        Ok(state) => state,
        Err(VmError::Panic {
            reason, trace, ..
        }) => {
            eprintln!("vm panicked: {reason}");
            eprint!("{trace}");
            if let Err(error) = vm.write_crash_dump() {
                debug!(%error, "failed to write crash dump");
            }
            process::exit(101);
        }
        Err(error) => {
            eprintln!("soil: {error}");
            process::exit(101);
        }
    }
}
