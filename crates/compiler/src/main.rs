//! Zym compiler CLI (`zymc`).
//!
//! A convenience binary outside the engine's own API surface (spec §6:
//! "CLI / environment: not part of the core"). Grounded on the teacher's
//! `crates/compiler/src/main.rs` `clap`-derive subcommand split
//! (`Build`/`Lint`/`Completions`/...); this binary keeps the subset that
//! maps onto what this workspace actually implements: compiling a `.zym`
//! file (with its `import`s resolved) to a serialized bytecode container,
//! disassembling either a source file or a compiled one, and running a
//! program end to end through the reference interpreter.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};

use zym_compiler::codegen::compile_program;
use zym_compiler::config::{CompilerConfig, ModuleLoaderConfig, TcoMode};
use zym_compiler::disasm::disassemble_recursive;
use zym_compiler::interp::Interpreter;
use zym_compiler::loader::load_module;
use zym_compiler::parser::Parser;
use zym_core::heap::Heap;
use zym_core::serialize;
use zym_core::value::Value;

#[derive(ClapParser)]
#[command(name = "zymc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Zym compiler - compile and run .zym scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .zym file (and its imports) to a bytecode container.
    Build {
        /// Entry .zym source file
        input: PathBuf,

        /// Output bytecode path (defaults to the input path with a .zymc extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep human-readable names in the constant pool for disassembly
        #[arg(long, default_value_t = true)]
        debug_names: bool,

        /// Tail-call optimization mode: off, safe, smart, aggressive
        #[arg(long, default_value = "safe")]
        tco: String,
    },

    /// Run a .zym file end to end through the reference interpreter.
    Run {
        /// Entry .zym source file
        input: PathBuf,

        /// Tail-call optimization mode: off, safe, smart, aggressive
        #[arg(long, default_value = "safe")]
        tco: String,
    },

    /// Disassemble a .zym source file or a previously compiled .zymc container.
    Disasm {
        /// A .zym source file (recompiled for disassembly) or a .zymc bytecode file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, debug_names, tco } => {
            let output = output.unwrap_or_else(|| input.with_extension("zymc"));
            run_build(&input, &output, debug_names, &tco);
        }
        Commands::Run { input, tco } => run_run(&input, &tco),
        Commands::Disasm { input } => run_disasm(&input),
        Commands::Completions { shell } => run_completions(shell),
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "zymc", &mut io::stdout());
}

fn parse_tco_mode(text: &str) -> TcoMode {
    match text {
        "off" => TcoMode::Off,
        "safe" => TcoMode::Safe,
        "smart" => TcoMode::Smart,
        "aggressive" => TcoMode::Aggressive,
        other => {
            eprintln!("Error: unknown --tco mode '{}' (expected off, safe, smart, aggressive)", other);
            process::exit(1);
        }
    }
}

/// Load `input`'s imports, parse, and compile into a `Heap`-backed
/// `CompileOutput`. Shared by `build`, `run`, and `disasm`.
fn load_and_compile(input: &Path, debug_names: bool, tco: TcoMode, heap: &Heap) -> zym_compiler::codegen::CompileOutput {
    let loader_config = ModuleLoaderConfig {
        debug_names,
        ..ModuleLoaderConfig::default()
    };
    let load_result = load_module(input, &loader_config).unwrap_or_else(|e| {
        eprintln!("Error loading {}: {}", input.display(), e);
        process::exit(1);
    });

    let program = Parser::with_line_map(&load_result.combined_source, &load_result.line_map)
        .parse_program()
        .unwrap_or_else(|e| {
            eprintln!("Parse error in {}: {}", load_result.entry_path.display(), e);
            process::exit(1);
        });

    let config = CompilerConfig { tco_mode: tco, debug_names, ..CompilerConfig::default() };
    compile_program(&program, heap, &config).unwrap_or_else(|e| {
        eprintln!("Compile error in {}: {}", load_result.entry_path.display(), e);
        process::exit(1);
    })
}

fn run_build(input: &Path, output: &Path, debug_names: bool, tco: &str) {
    let heap = Heap::new();
    let out = load_and_compile(input, debug_names, parse_tco_mode(tco), &heap);

    let entry_name = input.file_name().and_then(|n| n.to_str());
    let bytes = match serialize::serialize(&out.chunk, entry_name) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error serializing {}: {}", input.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = fs::write(output, &bytes) {
        eprintln!("Error writing {}: {}", output.display(), e);
        process::exit(1);
    }

    println!("Compiled {} -> {}", input.display(), output.display());
}

fn run_disasm(input: &Path) {
    let is_bytecode = input.extension().and_then(|e| e.to_str()) == Some("zymc");
    // `chunk`'s constants may hold `ObjRef`s pointing into `heap`, so `heap`
    // must outlive the disassembly below; declare it once in this
    // function's scope rather than inside either branch.
    let heap = Heap::new();

    let (chunk, name) = if is_bytecode {
        let bytes = fs::read(input).unwrap_or_else(|e| {
            eprintln!("Error reading {}: {}", input.display(), e);
            process::exit(1);
        });
        let (entry_name, decoded) = serialize::deserialize(&bytes).unwrap_or_else(|e| {
            eprintln!("Error deserializing {}: {}", input.display(), e);
            process::exit(1);
        });
        let chunk = decoded.into_chunk(&heap);
        (chunk, entry_name.unwrap_or_else(|| input.display().to_string()))
    } else {
        let out = load_and_compile(input, true, TcoMode::Safe, &heap);
        (out.chunk, input.display().to_string())
    };

    println!("{}", disassemble_recursive(&chunk, &name));
}

fn run_run(input: &Path, tco: &str) {
    let heap = Heap::new();
    let out = load_and_compile(input, true, parse_tco_mode(tco), &heap);

    let mut interp = Interpreter::new(&heap);
    register_prelude(&mut interp);

    if let Err(e) = interp.run(&out.chunk) {
        eprintln!("Runtime error: {}", e);
        process::exit(1);
    }
}

/// The minimal native surface an embedder of spec §6's registration
/// contract would wire up for a standalone `zymc run`: `print`, and
/// `typeof` is already a compiler-level unary operator (`Expr::TypeOf`),
/// not a native, so it needs no registration here.
fn register_prelude(interp: &mut Interpreter<'_>) {
    let globals = interp.globals_handle();
    interp.register_native_closure(
        "print",
        1,
        Box::new(move |args: &[Value]| {
            let lookup = |key: &str| globals.borrow().get(key).copied();
            println!("{}", args[0].display(&lookup));
            Ok(Value::Null)
        }),
    );
}
