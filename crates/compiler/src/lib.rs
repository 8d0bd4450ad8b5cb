//! Zym Compiler: lexer, AST, recursive-descent parser, module loader, and
//! the register-allocating code generator that lowers source text into a
//! `zym_core::Chunk`.
//!
//! # Modules
//!
//! - `lexer`: byte-scanning tokenizer with a line map hook for original-file
//!   line reporting (spec §4.1).
//! - `ast`: expression/statement node definitions the parser builds and the
//!   code generator consumes.
//! - `parser`: recursive-descent, precedence-climbing parser.
//! - `loader`: the recursive module/import resolver (spec §4.2).
//! - `config`: `CompilerConfig` / `ModuleLoaderConfig`, the knobs an embedder
//!   sets (TCO mode, debug names, register budget).
//! - `codegen`: the single-pass register-allocating compiler (spec §4.3).
//! - `disasm`: thin re-export of `zym_core::Chunk::disassemble` for the CLI.
//! - `interp`: a minimal reference bytecode interpreter (spec §C.3). Not a
//!   production VM dispatch loop (out of scope per spec §1) — just enough
//!   to make `zymc run` and the end-to-end tests in `tests/` observe actual
//!   program output.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod disasm;
pub mod interp;
pub mod lexer;
pub mod loader;
pub mod parser;

pub use codegen::{compile_program, CodeGenError, CompileOutput};
pub use config::{CompilerConfig, ModuleLoaderConfig, TcoMode};
pub use disasm::disassemble_recursive;
pub use interp::{InterpretError, Interpreter};
pub use lexer::{Lexer, Token, TokenKind};
pub use loader::{load_module, LoadResult, ModuleReadResult};
pub use parser::{ParseError, Parser};
