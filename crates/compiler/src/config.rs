//! Embedder-facing configuration: the knobs that vary between a one-shot
//! `zymc build` invocation and a host embedding the compiler directly
//! (grounded on the teacher's `CompilerConfig`/`ExternalBuiltin` builder
//! structs in `crates/compiler/src/config.rs` — same "small struct with
//! `Default` plus `with_*` builder methods" shape, no external
//! config-parsing crate since the teacher also hand-rolls this rather than
//! pulling in `config`/`figment`).

use std::path::PathBuf;

/// Tail-call optimization aggressiveness (spec §4.3.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TcoMode {
    /// No tail-call rewriting; every call is a normal `CALL`.
    Off,
    /// Only self-recursive tail calls in direct tail position are rewritten
    /// to `TAIL_CALL_SELF`/`SMART_TAIL_CALL_SELF`.
    #[default]
    Safe,
    /// Self- and non-self tail calls in tail position are rewritten,
    /// including through `if`/`switch` branches that all end in a tail
    /// call.
    Smart,
    /// Smart's rewriting plus tail calls across a `CLOSE_FRAME_UPVALUES`
    /// boundary (may change observable upvalue-closing order relative to
    /// Smart mode; see DESIGN.md).
    Aggressive,
}

/// Compiler-wide knobs threaded through `compile_program`.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub tco_mode: TcoMode,
    /// Emit `OP_Nop`-preceding debug markers and keep human-readable names
    /// in the constant pool for disassembly (spec §7: debug vs. release
    /// builds).
    pub debug_names: bool,
    /// Write a `.dis` disassembly listing alongside the compiled chunk.
    pub write_debug_output: bool,
    pub debug_output_path: Option<PathBuf>,
    /// Maximum live registers a single function may allocate before
    /// `CodeGenError::RegisterBudgetExceeded` (spec §4.3.2: must fit in the
    /// 8-bit `a`/`b`/`c` instruction fields).
    pub max_registers: u16,
    /// Maximum local variable slots (distinct from registers: locals share
    /// the register file but the compiler additionally bounds declared
    /// names per scope to catch runaway generated code early).
    pub max_locals: u16,
}

impl Default for CompilerConfig {
    fn default() -> CompilerConfig {
        CompilerConfig {
            tco_mode: TcoMode::default(),
            debug_names: true,
            write_debug_output: false,
            debug_output_path: None,
            max_registers: 255,
            max_locals: 200,
        }
    }
}

impl CompilerConfig {
    pub fn with_tco_mode(mut self, mode: TcoMode) -> CompilerConfig {
        self.tco_mode = mode;
        self
    }

    pub fn with_debug_names(mut self, debug_names: bool) -> CompilerConfig {
        self.debug_names = debug_names;
        self
    }

    pub fn with_debug_output(mut self, path: PathBuf) -> CompilerConfig {
        self.write_debug_output = true;
        self.debug_output_path = Some(path);
        self
    }
}

/// Knobs for [`crate::loader::load_module`].
pub struct ModuleLoaderConfig {
    /// Kept for parity with `CompilerConfig::debug_names`: whether the
    /// loader should preserve original file paths in generated factory
    /// names (`__module_<encoded_path>`) rather than hashing them
    /// (`_<hex_hash>`).
    pub debug_names: bool,
    /// How the loader turns an import path into source text. Defaults to
    /// reading from the filesystem relative to the importing file; callers
    /// embedding Zym over a virtual filesystem substitute their own.
    pub read: Box<dyn Fn(&std::path::Path) -> std::io::Result<String>>,
}

impl Default for ModuleLoaderConfig {
    fn default() -> ModuleLoaderConfig {
        ModuleLoaderConfig {
            debug_names: true,
            read: Box::new(|path| std::fs::read_to_string(path)),
        }
    }
}

impl std::fmt::Debug for ModuleLoaderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoaderConfig")
            .field("debug_names", &self.debug_names)
            .field("read", &"<fn>")
            .finish()
    }
}
