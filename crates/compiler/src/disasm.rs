//! Thin re-export of [`zym_core::Chunk::disassemble`] for the `zymc disasm`
//! subcommand: this crate has no separate disassembly format of its own,
//! the chunk already knows how to print itself (spec §C.1).

use zym_core::Chunk;

/// Pretty-print `chunk` under `name`, recursing into every nested function
/// constant so a `disasm` of the top-level chunk shows every function body
/// reachable from it, not just the outermost one.
pub fn disassemble_recursive(chunk: &Chunk, name: &str) -> String {
    let mut out = chunk.disassemble(name);
    for constant in &chunk.constants {
        if let zym_core::Value::Object(obj) = constant {
            if let Some(function) = obj.as_function() {
                let nested_name = function.name.as_deref().unwrap_or("<anonymous>");
                out.push('\n');
                out.push_str(&disassemble_recursive(&function.chunk, nested_name));
            }
        }
    }
    out
}
