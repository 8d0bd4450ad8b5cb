//! Recursive module/import resolution (spec §4.2).
//!
//! A Zym source file may contain `import("path")` (an expression that
//! yields the target module's exported value) or `import name from "path"`
//! (a statement binding `name` to a field of the target's export map). The
//! loader discovers these textually (by lexing each file on its own before
//! any combining happens — the same `Lexer` the compiler itself uses, since
//! `import`/`from` are ordinary keyword tokens), resolves and normalizes
//! the target path relative to the importing file, recurses into it, and
//! splices every distinct module's body into one combined source the
//! compiler lexes and parses as if it had been written as a single file.
//!
//! Each non-entry module is wrapped as a memoized factory:
//!
//! ```text
//! var __module_X_cache = null;
//! func __module_X() {
//!     if (__module_X_cache != null) { return __module_X_cache; }
//!     __module_X_cache = (func() { <module body, ends in `return <exports>;`> })();
//!     return __module_X_cache;
//! }
//! ```
//!
//! so a module executes at most once no matter how many importers reach it
//! (a diamond dependency shares one instance), and diagnostics about code
//! inside it still point at the original file and line via the stitched
//! [`LineMap`].

use crate::lexer::{Lexer, TokenKind};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use zym_core::linemap::LineMap;

pub struct LoadResult {
    pub combined_source: String,
    pub line_map: LineMap,
    pub entry_path: PathBuf,
}

/// Placeholder for an embedder-supplied module source; currently unused by
/// the filesystem-backed default loader but kept as the seam a virtual
/// filesystem embedding would hang a cache off of.
pub struct ModuleReadResult {
    pub path: PathBuf,
    pub source: String,
}

#[derive(Debug)]
pub enum LoadError {
    Io {
        path: PathBuf,
        message: String,
    },
    /// `chain[0] -> chain[1] -> ... -> chain[0]`: the import cycle, in
    /// discovery order, with the repeated path last.
    Cycle {
        chain: Vec<PathBuf>,
    },
    BadImportSyntax {
        path: PathBuf,
        line: u32,
        message: String,
    },
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io { path, message } => {
                write!(f, "{}: {}", path.display(), message)
            }
            LoadError::Cycle { chain } => {
                writeln!(f, "Circular import detected:")?;
                for (i, p) in chain.iter().enumerate() {
                    if i == 0 {
                        writeln!(f, "    {}", p.display())?;
                    } else {
                        writeln!(f, "    -> {}", p.display())?;
                    }
                }
                Ok(())
            }
            LoadError::BadImportSyntax { path, line, message } => {
                write!(f, "{}:{}: {}", path.display(), line, message)
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// One `import` occurrence found in a not-yet-combined file's source.
struct Import {
    /// Byte span in the *original* source this occurrence covers, including
    /// its trailing `;` for the statement form.
    start: usize,
    end: usize,
    target_path_text: String,
    /// `None` for the bare `import("path")` expression form, `Some(name)`
    /// for the `import name from "path";` statement form.
    bound_name: Option<String>,
    line: u32,
}

fn token_offset(source: &str, lexeme: &str) -> usize {
    lexeme.as_ptr() as usize - source.as_ptr() as usize
}

fn decode_path_literal(lexeme: &str) -> String {
    lexeme.trim_matches('"').to_string()
}

fn scan_imports(path: &Path, source: &str) -> Result<Vec<Import>, LoadError> {
    let tokens = Lexer::new(source).tokenize();
    let mut imports = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind != TokenKind::Import {
            i += 1;
            continue;
        }
        let start = token_offset(source, tokens[i].lexeme);
        let line = tokens[i].line;
        match tokens.get(i + 1).map(|t| t.kind) {
            Some(TokenKind::LeftParen) => {
                let path_tok = tokens.get(i + 2).ok_or_else(|| LoadError::BadImportSyntax {
                    path: path.to_path_buf(),
                    line,
                    message: "expected a string literal after 'import('".to_string(),
                })?;
                if path_tok.kind != TokenKind::StringLit {
                    return Err(LoadError::BadImportSyntax {
                        path: path.to_path_buf(),
                        line,
                        message: "expected a string literal after 'import('".to_string(),
                    });
                }
                let rparen = tokens.get(i + 3).ok_or_else(|| LoadError::BadImportSyntax {
                    path: path.to_path_buf(),
                    line,
                    message: "expected ')' closing 'import('".to_string(),
                })?;
                if rparen.kind != TokenKind::RightParen {
                    return Err(LoadError::BadImportSyntax {
                        path: path.to_path_buf(),
                        line,
                        message: "expected ')' closing 'import('".to_string(),
                    });
                }
                let end = token_offset(source, rparen.lexeme) + rparen.lexeme.len();
                imports.push(Import {
                    start,
                    end,
                    target_path_text: decode_path_literal(path_tok.lexeme),
                    bound_name: None,
                    line,
                });
                i += 4;
            }
            Some(TokenKind::Identifier) => {
                let name = tokens[i + 1].lexeme.to_string();
                let from_tok = tokens.get(i + 2).ok_or_else(|| LoadError::BadImportSyntax {
                    path: path.to_path_buf(),
                    line,
                    message: "expected 'from' after import name".to_string(),
                })?;
                if from_tok.kind != TokenKind::From {
                    return Err(LoadError::BadImportSyntax {
                        path: path.to_path_buf(),
                        line,
                        message: "expected 'from' after import name".to_string(),
                    });
                }
                let path_tok = tokens.get(i + 3).ok_or_else(|| LoadError::BadImportSyntax {
                    path: path.to_path_buf(),
                    line,
                    message: "expected a string literal after 'from'".to_string(),
                })?;
                if path_tok.kind != TokenKind::StringLit {
                    return Err(LoadError::BadImportSyntax {
                        path: path.to_path_buf(),
                        line,
                        message: "expected a string literal after 'from'".to_string(),
                    });
                }
                let mut end = token_offset(source, path_tok.lexeme) + path_tok.lexeme.len();
                let mut consumed = 4;
                if tokens.get(i + 4).map(|t| t.kind) == Some(TokenKind::Semicolon) {
                    end = token_offset(source, tokens[i + 4].lexeme) + 1;
                    consumed = 5;
                }
                imports.push(Import {
                    start,
                    end,
                    target_path_text: decode_path_literal(path_tok.lexeme),
                    bound_name: Some(name),
                    line,
                });
                i += consumed;
            }
            _ => {
                return Err(LoadError::BadImportSyntax {
                    path: path.to_path_buf(),
                    line,
                    message: "expected '(' or an identifier after 'import'".to_string(),
                });
            }
        }
    }
    Ok(imports)
}

/// Join `raw` onto `base_dir` and collapse `.`/`..` components (spec §4.2:
/// import paths are resolved relative to the importing file, not the
/// process's current directory).
fn normalize_path(base_dir: &Path, raw: &str) -> PathBuf {
    let joined = base_dir.join(raw);
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn factory_name(debug_names: bool, path: &Path) -> String {
    if debug_names {
        let encoded: String = path
            .to_string_lossy()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("__module_{}", encoded)
    } else {
        format!("_{:x}", djb2_hash(path.to_string_lossy().as_bytes()))
    }
}

fn djb2_hash(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u64);
    }
    hash
}

/// Append `text` to `combined`, one physical line at a time, recording each
/// line's origin in `line_map`. `origin` is `None` for loader-synthesized
/// boilerplate; `Some((file, first_line))` attributes `text`'s lines
/// `first_line, first_line + 1, ...` back to `file`.
fn push_text(combined: &mut String, line_map: &mut LineMap, text: &str, origin: Option<(&Path, u32)>) {
    for (idx, line) in text.split('\n').enumerate() {
        combined.push_str(line);
        combined.push('\n');
        let entry = origin.map(|(file, first)| zym_core::linemap::OriginLine {
            file: file.to_path_buf(),
            line: first + idx as u32,
        });
        line_map.push(entry);
    }
}

fn push_line(combined: &mut String, line_map: &mut LineMap, line: &str) {
    combined.push_str(line);
    combined.push('\n');
    line_map.push(None);
}

struct Loader<'a> {
    config: &'a crate::config::ModuleLoaderConfig,
    resolved: HashMap<PathBuf, String>,
    in_progress: Vec<PathBuf>,
    combined: String,
    line_map: LineMap,
}

impl<'a> Loader<'a> {
    fn rewrite_source(&mut self, path: &Path, source: &str) -> Result<String, LoadError> {
        let imports = scan_imports(path, source)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let mut spans = Vec::with_capacity(imports.len());
        for imp in &imports {
            let target = normalize_path(&base_dir, &imp.target_path_text);
            let factory = self.process(&target)?;
            let replacement = match &imp.bound_name {
                None => format!("{}()", factory),
                Some(name) => format!("var {} = {}().{};", name, factory, name),
            };
            spans.push((imp.start, imp.end, replacement));
        }
        let mut rewritten = source.to_string();
        for (start, end, replacement) in spans.into_iter().rev() {
            rewritten.replace_range(start..end, &replacement);
        }
        Ok(rewritten)
    }

    /// Resolve `path` as a dependency (never the entry module), returning
    /// its factory function's name. Already-resolved modules short-circuit
    /// without re-reading or re-splicing.
    fn process(&mut self, path: &Path) -> Result<String, LoadError> {
        if let Some(name) = self.resolved.get(path) {
            return Ok(name.clone());
        }
        if self.in_progress.iter().any(|p| p == path) {
            let mut chain = self.in_progress.clone();
            chain.push(path.to_path_buf());
            return Err(LoadError::Cycle { chain });
        }
        self.in_progress.push(path.to_path_buf());
        let source = (self.config.read)(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let rewritten = self.rewrite_source(path, &source)?;
        self.in_progress.pop();

        let name = factory_name(self.config.debug_names, path);
        self.resolved.insert(path.to_path_buf(), name.clone());

        push_line(&mut self.combined, &mut self.line_map, &format!("var {}_cache = null;", name));
        push_line(&mut self.combined, &mut self.line_map, &format!("func {}() {{", name));
        push_line(
            &mut self.combined,
            &mut self.line_map,
            &format!("if ({}_cache != null) {{ return {}_cache; }}", name, name),
        );
        push_line(&mut self.combined, &mut self.line_map, &format!("{}_cache = (func() {{", name));
        push_text(&mut self.combined, &mut self.line_map, &rewritten, Some((path, 1)));
        push_line(&mut self.combined, &mut self.line_map, "})();");
        push_line(&mut self.combined, &mut self.line_map, &format!("return {}_cache;", name));
        push_line(&mut self.combined, &mut self.line_map, "}");

        Ok(name)
    }
}

/// Resolve `entry_path` and every module it (transitively) imports into one
/// combined source plus the [`LineMap`] that maps it back to original
/// files.
pub fn load_module(
    entry_path: &Path,
    config: &crate::config::ModuleLoaderConfig,
) -> Result<LoadResult, LoadError> {
    let entry_path = normalize_path(Path::new(""), &entry_path.to_string_lossy());
    let mut loader = Loader {
        config,
        resolved: HashMap::new(),
        in_progress: Vec::new(),
        combined: String::new(),
        line_map: LineMap::new(),
    };
    loader.in_progress.push(entry_path.clone());
    let source = (config.read)(&entry_path).map_err(|e| LoadError::Io {
        path: entry_path.clone(),
        message: e.to_string(),
    })?;
    let rewritten = loader.rewrite_source(&entry_path, &source)?;
    loader.in_progress.pop();
    push_text(&mut loader.combined, &mut loader.line_map, &rewritten, Some((&entry_path, 1)));

    Ok(LoadResult {
        combined_source: loader.combined,
        line_map: loader.line_map,
        entry_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleLoaderConfig;
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    fn config_with(files: Vec<(&str, &str)>) -> ModuleLoaderConfig {
        let files: Map<PathBuf, String> = files
            .into_iter()
            .map(|(p, s)| (PathBuf::from(p), s.to_string()))
            .collect();
        let files = Mutex::new(files);
        ModuleLoaderConfig {
            debug_names: true,
            read: Box::new(move |path: &Path| {
                files
                    .lock()
                    .unwrap()
                    .get(path)
                    .cloned()
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such module"))
            }),
        }
    }

    #[test]
    fn single_file_has_no_splicing() {
        let config = config_with(vec![("main.zym", "var x = 1;\n")]);
        let result = load_module(Path::new("main.zym"), &config).unwrap();
        assert!(result.combined_source.contains("var x = 1;"));
        assert!(!result.combined_source.contains("__module_"));
    }

    #[test]
    fn named_import_is_resolved_and_spliced() {
        let config = config_with(vec![
            ("main.zym", "import double from \"util.zym\";\nvar y = double(21);\n"),
            ("util.zym", "func double(x) { return x * 2; }\nreturn { double: double };\n"),
        ]);
        let result = load_module(Path::new("main.zym"), &config).unwrap();
        assert!(result.combined_source.contains("func __module_util_zym()"));
        assert!(result.combined_source.contains("var double = __module_util_zym().double;"));
    }

    #[test]
    fn diamond_dependency_is_spliced_once() {
        let config = config_with(vec![
            ("main.zym", "import a from \"a.zym\";\nimport b from \"b.zym\";\n"),
            ("a.zym", "import shared from \"shared.zym\";\nreturn { a: shared };\n"),
            ("b.zym", "import shared from \"shared.zym\";\nreturn { b: shared };\n"),
            ("shared.zym", "return 1;\n"),
        ]);
        let result = load_module(Path::new("main.zym"), &config).unwrap();
        let occurrences = result.combined_source.matches("func __module_shared_zym()").count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn cyclic_imports_are_rejected() {
        let config = config_with(vec![
            ("a.zym", "import b from \"b.zym\";\n"),
            ("b.zym", "import a from \"a.zym\";\n"),
        ]);
        let err = load_module(Path::new("a.zym"), &config).unwrap_err();
        assert!(matches!(err, LoadError::Cycle { .. }));
    }

    #[test]
    fn bare_import_expression_is_spliced_inline() {
        let config = config_with(vec![
            ("main.zym", "var m = import(\"util.zym\");\n"),
            ("util.zym", "return 42;\n"),
        ]);
        let result = load_module(Path::new("main.zym"), &config).unwrap();
        assert!(result.combined_source.contains("var m = __module_util_zym();"));
    }
}
