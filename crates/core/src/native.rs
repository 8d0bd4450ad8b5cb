//! Native function registration (spec §6): embedders register natives by a
//! signature string, `"name(param1, ref param2, ...)"`, which this module
//! parses into a [`NativeSignature`] and a mangled `name@arity` lookup key —
//! the same mangling scheme the compiler applies to user-defined overloads
//! (spec §4.3.2), so natives and script functions share one dispatch table.
//!
//! Grounded on the teacher's `ffi.rs` `FfiManifest` (a TOML-described batch of
//! bindings, parsed then validated in one pass) for the manifest shape; the
//! signature-string grammar itself is this crate's own, since the teacher's
//! own builtin table (`builtins.rs`) declares each operation's stack effect
//! as a `HashMap<String, Effect>` built from `StackType`/`Type` constructors
//! in Rust, not a parsed textual signature.

use std::fmt;

use crate::object::NativeSignature;
use crate::qualifier::Qualifier;

/// Build the `name@arity` key used to register/look up a callable, matching
/// the compiler's own overload-mangling scheme (spec §4.3.2).
pub fn mangle(name: &str, arity: u8) -> String {
    format!("{}@{}", name, arity)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    Empty,
    MissingParenOpen,
    MissingParenClose,
    TrailingGarbage(String),
    EmptyParamName(usize),
    TooManyParams(usize),
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::Empty => write!(f, "native signature is empty"),
            SignatureError::MissingParenOpen => {
                write!(f, "native signature is missing an opening parenthesis")
            }
            SignatureError::MissingParenClose => {
                write!(f, "native signature is missing a closing parenthesis")
            }
            SignatureError::TrailingGarbage(text) => {
                write!(f, "unexpected trailing text after signature: {:?}", text)
            }
            SignatureError::EmptyParamName(index) => {
                write!(f, "parameter {} has an empty name", index)
            }
            SignatureError::TooManyParams(count) => {
                write!(f, "native signature declares {} parameters, max is 255", count)
            }
        }
    }
}

impl std::error::Error for SignatureError {}

/// Parse `"name(param1, ref param2, slot param3, val param4, clone param5)"`
/// into a [`NativeSignature`]. Parameter qualifiers use the same keywords the
/// compiler's parser accepts on script function parameters (spec §3's
/// qualifier grammar): a bare name is `Normal`, otherwise a leading
/// `ref`/`slot`/`val`/`clone` keyword (separated from the name by
/// whitespace) sets the qualifier.
pub fn parse_signature(text: &str) -> Result<NativeSignature, SignatureError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SignatureError::Empty);
    }
    let open = text.find('(').ok_or(SignatureError::MissingParenOpen)?;
    let name = text[..open].trim().to_string();
    let rest = &text[open + 1..];
    let close = rest.find(')').ok_or(SignatureError::MissingParenClose)?;
    let params_text = &rest[..close];
    let trailing = rest[close + 1..].trim();
    if !trailing.is_empty() {
        return Err(SignatureError::TrailingGarbage(trailing.to_string()));
    }

    let mut qualifiers = Vec::new();
    if !params_text.trim().is_empty() {
        for (index, raw) in params_text.split(',').enumerate() {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(SignatureError::EmptyParamName(index));
            }
            let mut words = raw.split_whitespace();
            let first = words.next().unwrap_or("");
            let qualifier = Qualifier::from_prefix(first).unwrap_or(Qualifier::Normal);
            let param_name = if Qualifier::from_prefix(first).is_some() {
                words.next().unwrap_or("")
            } else {
                first
            };
            if param_name.is_empty() {
                return Err(SignatureError::EmptyParamName(index));
            }
            qualifiers.push(qualifier);
        }
    }
    if qualifiers.len() > u8::MAX as usize {
        return Err(SignatureError::TooManyParams(qualifiers.len()));
    }

    Ok(NativeSignature {
        name,
        arity: qualifiers.len() as u8,
        param_qualifiers: qualifiers.into_boxed_slice(),
    })
}

/// One native registered through a [`NativeManifest`]: a signature string
/// plus an optional human-readable doc line carried through to `zymc`'s
/// `disasm`/embedder tooling. The library itself never parses the manifest
/// further than this — resolving `library`/`symbol` to an actual callable is
/// the embedder's job, same as the teacher's FFI manifest only describes
/// bindings and leaves dlopen-ing them to its own linker pass.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NativeManifestEntry {
    pub signature: String,
    #[serde(default)]
    pub doc: Option<String>,
    /// Opaque to this crate; an embedder-defined hint for how to resolve
    /// this entry to an actual native callable (e.g. a dynamic library name).
    #[serde(default)]
    pub library: Option<String>,
}

/// A TOML-described batch of native registrations an embedder wants
/// registered before running a script (spec §6). Grounded on the teacher's
/// `ffi.rs` `FfiManifest` (a `[[library]]`/`[[function]]`-shaped TOML file
/// parsed via `toml::from_str` plus a validation pass), narrowed to this
/// engine's simpler single-signature-string registration contract instead
/// of per-parameter C type/pass-mode annotations, since Zym's native
/// boundary (§6) is same-process Rust callables, not a C FFI link step.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NativeManifest {
    #[serde(rename = "native", default)]
    pub natives: Vec<NativeManifestEntry>,
}

impl NativeManifest {
    /// Parse and validate a manifest, rejecting any entry whose `signature`
    /// doesn't parse per [`parse_signature`] (mirrors the teacher's
    /// parse-then-validate `FfiManifest::parse` shape).
    pub fn parse(content: &str) -> Result<NativeManifest, String> {
        let manifest: NativeManifest =
            toml::from_str(content).map_err(|e| format!("failed to parse native manifest: {}", e))?;
        for entry in &manifest.natives {
            parse_signature(&entry.signature)
                .map_err(|e| format!("native manifest entry {:?}: {}", entry.signature, e))?;
        }
        Ok(manifest)
    }

    /// Every entry's parsed signature, in manifest order. Fails on the
    /// first unparseable signature even though [`NativeManifest::parse`]
    /// already validated this — kept separate so a caller that built a
    /// `NativeManifest` by hand (not via `parse`) still gets a checked path.
    pub fn signatures(&self) -> Result<Vec<NativeSignature>, SignatureError> {
        self.natives.iter().map(|e| parse_signature(&e.signature)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_zero_arity_signature() {
        let sig = parse_signature("now()").unwrap();
        assert_eq!(sig.name, "now");
        assert_eq!(sig.arity, 0);
    }

    #[test]
    fn parses_mixed_qualifiers() {
        let sig = parse_signature("sort(list, ref cmp, val count)").unwrap();
        assert_eq!(sig.arity, 3);
        assert_eq!(sig.param_qualifiers[0], Qualifier::Normal);
        assert_eq!(sig.param_qualifiers[1], Qualifier::Ref);
        assert_eq!(sig.param_qualifiers[2], Qualifier::Val);
    }

    #[test]
    fn mangled_key_matches_compiler_scheme() {
        assert_eq!(mangle("print", 1), "print@1");
    }

    #[test]
    fn rejects_missing_parens() {
        assert_eq!(parse_signature("print"), Err(SignatureError::MissingParenOpen));
        assert_eq!(
            parse_signature("print(a"),
            Err(SignatureError::MissingParenClose)
        );
    }

    #[test]
    fn rejects_empty_param_name() {
        assert_eq!(
            parse_signature("f(a, )"),
            Err(SignatureError::EmptyParamName(1))
        );
    }

    #[test]
    fn manifest_parses_multiple_entries() {
        let toml = r#"
            [[native]]
            signature = "print(value)"
            doc = "write a value to stdout"

            [[native]]
            signature = "sort(list, ref cmp)"
            library = "stdlib"
        "#;
        let manifest = NativeManifest::parse(toml).unwrap();
        assert_eq!(manifest.natives.len(), 2);
        let sigs = manifest.signatures().unwrap();
        assert_eq!(sigs[0].name, "print");
        assert_eq!(sigs[1].arity, 2);
        assert_eq!(manifest.natives[1].library.as_deref(), Some("stdlib"));
    }

    #[test]
    fn manifest_rejects_bad_signature() {
        let toml = r#"
            [[native]]
            signature = "broken"
        "#;
        assert!(NativeManifest::parse(toml).is_err());
    }

    #[test]
    fn manifest_defaults_to_empty() {
        let manifest = NativeManifest::parse("").unwrap();
        assert!(manifest.natives.is_empty());
    }
}
