//! Parameter/variable qualifiers and the per-function qualifier signature.
//!
//! The 8-bit qualifier signature itself is spec-only, with no teacher
//! equivalent (the teacher's Seq words take arguments off an implicit
//! operand stack; it has no parameter-qualifier grammar at all). The
//! constructor-validates-input habit is grounded on the teacher's
//! `crates/compiler/src/config.rs` `ExternalBuiltin::new`, which panics on an
//! invalid symbol rather than accepting it and failing later.

use std::fmt;

/// How a parameter (or a `var`/`val`/`ref`/`clone` declaration) binds its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// Plain by-value parameter/binding.
    Normal,
    /// Caller passes a `Reference`; the callee auto-dereferences on read and
    /// assignment writes through to the aliased storage.
    Ref,
    /// Like `Ref`, but does not flatten reference chains on creation. A plain
    /// assignment writes through all ref layers; `slot x = v` rebinds only
    /// this layer.
    Slot,
    /// Evaluate then shallow-clone.
    Val,
    /// Evaluate then deep-clone with cycle detection and reference rewriting.
    Clone,
}

impl Qualifier {
    pub fn as_keyword(self) -> &'static str {
        match self {
            Qualifier::Normal => "",
            Qualifier::Ref => "ref",
            Qualifier::Slot => "slot",
            Qualifier::Val => "val",
            Qualifier::Clone => "clone",
        }
    }

    /// Parse a parameter qualifier prefix as it appears in a native signature,
    /// e.g. `"print(ref x, val y, z)"` — `z` has no prefix and is `Normal`.
    pub fn from_prefix(prefix: &str) -> Option<Qualifier> {
        match prefix {
            "" => Some(Qualifier::Normal),
            "ref" => Some(Qualifier::Ref),
            "slot" => Some(Qualifier::Slot),
            "val" => Some(Qualifier::Val),
            "clone" => Some(Qualifier::Clone),
            _ => None,
        }
    }

    pub fn is_reference_kind(self) -> bool {
        matches!(self, Qualifier::Ref | Qualifier::Slot)
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_keyword())
    }
}

/// An 8-bit summary of a function's parameter-qualifier pattern, used by the
/// VM's call fast path to skip qualifier dispatch entirely when possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum QualifierSignature {
    /// Zero parameters.
    AllNormalNoRefs = 0,
    /// Any arity, every parameter is `Normal`.
    AllNormal = 1,
    /// At least one parameter has a non-`Normal` qualifier.
    HasQualifiers = 2,
}

impl QualifierSignature {
    /// Compute the signature for a parameter list's qualifiers, in
    /// declaration order.
    pub fn compute(qualifiers: &[Qualifier]) -> QualifierSignature {
        if qualifiers.is_empty() {
            return QualifierSignature::AllNormalNoRefs;
        }
        if qualifiers.iter().all(|q| *q == Qualifier::Normal) {
            QualifierSignature::AllNormal
        } else {
            QualifierSignature::HasQualifiers
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(byte: u8) -> Option<QualifierSignature> {
        match byte {
            0 => Some(QualifierSignature::AllNormalNoRefs),
            1 => Some(QualifierSignature::AllNormal),
            2 => Some(QualifierSignature::HasQualifiers),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_arity_is_all_normal_no_refs() {
        assert_eq!(
            QualifierSignature::compute(&[]),
            QualifierSignature::AllNormalNoRefs
        );
    }

    #[test]
    fn all_normal_params_is_all_normal() {
        let qs = [Qualifier::Normal, Qualifier::Normal];
        assert_eq!(QualifierSignature::compute(&qs), QualifierSignature::AllNormal);
    }

    #[test]
    fn one_ref_param_has_qualifiers() {
        let qs = [Qualifier::Normal, Qualifier::Ref];
        assert_eq!(
            QualifierSignature::compute(&qs),
            QualifierSignature::HasQualifiers
        );
    }

    #[test]
    fn prefix_round_trip() {
        for q in [
            Qualifier::Normal,
            Qualifier::Ref,
            Qualifier::Slot,
            Qualifier::Val,
            Qualifier::Clone,
        ] {
            assert_eq!(Qualifier::from_prefix(q.as_keyword()), Some(q));
        }
    }
}
