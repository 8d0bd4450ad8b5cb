//! Maps synthetic combined-source line numbers back to the original
//! `(file, line)` pair they were stitched from.
//!
//! The module loader produces one of these for the combined source it hands
//! to the lexer; the lexer consults it so that every diagnostic quotes the
//! line a human actually wrote, not the line in the generated factory-wrapped
//! blob.

use std::path::PathBuf;

/// Sentinel meaning "this combined line was inserted by the loader and has no
/// original-source counterpart" (the synthetic `func __module_x() {` wrapper
/// lines, the closing `}`, and the blank separator).
pub const SYNTHETIC_LINE: u32 = 0;

/// One entry in a [`LineMap`]: which file a combined line came from, and
/// which line of that file it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginLine {
    pub file: PathBuf,
    pub line: u32,
}

/// Maps 1-based combined-source line numbers to their original `(file,
/// line)`. Index 0 is reserved padding (never queried: lexer lookups use
/// `scanner.line - 1`, so a line 1 scanner position reads index 0).
#[derive(Debug, Clone, Default)]
pub struct LineMap {
    /// `origins[i]` is the original file/line for combined line `i`, or
    /// `None` if `i` is the reserved padding slot or a synthetic line whose
    /// file is not tracked (single-file entry programs keep one origin file
    /// and represent synthetic lines with `SYNTHETIC_LINE`).
    origins: Vec<Option<OriginLine>>,
}

impl LineMap {
    /// A line map for a single file with `line_count` lines, 1:1 identity
    /// mapping (used for the entry module before any stitching happens).
    pub fn identity(file: PathBuf, line_count: usize) -> LineMap {
        let mut origins = Vec::with_capacity(line_count + 1);
        origins.push(None); // index 0: reserved padding
        for line in 1..=line_count as u32 {
            origins.push(Some(OriginLine {
                file: file.clone(),
                line,
            }));
        }
        LineMap { origins }
    }

    /// An empty line map with just the reserved padding slot.
    pub fn new() -> LineMap {
        LineMap {
            origins: vec![None],
        }
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.len() <= 1
    }

    /// Append one combined line's origin (a loader-inserted synthetic line
    /// has origin `None`).
    pub fn push(&mut self, origin: Option<OriginLine>) {
        self.origins.push(origin);
    }

    /// Append every entry of another line map's *body* (skipping its index-0
    /// padding), consumed in order — used when stitching a wrapped module's
    /// own line map into the combined output index-by-index as newlines are
    /// emitted.
    pub fn extend_body(&mut self, other: &LineMap) {
        for origin in other.origins.iter().skip(1) {
            self.origins.push(origin.clone());
        }
    }

    /// Look up the original `(file, line)` for 1-based combined line
    /// `combined_line`. Returns `None` for out-of-range or synthetic lines
    /// (callers quote [`SYNTHETIC_LINE`] in that case).
    pub fn lookup(&self, combined_line: u32) -> Option<&OriginLine> {
        self.origins.get(combined_line as usize)?.as_ref()
    }

    /// The mapped line number the lexer should report for 1-based scanner
    /// line `scanner_line` (spec §4.1/§3: `line_map[scanner_line - 1]`,
    /// where the map's index-0 padding slot makes a direct 1-based `lookup`
    /// equivalent — see DESIGN.md's "line map indexing" entry). Returns
    /// [`SYNTHETIC_LINE`] if there's no origin recorded.
    pub fn mapped_line(&self, scanner_line: u32) -> u32 {
        self.lookup(scanner_line)
            .map(|o| o.line)
            .unwrap_or(SYNTHETIC_LINE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_map_round_trips_line_numbers() {
        let map = LineMap::identity(PathBuf::from("a.zym"), 5);
        assert_eq!(map.len(), 6);
        assert_eq!(map.lookup(3).unwrap().line, 3);
    }

    #[test]
    fn synthetic_lines_have_no_origin() {
        let mut map = LineMap::new();
        map.push(None);
        map.push(Some(OriginLine {
            file: PathBuf::from("a.zym"),
            line: 1,
        }));
        assert!(map.lookup(1).is_none());
        assert_eq!(map.lookup(2).unwrap().line, 1);
    }

    #[test]
    fn extend_body_skips_padding_of_child() {
        let mut combined = LineMap::new();
        let child = LineMap::identity(PathBuf::from("util.zym"), 3);
        combined.extend_body(&child);
        // combined: [pad, util:1, util:2, util:3]
        assert_eq!(combined.len(), 4);
        assert_eq!(combined.lookup(1).unwrap().line, 1);
        assert_eq!(combined.lookup(3).unwrap().line, 3);
    }
}
