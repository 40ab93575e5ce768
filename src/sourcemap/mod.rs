//! Source maps of loaded scripts and lookups in both directions.
//!
//! All positions in this module are 0-based for both lines and columns.

pub mod registry;
pub mod translate;

use crate::error::Error;

/// Position inside an original source returned by [`SourceMap::original_position_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginalLocation<'a> {
    pub source: &'a str,
    pub line: u32,
    pub column: u32,
}

/// Decoded source map, indexed for lookups by original position.
#[derive(Debug, Clone)]
pub struct SourceMap {
    inner: ::sourcemap::SourceMap,
    sources: Vec<String>,
    /// (source, original line, original column, generated line, generated column) of every
    /// token that has an original position, sorted.
    by_original: Vec<(u32, u32, u32, u32, u32)>,
}

impl SourceMap {
    pub fn from_slice(data: &[u8]) -> Result<Self, Error> {
        let inner = ::sourcemap::SourceMap::from_slice(data)?;
        let sources = inner.sources().map(ToString::to_string).collect();

        let mut by_original = inner
            .tokens()
            .filter(|t| t.has_source())
            .map(|t| {
                (
                    t.get_src_id(),
                    t.get_src_line(),
                    t.get_src_col(),
                    t.get_dst_line(),
                    t.get_dst_col(),
                )
            })
            .collect::<Vec<_>>();
        by_original.sort_unstable();

        Ok(Self {
            inner,
            sources,
            by_original,
        })
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn source_index(&self, source: &str) -> Option<u32> {
        self.sources
            .iter()
            .position(|s| s == source)
            .map(|i| i as u32)
    }

    /// Original position for a generated one: the closest token on the same generated line
    /// at or before `column`.
    pub fn original_position_for(&self, line: u32, column: u32) -> Option<OriginalLocation<'_>> {
        let token = self.inner.lookup_token(line, column)?;
        if token.get_dst_line() != line {
            return None;
        }
        Some(OriginalLocation {
            source: token.get_source()?,
            line: token.get_src_line(),
            column: token.get_src_col(),
        })
    }

    /// Generated position for an original one, with least-upper-bound bias: the first
    /// token of `source` at or after (`line`, `column`) wins, even on a later line.
    pub fn generated_position_for(&self, source: u32, line: u32, column: u32) -> Option<(u32, u32)> {
        let needle = (source, line, column);
        let idx = self
            .by_original
            .partition_point(|&(s, l, c, _, _)| (s, l, c) < needle);
        let &(found_source, _, _, gen_line, gen_col) = self.by_original.get(idx)?;
        if found_source != source {
            return None;
        }
        Some((gen_line, gen_col))
    }
}
