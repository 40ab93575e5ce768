//! Mapping between original-source and generated-script coordinates.

use crate::sourcemap::registry::ScriptRegistry;

/// Source reported for positions no source map covers.
pub const UNRESOLVED_SOURCE: &str = "__source__";
/// Script reported for positions inside unknown scripts.
pub const UNRESOLVED_SCRIPT: &str = "__script__";

/// Location inside a generated script, in the runtime's 0-based convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPosition {
    pub url: String,
    pub line0: i64,
    pub column0: i64,
}

/// Location inside an original source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition {
    pub source: String,
    pub line1: i64,
    pub column0: i64,
    /// Url of the generated script the position was resolved through.
    pub script_url: String,
}

impl OriginalPosition {
    fn unresolved(script_url: &str, line1: i64, column0: i64) -> Self {
        Self {
            source: UNRESOLVED_SOURCE.to_string(),
            line1,
            column0,
            script_url: script_url.to_string(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.source != UNRESOLVED_SOURCE
    }
}

impl ScriptRegistry {
    /// Generated position of an original one.
    ///
    /// Every registered map that lists `source_path` is asked, the most recently registered
    /// hit wins. A position on a line without code binds to the next mapped position.
    pub fn to_generated(&self, source_path: &str, line1: i64, column0: i64) -> Option<GeneratedPosition> {
        if line1 < 1 {
            return None;
        }
        let name = self.source_map_name(source_path);
        let (line, column) = (line1 - 1, column0.max(0));

        self.scripts().iter().rev().find_map(|script| {
            let source = script.source_map.source_index(&name)?;
            let (gen_line, gen_col) =
                script
                    .source_map
                    .generated_position_for(source, line as u32, column as u32)?;
            Some(GeneratedPosition {
                url: script.url.clone(),
                line0: i64::from(gen_line) + script.line_offset,
                column0: i64::from(gen_col),
            })
        })
    }

    /// Original position of a generated one. Never fails: positions that no map covers
    /// come back unresolved with the input coordinates.
    pub fn to_original(&self, id_or_url: &str, line1: i64, column0: i64) -> OriginalPosition {
        let Some(script) = self.find(id_or_url) else {
            return OriginalPosition::unresolved(UNRESOLVED_SCRIPT, line1, column0);
        };

        let line0 = line1 - 1 - script.line_offset;
        if line0 < 0 || column0 < 0 {
            return OriginalPosition::unresolved(&script.url, line1, column0);
        }

        match script
            .source_map
            .original_position_for(line0 as u32, column0 as u32)
        {
            Some(pos) => OriginalPosition {
                source: self.resolve_alias(pos.source),
                line1: i64::from(pos.line) + 1,
                column0: i64::from(pos.column),
                script_url: script.url.clone(),
            },
            None => OriginalPosition::unresolved(&script.url, line1, column0),
        }
    }
}

/// Line and column basis the client asked for at `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientBasis {
    pub lines_start_at1: bool,
    pub columns_start_at1: bool,
}

impl Default for ClientBasis {
    fn default() -> Self {
        Self {
            lines_start_at1: true,
            columns_start_at1: true,
        }
    }
}

impl ClientBasis {
    pub fn line_to_client(&self, line1: i64) -> i64 {
        if self.lines_start_at1 { line1 } else { line1 - 1 }
    }

    pub fn column_to_client(&self, column0: i64) -> i64 {
        if self.columns_start_at1 { column0 + 1 } else { column0 }
    }

    pub fn line_from_client(&self, line: i64) -> i64 {
        if self.lines_start_at1 { line } else { line + 1 }
    }

    pub fn column_from_client(&self, column: i64) -> i64 {
        if self.columns_start_at1 { column - 1 } else { column }
    }
}
