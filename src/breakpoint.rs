//! Requested breakpoints per original source file and their runtime bindings.

use crate::cdp::method;
use crate::sourcemap::registry::ScriptRegistry;
use crate::sourcemap::translate::ClientBasis;
use serde_json::{Value, json};
use std::collections::HashMap;

/// Breakpoint as requested by the client, in the client's line/column basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceBreakpoint {
    pub line: i64,
    pub column: Option<i64>,
}

impl SourceBreakpoint {
    pub fn from_dap(value: &Value) -> Option<Self> {
        Some(Self {
            line: value.get("line").and_then(Value::as_i64)?,
            column: value.get("column").and_then(Value::as_i64),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointRecord {
    /// Id reported to the client, stable for the record's lifetime.
    pub id: i64,
    pub source_path: String,
    pub line: i64,
    pub column: Option<i64>,
    pub verified: bool,
    pub runtime_id: Option<String>,
    bind_pending: bool,
    rebind_requested: bool,
}

impl BreakpointRecord {
    fn same_position(&self, bp: &SourceBreakpoint) -> bool {
        self.line == bp.line && self.column == bp.column
    }

    pub fn to_dap(&self) -> Value {
        let mut body = json!({
            "id": self.id,
            "verified": self.verified,
            "line": self.line,
            "source": {"path": self.source_path},
        });
        if let Some(column) = self.column {
            body["column"] = json!(column);
        }
        body
    }
}

/// Runtime command the manager wants issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointCommand {
    Set {
        record_id: i64,
        epoch: u64,
        url: String,
        line0: i64,
        column0: i64,
    },
    Remove {
        runtime_id: String,
    },
}

impl BreakpointCommand {
    pub fn method_and_params(&self) -> (&'static str, Value) {
        match self {
            BreakpointCommand::Set {
                url, line0, column0, ..
            } => (
                method::DEBUGGER_SET_BREAKPOINT_BY_URL,
                json!({
                    "lineNumber": line0,
                    "url": url,
                    "columnNumber": column0,
                    "condition": "",
                }),
            ),
            BreakpointCommand::Remove { runtime_id } => (
                method::DEBUGGER_REMOVE_BREAKPOINT,
                json!({"breakpointId": runtime_id}),
            ),
        }
    }
}

/// What came out of a runtime answer to a set command.
#[derive(Debug, Default)]
pub struct BindOutcome {
    /// The record after the answer, `None` if it no longer exists.
    pub record: Option<BreakpointRecord>,
    pub commands: Vec<BreakpointCommand>,
}

#[derive(Debug, Default)]
pub struct BreakpointManager {
    by_path: HashMap<String, Vec<BreakpointRecord>>,
    next_id: i64,
    /// Bumped whenever runtime bindings are dropped wholesale, answers to set commands
    /// from an older epoch are ignored.
    epoch: u64,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, source_path: &str) -> &[BreakpointRecord] {
        self.by_path
            .get(source_path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.by_path.keys().map(String::as_str)
    }

    /// Replace the breakpoint list of `source_path`.
    ///
    /// Breakpoints at an unchanged (line, column) keep their record and binding, verified
    /// ones that disappear are removed from the runtime, the rest are bound when a loaded
    /// script covers them.
    pub fn set_breakpoints(
        &mut self,
        source_path: &str,
        requested: &[SourceBreakpoint],
        basis: ClientBasis,
        registry: &ScriptRegistry,
    ) -> Vec<BreakpointCommand> {
        let mut previous = self.by_path.remove(source_path).unwrap_or_default();
        let mut commands = vec![];

        let mut records = Vec::with_capacity(requested.len());
        for bp in requested {
            let record = match previous.iter().position(|r| r.same_position(bp)) {
                Some(idx) => previous.remove(idx),
                None => {
                    self.next_id += 1;
                    BreakpointRecord {
                        id: self.next_id,
                        source_path: source_path.to_string(),
                        line: bp.line,
                        column: bp.column,
                        verified: false,
                        runtime_id: None,
                        bind_pending: false,
                        rebind_requested: false,
                    }
                }
            };
            records.push(record);
        }

        for stale in previous {
            if let Some(runtime_id) = stale.runtime_id {
                commands.push(BreakpointCommand::Remove { runtime_id });
            }
        }

        for record in &mut records {
            commands.extend(bind(record, self.epoch, basis, registry));
        }

        if !records.is_empty() {
            self.by_path.insert(source_path.to_string(), records);
        }
        commands
    }

    /// Drop and re-install the bindings of every breakpoint in the given files.
    pub fn rebind_sources<'a>(
        &mut self,
        source_paths: impl IntoIterator<Item = &'a str>,
        basis: ClientBasis,
        registry: &ScriptRegistry,
    ) -> Vec<BreakpointCommand> {
        let mut commands = vec![];
        for path in source_paths {
            let Some(records) = self.by_path.get_mut(path) else {
                continue;
            };
            for record in records {
                commands.extend(reset(record, self.epoch, basis, registry));
            }
        }
        commands
    }

    /// Apply the runtime answer to a set command.
    pub fn on_bound(
        &mut self,
        record_id: i64,
        epoch: u64,
        runtime_id: Option<String>,
        basis: ClientBasis,
        registry: &ScriptRegistry,
    ) -> BindOutcome {
        if epoch != self.epoch {
            return BindOutcome::default();
        }

        let Some(record) = self
            .by_path
            .values_mut()
            .flatten()
            .find(|r| r.id == record_id)
        else {
            // breakpoint was dropped while the command was in flight
            return BindOutcome {
                record: None,
                commands: runtime_id
                    .map(|runtime_id| BreakpointCommand::Remove { runtime_id })
                    .into_iter()
                    .collect(),
            };
        };

        record.bind_pending = false;
        record.verified = runtime_id.is_some();
        record.runtime_id = runtime_id;

        let mut commands = vec![];
        if record.rebind_requested {
            record.rebind_requested = false;
            commands = reset(record, self.epoch, basis, registry);
        }
        BindOutcome {
            record: Some(record.clone()),
            commands,
        }
    }

    /// Forget runtime bindings, keeping the requested breakpoints for a later rebind.
    pub fn unbind_all(&mut self) {
        self.epoch += 1;
        for record in self.by_path.values_mut().flatten() {
            record.verified = false;
            record.runtime_id = None;
            record.bind_pending = false;
            record.rebind_requested = false;
        }
    }

    pub fn clear(&mut self) {
        self.epoch += 1;
        self.by_path.clear();
    }
}

fn bind(
    record: &mut BreakpointRecord,
    epoch: u64,
    basis: ClientBasis,
    registry: &ScriptRegistry,
) -> Option<BreakpointCommand> {
    if record.verified || record.bind_pending {
        return None;
    }
    let line1 = basis.line_from_client(record.line);
    let column0 = record
        .column
        .map(|c| basis.column_from_client(c))
        .unwrap_or(0)
        .max(0);
    let generated = registry.to_generated(&record.source_path, line1, column0)?;
    record.bind_pending = true;
    Some(BreakpointCommand::Set {
        record_id: record.id,
        epoch,
        url: generated.url,
        line0: generated.line0,
        column0: generated.column0,
    })
}

fn reset(
    record: &mut BreakpointRecord,
    epoch: u64,
    basis: ClientBasis,
    registry: &ScriptRegistry,
) -> Vec<BreakpointCommand> {
    if record.bind_pending {
        record.rebind_requested = true;
        return vec![];
    }
    let mut commands = vec![];
    if let Some(runtime_id) = record.runtime_id.take() {
        commands.push(BreakpointCommand::Remove { runtime_id });
    }
    record.verified = false;
    commands.extend(bind(record, epoch, basis, registry));
    commands
}
