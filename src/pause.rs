//! Pause/resume state of the runtime and the stack it reported when it stopped.

use crate::cdp::{GetPropertiesResult, Paused, RemoteObject, Scope};
use crate::sourcemap::registry::ScriptRegistry;
use crate::sourcemap::translate::{ClientBasis, OriginalPosition};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
    Exception,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Breakpoint => "breakpoint",
            StopReason::Exception => "exception",
        }
    }
}

/// Frame of a paused stack in original coordinates, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrameRecord {
    pub id: i64,
    pub name: String,
    pub position: OriginalPosition,
}

impl StackFrameRecord {
    pub fn to_dap(&self, basis: ClientBasis) -> Value {
        let mut frame = json!({
            "id": self.id,
            "name": self.name,
            "line": basis.line_to_client(self.position.line1),
            "column": basis.column_to_client(self.position.column0),
        });
        if self.position.is_resolved() {
            frame["source"] = json!({
                "name": self.position.source,
                "path": self.position.source,
            });
        } else {
            // no source a front end could open
            frame["presentationHint"] = json!("subtle");
        }
        frame
    }
}

#[derive(Debug, Clone)]
pub struct PausedSnapshot {
    pub reason: StopReason,
    pub frames: Vec<StackFrameRecord>,
    /// Runtime scope chain per frame, same order as `frames`.
    pub scope_chains: Vec<Vec<Scope>>,
    pub is_fatal: Option<bool>,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub enum PauseState {
    Running,
    Paused(PausedSnapshot),
    Disconnected,
}

/// Object properties the machine needs from the runtime to finish a workaround pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyFetch {
    Scope { pause: u64, object_id: String },
    Stack { pause: u64, object_id: String },
    Entry { pause: u64, index: usize, object_id: String },
}

impl PropertyFetch {
    pub fn object_id(&self) -> &str {
        match self {
            PropertyFetch::Scope { object_id, .. }
            | PropertyFetch::Stack { object_id, .. }
            | PropertyFetch::Entry { object_id, .. } => object_id,
        }
    }

    fn pause(&self) -> u64 {
        match self {
            PropertyFetch::Scope { pause, .. }
            | PropertyFetch::Stack { pause, .. }
            | PropertyFetch::Entry { pause, .. } => *pause,
        }
    }
}

#[derive(Debug)]
pub enum PauseStep {
    /// State moved to paused, the front end should be told.
    Stopped,
    /// Object properties must be fetched before the pause can be reported.
    Fetch(Vec<PropertyFetch>),
    Nothing,
}

/// Stack entry of a captured error, 1-based line and column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ErrorStackEntry {
    method_name: String,
    file: String,
    line_number: i64,
    column: i64,
}

#[derive(Debug)]
struct Workaround {
    native: Paused,
    message: Option<String>,
    is_fatal: bool,
    entries: Vec<Option<ErrorStackEntry>>,
    outstanding: usize,
    /// Some fetch failed, the native frames are reported instead.
    failed: bool,
}

#[derive(Debug)]
pub struct PauseMachine {
    state: PauseState,
    exception_break_function: String,
    /// Identifies the pause a property fetch belongs to.
    pause_seq: u64,
    workaround: Option<Workaround>,
}

impl PauseMachine {
    pub fn new(exception_break_function: impl Into<String>) -> Self {
        Self {
            state: PauseState::Running,
            exception_break_function: exception_break_function.into(),
            pause_seq: 0,
            workaround: None,
        }
    }

    pub fn state(&self) -> &PauseState {
        &self.state
    }

    pub fn snapshot(&self) -> Option<&PausedSnapshot> {
        match &self.state {
            PauseState::Paused(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, PauseState::Paused(_))
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.state, PauseState::Disconnected)
    }

    pub fn on_paused(&mut self, paused: Paused, registry: &ScriptRegistry) -> PauseStep {
        if self.is_disconnected() {
            return PauseStep::Nothing;
        }
        self.pause_seq += 1;
        self.workaround = None;

        if let Some(object_id) = self.workaround_scope(&paused) {
            log::debug!(target: "session", "uncaught error pause, collecting error data");
            self.workaround = Some(Workaround {
                native: paused,
                message: None,
                is_fatal: false,
                entries: vec![],
                outstanding: 0,
                failed: false,
            });
            return PauseStep::Fetch(vec![PropertyFetch::Scope {
                pause: self.pause_seq,
                object_id,
            }]);
        }

        self.state = PauseState::Paused(native_snapshot(&paused, 0, registry));
        PauseStep::Stopped
    }

    /// Local scope object of a pause inside the exception break function.
    fn workaround_scope(&self, paused: &Paused) -> Option<String> {
        let top = paused.call_frames.first()?;
        if top.function_name != self.exception_break_function {
            return None;
        }
        top.scope_chain
            .iter()
            .find(|s| s.kind == "local")
            .and_then(|s| s.object.object_id.clone())
    }

    /// Feed the answer to a property fetch, `None` when the runtime failed it.
    pub fn on_properties(
        &mut self,
        fetch: &PropertyFetch,
        result: Option<GetPropertiesResult>,
        registry: &ScriptRegistry,
    ) -> PauseStep {
        if fetch.pause() != self.pause_seq {
            return PauseStep::Nothing;
        }
        let Some(workaround) = self.workaround.as_mut() else {
            return PauseStep::Nothing;
        };
        let Some(result) = result else {
            log::warn!(target: "session", "failed to read uncaught error data, using runtime frames");
            workaround.failed = true;
            return match fetch {
                PropertyFetch::Entry { .. } => self.entry_settled(registry),
                PropertyFetch::Scope { .. } | PropertyFetch::Stack { .. } => self.finish(registry),
            };
        };

        match fetch {
            PropertyFetch::Scope { pause, .. } => {
                workaround.message = result
                    .property("message")
                    .and_then(|o| o.value.as_ref())
                    .and_then(Value::as_str)
                    .map(ToString::to_string);
                workaround.is_fatal = result
                    .property("isFatal")
                    .and_then(|o| o.value.as_ref())
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                match result.property("stack").and_then(|o| o.object_id.clone()) {
                    Some(object_id) => PauseStep::Fetch(vec![PropertyFetch::Stack {
                        pause: *pause,
                        object_id,
                    }]),
                    None => self.finish(registry),
                }
            }
            PropertyFetch::Stack { pause, .. } => {
                let mut indexed = result
                    .result
                    .iter()
                    .filter_map(|p| {
                        let index = p.name.parse::<usize>().ok()?;
                        let object_id = p.value.as_ref()?.object_id.clone()?;
                        Some((index, object_id))
                    })
                    .collect::<Vec<_>>();
                indexed.sort_by_key(|(index, _)| *index);
                if indexed.is_empty() {
                    return self.finish(registry);
                }

                workaround.entries = vec![None; indexed.len()];
                workaround.outstanding = indexed.len();
                PauseStep::Fetch(
                    indexed
                        .into_iter()
                        .enumerate()
                        .map(|(slot, (_, object_id))| PropertyFetch::Entry {
                            pause: *pause,
                            index: slot,
                            object_id,
                        })
                        .collect(),
                )
            }
            PropertyFetch::Entry { index, .. } => {
                let entry = ErrorStackEntry {
                    method_name: string_property(&result, "methodName").unwrap_or_default(),
                    file: string_property(&result, "file").unwrap_or_default(),
                    line_number: number_property(&result, "lineNumber").unwrap_or(1),
                    column: number_property(&result, "column").unwrap_or(1),
                };
                if let Some(slot) = workaround.entries.get_mut(*index) {
                    *slot = Some(entry);
                }
                self.entry_settled(registry)
            }
        }
    }

    /// One stack entry fetch answered, either way.
    fn entry_settled(&mut self, registry: &ScriptRegistry) -> PauseStep {
        let Some(workaround) = self.workaround.as_mut() else {
            return PauseStep::Nothing;
        };
        workaround.outstanding = workaround.outstanding.saturating_sub(1);
        if workaround.outstanding == 0 {
            self.finish(registry)
        } else {
            PauseStep::Nothing
        }
    }

    fn finish(&mut self, registry: &ScriptRegistry) -> PauseStep {
        let Some(workaround) = self.workaround.take() else {
            return PauseStep::Nothing;
        };

        let entries: Vec<_> = workaround.entries.into_iter().flatten().collect();
        let (frames, scope_chains) = if workaround.failed || entries.is_empty() {
            let native = native_snapshot(&workaround.native, 1, registry);
            (native.frames, native.scope_chains)
        } else {
            let frames = entries
                .iter()
                .enumerate()
                .map(|(i, e)| StackFrameRecord {
                    id: i as i64,
                    name: e.method_name.clone(),
                    position: registry.to_original(&e.file, e.line_number, e.column - 1),
                })
                .collect::<Vec<_>>();
            let scope_chains = vec![vec![]; frames.len()];
            (frames, scope_chains)
        };

        self.state = PauseState::Paused(PausedSnapshot {
            reason: StopReason::Exception,
            frames,
            scope_chains,
            is_fatal: Some(workaround.is_fatal),
            message: workaround.message,
        });
        PauseStep::Stopped
    }

    /// Back to running. Returns true if the machine was paused or about to be.
    pub fn resume(&mut self) -> bool {
        let was_paused = self.is_paused() || self.workaround.is_some();
        self.workaround = None;
        if !self.is_disconnected() {
            self.state = PauseState::Running;
        }
        was_paused
    }

    pub fn disconnect(&mut self) {
        self.workaround = None;
        self.state = PauseState::Disconnected;
    }
}

fn native_snapshot(paused: &Paused, skip: usize, registry: &ScriptRegistry) -> PausedSnapshot {
    let frames = paused.call_frames.iter().skip(skip);
    PausedSnapshot {
        reason: StopReason::Breakpoint,
        frames: frames
            .clone()
            .enumerate()
            .map(|(i, f)| StackFrameRecord {
                id: i as i64,
                name: f.function_name.clone(),
                position: registry.to_original(
                    &f.location.script_id,
                    f.location.line_number + 1,
                    f.location.column_number,
                ),
            })
            .collect(),
        scope_chains: frames.map(|f| f.scope_chain.clone()).collect(),
        is_fatal: None,
        message: None,
    }
}

fn primitive(result: &GetPropertiesResult, name: &str) -> Option<Value> {
    let object: &RemoteObject = result.property(name)?;
    object.value.clone()
}

fn string_property(result: &GetPropertiesResult, name: &str) -> Option<String> {
    primitive(result, name)?.as_str().map(ToString::to_string)
}

fn number_property(result: &GetPropertiesResult, name: &str) -> Option<i64> {
    let value = primitive(result, name)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::SourceMap;
    use crate::sourcemap::translate::UNRESOLVED_SOURCE;
    use serde_json::json;

    fn registry() -> ScriptRegistry {
        let sm = json!({"version": 3, "sources": ["app.ts"], "mappings": ";;;;;;;;;KAEC"});
        let mut registry = ScriptRegistry::default();
        registry.register("bundle.js", "1", SourceMap::from_slice(sm.to_string().as_bytes()).unwrap());
        registry
    }

    fn paused(frames: Value) -> Paused {
        serde_json::from_value(json!({"reason": "other", "callFrames": frames})).unwrap()
    }

    fn props(value: Value) -> Option<GetPropertiesResult> {
        Some(serde_json::from_value(json!({ "result": value })).unwrap())
    }

    fn workaround_pause() -> Paused {
        paused(json!([
            {"functionName": "__RNIDE_breakOnError", "location": {"scriptId": "1", "lineNumber": 9, "columnNumber": 5},
             "scopeChain": [{"type": "local", "object": {"type": "object", "objectId": "scope-1"}}]},
            {"functionName": "caller", "location": {"scriptId": "1", "lineNumber": 9, "columnNumber": 6},
             "scopeChain": []}
        ]))
    }

    fn fetches(step: PauseStep) -> Vec<PropertyFetch> {
        match step {
            PauseStep::Fetch(f) => f,
            other => panic!("fetch expected, got {other:?}"),
        }
    }

    #[test]
    fn test_normal_pause() {
        let registry = registry();
        let mut machine = PauseMachine::new("__RNIDE_breakOnError");
        let step = machine.on_paused(
            paused(json!([
                {"functionName": "onPress", "location": {"scriptId": "1", "lineNumber": 9, "columnNumber": 5}},
                {"functionName": "", "location": {"scriptId": "42", "lineNumber": 0, "columnNumber": 0}}
            ])),
            &registry,
        );
        assert!(matches!(step, PauseStep::Stopped));

        let snapshot = machine.snapshot().unwrap();
        assert_eq!(snapshot.reason, StopReason::Breakpoint);
        assert_eq!(snapshot.frames.len(), 2);
        assert_eq!(snapshot.frames[0].name, "onPress");
        assert_eq!(snapshot.frames[0].position.source, "app.ts");
        assert_eq!(snapshot.frames[0].position.line1, 3);
        assert_eq!(snapshot.frames[1].position.source, UNRESOLVED_SOURCE);
        assert_eq!(snapshot.is_fatal, None);
    }

    #[test]
    fn test_resume_clears_frames() {
        let registry = registry();
        let mut machine = PauseMachine::new("x");
        machine.on_paused(
            paused(json!([{"functionName": "f", "location": {"scriptId": "1", "lineNumber": 9}}])),
            &registry,
        );
        assert!(machine.resume());
        assert!(machine.snapshot().is_none());
        assert!(!machine.resume());
    }

    #[test]
    fn test_workaround_pause_collects_error_stack() {
        let registry = registry();
        let mut machine = PauseMachine::new("__RNIDE_breakOnError");
        let scope = fetches(machine.on_paused(workaround_pause(), &registry));
        assert_eq!(scope[0].object_id(), "scope-1");
        assert!(!machine.is_paused());

        let stack = fetches(machine.on_properties(
            &scope[0],
            props(json!([
                {"name": "message", "value": {"type": "string", "value": "boom"}},
                {"name": "isFatal", "value": {"type": "boolean", "value": true}},
                {"name": "stack", "value": {"type": "object", "subtype": "array", "objectId": "stack-1"}}
            ])),
            &registry,
        ));
        assert_eq!(stack[0].object_id(), "stack-1");

        let entries = fetches(machine.on_properties(
            &stack[0],
            props(json!([
                {"name": "0", "value": {"type": "object", "objectId": "e0"}},
                {"name": "1", "value": {"type": "object", "objectId": "e1"}},
                {"name": "length", "value": {"type": "number", "value": 2}}
            ])),
            &registry,
        ));
        assert_eq!(entries.len(), 2);

        let step = machine.on_properties(
            &entries[1],
            props(json!([
                {"name": "methodName", "value": {"type": "string", "value": "outer"}},
                {"name": "file", "value": {"type": "string", "value": "http://elsewhere/x.js"}},
                {"name": "lineNumber", "value": {"type": "number", "value": 7}},
                {"name": "column", "value": {"type": "number", "value": 3}}
            ])),
            &registry,
        );
        assert!(matches!(step, PauseStep::Nothing));

        let step = machine.on_properties(
            &entries[0],
            props(json!([
                {"name": "methodName", "value": {"type": "string", "value": "throwing"}},
                {"name": "file", "value": {"type": "string", "value": "bundle.js"}},
                {"name": "lineNumber", "value": {"type": "number", "value": 10}},
                {"name": "column", "value": {"type": "number", "value": 6}}
            ])),
            &registry,
        );
        assert!(matches!(step, PauseStep::Stopped));

        let snapshot = machine.snapshot().unwrap();
        assert_eq!(snapshot.reason, StopReason::Exception);
        assert_eq!(snapshot.is_fatal, Some(true));
        assert_eq!(snapshot.message.as_deref(), Some("boom"));
        assert_eq!(snapshot.frames.len(), 2);
        assert_eq!(snapshot.frames[0].name, "throwing");
        assert_eq!(
            (snapshot.frames[0].position.source.as_str(), snapshot.frames[0].position.line1),
            ("app.ts", 3)
        );
        assert_eq!(snapshot.frames[1].position.line1, 7);
        assert_eq!(snapshot.frames[1].position.column0, 2);
    }

    #[test]
    fn test_workaround_falls_back_to_native_frames() {
        let registry = registry();
        let mut machine = PauseMachine::new("__RNIDE_breakOnError");
        let scope = fetches(machine.on_paused(workaround_pause(), &registry));
        let step = machine.on_properties(&scope[0], None, &registry);
        assert!(matches!(step, PauseStep::Stopped));

        let snapshot = machine.snapshot().unwrap();
        assert_eq!(snapshot.reason, StopReason::Exception);
        assert_eq!(snapshot.is_fatal, Some(false));
        assert_eq!(snapshot.frames.len(), 1);
        assert_eq!(snapshot.frames[0].name, "caller");
    }

    #[test]
    fn test_failed_entry_waits_for_the_others_then_falls_back() {
        let registry = registry();
        let mut machine = PauseMachine::new("__RNIDE_breakOnError");
        let scope = fetches(machine.on_paused(workaround_pause(), &registry));
        let stack = fetches(machine.on_properties(
            &scope[0],
            props(json!([
                {"name": "message", "value": {"type": "string", "value": "boom"}},
                {"name": "isFatal", "value": {"type": "boolean", "value": true}},
                {"name": "stack", "value": {"type": "object", "objectId": "stack-1"}}
            ])),
            &registry,
        ));
        let entries = fetches(machine.on_properties(
            &stack[0],
            props(json!([
                {"name": "0", "value": {"type": "object", "objectId": "e0"}},
                {"name": "1", "value": {"type": "object", "objectId": "e1"}},
                {"name": "2", "value": {"type": "object", "objectId": "e2"}}
            ])),
            &registry,
        ));
        assert_eq!(entries.len(), 3);

        let entry = |name: &str| {
            props(json!([
                {"name": "methodName", "value": {"type": "string", "value": name}},
                {"name": "file", "value": {"type": "string", "value": "bundle.js"}},
                {"name": "lineNumber", "value": {"type": "number", "value": 10}},
                {"name": "column", "value": {"type": "number", "value": 6}}
            ]))
        };
        assert!(matches!(machine.on_properties(&entries[1], None, &registry), PauseStep::Nothing));
        assert!(!machine.is_paused());
        assert!(matches!(
            machine.on_properties(&entries[0], entry("first"), &registry),
            PauseStep::Nothing
        ));
        assert!(matches!(
            machine.on_properties(&entries[2], entry("third"), &registry),
            PauseStep::Stopped
        ));

        let snapshot = machine.snapshot().unwrap();
        assert_eq!(snapshot.reason, StopReason::Exception);
        assert_eq!(snapshot.is_fatal, Some(true));
        assert_eq!(snapshot.message.as_deref(), Some("boom"));
        assert_eq!(snapshot.frames.len(), 1);
        assert_eq!(snapshot.frames[0].name, "caller");
    }

    #[test]
    fn test_stale_fetch_after_resume_is_ignored() {
        let registry = registry();
        let mut machine = PauseMachine::new("__RNIDE_breakOnError");
        let scope = fetches(machine.on_paused(workaround_pause(), &registry));
        assert!(machine.resume());
        let step = machine.on_properties(&scope[0], props(json!([])), &registry);
        assert!(matches!(step, PauseStep::Nothing));
        assert!(!machine.is_paused());
    }

    #[test]
    fn test_disconnected_is_final() {
        let registry = registry();
        let mut machine = PauseMachine::new("x");
        machine.disconnect();
        let step = machine.on_paused(
            paused(json!([{"functionName": "f", "location": {"scriptId": "1", "lineNumber": 9}}])),
            &registry,
        );
        assert!(matches!(step, PauseStep::Nothing));
        machine.resume();
        assert!(machine.is_disconnected());
    }

    #[test]
    fn test_frame_to_dap_uses_client_basis() {
        let frame = StackFrameRecord {
            id: 0,
            name: "f".into(),
            position: OriginalPosition {
                source: "app.ts".into(),
                line1: 3,
                column0: 1,
                script_url: "bundle.js".into(),
            },
        };
        let one = frame.to_dap(ClientBasis::default());
        assert_eq!((one["line"].as_i64(), one["column"].as_i64()), (Some(3), Some(2)));
        let zero = frame.to_dap(ClientBasis {
            lines_start_at1: false,
            columns_start_at1: false,
        });
        assert_eq!((zero["line"].as_i64(), zero["column"].as_i64()), (Some(2), Some(1)));
        assert_eq!(one["source"]["path"], "app.ts");
        assert!(one.get("presentationHint").is_none());
    }

    #[test]
    fn test_unresolved_frame_has_no_source() {
        let frame = StackFrameRecord {
            id: 1,
            name: "native".into(),
            position: OriginalPosition {
                source: UNRESOLVED_SOURCE.into(),
                line1: 5,
                column0: 0,
                script_url: "bundle.js".into(),
            },
        };
        let dap = frame.to_dap(ClientBasis::default());
        assert!(dap.get("source").is_none());
        assert_eq!(dap["presentationHint"], "subtle");
        assert_eq!(dap["line"], 5);
    }
}
