//! Runtime-side debugging protocol (CDP) messages.

pub mod rpc;
pub mod transport;

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod method {
    pub const RUNTIME_ENABLE: &str = "Runtime.enable";
    pub const RUNTIME_RUN_IF_WAITING: &str = "Runtime.runIfWaitingForDebugger";
    pub const RUNTIME_GET_PROPERTIES: &str = "Runtime.getProperties";
    pub const RUNTIME_EVALUATE: &str = "Runtime.evaluate";
    pub const DEBUGGER_ENABLE: &str = "Debugger.enable";
    pub const DEBUGGER_SET_PAUSE_ON_EXCEPTIONS: &str = "Debugger.setPauseOnExceptions";
    pub const DEBUGGER_SET_ASYNC_STACK_DEPTH: &str = "Debugger.setAsyncCallStackDepth";
    pub const DEBUGGER_SET_BLACKBOX_PATTERNS: &str = "Debugger.setBlackboxPatterns";
    pub const DEBUGGER_SET_BREAKPOINT_BY_URL: &str = "Debugger.setBreakpointByUrl";
    pub const DEBUGGER_REMOVE_BREAKPOINT: &str = "Debugger.removeBreakpoint";
    pub const DEBUGGER_RESUME: &str = "Debugger.resume";
    pub const DEBUGGER_PAUSE: &str = "Debugger.pause";
    pub const DEBUGGER_STEP_OVER: &str = "Debugger.stepOver";
    pub const DEBUGGER_STEP_INTO: &str = "Debugger.stepInto";
    pub const DEBUGGER_STEP_OUT: &str = "Debugger.stepOut";

    pub const SCRIPT_PARSED: &str = "Debugger.scriptParsed";
    pub const PAUSED: &str = "Debugger.paused";
    pub const RESUMED: &str = "Debugger.resumed";
    pub const CONSOLE_API_CALLED: &str = "Runtime.consoleAPICalled";
    pub const EXECUTION_CONTEXT_CREATED: &str = "Runtime.executionContextCreated";
    pub const EXECUTION_CONTEXTS_CLEARED: &str = "Runtime.executionContextsCleared";
}

/// Outgoing runtime command.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CdpCommand {
    pub id: i64,
    pub method: String,
    pub params: Value,
}

/// Incoming runtime message, either a command reply or an event.
#[derive(Debug, Clone)]
pub enum CdpMessage {
    Response {
        id: i64,
        result: Option<Value>,
        error: Option<Value>,
    },
    Event(RuntimeEvent),
}

#[derive(Deserialize)]
struct RawMessage {
    id: Option<i64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<Value>,
}

impl CdpMessage {
    pub fn parse(text: &str) -> Result<Self, Error> {
        let raw: RawMessage = serde_json::from_str(text)?;
        if let Some(id) = raw.id {
            return Ok(CdpMessage::Response {
                id,
                result: raw.result,
                error: raw.error,
            });
        }
        let method = raw
            .method
            .ok_or_else(|| Error::MalformedRuntimeMessage("neither id nor method".to_string()))?;
        Ok(CdpMessage::Event(RuntimeEvent::from_method(method, raw.params)?))
    }
}

/// Runtime events the bridge reacts to.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    ScriptParsed(ScriptParsed),
    Paused(Paused),
    Resumed,
    ConsoleApiCalled(ConsoleApiCalled),
    ExecutionContextCreated(ExecutionContextDescription),
    ExecutionContextsCleared,
    Other(String),
}

impl RuntimeEvent {
    pub fn from_method(method: String, params: Value) -> Result<Self, Error> {
        let event = match method.as_str() {
            method::SCRIPT_PARSED => RuntimeEvent::ScriptParsed(serde_json::from_value(params)?),
            method::PAUSED => RuntimeEvent::Paused(serde_json::from_value(params)?),
            method::RESUMED => RuntimeEvent::Resumed,
            method::CONSOLE_API_CALLED => {
                RuntimeEvent::ConsoleApiCalled(serde_json::from_value(params)?)
            }
            method::EXECUTION_CONTEXT_CREATED => {
                let created: ExecutionContextCreated = serde_json::from_value(params)?;
                RuntimeEvent::ExecutionContextCreated(created.context)
            }
            method::EXECUTION_CONTEXTS_CLEARED => RuntimeEvent::ExecutionContextsCleared,
            _ => RuntimeEvent::Other(method),
        };
        Ok(event)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsed {
    pub script_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "sourceMapURL")]
    pub source_map_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paused {
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub call_frame_id: String,
    #[serde(default)]
    pub function_name: String,
    pub location: Location,
    #[serde(default)]
    pub scope_chain: Vec<Scope>,
}

/// 0-based script location.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub script_id: String,
    pub line_number: i64,
    #[serde(default)]
    pub column_number: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scope {
    #[serde(rename = "type")]
    pub kind: String,
    pub object: RemoteObject,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub unserializable_value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub preview: Option<ObjectPreview>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectPreview {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub overflow: bool,
    #[serde(default)]
    pub properties: Vec<PropertyPreview>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyPreview {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalled {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: Vec<RemoteObject>,
    #[serde(default)]
    pub stack_trace: Option<StackTrace>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    #[serde(default)]
    pub call_frames: Vec<RuntimeCallFrame>,
}

/// Frame of a runtime stack trace, 0-based.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeCallFrame {
    #[serde(default)]
    pub function_name: String,
    pub script_id: String,
    #[serde(default)]
    pub url: String,
    pub line_number: i64,
    #[serde(default)]
    pub column_number: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct ExecutionContextCreated {
    context: ExecutionContextDescription,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionContextDescription {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub value: Option<RemoteObject>,
}

/// Result of `Runtime.getProperties`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetPropertiesResult {
    #[serde(default)]
    pub result: Vec<PropertyDescriptor>,
}

impl GetPropertiesResult {
    pub fn property(&self, name: &str) -> Option<&RemoteObject> {
        self.result
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_ref())
    }
}
