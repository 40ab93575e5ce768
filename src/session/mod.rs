//! Debug session core.
//!
//! All state of one front end connection lives in [`DebugSession`]. The session is driven
//! by [`SessionInput`]s taken off a single queue and answers with [`Outgoing`] items the
//! caller drains after every input: DAP messages to write, runtime commands to send and
//! connection changes to perform. Nothing in here blocks or does I/O.

mod handlers;
mod runtime;

use crate::breakpoint::{BreakpointCommand, BreakpointManager};
use crate::cdp::CdpCommand;
use crate::cdp::rpc::RpcChannel;
use crate::config::AdapterConfig;
use crate::console::ConsoleRelay;
use crate::dap::protocol::{DapEvent, DapRequest, DapResponse};
use crate::pause::{PauseMachine, PropertyFetch};
use crate::sourcemap::registry::ScriptRegistry;
use crate::sourcemap::translate::ClientBasis;
use crate::weak_error;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};

/// Error message for requests that arrive after the runtime went away.
pub const TERMINATED_MESSAGE: &str = "debug session terminated";

/// Everything the session reacts to, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// Raw DAP message from the front end.
    Dap(Value),
    /// Raw CDP text frame from the runtime.
    Runtime(String),
    RuntimeConnected,
    RuntimeConnectFailed(String),
    RuntimeClosed,
    DapClosed,
}

/// Effects requested by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Dap(Value),
    Runtime(CdpCommand),
    ConnectRuntime(String),
    CloseRuntime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connection {
    Idle,
    Connecting,
    Connected,
    Closed,
}

/// What a pending runtime command is for.
#[derive(Debug, Clone)]
enum Purpose {
    Setup,
    SetBreakpoint { record_id: i64, epoch: u64 },
    RemoveBreakpoint,
    Resume,
    Step,
    Evaluate,
    Properties(PropertyFetch),
}

/// DAP request whose response waits on the runtime.
#[derive(Debug)]
struct InFlight {
    request: DapRequest,
    awaiting: HashSet<i64>,
    connecting: bool,
    result: Option<Value>,
    error: Option<String>,
}

/// Debug session state for a single front end.
pub struct DebugSession {
    server_seq: i64,
    config: AdapterConfig,
    basis: ClientBasis,
    connection: Connection,
    terminated: bool,
    rpc: RpcChannel<Purpose>,
    registry: ScriptRegistry,
    breakpoints: BreakpointManager,
    pause: PauseMachine,
    console: ConsoleRelay,
    /// Execution contexts reported by the runtime, shown as threads.
    threads: Vec<(i64, String)>,
    in_flight: Option<InFlight>,
    queued: VecDeque<DapRequest>,
    outbox: Vec<Outgoing>,
}

impl DebugSession {
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            server_seq: 1,
            basis: ClientBasis::default(),
            connection: Connection::Idle,
            terminated: false,
            rpc: RpcChannel::new(),
            registry: ScriptRegistry::new(
                config.source_map_path_overrides.clone(),
                config.expo_prelude_line_count,
            ),
            breakpoints: BreakpointManager::new(),
            pause: PauseMachine::new(config.exception_break_function.clone()),
            console: ConsoleRelay::new(config.internal_log_marker.clone(), &config.skip_files),
            threads: vec![],
            in_flight: None,
            queued: VecDeque::new(),
            outbox: vec![],
            config,
        }
    }

    /// Effects produced since the last call.
    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// React to one input. Returns false once the session is over.
    pub fn handle(&mut self, input: SessionInput) -> bool {
        match input {
            SessionInput::Dap(msg) => {
                let Some(req) = weak_error!(
                    serde_json::from_value::<DapRequest>(msg),
                    "malformed DAP message:"
                ) else {
                    return true;
                };
                if req.r#type != "request" {
                    return true;
                }
                if req.command == "disconnect" {
                    // never waits on the runtime, pending requests are failed instead
                    self.abort_in_flight(TERMINATED_MESSAGE);
                    for pending in std::mem::take(&mut self.queued) {
                        self.send_err(&pending, TERMINATED_MESSAGE);
                    }
                    return self.process(req);
                }
                if self.in_flight.is_some() {
                    log::debug!(target: "session", "queue `{}` behind an in-flight request", req.command);
                    self.queued.push_back(req);
                    return true;
                }
                if !self.process(req) {
                    return false;
                }
            }
            SessionInput::Runtime(text) => self.on_runtime_message(&text),
            SessionInput::RuntimeConnected => self.on_runtime_connected(),
            SessionInput::RuntimeConnectFailed(error) => self.on_runtime_connect_failed(error),
            SessionInput::RuntimeClosed => self.on_runtime_closed(),
            SessionInput::DapClosed => {
                log::info!(target: "session", "front end went away");
                if self.connection == Connection::Connected {
                    self.outbox.push(Outgoing::CloseRuntime);
                }
                return false;
            }
        }
        self.drain_queue()
    }

    /// Service queued requests until one of them has to wait.
    fn drain_queue(&mut self) -> bool {
        while self.in_flight.is_none() {
            let Some(req) = self.queued.pop_front() else {
                break;
            };
            if !self.process(req) {
                return false;
            }
        }
        true
    }

    fn process(&mut self, req: DapRequest) -> bool {
        if self.terminated && req.command != "disconnect" {
            self.send_err(&req, TERMINATED_MESSAGE);
            return true;
        }
        match self.dispatch(&req) {
            Ok(cont) => cont,
            Err(e) => {
                self.in_flight = None;
                self.send_err(&req, format!("{e:#}"));
                true
            }
        }
    }

    // ------------------------------------ outgoing ----------------------------------------------

    fn next_seq(&mut self) -> i64 {
        let s = self.server_seq;
        self.server_seq += 1;
        s
    }

    fn push_dap<T: Serialize>(&mut self, message: &T) {
        if let Some(value) = weak_error!(serde_json::to_value(message)) {
            self.outbox.push(Outgoing::Dap(value));
        }
    }

    fn send_success(&mut self, req: &DapRequest) {
        self.send_response_raw(req, true, None, None)
    }

    fn send_success_body(&mut self, req: &DapRequest, body: Value) {
        self.send_response_raw(req, true, None, Some(body))
    }

    fn send_err(&mut self, req: &DapRequest, message: impl ToString) {
        self.send_response_raw(req, false, Some(message.to_string()), None)
    }

    fn send_response_raw(
        &mut self,
        req: &DapRequest,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) {
        let rsp = DapResponse {
            seq: self.next_seq(),
            r#type: "response",
            request_seq: req.seq,
            success,
            command: req.command.clone(),
            message,
            body,
        };
        self.push_dap(&rsp);
    }

    fn send_event(&mut self, name: &'static str) {
        self.send_event_raw(name, None)
    }

    fn send_event_body(&mut self, name: &'static str, body: Value) {
        self.send_event_raw(name, Some(body))
    }

    fn send_event_raw(&mut self, name: &'static str, body: Option<Value>) {
        let ev = DapEvent {
            seq: self.next_seq(),
            r#type: "event",
            event: name,
            body,
        };
        self.push_dap(&ev);
    }

    /// Queue a runtime command, returns its id.
    fn send_rpc(&mut self, method: &str, params: Value, purpose: Purpose) -> i64 {
        let command = self.rpc.send(method, params, purpose);
        let id = command.id;
        log::trace!(target: "cdp", "-> {} #{id}", command.method);
        self.outbox.push(Outgoing::Runtime(command));
        id
    }

    fn send_breakpoint_commands(&mut self, commands: Vec<BreakpointCommand>) -> Vec<i64> {
        commands
            .into_iter()
            .map(|command| {
                let (method, params) = command.method_and_params();
                let purpose = match command {
                    BreakpointCommand::Set {
                        record_id, epoch, ..
                    } => Purpose::SetBreakpoint { record_id, epoch },
                    BreakpointCommand::Remove { .. } => Purpose::RemoveBreakpoint,
                };
                self.send_rpc(method, params, purpose)
            })
            .collect()
    }

    // ------------------------------------ in-flight requests ------------------------------------

    /// Hold the response to `req` until every command in `ids` is answered.
    fn await_rpcs(&mut self, req: &DapRequest, ids: Vec<i64>) {
        self.in_flight = Some(InFlight {
            request: req.clone(),
            awaiting: ids.into_iter().collect(),
            connecting: false,
            result: None,
            error: None,
        });
        self.try_complete();
    }

    fn await_connection(&mut self, req: &DapRequest) {
        self.in_flight = Some(InFlight {
            request: req.clone(),
            awaiting: HashSet::new(),
            connecting: true,
            result: None,
            error: None,
        });
    }

    /// True when the command `id` belongs to the in-flight request.
    fn is_awaited(&self, id: i64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.awaiting.contains(&id))
    }

    fn settle_awaited(&mut self, id: i64, result: Option<&Value>, error: Option<&Value>) {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return;
        };
        if !in_flight.awaiting.remove(&id) {
            return;
        }
        if let Some(result) = result {
            in_flight.result = Some(result.clone());
        }
        if let Some(error) = error {
            in_flight.error = Some(
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| error.to_string()),
            );
        }
        self.try_complete();
    }

    fn try_complete(&mut self) {
        let ready = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.awaiting.is_empty() && !f.connecting);
        if !ready {
            return;
        }
        let Some(InFlight {
            request,
            result,
            error,
            ..
        }) = self.in_flight.take()
        else {
            return;
        };
        if let Err(e) = self.complete(&request, result, error) {
            self.send_err(&request, format!("{e:#}"));
        }
    }

    /// Fail the in-flight request, if any.
    fn abort_in_flight(&mut self, message: &str) {
        if let Some(in_flight) = self.in_flight.take() {
            self.send_err(&in_flight.request, message);
        }
    }

    fn current_thread_id(&self) -> i64 {
        self.threads.first().map(|(id, _)| *id).unwrap_or(1)
    }
}
