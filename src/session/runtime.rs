//! Runtime replies and events.

use super::{Connection, DebugSession, Purpose, TERMINATED_MESSAGE};
use crate::cdp::{
    CdpMessage, ConsoleApiCalled, ExecutionContextDescription, GetPropertiesResult, RuntimeEvent,
    ScriptParsed, method,
};
use crate::console::ConsoleOutput;
use crate::dap::protocol::event;
use crate::muted_error;
use crate::pause::PauseStep;
use crate::weak_error;
use serde_json::{Value, json};

impl DebugSession {
    pub(super) fn on_runtime_connected(&mut self) {
        log::info!(target: "session", "runtime connected");
        self.connection = Connection::Connected;
        self.send_setup_sequence();

        if let Some(in_flight) = self.in_flight.as_mut()
            && in_flight.connecting
        {
            in_flight.connecting = false;
            self.try_complete();
        }
    }

    pub(super) fn on_runtime_connect_failed(&mut self, error: String) {
        log::warn!(target: "session", "runtime connection failed: {error}");
        self.connection = Connection::Idle;
        if self.in_flight.as_ref().is_some_and(|f| f.connecting) {
            self.abort_in_flight(&format!("connect to runtime: {error}"));
        }
    }

    pub(super) fn on_runtime_closed(&mut self) {
        if self.terminated {
            return;
        }
        let abandoned = self.rpc.abandon();
        log::info!(target: "session", "runtime connection closed, {abandoned} command(s) abandoned");
        self.terminated = true;
        self.connection = Connection::Closed;
        self.pause.disconnect();
        self.abort_in_flight(TERMINATED_MESSAGE);
        self.send_event(event::TERMINATED);
    }

    fn send_setup_sequence(&mut self) {
        let sequence = [
            (method::RUNTIME_ENABLE, json!({})),
            (
                method::DEBUGGER_ENABLE,
                json!({"maxScriptsCacheSize": 100_000_000}),
            ),
            (
                method::DEBUGGER_SET_PAUSE_ON_EXCEPTIONS,
                json!({"state": "none"}),
            ),
            (method::DEBUGGER_SET_ASYNC_STACK_DEPTH, json!({"maxDepth": 32})),
            (method::DEBUGGER_SET_BLACKBOX_PATTERNS, json!({"patterns": []})),
            (method::RUNTIME_RUN_IF_WAITING, json!({})),
        ];
        for (method, params) in sequence {
            self.send_rpc(method, params, Purpose::Setup);
        }
    }

    pub(super) fn on_runtime_message(&mut self, text: &str) {
        if self.terminated {
            return;
        }
        let Some(message) = weak_error!(CdpMessage::parse(text), "malformed runtime message:") else {
            return;
        };
        match message {
            CdpMessage::Response { id, result, error } => self.on_rpc_response(id, result, error),
            CdpMessage::Event(e) => self.on_runtime_event(e),
        }
    }

    fn on_rpc_response(&mut self, id: i64, result: Option<Value>, error: Option<Value>) {
        let Some(purpose) = self.rpc.resolve(id) else {
            log::debug!(target: "cdp", "reply to unknown command #{id}");
            return;
        };
        if let Some(error) = &error {
            log::warn!(target: "cdp", "command #{id} ({purpose:?}) failed: {error}");
        }
        // an error reply carries no result
        let result = match error {
            Some(_) => None,
            None => Some(result.unwrap_or_else(|| json!({}))),
        };

        match purpose {
            Purpose::SetBreakpoint { record_id, epoch } => {
                let runtime_id = result
                    .as_ref()
                    .and_then(|r| r.get("breakpointId"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string);
                let outcome =
                    self.breakpoints
                        .on_bound(record_id, epoch, runtime_id, self.basis, &self.registry);
                self.send_breakpoint_commands(outcome.commands);
                if let Some(record) = outcome.record
                    && !self.is_awaited(id)
                {
                    self.send_event_body(
                        event::BREAKPOINT,
                        json!({"reason": "changed", "breakpoint": record.to_dap()}),
                    );
                }
            }
            Purpose::Properties(fetch) => {
                let properties = result.as_ref().and_then(|r| {
                    muted_error!(serde_json::from_value::<GetPropertiesResult>(r.clone()))
                });
                let step = self.pause.on_properties(&fetch, properties, &self.registry);
                self.on_pause_step(step);
            }
            Purpose::Setup
            | Purpose::RemoveBreakpoint
            | Purpose::Resume
            | Purpose::Step
            | Purpose::Evaluate => {}
        }

        self.settle_awaited(id, result.as_ref(), error.as_ref());
    }

    fn on_runtime_event(&mut self, e: RuntimeEvent) {
        match e {
            RuntimeEvent::ScriptParsed(script) => self.on_script_parsed(script),
            RuntimeEvent::Paused(paused) => {
                log::debug!(target: "session", "runtime paused, reason: {}", paused.reason);
                let step = self.pause.on_paused(paused, &self.registry);
                self.on_pause_step(step);
            }
            RuntimeEvent::Resumed => {
                self.pause.resume();
                let thread_id = self.current_thread_id();
                self.send_event_body(
                    event::CONTINUED,
                    json!({"threadId": thread_id, "allThreadsContinued": true}),
                );
            }
            RuntimeEvent::ConsoleApiCalled(call) => self.on_console_call(call),
            RuntimeEvent::ExecutionContextCreated(context) => self.on_context_created(context),
            RuntimeEvent::ExecutionContextsCleared => self.on_contexts_cleared(),
            RuntimeEvent::Other(method) => {
                log::trace!(target: "cdp", "ignored runtime event {method}");
            }
        }
    }

    fn on_script_parsed(&mut self, script: ScriptParsed) {
        let Some(source_map_url) = script.source_map_url.filter(|u| !u.is_empty()) else {
            return;
        };
        let Some(record) = weak_error!(
            self.registry
                .register_from_url(&script.url, &script.script_id, &source_map_url),
            "source map of a parsed script skipped:"
        ) else {
            return;
        };
        let sources = record.source_map.sources().to_vec();
        log::info!(target: "sourcemap", "source map registered for {} ({} sources)", script.url, sources.len());

        let covered: Vec<String> = self
            .breakpoints
            .paths()
            .filter(|path| sources.contains(&self.registry.source_map_name(path)))
            .map(ToString::to_string)
            .collect();
        let commands = self.breakpoints.rebind_sources(
            covered.iter().map(String::as_str),
            self.basis,
            &self.registry,
        );
        self.send_breakpoint_commands(commands);

        for output in self.console.set_ready(&self.registry) {
            self.send_console_output(output);
        }
    }

    fn on_pause_step(&mut self, step: PauseStep) {
        match step {
            PauseStep::Stopped => self.send_stopped(),
            PauseStep::Fetch(fetches) => {
                for fetch in fetches {
                    let params = json!({
                        "objectId": fetch.object_id(),
                        "ownProperties": true,
                        "generatePreview": true,
                    });
                    self.send_rpc(
                        method::RUNTIME_GET_PROPERTIES,
                        params,
                        Purpose::Properties(fetch),
                    );
                }
            }
            PauseStep::Nothing => {}
        }
    }

    fn send_stopped(&mut self) {
        let Some(snapshot) = self.pause.snapshot() else {
            return;
        };
        let reason = snapshot.reason.as_str();
        let is_fatal = snapshot.is_fatal;

        let mut body = json!({
            "reason": reason,
            "threadId": self.current_thread_id(),
            "allThreadsStopped": true,
        });
        if is_fatal.is_some() {
            body["description"] = json!("Uncaught exception");
            if let Some(message) = &snapshot.message {
                body["text"] = json!(message);
            }
        }
        self.send_event_body(event::STOPPED, body);

        let mut paused = json!({"reason": reason});
        if let Some(is_fatal) = is_fatal {
            paused["isFatal"] = json!(is_fatal);
        }
        self.send_event_body(event::PAUSED, paused);
    }

    fn on_console_call(&mut self, call: ConsoleApiCalled) {
        if let Some(output) = self.console.accept(call, &self.registry) {
            self.send_console_output(output);
        }
    }

    fn send_console_output(&mut self, output: ConsoleOutput) {
        let body = output.to_dap(self.basis);
        self.send_event_body(event::OUTPUT, body);
        self.send_event_body(event::CONSOLE_LOG, json!({"category": output.category}));
    }

    fn on_context_created(&mut self, context: ExecutionContextDescription) {
        let name = if context.name.is_empty() {
            format!("context {}", context.id)
        } else {
            context.name
        };
        log::debug!(target: "session", "execution context {} created: {name}", context.id);
        self.threads.push((context.id, name));
        self.send_event_body(
            event::THREAD,
            json!({"reason": "started", "threadId": context.id}),
        );
    }

    fn on_contexts_cleared(&mut self) {
        log::info!(target: "session", "execution contexts cleared");
        self.registry.clear();
        self.console.reset();

        for (id, _) in std::mem::take(&mut self.threads) {
            self.send_event_body(event::THREAD, json!({"reason": "exited", "threadId": id}));
        }
        self.send_event_body(
            event::OUTPUT,
            json!({"category": "console", "output": "\x1b[2J"}),
        );

        if self.config.breakpoints_removed_on_context_cleared {
            self.breakpoints.clear();
        } else {
            self.breakpoints.unbind_all();
        }
    }
}
