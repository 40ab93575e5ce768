//! DAP request handlers.

use super::{Connection, DebugSession, Purpose};
use crate::breakpoint::SourceBreakpoint;
use crate::cdp::{RemoteObject, method};
use crate::console;
use crate::dap::protocol::{DapRequest, event};
use crate::sourcemap::translate::ClientBasis;
use anyhow::{anyhow, bail};
use serde_json::{Value, json};

impl DebugSession {
    /// Returns false when the session should end.
    pub(super) fn dispatch(&mut self, req: &DapRequest) -> anyhow::Result<bool> {
        match req.command.as_str() {
            "initialize" => self.handle_initialize(req),
            "launch" | "attach" => self.handle_launch(req)?,
            "configurationDone" => self.send_success(req),
            "setBreakpoints" => self.handle_set_breakpoints(req)?,
            "setExceptionBreakpoints" => {
                self.send_success_body(req, json!({"breakpoints": []}))
            }
            "threads" => self.handle_threads(req),
            "stackTrace" => self.handle_stack_trace(req),
            "scopes" => self.handle_scopes(req)?,
            "variables" => self.send_success_body(req, json!({"variables": []})),
            "continue" => self.handle_continue(req)?,
            "next" => self.handle_step(req, method::DEBUGGER_STEP_OVER)?,
            "stepIn" => self.handle_step(req, method::DEBUGGER_STEP_INTO)?,
            "stepOut" => self.handle_step(req, method::DEBUGGER_STEP_OUT)?,
            "pause" => self.handle_step(req, method::DEBUGGER_PAUSE)?,
            "evaluate" => self.handle_evaluate(req)?,
            "source" => self.handle_source(req)?,
            "disconnect" => {
                self.handle_disconnect(req);
                return Ok(false);
            }
            other => {
                self.send_err(req, format!("Unsupported DAP command: {other}"));
            }
        }
        Ok(true)
    }

    /// Second step of a request that waited on the runtime.
    pub(super) fn complete(
        &mut self,
        req: &DapRequest,
        result: Option<Value>,
        error: Option<String>,
    ) -> anyhow::Result<()> {
        match req.command.as_str() {
            "launch" | "attach" => self.send_success(req),
            "setBreakpoints" => {
                let source_path = set_breakpoints_path(req)?;
                self.respond_breakpoints(req, &source_path);
            }
            "continue" => {
                self.pause.resume();
                self.send_success_body(req, json!({"allThreadsContinued": true}));
                self.send_event_body(event::SESSION_CONTINUED, json!({}));
            }
            "evaluate" => match (error, result) {
                (Some(error), _) => self.send_err(req, error),
                (None, result) => self.respond_evaluate(req, result.unwrap_or_default())?,
            },
            _ => self.send_success(req),
        }
        Ok(())
    }

    fn handle_initialize(&mut self, req: &DapRequest) {
        let flag = |name: &str| req.arguments.get(name).and_then(Value::as_bool).unwrap_or(true);
        self.basis = ClientBasis {
            lines_start_at1: flag("linesStartAt1"),
            columns_start_at1: flag("columnsStartAt1"),
        };

        let body = json!({
            "supportsConfigurationDoneRequest": true,
            "supportsEvaluateForHovers": true,
            "supportsSetVariable": false,
            "supportsStepBack": false,
            "supportsRestartRequest": false,
            "supportsTerminateRequest": false,
        });
        self.send_success_body(req, body);
        self.send_event(event::INITIALIZED)
    }

    fn handle_launch(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.config.apply_launch_arguments(&req.arguments);
        self.registry.reconfigure(
            self.config.source_map_path_overrides.clone(),
            self.config.expo_prelude_line_count,
        );
        self.console
            .reconfigure(&self.config.internal_log_marker, &self.config.skip_files);

        match self.connection {
            Connection::Connected => {
                self.send_success(req);
                return Ok(());
            }
            Connection::Connecting => bail!("{}: already connecting", req.command),
            Connection::Idle | Connection::Closed => {}
        }

        let address = self
            .config
            .websocket_address
            .clone()
            .ok_or_else(|| anyhow!("{}: missing websocketAddress", req.command))?;
        log::info!(target: "session", "connecting to runtime at {address}");
        self.connection = Connection::Connecting;
        self.outbox.push(super::Outgoing::ConnectRuntime(address));
        self.await_connection(req);
        Ok(())
    }

    fn handle_set_breakpoints(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let source_path = set_breakpoints_path(req)?;
        let requested: Vec<SourceBreakpoint> = req
            .arguments
            .get("breakpoints")
            .and_then(Value::as_array)
            .map(|bps| bps.iter().filter_map(SourceBreakpoint::from_dap).collect())
            .unwrap_or_default();

        let commands =
            self.breakpoints
                .set_breakpoints(&source_path, &requested, self.basis, &self.registry);
        let ids = self.send_breakpoint_commands(commands);
        self.await_rpcs(req, ids);
        Ok(())
    }

    fn respond_breakpoints(&mut self, req: &DapRequest, source_path: &str) {
        let breakpoints: Vec<Value> = self
            .breakpoints
            .records(source_path)
            .iter()
            .map(|r| r.to_dap())
            .collect();
        self.send_success_body(req, json!({"breakpoints": breakpoints}))
    }

    fn handle_threads(&mut self, req: &DapRequest) {
        let threads: Vec<Value> = if self.threads.is_empty() {
            vec![json!({"id": 1, "name": "main"})]
        } else {
            self.threads
                .iter()
                .map(|(id, name)| json!({"id": id, "name": name}))
                .collect()
        };
        self.send_success_body(req, json!({"threads": threads}))
    }

    fn handle_stack_trace(&mut self, req: &DapRequest) {
        let start = req
            .arguments
            .get("startFrame")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let levels = req
            .arguments
            .get("levels")
            .and_then(Value::as_u64)
            .filter(|l| *l > 0)
            .map(|l| l as usize);

        let (frames, total) = match self.pause.snapshot() {
            Some(snapshot) => {
                let frames = snapshot
                    .frames
                    .iter()
                    .skip(start)
                    .take(levels.unwrap_or(usize::MAX))
                    .map(|f| f.to_dap(self.basis))
                    .collect::<Vec<_>>();
                (frames, snapshot.frames.len())
            }
            None => (vec![], 0),
        };
        self.send_success_body(req, json!({"stackFrames": frames, "totalFrames": total}))
    }

    fn handle_scopes(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let frame_id = req
            .arguments
            .get("frameId")
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("scopes: missing arguments.frameId"))?;

        let scopes: Vec<Value> = self
            .pause
            .snapshot()
            .and_then(|s| s.scope_chains.get(frame_id as usize))
            .map(|chain| {
                chain
                    .iter()
                    .map(|scope| {
                        let name = match (scope.kind.as_str(), &scope.name) {
                            ("closure", _) => "CLOSURE".to_string(),
                            (_, Some(name)) if !name.is_empty() => name.clone(),
                            (kind, _) => kind.to_uppercase(),
                        };
                        let mut body = json!({
                            "name": name,
                            "variablesReference": 0,
                            "expensive": scope.kind != "local",
                        });
                        if scope.kind == "local" {
                            body["presentationHint"] = json!("locals");
                        }
                        body
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.send_success_body(req, json!({"scopes": scopes}));
        Ok(())
    }

    fn require_runtime(&self, command: &str) -> anyhow::Result<()> {
        if self.connection != Connection::Connected {
            bail!("{command}: runtime not connected");
        }
        Ok(())
    }

    fn handle_continue(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.require_runtime("continue")?;
        let id = self.send_rpc(
            method::DEBUGGER_RESUME,
            json!({"terminateOnResume": false}),
            Purpose::Resume,
        );
        self.await_rpcs(req, vec![id]);
        Ok(())
    }

    fn handle_step(&mut self, req: &DapRequest, method: &str) -> anyhow::Result<()> {
        self.require_runtime(&req.command)?;
        let id = self.send_rpc(method, json!({}), Purpose::Step);
        self.await_rpcs(req, vec![id]);
        Ok(())
    }

    fn handle_evaluate(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let expression = req
            .arguments
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("evaluate: missing arguments.expression"))?;
        self.require_runtime("evaluate")?;

        let id = self.send_rpc(
            method::RUNTIME_EVALUATE,
            json!({"expression": expression, "generatePreview": true}),
            Purpose::Evaluate,
        );
        self.await_rpcs(req, vec![id]);
        Ok(())
    }

    fn respond_evaluate(&mut self, req: &DapRequest, result: Value) -> anyhow::Result<()> {
        if let Some(details) = result.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("evaluation failed");
            self.send_err(req, message);
            return Ok(());
        }

        let object: RemoteObject = serde_json::from_value(
            result
                .get("result")
                .cloned()
                .ok_or_else(|| anyhow!("evaluate: runtime returned no result"))?,
        )?;
        self.send_success_body(
            req,
            json!({
                "result": console::render(&object),
                "type": object.kind,
                "variablesReference": 0,
            }),
        );
        Ok(())
    }

    /// Original position of a generated one, for clients that show runtime locations.
    fn handle_source(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let file_name = req
            .arguments
            .get("fileName")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("source: missing arguments.fileName"))?;
        let line = req
            .arguments
            .get("line0Based")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let column = req
            .arguments
            .get("column0Based")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let position = self.registry.to_original(file_name, line, column);
        self.send_success_body(
            req,
            json!({
                "sourceURL": position.source,
                "lineNumber1Based": position.line1,
                "columnNumber0Based": position.column0,
                "scriptURL": position.script_url,
            }),
        );
        Ok(())
    }

    fn handle_disconnect(&mut self, req: &DapRequest) {
        if matches!(self.connection, Connection::Connected | Connection::Connecting) {
            self.outbox.push(super::Outgoing::CloseRuntime);
        }
        self.connection = Connection::Closed;
        self.pause.disconnect();
        self.send_success(req)
    }
}

fn set_breakpoints_path(req: &DapRequest) -> anyhow::Result<String> {
    req.arguments
        .get("source")
        .and_then(|s| s.get("path"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("setBreakpoints: missing arguments.source.path"))
}
