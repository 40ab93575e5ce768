//! Wiring of one debug session to its front end socket and its runtime connection.

use crate::cdp::transport::{RuntimeConnection, RuntimeSignal, WebSocketTransport};
use crate::config::AdapterConfig;
use crate::dap;
use crate::dap::tracer::FileTracer;
use crate::session::{DebugSession, Outgoing, SessionInput};
use crate::weak_error;
use anyhow::Context;
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{self, Sender};
use std::thread;

/// Serve one client until it disconnects.
///
/// The DAP reader thread and the runtime connection thread post onto one queue, the
/// calling thread owns the session and performs every write.
pub fn serve(
    stream: TcpStream,
    config: AdapterConfig,
    tracer: Option<FileTracer>,
    trace: bool,
) -> anyhow::Result<()> {
    let (mut reader, mut writer) = dap::io::split(stream, tracer, trace)?;
    let (tx, rx) = mpsc::channel();

    let dap_tx = tx.clone();
    thread::spawn(move || {
        loop {
            match reader.read_message() {
                Ok(msg) => {
                    if dap_tx.send(SessionInput::Dap(msg)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::debug!(target: "dap", "client read ended: {e:#}");
                    let _ = dap_tx.send(SessionInput::DapClosed);
                    break;
                }
            }
        }
    });

    let mut session = DebugSession::new(config);
    let mut runtime: Option<RuntimeConnection> = None;
    let result = (|| -> anyhow::Result<()> {
        while let Ok(input) = rx.recv() {
            let cont = session.handle(input);
            for out in session.take_outgoing() {
                match out {
                    Outgoing::Dap(message) => writer
                        .write_message(&message)
                        .context("write DAP message")?,
                    Outgoing::Runtime(command) => match &runtime {
                        Some(connection) => {
                            let text = serde_json::to_string(&command)?;
                            weak_error!(connection.send(text), "runtime send:");
                        }
                        None => {
                            log::warn!(target: "cdp", "{} dropped, runtime not connected", command.method)
                        }
                    },
                    Outgoing::ConnectRuntime(address) => {
                        if let Some(old) = runtime.take() {
                            old.close();
                        }
                        runtime = connect(&address, &tx);
                    }
                    Outgoing::CloseRuntime => {
                        if let Some(connection) = runtime.take() {
                            connection.close();
                        }
                    }
                }
            }
            if !cont {
                break;
            }
        }
        Ok(())
    })();

    if let Some(connection) = runtime.take() {
        connection.close();
    }
    // unblocks the reader thread
    let _ = writer.into_inner().shutdown(Shutdown::Both);
    result
}

fn connect(address: &str, tx: &Sender<SessionInput>) -> Option<RuntimeConnection> {
    match WebSocketTransport::connect(address) {
        Ok(transport) => {
            // posted before the connection thread can deliver any runtime message
            let _ = tx.send(SessionInput::RuntimeConnected);
            let tx = tx.clone();
            Some(RuntimeConnection::spawn(transport, move |signal| {
                let input = match signal {
                    RuntimeSignal::Message(text) => SessionInput::Runtime(text),
                    RuntimeSignal::Closed => SessionInput::RuntimeClosed,
                };
                let _ = tx.send(input);
            }))
        }
        Err(e) => {
            let _ = tx.send(SessionInput::RuntimeConnectFailed(format!("{e:#}")));
            None
        }
    }
}
