//! jsdap - Debug Adapter Protocol bridge to source-mapped JavaScript runtimes.
//!
//! Listens for DAP clients over TCP and drives a CDP runtime over a WebSocket on their
//! behalf, one client at a time.

use anyhow::Context;
use clap::Parser;
use jsdap::config::AdapterConfig;
use jsdap::dap::args::Args;
use jsdap::dap::tracer::FileTracer;
use log::{info, warn};
use std::net::{SocketAddr, TcpListener};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let tracer = match &args.log_file {
        Some(path) => Some(FileTracer::new(path)?),
        None => None,
    };

    let mut builder = env_logger::Builder::from_default_env();
    if let Some(t) = &tracer {
        builder.target(env_logger::Target::Pipe(t.log_target()?));
    }
    let logger = builder.build();
    let filter = logger.filter();
    jsdap::log::LOGGER_SWITCHER.switch(logger, filter);

    if args.trace_dap && tracer.is_none() {
        warn!(target: "dap", "--trace-dap requires --log-file; tracing disabled");
    }

    let mut config = AdapterConfig::load(args.config.as_deref()).context("load config")?;
    if let Some(runtime) = &args.runtime {
        config.websocket_address = Some(runtime.clone());
    }

    let addr: SocketAddr = args.listen.parse().context("Invalid listen address")?;
    let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
    info!(target: "dap", "jsdap listening on {addr}");

    // One client == one debug session, clients are served one after another.
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "dap", "accept failed: {err:#}");
                continue;
            }
        };
        info!(target: "dap", "DAP client connected: {peer}");
        if let Some(t) = &tracer {
            t.line(&format!("client connected: {peer}"));
        }

        let res = jsdap::server::serve(stream, config.clone(), tracer.clone(), args.trace_dap);
        if let Err(err) = res {
            warn!(target: "dap", "session ended with error: {err:#}");
            if let Some(t) = &tracer {
                t.line(&format!("session error: {err:#}"));
            }
        } else if let Some(t) = &tracer {
            t.line("session finished OK");
        }

        if args.oneshot {
            break;
        }
    }
    Ok(())
}
