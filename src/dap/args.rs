use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on (default: 127.0.0.1:4711)
    #[clap(long, default_value = "127.0.0.1:4711")]
    pub listen: String,

    /// Exit after the first debug session ends (single-client mode).
    #[clap(long)]
    pub oneshot: bool,

    /// Optional log file for adapter diagnostics (no output to stderr).
    #[clap(long)]
    pub log_file: Option<std::path::PathBuf>,

    /// Trace DAP traffic (requests/responses/events) into the log file.
    /// Requires --log-file.
    #[clap(long)]
    pub trace_dap: bool,

    /// Runtime WebSocket address used when launch arguments carry none.
    #[clap(long, env = "JSDAP_RUNTIME")]
    pub runtime: Option<String>,

    /// Config file (default: ~/.config/jsdap/config.toml)
    #[clap(long)]
    pub config: Option<std::path::PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["jsdap"]);
        assert_eq!(args.listen, "127.0.0.1:4711");
        assert!(!args.oneshot && !args.trace_dap);
        assert!(args.log_file.is_none());
    }

    #[test]
    fn test_all_flags() {
        let args = Args::parse_from([
            "jsdap",
            "--listen",
            "0.0.0.0:9000",
            "--oneshot",
            "--log-file",
            "/tmp/jsdap.log",
            "--trace-dap",
            "--runtime",
            "ws://127.0.0.1:8081/inspector/debug",
            "--config",
            "/tmp/jsdap.toml",
        ]);
        assert_eq!(args.listen, "0.0.0.0:9000");
        assert!(args.oneshot && args.trace_dap);
        assert_eq!(args.runtime.as_deref(), Some("ws://127.0.0.1:8081/inspector/debug"));
        assert!(args.config.is_some());
    }
}
