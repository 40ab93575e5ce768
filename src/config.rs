use crate::error::Error;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

pub const DEFAULT_EXCEPTION_BREAK_FUNCTION: &str = "__RNIDE_breakOnError";
pub const DEFAULT_INTERNAL_LOG_MARKER: &str = "__RNIDE_INTERNAL";

/// Adapter configuration.
///
/// Read from a TOML file at startup, then overridden per session by launch arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    /// Runtime WebSocket address used when the client does not pass one.
    pub websocket_address: Option<String>,
    /// Source map path prefixes and the absolute directories they stand for.
    pub source_map_path_overrides: Vec<(String, String)>,
    /// Lines the bundler prepends to the main bundle without describing them in its map.
    pub expo_prelude_line_count: i64,
    /// Glob patterns of sources skipped when picking a console call site, `!` negates.
    pub skip_files: Vec<String>,
    /// Forget breakpoints instead of unbinding them when runtime contexts are cleared.
    pub breakpoints_removed_on_context_cleared: bool,
    /// Function the runtime pauses in to report an uncaught error.
    pub exception_break_function: String,
    /// First console argument that marks a message as internal.
    pub internal_log_marker: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            websocket_address: None,
            source_map_path_overrides: vec![],
            expo_prelude_line_count: 0,
            skip_files: vec![],
            breakpoints_removed_on_context_cleared: false,
            exception_break_function: DEFAULT_EXCEPTION_BREAK_FUNCTION.to_string(),
            internal_log_marker: DEFAULT_INTERNAL_LOG_MARKER.to_string(),
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    websocket_address: Option<String>,
    source_map_path_overrides: toml::Table,
    expo_prelude_line_count: Option<i64>,
    skip_files: Vec<String>,
    breakpoints_removed_on_context_cleared: Option<bool>,
    exception_break_function: Option<String>,
    internal_log_marker: Option<String>,
}

impl AdapterConfig {
    const DEFAULT_PATH: &'static str = ".config/jsdap/config.toml";

    pub fn from_toml(data: &str) -> Result<Self, Error> {
        let file: ConfigFile = toml::de::from_str(data)?;
        let default = AdapterConfig::default();
        Ok(Self {
            websocket_address: file.websocket_address,
            source_map_path_overrides: file
                .source_map_path_overrides
                .into_iter()
                .filter_map(|(alias, path)| Some((alias, path.as_str()?.to_string())))
                .collect(),
            expo_prelude_line_count: file.expo_prelude_line_count.unwrap_or(0),
            skip_files: file.skip_files,
            breakpoints_removed_on_context_cleared: file
                .breakpoints_removed_on_context_cleared
                .unwrap_or(false),
            exception_break_function: file
                .exception_break_function
                .unwrap_or(default.exception_break_function),
            internal_log_marker: file.internal_log_marker.unwrap_or(default.internal_log_marker),
        })
    }

    /// Load config from `path`, or from `~/.config/jsdap/config.toml` when no path is given.
    /// A missing default file yields the default config.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let data = match path {
            Some(path) => std::fs::read_to_string(path)?,
            None => {
                let Some(home) = home::home_dir() else {
                    return Ok(Self::default());
                };
                match std::fs::read_to_string(home.join(Self::DEFAULT_PATH)) {
                    Ok(data) => data,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
                    Err(e) => return Err(e.into()),
                }
            }
        };
        Self::from_toml(&data)
    }

    /// Override fields with the camelCase launch/attach arguments a client sent.
    pub fn apply_launch_arguments(&mut self, arguments: &Value) {
        if let Some(address) = arguments.get("websocketAddress").and_then(Value::as_str) {
            self.websocket_address = Some(address.to_string());
        }
        if let Some(Value::Object(overrides)) = arguments.get("sourceMapPathOverrides") {
            self.source_map_path_overrides = overrides
                .iter()
                .filter_map(|(alias, path)| Some((alias.clone(), path.as_str()?.to_string())))
                .collect();
        }
        if let Some(count) = arguments.get("expoPreludeLineCount").and_then(Value::as_i64) {
            self.expo_prelude_line_count = count;
        }
        if let Some(Value::Array(patterns)) = arguments.get("skipFiles") {
            self.skip_files = patterns
                .iter()
                .filter_map(|p| p.as_str().map(ToString::to_string))
                .collect();
        }
        if let Some(remove) = arguments
            .get("breakpointsAreRemovedOnContextCleared")
            .and_then(Value::as_bool)
        {
            self.breakpoints_removed_on_context_cleared = remove;
        }
    }
}
