//! Runtime console calls to front end output records.

use crate::cdp::{ConsoleApiCalled, ObjectPreview, RemoteObject};
use crate::sourcemap::registry::ScriptRegistry;
use crate::sourcemap::translate::{ClientBasis, OriginalPosition};
use itertools::Itertools;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::Path;

/// Output record ready to become a DAP `output` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleOutput {
    pub category: &'static str,
    pub output: String,
    pub position: Option<OriginalPosition>,
}

impl ConsoleOutput {
    pub fn to_dap(&self, basis: ClientBasis) -> Value {
        let mut body = json!({
            "category": self.category,
            "output": self.output,
        });
        if let Some(position) = self.position.as_ref().filter(|p| p.is_resolved()) {
            let name = Path::new(&position.source)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| position.source.clone());
            body["source"] = json!({"name": name, "path": position.source});
            body["line"] = json!(basis.line_to_client(position.line1));
            body["column"] = json!(basis.column_to_client(position.column0));
        }
        body
    }
}

/// Source glob, `!` in front turns it into an exception.
#[derive(Debug, Clone)]
struct SkipPattern {
    regex: Regex,
    negated: bool,
}

impl SkipPattern {
    fn new(glob: &str) -> Option<Self> {
        let (negated, glob) = match glob.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, glob),
        };
        let regex = crate::weak_error!(Regex::new(&glob_to_regex(glob)), "bad skip pattern:")?;
        Some(Self { regex, negated })
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // `**/` also matches no directory at all
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

fn is_skipped(patterns: &[SkipPattern], source: &str) -> bool {
    let mut skipped = false;
    for pattern in patterns {
        if pattern.regex.is_match(source) {
            skipped = !pattern.negated;
        }
    }
    skipped
}

/// Turns console API calls into output records.
///
/// Calls are held back until the first source map is known, so that their call sites can
/// be translated, and flushed in arrival order afterwards.
#[derive(Debug)]
pub struct ConsoleRelay {
    ready: bool,
    queue: VecDeque<ConsoleApiCalled>,
    internal_marker: String,
    skip_files: Vec<SkipPattern>,
}

impl ConsoleRelay {
    pub fn new(internal_marker: impl Into<String>, skip_files: &[String]) -> Self {
        Self {
            ready: false,
            queue: VecDeque::new(),
            internal_marker: internal_marker.into(),
            skip_files: skip_files.iter().filter_map(|g| SkipPattern::new(g)).collect(),
        }
    }

    pub fn reconfigure(&mut self, internal_marker: &str, skip_files: &[String]) {
        self.internal_marker = internal_marker.to_string();
        self.skip_files = skip_files.iter().filter_map(|g| SkipPattern::new(g)).collect();
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn accept(&mut self, call: ConsoleApiCalled, registry: &ScriptRegistry) -> Option<ConsoleOutput> {
        if !self.ready {
            self.queue.push_back(call);
            return None;
        }
        self.relay(&call, registry)
    }

    /// Mark the relay ready and return everything that was waiting.
    pub fn set_ready(&mut self, registry: &ScriptRegistry) -> Vec<ConsoleOutput> {
        if self.ready {
            return vec![];
        }
        self.ready = true;
        let queued: Vec<_> = self.queue.drain(..).collect();
        queued
            .iter()
            .filter_map(|call| self.relay(call, registry))
            .collect()
    }

    pub fn reset(&mut self) {
        self.ready = false;
    }

    fn relay(&self, call: &ConsoleApiCalled, registry: &ScriptRegistry) -> Option<ConsoleOutput> {
        let first = call.args.first();
        if first
            .and_then(|a| a.value.as_ref())
            .and_then(Value::as_str)
            .is_some_and(|v| v == self.internal_marker)
        {
            return None;
        }

        let (args, position) = match embedded_call_site(&call.args, registry) {
            Some((args, position)) => (args, Some(position)),
            None => (call.args.as_slice(), self.stack_call_site(call, registry)),
        };

        let mut output = format_args(args);
        output.push('\n');
        Some(ConsoleOutput {
            category: category(&call.kind),
            output,
            position,
        })
    }

    fn stack_call_site(&self, call: &ConsoleApiCalled, registry: &ScriptRegistry) -> Option<OriginalPosition> {
        let frames = &call.stack_trace.as_ref()?.call_frames;
        let mut positions = frames.iter().map(|f| {
            let key = if f.script_id.is_empty() { &f.url } else { &f.script_id };
            registry.to_original(key, f.line_number + 1, f.column_number)
        });
        let first = positions.next()?;
        if !is_skipped(&self.skip_files, &first.source) {
            return Some(first);
        }
        positions
            .find(|p| !is_skipped(&self.skip_files, &p.source))
            .or(Some(first))
    }
}

fn category(kind: &str) -> &'static str {
    match kind {
        "warning" | "warn" | "error" => "stderr",
        _ => "stdout",
    }
}

/// Call site the runtime appended to the arguments, plus the arguments without it.
///
/// Either a trailing `url, line, column` triple or a trailing `{file, line, column}`
/// object, both with 1-based line and column.
fn embedded_call_site<'a>(
    args: &'a [RemoteObject],
    registry: &ScriptRegistry,
) -> Option<(&'a [RemoteObject], OriginalPosition)> {
    let n = args.len();
    if n > 3 && args[n - 1].kind == "number" {
        let url = args[n - 3].value.as_ref()?.as_str()?;
        let line = number(&args[n - 2])?;
        let column = number(&args[n - 1])?;
        return Some((&args[..n - 3], registry.to_original(url, line, column - 1)));
    }

    let last = args.last()?;
    if n < 2 || last.kind != "object" {
        return None;
    }
    let (file, line, column) = match &last.value {
        Some(Value::Object(map)) => (
            map.get("file")?.as_str()?.to_string(),
            map.get("line")?.as_i64()?,
            map.get("column")?.as_i64()?,
        ),
        _ => {
            let preview = last.preview.as_ref()?;
            (
                preview_property(preview, "file")?.to_string(),
                preview_property(preview, "line")?.parse().ok()?,
                preview_property(preview, "column")?.parse().ok()?,
            )
        }
    };
    Some((&args[..n - 1], registry.to_original(&file, line, column - 1)))
}

fn preview_property<'a>(preview: &'a ObjectPreview, name: &str) -> Option<&'a str> {
    preview
        .properties
        .iter()
        .find(|p| p.name == name)
        .and_then(|p| p.value.as_deref())
}

fn number(object: &RemoteObject) -> Option<i64> {
    let value = object.value.as_ref()?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

fn format_args(args: &[RemoteObject]) -> String {
    let Some((first, rest)) = args.split_first() else {
        return String::new();
    };
    let format = match (&first.value, rest.is_empty()) {
        (Some(Value::String(format)), false) if first.kind == "string" => format,
        _ => return args.iter().map(render).join(" "),
    };

    let mut out = String::new();
    let mut rest = rest.iter();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(&spec) = chars.peek() else {
            out.push(c);
            break;
        };
        match spec {
            '%' => {
                chars.next();
                out.push('%');
            }
            's' | 'd' | 'i' | 'f' | 'o' | 'O' | 'c' => {
                chars.next();
                let Some(arg) = rest.next() else {
                    out.push('%');
                    out.push(spec);
                    continue;
                };
                match spec {
                    'd' | 'i' => match arg.value.as_ref().and_then(Value::as_f64) {
                        Some(f) => out.push_str(&(f.trunc() as i64).to_string()),
                        None => out.push_str("NaN"),
                    },
                    'f' => match arg.value.as_ref().and_then(Value::as_f64) {
                        Some(f) => out.push_str(&f.to_string()),
                        None => out.push_str("NaN"),
                    },
                    // styling has no meaning in a text console
                    'c' => {}
                    _ => out.push_str(&render(arg)),
                }
            }
            _ => out.push(c),
        }
    }

    for arg in rest {
        out.push(' ');
        out.push_str(&render(arg));
    }
    out
}

/// Console rendering of a runtime value.
pub fn render(object: &RemoteObject) -> String {
    match object.kind.as_str() {
        "undefined" => "undefined".to_string(),
        "string" => match &object.value {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        },
        "number" | "boolean" | "bigint" => object
            .unserializable_value
            .clone()
            .or_else(|| object.value.as_ref().map(Value::to_string))
            .or_else(|| object.description.clone())
            .unwrap_or_default(),
        "object" if object.subtype.as_deref() == Some("null") => "null".to_string(),
        "object" => match (&object.preview, &object.value) {
            (Some(preview), _) => render_preview(preview),
            (None, Some(value)) => value.to_string(),
            (None, None) => object
                .description
                .clone()
                .or_else(|| object.class_name.clone())
                .unwrap_or_else(|| "Object".to_string()),
        },
        _ => object.description.clone().unwrap_or_default(),
    }
}

fn render_preview(preview: &ObjectPreview) -> String {
    let tail = if preview.overflow { ", …" } else { "" };
    let is_array = preview.subtype.as_deref() == Some("array");
    let body = preview
        .properties
        .iter()
        .map(|p| {
            let value = match (p.kind.as_str(), &p.value) {
                ("string", Some(v)) => format!("{v:?}"),
                (_, Some(v)) => v.clone(),
                (kind, None) => kind.to_string(),
            };
            if is_array {
                value
            } else {
                format!("{}: {value}", p.name)
            }
        })
        .join(", ");

    match preview.subtype.as_deref() {
        Some("array") => format!("[{body}{tail}]"),
        Some("error" | "regexp" | "date") => preview.description.clone().unwrap_or(body),
        _ if body.is_empty() => "{}".to_string(),
        _ => format!("{{{body}{tail}}}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::SourceMap;
    use crate::sourcemap::translate::UNRESOLVED_SOURCE;
    use serde_json::json;

    /// bundle.js line 12 column 4 (1-based) maps to app.ts line 5.
    fn registry() -> ScriptRegistry {
        let sm = json!({"version": 3, "sources": ["app.ts", "node_modules/lib/log.js"],
            "mappings": ";;;;;;;;;;;GAIE;ACAA"});
        let mut registry = ScriptRegistry::default();
        registry.register("bundle.js", "3", SourceMap::from_slice(sm.to_string().as_bytes()).unwrap());
        registry
    }

    fn call(value: Value) -> ConsoleApiCalled {
        serde_json::from_value(value).unwrap()
    }

    fn ready_relay(skip_files: &[String]) -> ConsoleRelay {
        let mut relay = ConsoleRelay::new("__RNIDE_INTERNAL", skip_files);
        relay.set_ready(&ScriptRegistry::default());
        relay
    }

    #[test]
    fn test_trailing_object_call_site() {
        let registry = registry();
        let relay = ready_relay(&[]);
        let out = relay
            .relay(
                &call(json!({"type": "log", "args": [
                    {"type": "string", "value": "hello"},
                    {"type": "object", "value": {"file": "bundle.js", "line": 12, "column": 4}}
                ]})),
                &registry,
            )
            .unwrap();
        assert_eq!(out.output, "hello\n");
        assert_eq!(out.category, "stdout");
        let position = out.position.unwrap();
        assert_eq!((position.source.as_str(), position.line1), ("app.ts", 5));
    }

    #[test]
    fn test_trailing_preview_call_site() {
        let registry = registry();
        let relay = ready_relay(&[]);
        let out = relay
            .relay(
                &call(json!({"type": "warning", "args": [
                    {"type": "string", "value": "careful"},
                    {"type": "object", "objectId": "1", "preview": {"type": "object", "properties": [
                        {"name": "file", "type": "string", "value": "bundle.js"},
                        {"name": "line", "type": "number", "value": "12"},
                        {"name": "column", "type": "number", "value": "4"}
                    ]}}
                ]})),
                &registry,
            )
            .unwrap();
        assert_eq!(out.category, "stderr");
        assert_eq!(out.output, "careful\n");
        assert_eq!(out.position.unwrap().line1, 5);
    }

    #[test]
    fn test_trailing_triple_call_site() {
        let registry = registry();
        let relay = ready_relay(&[]);
        let out = relay
            .relay(
                &call(json!({"type": "error", "args": [
                    {"type": "string", "value": "a"},
                    {"type": "number", "value": 1},
                    {"type": "string", "value": "http://10.0.2.2:8081/bundle.js"},
                    {"type": "number", "value": 12},
                    {"type": "number", "value": 4}
                ]})),
                &registry,
            )
            .unwrap();
        assert_eq!(out.output, "a 1\n");
        assert_eq!(out.category, "stderr");
        let position = out.position.unwrap();
        assert_eq!(position.source, UNRESOLVED_SOURCE);
        assert_eq!((position.line1, position.column0), (12, 3));
    }

    #[test]
    fn test_stack_trace_call_site_honors_skip_files() {
        let registry = registry();
        let event = call(json!({"type": "log",
            "args": [{"type": "string", "value": "x"}],
            "stackTrace": {"callFrames": [
                {"functionName": "log", "scriptId": "3", "url": "bundle.js", "lineNumber": 12, "columnNumber": 0},
                {"functionName": "main", "scriptId": "3", "url": "bundle.js", "lineNumber": 11, "columnNumber": 5}
            ]}
        }));

        let plain = ready_relay(&[]).relay(&event, &registry).unwrap();
        assert_eq!(plain.position.unwrap().source, "node_modules/lib/log.js");

        let skipping = ready_relay(&["**/node_modules/**".to_string()])
            .relay(&event, &registry)
            .unwrap();
        assert_eq!(skipping.position.unwrap().source, "app.ts");

        let negated = ready_relay(&[
            "**/node_modules/**".to_string(),
            "!**/node_modules/lib/**".to_string(),
        ])
        .relay(&event, &registry)
        .unwrap();
        assert_eq!(negated.position.unwrap().source, "node_modules/lib/log.js");
    }

    #[test]
    fn test_internal_messages_dropped() {
        let relay = ready_relay(&[]);
        let out = relay.relay(
            &call(json!({"type": "log", "args": [
                {"type": "string", "value": "__RNIDE_INTERNAL"},
                {"type": "string", "value": "ping"}
            ]})),
            &ScriptRegistry::default(),
        );
        assert!(out.is_none());
    }

    #[test]
    fn test_queue_until_ready() {
        let registry = registry();
        let mut relay = ConsoleRelay::new("__RNIDE_INTERNAL", &[]);
        let first = call(json!({"type": "log", "args": [{"type": "string", "value": "one"}]}));
        let second = call(json!({"type": "log", "args": [{"type": "string", "value": "two"}]}));
        assert!(relay.accept(first, &registry).is_none());
        assert!(relay.accept(second, &registry).is_none());
        assert_eq!(relay.queued(), 2);

        let flushed = relay.set_ready(&registry);
        let texts: Vec<_> = flushed.iter().map(|o| o.output.as_str()).collect();
        assert_eq!(texts, vec!["one\n", "two\n"]);
        assert!(relay.set_ready(&registry).is_empty());

        relay.reset();
        assert!(!relay.is_ready());
        let third = call(json!({"type": "log", "args": [{"type": "string", "value": "three"}]}));
        assert!(relay.accept(third, &registry).is_none());
    }

    #[test]
    fn test_format_string() {
        let args: Vec<RemoteObject> = serde_json::from_value(json!([
            {"type": "string", "value": "%s has %d items (%f%%)%c"},
            {"type": "string", "value": "cart"},
            {"type": "number", "value": 3.7},
            {"type": "number", "value": 0.5},
            {"type": "string", "value": "color: red"},
            {"type": "boolean", "value": true}
        ]))
        .unwrap();
        assert_eq!(format_args(&args), "cart has 3 items (0.5%) true");
    }

    #[test]
    fn test_render_values() {
        let args: Vec<RemoteObject> = serde_json::from_value(json!([
            {"type": "number", "value": 1},
            {"type": "undefined"},
            {"type": "object", "subtype": "null", "value": null},
            {"type": "number", "unserializableValue": "NaN", "description": "NaN"},
            {"type": "object", "preview": {"type": "object", "properties": [
                {"name": "a", "type": "number", "value": "1"},
                {"name": "b", "type": "string", "value": "x"}
            ]}},
            {"type": "object", "subtype": "array", "preview": {"type": "object", "subtype": "array",
                "overflow": true, "properties": [{"name": "0", "type": "number", "value": "1"}]}},
            {"type": "function", "description": "function f() {}"}
        ]))
        .unwrap();
        assert_eq!(
            format_args(&args),
            "1 undefined null NaN {a: 1, b: \"x\"} [1, …] function f() {}"
        );
    }

    #[test]
    fn test_to_dap_body() {
        let out = ConsoleOutput {
            category: "stdout",
            output: "hi\n".to_string(),
            position: Some(OriginalPosition {
                source: "/app/src/app.ts".to_string(),
                line1: 5,
                column0: 2,
                script_url: "bundle.js".to_string(),
            }),
        };
        let body = out.to_dap(ClientBasis::default());
        assert_eq!(body["source"]["name"], "app.ts");
        assert_eq!(body["source"]["path"], "/app/src/app.ts");
        assert_eq!(body["line"], 5);
        assert_eq!(body["column"], 3);

        let unresolved = ConsoleOutput {
            position: Some(OriginalPosition {
                source: UNRESOLVED_SOURCE.to_string(),
                line1: 1,
                column0: 0,
                script_url: "x".to_string(),
            }),
            ..out
        };
        assert!(unresolved.to_dap(ClientBasis::default()).get("source").is_none());
    }

    #[test]
    fn test_glob_to_regex() {
        let re = Regex::new(&glob_to_regex("**/node_modules/**")).unwrap();
        assert!(re.is_match("/app/node_modules/react/index.js"));
        assert!(re.is_match("node_modules/x.js"));
        assert!(!re.is_match("/app/src/node.js"));
        let re = Regex::new(&glob_to_regex("src/*.ts")).unwrap();
        assert!(re.is_match("src/a.ts"));
        assert!(!re.is_match("src/a/b.ts"));
    }
}
