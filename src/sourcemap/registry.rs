use crate::error::Error;
use crate::sourcemap::SourceMap;
use base64::Engine as _;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

const MAIN_BUNDLE_MARKER: &str = "__prelude__";
const ENV_PRELUDE_SOURCE: &str = "__env__";

/// Script reported by the runtime together with its decoded source map.
#[derive(Debug)]
pub struct ScriptRecord {
    pub url: String,
    pub script_id: String,
    pub source_map: SourceMap,
    /// Number of generated lines the bundle carries in front of what the map describes.
    pub line_offset: i64,
}

/// Every script with a source map seen on the current runtime connection.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    scripts: Vec<ScriptRecord>,
    source_paths: HashSet<String>,
    /// (alias prefix, absolute directory) pairs, first match wins.
    aliases: Vec<(String, String)>,
    prelude_line_count: i64,
}

impl ScriptRegistry {
    pub fn new(aliases: Vec<(String, String)>, prelude_line_count: i64) -> Self {
        Self {
            aliases,
            prelude_line_count,
            ..Default::default()
        }
    }

    pub fn reconfigure(&mut self, aliases: Vec<(String, String)>, prelude_line_count: i64) {
        self.aliases = aliases;
        self.prelude_line_count = prelude_line_count;
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn scripts(&self) -> &[ScriptRecord] {
        &self.scripts
    }

    pub fn clear(&mut self) {
        self.scripts.clear();
        self.source_paths.clear();
    }

    /// Decode the payload referenced by `source_map_url` and register it for the script.
    pub fn register_from_url(
        &mut self,
        url: &str,
        script_id: &str,
        source_map_url: &str,
    ) -> Result<&ScriptRecord, Error> {
        let payload = decode_data_url(source_map_url)?;
        let source_map = SourceMap::from_slice(&payload)?;
        Ok(self.register(url, script_id, source_map))
    }

    pub fn register(&mut self, url: &str, script_id: &str, source_map: SourceMap) -> &ScriptRecord {
        let sources = source_map.sources();
        let is_main_bundle = sources.iter().any(|s| s.contains(MAIN_BUNDLE_MARKER));
        let has_env_prelude = sources.iter().any(|s| s == ENV_PRELUDE_SOURCE);

        let mut line_offset = 0;
        if is_main_bundle && !has_env_prelude && self.prelude_line_count > 0 {
            log::debug!(target: "sourcemap", "prelude detected in {url}, line offset set to {}", self.prelude_line_count);
            line_offset = self.prelude_line_count;
        }

        self.source_paths.extend(sources.iter().cloned());
        let idx = self.scripts.len();
        self.scripts.push(ScriptRecord {
            url: url.to_string(),
            script_id: script_id.to_string(),
            source_map,
            line_offset,
        });
        &self.scripts[idx]
    }

    pub fn is_main_bundle(record: &ScriptRecord) -> bool {
        record
            .source_map
            .sources()
            .iter()
            .any(|s| s.contains(MAIN_BUNDLE_MARKER))
    }

    /// Latest script known under either its runtime id or its url.
    pub fn find(&self, id_or_url: &str) -> Option<&ScriptRecord> {
        self.scripts
            .iter()
            .rev()
            .find(|s| s.script_id == id_or_url || same_url_ignoring_host(&s.url, id_or_url))
    }

    pub fn knows_source(&self, source: &str) -> bool {
        self.source_paths.contains(source)
    }

    /// Map a source map entry to an absolute client path.
    pub fn resolve_alias(&self, source: &str) -> String {
        for (alias, absolute) in &self.aliases {
            if let Some(rest) = source.strip_prefix(alias.as_str()) {
                let joined = Path::new(absolute).join(rest.trim_start_matches('/'));
                return normalize_path(&joined).to_string_lossy().into_owned();
            }
        }
        source.to_string()
    }

    /// Map an absolute client path to the name a source map uses for it.
    pub fn source_map_name(&self, absolute_path: &str) -> String {
        for (alias, absolute) in &self.aliases {
            if let Ok(rest) = Path::new(absolute_path).strip_prefix(absolute) {
                let mut aliased = alias.clone();
                if !aliased.ends_with('/') && !rest.as_os_str().is_empty() {
                    aliased.push('/');
                }
                aliased.push_str(&rest.to_string_lossy());
                if self.knows_source(&aliased) {
                    return aliased;
                }
                break;
            }
        }
        absolute_path.to_string()
    }
}

/// Payload of an inline `data:` source map url.
pub fn decode_data_url(source_map_url: &str) -> Result<Vec<u8>, Error> {
    let Some(rest) = source_map_url.strip_prefix("data:") else {
        return Err(Error::SourceMapUrl(source_map_url.to_string()));
    };
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| Error::SourceMapUrl(source_map_url.to_string()))?;

    if header.split(';').any(|p| p == "base64") {
        Ok(base64::engine::general_purpose::STANDARD.decode(data.trim())?)
    } else {
        Ok(data.as_bytes().to_vec())
    }
}

/// Compare script urls ignoring host and port: the runtime may report a script under the
/// device-side address while lookups use the bundler-side one.
pub fn same_url_ignoring_host(a: &str, b: &str) -> bool {
    fn unify(s: &str) -> Option<url::Url> {
        let mut u = url::Url::parse(s).ok()?;
        u.set_host(Some("localhost")).ok()?;
        u.set_port(Some(8080)).ok()?;
        Some(u)
    }
    if a == b {
        return true;
    }
    match (unify(a), unify(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_map(sources: &[&str], mappings: &str) -> SourceMap {
        let json = serde_json::json!({"version": 3, "sources": sources, "mappings": mappings});
        SourceMap::from_slice(json.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_decode_data_url() {
        let json = r#"{"version":3,"sources":["a.js"],"mappings":"AAAA"}"#;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        let url = format!("data:application/json;charset=utf-8;base64,{encoded}");
        assert_eq!(decode_data_url(&url).unwrap(), json.as_bytes());

        let plain = format!("data:application/json,{json}");
        assert_eq!(decode_data_url(&plain).unwrap(), json.as_bytes());

        assert!(matches!(
            decode_data_url("http://localhost:8081/index.map"),
            Err(Error::SourceMapUrl(_))
        ));
        assert!(decode_data_url("data:application/json;base64,@@@").is_err());
    }

    #[test]
    fn test_url_comparison_ignores_host_and_port() {
        assert!(same_url_ignoring_host(
            "http://localhost:8081/index.bundle?platform=ios",
            "http://10.0.2.2:8081/index.bundle?platform=ios"
        ));
        assert!(!same_url_ignoring_host(
            "http://localhost:8081/index.bundle",
            "http://localhost:8081/other.bundle"
        ));
        assert!(same_url_ignoring_host("bundle.js", "bundle.js"));
        assert!(!same_url_ignoring_host("bundle.js", "other.js"));
    }

    #[test]
    fn test_find_by_id_or_url() {
        let mut registry = ScriptRegistry::default();
        registry.register("http://localhost:8081/a.bundle", "1", source_map(&["a.ts"], "AAAA"));
        registry.register("http://localhost:8081/b.bundle", "2", source_map(&["b.ts"], "AAAA"));

        assert_eq!(registry.find("2").unwrap().url, "http://localhost:8081/b.bundle");
        assert_eq!(registry.find("http://127.0.0.1:19000/a.bundle").unwrap().script_id, "1");
        assert!(registry.find("3").is_none());
        assert!(registry.knows_source("b.ts"));

        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.knows_source("b.ts"));
    }

    #[test]
    fn test_prelude_line_offset() {
        let mut registry = ScriptRegistry::new(vec![], 3);
        let main = registry.register("main.js", "1", source_map(&["__prelude__", "app.ts"], "AAAA"));
        assert_eq!(main.line_offset, 3);
        assert!(ScriptRegistry::is_main_bundle(main));

        let with_env = registry.register(
            "main2.js",
            "2",
            source_map(&["__prelude__", "__env__", "app.ts"], "AAAA"),
        );
        assert_eq!(with_env.line_offset, 0);

        let chunk = registry.register("chunk.js", "3", source_map(&["app.ts"], "AAAA"));
        assert_eq!(chunk.line_offset, 0);
    }

    #[test]
    fn test_aliases() {
        let mut registry = ScriptRegistry::new(vec![("/[metro-project]/".into(), "/home/me/app".into())], 0);
        assert_eq!(
            registry.resolve_alias("/[metro-project]/src/../App.tsx"),
            "/home/me/app/App.tsx"
        );
        assert_eq!(registry.resolve_alias("/abs/other.ts"), "/abs/other.ts");

        // aliased form only used when some map knows it
        assert_eq!(registry.source_map_name("/home/me/app/App.tsx"), "/home/me/app/App.tsx");
        registry.register("b.js", "1", source_map(&["/[metro-project]/App.tsx"], "AAAA"));
        assert_eq!(
            registry.source_map_name("/home/me/app/App.tsx"),
            "/[metro-project]/App.tsx"
        );
    }
}
