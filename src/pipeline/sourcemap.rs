//! Version 3 source maps.
//!
//! The native CSS transformer builds line-level maps while it inlines
//! `@import`s ([`LineMapBuilder`]). Before a map is written, [`rewrite`]
//! replaces the absolute source paths a transformer reports with public URLs,
//! so the published map never exposes the app's directory layout.

use super::{AssetClass, TransformError};
use serde_json::{Value, json};
use std::path::Path;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Append the base64 VLQ encoding of `value`.
pub fn encode_vlq(value: i64, out: &mut String) {
    let mut v = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = (v & 0b11111) as usize;
        v >>= 5;
        if v > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64[digit] as char);
        if v == 0 {
            break;
        }
    }
}

/// Builds a map where every generated line points at the start of one
/// source line.
#[derive(Debug, Default)]
pub struct LineMapBuilder {
    sources: Vec<String>,
    /// Per generated line: `(source index, source line)`, or `None` for
    /// lines with no origin.
    lines: Vec<Option<(usize, usize)>>,
}

impl LineMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `source`, registering it on first use.
    pub fn source(&mut self, source: &str) -> usize {
        match self.sources.iter().position(|s| s == source) {
            Some(idx) => idx,
            None => {
                self.sources.push(source.to_string());
                self.sources.len() - 1
            }
        }
    }

    /// Record the next generated line as coming from `line` (0-based) of
    /// source `idx`.
    pub fn push_line(&mut self, idx: usize, line: usize) {
        self.lines.push(Some((idx, line)));
    }

    pub fn push_unmapped(&mut self) {
        self.lines.push(None);
    }

    pub fn mappings(&self) -> String {
        let mut out = String::new();
        let (mut prev_src, mut prev_line) = (0i64, 0i64);
        for (n, entry) in self.lines.iter().enumerate() {
            if n > 0 {
                out.push(';');
            }
            if let Some((src, line)) = *entry {
                let (src, line) = (src as i64, line as i64);
                encode_vlq(0, &mut out);
                encode_vlq(src - prev_src, &mut out);
                encode_vlq(line - prev_line, &mut out);
                encode_vlq(0, &mut out);
                prev_src = src;
                prev_line = line;
            }
        }
        out
    }

    pub fn build(&self) -> Value {
        json!({
            "version": 3,
            "sources": self.sources,
            "names": [],
            "mappings": self.mappings(),
        })
    }
}

/// Where a compiled file lives, for rewriting its map.
#[derive(Debug, Clone, Copy)]
pub struct MapTarget<'a> {
    pub source_dir: &'a Path,
    pub output_dir: &'a Path,
    pub public_folder: &'a Path,
    pub route_prefix: &'a str,
    pub output_file: &'a Path,
}

impl MapTarget<'_> {
    /// Public URL of the directory the pipeline writes to.
    fn output_url(&self) -> String {
        let relative = self
            .output_dir
            .strip_prefix(self.public_folder)
            .map(super::files::slash_path)
            .unwrap_or_default();
        let mut url = self.route_prefix.to_string();
        if !relative.is_empty() {
            url.push('/');
            url.push_str(&relative);
        }
        url
    }

    /// Public URL for one source entry.
    fn source_url(&self, source: &str) -> String {
        let path = Path::new(source);
        let relative = match path.strip_prefix(self.source_dir) {
            Ok(rel) => super::files::slash_path(rel),
            // Outside the source tree: keep the file name only.
            Err(_) if path.is_absolute() => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Err(_) => source.trim_start_matches("./").to_string(),
        };
        format!("{}/{relative}", self.output_url())
    }
}

/// Normalise a transformer-supplied map for publishing.
///
/// Accepts a JSON object or a JSON string. Sources become public URLs under
/// the route prefix, `file` names the compiled output and `sourceRoot` is
/// dropped.
pub fn rewrite(map: Value, target: &MapTarget<'_>) -> Result<Value, TransformError> {
    let mut map = match map {
        Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|e| TransformError::SourceMap(format!("invalid JSON: {e}")))?,
        other => other,
    };
    let Value::Object(obj) = &mut map else {
        return Err(TransformError::SourceMap("expected a JSON object".into()));
    };
    obj.remove("sourceRoot");
    if let Some(Value::Array(sources)) = obj.get_mut("sources") {
        for source in sources.iter_mut() {
            if let Value::String(s) = source {
                *s = target.source_url(s);
            }
        }
    }
    let file = target
        .output_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    obj.insert("file".into(), Value::String(file));
    Ok(map)
}

/// The comment that links compiled output to its map. HTML has no such
/// comment, so HTML output never carries a map.
pub fn map_comment(class: AssetClass, map_file: &str) -> Option<String> {
    match class {
        AssetClass::Css => Some(format!("/*# sourceMappingURL={map_file} */")),
        AssetClass::Js => Some(format!("//# sourceMappingURL={map_file}")),
        AssetClass::Html => None,
    }
}

/// Append the map comment on its own line. HTML is returned untouched.
pub fn attach(class: AssetClass, mut code: String, map_file: &str) -> String {
    let Some(comment) = map_comment(class, map_file) else {
        return code;
    };
    if !code.is_empty() && !code.ends_with('\n') {
        code.push('\n');
    }
    code.push_str(&comment);
    code.push('\n');
    code
}
