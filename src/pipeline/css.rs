//! The native CSS transformer.
//!
//! Inlines relative `@import` statements so a page loads one stylesheet per
//! entry point:
//!
//! ```css
//! @import "_version.css";     /* inlined */
//! @import url(theme/dark);    /* inlined: theme/dark.css or theme/_dark.css */
//! @import "print.css" print;  /* kept: has a media query */
//! @import "https://cdn/x.css" /* kept: remote */
//! ```
//!
//! Only an `@import` that occupies its own line is considered. Import cycles
//! fail the file. With `compiler.options.sourceMap: true` a line-level source
//! map lists every contributing file.
//!
//! The version file is a `:root` custom property:
//!
//! ```css
//! :root {
//!   --appVersion: "1.4.0";
//! }
//! ```

use super::sourcemap::LineMapBuilder;
use super::{AssetClass, TransformContext, TransformError, TransformOutput, Transformer};
use crate::config::ResolvedConfig;
use crate::guard::WriteGuard;
use std::fs;
use std::path::{Path, PathBuf};

pub struct NativeCss;

impl Transformer for NativeCss {
    fn version_code(&self, ctx: &TransformContext<'_>) -> String {
        let version = serde_json::to_string(ctx.app_version()).unwrap_or_default();
        format!(":root {{\n  --{}: {version};\n}}\n", ctx.version_var())
    }

    fn parse(&self, ctx: &TransformContext<'_>, path: &Path) -> Result<TransformOutput, TransformError> {
        let mut out = String::new();
        let mut map = ctx.option_bool("sourceMap").then(LineMapBuilder::new);
        let mut stack = Vec::new();
        inline(path, &mut stack, &mut out, &mut map)?;
        check_braces(path, &out)?;
        Ok(TransformOutput {
            output: out,
            source_map: map.map(|m| m.build()),
        })
    }
}

/// Run the CSS pipeline with the transformer `css.compiler.module` names.
pub fn run(config: &ResolvedConfig, guard: &WriteGuard) -> super::PipelineReport {
    super::run(config, guard, AssetClass::Css)
}

fn inline(
    path: &Path,
    stack: &mut Vec<PathBuf>,
    out: &mut String,
    map: &mut Option<LineMapBuilder>,
) -> Result<(), TransformError> {
    let canonical = path.canonicalize()?;
    if stack.contains(&canonical) {
        let chain = stack
            .iter()
            .chain(std::iter::once(&canonical))
            .map(|p| p.file_name().unwrap_or_default().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" -> ");
        return Err(TransformError::ImportCycle(chain));
    }
    let content = fs::read_to_string(path)?;
    let source_idx = map.as_mut().map(|m| m.source(&path.to_string_lossy()));
    stack.push(canonical);

    for (n, line) in content.lines().enumerate() {
        if let Some(target) = import_target(line) {
            let dir = path.parent().unwrap_or(Path::new("."));
            let resolved = resolve_import(dir, &target).ok_or_else(|| TransformError::Syntax {
                path: path.to_path_buf(),
                message: format!("line {}: cannot resolve @import \"{target}\"", n + 1),
            })?;
            inline(&resolved, stack, out, map)?;
            continue;
        }
        out.push_str(line);
        out.push('\n');
        if let (Some(m), Some(idx)) = (map.as_mut(), source_idx) {
            m.push_line(idx, n);
        }
    }

    stack.pop();
    Ok(())
}

/// The local path of an `@import` line that should be inlined.
fn import_target(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("@import")?;
    let rest = rest.trim_start();
    let (target, tail) = if let Some(inner) = rest.strip_prefix("url(") {
        let end = inner.find(')')?;
        let target = inner[..end].trim().trim_matches(['"', '\'']);
        (target, &inner[end + 1..])
    } else {
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let inner = &rest[1..];
        let end = inner.find(quote)?;
        (&inner[..end], &inner[end + 1..])
    };
    // A media query or layer means the import is conditional.
    if tail.trim().trim_end_matches(';').trim() != "" {
        return None;
    }
    if target.is_empty() || target.contains("://") || target.starts_with("//") || target.starts_with('/') {
        return None;
    }
    Some(target.to_string())
}

/// `x`, `x.css`, `_x`, `_x.css`, in that order.
fn resolve_import(dir: &Path, target: &str) -> Option<PathBuf> {
    let path = dir.join(target);
    let mut candidates = vec![path.clone()];
    if path.extension().is_none() {
        candidates.push(path.with_extension("css"));
    }
    if let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned())
        && !name.starts_with('_')
    {
        let partial = path.with_file_name(format!("_{name}"));
        if partial.extension().is_none() {
            candidates.push(partial.with_extension("css"));
        }
        candidates.push(partial);
    }
    candidates.into_iter().find(|c| c.is_file())
}

/// Report the first unbalanced brace, ignoring strings and comments.
fn check_braces(path: &Path, css: &str) -> Result<(), TransformError> {
    let mut depth: usize = 0;
    let mut line = 1;
    let mut chars = css.chars().peekable();
    let syntax = |line: usize, message: &str| TransformError::Syntax {
        path: path.to_path_buf(),
        message: format!("line {line}: {message}"),
    };

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            '"' | '\'' => {
                while let Some(s) = chars.next() {
                    match s {
                        '\\' => {
                            chars.next();
                        }
                        '\n' => line += 1,
                        s if s == c => break,
                        _ => {}
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for s in chars.by_ref() {
                    if s == '\n' {
                        line += 1;
                    }
                    if prev == '*' && s == '/' {
                        break;
                    }
                    prev = s;
                }
            }
            '{' => depth += 1,
            '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| syntax(line, "unexpected \"}\""))?;
            }
            _ => {}
        }
    }
    if depth > 0 {
        return Err(syntax(line, "unclosed block"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, ConfigInputs};
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn parse(tmp: &TempDir, params: serde_json::Value, file: &Path) -> Result<TransformOutput, TransformError> {
        let config = config::resolve(&ConfigInputs::new(tmp.path()).with_params(params)).unwrap();
        let ctx = TransformContext::new(&config, AssetClass::Css);
        NativeCss.parse(&ctx, file)
    }

    #[test]
    fn import_target_forms() {
        assert_eq!(import_target("@import \"a.css\";"), Some("a.css".into()));
        assert_eq!(import_target("  @import 'theme/b';"), Some("theme/b".into()));
        assert_eq!(import_target("@import url(c.css);"), Some("c.css".into()));
        assert_eq!(import_target("@import url(\"d.css\");"), Some("d.css".into()));
        assert_eq!(import_target("@import \"p.css\" print;"), None);
        assert_eq!(import_target("@import url(https://x/y.css);"), None);
        assert_eq!(import_target("@import \"/abs.css\";"), None);
        assert_eq!(import_target("a { color: red; }"), None);
    }

    #[test]
    fn inlines_nested_imports_and_partials() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("statics/css");
        write(&dir, "_vars.css", ":root { --x: 1; }");
        write(&dir, "theme/dark.css", "@import \"../vars\";\nbody { color: white; }");
        let main = write(&dir, "main.css", "@import 'theme/dark.css';\na { b: c; }\n");

        let out = parse(&tmp, json!({}), &main).unwrap();
        assert_eq!(out.output, ":root { --x: 1; }\nbody { color: white; }\na { b: c; }\n");
        assert!(out.source_map.is_none());
    }

    #[test]
    fn conditional_imports_are_kept() {
        let tmp = TempDir::new().unwrap();
        let main = write(tmp.path(), "main.css", "@import \"print.css\" print;\n");
        let out = parse(&tmp, json!({}), &main).unwrap();
        assert_eq!(out.output, "@import \"print.css\" print;\n");
    }

    #[test]
    fn import_cycle_is_an_error() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b.css", "@import \"a.css\";\n");
        let a = write(tmp.path(), "a.css", "@import \"b.css\";\n");
        match parse(&tmp, json!({}), &a) {
            Err(TransformError::ImportCycle(chain)) => assert_eq!(chain, "a.css -> b.css -> a.css"),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn missing_import_is_a_syntax_error() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.css", "x{}\n@import \"gone\";\n");
        let err = parse(&tmp, json!({}), &a).unwrap_err();
        assert!(err.to_string().contains("line 2: cannot resolve @import \"gone\""));
    }

    #[test]
    fn unbalanced_braces_are_syntax_errors() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.css", "a {\n  content: \"}\";\n");
        assert!(parse(&tmp, json!({}), &a).unwrap_err().to_string().contains("unclosed block"));
        let b = write(tmp.path(), "b.css", "/* { */ b { }\n}\n");
        assert!(parse(&tmp, json!({}), &b).unwrap_err().to_string().contains("line 2"));
    }

    #[test]
    fn source_map_lists_contributing_files() {
        let tmp = TempDir::new().unwrap();
        let part = write(tmp.path(), "_part.css", "p{}\nq{}");
        let main = write(tmp.path(), "main.css", "a{}\n@import \"part\";\nb{}\n");

        let out = parse(&tmp, json!({"css": {"compiler": {"options": {"sourceMap": true}}}}), &main).unwrap();
        let map = out.source_map.unwrap();
        assert_eq!(
            map["sources"],
            json!([main.to_string_lossy(), part.to_string_lossy()])
        );
        // a{} ← main:0, p{} ← part:0, q{} ← part:1, b{} ← main:2
        assert_eq!(map["mappings"], "AAAA;ACAA;AAAC;ADCA");
    }

    #[test]
    fn version_code_is_a_custom_property() {
        let tmp = TempDir::new().unwrap();
        let inputs = ConfigInputs::new(tmp.path()).with_package(config::PackageManifest {
            version: Some("1.4.0".into()),
            ..Default::default()
        });
        let config = config::resolve(&inputs).unwrap();
        let ctx = TransformContext::new(&config, AssetClass::Css);
        assert_eq!(NativeCss.version_code(&ctx), ":root {\n  --appVersion: \"1.4.0\";\n}\n");
    }
}
