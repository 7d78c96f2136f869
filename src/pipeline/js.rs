//! The native JS transformer: sources are already browser-ready modules and
//! pass through unchanged.
//!
//! The version file is an ES module:
//!
//! ```js
//! export const appVersion = "1.4.0";
//! ```

use super::{AssetClass, PipelineReport, TransformContext, TransformError, TransformOutput, Transformer};
use crate::config::ResolvedConfig;
use crate::guard::WriteGuard;
use std::fs;
use std::path::Path;

pub struct NativeJs;

impl Transformer for NativeJs {
    fn version_code(&self, ctx: &TransformContext<'_>) -> String {
        let version = serde_json::to_string(ctx.app_version()).unwrap_or_default();
        format!("export const {} = {version};\n", ctx.version_var())
    }

    fn parse(&self, _ctx: &TransformContext<'_>, path: &Path) -> Result<TransformOutput, TransformError> {
        Ok(TransformOutput::code(fs::read_to_string(path)?))
    }
}

/// Run the JS pipeline with the transformer `js.compiler.module` names.
pub fn run(config: &ResolvedConfig, guard: &WriteGuard) -> PipelineReport {
    super::run(config, guard, AssetClass::Js)
}
