//! The native HTML transformer: static pages pass through, and the pipeline
//! minifies them in production.

use super::{AssetClass, PipelineReport, TransformContext, TransformError, TransformOutput, Transformer};
use crate::config::ResolvedConfig;
use crate::guard::WriteGuard;
use std::fs;
use std::path::Path;

pub struct NativeHtml;

impl Transformer for NativeHtml {
    fn version_code(&self, _ctx: &TransformContext<'_>) -> String {
        String::new()
    }

    fn parse(&self, _ctx: &TransformContext<'_>, path: &Path) -> Result<TransformOutput, TransformError> {
        Ok(TransformOutput::code(fs::read_to_string(path)?))
    }
}

/// Run the HTML pipeline with the transformer `html.compiler.module` names.
pub fn run(config: &ResolvedConfig, guard: &WriteGuard) -> PipelineReport {
    super::run(config, guard, AssetClass::Html)
}
