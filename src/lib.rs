//! Forktext: an interpreter for generative text documents.
//!
//! A document is plain text with weighted forks (`{(Alice), (Bob) 30}`) that
//! pick one branch per render, back-references (`{@Name}`) that replay or map
//! an earlier pick, script blocks that register callables and settings, and
//! includes. Documents can be rendered with a seed for reproducible output,
//! or analyzed to count how many distinct renderings they can produce.

pub mod core;
pub mod schema;

use std::rc::Rc;

pub use crate::core::analysis::Analysis;
pub use crate::core::diagnostics::{Warning, WarningKind};
pub use crate::core::parser::{parse, ParseError};
pub use crate::core::pipeline::{Pipeline, RenderOutput};
pub use crate::core::renderer::{FsLoader, IncludeError, RenderError};
pub use crate::schema::ast::Document;
pub use crate::schema::settings::{DocumentSettings, RenderSettings};

/// Render a document with the given settings, reading includes from disk.
/// Warnings are logged and dropped; use [`Pipeline`] to keep them.
pub fn render(source: &str, settings: &RenderSettings) -> Result<String, RenderError> {
    Pipeline::from_settings(settings)
        .render(source)
        .map(|output| output.text)
}

/// Count the distinct renderings a document can produce.
pub fn analyze(source: &str) -> Result<Analysis, ParseError> {
    let document = parse(source)?;
    Ok(crate::core::analysis::analyze_document(&document))
}

/// Render with includes disabled, for hosts without a filesystem.
pub fn render_sandboxed(source: &str, settings: &RenderSettings) -> Result<String, RenderError> {
    Pipeline::with_loader(settings, Rc::new(crate::core::renderer::NoFilesystem))
        .render(source)
        .map(|output| output.text)
}
