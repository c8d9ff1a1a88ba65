//! WASM bindings for forktext: powers the in-browser playground.
//!
//! Browsers have no filesystem, so every include fails with
//! `IncludeError::NoFilesystem`.

use std::rc::Rc;
use wasm_bindgen::prelude::*;

use forktext::core::diagnostics::line_column;
use forktext::core::pipeline::Pipeline;
use forktext::core::renderer::NoFilesystem;
use forktext::{analyze as analyze_source, RenderSettings};

// ---------------------------------------------------------------------------
// JSON helper types for communication across the WASM boundary
// ---------------------------------------------------------------------------
#[derive(serde::Serialize)]
struct WarningInfo {
    kind: &'static str,
    message: String,
    line: usize,
    column: usize,
}

#[derive(serde::Serialize)]
struct RenderInfo {
    text: String,
    warnings: Vec<WarningInfo>,
}

#[derive(serde::Serialize)]
struct AnalysisInfo {
    /// Decimal string; counts routinely exceed what a JS number holds.
    possible_outcomes: String,
    forks: usize,
    references: usize,
    unresolved: Vec<String>,
}

fn parse_settings(settings_json: &str) -> Result<RenderSettings, serde_json::Error> {
    if settings_json.trim().is_empty() {
        return Ok(RenderSettings::default());
    }
    serde_json::from_str(settings_json)
}

fn render_info(source: &str, settings_json: &str) -> Result<RenderInfo, String> {
    let settings =
        parse_settings(settings_json).map_err(|e| format!("Invalid settings JSON: {e}"))?;
    let pipeline = Pipeline::with_loader(&settings, Rc::new(NoFilesystem));
    let output = pipeline.render(source).map_err(|e| match e.offset() {
        Some(offset) => {
            let (line, column) = line_column(source, offset);
            format!("{line}:{column}: {e}")
        }
        None => e.to_string(),
    })?;
    let warnings = output
        .warnings
        .into_iter()
        .map(|w| {
            let (line, column) = line_column(source, w.offset);
            WarningInfo {
                kind: w.kind.as_str(),
                message: w.message,
                line,
                column,
            }
        })
        .collect();
    Ok(RenderInfo {
        text: output.text,
        warnings,
    })
}

fn analysis_info(source: &str) -> Result<AnalysisInfo, String> {
    let analysis = analyze_source(source).map_err(|e| {
        let (line, column) = e.line_column(source);
        format!("{line}:{column}: {e}")
    })?;
    Ok(AnalysisInfo {
        possible_outcomes: analysis.possible_outcomes.to_string(),
        forks: analysis.forks,
        references: analysis.references,
        unresolved: analysis.unresolved,
    })
}

/// Render a document. `settings_json` uses the `RenderSettings` field names
/// (`random_seed`, `allow_script_execution`, `overrides`) and may be empty.
///
/// Returns JSON: `{ "text": "...", "warnings": [{ "kind", "message", "line", "column" }] }`.
#[wasm_bindgen]
pub fn render(source: &str, settings_json: &str) -> Result<String, JsError> {
    let info = render_info(source, settings_json).map_err(|e| JsError::new(&e))?;
    serde_json::to_string(&info).map_err(|e| JsError::new(&format!("Serialization error: {e}")))
}

/// Count the possible renderings of a document.
///
/// Returns JSON: `{ "possible_outcomes": "12", "forks", "references", "unresolved" }`.
#[wasm_bindgen]
pub fn analyze(source: &str) -> Result<String, JsError> {
    let info = analysis_info(source).map_err(|e| JsError::new(&e))?;
    serde_json::to_string(&info).map_err(|e| JsError::new(&format!("Serialization error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_with_seed_is_stable() {
        let settings = r#"{"random_seed": 7}"#;
        let a = render_info("{(a), (b), (c)} and {(d), (e)}", settings).unwrap();
        let b = render_info("{(a), (b), (c)} and {(d), (e)}", settings).unwrap();
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn empty_settings_use_defaults() {
        let info = render_info("hello", "").unwrap();
        assert_eq!(info.text, "Hello\n");
    }

    #[test]
    fn includes_are_unavailable() {
        let err = render_info("{[include(\"other.txt\")]}", r#"{"random_seed": 1}"#)
            .err()
            .unwrap();
        assert!(err.contains("filesystem"), "{err}");
    }

    #[test]
    fn warnings_carry_positions() {
        let info = render_info("line one\n{@Ghost}", r#"{"random_seed": 1}"#).unwrap();
        assert_eq!(info.warnings.len(), 1);
        assert_eq!(info.warnings[0].kind, "unresolved-reference");
        assert_eq!((info.warnings[0].line, info.warnings[0].column), (2, 1));
    }

    #[test]
    fn analysis_count_is_a_string() {
        let info = analysis_info("{(a), (b)} {(c), (d), (e)}").unwrap();
        assert_eq!(info.possible_outcomes, "6");
    }

    #[test]
    fn syntax_errors_report_position() {
        let err = analysis_info("ok\n  {(a)").err().unwrap();
        assert!(err.starts_with("2:3:"), "{err}");
    }
}
