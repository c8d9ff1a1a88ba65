/// Doc Linter: static checks over forktext documents.
///
/// Usage: doc_linter <file-or-dir>
///
/// Parses every document (recursing into directories for `.txt` and `.fork`
/// files), then reports syntax errors, unresolved references, script
/// advisories, legacy mode usage and the number of possible renderings.
/// Exits with 1 if any document fails to parse.
use forktext::core::analysis::analyze_document;
use forktext::core::diagnostics::{line_column, report, report_warnings, Severity, Warning};
use forktext::core::script::validate_script;
use forktext::{parse, Document, WarningKind};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

const DOCUMENT_EXTENSIONS: &[&str] = &["txt", "fork"];

struct LintResult {
    parsed: bool,
    warnings: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: doc_linter <file-or-dir>");
        process::exit(0);
    }

    let root = Path::new(&args[1]);
    let mut files = Vec::new();
    if root.is_file() {
        files.push(root.to_path_buf());
    } else if root.is_dir() {
        collect_documents(root, &mut files);
        files.sort();
    } else {
        eprintln!("ERROR: Path '{}' does not exist", root.display());
        process::exit(1);
    }

    let mut failed = 0;
    let mut warnings = 0;
    for path in &files {
        let result = lint_file(path);
        if !result.parsed {
            failed += 1;
        }
        warnings += result.warnings;
    }

    println!(
        "\nSummary: {} documents, {} failed to parse, {} warnings",
        files.len(),
        failed,
        warnings
    );
    if failed > 0 {
        process::exit(1);
    }
}

fn collect_documents(dir: &Path, files: &mut Vec<PathBuf>) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                collect_documents(&path, files);
            } else if path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext))
            {
                files.push(path);
            }
        }
    }
}

fn lint_file(path: &Path) -> LintResult {
    let filename = path.display().to_string();
    println!("=== {filename} ===");

    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("ERROR: Failed to read {filename}: {e}");
            return LintResult {
                parsed: false,
                warnings: 0,
            };
        }
    };

    let document = match parse(&source) {
        Ok(document) => document,
        Err(e) => {
            let offset = e.offset();
            let (line, column) = e.line_column(&source);
            eprint!(
                "{}",
                report(&source, &filename, Severity::Error, offset..offset + 1, &e.to_string())
            );
            println!("ERROR: {filename}:{line}:{column}: {e}");
            return LintResult {
                parsed: false,
                warnings: 0,
            };
        }
    };

    let findings = lint_document(&document);
    eprint!("{}", report_warnings(&source, &filename, &findings));
    for finding in &findings {
        let (line, column) = line_column(&source, finding.offset);
        println!("WARNING: {filename}:{line}:{column}: {finding}");
    }

    let analysis = analyze_document(&document);
    println!(
        "  {} forks, {} references, {} possible outcomes",
        analysis.forks, analysis.references, analysis.possible_outcomes
    );

    LintResult {
        parsed: true,
        warnings: findings.len(),
    }
}

/// Everything that can be flagged without rendering.
fn lint_document(document: &Document) -> Vec<Warning> {
    let mut findings = Vec::new();

    let analysis = analyze_document(document);
    for name in &analysis.unresolved {
        findings.push(Warning::new(
            WarningKind::UnresolvedReference,
            0,
            format!("'{name}' is referenced but not declared in this document"),
        ));
    }

    for block in document.script_blocks() {
        findings.extend(validate_script(&block.source, block.span.start));
    }

    if let Some(mode) = document.modes.first() {
        findings.push(Warning::new(
            WarningKind::LegacyMode,
            mode.span.start,
            format!(
                "{} legacy mode declaration(s) will be ignored",
                document.modes.len()
            ),
        ));
    } else if !document.mode_switches.is_empty() {
        findings.push(Warning::new(
            WarningKind::LegacyMode,
            0,
            "legacy `use` switches will be ignored",
        ));
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lint(source: &str) -> Vec<WarningKind> {
        lint_document(&parse(source).unwrap())
            .into_iter()
            .map(|w| w.kind)
            .collect()
    }

    #[test]
    fn clean_document_has_no_findings() {
        assert!(lint("{Name: (Alice), (Bob)} met {@Name}").is_empty());
    }

    #[test]
    fn unresolved_and_ambient_randomness_are_flagged() {
        let kinds = lint("{@Ghost} {[timestamp()]}");
        assert!(kinds.contains(&WarningKind::UnresolvedReference));
        assert!(kinds.contains(&WarningKind::AmbientRandomness));
    }

    #[test]
    fn legacy_modes_are_flagged() {
        let kinds = lint("{mode Loud: match \"a\" -> \"A\"} text");
        assert_eq!(kinds, vec![WarningKind::LegacyMode]);
    }
}
