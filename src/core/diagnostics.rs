/// Warning channel, offset to line/column mapping and terminal reports.
use ariadne::{Color, Label, Report, ReportKind, Source};
use std::fmt;

/// Soft conditions that never abort a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// A reference named a fork that never executed and had no fallback.
    UnresolvedReference,
    /// The referred fork's chosen branch has no mapping and no fallback.
    MissingMapping,
    /// The document declared a language version other than ours.
    VersionMismatch,
    /// A script block never registers anything and emits nothing.
    ScriptNeverProvides,
    /// A script block reads unseeded randomness.
    AmbientRandomness,
    /// A set fork ran out of branches and was refilled.
    SetExhausted,
    /// Legacy mode declarations are parsed but not applied.
    LegacyMode,
}

impl WarningKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WarningKind::UnresolvedReference => "unresolved-reference",
            WarningKind::MissingMapping => "missing-mapping",
            WarningKind::VersionMismatch => "version-mismatch",
            WarningKind::ScriptNeverProvides => "script-never-provides",
            WarningKind::AmbientRandomness => "ambient-randomness",
            WarningKind::SetExhausted => "set-exhausted",
            WarningKind::LegacyMode => "legacy-mode",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    /// Byte offset in the document that produced the warning.
    pub offset: usize,
}

impl Warning {
    pub fn new(kind: WarningKind, offset: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            offset,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "warning[{}]: {}", self.kind.as_str(), self.message)
    }
}

/// One-based line and column (in characters) of a byte offset.
pub fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let prefix = prefix_of(source, offset);
    let line = prefix.matches('\n').count() + 1;
    let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = prefix[line_start..].chars().count() + 1;
    (line, column)
}

fn prefix_of(source: &str, offset: usize) -> &str {
    let mut end = offset.min(source.len());
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    &source[..end]
}

fn char_index(source: &str, offset: usize) -> usize {
    prefix_of(source, offset).chars().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Render an ariadne report for one message anchored at a byte range.
pub fn report(
    source: &str,
    filename: &str,
    severity: Severity,
    span: std::ops::Range<usize>,
    message: &str,
) -> String {
    let (kind, color) = match severity {
        Severity::Error => (ReportKind::Error, Color::Red),
        Severity::Warning => (ReportKind::Warning, Color::Yellow),
    };
    let start = char_index(source, span.start);
    let end = char_index(source, span.end).max(start + 1);
    let range = start..end;

    let mut output = Vec::new();
    Report::build(kind, (filename, range.clone()))
        .with_message(message)
        .with_label(
            Label::new((filename, range))
                .with_message(message)
                .with_color(color),
        )
        .finish()
        .write((filename, Source::from(source)), &mut output)
        .ok();
    String::from_utf8(output).unwrap_or_default()
}

/// Render every warning of a render or lint pass.
pub fn report_warnings(source: &str, filename: &str, warnings: &[Warning]) -> String {
    warnings
        .iter()
        .map(|w| {
            report(
                source,
                filename,
                Severity::Warning,
                w.offset..w.offset + 1,
                &w.to_string(),
            )
        })
        .collect()
}
