/// Document AST: literal text, weighted forks and back-references.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Byte range into the source document.
pub type Span = Range<usize>;

/// An ordered sequence of nodes. Order is significant and preserved.
pub type Ast = Vec<AstNode>;

/// A single node of a parsed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstNode {
    /// Literal text, emitted as-is.
    Text(String),
    /// A weighted random branch point.
    Fork(ChoiceFork),
    /// A later recall or remapping of an earlier fork's outcome.
    Reference(Reference),
}

/// A value paired with an optional probability weight.
///
/// `None` means "share the remaining probability mass equally with the
/// other unweighted siblings".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weighted<T> {
    pub value: T,
    pub weight: Option<f64>,
}

impl<T> Weighted<T> {
    pub fn new(value: T, weight: Option<f64>) -> Self {
        Self { value, weight }
    }

    /// The weight used for sampling; unset weights count as zero.
    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(0.0)
    }
}

/// One alternative of a fork.
pub type WeightedChoice = Weighted<Choice>;

/// What a fork branch or reference mapping renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Choice {
    /// A nested sub-document: `(text with {forks})` or a bare `{fork}`.
    Ast(Ast),
    /// An embedded script: `[ ... ]`.
    Script(ScriptBlock),
    /// A call to a function registered by an earlier script: `call name`.
    Call(FunctionCallRef),
}

impl Choice {
    /// A choice that renders the given literal text.
    pub fn text(text: impl Into<String>) -> Self {
        Choice::Ast(vec![AstNode::Text(text.into())])
    }
}

/// Opaque script source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptBlock {
    pub source: String,
    pub span: Span,
}

/// A reference to a function previously registered by `provide`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRef {
    pub name: String,
    pub span: Span,
}

/// A weighted random branch point.
///
/// `weights` always holds normalized numeric weights once the fork has been
/// built with [`ChoiceFork::new`]; `initial` snapshots them so a set fork can
/// reset after it has been exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceFork {
    pub identifier: Option<String>,
    pub is_silent: bool,
    pub is_set: bool,
    pub weights: Vec<WeightedChoice>,
    pub(crate) initial: Vec<f64>,
    pub span: Span,
}

/// A back-reference to a named fork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub referred_identifier: String,
    /// Optional alias under which this reference records its own outcome.
    pub identifier: Option<String>,
    pub is_silent: bool,
    pub index_map: BTreeMap<usize, Choice>,
    pub fallback: Option<Box<Choice>>,
    pub re_execute: bool,
    pub span: Span,
}

impl Reference {
    /// A copy reference replays the referred fork's output verbatim.
    pub fn is_copy(&self) -> bool {
        self.index_map.is_empty() && self.fallback.is_none()
    }
}

/// A legacy pattern-substitution mode. Parsed but never applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeDeclaration {
    pub name: String,
    pub rules: Vec<ModeRule>,
    pub span: Span,
}

/// A single `matcher -> replacement` rule of a legacy mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeRule {
    pub matcher: String,
    pub replacement: Choice,
}

/// A parsed document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    pub nodes: Ast,
    pub modes: Vec<ModeDeclaration>,
    pub mode_switches: Vec<String>,
}

impl Document {
    /// True when the document carries any legacy mode syntax.
    pub fn uses_legacy_modes(&self) -> bool {
        !self.modes.is_empty() || !self.mode_switches.is_empty()
    }

    /// Every script block in the document, in source order of discovery.
    pub fn script_blocks(&self) -> Vec<&ScriptBlock> {
        let mut blocks = Vec::new();
        collect_scripts(&self.nodes, &mut blocks);
        blocks
    }
}

fn collect_scripts<'a>(ast: &'a Ast, blocks: &mut Vec<&'a ScriptBlock>) {
    for node in ast {
        match node {
            AstNode::Text(_) => {}
            AstNode::Fork(fork) => {
                for weighted in &fork.weights {
                    collect_choice_scripts(&weighted.value, blocks);
                }
            }
            AstNode::Reference(reference) => {
                for choice in reference.index_map.values() {
                    collect_choice_scripts(choice, blocks);
                }
                if let Some(fallback) = &reference.fallback {
                    collect_choice_scripts(fallback, blocks);
                }
            }
        }
    }
}

fn collect_choice_scripts<'a>(choice: &'a Choice, blocks: &mut Vec<&'a ScriptBlock>) {
    match choice {
        Choice::Ast(ast) => collect_scripts(ast, blocks),
        Choice::Script(block) => blocks.push(block),
        Choice::Call(_) => {}
    }
}
