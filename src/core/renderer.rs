/// Renderer: walks a parsed document, samples forks, resolves references
/// against the per-render ledger, runs script blocks and splices includes.
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::choice::ChoiceError;
use crate::core::diagnostics::{Warning, WarningKind};
use crate::core::parser::{parse, ParseError};
use crate::core::script::{
    check_provides, validate_script, Includer, Provided, RhaiEngine, ScriptApi, ScriptEngine,
    ScriptError, ScriptOutcome,
};
use crate::schema::ast::{
    Ast, AstNode, Choice, ChoiceFork, Document, FunctionCallRef, Reference, ScriptBlock,
};
use crate::schema::settings::{DocumentSettings, RenderSettings, LANGUAGE_VERSION};

#[derive(Debug, Error)]
pub enum IncludeError {
    #[error("included document not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("includes are unavailable without filesystem access")]
    NoFilesystem,
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("{source} (at offset {offset})")]
    Choice {
        #[source]
        source: ChoiceError,
        offset: usize,
    },
    #[error("{source} (at offset {offset})")]
    Script {
        #[source]
        source: ScriptError,
        offset: usize,
    },
    #[error("include error: {0}")]
    Include(#[from] IncludeError),
    #[error("in included document {}: {source}", .path.display())]
    InInclude {
        path: PathBuf,
        #[source]
        source: Box<RenderError>,
    },
    #[error("cannot re-execute unknown identifier '{name}' (at offset {offset})")]
    UnknownIdentifier { name: String, offset: usize },
    #[error("identifier '{name}' is declared more than once (at offset {offset})")]
    DuplicateIdentifier { name: String, offset: usize },
    #[error("no function named '{name}' has been provided (at offset {offset})")]
    FunctionNotFound { name: String, offset: usize },
    #[error("'{name}' was provided but is not callable (at offset {offset})")]
    NotCallable { name: String, offset: usize },
    #[error("script execution is disabled (script block at offset {offset})")]
    ScriptExecutionDisabled { offset: usize },
}

impl RenderError {
    /// Offset of the error in the document being rendered, if it has one.
    /// Errors raised inside an included document belong to that document.
    pub fn offset(&self) -> Option<usize> {
        match self {
            RenderError::Parse(e) => Some(e.offset()),
            RenderError::Choice { offset, .. }
            | RenderError::Script { offset, .. }
            | RenderError::UnknownIdentifier { offset, .. }
            | RenderError::DuplicateIdentifier { offset, .. }
            | RenderError::FunctionNotFound { offset, .. }
            | RenderError::NotCallable { offset, .. }
            | RenderError::ScriptExecutionDisabled { offset } => Some(*offset),
            RenderError::Include(_) | RenderError::InInclude { .. } => None,
        }
    }
}

/// Where a ledger entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Declared by the node at this offset of the current document.
    Local(usize),
    /// Merged in from an included document.
    Imported,
}

/// The latest outcome of a named fork (or named reference).
#[derive(Debug, Clone)]
pub struct ExecutedFork {
    /// Live fork state; set forks carry their remaining weights here.
    pub fork: ChoiceFork,
    /// `None` for a silent set fork that has not been drawn yet.
    pub chosen_index: Option<usize>,
    pub rendered: String,
    pub origin: Origin,
}

/// Everything an include hands back to its includer.
#[derive(Debug)]
pub struct IncludedDocument {
    pub path: PathBuf,
    pub text: String,
    pub ledger: FxHashMap<String, ExecutedFork>,
    pub functions: FxHashMap<String, Provided>,
    pub settings: DocumentSettings,
    pub warnings: Vec<Warning>,
}

/// Reads included documents.
pub trait SourceLoader {
    fn load(&self, path: &Path) -> Result<String, IncludeError>;
}

/// Reads includes from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn load(&self, path: &Path) -> Result<String, IncludeError> {
        std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                IncludeError::NotFound(path.to_path_buf())
            } else {
                IncludeError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })
    }
}

/// For environments without a filesystem; every include fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFilesystem;

impl SourceLoader for NoFilesystem {
    fn load(&self, _path: &Path) -> Result<String, IncludeError> {
        Err(IncludeError::NoFilesystem)
    }
}

/// In-memory documents keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    documents: FxHashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn with(mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        self.documents.insert(path.into(), source.into());
        self
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&self, path: &Path) -> Result<String, IncludeError> {
        self.documents
            .get(path)
            .cloned()
            .ok_or_else(|| IncludeError::NotFound(path.to_path_buf()))
    }
}

/// Renders an include in a fresh renderer that draws from a snapshot of the
/// includer's generator; the includer's own generator is never advanced.
struct IncludeContext {
    rng: Rc<RefCell<StdRng>>,
    allow_scripts: bool,
    working_dir: PathBuf,
    loader: Rc<dyn SourceLoader>,
}

impl Includer for IncludeContext {
    fn include(&self, path: &str) -> Result<IncludedDocument, RenderError> {
        let resolved = self.working_dir.join(path);
        debug!(path = %resolved.display(), "including document");
        let source = self.loader.load(&resolved)?;

        let nested = |e: RenderError| RenderError::InInclude {
            path: resolved.clone(),
            source: Box::new(e),
        };
        let document = parse(&source).map_err(|e| nested(e.into()))?;

        let snapshot = self.rng.borrow().clone();
        let child_dir = resolved
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.working_dir.clone());
        let mut child = Renderer::with_rng(
            Rc::new(RefCell::new(snapshot)),
            self.allow_scripts,
            child_dir,
            Rc::clone(&self.loader),
        );
        let text = child.render_document(&document).map_err(nested)?;
        Ok(child.into_included(resolved.clone(), text))
    }
}

/// One render's worth of state. Not reusable across documents.
pub struct Renderer {
    rng: Rc<RefCell<StdRng>>,
    allow_scripts: bool,
    working_dir: PathBuf,
    loader: Rc<dyn SourceLoader>,
    engine: Box<dyn ScriptEngine>,
    ledger: FxHashMap<String, ExecutedFork>,
    functions: FxHashMap<String, Provided>,
    document_settings: DocumentSettings,
    anonymous_sets: FxHashMap<usize, ChoiceFork>,
    warnings: Vec<Warning>,
}

impl Renderer {
    pub fn new(settings: &RenderSettings, loader: Rc<dyn SourceLoader>) -> Self {
        let rng = match settings.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(
            Rc::new(RefCell::new(rng)),
            settings.allow_script_execution,
            settings.base_directory(),
            loader,
        )
    }

    fn with_rng(
        rng: Rc<RefCell<StdRng>>,
        allow_scripts: bool,
        working_dir: PathBuf,
        loader: Rc<dyn SourceLoader>,
    ) -> Self {
        let includer = IncludeContext {
            rng: Rc::clone(&rng),
            allow_scripts,
            working_dir: working_dir.clone(),
            loader: Rc::clone(&loader),
        };
        let engine = RhaiEngine::new(ScriptApi {
            rng: Rc::clone(&rng),
            includer: Some(Rc::new(includer)),
        });
        Self {
            rng,
            allow_scripts,
            working_dir,
            loader,
            engine: Box::new(engine),
            ledger: FxHashMap::default(),
            functions: FxHashMap::default(),
            document_settings: DocumentSettings::default(),
            anonymous_sets: FxHashMap::default(),
            warnings: Vec::new(),
        }
    }

    pub fn ledger(&self) -> &FxHashMap<String, ExecutedFork> {
        &self.ledger
    }

    /// Settings accumulated from the document's scripts and includes.
    pub fn document_settings(&self) -> &DocumentSettings {
        &self.document_settings
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Render a whole document, without cleanup.
    pub fn render_document(&mut self, document: &Document) -> Result<String, RenderError> {
        if document.uses_legacy_modes() {
            let offset = document.modes.first().map(|m| m.span.start).unwrap_or(0);
            self.push_warning(Warning::new(
                WarningKind::LegacyMode,
                offset,
                "mode declarations are parsed but not applied; use forks and references instead",
            ));
        }
        self.render_ast(&document.nodes, true)
    }

    /// Render the document at `path` (relative to the working directory) in
    /// isolation and merge its ledger, functions and settings into this one.
    pub fn render_include(&mut self, path: &str) -> Result<String, RenderError> {
        let context = IncludeContext {
            rng: Rc::clone(&self.rng),
            allow_scripts: self.allow_scripts,
            working_dir: self.working_dir.clone(),
            loader: Rc::clone(&self.loader),
        };
        let included = context.include(path)?;
        let text = included.text.clone();
        self.merge_include(included);
        Ok(text)
    }

    fn into_included(self, path: PathBuf, text: String) -> IncludedDocument {
        IncludedDocument {
            path,
            text,
            ledger: self.ledger,
            functions: self.functions,
            settings: self.document_settings,
            warnings: self.warnings,
        }
    }

    fn merge_include(&mut self, included: IncludedDocument) {
        debug!(
            path = %included.path.display(),
            forks = included.ledger.len(),
            functions = included.functions.len(),
            "merging include"
        );
        for (name, mut record) in included.ledger {
            record.origin = Origin::Imported;
            self.ledger.insert(name, record);
        }
        self.functions.extend(included.functions);
        self.document_settings.layer(&included.settings);
        // Already logged by the child renderer.
        self.warnings.extend(included.warnings);
    }

    fn render_ast(&mut self, ast: &Ast, at_line_start: bool) -> Result<String, RenderError> {
        let mut out = String::new();
        let mut swallow_newline = false;

        for node in ast {
            match node {
                AstNode::Text(text) => {
                    let text = if swallow_newline {
                        strip_line_break(text)
                    } else {
                        text.as_str()
                    };
                    swallow_newline = false;
                    out.push_str(text);
                }
                AstNode::Fork(fork) => {
                    let rendered = self.render_fork(fork)?;
                    if fork.is_silent {
                        swallow_newline |= is_line_start(&out, at_line_start);
                    } else {
                        out.push_str(&rendered);
                        swallow_newline = false;
                    }
                }
                AstNode::Reference(reference) => {
                    let rendered = self.resolve_reference(reference)?;
                    if reference.is_silent {
                        swallow_newline |= is_line_start(&out, at_line_start);
                    } else {
                        out.push_str(&rendered);
                        swallow_newline = false;
                    }
                }
            }
        }
        Ok(out)
    }

    fn render_choice(&mut self, choice: &Choice) -> Result<String, RenderError> {
        match choice {
            Choice::Ast(ast) => self.render_ast(ast, false),
            Choice::Script(block) => self.run_script(block),
            Choice::Call(call) => self.run_call(call),
        }
    }

    fn render_fork(&mut self, fork: &ChoiceFork) -> Result<String, RenderError> {
        let offset = fork.span.start;
        let origin = Origin::Local(offset);
        if let Some(name) = &fork.identifier {
            self.check_unique(name, origin, offset)?;
        }

        if fork.is_silent && fork.is_set {
            // Drawn lazily by the first reference.
            if let Some(name) = &fork.identifier {
                let registered = self
                    .ledger
                    .get(name)
                    .is_some_and(|record| record.origin == origin);
                if !registered {
                    self.ledger.insert(
                        name.clone(),
                        ExecutedFork {
                            fork: fork.clone(),
                            chosen_index: None,
                            rendered: String::new(),
                            origin,
                        },
                    );
                }
            }
            return Ok(String::new());
        }

        let live = match &fork.identifier {
            Some(name) => match self.ledger.get(name) {
                Some(record) if record.origin == origin => record.fork.clone(),
                _ => fork.clone(),
            },
            None if fork.is_set => self
                .anonymous_sets
                .get(&offset)
                .cloned()
                .unwrap_or_else(|| fork.clone()),
            None => fork.clone(),
        };

        let (live, index, rendered) = self.execute_fork(live)?;
        match &fork.identifier {
            Some(name) => {
                self.ledger.insert(
                    name.clone(),
                    ExecutedFork {
                        fork: live,
                        chosen_index: Some(index),
                        rendered: rendered.clone(),
                        origin,
                    },
                );
            }
            None if fork.is_set => {
                self.anonymous_sets.insert(offset, live);
            }
            None => {}
        }
        Ok(rendered)
    }

    /// Draw from `fork` and render the chosen branch.
    fn execute_fork(
        &mut self,
        mut fork: ChoiceFork,
    ) -> Result<(ChoiceFork, usize, String), RenderError> {
        let offset = fork.span.start;
        let draw = {
            let mut rng = self.rng.borrow_mut();
            fork.call(&mut *rng)
                .map_err(|source| RenderError::Choice { source, offset })?
        };
        if draw.reset {
            let name = fork.identifier.as_deref().unwrap_or("anonymous set");
            self.push_warning(Warning::new(
                WarningKind::SetExhausted,
                offset,
                format!("set '{name}' was exhausted and has been refilled"),
            ));
        }
        let choice = fork.weights[draw.index].value.clone();
        let rendered = self.render_choice(&choice)?;
        Ok((fork, draw.index, rendered))
    }

    fn resolve_reference(&mut self, reference: &Reference) -> Result<String, RenderError> {
        let name = &reference.referred_identifier;
        let offset = reference.span.start;

        let Some(record) = self.ledger.get(name).cloned() else {
            if reference.re_execute {
                return Err(RenderError::UnknownIdentifier {
                    name: name.clone(),
                    offset,
                });
            }
            if let Some(fallback) = &reference.fallback {
                return self.render_choice(fallback);
            }
            self.push_warning(Warning::new(
                WarningKind::UnresolvedReference,
                offset,
                format!("reference to '{name}', which has not been declared"),
            ));
            return Ok(String::new());
        };

        let (fork, index, rendered) = match record.chosen_index {
            Some(index) if !reference.re_execute => (record.fork, index, record.rendered),
            _ => {
                let (fork, index, rendered) = self.execute_fork(record.fork)?;
                self.ledger.insert(
                    name.clone(),
                    ExecutedFork {
                        fork: fork.clone(),
                        chosen_index: Some(index),
                        rendered: rendered.clone(),
                        origin: record.origin,
                    },
                );
                (fork, index, rendered)
            }
        };

        let output = if reference.is_copy() {
            rendered
        } else if let Some(choice) = reference.index_map.get(&index) {
            self.render_choice(choice)?
        } else if let Some(fallback) = &reference.fallback {
            self.render_choice(fallback)?
        } else {
            self.push_warning(Warning::new(
                WarningKind::MissingMapping,
                offset,
                format!("no mapping for branch {index} of '{name}'"),
            ));
            String::new()
        };

        if let Some(alias) = &reference.identifier {
            let origin = Origin::Local(offset);
            self.check_unique(alias, origin, offset)?;
            self.ledger.insert(
                alias.clone(),
                ExecutedFork {
                    fork,
                    chosen_index: Some(index),
                    rendered: output.clone(),
                    origin,
                },
            );
        }
        Ok(output)
    }

    fn run_script(&mut self, block: &ScriptBlock) -> Result<String, RenderError> {
        let offset = block.span.start;
        if !self.allow_scripts {
            return Err(RenderError::ScriptExecutionDisabled { offset });
        }
        for warning in validate_script(&block.source, offset) {
            self.push_warning(warning);
        }
        let outcome = self
            .engine
            .evaluate(&block.source)
            .map_err(|e| lift_script_error(e, offset))?;
        if let Some(warning) = check_provides(&block.source, &outcome, offset) {
            self.push_warning(warning);
        }
        Ok(self.absorb(outcome, offset))
    }

    /// Fold a script's registrations into the render tables; returns its output.
    fn absorb(&mut self, outcome: ScriptOutcome, offset: usize) -> String {
        let ScriptOutcome {
            output,
            provided,
            settings,
            included,
        } = outcome;
        for document in included {
            self.merge_include(document);
        }
        self.functions.extend(provided);
        if let Some(settings) = settings {
            if let Some(version) = settings.version.as_deref() {
                if version != LANGUAGE_VERSION {
                    self.push_warning(Warning::new(
                        WarningKind::VersionMismatch,
                        offset,
                        format!(
                            "document declares version {version}, this renderer implements {LANGUAGE_VERSION}"
                        ),
                    ));
                }
            }
            self.document_settings.layer(&settings);
        }
        output
    }

    fn run_call(&mut self, call: &FunctionCallRef) -> Result<String, RenderError> {
        let offset = call.span.start;
        match self.functions.get(&call.name).cloned() {
            None => Err(RenderError::FunctionNotFound {
                name: call.name.clone(),
                offset,
            }),
            Some(Provided::Value(_)) => Err(RenderError::NotCallable {
                name: call.name.clone(),
                offset,
            }),
            Some(Provided::Function(function)) => self
                .engine
                .call(&function)
                .map_err(|e| lift_script_error(e, offset)),
        }
    }

    /// Two different local nodes may not share an identifier.
    fn check_unique(&self, name: &str, origin: Origin, offset: usize) -> Result<(), RenderError> {
        match self.ledger.get(name) {
            Some(ExecutedFork {
                origin: Origin::Local(existing),
                ..
            }) if Origin::Local(*existing) != origin => Err(RenderError::DuplicateIdentifier {
                name: name.to_string(),
                offset,
            }),
            _ => Ok(()),
        }
    }

    fn push_warning(&mut self, warning: Warning) {
        warn!(kind = warning.kind.as_str(), offset = warning.offset, "{}", warning.message);
        self.warnings.push(warning);
    }
}

fn lift_script_error(error: ScriptError, offset: usize) -> RenderError {
    match error {
        ScriptError::Include(inner) => *inner,
        source => RenderError::Script { source, offset },
    }
}

/// True when only horizontal whitespace follows the last line break.
fn is_line_start(out: &str, at_line_start: bool) -> bool {
    let (tail, starts_line) = match out.rfind('\n') {
        Some(i) => (&out[i + 1..], true),
        None => (out, at_line_start),
    };
    starts_line && tail.chars().all(|c| c == ' ' || c == '\t')
}

/// Drop leading horizontal whitespace and one line break, if one follows.
fn strip_line_break(text: &str) -> &str {
    let trimmed = text.trim_start_matches(|c| c == ' ' || c == '\t');
    trimmed
        .strip_prefix("\r\n")
        .or_else(|| trimmed.strip_prefix('\n'))
        .unwrap_or(text)
}
