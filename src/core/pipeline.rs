/// The document pipeline: source text → parse → render → cleanup.
///
/// Each call to [`Pipeline::render`] builds a fresh [`Renderer`], so no ledger
/// or script state leaks between renders. Cleanup runs once, on the outermost
/// document, with settings layered defaults < document < caller.
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

use crate::core::analysis::{analyze_document, Analysis};
use crate::core::cleanup::CleanupPass;
use crate::core::diagnostics::Warning;
use crate::core::parser::{parse, ParseError};
use crate::core::renderer::{FsLoader, RenderError, Renderer, SourceLoader};
use crate::schema::settings::{DocumentSettings, RenderSettings, SettingsError};

/// Text produced by a render plus everything reported along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub text: String,
    pub warnings: Vec<Warning>,
}

/// Configured entry point for rendering and analyzing documents.
/// Built via `Pipeline::builder()`.
pub struct Pipeline {
    settings: RenderSettings,
    loader: Rc<dyn SourceLoader>,
}

/// Builder for constructing a `Pipeline`.
pub struct PipelineBuilder {
    settings_path: Option<PathBuf>,
    seed: Option<u64>,
    allow_scripts: Option<bool>,
    working_directory: Option<PathBuf>,
    overrides: Option<DocumentSettings>,
    loader: Option<Rc<dyn SourceLoader>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder {
            settings_path: None,
            seed: None,
            allow_scripts: None,
            working_directory: None,
            overrides: None,
            loader: None,
        }
    }

    /// A pipeline reading includes from the filesystem.
    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self::with_loader(settings, Rc::new(FsLoader))
    }

    pub fn with_loader(settings: &RenderSettings, loader: Rc<dyn SourceLoader>) -> Self {
        Self {
            settings: settings.clone(),
            loader,
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Render `source` and run the cleanup passes over the result.
    pub fn render(&self, source: &str) -> Result<RenderOutput, RenderError> {
        let document = parse(source)?;
        let mut renderer = Renderer::new(&self.settings, Rc::clone(&self.loader));
        let raw = renderer.render_document(&document)?;

        let mut layered = DocumentSettings::default();
        layered.layer(renderer.document_settings());
        layered.layer(&self.settings.overrides);
        let cleanup = layered.resolve();
        debug!(?cleanup, "running cleanup");

        Ok(RenderOutput {
            text: CleanupPass::new(cleanup).apply(&raw),
            warnings: renderer.take_warnings(),
        })
    }

    /// Count the distinct renderings `source` can produce.
    pub fn analyze(&self, source: &str) -> Result<Analysis, ParseError> {
        let document = parse(source)?;
        Ok(analyze_document(&document))
    }
}

impl PipelineBuilder {
    /// Start from the settings in a RON file; other builder calls win over it.
    pub fn settings_file(mut self, path: impl AsRef<Path>) -> Self {
        self.settings_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn allow_scripts(mut self, allowed: bool) -> Self {
        self.allow_scripts = Some(allowed);
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn overrides(mut self, overrides: DocumentSettings) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Provide included documents from somewhere other than the filesystem.
    pub fn source_loader(mut self, loader: Rc<dyn SourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn build(self) -> Result<Pipeline, SettingsError> {
        let mut settings = match &self.settings_path {
            Some(path) => RenderSettings::load_from_ron(path)?,
            None => RenderSettings::default(),
        };
        if let Some(seed) = self.seed {
            settings.random_seed = Some(seed);
        }
        if let Some(allowed) = self.allow_scripts {
            settings.allow_script_execution = allowed;
        }
        if let Some(dir) = self.working_directory {
            settings.working_directory = Some(dir);
        }
        if let Some(overrides) = &self.overrides {
            settings.overrides.layer(overrides);
        }
        Ok(Pipeline {
            settings,
            loader: self.loader.unwrap_or_else(|| Rc::new(FsLoader)),
        })
    }
}
