/// Embedded scripting: the [`ScriptEngine`] capability, its Rhai
/// implementation and the advisory script validator.
///
/// Scripts see a fixed API (`choice`, `weighted_choose`, `random_int`,
/// `random_float`, `provide`, `include`, `print`). Everything they register
/// comes back to the renderer through [`ScriptOutcome`]; the engine itself
/// never touches the ledger.
use rand::rngs::StdRng;
use rand::Rng;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, Map, AST, FLOAT, INT};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

use crate::core::choice::{normalize_weights, weighted_choose};
use crate::core::diagnostics::{Warning, WarningKind};
use crate::core::renderer::{IncludedDocument, RenderError};
use crate::schema::ast::Weighted;
use crate::schema::settings::DocumentSettings;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script compile error: {0}")]
    Compile(String),
    #[error("script runtime error: {0}")]
    Runtime(String),
    #[error("provided function failed: {0}")]
    ForeignFunction(String),
    #[error("include from script failed: {0}")]
    Include(Box<RenderError>),
}

/// An opaque callable registered by `provide`. Only the engine that created
/// it knows how to invoke it.
#[derive(Clone)]
pub struct ScriptFunction(Rc<dyn Any>);

impl ScriptFunction {
    pub fn new<T: Any>(inner: T) -> Self {
        Self(Rc::new(inner))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScriptFunction(..)")
    }
}

/// One entry registered by `provide`.
#[derive(Debug, Clone)]
pub enum Provided {
    Function(ScriptFunction),
    /// A non-callable value; `call` on it fails with `NotCallable`.
    Value(String),
}

/// Everything one script evaluation produced.
#[derive(Debug, Default)]
pub struct ScriptOutcome {
    pub output: String,
    pub provided: Vec<(String, Provided)>,
    pub settings: Option<DocumentSettings>,
    pub included: Vec<IncludedDocument>,
}

/// Narrow capability the renderer needs from a scripting engine.
pub trait ScriptEngine {
    fn evaluate(&mut self, source: &str) -> Result<ScriptOutcome, ScriptError>;
    fn call(&mut self, function: &ScriptFunction) -> Result<String, ScriptError>;
}

/// Renders another document on behalf of a script's `include(path)`.
pub trait Includer {
    fn include(&self, path: &str) -> Result<IncludedDocument, RenderError>;
}

/// Shared state the script API closures capture.
#[derive(Clone)]
pub struct ScriptApi {
    pub rng: Rc<RefCell<StdRng>>,
    pub includer: Option<Rc<dyn Includer>>,
}

/// A `provide`d Rhai function pointer plus the AST it was defined in.
struct RhaiFunction {
    ptr: FnPtr,
    ast: Rc<AST>,
}

#[derive(Default)]
struct Sink {
    output: String,
    provided: Vec<(String, Provided)>,
    settings: Option<DocumentSettings>,
    included: Vec<IncludedDocument>,
    current_ast: Option<Rc<AST>>,
    failure: Option<RenderError>,
}

pub struct RhaiEngine {
    engine: Engine,
    sink: Rc<RefCell<Sink>>,
}

impl RhaiEngine {
    pub fn new(api: ScriptApi) -> Self {
        let mut engine = Engine::new();
        let sink = Rc::new(RefCell::new(Sink::default()));

        let out = Rc::clone(&sink);
        engine.on_print(move |text: &str| out.borrow_mut().output.push_str(text));

        engine.register_fn("choice", |value: Dynamic| -> Map {
            weighted_map(value, Dynamic::UNIT)
        });
        engine.register_fn("choice", |value: Dynamic, weight: FLOAT| -> Map {
            weighted_map(value, Dynamic::from_float(weight))
        });
        engine.register_fn("choice", |value: Dynamic, weight: INT| -> Map {
            weighted_map(value, Dynamic::from_float(weight as FLOAT))
        });

        let rng = Rc::clone(&api.rng);
        engine.register_fn(
            "weighted_choose",
            move |items: Array| -> Result<Dynamic, Box<EvalAltResult>> {
                let weighted = items
                    .into_iter()
                    .map(weighted_from_dynamic)
                    .collect::<Result<Vec<_>, _>>()?;
                let normalized = normalize_weights(&weighted);
                let mut rng = rng.borrow_mut();
                let (_, value) =
                    weighted_choose(&normalized, &mut *rng).map_err(|e| e.to_string())?;
                Ok(value.clone())
            },
        );

        let rng = Rc::clone(&api.rng);
        engine.register_fn(
            "random_int",
            move |min: INT, max: INT| -> Result<INT, Box<EvalAltResult>> {
                if min >= max {
                    return Err(format!("random_int: empty range {min}..{max}").into());
                }
                Ok(rng.borrow_mut().gen_range(min..max))
            },
        );

        let rng = Rc::clone(&api.rng);
        engine.register_fn("random_float", move || -> FLOAT {
            rng.borrow_mut().gen::<FLOAT>()
        });

        let target = Rc::clone(&sink);
        engine.register_fn(
            "provide",
            move |entries: Map| -> Result<(), Box<EvalAltResult>> {
                let mut sink = target.borrow_mut();
                let ast = sink
                    .current_ast
                    .clone()
                    .ok_or("provide called outside of a script block")?;
                for (key, value) in entries {
                    if key.as_str() == "settings" {
                        let settings = settings_from_dynamic(value)?;
                        sink.settings
                            .get_or_insert_with(DocumentSettings::default)
                            .layer(&settings);
                        continue;
                    }
                    let entry = match value.clone().try_cast::<FnPtr>() {
                        Some(ptr) => Provided::Function(ScriptFunction::new(RhaiFunction {
                            ptr,
                            ast: Rc::clone(&ast),
                        })),
                        None => Provided::Value(value.to_string()),
                    };
                    sink.provided.push((key.to_string(), entry));
                }
                Ok(())
            },
        );

        let target = Rc::clone(&sink);
        let includer = api.includer.clone();
        engine.register_fn(
            "include",
            move |path: ImmutableString| -> Result<String, Box<EvalAltResult>> {
                let includer = includer
                    .as_ref()
                    .ok_or("include is not available in this context")?;
                match includer.include(path.as_str()) {
                    Ok(document) => {
                        let text = document.text.clone();
                        target.borrow_mut().included.push(document);
                        Ok(text)
                    }
                    Err(e) => {
                        let message = format!("include(\"{path}\") failed: {e}");
                        target.borrow_mut().failure = Some(e);
                        Err(message.into())
                    }
                }
            },
        );

        Self { engine, sink }
    }
}

impl ScriptEngine for RhaiEngine {
    fn evaluate(&mut self, source: &str) -> Result<ScriptOutcome, ScriptError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;
        let ast = Rc::new(ast);
        *self.sink.borrow_mut() = Sink {
            current_ast: Some(Rc::clone(&ast)),
            ..Sink::default()
        };

        let result = self.engine.eval_ast::<Dynamic>(&ast);
        let sink = self.sink.take();
        if let Some(failure) = sink.failure {
            return Err(ScriptError::Include(Box::new(failure)));
        }
        let value = result.map_err(|e| ScriptError::Runtime(e.to_string()))?;

        let mut output = sink.output;
        if !value.is_unit() {
            output.push_str(&value.to_string());
        }
        debug!(
            provided = sink.provided.len(),
            included = sink.included.len(),
            "script evaluated"
        );
        Ok(ScriptOutcome {
            output,
            provided: sink.provided,
            settings: sink.settings,
            included: sink.included,
        })
    }

    fn call(&mut self, function: &ScriptFunction) -> Result<String, ScriptError> {
        let function = function
            .downcast_ref::<RhaiFunction>()
            .ok_or_else(|| ScriptError::ForeignFunction("not a Rhai function".to_string()))?;
        *self.sink.borrow_mut() = Sink {
            current_ast: Some(Rc::clone(&function.ast)),
            ..Sink::default()
        };

        let result = function
            .ptr
            .call::<Dynamic>(&self.engine, &function.ast, ());
        let sink = self.sink.take();
        if let Some(failure) = sink.failure {
            return Err(ScriptError::Include(Box::new(failure)));
        }
        let value = result.map_err(|e| ScriptError::ForeignFunction(e.to_string()))?;

        let mut output = sink.output;
        if !value.is_unit() {
            output.push_str(&value.to_string());
        }
        Ok(output)
    }
}

fn weighted_map(value: Dynamic, weight: Dynamic) -> Map {
    let mut map = Map::new();
    map.insert("value".into(), value);
    map.insert("weight".into(), weight);
    map
}

/// Accept either a `choice(..)` map or a bare value (unweighted).
fn weighted_from_dynamic(item: Dynamic) -> Result<Weighted<Dynamic>, Box<EvalAltResult>> {
    let Some(mut map) = item.clone().try_cast::<Map>() else {
        return Ok(Weighted::new(item, None));
    };
    let value = map.remove("value").unwrap_or(Dynamic::UNIT);
    let weight = match map.remove("weight") {
        None => None,
        Some(w) if w.is_unit() => None,
        Some(w) => Some(number(&w).ok_or("choice weight must be a number")?),
    };
    Ok(Weighted::new(value, weight))
}

fn number(value: &Dynamic) -> Option<f64> {
    value
        .as_float()
        .ok()
        .or_else(|| value.as_int().ok().map(|i| i as f64))
}

fn settings_from_dynamic(value: Dynamic) -> Result<DocumentSettings, Box<EvalAltResult>> {
    let map = value
        .try_cast::<Map>()
        .ok_or("provide: `settings` must be an object map")?;
    let mut settings = DocumentSettings::default();
    for (key, value) in map {
        let flag = || -> Result<Option<bool>, Box<EvalAltResult>> {
            let b = value
                .as_bool()
                .map_err(|_| format!("settings.{key} must be a bool"))?;
            Ok(Some(b))
        };
        match key.as_str() {
            "whitespace" => settings.whitespace = flag()?,
            "punctuation" => settings.punctuation = flag()?,
            "capitalization" => settings.capitalization = flag()?,
            "articles" => settings.articles = flag()?,
            "version" => settings.version = Some(value.to_string()),
            other => debug!(key = other, "ignoring unknown document setting"),
        }
    }
    Ok(settings)
}

/// Markers of unseeded randomness a script should not use.
const AMBIENT_RANDOMNESS: &[&str] = &["timestamp(", "Math.random"];

/// Static advisories for a script block, reported before it runs.
pub fn validate_script(source: &str, offset: usize) -> Vec<Warning> {
    AMBIENT_RANDOMNESS
        .iter()
        .filter(|marker| source.contains(*marker))
        .map(|marker| {
            Warning::new(
                WarningKind::AmbientRandomness,
                offset,
                format!("script uses `{marker}`; use random_int/random_float for reproducible output"),
            )
        })
        .collect()
}

/// Advisory for a script that ran but neither registered nor emitted anything.
pub fn check_provides(source: &str, outcome: &ScriptOutcome, offset: usize) -> Option<Warning> {
    if source.contains("provide(") || !outcome.output.is_empty() || !outcome.included.is_empty() {
        return None;
    }
    Some(Warning::new(
        WarningKind::ScriptNeverProvides,
        offset,
        "script block never calls provide() and emits nothing",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn engine(seed: u64) -> RhaiEngine {
        RhaiEngine::new(ScriptApi {
            rng: Rc::new(RefCell::new(StdRng::seed_from_u64(seed))),
            includer: None,
        })
    }

    #[test]
    fn final_value_is_output() {
        let outcome = engine(1).evaluate("40 + 2").unwrap();
        assert_eq!(outcome.output, "42");
    }

    #[test]
    fn print_then_value() {
        let outcome = engine(1).evaluate(r#"print("a"); "b""#).unwrap();
        assert_eq!(outcome.output, "ab");
    }

    #[test]
    fn unit_value_emits_nothing() {
        let outcome = engine(1).evaluate("let x = 1;").unwrap();
        assert_eq!(outcome.output, "");
    }

    #[test]
    fn provide_registers_functions_and_values() {
        let mut e = engine(1);
        let outcome = e
            .evaluate(
                r#"
                fn greet() { "hello" }
                provide(#{ greet: Fn("greet"), answer: 42 });
                "#,
            )
            .unwrap();
        assert_eq!(outcome.provided.len(), 2);
        let (name, entry) = outcome
            .provided
            .iter()
            .find(|(name, _)| name == "greet")
            .unwrap();
        assert_eq!(name, "greet");
        let Provided::Function(f) = entry else {
            panic!("greet should be callable");
        };
        assert_eq!(e.call(f).unwrap(), "hello");

        let (_, answer) = outcome
            .provided
            .iter()
            .find(|(name, _)| name == "answer")
            .unwrap();
        assert!(matches!(answer, Provided::Value(v) if v == "42"));
    }

    #[test]
    fn provided_closure_survives_later_scripts() {
        let mut e = engine(1);
        let outcome = e
            .evaluate(r#"let who = "world"; provide(#{ hi: || "hi " + who });"#)
            .unwrap();
        let Provided::Function(f) = &outcome.provided[0].1 else {
            panic!("expected function");
        };
        e.evaluate("1").unwrap();
        assert_eq!(e.call(f).unwrap(), "hi world");
    }

    #[test]
    fn provide_settings() {
        let outcome = engine(1)
            .evaluate(r#"provide(#{ settings: #{ whitespace: false, version: "2.0" } });"#)
            .unwrap();
        let settings = outcome.settings.unwrap();
        assert_eq!(settings.whitespace, Some(false));
        assert_eq!(settings.version.as_deref(), Some("2.0"));
        assert_eq!(settings.punctuation, None);
    }

    #[test]
    fn bad_settings_type_is_runtime_error() {
        let err = engine(1)
            .evaluate(r#"provide(#{ settings: #{ whitespace: "no" } });"#)
            .unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)));
    }

    #[test]
    fn weighted_choose_respects_zero_weights() {
        let mut e = engine(9);
        for _ in 0..20 {
            let outcome = e
                .evaluate(r#"weighted_choose([choice("a", 0), choice("b")])"#)
                .unwrap();
            assert_eq!(outcome.output, "b");
        }
    }

    #[test]
    fn random_functions_are_seeded() {
        let script = "random_int(0, 1000).to_string() + \" \" + random_float().to_string()";
        let a = engine(5).evaluate(script).unwrap().output;
        let b = engine(5).evaluate(script).unwrap().output;
        assert_eq!(a, b);
    }

    #[test]
    fn random_int_empty_range_fails() {
        assert!(engine(1).evaluate("random_int(3, 3)").is_err());
    }

    #[test]
    fn compile_error_is_reported() {
        assert!(matches!(
            engine(1).evaluate("let = ;").unwrap_err(),
            ScriptError::Compile(_)
        ));
    }

    #[test]
    fn include_without_includer_fails() {
        assert!(engine(1).evaluate(r#"include("x.txt")"#).is_err());
    }

    #[test]
    fn validator_flags_ambient_randomness() {
        let warnings = validate_script("let t = timestamp();", 4);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::AmbientRandomness);
        assert_eq!(warnings[0].offset, 4);
        assert!(validate_script("random_int(0, 2)", 0).is_empty());
    }

    #[test]
    fn never_provides_advisory() {
        let silent = ScriptOutcome::default();
        assert!(check_provides("let x = 1;", &silent, 0).is_some());
        assert!(check_provides("provide(#{})", &silent, 0).is_none());
        let emitted = ScriptOutcome {
            output: "x".to_string(),
            ..Default::default()
        };
        assert!(check_provides("\"x\"", &emitted, 0).is_none());
    }
}
