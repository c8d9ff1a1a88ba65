/// Render: command-line front end for rendering and analyzing documents.
///
/// Usage: render [FILE|-] [--seed N] [--no-scripts] [--analyze] [--settings FILE.ron] [--ast]
///
/// Reads standard input when no file (or `-`) is given. Warnings go to
/// stderr; set RUST_LOG=forktext=debug for include and cleanup tracing.
use forktext::core::diagnostics::{report, report_warnings, Severity};
use forktext::core::pipeline::Pipeline;
use forktext::{parse, RenderError, RenderSettings};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Options {
    input: Option<PathBuf>,
    seed: Option<u64>,
    no_scripts: bool,
    analyze: bool,
    ast: bool,
    settings: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = match parse_args(&args[1..]) {
        Ok(Some(options)) => options,
        Ok(None) => {
            print_usage();
            return;
        }
        Err(message) => {
            eprintln!("{message}");
            print_usage();
            std::process::exit(1);
        }
    };

    let (source, filename) = match read_input(options.input.as_deref()) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("Failed to read input: {e}");
            std::process::exit(1);
        }
    };

    if let Err(message) = run(&options, &source, &filename) {
        eprint!("{message}");
        std::process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Option<Options>, String> {
    let mut options = Options::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => return Ok(None),
            "--seed" if i + 1 < args.len() => {
                i += 1;
                let seed = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid seed: {}", args[i]))?;
                options.seed = Some(seed);
            }
            "--settings" if i + 1 < args.len() => {
                i += 1;
                options.settings = Some(PathBuf::from(&args[i]));
            }
            "--no-scripts" => options.no_scripts = true,
            "--analyze" => options.analyze = true,
            "--ast" => options.ast = true,
            "-" => options.input = None,
            arg if !arg.starts_with("--") && options.input.is_none() => {
                options.input = Some(PathBuf::from(arg));
            }
            arg => return Err(format!("Unknown argument: {arg}")),
        }
        i += 1;
    }
    Ok(Some(options))
}

fn read_input(path: Option<&Path>) -> io::Result<(String, String)> {
    match path {
        Some(path) => Ok((
            std::fs::read_to_string(path)?,
            path.display().to_string(),
        )),
        None => {
            let mut source = String::new();
            io::stdin().read_to_string(&mut source)?;
            Ok((source, "<stdin>".to_string()))
        }
    }
}

fn run(options: &Options, source: &str, filename: &str) -> Result<(), String> {
    if options.ast {
        let document = parse(source).map_err(|e| parse_report(source, filename, &e))?;
        let pretty = ron::ser::PrettyConfig::default();
        let dump = ron::ser::to_string_pretty(&document, pretty)
            .map_err(|e| format!("Failed to serialize AST: {e}\n"))?;
        println!("{dump}");
        return Ok(());
    }

    let mut settings = match &options.settings {
        Some(path) => RenderSettings::load_from_ron(path)
            .map_err(|e| format!("Failed to load settings: {e}\n"))?,
        None => RenderSettings::default(),
    };
    if let Some(seed) = options.seed {
        settings.random_seed = Some(seed);
    }
    if options.no_scripts {
        settings.allow_script_execution = false;
    }
    // Includes resolve next to the input file unless the settings name a directory.
    if settings.working_directory.is_none() {
        settings.working_directory = options
            .input
            .as_deref()
            .and_then(Path::parent)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf);
    }
    let pipeline = Pipeline::from_settings(&settings);

    if options.analyze {
        let analysis = pipeline
            .analyze(source)
            .map_err(|e| parse_report(source, filename, &e))?;
        println!("{}", analysis.possible_outcomes);
        if !analysis.unresolved.is_empty() {
            eprintln!("unresolved: {}", analysis.unresolved.join(", "));
        }
        return Ok(());
    }

    let output = pipeline
        .render(source)
        .map_err(|e| render_report(source, filename, &e))?;
    eprint!("{}", report_warnings(source, filename, &output.warnings));
    print!("{}", output.text);
    Ok(())
}

fn parse_report(source: &str, filename: &str, error: &forktext::ParseError) -> String {
    let offset = error.offset();
    report(
        source,
        filename,
        Severity::Error,
        offset..offset + 1,
        &error.to_string(),
    )
}

fn render_report(source: &str, filename: &str, error: &RenderError) -> String {
    match error.offset() {
        Some(offset) => report(
            source,
            filename,
            Severity::Error,
            offset..offset + 1,
            &error.to_string(),
        ),
        None => format!("error: {error}\n"),
    }
}

fn print_usage() {
    eprintln!("Usage: render [FILE|-] [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --seed <n>           Seed the random generator for reproducible output");
    eprintln!("  --no-scripts         Fail on script blocks instead of running them");
    eprintln!("  --analyze            Print the number of possible renderings");
    eprintln!("  --settings <file>    Load render settings from a RON file");
    eprintln!("  --ast                Print the parsed document as RON");
}
