use clap::Parser;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use plsc::config::Config;
use plsc::emit::{write_program_log, EndAction, Instruction};
use plsc::merge::Timeline;
use plsc::params::{parse_assignment, Params};
use plsc::pass::PassId;
use plsc::pipeline::{run_pipeline, CompilationState, PipelineOptions, Provenance};
use plsc::sequence::Sequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Symbols,
    Structure,
    Raw,
    Frames,
    Program,
    Json,
}

impl EmitStage {
    fn terminal(self) -> PassId {
        match self {
            EmitStage::Symbols | EmitStage::Structure => PassId::Compose,
            EmitStage::Raw => PassId::Evaluate,
            EmitStage::Frames => PassId::Merge,
            EmitStage::Program | EmitStage::Json => PassId::Emit,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "plsc",
    version,
    about = "Pulse Sequence Compiler: compiles .pls timing documents to pulse-sequencer instruction streams"
)]
struct Cli {
    /// Input .pls source file
    source: PathBuf,

    /// Parameter override `name=value` (repeatable); sweeps as `a,b,c` or `start:stop:count`
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Program)]
    emit: EmitStage,

    /// Control flow on the last instruction: branch, branch:N, continue, loop:N, end-loop
    #[arg(long)]
    end_action: Option<EndAction>,

    /// Configuration file (default: plsc.yaml or plsc.yml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output file path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level or filter directive; RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    source: String,
    provenance: Option<&'a Provenance>,
    parameters: BTreeMap<String, Option<i64>>,
    overrides: &'a Params,
    end_action: EndAction,
    length_ns: u64,
    frames: &'a Timeline,
    instructions: &'a [Instruction],
}

fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn main() {
    let cli = Cli::parse();

    // ── Configuration ──
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("plsc: error: {}", e);
            std::process::exit(2);
        }
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    } else if cli.verbose {
        config.logging.level = "debug".into();
    }
    if let Some(action) = cli.end_action {
        config.emit.end_action = action.to_string();
    }
    if let Err(e) = config.validate() {
        eprintln!("plsc: error: {}", e);
        std::process::exit(2);
    }
    init_logging(&config.logging.level, &config.logging.format);

    let mut params = match config.params() {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };
    for text in &cli.params {
        match parse_assignment(text) {
            Ok((name, value)) => {
                params.insert(name, value);
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(2);
            }
        }
    }
    let end_action = match config.end_action() {
        Ok(a) => a,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("plsc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };
    let mut state = match CompilationState::from_source(&source, &params) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("plsc: {}: {}", cli.source.display(), e);
            std::process::exit(1);
        }
    };
    info!(
        source = %cli.source.display(),
        sequences = state.document.sequences.len(),
        symbols = state.document.symbols.len(),
        "document parsed"
    );

    // ── Passes ──
    let options = PipelineOptions {
        params,
        end_action,
        programmer: None,
    };
    let verbose = cli.verbose;
    let result = run_pipeline(&mut state, cli.emit.terminal(), &options, |pass, elapsed| {
        if verbose {
            eprintln!(
                "plsc: {} complete, {:.1}ms",
                pass,
                elapsed.as_secs_f64() * 1e3
            );
        }
    });
    if let Err(e) = result {
        eprintln!("plsc: {}: {}", cli.source.display(), e);
        std::process::exit(1);
    }

    if let (Some(dir), Some(program)) = (&config.emit.program_log, &state.program) {
        match write_program_log(dir, program) {
            Ok(path) => info!(path = %path.display(), "program logged"),
            Err(e) => {
                eprintln!("plsc: error: {}: {}", dir.display(), e);
                std::process::exit(2);
            }
        }
    }

    // ── Output ──
    let text = match render(cli.emit, &cli, &state, &options) {
        Some(t) => t,
        None => {
            eprintln!("plsc: {:?} output is missing", cli.emit);
            std::process::exit(1);
        }
    };
    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("plsc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", text),
    }
}

fn render(
    stage: EmitStage,
    cli: &Cli,
    state: &CompilationState,
    options: &PipelineOptions,
) -> Option<String> {
    let mut out = String::new();
    match stage {
        EmitStage::Symbols => {
            for (name, default) in state.sequence.as_ref()?.parameters() {
                match default {
                    Some(ns) => writeln!(out, "{name} : {ns}").ok()?,
                    None => writeln!(out, "{name} : <unset>").ok()?,
                }
            }
        }
        EmitStage::Structure => describe(&mut out, state.sequence.as_ref()?, "").ok()?,
        EmitStage::Raw => write!(out, "{}", state.raw.as_ref()?).ok()?,
        EmitStage::Frames => write!(out, "{}", state.timeline.as_ref()?).ok()?,
        EmitStage::Program => {
            for instruction in state.program.as_ref()? {
                writeln!(out, "{instruction}").ok()?;
            }
        }
        EmitStage::Json => {
            let timeline = state.timeline.as_ref()?;
            let report = Report {
                source: cli.source.display().to_string(),
                provenance: state.provenance.as_ref(),
                parameters: state.sequence.as_ref()?.parameters(),
                overrides: &options.params,
                end_action: options.end_action,
                length_ns: timeline.total_ns(),
                frames: timeline,
                instructions: state.program.as_ref()?,
            };
            out = serde_json::to_string_pretty(&report).ok()?;
            out.push('\n');
        }
    }
    Some(out)
}

/// Indented outline of a composed sequence.
fn describe(out: &mut String, sequence: &Sequence, indent: &str) -> std::fmt::Result {
    match sequence {
        Sequence::Raw(raw) => writeln!(out, "{indent}raw ({} ns)", raw.length_ns()),
        Sequence::Abstract(seq) => {
            let symbols: Vec<&str> = seq.referenced_symbols().into_iter().collect();
            if symbols.is_empty() {
                writeln!(out, "{indent}sequence")
            } else {
                writeln!(out, "{indent}sequence [{}]", symbols.join(", "))
            }
        }
        Sequence::Structured(seq) => {
            writeln!(out, "{indent}structure: {seq}")?;
            if !seq.rep_params().is_empty() {
                writeln!(out, "{indent}repetitions: {}", seq.rep_params().join(", "))?;
            }
            let nested = format!("{indent}  ");
            for (i, child) in seq.children().enumerate() {
                writeln!(out, "{indent}child {i}:")?;
                describe(out, child, &nested)?;
            }
            Ok(())
        }
    }
}
