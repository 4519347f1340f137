// pipeline.rs — Compilation state and pass orchestration
//
// Holds every pass artifact and runs the minimal set of passes needed for a
// given terminal PassId: compose, evaluate, merge, emit.
//
// Preconditions: the document must be parsed before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or the
//   failing pass is reported with its error.
// Failure modes: composition, evaluation and emission errors.
// Side effects: driver calls during emit; on_pass_complete after each pass.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::document::Document;
use crate::emit::{Board, EndAction, Instruction, Programmer};
use crate::error::Error;
use crate::merge::Timeline;
use crate::params::Params;
use crate::pass::{required_passes, ArtifactId, PassId};
use crate::sequence::{RawSequence, Sequence};

// ── Provenance ─────────────────────────────────────────────────────────────

/// SHA-256 digest, shown and serialized as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        use sha2::Digest as _;
        Digest(sha2::Sha256::digest(bytes).into())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
    }
}

impl Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where a report came from: which source, which overrides, which compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub source_hash: Digest,
    /// Hash of the overrides' compact JSON.
    pub params_fingerprint: Digest,
    pub compiler_version: &'static str,
}

pub fn compute_provenance(source: &str, params: &Params) -> Provenance {
    // Params is ordered by name, so its compact JSON is canonical.
    let canonical = serde_json::to_string(params).unwrap_or_default();
    Provenance {
        source_hash: Digest::of(source),
        params_fingerprint: Digest::of(canonical),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── State ──────────────────────────────────────────────────────────────────

/// Options shared by every pass of one run.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub params: Params,
    pub end_action: EndAction,
    /// Programmer used by emit; `None` programs a fresh simulated board.
    pub programmer: Option<Programmer>,
}

/// Holds all compilation artifacts.
#[derive(Debug)]
pub struct CompilationState {
    pub document: Document,
    pub sequence: Option<Sequence>,
    pub raw: Option<RawSequence>,
    pub timeline: Option<Timeline>,
    pub program: Option<Vec<Instruction>>,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(document: Document) -> Self {
        CompilationState {
            document,
            sequence: None,
            raw: None,
            timeline: None,
            program: None,
            provenance: None,
        }
    }

    /// Parse `source` and record its provenance.
    pub fn from_source(source: &str, params: &Params) -> crate::Result<Self> {
        let mut state = Self::new(Document::parse(source)?);
        state.provenance = Some(compute_provenance(source, params));
        Ok(state)
    }
}

/// A pass failed; later passes were not run.
#[derive(Debug, Error)]
#[error("{failing_pass} failed: {error}")]
pub struct PipelineError {
    pub failing_pass: PassId,
    #[source]
    pub error: Error,
}

impl PipelineError {
    fn at(failing_pass: PassId) -> impl FnOnce(Error) -> Self {
        move |error| PipelineError {
            failing_pass,
            error,
        }
    }
}

fn artifact<T>(slot: &Option<T>, id: ArtifactId) -> crate::Result<&T> {
    slot.as_ref().ok_or(Error::MissingArtifact(id.name()))
}

// ── Runner ─────────────────────────────────────────────────────────────────

/// Run the passes needed to produce `terminal`'s artifacts.
///
/// `on_pass_complete` is called after each successful pass with its wall
/// time.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &PipelineOptions,
    mut on_pass_complete: impl FnMut(PassId, Duration),
) -> Result<(), PipelineError> {
    for pass in required_passes(terminal) {
        let t = Instant::now();
        run_pass(state, pass, options).map_err(PipelineError::at(pass))?;
        let elapsed = t.elapsed();
        debug!(
            pass = %pass,
            elapsed_ms = elapsed.as_secs_f64() * 1e3,
            "pass complete"
        );
        on_pass_complete(pass, elapsed);
    }
    Ok(())
}

fn run_pass(
    state: &mut CompilationState,
    pass: PassId,
    options: &PipelineOptions,
) -> crate::Result<()> {
    match pass {
        PassId::Compose => {
            state.sequence = Some(state.document.clone().into_sequence()?);
        }
        PassId::Evaluate => {
            let sequence = artifact(&state.sequence, ArtifactId::Sequence)?;
            state.raw = Some(sequence.eval(&options.params)?);
        }
        PassId::Merge => {
            let raw = artifact(&state.raw, ArtifactId::Raw)?;
            state.timeline = Some(raw.timeline());
        }
        PassId::Emit => {
            let timeline = artifact(&state.timeline, ArtifactId::Timeline)?;
            let program = match &options.programmer {
                Some(programmer) => programmer.emit(timeline, options.end_action)?,
                None => Board::simulated()
                    .programmer()
                    .emit(timeline, options.end_action)?,
            };
            state.program = Some(program);
        }
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
