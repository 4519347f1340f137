// error.rs — Error taxonomy for every compiler phase
//
// One enum per failure category: unit conversion, document/structure parsing,
// evaluation (including composition), emission, and the driver collaborator.
// `Error` wraps them all for callers that drive the whole pipeline.
//
// Side effects: none (types only).

use thiserror::Error;

use crate::id::Channel;

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, Error>;

// ── Time values ──────────────────────────────────────────────────────────

/// A token looked like a quantity but could not become integer nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("'{token}' is not a time quantity")]
    NotAQuantity { token: String },

    #[error("unit '{unit}' in '{token}' is not a unit of time")]
    NonTimeUnit { token: String, unit: String },

    #[error("'{token}' does not fit in integer nanoseconds")]
    OutOfRange { token: String },
}

// ── Parsing ──────────────────────────────────────────────────────────────

/// Fatal parse failure. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: expected `<key> : <value>`, found {text:?}")]
    MalformedLine { line: usize, text: String },

    #[error("line {line}: channel {text:?} is not in 0..{}", Channel::COUNT)]
    InvalidChannel { line: usize, text: String },

    #[error("line {line}: default value for '{name}': {source}")]
    InvalidDefault {
        line: usize,
        name: String,
        #[source]
        source: UnitError,
    },

    #[error("line {line}: {source}")]
    InvalidToken {
        line: usize,
        #[source]
        source: UnitError,
    },

    #[error("line {line}: negative duration '{token}'")]
    NegativeDuration { line: usize, token: String },

    #[error("line {line}: structure marker is not followed by a structure line")]
    MissingStructure { line: usize },

    #[error("structure {structure:?}: {}", .messages.join("; "))]
    StructureSyntax {
        structure: String,
        messages: Vec<String>,
    },

    #[error("structure index {index} is out of range ({children} children available)")]
    StructureIndex { index: usize, children: usize },

    #[error("invalid parameter assignment {text:?}: {reason}")]
    InvalidAssignment { text: String, reason: String },
}

// ── Evaluation ───────────────────────────────────────────────────────────

/// Repetition and sweep failures inside a composition node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("value for repetition parameter '{name}' must be supplied")]
    MissingRepetition { name: String },

    #[error("more than one unresolved repetition parameter: {}", .names.join(", "))]
    AmbiguousRepetition { names: Vec<String> },

    #[error("repetition parameter '{name}' must be a non-negative count, got {value}")]
    InvalidRepetition { name: String, value: String },

    #[error("sweep '{name}' has {found} values but the entry repeats {expected} times")]
    SweepLength {
        name: String,
        expected: u64,
        found: usize,
    },

    #[error("swept parameters used outside a repetition: {}", .names.join(", "))]
    SweepOutsideRepetition { names: Vec<String> },
}

/// Evaluation failure. `Unresolved` lists every missing name at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("values must be provided for: {}", .names.join(", "))]
    Unresolved { names: Vec<String> },

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error("channel {channel}: negative duration {value} ns")]
    NegativeDuration { channel: Channel, value: i64 },
}

// ── Emission ─────────────────────────────────────────────────────────────

/// Failure reported by the device driver collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("driver: {0}")]
pub struct DriverError(pub String);

/// Emission failure. The emitter is always idle again when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error("nothing to program: the timeline has no frames")]
    Empty,

    #[error("instruction {index} too short: {duration} ns (minimum {minimum} ns)")]
    TooShort {
        index: usize,
        duration: u64,
        minimum: u64,
    },

    #[error("the board is already in programming mode")]
    Busy,

    #[error("the board is currently running a sequence")]
    Running,

    #[error("must be in programming mode before adding instructions")]
    NotProgramming,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

// ── Crate-level error ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("emission error: {0}")]
    Emit(#[from] EmitError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no pulse sequence attached")]
    NoSequence,

    #[error("no programmer attached")]
    NoProgrammer,

    #[error("{0} artifact is missing")]
    MissingArtifact(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CompositionError> for Error {
    fn from(e: CompositionError) -> Self {
        Error::Eval(EvalError::Composition(e))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_lists_every_name() {
        let e = EvalError::Unresolved {
            names: vec!["pi".into(), "tau".into()],
        };
        assert_eq!(e.to_string(), "values must be provided for: pi, tau");
    }

    #[test]
    fn structure_syntax_joins_messages() {
        let e = ParseError::StructureSyntax {
            structure: "0,(1".into(),
            messages: vec!["found end of input".into(), "expected ')'".into()],
        };
        assert_eq!(
            e.to_string(),
            "structure \"0,(1\": found end of input; expected ')'"
        );
    }

    #[test]
    fn composition_converts_into_crate_error() {
        let e: Error = CompositionError::MissingRepetition { name: "N".into() }.into();
        assert!(matches!(
            e,
            Error::Eval(EvalError::Composition(CompositionError::MissingRepetition { .. }))
        ));
    }

    #[test]
    fn invalid_channel_mentions_range() {
        let e = ParseError::InvalidChannel {
            line: 4,
            text: "31".into(),
        };
        assert_eq!(e.to_string(), "line 4: channel \"31\" is not in 0..24");
    }
}
