// pass.rs — Compiler passes and the artifacts they hand to each other
//
// Four passes run after the document is read: compose the structure, evaluate
// symbols, merge channels into frames, emit instructions. Each pass names the
// passes it reads from; `required_passes` walks those edges back from the
// requested `--emit` stage so nothing past it runs.
//
// Preconditions: none (static tables).
// Postconditions: `required_passes` returns dependencies before dependents.
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Identifiers ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Compose,
    Evaluate,
    Merge,
    Emit,
}

/// One slot of `CompilationState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    /// Composed `Sequence`, symbols intact.
    Sequence,
    /// `RawSequence` with every duration in nanoseconds.
    Raw,
    Timeline,
    /// Instruction list.
    Program,
}

impl PassId {
    /// Execution order.
    pub const ALL: [PassId; 4] = [
        PassId::Compose,
        PassId::Evaluate,
        PassId::Merge,
        PassId::Emit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PassId::Compose => "compose",
            PassId::Evaluate => "evaluate",
            PassId::Merge => "merge",
            PassId::Emit => "emit",
        }
    }

    /// Passes whose artifacts this one reads.
    pub fn reads_from(self) -> &'static [PassId] {
        match self {
            PassId::Compose => &[],
            PassId::Evaluate => &[PassId::Compose],
            PassId::Merge => &[PassId::Evaluate],
            PassId::Emit => &[PassId::Merge],
        }
    }

    pub fn produces(self) -> ArtifactId {
        match self {
            PassId::Compose => ArtifactId::Sequence,
            PassId::Evaluate => ArtifactId::Raw,
            PassId::Merge => ArtifactId::Timeline,
            PassId::Emit => ArtifactId::Program,
        }
    }

    /// What holds once the pass has succeeded.
    pub fn guarantees(self) -> &'static str {
        match self {
            PassId::Compose => "structure indices in range, repetition parameters collected",
            PassId::Evaluate => "no symbols left, every duration non-negative",
            PassId::Merge => "no zero-length frames, neighbouring masks differ",
            PassId::Emit => "one instruction per frame, end action on the last",
        }
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ArtifactId {
    pub fn name(self) -> &'static str {
        match self {
            ArtifactId::Sequence => "sequence",
            ArtifactId::Raw => "raw sequence",
            ArtifactId::Timeline => "timeline",
            ArtifactId::Program => "program",
        }
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// Passes needed to produce `terminal`, in execution order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut needed = vec![terminal];
    let mut pending = vec![terminal];
    while let Some(pass) = pending.pop() {
        for &dep in pass.reads_from() {
            if !needed.contains(&dep) {
                needed.push(dep);
                pending.push(dep);
            }
        }
    }
    PassId::ALL
        .into_iter()
        .filter(|p| needed.contains(p))
        .collect()
}
