// ast.rs — Syntax tree of a structure line
//
// A structure is a comma-separated list of terms. A term targets either a
// child index or a parenthesized sub-list, optionally followed by `^count`.
//
// Preconditions: produced by the parser from a token stream.
// Postconditions: each node's span covers its source range.
// Failure modes: none (data-only module).
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// A parsed structure line.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub terms: Vec<Term>,
    pub span: Span,
}

/// One entry of a list: what to play and how often.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub target: Target,
    pub repeat: Option<RepeatCount>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Existing child by position.
    Index(usize, Span),
    /// Parenthesized sub-structure; becomes a synthesized child.
    Group(Vec<Term>, Span),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepeatCount {
    Literal(u64),
    Param(String),
}

impl fmt::Display for RepeatCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatCount::Literal(n) => write!(f, "{n}"),
            RepeatCount::Param(name) => write!(f, "{name}"),
        }
    }
}

fn write_terms(f: &mut fmt::Formatter<'_>, terms: &[Term]) -> fmt::Result {
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{term}")?;
    }
    Ok(())
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Index(i, _) => write!(f, "{i}")?,
            Target::Group(terms, _) => {
                write!(f, "(")?;
                write_terms(f, terms)?;
                write!(f, ")")?;
            }
        }
        if let Some(count) = &self.repeat {
            write!(f, "^{count}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_terms(f, &self.terms)
    }
}
