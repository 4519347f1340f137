// structure.rs — Composition nodes: ordered, repeated children
//
// A `StructuredSequence` plays its children in the order given by a
// structure line, each entry optionally repeated a literal or parameterised
// number of times. Parenthesized groups are lowered into synthesized child
// nodes appended after the base children.
//
// Preconditions: structure indices refer to children (checked on parse).
// Postconditions: evaluation concatenates child evaluations with stretch.
// Failure modes: structure syntax/index errors on parse; unresolved symbols,
//   missing or ambiguous repetition counts and sweep mismatches on eval.
// Side effects: `parse_structure` replaces the node's order and repeat list.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::ast::{RepeatCount, Target, Term};
use crate::error::{CompositionError, EvalError, ParseError};
use crate::params::{ParamValue, Params};
use crate::parser::parse_structure;
use crate::sequence::{RawSequence, Sequence};

/// How often one structure entry plays its child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repeat {
    /// Bare index: exactly once.
    Once,
    Count(u64),
    Param(String),
}

impl fmt::Display for Repeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repeat::Once => Ok(()),
            Repeat::Count(n) => write!(f, "^{n}"),
            Repeat::Param(name) => write!(f, "^{name}"),
        }
    }
}

/// One `(child, repeat)` slot in structure order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub child: usize,
    pub repeat: Repeat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructuredSequence {
    children: Vec<Arc<Sequence>>,
    /// Children supplied by the caller; later ones are synthesized groups.
    base_children: usize,
    entries: Vec<Entry>,
    rep_params: Vec<String>,
    rep_defaults: BTreeMap<String, i64>,
    structure: Option<String>,
}

impl StructuredSequence {
    /// Play every child once, in order.
    pub fn new(children: Vec<Sequence>) -> Self {
        let children: Vec<Arc<Sequence>> = children.into_iter().map(Arc::new).collect();
        StructuredSequence {
            base_children: children.len(),
            entries: (0..children.len())
                .map(|child| Entry {
                    child,
                    repeat: Repeat::Once,
                })
                .collect(),
            children,
            rep_params: Vec::new(),
            rep_defaults: BTreeMap::new(),
            structure: None,
        }
    }

    pub fn with_structure(children: Vec<Sequence>, structure: &str) -> Result<Self, ParseError> {
        let mut node = Self::new(children);
        node.parse_structure(structure)?;
        Ok(node)
    }

    /// Replace the order and repeat list from a structure line.
    ///
    /// Children synthesized by an earlier structure are discarded first. On
    /// error the node is left unchanged.
    pub fn parse_structure(&mut self, structure: &str) -> Result<(), ParseError> {
        let tree = parse_structure(structure)?;
        let mut children = self.children[..self.base_children].to_vec();
        let lowered = lower(&tree.terms, &mut children, &self.rep_defaults)?;

        info!(
            structure,
            children = children.len(),
            synthesized = children.len() - self.base_children,
            rep_params = ?lowered.rep_params,
            "structure parsed"
        );
        self.children = children;
        self.entries = lowered.entries;
        self.rep_params = lowered.rep_params;
        self.structure = Some(structure.to_string());
        Ok(())
    }

    pub fn children(&self) -> impl Iterator<Item = &Sequence> {
        self.children.iter().map(|c| c.as_ref())
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Repetition parameter names in order of first appearance.
    pub fn rep_params(&self) -> &[String] {
        &self.rep_params
    }

    pub fn structure(&self) -> Option<&str> {
        self.structure.as_deref()
    }

    /// Set a default on this node (when `name` is one of its repetition
    /// parameters) and on every child that knows the name.
    pub fn set_default(&mut self, name: &str, value: i64) {
        if self.rep_params.iter().any(|p| p == name) {
            self.rep_defaults.insert(name.to_string(), value);
        }
        for child in &mut self.children {
            if child.parameters().contains_key(name) {
                Arc::make_mut(child).set_default(name, value);
            }
        }
    }

    /// Every parameter below this node with its default.
    pub fn parameters(&self) -> BTreeMap<String, Option<i64>> {
        let mut out: BTreeMap<String, Option<i64>> = self
            .rep_params
            .iter()
            .map(|name| (name.clone(), self.rep_defaults.get(name).copied()))
            .collect();
        for child in &self.children {
            for (name, default) in child.parameters() {
                let slot = out.entry(name).or_insert(None);
                if default.is_some() {
                    *slot = default;
                }
            }
        }
        out
    }

    pub(crate) fn symbol_names(&self) -> BTreeSet<String> {
        self.played_children()
            .flat_map(|child| child.symbol_names())
            .collect()
    }

    pub(crate) fn unresolved(&self, params: &Params) -> BTreeSet<String> {
        self.played_children()
            .flat_map(|child| child.unresolved(params))
            .collect()
    }

    /// Evaluate every entry in order and concatenate the results.
    ///
    /// A swept parameter referenced by a repeated entry's child makes each
    /// repetition `i` use element `i` of the sweep; every such sweep must be
    /// as long as the repetition count. A group played once passes sweeps
    /// through to its own repetitions. When exactly one repetition parameter
    /// of this node is missing, its count is the sweep length of the first
    /// entry that repeats by it, and every entry using it shares that count.
    pub fn eval(&self, params: &Params) -> Result<RawSequence, EvalError> {
        let missing = self.unresolved(params);
        if !missing.is_empty() {
            return Err(EvalError::Unresolved {
                names: missing.into_iter().collect(),
            });
        }
        let missing_reps: Vec<String> = self
            .rep_params
            .iter()
            .filter(|name| !params.contains(name) && !self.rep_defaults.contains_key(*name))
            .cloned()
            .collect();
        if missing_reps.len() > 1 {
            return Err(CompositionError::AmbiguousRepetition {
                names: missing_reps,
            }
            .into());
        }
        let inferred = missing_reps
            .first()
            .and_then(|name| self.infer_repetition(name, params));

        let mut total = RawSequence::default();
        for entry in &self.entries {
            let child = &self.children[entry.child];
            let sweeps = relevant_sweeps(child, params);

            let count = match &entry.repeat {
                Repeat::Once
                    if sweeps.is_empty() || matches!(**child, Sequence::Structured(_)) =>
                {
                    total.append_repeated(&child.eval(params)?, 1);
                    continue;
                }
                Repeat::Once => {
                    return Err(CompositionError::SweepOutsideRepetition {
                        names: sweeps.iter().map(|(n, _)| n.to_string()).collect(),
                    }
                    .into());
                }
                Repeat::Count(n) => *n,
                Repeat::Param(name) => self.repetitions(name, params, inferred)?,
            };

            if sweeps.is_empty() {
                if count > 0 {
                    total.append_repeated(&child.eval(params)?, count);
                }
                continue;
            }

            for (name, values) in &sweeps {
                if values.len() as u64 != count {
                    return Err(CompositionError::SweepLength {
                        name: name.to_string(),
                        expected: count,
                        found: values.len(),
                    }
                    .into());
                }
            }
            let names: Vec<&str> = sweeps.iter().map(|(n, _)| *n).collect();
            debug!(child = entry.child, count, sweeps = ?names, "sweeping entry");
            for i in 0..sweeps[0].1.len() {
                total.append_repeated(&child.eval(&params.at_sweep_index(&names, i))?, 1);
            }
        }
        Ok(total)
    }

    fn repetitions(
        &self,
        name: &str,
        params: &Params,
        inferred: Option<u64>,
    ) -> Result<u64, CompositionError> {
        let invalid = |value: String| CompositionError::InvalidRepetition {
            name: name.to_string(),
            value,
        };
        let value = match params.get(name) {
            Some(ParamValue::Scalar(v)) => *v,
            Some(ParamValue::Sweep(values)) => return Err(invalid(format!("{values:?}"))),
            None => match self.rep_defaults.get(name) {
                Some(v) => *v,
                None => {
                    return inferred.ok_or_else(|| CompositionError::MissingRepetition {
                        name: name.to_string(),
                    })
                }
            },
        };
        u64::try_from(value).map_err(|_| invalid(value.to_string()))
    }

    /// Sweep length seen by the first entry repeated by `name`.
    fn infer_repetition(&self, name: &str, params: &Params) -> Option<u64> {
        self.entries
            .iter()
            .filter(|e| matches!(&e.repeat, Repeat::Param(p) if p == name))
            .find_map(|e| {
                relevant_sweeps(&self.children[e.child], params)
                    .first()
                    .map(|(_, values)| values.len() as u64)
            })
    }

    /// Children reachable from the current entries.
    fn played_children(&self) -> impl Iterator<Item = &Sequence> {
        let played: BTreeSet<usize> = self.entries.iter().map(|e| e.child).collect();
        played.into_iter().map(move |i| self.children[i].as_ref())
    }
}

/// Sweeps naming a symbol somewhere under `child`.
fn relevant_sweeps<'p>(child: &Sequence, params: &'p Params) -> Vec<(&'p str, &'p [i64])> {
    let symbols = child.symbol_names();
    params
        .sweeps()
        .filter(|(name, _)| symbols.contains(*name))
        .collect()
}

impl fmt::Display for StructuredSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}{}", entry.child, entry.repeat)?;
        }
        Ok(())
    }
}

// ── Lowering ──

struct Lowered {
    entries: Vec<Entry>,
    rep_params: Vec<String>,
}

/// Lower one term list. Groups are synthesized first, left to right and
/// innermost first, each seeing the children that exist when it is created;
/// the list's own indices are checked once all its groups exist.
fn lower(
    terms: &[Term],
    children: &mut Vec<Arc<Sequence>>,
    rep_defaults: &BTreeMap<String, i64>,
) -> Result<Lowered, ParseError> {
    let mut targets = Vec::with_capacity(terms.len());
    for term in terms {
        match &term.target {
            Target::Index(index, _) => targets.push(*index),
            Target::Group(inner, _) => {
                let lowered = lower(inner, children, rep_defaults)?;
                let group = StructuredSequence {
                    base_children: children.len(),
                    children: children.clone(),
                    entries: lowered.entries,
                    rep_defaults: rep_defaults
                        .iter()
                        .filter(|(k, _)| lowered.rep_params.contains(k))
                        .map(|(k, v)| (k.clone(), *v))
                        .collect(),
                    rep_params: lowered.rep_params,
                    structure: Some(
                        inner
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", "),
                    ),
                };
                debug!(index = children.len(), group = %group, "synthesized group");
                targets.push(children.len());
                children.push(Arc::new(Sequence::Structured(group)));
            }
        }
    }

    let mut entries = Vec::with_capacity(terms.len());
    let mut rep_params: Vec<String> = Vec::new();
    for (term, child) in terms.iter().zip(targets) {
        if child >= children.len() {
            return Err(ParseError::StructureIndex {
                index: child,
                children: children.len(),
            });
        }
        let repeat = match &term.repeat {
            None => Repeat::Once,
            Some(RepeatCount::Literal(n)) => Repeat::Count(*n),
            Some(RepeatCount::Param(name)) => {
                if !rep_params.contains(name) {
                    rep_params.push(name.clone());
                }
                Repeat::Param(name.clone())
            }
        };
        entries.push(Entry { child, repeat });
    }
    Ok(Lowered {
        entries,
        rep_params,
    })
}
