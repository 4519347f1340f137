// sequence.rs — Per-channel toggle sequences and their evaluation
//
// A toggle sequence lists segment lengths for one channel, alternating
// OFF/ON and starting OFF. `AbstractSequence` may hold symbolic lengths and
// owns a symbol table of defaults; `RawSequence` is fully concrete and is
// what the merge engine consumes. `Sequence` is the sum type front ends and
// composition nodes work with.
//
// Preconditions: channel indices are validated `Channel`s.
// Postconditions: evaluation never mutates the evaluated sequence.
// Failure modes: unresolved symbols, negative durations, composition errors.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use serde::Serialize;

use crate::error::{CompositionError, EvalError};
use crate::id::Channel;
use crate::merge::{merge, Timeline};
use crate::params::{ParamValue, Params};
use crate::structure::StructuredSequence;
pub use crate::units::TimeValue;

/// Segment lengths for one channel, possibly symbolic.
pub type ToggleSequence = Vec<TimeValue>;

// ── Symbol table ─────────────────────────────────────────────────────────

/// Parameter names with optional default values in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SymbolTable {
    entries: BTreeMap<String, Option<i64>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `name` unless already present. Returns whether it was added.
    pub fn define(&mut self, name: &str, default: Option<i64>) -> bool {
        if self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(name.to_string(), default);
        true
    }

    /// Set (or add) a default value.
    pub fn set_default(&mut self, name: &str, value: i64) {
        self.entries.insert(name.to_string(), Some(value));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The default for `name`, if the symbol exists and has one.
    pub fn default_of(&self, name: &str) -> Option<i64> {
        self.entries.get(name).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<i64>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, default) in self.iter() {
            match default {
                Some(ns) => writeln!(f, "{name} : {ns}")?,
                None => writeln!(f, "{name} : <unset>")?,
            }
        }
        Ok(())
    }
}

// ── Abstract sequence ────────────────────────────────────────────────────

/// A parameterised sequence: one toggle list per channel plus defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbstractSequence {
    channels: Vec<ToggleSequence>,
    symbols: SymbolTable,
}

impl Default for AbstractSequence {
    fn default() -> Self {
        Self::with_symbols(SymbolTable::new())
    }
}

impl AbstractSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbols(symbols: SymbolTable) -> Self {
        AbstractSequence {
            channels: vec![Vec::new(); Channel::COUNT],
            symbols,
        }
    }

    /// Append segments to a channel. Symbols not yet in the table are
    /// added without a default.
    pub fn add_segments(&mut self, channel: Channel, values: impl IntoIterator<Item = TimeValue>) {
        for value in values {
            if let TimeValue::Symbolic(name) = &value {
                self.symbols.define(name, None);
            }
            self.channels[channel.index()].push(value);
        }
    }

    pub fn set_default(&mut self, name: &str, value: i64) {
        self.symbols.set_default(name, value);
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn channel(&self, channel: Channel) -> &[TimeValue] {
        &self.channels[channel.index()]
    }

    /// Symbols that appear in at least one channel.
    pub fn referenced_symbols(&self) -> BTreeSet<&str> {
        self.channels
            .iter()
            .flatten()
            .filter_map(TimeValue::symbol)
            .collect()
    }

    /// Referenced symbols with neither an override nor a default.
    pub fn unresolved(&self, params: &Params) -> BTreeSet<String> {
        self.referenced_symbols()
            .into_iter()
            .filter(|name| !params.contains(name) && self.symbols.default_of(name).is_none())
            .map(str::to_string)
            .collect()
    }

    /// Substitute every symbol and produce a concrete sequence.
    ///
    /// Overrides in `params` win over the table defaults. Every missing
    /// name is reported at once.
    pub fn eval(&self, params: &Params) -> Result<RawSequence, EvalError> {
        let missing = self.unresolved(params);
        if !missing.is_empty() {
            return Err(EvalError::Unresolved {
                names: missing.into_iter().collect(),
            });
        }
        let swept: Vec<String> = self
            .referenced_symbols()
            .into_iter()
            .filter(|name| matches!(params.get(name), Some(ParamValue::Sweep(_))))
            .map(str::to_string)
            .collect();
        if !swept.is_empty() {
            return Err(CompositionError::SweepOutsideRepetition { names: swept }.into());
        }

        let mut channels = Vec::with_capacity(Channel::COUNT);
        for (channel, seq) in Channel::all().zip(&self.channels) {
            let mut out = Vec::with_capacity(seq.len());
            for value in seq {
                let ns = match value {
                    TimeValue::Concrete(ns) => *ns,
                    TimeValue::Symbolic(name) => self.resolve(name, params).ok_or_else(|| {
                        EvalError::Unresolved {
                            names: vec![name.clone()],
                        }
                    })?,
                };
                let ns = u64::try_from(ns)
                    .map_err(|_| EvalError::NegativeDuration { channel, value: ns })?;
                out.push(ns);
            }
            channels.push(out);
        }
        Ok(RawSequence { channels })
    }

    /// Substitute only the scalar overrides in `params`, keeping every other
    /// symbol in place. The result keeps this sequence's defaults.
    pub fn bind(&self, params: &Params) -> AbstractSequence {
        let channels = self
            .channels
            .iter()
            .map(|seq| {
                seq.iter()
                    .map(|value| match value {
                        TimeValue::Symbolic(name) => match params.get(name) {
                            Some(ParamValue::Scalar(ns)) => TimeValue::Concrete(*ns),
                            _ => value.clone(),
                        },
                        TimeValue::Concrete(_) => value.clone(),
                    })
                    .collect()
            })
            .collect();
        AbstractSequence {
            channels,
            symbols: self.symbols.clone(),
        }
    }

    fn resolve(&self, name: &str, params: &Params) -> Option<i64> {
        match params.get(name) {
            Some(ParamValue::Scalar(ns)) => Some(*ns),
            Some(ParamValue::Sweep(_)) => None,
            None => self.symbols.default_of(name),
        }
    }
}

impl fmt::Display for AbstractSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (channel, seq) in Channel::all().zip(&self.channels) {
            if seq.is_empty() {
                continue;
            }
            let items: Vec<String> = seq.iter().map(ToString::to_string).collect();
            writeln!(f, "{channel} : {}", items.join(", "))?;
        }
        Ok(())
    }
}

// ── Raw sequence ─────────────────────────────────────────────────────────

/// A fully concrete sequence. The all-empty sequence is the identity of `+`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawSequence {
    channels: Vec<Vec<u64>>,
}

impl Default for RawSequence {
    fn default() -> Self {
        RawSequence {
            channels: vec![Vec::new(); Channel::COUNT],
        }
    }
}

impl RawSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit per-channel segment lists.
    pub fn from_channels(segments: impl IntoIterator<Item = (Channel, Vec<u64>)>) -> Self {
        let mut raw = Self::default();
        for (channel, seq) in segments {
            raw.channels[channel.index()].extend(seq);
        }
        raw
    }

    pub fn channel(&self, channel: Channel) -> &[u64] {
        &self.channels[channel.index()]
    }

    pub fn channels(&self) -> &[Vec<u64>] {
        &self.channels
    }

    /// True when no channel has any segment.
    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(Vec::is_empty)
    }

    /// End time of the longest channel.
    pub fn length_ns(&self) -> u64 {
        self.channels
            .iter()
            .map(|seq| seq.iter().sum::<u64>())
            .max()
            .unwrap_or(0)
    }

    /// This sequence followed by `other`.
    ///
    /// Odd-length channels of `self` get a zero-length ON segment so the
    /// first segment of `other` stays OFF. With `stretch`, every channel of
    /// `self` is padded OFF to the common end time before `other` begins.
    /// Channels only present in `other` start OFF until the join.
    pub fn concat(&self, other: &RawSequence, stretch: bool) -> RawSequence {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        let end_time = self.length_ns();
        let channels = self
            .channels
            .iter()
            .zip(&other.channels)
            .map(|(this, next)| {
                if this.is_empty() {
                    if next.is_empty() {
                        return Vec::new();
                    }
                    let mut joined = Vec::with_capacity(next.len() + 2);
                    joined.extend([end_time, 0]);
                    joined.extend_from_slice(next);
                    return joined;
                }
                let mut joined = this.clone();
                if joined.len() % 2 != 0 {
                    joined.push(0);
                }
                let own_end: u64 = this.iter().sum();
                if stretch && end_time > own_end {
                    joined.extend([end_time - own_end, 0]);
                }
                joined.extend_from_slice(next);
                joined
            })
            .collect();
        RawSequence { channels }
    }

    /// Append `count` copies of `other` in place, with the result of
    /// `count` successive `+` joins.
    ///
    /// Channel end times are carried between copies, so each copy costs
    /// only the length of `other`.
    pub fn append_repeated(&mut self, other: &RawSequence, count: u64) {
        if other.is_empty() || count == 0 {
            return;
        }
        let other_ends: Vec<u64> = other.channels.iter().map(|c| c.iter().sum()).collect();
        let mut copies = count;
        if self.is_empty() {
            self.channels.clone_from(&other.channels);
            copies -= 1;
        }
        let mut ends: Vec<u64> = self.channels.iter().map(|c| c.iter().sum()).collect();
        for _ in 0..copies {
            let end_time = ends.iter().copied().max().unwrap_or(0);
            for ((this, next), (end, add)) in self
                .channels
                .iter_mut()
                .zip(&other.channels)
                .zip(ends.iter_mut().zip(&other_ends))
            {
                if this.is_empty() {
                    if !next.is_empty() {
                        this.extend([end_time, 0]);
                        this.extend_from_slice(next);
                        *end = end_time + add;
                    }
                    continue;
                }
                if this.len() % 2 != 0 {
                    this.push(0);
                }
                if end_time > *end {
                    this.extend([end_time - *end, 0]);
                }
                this.extend_from_slice(next);
                *end = end_time + add;
            }
        }
    }

    /// Merge all channels into frames.
    pub fn timeline(&self) -> Timeline {
        merge(&self.channels)
    }
}

impl Add<&RawSequence> for &RawSequence {
    type Output = RawSequence;

    fn add(self, rhs: &RawSequence) -> RawSequence {
        self.concat(rhs, true)
    }
}

impl Add for RawSequence {
    type Output = RawSequence;

    fn add(self, rhs: RawSequence) -> RawSequence {
        if rhs.is_empty() {
            return self;
        }
        if self.is_empty() {
            return rhs;
        }
        self.concat(&rhs, true)
    }
}

impl Sum for RawSequence {
    fn sum<I: Iterator<Item = RawSequence>>(iter: I) -> Self {
        iter.fold(RawSequence::default(), |acc, seq| acc + seq)
    }
}

impl fmt::Display for RawSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (channel, seq) in Channel::all().zip(&self.channels) {
            if seq.is_empty() {
                continue;
            }
            let items: Vec<String> = seq.iter().map(ToString::to_string).collect();
            writeln!(f, "{channel} : {}", items.join(", "))?;
        }
        Ok(())
    }
}

// ── Sequence sum type ────────────────────────────────────────────────────

/// Anything that evaluates to a `RawSequence`.
#[derive(Debug, Clone, PartialEq)]
pub enum Sequence {
    Raw(RawSequence),
    Abstract(AbstractSequence),
    Structured(StructuredSequence),
}

impl Sequence {
    pub fn eval(&self, params: &Params) -> Result<RawSequence, EvalError> {
        match self {
            Sequence::Raw(raw) => Ok(raw.clone()),
            Sequence::Abstract(seq) => seq.eval(params),
            Sequence::Structured(seq) => seq.eval(params),
        }
    }

    /// Every parameter with its default: symbols and repetition counts.
    pub fn parameters(&self) -> BTreeMap<String, Option<i64>> {
        match self {
            Sequence::Raw(_) => BTreeMap::new(),
            Sequence::Abstract(seq) => seq
                .symbols()
                .iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            Sequence::Structured(seq) => seq.parameters(),
        }
    }

    pub fn set_default(&mut self, name: &str, value: i64) {
        match self {
            Sequence::Raw(_) => {}
            Sequence::Abstract(seq) => seq.set_default(name, value),
            Sequence::Structured(seq) => seq.set_default(name, value),
        }
    }

    /// Symbols referenced anywhere below this sequence.
    pub(crate) fn symbol_names(&self) -> BTreeSet<String> {
        match self {
            Sequence::Raw(_) => BTreeSet::new(),
            Sequence::Abstract(seq) => seq
                .referenced_symbols()
                .into_iter()
                .map(str::to_string)
                .collect(),
            Sequence::Structured(seq) => seq.symbol_names(),
        }
    }

    /// Symbols below this sequence with neither override nor default.
    pub(crate) fn unresolved(&self, params: &Params) -> BTreeSet<String> {
        match self {
            Sequence::Raw(_) => BTreeSet::new(),
            Sequence::Abstract(seq) => seq.unresolved(params),
            Sequence::Structured(seq) => seq.unresolved(params),
        }
    }
}

impl From<RawSequence> for Sequence {
    fn from(seq: RawSequence) -> Self {
        Sequence::Raw(seq)
    }
}

impl From<AbstractSequence> for Sequence {
    fn from(seq: AbstractSequence) -> Self {
        Sequence::Abstract(seq)
    }
}

impl From<StructuredSequence> for Sequence {
    fn from(seq: StructuredSequence) -> Self {
        Sequence::Structured(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(i: usize) -> Channel {
        Channel::new(i).unwrap()
    }

    fn raw(segments: &[(usize, &[u64])]) -> RawSequence {
        RawSequence::from_channels(segments.iter().map(|(c, s)| (ch(*c), s.to_vec())))
    }

    fn ramsey() -> AbstractSequence {
        let mut seq = AbstractSequence::new();
        seq.add_segments(ch(0), vec![100.into(), "pi_h".into(), "tau".into(), "pi_h".into()]);
        seq.add_segments(ch(3), vec![0.into(), 50.into()]);
        seq.set_default("pi_h", 40);
        seq
    }

    #[test]
    fn add_segments_registers_symbols_unset() {
        let seq = ramsey();
        assert_eq!(seq.symbols().default_of("pi_h"), Some(40));
        assert!(seq.symbols().contains("tau"));
        assert_eq!(seq.symbols().default_of("tau"), None);
    }

    #[test]
    fn eval_substitutes_overrides_then_defaults() {
        let out = ramsey().eval(&Params::new().with("tau", 300)).unwrap();
        assert_eq!(out.channel(ch(0)), &[100, 40, 300, 40]);
        assert_eq!(out.channel(ch(3)), &[0, 50]);
        assert!(out.channel(ch(1)).is_empty());
    }

    #[test]
    fn eval_override_beats_default() {
        let out = ramsey()
            .eval(&Params::new().with("tau", 1).with("pi_h", 7))
            .unwrap();
        assert_eq!(out.channel(ch(0)), &[100, 7, 1, 7]);
    }

    #[test]
    fn eval_reports_all_missing_names() {
        let mut seq = ramsey();
        seq.add_segments(ch(5), vec!["delay".into()]);
        assert_eq!(
            seq.eval(&Params::new()),
            Err(EvalError::Unresolved {
                names: vec!["delay".into(), "tau".into()]
            })
        );
    }

    #[test]
    fn eval_rejects_negative_values() {
        let err = ramsey().eval(&Params::new().with("tau", -5)).unwrap_err();
        assert_eq!(
            err,
            EvalError::NegativeDuration {
                channel: ch(0),
                value: -5
            }
        );
    }

    #[test]
    fn eval_rejects_sweep_outside_repetition() {
        let err = ramsey()
            .eval(&Params::new().with("tau", vec![1, 2]))
            .unwrap_err();
        assert!(matches!(
            err,
            EvalError::Composition(CompositionError::SweepOutsideRepetition { .. })
        ));
    }

    #[test]
    fn eval_is_deterministic_and_does_not_mutate() {
        let seq = ramsey();
        let before = seq.clone();
        let params = Params::new().with("tau", 300);
        let a = seq.eval(&params).unwrap();
        let b = seq.eval(&params).unwrap();
        assert_eq!(a, b);
        assert_eq!(seq, before);
    }

    #[test]
    fn bind_keeps_unbound_symbols() {
        let bound = ramsey().bind(&Params::new().with("tau", 300));
        assert_eq!(
            bound.channel(ch(0)),
            &[
                TimeValue::Concrete(100),
                TimeValue::Symbolic("pi_h".into()),
                TimeValue::Concrete(300),
                TimeValue::Symbolic("pi_h".into()),
            ]
        );
        assert!(bound.unresolved(&Params::new()).is_empty());
    }

    #[test]
    fn concat_pads_odd_and_short_channels() {
        let a = raw(&[(0, &[10, 20, 30]), (1, &[5, 5])]);
        let b = raw(&[(0, &[1, 2]), (1, &[3, 4])]);
        let c = &a + &b;
        // ch0: odd → append 0; already at end time 60.
        assert_eq!(c.channel(ch(0)), &[10, 20, 30, 0, 1, 2]);
        // ch1: ends at 10, stretched OFF to 60.
        assert_eq!(c.channel(ch(1)), &[5, 5, 50, 0, 3, 4]);
        assert_eq!(c.length_ns(), 60 + 7);
    }

    #[test]
    fn concat_channel_only_in_rhs_starts_at_join() {
        let a = raw(&[(0, &[10, 20])]);
        let b = raw(&[(2, &[5, 5])]);
        let c = &a + &b;
        assert_eq!(c.channel(ch(0)), &[10, 20]);
        assert_eq!(c.channel(ch(2)), &[30, 0, 5, 5]);
    }

    #[test]
    fn concat_without_stretch_keeps_own_end() {
        let a = raw(&[(0, &[10, 20]), (1, &[5, 5])]);
        let b = raw(&[(1, &[3, 4])]);
        let c = a.concat(&b, false);
        assert_eq!(c.channel(ch(1)), &[5, 5, 3, 4]);
    }

    #[test]
    fn repeated_append_matches_repeated_addition() {
        let once = raw(&[(0, &[10, 20, 30]), (2, &[0, 5])]);
        let cases = [
            RawSequence::default(),
            raw(&[(1, &[7])]),
            raw(&[(0, &[4, 4]), (2, &[1, 2, 3])]),
        ];
        for start in cases {
            for count in 0..4 {
                let mut fast = start.clone();
                fast.append_repeated(&once, count);
                let slow = (0..count).fold(start.clone(), |acc, _| acc + once.clone());
                assert_eq!(fast, slow, "start {start:?}, {count} copies");
            }
        }
    }

    #[test]
    fn repeated_append_of_empty_is_noop() {
        let mut a = raw(&[(0, &[10, 20, 30])]);
        a.append_repeated(&RawSequence::default(), 5);
        assert_eq!(a, raw(&[(0, &[10, 20, 30])]));
    }

    #[test]
    fn empty_is_identity() {
        let a = raw(&[(0, &[10, 20, 30])]);
        assert_eq!(a.clone() + RawSequence::default(), a);
        assert_eq!(RawSequence::default() + a.clone(), a);
        assert_eq!(vec![a.clone()].into_iter().sum::<RawSequence>(), a);
    }

    #[test]
    fn concat_does_not_mutate_inputs() {
        let a = raw(&[(0, &[10, 20, 30])]);
        let b = raw(&[(0, &[1])]);
        let (a0, b0) = (a.clone(), b.clone());
        let _ = &a + &b;
        assert_eq!((a, b), (a0, b0));
    }

    #[test]
    fn sequence_parameters_list_defaults() {
        let params = Sequence::from(ramsey()).parameters();
        assert_eq!(params.get("pi_h"), Some(&Some(40)));
        assert_eq!(params.get("tau"), Some(&None));
    }
}
