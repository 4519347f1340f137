// params.rs — Parameter overrides supplied at evaluation time
//
// A parameter value is either a scalar (nanoseconds, or a repetition count)
// or a sweep: one value per repetition of the composition entry that uses it.
// Assignments use the CLI/config syntax:
//
//   tau=300ns            scalar
//   tau=1us,2us,4us      explicit sweep
//   tau=12ns:2us:64      linear sweep (start:stop:count, both ends included)
//   tau=10ns:1us:8:log   logarithmic sweep (same ends, geometric spacing)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::units::parse_duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(i64),
    Sweep(Vec<i64>),
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Scalar(v)
    }
}

impl From<Vec<i64>> for ParamValue {
    fn from(v: Vec<i64>) -> Self {
        ParamValue::Sweep(v)
    }
}

/// Named parameter overrides, ordered by name for deterministic output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Option<ParamValue> {
        self.values.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overlay `other` on top of `self`; `other` wins on conflicts.
    pub fn overlay(&mut self, other: &Params) {
        for (name, value) in other.iter() {
            self.values.insert(name.to_string(), value.clone());
        }
    }

    /// Swept parameters and their value lists.
    pub fn sweeps(&self) -> impl Iterator<Item = (&str, &[i64])> {
        self.values.iter().filter_map(|(k, v)| match v {
            ParamValue::Sweep(values) => Some((k.as_str(), values.as_slice())),
            ParamValue::Scalar(_) => None,
        })
    }

    /// Scalar view for repetition `index`: every sweep named in `names`
    /// is replaced by its element at `index`. Callers check lengths first.
    pub(crate) fn at_sweep_index(&self, names: &[&str], index: usize) -> Params {
        let mut out = self.clone();
        for name in names {
            if let Some(ParamValue::Sweep(values)) = self.values.get(*name) {
                if let Some(v) = values.get(index) {
                    out.values
                        .insert((*name).to_string(), ParamValue::Scalar(*v));
                }
            }
        }
        out
    }
}

impl FromIterator<(String, ParamValue)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Params {
            values: iter.into_iter().collect(),
        }
    }
}

/// Spacing of a `start:stop:count` sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Progression {
    #[default]
    Linear,
    Logarithmic,
}

/// `count` evenly spaced values from `start` to `stop` inclusive. Interior
/// points are floored to whole nanoseconds.
pub fn linspace(start: i64, stop: i64, count: usize) -> Vec<i64> {
    spaced(start as f64, stop as f64, count)
        .into_iter()
        .map(|v| v.floor() as i64)
        .collect()
}

/// `count` values from `start` to `stop` with a constant ratio, truncated to
/// whole nanoseconds. `None` unless both ends are positive.
pub fn logspace(start: i64, stop: i64, count: usize) -> Option<Vec<i64>> {
    if start <= 0 || stop <= 0 {
        return None;
    }
    let exponents = spaced((start as f64).log10(), (stop as f64).log10(), count);
    Some(
        exponents
            .into_iter()
            .map(|e| 10f64.powf(e).trunc() as i64)
            .collect(),
    )
}

/// Float points `start + i * step`; the last point is `stop` exactly.
fn spaced(start: f64, stop: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (count - 1) as f64;
            (0..count)
                .map(|i| if i == count - 1 { stop } else { i as f64 * step + start })
                .collect()
        }
    }
}

/// Parse `name=value` into a parameter override.
pub fn parse_assignment(text: &str) -> Result<(String, ParamValue), ParseError> {
    let invalid = |reason: String| ParseError::InvalidAssignment {
        text: text.to_string(),
        reason,
    };
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| invalid("expected `name=value`".into()))?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(invalid(format!("{name:?} is not a parameter name")));
    }
    parse_value(value).map(|v| (name.to_string(), v)).map_err(invalid)
}

/// Parse the value half of an assignment.
pub fn parse_value(value: &str) -> Result<ParamValue, String> {
    let duration = |s: &str| parse_duration(s).map_err(|e| e.to_string());
    if value.contains(':') {
        let parts: Vec<&str> = value.split(':').map(str::trim).collect();
        let (start, stop, count, progression) = match parts[..] {
            [start, stop, count] => (start, stop, count, Progression::Linear),
            [start, stop, count, mode] => {
                let progression = match mode.to_ascii_lowercase().as_str() {
                    "lin" => Progression::Linear,
                    "log" => Progression::Logarithmic,
                    _ => return Err(format!("sweep spacing {mode:?} is not `lin` or `log`")),
                };
                (start, stop, count, progression)
            }
            _ => return Err("sweep must be `start:stop:count[:lin|log]`".into()),
        };
        let count: usize = count
            .parse()
            .map_err(|_| format!("sweep count {count:?} is not a whole number"))?;
        if count == 0 {
            return Err("sweep needs at least one value".into());
        }
        let (start, stop) = (duration(start)?, duration(stop)?);
        let values = match progression {
            Progression::Linear => linspace(start, stop, count),
            Progression::Logarithmic => logspace(start, stop, count)
                .ok_or_else(|| "logarithmic sweep needs positive ends".to_string())?,
        };
        return Ok(ParamValue::Sweep(values));
    }
    if value.contains(',') {
        let values = value
            .split(',')
            .map(duration)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ParamValue::Sweep(values));
    }
    duration(value).map(ParamValue::Scalar)
}
