// units.rs — Time-value parsing for pulse documents
//
// Turns a token into either integer nanoseconds or a symbol reference.
// Quantities are lexed with `logos` into a number and an optional unit word;
// anything that does not lex as `<number> [unit]` with a known unit is a
// symbol. Known non-time units are rejected instead of becoming symbols.
//
// Preconditions: input is a single token or a `name : value` value field.
// Postconditions: concrete values are whole nanoseconds, rounded half to even.
// Failure modes: non-time unit, or a value that does not fit in i64 ns.
// Side effects: none.

use std::cmp::Ordering;
use std::fmt;

use logos::Logos;
use serde::Serialize;

use crate::error::UnitError;

/// A duration entry: either concrete nanoseconds or a named parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum TimeValue {
    Concrete(i64),
    Symbolic(String),
}

impl TimeValue {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            TimeValue::Symbolic(name) => Some(name),
            TimeValue::Concrete(_) => None,
        }
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeValue::Concrete(ns) => write!(f, "{ns}"),
            TimeValue::Symbolic(name) => write!(f, "{name}"),
        }
    }
}

impl From<i64> for TimeValue {
    fn from(ns: i64) -> Self {
        TimeValue::Concrete(ns)
    }
}

impl From<&str> for TimeValue {
    fn from(name: &str) -> Self {
        TimeValue::Symbolic(name.to_string())
    }
}

// ── Units ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Attosecond,
    Femtosecond,
    Picosecond,
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Fortnight,
    /// Julian year, 365.25 days.
    Year,
}

impl TimeUnit {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let unit = match symbol {
            "as" => TimeUnit::Attosecond,
            "fs" => TimeUnit::Femtosecond,
            "ps" => TimeUnit::Picosecond,
            "ns" => TimeUnit::Nanosecond,
            "us" | "µs" | "μs" => TimeUnit::Microsecond,
            "ms" => TimeUnit::Millisecond,
            "s" | "second" => TimeUnit::Second,
            "min" | "minute" => TimeUnit::Minute,
            "h" | "hour" => TimeUnit::Hour,
            "d" | "day" => TimeUnit::Day,
            "wk" | "week" => TimeUnit::Week,
            "fortnight" => TimeUnit::Fortnight,
            "yr" | "year" => TimeUnit::Year,
            _ => return None,
        };
        Some(unit)
    }

    /// One unit expressed in nanoseconds as `(numerator, denominator)`.
    fn ratio(self) -> (i128, i128) {
        match self {
            TimeUnit::Attosecond => (1, 1_000_000_000),
            TimeUnit::Femtosecond => (1, 1_000_000),
            TimeUnit::Picosecond => (1, 1_000),
            TimeUnit::Nanosecond => (1, 1),
            TimeUnit::Microsecond => (1_000, 1),
            TimeUnit::Millisecond => (1_000_000, 1),
            TimeUnit::Second => (1_000_000_000, 1),
            TimeUnit::Minute => (60_000_000_000, 1),
            TimeUnit::Hour => (3_600_000_000_000, 1),
            TimeUnit::Day => (86_400_000_000_000, 1),
            TimeUnit::Week => (604_800_000_000_000, 1),
            TimeUnit::Fortnight => (1_209_600_000_000_000, 1),
            TimeUnit::Year => (31_557_600_000_000_000, 1),
        }
    }
}

/// Units that parse as quantities but can never become a duration.
/// Lengths first: `um` and `nm` are micro- and nanometres here.
const FOREIGN_UNITS: &[&str] = &[
    "km", "m", "cm", "mm", "um", "nm", // length
    "kg", "g", "mg", // mass
    "Hz", "kHz", "MHz", "GHz", // frequency
    "V", "mV", "kV", "A", "mA", "uA", "W", "mW", "kW", "Ohm", "F", "C", "T", // electrical
    "J", "eV", "N", "Pa", "K", "mol", "rad", "deg",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Time(TimeUnit),
    Foreign(&'static str),
}

impl Unit {
    fn from_symbol(symbol: &str) -> Option<Self> {
        TimeUnit::from_symbol(symbol).map(Unit::Time).or_else(|| {
            FOREIGN_UNITS
                .iter()
                .find(|u| **u == symbol)
                .map(|u| Unit::Foreign(*u))
        })
    }
}

// ── Quantities ──

/// Magnitude typing follows the text: no `.` means integer-typed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Magnitude {
    Int(i64),
    Float(f64),
}

impl Magnitude {
    fn parse(text: &str) -> Option<Self> {
        if text.contains('.') {
            return text.parse().ok().map(Magnitude::Float);
        }
        if let Ok(v) = text.parse::<i64>() {
            return Some(Magnitude::Int(v));
        }
        // Exponent forms are integer-typed and truncate; overflow stays a
        // float so conversion reports it as out of range.
        let v: f64 = text.parse().ok()?;
        if v.is_finite() && v.abs() < i64::MAX as f64 {
            Some(Magnitude::Int(v.trunc() as i64))
        } else {
            Some(Magnitude::Float(v))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub magnitude: Magnitude,
    pub unit: Option<Unit>,
}

impl Quantity {
    /// Convert to whole nanoseconds. A missing unit means nanoseconds.
    pub fn to_ns(&self, token: &str) -> Result<i64, UnitError> {
        let unit = match self.unit {
            None => TimeUnit::Nanosecond,
            Some(Unit::Time(u)) => u,
            Some(Unit::Foreign(u)) => {
                return Err(UnitError::NonTimeUnit {
                    token: token.to_string(),
                    unit: u.to_string(),
                })
            }
        };
        let out_of_range = || UnitError::OutOfRange {
            token: token.to_string(),
        };
        let (num, den) = unit.ratio();
        let ns = match self.magnitude {
            Magnitude::Int(v) => div_round_half_even(v as i128 * num, den),
            Magnitude::Float(v) => {
                let scaled = v * num as f64 / den as f64;
                if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
                    return Err(out_of_range());
                }
                scaled.round_ties_even() as i128
            }
        };
        i64::try_from(ns).map_err(|_| out_of_range())
    }
}

fn div_round_half_even(n: i128, d: i128) -> i128 {
    let q = n.div_euclid(d);
    let r = n.rem_euclid(d);
    match (2 * r).cmp(&d) {
        Ordering::Less => q,
        Ordering::Greater => q + 1,
        Ordering::Equal if q % 2 == 0 => q,
        Ordering::Equal => q + 1,
    }
}

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t]+")]
enum QuantityToken {
    #[regex(r"[+-]?([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][+-]?[0-9]+)?")]
    Number,

    #[regex(r"[a-zA-Zµμ]+")]
    Word,
}

/// Lex `text` as `<number> [unit]`. Returns `None` for anything else,
/// including a number followed by an unknown word.
pub fn parse_quantity(text: &str) -> Option<Quantity> {
    let mut lex = QuantityToken::lexer(text);
    let number = match lex.next() {
        Some(Ok(QuantityToken::Number)) => lex.slice(),
        _ => return None,
    };
    let unit = match lex.next() {
        None => None,
        Some(Ok(QuantityToken::Word)) => Some(Unit::from_symbol(lex.slice())?),
        Some(_) => return None,
    };
    if lex.next().is_some() {
        return None;
    }
    Some(Quantity {
        magnitude: Magnitude::parse(number)?,
        unit,
    })
}

/// Resolve one body token.
///
/// Tokens that are not quantities become symbol references; this is
/// deliberately permissive, so a typo such as `10 nss` names a parameter.
pub fn parse_time_value(token: &str) -> Result<TimeValue, UnitError> {
    match parse_quantity(token) {
        Some(q) => q.to_ns(token).map(TimeValue::Concrete),
        None => Ok(TimeValue::Symbolic(token.to_string())),
    }
}

/// Resolve a default or override value, which must be a quantity.
pub fn parse_duration(text: &str) -> Result<i64, UnitError> {
    let text = text.trim();
    parse_quantity(text)
        .ok_or_else(|| UnitError::NotAQuantity {
            token: text.to_string(),
        })?
        .to_ns(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(token: &str) -> i64 {
        match parse_time_value(token) {
            Ok(TimeValue::Concrete(v)) => v,
            other => panic!("expected concrete value for {token:?}, got {other:?}"),
        }
    }

    #[test]
    fn bare_numbers_are_nanoseconds() {
        assert_eq!(ns("0"), 0);
        assert_eq!(ns("250"), 250);
        assert_eq!(ns("1e3"), 1000);
    }

    #[test]
    fn unit_suffixes_scale() {
        assert_eq!(ns("3us"), 3_000);
        assert_eq!(ns("1.5us"), 1_500);
        assert_eq!(ns("2ms"), 2_000_000);
        assert_eq!(ns("1s"), 1_000_000_000);
        assert_eq!(ns("2µs"), 2_000);
        assert_eq!(ns("1500ps"), 2);
    }

    #[test]
    fn whitespace_between_number_and_unit() {
        assert_eq!(parse_duration(" 10 us "), Ok(10_000));
    }

    #[test]
    fn rounding_is_half_even() {
        assert_eq!(ns("2.5"), 2);
        assert_eq!(ns("3.5"), 4);
        assert_eq!(ns("2500ps"), 2);
        assert_eq!(ns("3500ps"), 4);
    }

    #[test]
    fn exponent_without_point_is_integer_typed() {
        assert_eq!(ns("15e-1"), 1);
    }

    #[test]
    fn non_numeric_tokens_are_symbols() {
        assert_eq!(parse_time_value("tau"), Ok(TimeValue::Symbolic("tau".into())));
        assert_eq!(
            parse_time_value("pi_half"),
            Ok(TimeValue::Symbolic("pi_half".into()))
        );
    }

    #[test]
    fn unknown_unit_falls_back_to_symbol() {
        assert_eq!(
            parse_time_value("10nss"),
            Ok(TimeValue::Symbolic("10nss".into()))
        );
    }

    #[test]
    fn foreign_unit_is_an_error() {
        assert_eq!(
            parse_time_value("10MHz"),
            Err(UnitError::NonTimeUnit {
                token: "10MHz".into(),
                unit: "MHz".into()
            })
        );
    }

    #[test]
    fn long_time_units() {
        assert_eq!(ns("2d"), 172_800_000_000_000);
        assert_eq!(ns("1wk"), 604_800_000_000_000);
        assert_eq!(ns("1 week"), ns("7 day"));
        assert_eq!(ns("1yr"), 31_557_600_000_000_000);
        assert_eq!(ns("2500000000as"), 2);
        assert!(matches!(
            parse_time_value("300yr"),
            Err(UnitError::OutOfRange { .. })
        ));
    }

    #[test]
    fn other_physical_units_are_errors() {
        for token in ["5kg", "3 nm", "2um", "1.5 eV", "90deg"] {
            assert!(
                matches!(parse_time_value(token), Err(UnitError::NonTimeUnit { .. })),
                "{token}"
            );
        }
    }

    #[test]
    fn overflow_is_reported() {
        assert!(matches!(
            parse_time_value("1e30s"),
            Err(UnitError::OutOfRange { .. })
        ));
    }

    #[test]
    fn defaults_must_be_quantities() {
        assert_eq!(parse_duration("400"), Ok(400));
        assert_eq!(
            parse_duration("abc"),
            Err(UnitError::NotAQuantity {
                token: "abc".into()
            })
        );
    }

    #[test]
    fn negative_values_parse() {
        assert_eq!(ns("-20"), -20);
    }
}
