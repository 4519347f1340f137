// document.rs — Pulse document (.pls) parser
//
// A document has a header of `name : default` lines, a `!` marker, a body
// of `channel : tokens` lines, and optionally a second marker. When the
// second marker mentions "structure", the next raw line is the structure.
//
//   # Ramsey
//   pi_h : 40ns
//   tau  : 1us
//   !
//   0 : 100, pi_h, tau, pi_h
//   3 : +, 50
//   ! structure
//   0, 1^N
//
// Body tokens: `,` separates, `+` is a zero-length placeholder, `|` starts
// the next parallel top-level sequence.
//
// Preconditions: none.
// Postconditions: every symbol referenced in the body is in the symbol table.
// Failure modes: `ParseError` with a 1-based line number; no partial result.
// Side effects: `tracing` events for discovered symbols and structure.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::ParseError;
use crate::id::Channel;
use crate::sequence::{AbstractSequence, Sequence, SymbolTable, TimeValue};
use crate::structure::StructuredSequence;
use crate::units::{parse_duration, parse_time_value};

const COMMENT: char = '#';
const SECTION: char = '!';

/// A parsed document before composition.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Header defaults plus every symbol discovered in the body.
    pub symbols: SymbolTable,
    /// Top-level sequences in `|` order.
    pub sequences: Vec<AbstractSequence>,
    pub structure: Option<String>,
}

impl Document {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        parse(source)
    }

    /// Read and parse a document from disk.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(parse(&source)?)
    }

    /// Compose the document into one evaluable sequence.
    ///
    /// No body gives an empty sequence; one top-level sequence is returned
    /// as is (a structure line is ignored); several become a structured
    /// sequence, with header defaults applied to its repetition parameters.
    pub fn into_sequence(self) -> Result<Sequence, ParseError> {
        let Document {
            symbols,
            mut sequences,
            structure,
        } = self;
        match sequences.len() {
            0 => Ok(AbstractSequence::with_symbols(symbols).into()),
            1 => {
                if structure.is_some() {
                    debug!("single sequence, structure line ignored");
                }
                Ok(sequences.remove(0).into())
            }
            _ => {
                let children = sequences.into_iter().map(Sequence::from).collect();
                let mut node = StructuredSequence::new(children);
                if let Some(structure) = &structure {
                    node.parse_structure(structure)?;
                }
                // Header defaults also reach repetition counts inside groups.
                let rep_defaults: Vec<(String, i64)> = node
                    .parameters()
                    .into_keys()
                    .filter_map(|name| symbols.default_of(&name).map(|v| (name, v)))
                    .collect();
                for (name, value) in rep_defaults {
                    node.set_default(&name, value);
                }
                Ok(node.into())
            }
        }
    }
}

/// Parse document text.
pub fn parse(source: &str) -> Result<Document, ParseError> {
    let lines: Vec<&str> = source.lines().collect();
    let mut symbols = read_header(&lines)?;

    let mut sequences: Vec<AbstractSequence> = Vec::new();
    let mut structure = None;
    let mut in_header = true;
    for (n, raw) in lines.iter().enumerate() {
        let line_no = n + 1;
        let line = strip_comment(raw);
        if line.trim().is_empty() {
            continue;
        }
        if in_header {
            if line.contains(SECTION) {
                in_header = false;
            }
            continue;
        }
        if line.contains(SECTION) {
            if line.to_lowercase().contains("structure") {
                let next = lines
                    .get(n + 1)
                    .ok_or(ParseError::MissingStructure { line: line_no })?;
                info!(structure = *next, "found structure");
                structure = Some(next.to_string());
            }
            break;
        }

        let (channel, segments) = read_body_line(line, line_no, raw, &mut symbols)?;
        while sequences.len() < segments.len() {
            sequences.push(AbstractSequence::with_symbols(symbols.clone()));
        }
        for (seq, values) in sequences.iter_mut().zip(segments) {
            seq.add_segments(channel, values);
        }
    }

    Ok(Document {
        symbols,
        sequences,
        structure,
    })
}

/// Parse a document file and compose it.
pub fn read_pulse_file(path: impl AsRef<Path>) -> crate::Result<Sequence> {
    Ok(Document::load(path.as_ref())?.into_sequence()?)
}

// ── Passes ──

/// Header pass: `name : value` lines before the first marker.
fn read_header(lines: &[&str]) -> Result<SymbolTable, ParseError> {
    let mut symbols = SymbolTable::new();
    for (n, raw) in lines.iter().enumerate() {
        let line = strip_comment(raw);
        if line.trim().is_empty() {
            continue;
        }
        if line.contains(SECTION) {
            break;
        }
        if line.contains('=') {
            continue;
        }
        let (name, value) = split_pair(line).ok_or_else(|| malformed(n + 1, raw))?;
        if symbols.contains(name) {
            warn!(symbol = name, line = n + 1, "duplicate symbol, keeping first");
            continue;
        }
        let ns = parse_duration(value).map_err(|source| ParseError::InvalidDefault {
            line: n + 1,
            name: name.to_string(),
            source,
        })?;
        debug!(symbol = name, default_ns = ns, "found symbol");
        symbols.define(name, Some(ns));
    }
    Ok(symbols)
}

/// One body line: the channel and its segments per top-level sequence.
fn read_body_line(
    line: &str,
    line_no: usize,
    raw: &str,
    symbols: &mut SymbolTable,
) -> Result<(Channel, Vec<Vec<TimeValue>>), ParseError> {
    let (bit, body) = split_pair(line).ok_or_else(|| malformed(line_no, raw))?;
    let channel = bit
        .parse::<usize>()
        .ok()
        .and_then(Channel::new)
        .ok_or_else(|| ParseError::InvalidChannel {
            line: line_no,
            text: bit.to_string(),
        })?;

    let body = body.replace(',', " ").replace('+', " 0 ");
    let mut segments: Vec<Vec<TimeValue>> = vec![Vec::new()];
    for word in body.split_whitespace() {
        if word == "|" {
            segments.push(Vec::new());
            continue;
        }
        let value = parse_time_value(word).map_err(|source| ParseError::InvalidToken {
            line: line_no,
            source,
        })?;
        match &value {
            TimeValue::Concrete(ns) if *ns < 0 => {
                return Err(ParseError::NegativeDuration {
                    line: line_no,
                    token: word.to_string(),
                })
            }
            TimeValue::Symbolic(name) => {
                if symbols.define(name, None) {
                    debug!(symbol = %name, line = line_no, "found symbol");
                }
            }
            TimeValue::Concrete(_) => {}
        }
        if let Some(current) = segments.last_mut() {
            current.push(value);
        }
    }
    Ok((channel, segments))
}

fn strip_comment(line: &str) -> &str {
    match line.find(COMMENT) {
        Some(i) => &line[..i],
        None => line,
    }
}

/// Split `key : value` into exactly two trimmed parts.
fn split_pair(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) if !key.trim().is_empty() => {
            Some((key.trim(), value.trim()))
        }
        _ => None,
    }
}

fn malformed(line: usize, raw: &str) -> ParseError {
    ParseError::MalformedLine {
        line,
        text: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnitError;
    use crate::params::Params;

    const RAMSEY: &str = "\
# Ramsey fringe
pi_h : 40ns
tau : 1us
!
0 : 100, pi_h, tau, pi_h   # drive
3 : +, 50
!
";

    fn ch(i: usize) -> Channel {
        Channel::new(i).unwrap()
    }

    #[test]
    fn header_defaults_and_body() {
        let doc = parse(RAMSEY).unwrap();
        assert_eq!(doc.symbols.default_of("pi_h"), Some(40));
        assert_eq!(doc.symbols.default_of("tau"), Some(1000));
        assert_eq!(doc.sequences.len(), 1);
        assert_eq!(doc.structure, None);
        let seq = &doc.sequences[0];
        assert_eq!(
            seq.channel(ch(0)),
            &[
                TimeValue::Concrete(100),
                TimeValue::Symbolic("pi_h".into()),
                TimeValue::Symbolic("tau".into()),
                TimeValue::Symbolic("pi_h".into()),
            ]
        );
        assert_eq!(
            seq.channel(ch(3)),
            &[TimeValue::Concrete(0), TimeValue::Concrete(50)]
        );
    }

    #[test]
    fn single_sequence_evaluates_with_defaults() {
        let seq = parse(RAMSEY).unwrap().into_sequence().unwrap();
        let raw = seq.eval(&Params::new()).unwrap();
        assert_eq!(raw.channel(ch(0)), &[100, 40, 1000, 40]);
    }

    #[test]
    fn body_symbols_are_discovered_unset() {
        let doc = parse("!\n0 : 10, delay, 10\n").unwrap();
        assert!(doc.symbols.contains("delay"));
        assert_eq!(doc.symbols.default_of("delay"), None);
        assert!(doc.sequences[0].symbols().contains("delay"));
    }

    const MULTI: &str = "\
N : 3
!
0 : 10, 20 | 30, 40 | 5, 5
1 : 1, 1 | | 2, 2
! Structure follows
0, 1^N, 2
";

    #[test]
    fn bars_split_top_level_sequences() {
        let doc = parse(MULTI).unwrap();
        assert_eq!(doc.sequences.len(), 3);
        assert_eq!(
            doc.sequences[1].channel(ch(0)),
            &[TimeValue::Concrete(30), TimeValue::Concrete(40)]
        );
        assert!(doc.sequences[1].channel(ch(1)).is_empty());
        assert_eq!(
            doc.sequences[2].channel(ch(1)),
            &[TimeValue::Concrete(2), TimeValue::Concrete(2)]
        );
        assert_eq!(doc.structure.as_deref(), Some("0, 1^N, 2"));
    }

    #[test]
    fn structured_document_uses_header_rep_default() {
        let seq = parse(MULTI).unwrap().into_sequence().unwrap();
        let Sequence::Structured(node) = &seq else {
            panic!("expected a structured sequence");
        };
        assert_eq!(node.rep_params(), &["N".to_string()]);
        let raw = seq.eval(&Params::new()).unwrap();
        // 30 + 3 * 70 + 10
        assert_eq!(raw.length_ns(), 250);
    }

    #[test]
    fn header_default_reaches_nested_group() {
        let source = "N : 2\n!\n0 : 10 | 20, 5 | 5\n! structure\n0, (1^N, 2)^3\n";
        let seq = parse(source).unwrap().into_sequence().unwrap();
        assert_eq!(seq.parameters().get("N"), Some(&Some(2)));
        // 10 + 3 * (2 * 25 + 5)
        assert_eq!(seq.eval(&Params::new()).unwrap().length_ns(), 175);
    }

    #[test]
    fn trailing_bar_creates_empty_sequence() {
        let doc = parse("!\n0 : 10, 20 |\n").unwrap();
        assert_eq!(doc.sequences.len(), 2);
        assert!(doc.sequences[1].channel(ch(0)).is_empty());
    }

    #[test]
    fn missing_structure_line_is_fatal() {
        assert_eq!(
            parse("!\n0 : 10 | 20\n! structure"),
            Err(ParseError::MissingStructure { line: 3 })
        );
    }

    #[test]
    fn bad_structure_index_is_fatal() {
        let doc = parse("!\n0 : 10 | 20\n! structure\n0, 2\n").unwrap();
        assert_eq!(
            doc.into_sequence(),
            Err(ParseError::StructureIndex {
                index: 2,
                children: 2
            })
        );
    }

    #[test]
    fn malformed_lines_report_line_numbers() {
        assert_eq!(
            parse("a : 1 : 2\n!"),
            Err(ParseError::MalformedLine {
                line: 1,
                text: "a : 1 : 2".into()
            })
        );
        assert!(matches!(
            parse("!\n0 10 20\n"),
            Err(ParseError::MalformedLine { line: 2, .. })
        ));
    }

    #[test]
    fn channel_range_is_checked() {
        assert_eq!(
            parse("!\n24 : 10\n"),
            Err(ParseError::InvalidChannel {
                line: 2,
                text: "24".into()
            })
        );
        assert!(matches!(
            parse("!\nx : 10\n"),
            Err(ParseError::InvalidChannel { .. })
        ));
    }

    #[test]
    fn negative_and_foreign_tokens_are_rejected() {
        assert_eq!(
            parse("!\n0 : 10, -5\n"),
            Err(ParseError::NegativeDuration {
                line: 2,
                token: "-5".into()
            })
        );
        assert_eq!(
            parse("!\n0 : 10MHz\n"),
            Err(ParseError::InvalidToken {
                line: 2,
                source: UnitError::NonTimeUnit {
                    token: "10MHz".into(),
                    unit: "MHz".into()
                }
            })
        );
    }

    #[test]
    fn header_quirks() {
        let doc = parse("tau : 10\ntau : 99\nx = 5\n\n   \n!\n").unwrap();
        assert_eq!(doc.symbols.default_of("tau"), Some(10));
        assert!(!doc.symbols.contains("x"));
        assert!(matches!(
            parse("tau : soon\n!"),
            Err(ParseError::InvalidDefault { line: 1, .. })
        ));
    }

    #[test]
    fn empty_body_gives_empty_sequence() {
        let seq = parse("tau : 10\n!\n").unwrap().into_sequence().unwrap();
        assert!(seq.eval(&Params::new()).unwrap().is_empty());
        assert_eq!(seq.parameters().get("tau"), Some(&Some(10)));
    }

    #[test]
    fn read_pulse_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramsey.pls");
        std::fs::write(&path, RAMSEY).unwrap();
        let seq = read_pulse_file(&path).unwrap();
        assert!(matches!(seq, Sequence::Abstract(_)));
        assert!(read_pulse_file(dir.path().join("missing.pls")).is_err());
    }
}
