// parser.rs — Structure-grammar parser
//
// Parses a structure line into a `Structure` tree with chumsky combinators:
//
//   list := term (',' term)*
//   term := (INT | '(' list ')') ('^' (INT | IDENT))?
//
// Preconditions: none; any string is accepted as input.
// Postconditions: returns a tree plus any errors (lex and parse, non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{tokenize, Token};

type Diagnostic = Rich<'static, Token, Span>;

/// Tree plus every diagnostic; lexing and parsing both continue past errors.
#[derive(Debug)]
pub struct ParseResult {
    pub structure: Option<Structure>,
    pub errors: Vec<Diagnostic>,
}

pub fn parse(source: &str) -> ParseResult {
    let lexed = tokenize(source);
    let eoi = Span::from(source.len()..source.len());
    let stream = Stream::from_iter(lexed.tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let (structure, parse_errors) = structure_parser().parse(stream).into_output_errors();

    let errors = lexed
        .rejected
        .into_iter()
        .map(|span| {
            let text = &source[span.start()..span.end()];
            Rich::custom(span, format!("unexpected character {text:?}"))
        })
        .chain(parse_errors.into_iter().map(|e| e.into_owned()))
        .collect();

    ParseResult { structure, errors }
}

/// Parse a structure line, turning any diagnostic into a fatal `ParseError`.
pub fn parse_structure(source: &str) -> Result<Structure, ParseError> {
    let result = parse(source);
    match result.structure {
        Some(structure) if result.errors.is_empty() => Ok(structure),
        _ => Err(ParseError::StructureSyntax {
            structure: source.to_string(),
            messages: result
                .errors
                .iter()
                .map(|e| format!("{} at {:?}", e, e.span()))
                .collect(),
        }),
    }
}

// ── Grammar ──

fn structure_parser<'tokens, I>(
) -> impl Parser<'tokens, I, Structure, extra::Err<Rich<'tokens, Token, Span>>>
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    let count = select! {
        Token::Int(n) => RepeatCount::Literal(n),
        Token::Name(name) => RepeatCount::Param(name),
    }
    .labelled("repetition count");

    let repeat = just(Token::Pow).ignore_then(count);

    let terms = recursive(move |terms| {
        let index = select! {
            Token::Int(n) = e => Target::Index(usize::try_from(n).unwrap_or(usize::MAX), e.span()),
        }
        .labelled("child index");

        let group = terms
            .delimited_by(just(Token::Open), just(Token::Close))
            .map_with(|inner, e| Target::Group(inner, e.span()));

        index
            .or(group)
            .then(repeat.clone().or_not())
            .map_with(|(target, repeat), e| Term {
                target,
                repeat,
                span: e.span(),
            })
            .separated_by(just(Token::Sep))
            .at_least(1)
            .collect::<Vec<_>>()
    });

    terms
        .then_ignore(end())
        .map_with(|terms, e| Structure {
            terms,
            span: e.span(),
        })
}
