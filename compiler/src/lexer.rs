// lexer.rs — Tokens of the structure grammar
//
// Tokenizes a structure line such as `0, 1^N, (2, 3^M)^4` with `logos`.
// Whitespace is insignificant; anything else outside the token set is
// recorded by position and lexing carries on.

use logos::Logos;
use std::fmt;

use crate::ast::Span;

#[derive(Logos, Debug, Clone, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("(")]
    Open,
    #[token(")")]
    Close,
    #[token(",")]
    Sep,
    #[token("^")]
    Pow,

    /// Child index or literal count; a value past `u64` is not a token.
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<u64>().ok())]
    Int(u64),

    /// Repetition parameter.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Name(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
            Token::Sep => f.write_str(","),
            Token::Pow => f.write_str("^"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Name(name) => f.write_str(name),
        }
    }
}

/// Tokens of one structure line and the spans nothing matched.
#[derive(Debug, Default)]
pub struct Tokens {
    pub tokens: Vec<(Token, Span)>,
    pub rejected: Vec<Span>,
}

pub fn tokenize(line: &str) -> Tokens {
    let mut out = Tokens::default();
    for (token, range) in Token::lexer(line).spanned() {
        let span = Span::from(range);
        match token {
            Ok(token) => out.tokens.push((token, span)),
            Err(()) => out.rejected.push(span),
        }
    }
    out
}
