// plsc — Pulse Sequence Compiler
//
// Library root. Parse `.pls` documents, compose and evaluate sequences,
// merge channels into frames and program a pulse-sequencer board.

pub mod ast;
pub mod config;
pub mod context;
pub mod document;
pub mod emit;
pub mod error;
pub mod id;
pub mod lexer;
pub mod merge;
pub mod params;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod sequence;
pub mod structure;
pub mod units;

pub use error::{Error, Result};
