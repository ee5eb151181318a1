// Copyright (C) Thalia Archibald. All rights reserved.
//
// This file is part of parsing-elements, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

//! Library for building grammars from runtime-composable parsing elements.
//!
//! A grammar is a graph of recognizers, not a compiled table: words and
//! regex tokens at the leaves, groups (ordered alternation) and rules
//! (ordered concatenation) above them, wired through cardinality-annotated
//! references, with procedures and conditions for context-sensitive parsing.
//! Recognition is recursive descent with backtracking over a buffered input
//! cursor, and the grammar can be rewired between parses.

mod grammar;
mod input;
mod parse;
mod tree;
pub mod util;

pub use grammar::{
    many, many_optional, one, optional, Cardinality, ElementId, Grammar, GrammarError, Reference,
};
pub use input::{Input, Status, BUFFER_AHEAD};
pub use parse::{ConditionFn, Context, PResult, ParseError, ProcedureFn, ProcessFn, Scratch};
pub use tree::{Match, TokenCaptures, Value};
