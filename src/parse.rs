// Copyright (C) Thalia Archibald. All rights reserved.
//
// This file is part of parsing-elements, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    io,
    path::Path,
};

use bstr::{BStr, BString, ByteSlice};
use static_assertions::assert_not_impl_any;
use thiserror::Error;

use crate::{
    grammar::{Cardinality, ElementId, Grammar, GrammarError, Kind, Reference},
    input::Input,
    tree::{Match, TokenCaptures, Value},
};

pub type PResult<T> = Result<T, ParseError>;

/// An error from parsing, excluding recognition failure. A recognizer that
/// simply does not match answers `Ok(None)`; errors are reserved for broken
/// grammars and broken inputs.
#[derive(Debug, Error)]
#[error(transparent)]
pub enum ParseError {
    Grammar(#[from] GrammarError),
    Io(#[from] io::Error),
}

/// A procedure callback: runs for its side effects on the context.
pub type ProcedureFn = Box<dyn Fn(&mut Context<'_>)>;
/// A condition callback: decides whether its element matches.
pub type ConditionFn = Box<dyn Fn(&mut Context<'_>) -> PResult<bool>>;
/// A process callback: turns a match whose children are already processed
/// into a value.
pub type ProcessFn = Box<dyn Fn(&mut Match, &mut Context<'_>) -> Option<Value>>;

/// The user-extensible slot of a parsing context. Procedures and conditions
/// keep whatever state they need here, such as an indentation depth.
#[derive(Default)]
pub struct Scratch {
    slot: Option<Box<dyn Any>>,
}

// Parsing is single-threaded; the scratch slot stays on the parsing thread.
assert_not_impl_any!(Scratch: Send, Sync);

impl Scratch {
    pub fn new() -> Scratch {
        Scratch { slot: None }
    }

    /// Stores `value`, replacing whatever the slot held.
    pub fn set<T: Any>(&mut self, value: T) {
        self.slot = Some(Box::new(value));
    }

    /// Borrows the slot, if it holds a `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.slot.as_deref()?.downcast_ref()
    }

    /// Mutably borrows the slot, if it holds a `T`.
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.slot.as_deref_mut()?.downcast_mut()
    }

    /// Removes and returns the slot's value, if it holds a `T`. A value of
    /// another type is left in place.
    pub fn take<T: Any>(&mut self) -> Option<T> {
        match self.slot.take()?.downcast() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.slot = Some(other);
                None
            }
        }
    }
}

impl Debug for Scratch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scratch")
            .field("occupied", &self.slot.is_some())
            .finish()
    }
}

/// The per-parse state: the grammar being applied, the input being consumed,
/// and the user scratch. One context serves exactly one parse.
pub struct Context<'g> {
    grammar: &'g Grammar,
    input: &'g mut Input,
    scratch: Scratch,
    /// Set while the skip element is being recognized, so a composite skip
    /// does not recurse into skipping.
    skipping: bool,
    /// The deepest offset any recognizer reached; where the input is left
    /// after a failed parse.
    furthest: usize,
}

impl<'g> Context<'g> {
    pub fn new(grammar: &'g Grammar, input: &'g mut Input) -> Context<'g> {
        let furthest = input.offset();
        Context {
            grammar,
            input,
            scratch: Scratch::new(),
            skipping: false,
            furthest,
        }
    }

    #[inline(always)]
    pub fn grammar(&self) -> &'g Grammar {
        self.grammar
    }

    #[inline(always)]
    pub fn input(&self) -> &Input {
        self.input
    }

    /// The input, mutably; conditions that consume input relocate it here.
    #[inline(always)]
    pub fn input_mut(&mut self) -> &mut Input {
        self.input
    }

    #[inline(always)]
    pub fn scratch(&self) -> &Scratch {
        &self.scratch
    }

    #[inline(always)]
    pub fn scratch_mut(&mut self) -> &mut Scratch {
        &mut self.scratch
    }

    /// The deepest offset recognition has reached, for diagnostics.
    #[inline]
    pub fn furthest(&self) -> usize {
        self.furthest
    }

    /// The input text a match consumed.
    pub fn text(&self, m: &Match) -> &BStr {
        self.input.slice(m.offset(), m.length()).as_bstr()
    }

    /// Applies the grammar's axiom to the input. On success the match tree is
    /// run through the process pass; on recognition failure the input is left
    /// at the furthest offset reached.
    pub fn parse(&mut self) -> PResult<Option<Match>> {
        if !self.grammar.is_prepared() {
            return Err(GrammarError::NotPrepared.into());
        }
        let axiom = self.grammar.axiom().ok_or(GrammarError::NoAxiom)?;
        self.furthest = self.input.offset();
        self.apply_skip()?;
        match self.recognize(axiom)? {
            Some(mut m) => {
                self.process(&mut m);
                Ok(Some(m))
            }
            None => {
                let furthest = self.furthest;
                self.input.move_to(furthest)?;
                Ok(None)
            }
        }
    }

    /// Runs the process pass over a match tree: post-order, each match's
    /// process callback sees its children already processed. Matches of
    /// elements without a callback pass through unchanged.
    pub fn process(&mut self, m: &mut Match) {
        for child in m.children_mut() {
            self.process(child);
        }
        let grammar = self.grammar;
        if let Some(process) = &grammar.element(m.element()).process {
            let value = process(m, self);
            if let Some(value) = value {
                m.set_value(value);
            }
        }
    }

    /// Recognizes one element at the cursor. `None` is recognition failure,
    /// and on failure the cursor is exactly where it was on entry.
    fn recognize(&mut self, id: ElementId) -> PResult<Option<Match>> {
        let m = self.recognize_element(id)?;
        let offset = self.input.offset();
        if offset > self.furthest {
            self.furthest = offset;
        }
        Ok(m)
    }

    fn recognize_element(&mut self, id: ElementId) -> PResult<Option<Match>> {
        let grammar = self.grammar;
        match &grammar.element(id).kind {
            Kind::Word { text } => {
                let start = self.input.offset();
                let matched = {
                    let window = self.input.lookahead(text.len())?;
                    window.starts_with(text.as_slice())
                };
                if matched {
                    let moved = self.input.advance(text.len() as isize)?;
                    debug_assert!(moved, "the compared window was already loaded");
                    Ok(Some(Match::success(id, start, text.len())))
                } else {
                    Ok(None)
                }
            }
            Kind::Token { pattern, .. } => {
                let start = self.input.offset();
                let captured = {
                    let window = self.input.lookahead(0)?;
                    pattern.captures(window).map(|caps| {
                        let groups = (0..caps.len())
                            .map(|i| caps.get(i).map(|g| BString::from(g.as_bytes())))
                            .collect::<Vec<_>>();
                        (caps[0].len(), groups)
                    })
                };
                match captured {
                    Some((length, groups)) => {
                        let moved = self.input.advance(length as isize)?;
                        debug_assert!(moved, "the matched window was already loaded");
                        Ok(Some(
                            Match::success(id, start, length)
                                .with_captures(TokenCaptures::new(groups)),
                        ))
                    }
                    None => Ok(None),
                }
            }
            Kind::Group { children } => {
                let start = self.input.offset();
                for child in children {
                    if let Some(m) = self.recognize_ref(child)? {
                        let mut group = Match::success(id, start, m.length());
                        group.children.push(m);
                        return Ok(Some(group));
                    }
                    debug_assert_eq!(
                        self.input.offset(),
                        start,
                        "a failed alternative must restore the cursor",
                    );
                }
                Ok(None)
            }
            Kind::Rule { children } => {
                let entry = self.input.offset();
                let mut matched = Vec::with_capacity(children.len());
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        self.apply_skip()?;
                    }
                    match self.recognize_ref(child)? {
                        Some(m) => matched.push(m),
                        None => {
                            self.input.move_to(entry)?;
                            return Ok(None);
                        }
                    }
                }
                let length = self.input.offset() - entry;
                let mut rule = Match::success(id, entry, length);
                rule.children = matched;
                Ok(Some(rule))
            }
            Kind::Procedure { action } => {
                let offset = self.input.offset();
                action(self);
                debug_assert_eq!(self.input.offset(), offset, "procedures consume nothing");
                Ok(Some(Match::empty(id, offset)))
            }
            Kind::Condition { test } => {
                let start = self.input.offset();
                if test(self)? {
                    let length = self.input.offset() - start;
                    Ok(Some(Match::success(id, start, length)))
                } else {
                    self.input.move_to(start)?;
                    Ok(None)
                }
            }
        }
    }

    /// Recognizes a child reference: the referenced element's recognition
    /// multiplied by the reference's cardinality.
    fn recognize_ref(&mut self, reference: &Reference) -> PResult<Option<Match>> {
        let start = self.input.offset();
        match reference.cardinality {
            Cardinality::One => {
                Ok(self
                    .recognize(reference.element())?
                    .map(|m| m.with_name(reference.name.clone())))
            }
            Cardinality::Optional => match self.recognize(reference.element())? {
                Some(m) => Ok(Some(m.with_name(reference.name.clone()))),
                None => Ok(Some(
                    Match::empty(reference.element(), start).with_name(reference.name.clone()),
                )),
            },
            Cardinality::Many | Cardinality::ManyOptional => {
                let mut repetitions = Vec::new();
                // Sum of child lengths; skip recognized between repetitions
                // is not part of it.
                let mut consumed = 0;
                loop {
                    let resume = self.input.offset();
                    if !repetitions.is_empty() {
                        self.apply_skip()?;
                    }
                    let before = self.input.offset();
                    match self.recognize(reference.element())? {
                        Some(m) => {
                            let advanced = self.input.offset() > before;
                            consumed += m.length();
                            repetitions.push(m);
                            // A repetition that consumed nothing would repeat
                            // forever; keep it and stop.
                            if !advanced {
                                break;
                            }
                        }
                        None => {
                            // Roll back the trailing skip.
                            self.input.move_to(resume)?;
                            break;
                        }
                    }
                }
                if repetitions.is_empty() {
                    debug_assert_eq!(
                        self.input.offset(),
                        start,
                        "a failed repetition must restore the cursor",
                    );
                    if reference.cardinality == Cardinality::Many {
                        Ok(None)
                    } else {
                        Ok(Some(
                            Match::empty(reference.element(), start)
                                .with_name(reference.name.clone()),
                        ))
                    }
                } else {
                    let mut chain = Match::success(reference.element(), start, consumed);
                    chain.children = repetitions;
                    Ok(Some(chain.with_name(reference.name.clone())))
                }
            }
        }
    }

    /// Greedily recognizes the skip element until it stops consuming. Skip
    /// matches are discarded and never backtracked into.
    fn apply_skip(&mut self) -> PResult<usize> {
        let Some(skip) = self.grammar.skip() else {
            return Ok(0);
        };
        if self.skipping {
            return Ok(0);
        }
        self.skipping = true;
        let start = self.input.offset();
        let result = loop {
            match self.recognize(skip) {
                Ok(Some(m)) if m.length() > 0 => continue,
                Ok(_) => break Ok(self.input.offset() - start),
                Err(err) => break Err(err),
            }
        };
        self.skipping = false;
        result
    }
}

impl Debug for Context<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("input", &self.input)
            .field("scratch", &self.scratch)
            .field("furthest", &self.furthest)
            .finish()
    }
}

impl Grammar {
    /// Opens the file at `path` and parses it. The input is dropped, and with
    /// it the file, on every exit path.
    pub fn parse_from_path(&mut self, path: impl AsRef<Path>) -> PResult<Option<Match>> {
        let mut input = Input::open(path)?;
        self.parse_from_input(&mut input)
    }

    /// Applies the axiom to `input`, preparing the grammar first if needed.
    /// `Ok(None)` is recognition failure: the grammar simply did not match,
    /// and the input is left at the furthest offset reached.
    ///
    /// To supply scratch state to procedures and conditions, build a
    /// [`Context`] over a prepared grammar and call [`Context::parse`].
    pub fn parse_from_input(&mut self, input: &mut Input) -> PResult<Option<Match>> {
        if !self.is_prepared() {
            self.prepare()?;
        }
        Context::new(self, input).parse()
    }
}
