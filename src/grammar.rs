// Copyright (C) Thalia Archibald. All rights reserved.
//
// This file is part of parsing-elements, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use std::{
    collections::VecDeque,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use bstr::{BString, ByteSlice};
use regex::bytes::Regex;
use thiserror::Error;

use crate::parse::{ConditionFn, Context, PResult, ProcedureFn, ProcessFn};
use crate::tree::{Match, Value};

/// A handle to an element owned by a [`Grammar`].
///
/// Handles are plain indices into the grammar's arena, so elements can be
/// shared by any number of references and reference chains may form cycles
/// without ownership loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElementId(pub(crate) u32);

impl ElementId {
    #[inline(always)]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// How many times a reference asks its element to match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly one match.
    #[default]
    One,
    /// Zero or one; never fails.
    Optional,
    /// One or more.
    Many,
    /// Zero or more; never fails.
    ManyOptional,
}

impl Cardinality {
    /// The single-character tag used when a textual form is needed.
    #[inline]
    pub fn symbol(self) -> char {
        match self {
            Cardinality::One => '1',
            Cardinality::Optional => '?',
            Cardinality::Many => '+',
            Cardinality::ManyOptional => '*',
        }
    }
}

/// A cardinality- and optionally name-annotated edge from a composite element
/// to a child element.
///
/// References are the children of groups and rules. The referenced element is
/// shared: many references may point at the same element, including through
/// cycles.
#[derive(Clone)]
pub struct Reference {
    /// Assigned during preparation, in traversal order from the axiom.
    pub(crate) id: u32,
    pub(crate) cardinality: Cardinality,
    pub(crate) name: Option<Arc<str>>,
    pub(crate) element: ElementId,
}

impl Reference {
    /// Wraps an element with the default cardinality of one.
    pub fn new(element: ElementId) -> Reference {
        Reference {
            id: 0,
            cardinality: Cardinality::One,
            name: None,
            element,
        }
    }

    /// Sets the cardinality, returning the reference transparently.
    pub fn cardinality(mut self, cardinality: Cardinality) -> Reference {
        self.cardinality = cardinality;
        self
    }

    /// Names the reference so process callbacks can find its matches.
    pub fn named(mut self, name: &str) -> Reference {
        self.name = Some(Arc::from(name));
        self
    }

    #[inline(always)]
    pub fn element(&self) -> ElementId {
        self.element
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Coerces an element into a reference with cardinality one.
impl From<ElementId> for Reference {
    #[inline]
    fn from(element: ElementId) -> Reference {
        Reference::new(element)
    }
}

impl Debug for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}{}", self.element.0, self.cardinality.symbol())?;
        if let Some(name) = &self.name {
            write!(f, ":{name}")?;
        }
        Ok(())
    }
}

/// A reference to `element` matching exactly once.
#[inline]
pub fn one(element: impl Into<Reference>) -> Reference {
    element.into().cardinality(Cardinality::One)
}

/// A reference to `element` matching zero or one time.
#[inline]
pub fn optional(element: impl Into<Reference>) -> Reference {
    element.into().cardinality(Cardinality::Optional)
}

/// A reference to `element` matching one or more times.
#[inline]
pub fn many(element: impl Into<Reference>) -> Reference {
    element.into().cardinality(Cardinality::Many)
}

/// A reference to `element` matching zero or more times.
#[inline]
pub fn many_optional(element: impl Into<Reference>) -> Reference {
    element.into().cardinality(Cardinality::ManyOptional)
}

/// The recognizer variants.
pub(crate) enum Kind {
    /// A literal byte string.
    Word { text: BString },
    /// A regular expression, anchored at the cursor.
    Token { expr: String, pattern: Regex },
    /// Ordered alternation; the first matching child wins.
    Group { children: Vec<Reference> },
    /// Ordered concatenation; every child must match in order.
    Rule { children: Vec<Reference> },
    /// A callback for context side effects; consumes nothing, always matches.
    Procedure { action: ProcedureFn },
    /// A callback that decides whether to match from the context.
    Condition { test: ConditionFn },
}

impl Kind {
    /// The single-character tag used when a textual form is needed.
    pub(crate) fn tag(&self) -> char {
        match self {
            Kind::Word { .. } => 'W',
            Kind::Token { .. } => 'T',
            Kind::Group { .. } => 'G',
            Kind::Rule { .. } => 'R',
            Kind::Procedure { .. } => 'p',
            Kind::Condition { .. } => 'c',
        }
    }
}

pub(crate) struct Element {
    pub(crate) kind: Kind,
    /// Assigned during preparation, in traversal order from the axiom.
    pub(crate) id: u32,
    pub(crate) name: Option<Arc<str>>,
    pub(crate) process: Option<ProcessFn>,
}

impl Debug for Element {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.tag(), self.id)?;
        if let Some(name) = &self.name {
            write!(f, " {name}")?;
        }
        match &self.kind {
            Kind::Word { text } => write!(f, " {:?}", text.as_bstr()),
            Kind::Token { expr, .. } => write!(f, " /{expr}/"),
            Kind::Group { children } | Kind::Rule { children } => {
                write!(f, " {children:?}")
            }
            _ => Ok(()),
        }
    }
}

/// A structural defect in a grammar, reported by element construction or by
/// [`Grammar::prepare`]. A grammar with any of these refuses to parse.
#[derive(Debug, Error)]
pub enum GrammarError {
    /// No axiom has been set.
    #[error("grammar has no axiom")]
    NoAxiom,
    /// The pattern given to [`Grammar::token`] did not compile.
    #[error("invalid token pattern")]
    Pattern(#[from] regex::Error),
    /// A group or rule reachable from the axiom has no children.
    #[error("composite element {0:?} has no children")]
    EmptyComposite(ElementId),
    /// A group holds an optional alternative, which can never fail and makes
    /// every later alternative unreachable.
    #[error("group {0:?} has an alternative that can never fail")]
    NullableAlternative(ElementId),
    /// Recognition could re-enter an element at the same offset without
    /// consuming input, so it would never terminate.
    #[error("left-recursive cycle through element {0:?}")]
    LeftRecursion(ElementId),
    /// A parse was started through a context on a grammar that has not been
    /// prepared.
    #[error("grammar is not prepared")]
    NotPrepared,
}

/// A grammar: an arena of parsing elements, an axiom, and an optional skip
/// element applied between the children of rules.
///
/// Elements are built through the `word`/`token`/`group`/`rule`/`procedure`/
/// `condition` constructors, wired together with [`Reference`]s, and applied
/// to an [`Input`](crate::Input) with the `parse_*` methods.
pub struct Grammar {
    pub(crate) elements: Vec<Element>,
    axiom: Option<ElementId>,
    skip: Option<ElementId>,
    prepared: bool,
}

impl Grammar {
    pub fn new() -> Grammar {
        Grammar {
            elements: Vec::new(),
            axiom: None,
            skip: None,
            prepared: false,
        }
    }

    fn push(&mut self, kind: Kind) -> ElementId {
        self.prepared = false;
        let id = ElementId(self.elements.len() as u32);
        self.elements.push(Element {
            kind,
            id: 0,
            name: None,
            process: None,
        });
        id
    }

    /// Creates a word element recognizing the literal `text`.
    pub fn word(&mut self, text: impl Into<BString>) -> ElementId {
        self.push(Kind::Word { text: text.into() })
    }

    /// Creates a token element recognizing `pattern` anchored at the cursor.
    /// The pattern syntax is that of the `regex` crate.
    pub fn token(&mut self, pattern: &str) -> Result<ElementId, GrammarError> {
        let compiled = Regex::new(&format!(r"\A(?:{pattern})"))?;
        Ok(self.push(Kind::Token {
            expr: pattern.to_owned(),
            pattern: compiled,
        }))
    }

    /// Creates a group element: ordered alternation over `children`.
    pub fn group<I>(&mut self, children: I) -> ElementId
    where
        I: IntoIterator,
        I::Item: Into<Reference>,
    {
        let children = children.into_iter().map(Into::into).collect();
        self.push(Kind::Group { children })
    }

    /// Creates a rule element: ordered concatenation of `children`.
    pub fn rule<I>(&mut self, children: I) -> ElementId
    where
        I: IntoIterator,
        I::Item: Into<Reference>,
    {
        let children = children.into_iter().map(Into::into).collect();
        self.push(Kind::Rule { children })
    }

    /// Creates a procedure element. The callback runs for its side effects on
    /// the context; the element consumes nothing and always matches empty.
    pub fn procedure(&mut self, action: impl Fn(&mut Context<'_>) + 'static) -> ElementId {
        self.push(Kind::Procedure {
            action: Box::new(action),
        })
    }

    /// Creates a condition element. The callback decides whether the element
    /// matches; by convention it consumes nothing, but whatever it does
    /// consume becomes the match.
    pub fn condition(
        &mut self,
        test: impl Fn(&mut Context<'_>) -> PResult<bool> + 'static,
    ) -> ElementId {
        self.push(Kind::Condition {
            test: Box::new(test),
        })
    }

    /// Appends a child reference to a group or rule. Words, tokens,
    /// procedures, and conditions have no children; adding to them does
    /// nothing.
    pub fn add_child(&mut self, parent: ElementId, child: impl Into<Reference>) {
        self.prepared = false;
        if let Kind::Group { children } | Kind::Rule { children } =
            &mut self.elements[parent.index()].kind
        {
            children.push(child.into());
        }
    }

    /// Names an element for diagnostics, returning its handle transparently.
    pub fn set_name(&mut self, element: ElementId, name: &str) -> ElementId {
        self.elements[element.index()].name = Some(Arc::from(name));
        element
    }

    /// The name given to an element, if any.
    pub fn name(&self, element: ElementId) -> Option<&str> {
        self.elements[element.index()].name.as_deref()
    }

    /// Installs the process callback run for an element's matches by the
    /// process pass.
    pub fn set_process(
        &mut self,
        element: ElementId,
        process: impl Fn(&mut Match, &mut Context<'_>) -> Option<Value> + 'static,
    ) {
        self.elements[element.index()].process = Some(Box::new(process));
    }

    /// Sets the root element applied to the input.
    pub fn set_axiom(&mut self, element: ElementId) {
        self.prepared = false;
        self.axiom = Some(element);
    }

    /// Sets the element recognized and discarded between the children of
    /// rules, between repetitions, and at the start of a parse; typically
    /// whitespace or comments.
    pub fn set_skip(&mut self, element: ElementId) {
        self.prepared = false;
        self.skip = Some(element);
    }

    #[inline]
    pub fn axiom(&self) -> Option<ElementId> {
        self.axiom
    }

    #[inline]
    pub fn skip(&self) -> Option<ElementId> {
        self.skip
    }

    #[inline]
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    #[inline(always)]
    pub(crate) fn element(&self, id: ElementId) -> &Element {
        &self.elements[id.index()]
    }

    /// Walks the element graph breadth-first from the axiom (then from the
    /// skip element), assigning ids in visit order and validating structure.
    /// Preparing an unchanged grammar again assigns the same ids.
    pub fn prepare(&mut self) -> Result<(), GrammarError> {
        let axiom = self.axiom.ok_or(GrammarError::NoAxiom)?;

        for element in &mut self.elements {
            element.id = 0;
            if let Kind::Group { children } | Kind::Rule { children } = &mut element.kind {
                for child in children {
                    child.id = 0;
                }
            }
        }

        let mut counter = 0u32;
        let mut visited = vec![false; self.elements.len()];
        let mut queue = VecDeque::new();
        for root in [Some(axiom), self.skip].into_iter().flatten() {
            if !visited[root.index()] {
                visited[root.index()] = true;
                self.elements[root.index()].id = counter;
                counter += 1;
                queue.push_back(root);
            }
            while let Some(id) = queue.pop_front() {
                let targets = self.visit(id, &mut counter)?;
                for target in targets {
                    if !visited[target.index()] {
                        visited[target.index()] = true;
                        self.elements[target.index()].id = counter;
                        counter += 1;
                        queue.push_back(target);
                    }
                }
            }
        }

        self.check_recursion(&visited)?;
        self.prepared = true;
        Ok(())
    }

    /// Numbers the references of one element and returns their targets.
    fn visit(&mut self, id: ElementId, counter: &mut u32) -> Result<Vec<ElementId>, GrammarError> {
        let element = &mut self.elements[id.index()];
        let is_group = matches!(element.kind, Kind::Group { .. });
        match &mut element.kind {
            Kind::Group { children } | Kind::Rule { children } => {
                if children.is_empty() {
                    return Err(GrammarError::EmptyComposite(id));
                }
                let mut targets = Vec::with_capacity(children.len());
                for child in children {
                    if is_group
                        && matches!(
                            child.cardinality,
                            Cardinality::Optional | Cardinality::ManyOptional,
                        )
                    {
                        return Err(GrammarError::NullableAlternative(id));
                    }
                    child.id = *counter;
                    *counter += 1;
                    targets.push(child.element);
                }
                Ok(targets)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Rejects grammars where recognition can re-enter an element at the same
    /// offset without having consumed input. Nullability is solved by
    /// fixpoint; the zero-progress call edges are then checked for a cycle.
    fn check_recursion(&self, visited: &[bool]) -> Result<(), GrammarError> {
        let n = self.elements.len();

        let mut nullable = vec![false; n];
        loop {
            let mut changed = false;
            for (i, element) in self.elements.iter().enumerate() {
                if nullable[i] || !visited[i] {
                    continue;
                }
                let now = match &element.kind {
                    Kind::Word { text } => text.is_empty(),
                    Kind::Token { pattern, .. } => pattern.is_match(b""),
                    Kind::Procedure { .. } | Kind::Condition { .. } => true,
                    Kind::Group { children } => {
                        children.iter().any(|r| ref_nullable(r, &nullable))
                    }
                    Kind::Rule { children } => {
                        children.iter().all(|r| ref_nullable(r, &nullable))
                    }
                };
                if now {
                    nullable[i] = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // The elements each element can invoke before any input is consumed.
        let heads: Vec<Vec<usize>> = self
            .elements
            .iter()
            .enumerate()
            .map(|(i, element)| {
                if !visited[i] {
                    return Vec::new();
                }
                match &element.kind {
                    Kind::Group { children } => {
                        children.iter().map(|r| r.element.index()).collect()
                    }
                    Kind::Rule { children } => {
                        let mut targets = Vec::new();
                        for child in children {
                            targets.push(child.element.index());
                            if !ref_nullable(child, &nullable) {
                                break;
                            }
                        }
                        targets
                    }
                    _ => Vec::new(),
                }
            })
            .collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        let mut marks = vec![Mark::White; n];
        for start in 0..n {
            if !visited[start] || marks[start] != Mark::White {
                continue;
            }
            marks[start] = Mark::Grey;
            let mut stack = vec![(start, 0usize)];
            while let Some(frame) = stack.last_mut() {
                let (node, edge) = *frame;
                if edge < heads[node].len() {
                    frame.1 += 1;
                    let next = heads[node][edge];
                    match marks[next] {
                        Mark::White => {
                            marks[next] = Mark::Grey;
                            stack.push((next, 0));
                        }
                        Mark::Grey => {
                            return Err(GrammarError::LeftRecursion(ElementId(next as u32)));
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks[node] = Mark::Black;
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}

fn ref_nullable(reference: &Reference, nullable: &[bool]) -> bool {
    matches!(
        reference.cardinality,
        Cardinality::Optional | Cardinality::ManyOptional,
    ) || nullable[reference.element.index()]
}

impl Default for Grammar {
    fn default() -> Grammar {
        Grammar::new()
    }
}

impl Debug for Grammar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("axiom", &self.axiom)
            .field("skip", &self.skip)
            .field("prepared", &self.prepared)
            .field("elements", &self.elements)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(g: &Grammar) -> Vec<u32> {
        g.elements.iter().map(|e| e.id).collect()
    }

    #[test]
    fn prepare_assigns_breadth_first_ids() {
        let mut g = Grammar::new();
        let number = g.token(r"[0-9]+").unwrap();
        let var = g.token(r"[A-Za-z_]+").unwrap();
        let op = g.token(r"[+\-*/]").unwrap();
        let value = g.group([one(number), one(var)]);
        let suffix = g.rule([one(op), one(value)]);
        let expr = g.rule([one(value), many_optional(suffix)]);
        g.set_axiom(expr);

        g.prepare().unwrap();
        assert!(g.is_prepared());
        assert_eq!(g.element(expr).id, 0, "the axiom gets id 0");
        let first = ids(&g);

        g.prepare().unwrap();
        assert_eq!(ids(&g), first, "preparation must be idempotent");
    }

    #[test]
    fn prepare_requires_axiom() {
        let mut g = Grammar::new();
        g.word("x");
        assert!(matches!(g.prepare(), Err(GrammarError::NoAxiom)));
    }

    #[test]
    fn prepare_rejects_empty_composites() {
        let mut g = Grammar::new();
        let empty = g.rule(Vec::<Reference>::new());
        g.set_axiom(empty);
        assert!(matches!(
            g.prepare(),
            Err(GrammarError::EmptyComposite(id)) if id == empty,
        ));
    }

    #[test]
    fn prepare_rejects_optional_group_alternatives() {
        let mut g = Grammar::new();
        let a = g.word("a");
        let b = g.word("b");
        let group = g.group([optional(a), one(b)]);
        g.set_axiom(group);
        assert!(matches!(
            g.prepare(),
            Err(GrammarError::NullableAlternative(id)) if id == group,
        ));
    }

    #[test]
    fn prepare_rejects_direct_left_recursion() {
        let mut g = Grammar::new();
        let op = g.word("+");
        let expr = g.rule(Vec::<Reference>::new());
        g.add_child(expr, one(expr));
        g.add_child(expr, one(op));
        g.set_axiom(expr);
        assert!(matches!(g.prepare(), Err(GrammarError::LeftRecursion(_))));
    }

    #[test]
    fn prepare_rejects_recursion_behind_nullable_prefix() {
        let mut g = Grammar::new();
        let ws = g.token(r"[ \t]*").unwrap();
        let expr = g.rule(Vec::<Reference>::new());
        g.add_child(expr, one(ws));
        g.add_child(expr, one(expr));
        g.set_axiom(expr);
        assert!(matches!(g.prepare(), Err(GrammarError::LeftRecursion(_))));
    }

    #[test]
    fn prepare_accepts_guarded_recursion() {
        let mut g = Grammar::new();
        let number = g.token(r"[0-9]+").unwrap();
        let open = g.word("(");
        let close = g.word(")");
        let expr = g.group([one(number)]);
        let paren = g.rule([one(open), one(expr), one(close)]);
        g.add_child(expr, one(paren));
        g.set_axiom(expr);
        g.prepare().unwrap();
    }

    #[test]
    fn token_pattern_errors_fail_construction() {
        let mut g = Grammar::new();
        assert!(matches!(
            g.token(r"[0-9"),
            Err(GrammarError::Pattern(_)),
        ));
    }

    #[test]
    fn mutation_invalidates_preparation() {
        let mut g = Grammar::new();
        let a = g.word("a");
        let rule = g.rule([one(a)]);
        g.set_axiom(rule);
        g.prepare().unwrap();
        assert!(g.is_prepared());
        g.add_child(rule, one(a));
        assert!(!g.is_prepared());
    }

    #[test]
    fn reference_coercion_defaults_to_one() {
        let mut g = Grammar::new();
        let a = g.word("a");
        let reference = Reference::from(a);
        assert_eq!(reference.cardinality, Cardinality::One);
        assert_eq!(reference.element(), a);
        let named = many(a).named("items");
        assert_eq!(named.cardinality, Cardinality::Many);
        assert_eq!(named.name(), Some("items"));
    }
}
