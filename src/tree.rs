// Copyright (C) Thalia Archibald. All rights reserved.
//
// This file is part of parsing-elements, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    ops::ControlFlow,
    sync::Arc,
};

use bstr::{BStr, BString, ByteSlice};

use crate::grammar::ElementId;

/// A value produced by a process callback and stored in a match.
pub type Value = Box<dyn Any>;

/// The capture groups of a token match. Group 0 is the full match; the other
/// groups follow the pattern's parenthesization. Captures are copied out of
/// the input buffer, so they stay valid for the life of the match.
pub struct TokenCaptures {
    groups: Vec<Option<BString>>,
}

impl TokenCaptures {
    pub(crate) fn new(groups: Vec<Option<BString>>) -> TokenCaptures {
        debug_assert!(
            matches!(groups.first(), Some(Some(_))),
            "group 0 must hold the full match",
        );
        TokenCaptures { groups }
    }

    /// The number of groups, counting group 0.
    #[inline]
    pub fn count(&self) -> usize {
        self.groups.len()
    }

    /// The text of group `i`, or `None` for an absent index or a group that
    /// did not participate in the match.
    #[inline]
    pub fn group(&self, i: usize) -> Option<&BStr> {
        self.groups.get(i)?.as_ref().map(|g| g.as_bstr())
    }

    /// The full matched text.
    #[inline]
    pub fn full(&self) -> &BStr {
        self.group(0).unwrap()
    }
}

impl Debug for TokenCaptures {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.groups.iter().map(|g| g.as_ref().map(|g| g.as_bstr())))
            .finish()
    }
}

/// A successful recognition: which element matched, where, how much it
/// consumed, and what its children matched.
///
/// Zero-length matches are legal; procedures, conditions, and optional
/// references produce them. A failed recognition is not represented as a
/// match at all — recognizers answer `Option<Match>` and `None` is failure.
pub struct Match {
    pub(crate) element: ElementId,
    /// The name of the reference that produced this match, if any.
    pub(crate) name: Option<Arc<str>>,
    pub(crate) offset: usize,
    pub(crate) length: usize,
    pub(crate) children: Vec<Match>,
    pub(crate) captures: Option<TokenCaptures>,
    pub(crate) value: Option<Value>,
}

impl Match {
    pub(crate) fn success(element: ElementId, offset: usize, length: usize) -> Match {
        Match {
            element,
            name: None,
            offset,
            length,
            children: Vec::new(),
            captures: None,
            value: None,
        }
    }

    /// An empty (zero-length) success at `offset`.
    pub(crate) fn empty(element: ElementId, offset: usize) -> Match {
        Match::success(element, offset, 0)
    }

    pub(crate) fn with_name(mut self, name: Option<Arc<str>>) -> Match {
        self.name = name;
        self
    }

    pub(crate) fn with_captures(mut self, captures: TokenCaptures) -> Match {
        self.captures = Some(captures);
        self
    }

    /// The element this match originated from.
    #[inline(always)]
    pub fn element(&self) -> ElementId {
        self.element
    }

    /// The name of the reference this match was produced through.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The absolute offset of the matched input.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The number of bytes consumed. Zero for empty matches.
    #[inline(always)]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn children(&self) -> &[Match] {
        &self.children
    }

    #[inline]
    pub fn children_mut(&mut self) -> &mut [Match] {
        &mut self.children
    }

    #[inline]
    pub fn child(&self, i: usize) -> Option<&Match> {
        self.children.get(i)
    }

    #[inline]
    pub fn child_mut(&mut self, i: usize) -> Option<&mut Match> {
        self.children.get_mut(i)
    }

    /// The first direct child produced through a reference named `name`.
    pub fn named(&self, name: &str) -> Option<&Match> {
        self.children.iter().find(|c| c.name() == Some(name))
    }

    /// The token captures, for matches of token elements.
    #[inline]
    pub fn captures(&self) -> Option<&TokenCaptures> {
        self.captures.as_ref()
    }

    /// The text of capture group `i`, for matches of token elements.
    #[inline]
    pub fn group(&self, i: usize) -> Option<&BStr> {
        self.captures.as_ref()?.group(i)
    }

    /// The value stored by a process callback, if any.
    #[inline]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Stores a processed value on this match.
    #[inline]
    pub fn set_value(&mut self, value: Value) {
        self.value = Some(value);
    }

    /// Removes and returns the processed value. Process callbacks use this to
    /// move child values into the value they build.
    #[inline]
    pub fn take_value(&mut self) -> Option<Value> {
        self.value.take()
    }

    /// Walks the match tree in pre-order, handing each match and its depth to
    /// `f`. Children are visited in match order. Breaking from `f` stops the
    /// walk early.
    pub fn walk<F>(&self, f: &mut F) -> ControlFlow<()>
    where
        F: FnMut(&Match, usize) -> ControlFlow<()>,
    {
        self.walk_at(f, 0)
    }

    fn walk_at<F>(&self, f: &mut F, depth: usize) -> ControlFlow<()>
    where
        F: FnMut(&Match, usize) -> ControlFlow<()>,
    {
        f(self, depth)?;
        for child in &self.children {
            child.walk_at(f, depth + 1)?;
        }
        ControlFlow::Continue(())
    }
}

impl Debug for Match {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Match");
        s.field("element", &self.element)
            .field("span", &(self.offset..self.offset + self.length));
        if let Some(name) = &self.name {
            s.field("name", name);
        }
        if let Some(captures) = &self.captures {
            s.field("captures", captures);
        }
        if !self.children.is_empty() {
            s.field("children", &self.children);
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: u32, offset: usize, length: usize) -> Match {
        Match::success(ElementId(id), offset, length)
    }

    #[test]
    fn walk_pre_order_with_depth() {
        let mut root = leaf(0, 0, 3);
        let mut left = leaf(1, 0, 2);
        left.children.push(leaf(2, 0, 1));
        left.children.push(leaf(3, 1, 1));
        root.children.push(left);
        root.children.push(leaf(4, 2, 1));

        let mut seen = Vec::new();
        let flow = root.walk(&mut |m, depth| {
            seen.push((m.element().0, depth));
            ControlFlow::Continue(())
        });
        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(seen, [(0, 0), (1, 1), (2, 2), (3, 2), (4, 1)]);
    }

    #[test]
    fn walk_stops_early() {
        let mut root = leaf(0, 0, 2);
        root.children.push(leaf(1, 0, 1));
        root.children.push(leaf(2, 1, 1));

        let mut seen = 0;
        let flow = root.walk(&mut |m, _| {
            seen += 1;
            if m.element() == ElementId(1) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(flow, ControlFlow::Break(()));
        assert_eq!(seen, 2, "the walk must not visit past the break");
    }

    #[test]
    fn named_child_lookup() {
        let mut root = leaf(0, 0, 2);
        root.children.push(leaf(1, 0, 1).with_name(Some("lhs".into())));
        root.children.push(leaf(2, 1, 1).with_name(Some("rhs".into())));
        assert_eq!(root.named("rhs").unwrap().element(), ElementId(2));
        assert!(root.named("op").is_none());
    }

    #[test]
    fn capture_groups() {
        let captures = TokenCaptures::new(vec![
            Some(BString::from("a=1")),
            Some(BString::from("a")),
            None,
            Some(BString::from("1")),
        ]);
        assert_eq!(captures.count(), 4);
        assert_eq!(captures.full(), "a=1");
        assert_eq!(captures.group(1).unwrap(), "a");
        assert_eq!(captures.group(2), None);
        assert_eq!(captures.group(3).unwrap(), "1");
        assert_eq!(captures.group(4), None);
    }
}
