// Copyright (C) Thalia Archibald. All rights reserved.
//
// This file is part of parsing-elements, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

//! Indentation tracking built from procedures and conditions.
//!
//! These helpers keep a depth counter in the context's scratch slot, so they
//! cannot be combined with other users of the slot in the same grammar.

use crate::{
    grammar::{ElementId, Grammar},
    parse::Context,
};

/// The indentation depth tracked across a parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Indent {
    depth: usize,
}

impl Indent {
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

fn state<'a>(ctx: &'a mut Context<'_>) -> &'a mut Indent {
    if ctx.scratch().get::<Indent>().is_none() {
        ctx.scratch_mut().set(Indent::default());
    }
    ctx.scratch_mut()
        .get_mut()
        .expect("the indentation state was just initialized")
}

/// A procedure that enters one indentation level.
pub fn indent(g: &mut Grammar) -> ElementId {
    let element = g.procedure(|ctx| state(ctx).depth += 1);
    g.set_name(element, "indent")
}

/// A procedure that leaves one indentation level.
pub fn dedent(g: &mut Grammar) -> ElementId {
    let element = g.procedure(|ctx| {
        let indent = state(ctx);
        indent.depth = indent.depth.saturating_sub(1);
    });
    g.set_name(element, "dedent")
}

/// A condition that matches a run of tabs exactly as long as the current
/// indentation depth, consuming it.
pub fn check_indent(g: &mut Grammar) -> ElementId {
    let element = g.condition(|ctx| {
        let depth = state(ctx).depth;
        let tabs = {
            let window = ctx.input_mut().lookahead(depth + 1)?;
            window.iter().take_while(|&&b| b == b'\t').count()
        };
        if tabs == depth {
            ctx.input_mut().advance(depth as isize)?;
            Ok(true)
        } else {
            Ok(false)
        }
    });
    g.set_name(element, "check-indent")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grammar::{many, one},
        input::Input,
    };

    /// begin / one indented line per entry / end.
    fn block_grammar() -> Grammar {
        let mut g = Grammar::new();
        let begin = g.word("begin\n");
        let end = g.word("end\n");
        let name = g.token(r"[a-z]+").unwrap();
        let newline = g.word("\n");
        let enter = indent(&mut g);
        let leave = dedent(&mut g);
        let check = check_indent(&mut g);
        let line = g.rule([one(check), one(name), one(newline)]);
        let body = g.rule([
            one(begin),
            one(enter),
            many(line).named("lines"),
            one(leave),
            one(end),
        ]);
        g.set_axiom(body);
        g
    }

    #[test]
    fn indented_lines_match() {
        let mut g = block_grammar();
        let mut input = Input::from_bytes(&b"begin\n\ta\n\tb\nend\n"[..]);
        let m = g.parse_from_input(&mut input).unwrap().unwrap();
        assert_eq!(m.named("lines").unwrap().children().len(), 2);
        assert_eq!(input.offset(), 16);
    }

    #[test]
    fn missing_indentation_fails() {
        let mut g = block_grammar();
        let mut input = Input::from_bytes(&b"begin\na\nend\n"[..]);
        assert!(g.parse_from_input(&mut input).unwrap().is_none());
    }

    #[test]
    fn depth_returns_to_zero() {
        let mut g = block_grammar();
        g.prepare().unwrap();
        let mut input = Input::from_bytes(&b"begin\n\tx\nend\n"[..]);
        let mut ctx = Context::new(&g, &mut input);
        assert!(ctx.parse().unwrap().is_some());
        assert_eq!(ctx.scratch().get::<Indent>().unwrap().depth(), 0);
    }
}
