// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Bounds the host stack depth of composing arbitrarily many `flatMap`
//! steps (spec.md §4.2). Rather than let each `flatMap` nest one more
//! native call frame, [`Stm`] stores its `FlatMap` continuations as data
//! and [`run`] drives them from an explicit `Vec`-backed stack, the
//! "equivalent implementation" spec.md §9 names as using "an explicit
//! continuation-passing interpreter with an explicit stack" instead of a
//! catch/resume marker.

use crate::exit::TExit;
use crate::ids::TxnId;
use crate::journal::Journal;
use crate::stm::{Boxed, Node, Stm};
use log::trace;

/// Steps below this many chained `flatMap`s don't bother logging; purely
/// a `verbose`-feature diagnostic, since stack safety here comes from the
/// explicit stack, not from this counter.
const MAX_FRAMES: u64 = 200;

#[derive(Default)]
pub(crate) struct FrameCounter {
    count: u64,
}

impl FrameCounter {
    fn bump(&mut self) {
        self.count += 1;
        if self.count % MAX_FRAMES == 0 {
            trace!("trampoline: {} chained flatMap frames driven so far", self.count);
        }
    }
}

/// One interpretation step of an erased `Stm<E, _>`. Object-safe so a
/// `Stm<E, A>` for any `A` can be boxed as `dyn RunStm<E>` and stored
/// inside a `FlatMap` node without the enclosing type growing.
pub(crate) trait RunStm<E> {
    fn step(self: Box<Self>, journal: &mut Journal, txn: TxnId, frames: &mut FrameCounter) -> Step<E>;
}

pub(crate) enum Step<E> {
    Done(TExit<E, Boxed>),
    More(Box<dyn RunStm<E>>, Box<dyn FnOnce(Boxed) -> Box<dyn RunStm<E>> + Send>),
}

impl<E: Send + 'static, A: Send + 'static> RunStm<E> for Stm<E, A> {
    fn step(self: Box<Self>, journal: &mut Journal, txn: TxnId, frames: &mut FrameCounter) -> Step<E> {
        match self.node {
            Node::Succeed(a) => Step::Done(TExit::Succeed(Box::new(a))),
            Node::Fail(e) => Step::Done(TExit::Fail(e)),
            Node::Retry => Step::Done(TExit::Retry),
            Node::Die(d) => Step::Done(TExit::Die(d)),
            Node::FiberId(f) => Step::Done(TExit::Succeed(Box::new(f(txn)))),
            Node::Effect(f) => Step::Done(match f(journal, txn) {
                TExit::Succeed(a) => TExit::Succeed(Box::new(a) as Boxed),
                TExit::Fail(e) => TExit::Fail(e),
                TExit::Retry => TExit::Retry,
                TExit::Die(d) => TExit::Die(d),
            }),
            Node::FlatMap(first, k) => {
                frames.bump();
                Step::More(
                    first,
                    Box::new(move |boxed: Boxed| {
                        let next: Stm<E, A> = k(boxed);
                        Box::new(next) as Box<dyn RunStm<E>>
                    }),
                )
            }
        }
    }
}

/// Drives `stm` to completion against `journal` under transaction `txn`,
/// with *O(1)* host stack depth regardless of how many `flatMap`s were
/// chained to build it (spec.md §8 property 7).
pub(crate) fn run<E: Send + 'static, A: Send + 'static>(stm: Stm<E, A>, journal: &mut Journal, txn: TxnId) -> TExit<E, A> {
    let mut frames = FrameCounter::default();
    let mut current: Box<dyn RunStm<E>> = Box::new(stm);
    let mut stack: Vec<Box<dyn FnOnce(Boxed) -> Box<dyn RunStm<E>> + Send>> = Vec::new();

    loop {
        match current.step(journal, txn, &mut frames) {
            Step::Done(TExit::Succeed(boxed)) => match stack.pop() {
                Some(k) => current = k(boxed),
                None => return TExit::Succeed(*boxed.downcast::<A>().expect("trampoline type mismatch: run")),
            },
            // A failure or retry short-circuits the whole remaining chain:
            // pending continuations are simply dropped, matching "the
            // second effect runs only if the first succeeds" (spec.md §4.1).
            Step::Done(TExit::Fail(e)) => return TExit::Fail(e),
            Step::Done(TExit::Retry) => return TExit::Retry,
            Step::Done(TExit::Die(d)) => return TExit::Die(d),
            Step::More(next, k) => {
                stack.push(k);
                current = next;
            }
        }
    }
}
