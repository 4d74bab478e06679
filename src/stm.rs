// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The composable STM effect (spec.md §4.1). An [`Stm<E, A>`] is a value
//! describing a transactional computation, not a running computation: it
//! has no effect until interpreted by [`crate::trampoline::run`] inside
//! the commit protocol.

use crate::error::Defect;
use crate::exit::TExit;
use crate::ids::TxnId;
use crate::journal::Journal;
use crate::trampoline;
use std::any::Any;
use std::convert::Infallible;

/// A type-erased intermediate value threaded through the trampoline while
/// driving a `FlatMap` chain. Never stored in a [`crate::Journal`]; see
/// `journal::AnyClone` for that.
pub(crate) type Boxed = Box<dyn Any + Send>;

pub(crate) enum Node<E, A> {
    Succeed(A),
    Fail(E),
    Retry,
    Die(Defect),
    FiberId(Box<dyn FnOnce(TxnId) -> A + Send>),
    /// TRef primitives and `suspend` bottom out here: a direct function of
    /// the journal and the running transaction's id.
    Effect(Box<dyn FnOnce(&mut Journal, TxnId) -> TExit<E, A> + Send>),
    /// `self` then `continuation(result_of_self)`. `self` is stored behind
    /// the object-safe [`trampoline::RunStm`] trait, erasing its success
    /// type, so arbitrarily many of these can chain without the static
    /// type growing; this is what `trampoline::run` drives iteratively
    /// instead of recursively.
    FlatMap(Box<dyn trampoline::RunStm<E>>, Box<dyn FnOnce(Boxed) -> Stm<E, A> + Send>),
}

/// A suspended transactional computation. See the module docs and
/// spec.md §4.1.
pub struct Stm<E, A> {
    pub(crate) node: Node<E, A>,
}

impl<E, A> Stm<E, A> {
    pub fn succeed(value: A) -> Self {
        Stm { node: Node::Succeed(value) }
    }

    pub fn fail(error: E) -> Self {
        Stm { node: Node::Fail(error) }
    }

    pub fn retry() -> Self {
        Stm { node: Node::Retry }
    }

    /// Raises an unrecoverable defect that aborts the transaction without
    /// publishing any write, bypassing `fold`/`orElse` (spec.md §7).
    pub fn die(defect: Defect) -> Self {
        Stm { node: Node::Die(defect) }
    }

    pub fn die_message(message: impl Into<String>) -> Self {
        Self::die(Defect::new(message))
    }

    /// `done(texit)` (spec.md §4.1, §6): lifts an already-computed outcome
    /// into an `Stm`, the inverse of running one.
    pub fn done(exit: TExit<E, A>) -> Self {
        match exit {
            TExit::Succeed(a) => Stm::succeed(a),
            TExit::Fail(e) => Stm::fail(e),
            TExit::Retry => Stm::retry(),
            TExit::Die(d) => Stm::die(d),
        }
    }

    pub(crate) fn effect(f: impl FnOnce(&mut Journal, TxnId) -> TExit<E, A> + Send + 'static) -> Self
    where
        E: 'static,
        A: 'static,
    {
        Stm { node: Node::Effect(Box::new(f)) }
    }
}

/// `fiberId` (spec.md §4.1, §6): reports the identity of the running
/// transaction attempt. A free function rather than an `Stm<E, A>` method,
/// since its result type is always `TxnId` regardless of what `A` a
/// caller's surrounding expression eventually settles on.
pub fn fiber_id<E: Send + 'static>() -> Stm<E, TxnId> {
    Stm { node: Node::FiberId(Box::new(|txn| txn)) }
}

impl<E: Send + 'static, A: Send + 'static> Stm<E, A> {
    /// Lifts a thunk evaluated lazily, once, when the transaction runs.
    pub fn suspend(thunk: impl FnOnce() -> Stm<E, A> + Send + 'static) -> Stm<E, A> {
        Stm::<E, ()>::succeed(()).flat_map(move |_| thunk())
    }

    /// `flatMap` (spec.md §4.1): the second effect runs only if the first
    /// succeeds; errors and retries short-circuit. `self` is boxed as a
    /// `dyn RunStm<E>` trait object rather than recursively nested inside
    /// the new node: the trampoline drives that object-safe interface
    /// with an explicit stack instead of native recursion (spec.md §4.2).
    pub fn flat_map<B: Send + 'static>(self, k: impl FnOnce(A) -> Stm<E, B> + Send + 'static) -> Stm<E, B>
    where
        E: 'static,
    {
        Stm {
            node: Node::FlatMap(
                Box::new(self) as Box<dyn trampoline::RunStm<E>>,
                Box::new(move |boxed: Boxed| {
                    let a = *boxed.downcast::<A>().expect("trampoline type mismatch: flat_map");
                    k(a)
                }),
            ),
        }
    }

    pub fn map<B: Send + 'static>(self, f: impl FnOnce(A) -> B + Send + 'static) -> Stm<E, B> {
        self.flat_map(move |a| Stm::succeed(f(a)))
    }

    /// `mapError` (spec.md §6).
    pub fn map_error<E2: Send + 'static>(self, f: impl FnOnce(E) -> E2 + Send + 'static) -> Stm<E2, A>
    where
        A: 'static,
    {
        self.fold_m(move |e| Stm::fail(f(e)), Stm::succeed)
    }

    /// `asError` (spec.md §6): replaces any failure with a fixed error,
    /// discarding the original.
    pub fn as_error<E2: Send + 'static>(self, error: E2) -> Stm<E2, A>
    where
        A: 'static,
    {
        self.map_error(move |_| error)
    }

    /// `fallback` (spec.md §6): a lighter-weight `orElse` that recovers
    /// with a constant value instead of an alternative program.
    pub fn fallback(self, default: A) -> Stm<E, A>
    where
        E: 'static,
    {
        self.or_else(Stm::succeed(default))
    }

    /// `as(b)` (spec.md §4.1): replaces a successful result with a
    /// constant, still sequencing `self`'s effects.
    pub fn as_value<B: Send + 'static>(self, b: B) -> Stm<E, B> {
        self.map(move |_| b)
    }

    pub fn unit(self) -> Stm<E, ()> {
        self.map(|_| ())
    }

    pub fn ignore(self) -> Stm<E, ()> {
        self.fold(|_| (), |_| ())
    }

    /// `zip` (spec.md §4.1): sequential composition; `that` runs only if
    /// `self` succeeds.
    pub fn zip<B: Send + 'static>(self, that: Stm<E, B>) -> Stm<E, (A, B)> {
        self.flat_map(move |a| that.map(move |b| (a, b)))
    }

    pub fn zip_left<B: Send + 'static>(self, that: Stm<E, B>) -> Stm<E, A> {
        self.flat_map(move |a| that.map(move |_| a))
    }

    pub fn zip_right<B: Send + 'static>(self, that: Stm<E, B>) -> Stm<E, B> {
        self.flat_map(move |_| that)
    }

    pub fn zip_with<B: Send + 'static, C: Send + 'static>(
        self,
        that: Stm<E, B>,
        f: impl FnOnce(A, B) -> C + Send + 'static,
    ) -> Stm<E, C> {
        self.flat_map(move |a| that.map(move |b| f(a, b)))
    }

    /// `filter` (spec.md §4.1): retries (does not fail) when `p` is
    /// false.
    pub fn filter(self, p: impl FnOnce(&A) -> bool + Send + 'static) -> Stm<E, A> {
        self.flat_map(move |a| if p(&a) { Stm::succeed(a) } else { Stm::retry() })
    }

    /// `collect` (spec.md §4.1): `filter` generalized to a partial
    /// mapping; retries where `pf` is not defined.
    pub fn collect<B: Send + 'static>(self, pf: impl FnOnce(A) -> Option<B> + Send + 'static) -> Stm<E, B> {
        self.flat_map(move |a| match pf(a) {
            Some(b) => Stm::succeed(b),
            None => Stm::retry(),
        })
    }

    pub fn collect_m<B: Send + 'static>(self, pf: impl FnOnce(A) -> Option<Stm<E, B>> + Send + 'static) -> Stm<E, B>
    where
        E: 'static,
    {
        self.flat_map(move |a| match pf(a) {
            Some(stm) => stm,
            None => Stm::retry(),
        })
    }

    /// `either` (spec.md §4.1): never fails; surfaces the typed error as a
    /// `Result` instead.
    pub fn either(self) -> Stm<Infallible, Result<A, E>>
    where
        E: 'static,
    {
        self.fold_m(
            |e| Stm::<Infallible, Result<A, E>>::succeed(Err(e)),
            |a| Stm::<Infallible, Result<A, E>>::succeed(Ok(a)),
        )
    }

    pub fn option(self) -> Stm<Infallible, Option<A>>
    where
        E: 'static,
    {
        self.fold_m(|_| Stm::succeed(None), |a| Stm::succeed(Some(a)))
    }

    /// `fold` (spec.md §4.1): a pure version of `foldM` that cannot itself
    /// fail again (it may still retry, if `self` retries; retries are not
    /// errors and are not handled here).
    pub fn fold<B: Send + 'static>(
        self,
        on_fail: impl FnOnce(E) -> B + Send + 'static,
        on_success: impl FnOnce(A) -> B + Send + 'static,
    ) -> Stm<Infallible, B>
    where
        E: 'static,
    {
        self.fold_m(move |e| Stm::succeed(on_fail(e)), move |a| Stm::succeed(on_success(a)))
    }

    /// `foldM` (spec.md §4.1): the general catamorphism over an STM's
    /// outcome. A `Retry` from `self` is *not* intercepted here: only
    /// `orElse` treats retry as "try an alternative". This mirrors the
    /// spec's statement that recovery from `Retry` is `orElse`'s job, while
    /// `fold`/`foldM` recover from typed failure.
    pub fn fold_m<E2: Send + 'static, B: Send + 'static>(
        self,
        on_fail: impl FnOnce(E) -> Stm<E2, B> + Send + 'static,
        on_success: impl FnOnce(A) -> Stm<E2, B> + Send + 'static,
    ) -> Stm<E2, B>
    where
        E: 'static,
    {
        Stm::effect(move |journal, txn| match trampoline::run(self, journal, txn) {
            TExit::Succeed(a) => trampoline::run(on_success(a), journal, txn),
            TExit::Fail(e) => trampoline::run(on_fail(e), journal, txn),
            TExit::Retry => TExit::Retry,
            TExit::Die(d) => TExit::Die(d),
        })
    }

    /// `orElse` (spec.md §4.1): if `self` fails or retries, the journal is
    /// rolled back to the state it had before `self` ran and `that` is
    /// attempted instead. A defect from `self` is not caught; it still
    /// aborts the whole transaction.
    pub fn or_else(self, that: Stm<E, A>) -> Stm<E, A>
    where
        E: 'static,
    {
        Stm::effect(move |journal, txn| {
            let snapshot = journal.snapshot();
            match trampoline::run(self, journal, txn) {
                TExit::Succeed(a) => TExit::Succeed(a),
                TExit::Die(d) => TExit::Die(d),
                TExit::Fail(_) | TExit::Retry => {
                    journal.restore(snapshot);
                    trampoline::run(that, journal, txn)
                }
            }
        })
    }

    /// `orElseEither` (spec.md §4.1): like `orElse`, but the caller learns
    /// which side ran.
    pub fn or_else_either<B: Send + 'static>(self, that: Stm<E, B>) -> Stm<E, Either<A, B>>
    where
        E: 'static,
    {
        self.map(Either::Left).or_else(that.map(Either::Right))
    }

    /// `ensuring` (spec.md §4.1): `finalizer` runs on both the success and
    /// failure path of `self`. If the whole transaction later aborts, the
    /// finalizer's journal effects are rolled back along with everything
    /// else: it participates in the same journal, it is not run outside
    /// the transaction.
    pub fn ensuring(self, finalizer: Stm<E, ()>) -> Stm<E, A>
    where
        E: 'static,
    {
        Stm::effect(move |journal, txn| match trampoline::run(self, journal, txn) {
            TExit::Succeed(a) => match trampoline::run(finalizer, journal, txn) {
                TExit::Succeed(_) => TExit::Succeed(a),
                TExit::Fail(e) => TExit::Fail(e),
                TExit::Retry => TExit::Retry,
                TExit::Die(d) => TExit::Die(d),
            },
            TExit::Fail(e) => match trampoline::run(finalizer, journal, txn) {
                TExit::Die(d) => TExit::Die(d),
                _ => TExit::Fail(e),
            },
            TExit::Retry => match trampoline::run(finalizer, journal, txn) {
                TExit::Die(d) => TExit::Die(d),
                _ => TExit::Retry,
            },
            TExit::Die(d) => TExit::Die(d),
        })
    }
}

impl<E: Send + 'static> Stm<E, ()> {
    pub fn unit_value() -> Self {
        Stm::succeed(())
    }
}

impl<E: Send + 'static, A: Send + 'static> Stm<E, Stm<E, A>> {
    /// `flatten` (spec.md §6): collapses a doubly-nested `Stm`.
    pub fn flatten(self) -> Stm<E, A> {
        self.flat_map(|inner| inner)
    }
}

/// `check(p)` (spec.md §6): retries unless `p` holds.
pub fn check<E: Send + 'static>(p: bool) -> Stm<E, ()> {
    if p {
        Stm::succeed(())
    } else {
        Stm::retry()
    }
}

/// `partial(thunk)` (spec.md §6): runs a thunk that may panic with a
/// message, turning the panic into a defect rather than unwinding through
/// the interpreter.
pub fn partial<E: Send + 'static, A: Send + 'static>(thunk: impl FnOnce() -> A + Send + 'static) -> Stm<E, A> {
    Stm::effect(move |_journal, _txn| match std::panic::catch_unwind(std::panic::AssertUnwindSafe(thunk)) {
        Ok(value) => TExit::Succeed(value),
        Err(payload) => TExit::Die(Defect::from_panic("panic inside Stm::partial", payload)),
    })
}

/// `fromEither` (spec.md §6).
pub fn from_either<E: Send + 'static, A: Send + 'static>(result: Result<A, E>) -> Stm<E, A> {
    match result {
        Ok(a) => Stm::succeed(a),
        Err(e) => Stm::fail(e),
    }
}

/// `fromTry` (spec.md §6): any error becomes a defect, since `Stm` has no
/// ambient `E` to carry an arbitrary `std::error::Error` into.
pub fn from_try<A: Send + 'static, Err: std::error::Error + Send + 'static>(
    result: Result<A, Err>,
) -> Stm<Infallible, A> {
    match result {
        Ok(a) => Stm::succeed(a),
        Err(e) => Stm::die(Defect::new(e.to_string())),
    }
}

/// `collectAll` (spec.md §6): runs every effect in order, accumulating
/// results; already stack-safe through `flat_map`'s trampoline.
pub fn collect_all<E: Send + 'static, A: Send + 'static>(
    items: impl IntoIterator<Item = Stm<E, A>>,
) -> Stm<E, Vec<A>> {
    let mut items = items.into_iter();
    match items.next() {
        None => Stm::succeed(Vec::new()),
        Some(first) => first.flat_map(move |a| {
            collect_all(items).map(move |mut rest| {
                rest.insert(0, a);
                rest
            })
        }),
    }
}

/// `foreach` (spec.md §6).
pub fn foreach<E: Send + 'static, T: Send + 'static, A: Send + 'static>(
    items: impl IntoIterator<Item = T>,
    f: impl Fn(T) -> Stm<E, A> + Send + Sync + 'static,
) -> Stm<E, Vec<A>> {
    let f = std::sync::Arc::new(f);
    collect_all(items.into_iter().map(move |item| {
        let f = f.clone();
        Stm::suspend(move || f(item))
    }))
}

/// `foreach_` (spec.md §6): like `foreach` but discards the results.
pub fn foreach_discard<E: Send + 'static, T: Send + 'static>(
    items: impl IntoIterator<Item = T>,
    f: impl Fn(T) -> Stm<E, ()> + Send + Sync + 'static,
) -> Stm<E, ()> {
    foreach(items, f).unit()
}

/// Either of two successful branches, as returned by `orElseEither`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Either<A, B> {
    Left(A),
    Right(B),
}
