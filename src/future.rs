// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Wires the commit protocol into `std::future::Future` (spec.md §4.6 /
//! SPEC_FULL.md §4.6), the crate's realization of spec.md §6's abstract
//! "Task primitive". Every poll drives one [`commit::try_commit`] pass;
//! a `Retry` outcome registers wake-up callbacks on every TRef touched
//! and parks behind a `futures::task::AtomicWaker` until one of them
//! fires, exactly as the teacher's stubbed front door planned to build
//! its async surface on `futures`.

use crate::commit::{self, Outcome};
use crate::error::CommitError;
use crate::ids::{TRefId, TxnId};
use crate::journal::Journal;
use crate::stm::Stm;
use crate::tref::WakeCallback;
use futures::task::AtomicWaker;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use threadpool::ThreadPool;

/// A running (or suspended) transaction, obtained from [`crate::atomically`]
/// or [`crate::atomically_on`]. Resolves to the transaction's result once
/// a commit succeeds, or to a [`CommitError`] on typed failure, defect, or
/// cancellation.
pub struct Commit<E, A> {
    program: Arc<dyn Fn() -> Stm<E, A> + Send + Sync>,
    txn: TxnId,
    journal: Journal,
    waker: Arc<AtomicWaker>,
    executor: Arc<ThreadPool>,
    /// Set once this transaction resolves or is dropped before resolving
    /// (spec.md §4.4/§5): a one-shot flag that only ever transitions on
    /// completion or cancellation, never on an individual callback firing.
    done: Arc<AtomicBool>,
    /// The single wake-up callback registered on every TRef this
    /// transaction reads, reused across every suspend episode of this
    /// `Commit`'s lifetime rather than allocated fresh per episode
    /// (spec.md §4.4 registers `todo` entries keyed by the stable `txn`
    /// id, so a spent per-episode callback left on a TRef that some other
    /// writer's commit didn't happen to drain would block a fresh
    /// callback from ever being installed there; see
    /// `retry_then_wake_survives_two_suspend_episodes` in
    /// `tests/commit.rs`).
    callback: WakeCallback,
}

impl<E, A> Commit<E, A> {
    pub(crate) fn new(program: Arc<dyn Fn() -> Stm<E, A> + Send + Sync>, executor: Arc<ThreadPool>) -> Self {
        let waker = Arc::new(AtomicWaker::new());
        let done = Arc::new(AtomicBool::new(false));
        let callback = wake_callback(&waker, &done);
        Commit {
            program,
            txn: TxnId::fresh(),
            journal: Journal::new(),
            waker,
            executor,
            done,
            callback,
        }
    }
}

impl<E: std::fmt::Debug + Send + 'static, A: Send + 'static> Future for Commit<E, A> {
    type Output = Result<A, CommitError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.done.load(Ordering::Acquire) {
            return Poll::Ready(Err(CommitError::Cancelled));
        }

        // Each suspend episode starts with an empty accumulator: entries
        // registered during a previous wake-up were already cleared by
        // that wake-up's `collectTodos` swap-to-empty (spec.md §4.4).
        let mut registered: HashSet<TRefId> = HashSet::new();

        loop {
            match commit::try_commit(this.program.as_ref(), &mut this.journal, this.txn) {
                Outcome::Done(exit) => {
                    commit::complete_todos(&this.journal, &this.executor);
                    this.done.store(true, Ordering::Release);
                    return Poll::Ready(commit::to_result(exit));
                }
                Outcome::Suspend => {
                    this.waker.register(cx.waker());
                    register_todos(&this.journal, this.txn, &mut registered, &this.callback);

                    if this.journal.analyze() == crate::journal::Analysis::Invalid {
                        // A writer raced in between retry and registration
                        // (spec.md §4.4 "Race discipline"): don't sleep,
                        // commit again immediately, keeping the accumulator.
                        continue;
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

impl<E, A> Drop for Commit<E, A> {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Release);
    }
}

/// `addTodo` applied to every not-yet-registered, not-newly-created entry
/// in `journal` (spec.md §4.4 step 1; `isNew` entries are skipped because
/// a TRef created in this attempt cannot have been externally modified
/// before this attempt publishes it).
fn register_todos(journal: &Journal, txn: TxnId, registered: &mut HashSet<TRefId>, callback: &WakeCallback) {
    for (id, entry) in journal.entries.iter() {
        if entry.is_new || registered.contains(id) {
            continue;
        }
        entry.tref.add_todo(txn, callback.clone());
        registered.insert(*id);
    }
}

/// The one wake-up callback shared across this transaction's whole
/// lifetime (spec.md §4.4: "a one-shot `done` flag ... is set under a
/// per-txn monitor, and the callback is a no-op if `done` is already
/// set. Cancellation by the caller sets `done` without completing"). The
/// callback itself stays live and re-armable across any number of
/// suspend episodes; only `done` transitioning to true (on commit or on
/// drop) ever silences it for good.
fn wake_callback(waker: &Arc<AtomicWaker>, done: &Arc<AtomicBool>) -> WakeCallback {
    let waker = waker.clone();
    let done = done.clone();
    Arc::new(move || {
        if done.load(Ordering::Acquire) {
            return;
        }
        waker.wake();
    })
}

impl<E: Send + 'static, A: Send + 'static> Stm<E, A> {
    /// `commit` (spec.md §6): the instance-method form of [`atomically`].
    /// `atomically` takes a re-invocable `Fn() -> Stm<E, A>` because a
    /// conflict or a `retry` must re-run the program against a fresh
    /// journal; `self` is a single, already-constructed `Stm`, so it backs
    /// only the first attempt. Wrapped in a one-shot slot the same way a
    /// hand-written caller would reuse a `Mutex<Option<Stm<_>>>`: if the
    /// transaction commits, fails, or dies on that first attempt, this
    /// behaves exactly like `atomically`; if it instead needs a second
    /// attempt (lost the validation race, or suspended on `retry`), the
    /// commit surfaces as a defect rather than silently reusing stale
    /// state or panicking the calling thread.
    pub fn commit(self) -> Commit<E, A> {
        let slot = std::sync::Mutex::new(Some(self));
        atomically(move || match slot.lock().unwrap_or_else(|p| p.into_inner()).take() {
            Some(stm) => stm,
            None => Stm::die_message(
                "Stm::commit only supports a single attempt; this transaction needed to retry \
                 after a conflict or a `retry()`, use atomically(|| ...) instead",
            ),
        })
    }
}

/// `atomically(program)` (spec.md §6): the sole commit entry point.
/// `program` is `Fn`, not `FnOnce`, because conflicts and `retry` both
/// require constructing an unconsumed `Stm` afresh for every attempt,
/// see `commit::try_commit`'s doc comment. Runs on the crate's default
/// worker pool; use [`atomically_on`] to supply your own.
pub fn atomically<E, A>(program: impl Fn() -> Stm<E, A> + Send + Sync + 'static) -> Commit<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    atomically_on(program, crate::executor::default_pool())
}

/// As [`atomically`], dispatching drained wake-up callbacks to `executor`
/// instead of the process-wide default pool.
pub fn atomically_on<E, A>(program: impl Fn() -> Stm<E, A> + Send + Sync + 'static, executor: Arc<ThreadPool>) -> Commit<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    Commit::new(Arc::new(program), executor)
}
