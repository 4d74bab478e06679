// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The commit protocol (spec.md §4.3): run an [`Stm`] against a fresh
//! journal, validate, and under the global lock either publish every
//! write or loop. This module owns the only lock in the crate.

use crate::error::CommitError;
use crate::exit::TExit;
use crate::ids::TxnId;
use crate::journal::{Analysis, Journal};
use crate::stm::Stm;
use crate::sync::Mutex;
use crate::trampoline;
use lazy_static::lazy_static;
use log::trace;
use threadpool::ThreadPool;

lazy_static! {
    /// Held only for the write-commit critical section and the read-only
    /// final validation (spec.md §4.3's "Global lock discipline"), never
    /// across a journal run or a wake-up callback.
    static ref GLOBAL_LOCK: Mutex<()> = Mutex::new(());
}

/// What one call to [`try_commit`] settled on. `Suspend` corresponds to
/// spec.md §4.3 step 5's `Retry` branch; the journal that produced it is
/// left in `journal` for the caller to use during wake-up registration.
pub(crate) enum Outcome<E, A> {
    Done(TExit<E, A>),
    Suspend,
}

/// `tryCommit` (spec.md §4.3). `program` is invoked once per attempt
/// rather than the transaction being a single reusable `Stm` value:
/// Rust's `Effect` closures are `FnOnce`, consumed by the first run, so a
/// fresh `Stm` must be constructed for every retry. This is the one place
/// the Rust rendition's ownership model forces a shape spec.md leaves
/// implicit, recorded in DESIGN.md.
pub(crate) fn try_commit<E, A>(program: &(dyn Fn() -> Stm<E, A> + Send + Sync), journal: &mut Journal, txn: TxnId) -> Outcome<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    loop {
        journal.clear();
        let exit = trampoline::run(program(), journal, txn);
        let analysis = journal.analyze();
        if analysis == Analysis::Invalid {
            trace!("txn {:?}: journal invalidated mid-run, re-executing", txn);
            continue;
        }
        match exit {
            TExit::Succeed(a) => {
                let committed = match analysis {
                    Analysis::ReadWrite => publish_if_valid(journal),
                    Analysis::ReadOnly => revalidate(journal),
                    Analysis::Invalid => unreachable!("filtered above"),
                };
                if committed {
                    return Outcome::Done(TExit::Succeed(a));
                }
                trace!("txn {:?}: lost the validation race, re-executing", txn);
            }
            TExit::Fail(e) => return Outcome::Done(TExit::Fail(e)),
            TExit::Retry => return Outcome::Suspend,
            TExit::Die(d) => return Outcome::Done(TExit::Die(d)),
        }
    }
}

/// Re-validates under the global lock and, if every entry is still
/// valid, installs a fresh version for each changed one. Returns whether
/// publication happened.
fn publish_if_valid(journal: &mut Journal) -> bool {
    let _guard = GLOBAL_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if journal.analyze() == Analysis::Invalid {
        return false;
    }
    for entry in journal.entries.values() {
        if entry.is_changed {
            entry.tref.publish(entry.new_value.clone_boxed());
        }
    }
    true
}

fn revalidate(journal: &Journal) -> bool {
    let _guard = GLOBAL_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    journal.analyze() != Analysis::Invalid
}

/// `completeTodos` (spec.md §4.3 step 6, §4.4): drains every TRef that
/// participated in this transaction and hands its wake-up callbacks to
/// `executor` rather than running them inline, bounding the commit
/// critical section to O(#entries) (spec.md §4.3's lock discipline).
pub(crate) fn complete_todos(journal: &Journal, executor: &ThreadPool) {
    for entry in journal.entries.values() {
        for callback in entry.tref.drain_todo() {
            executor.execute(move || callback());
        }
    }
}

pub(crate) fn to_result<E: std::fmt::Debug, A>(exit: TExit<E, A>) -> Result<A, CommitError<E>> {
    match exit {
        TExit::Succeed(a) => Ok(a),
        TExit::Fail(e) => Err(CommitError::Fail(e)),
        TExit::Die(d) => Err(CommitError::Die(d)),
        TExit::Retry => unreachable!("try_commit resolves Retry internally before returning Done"),
    }
}
