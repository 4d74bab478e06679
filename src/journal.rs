// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Per-attempt bookkeeping: the [`Journal`] maps each [`crate::TRef`]
//! touched during one execution to an [`Entry`] snapshotting the version
//! observed at first touch and the tentative value accumulated so far.
//!
//! TRefs are generic over their payload type, but a single journal must
//! hold entries for arbitrarily many different `TRef<T>` instantiations at
//! once. We erase `T` behind the object-safe [`ErasedTRef`] trait the same
//! way the retrieved `rust-stm` crate keys its transaction log on
//! `Arc<dyn Any>` control blocks, only here the map key is the TRef's
//! stable [`TRefId`] rather than a raw pointer.

use crate::ids::TRefId;
use crate::tref::WakeCallback;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Object-safe face of a `TRef<T>` for any `T`, used so [`Journal`] and the
/// commit protocol don't need to be generic over every cell type a
/// transaction happens to touch.
pub(crate) trait ErasedTRef: Send + Sync {
    fn id(&self) -> TRefId;

    /// Lock-free snapshot of the currently installed version.
    fn current_version(&self) -> Arc<dyn Any + Send + Sync>;

    /// Installs `value` as a freshly allocated version, distinct by
    /// identity from every version that preceded it. Must only be called
    /// while holding the global commit lock.
    fn publish(&self, value: Box<dyn AnyClone>) -> Arc<dyn Any + Send + Sync>;

    /// Registers a wake-up callback for `txn` if one is not already
    /// present. Returns `true` iff an insertion happened.
    fn add_todo(&self, txn: crate::ids::TxnId, callback: WakeCallback) -> bool;

    /// Atomically swaps the todo map for an empty one and returns whatever
    /// was drained.
    fn drain_todo(&self) -> Vec<WakeCallback>;
}

/// Every value that ever lands in a journal entry came from a `TRef<T>`
/// with `T: Clone + Send + 'static`, so it can always be deep-copied for
/// an `orElse` snapshot. `AnyClone` is the small object-safe trait that
/// makes that possible without widening every signature in this module to
/// a generic `T`.
pub(crate) trait AnyClone: Any + Send {
    fn clone_boxed(&self) -> Box<dyn AnyClone>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Clone + Send> AnyClone for T {
    fn clone_boxed(&self) -> Box<dyn AnyClone> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A per-TRef record for one execution attempt.
pub(crate) struct Entry {
    pub(crate) tref: Arc<dyn ErasedTRef>,
    /// The version observed at first touch (by identity).
    pub(crate) expected: Arc<dyn Any + Send + Sync>,
    /// Tentative value after any local writes; equal to `expected`'s
    /// payload when `is_changed` is false.
    pub(crate) new_value: Box<dyn AnyClone>,
    pub(crate) is_new: bool,
    pub(crate) is_changed: bool,
}

impl Entry {
    /// `isValid` from spec.md §3: the TRef's currently installed version is
    /// identically the one this entry expected to see.
    pub(crate) fn is_valid(&self) -> bool {
        Arc::ptr_eq(&self.tref.current_version(), &self.expected)
    }

    fn deep_clone(&self) -> Entry {
        Entry {
            tref: self.tref.clone(),
            expected: self.expected.clone(),
            new_value: self.new_value.clone_boxed(),
            is_new: self.is_new,
            is_changed: self.is_changed,
        }
    }
}

/// Mapping from TRef identity to [`Entry`] for one execution attempt. Owned
/// exclusively by that attempt; never shared between concurrent attempts.
#[derive(Default)]
pub struct Journal {
    pub(crate) entries: HashMap<TRefId, Entry>,
}

/// Result of analyzing a journal in a single pass (spec.md §4.3 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Analysis {
    Invalid,
    ReadWrite,
    ReadOnly,
}

impl Journal {
    pub fn new() -> Self {
        Journal { entries: HashMap::new() }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn analyze(&self) -> Analysis {
        let mut any_changed = false;
        for entry in self.entries.values() {
            if !entry.is_valid() {
                return Analysis::Invalid;
            }
            any_changed |= entry.is_changed;
        }
        if any_changed {
            Analysis::ReadWrite
        } else {
            Analysis::ReadOnly
        }
    }

    /// Deep copy of every entry (spec.md §9: "snapshot must be a deep copy
    /// of each Entry"), used by `orElse` to preserve the pre-alternative
    /// state so it can be restored verbatim if `self` fails or retries.
    pub(crate) fn snapshot(&self) -> HashMap<TRefId, Entry> {
        self.entries.iter().map(|(id, entry)| (*id, entry.deep_clone())).collect()
    }

    pub(crate) fn restore(&mut self, snapshot: HashMap<TRefId, Entry>) {
        self.entries = snapshot;
    }
}
