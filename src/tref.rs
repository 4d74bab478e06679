// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Transactional cells. A [`TRef<T>`] is the sole unit of observable,
//! shared, mutable state a transaction can touch; everything else about
//! an [`crate::Stm`] program is pure composition over values read from and
//! written to `TRef`s.

use crate::ids::{TRefId, TxnId};
use crate::journal::{AnyClone, Entry, ErasedTRef, Journal};
use crate::stm::Stm;
use arc_swap::ArcSwap;
use log::trace;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A zero-argument wake-up callback registered by a suspended transaction
/// on every TRef it read (spec.md §4.4).
pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

struct Inner<T> {
    id: TRefId,
    /// Lock-free atomic snapshot of the current version. Only `publish`
    /// (which runs under the global commit lock) ever installs a new one;
    /// everyone else just loads it.
    versioned: ArcSwap<T>,
    /// Per-transaction wake-up callbacks, mutated only by whole-mapping
    /// compare-and-swap (spec.md §3, §4.4).
    todo: ArcSwap<HashMap<TxnId, WakeCallback>>,
}

/// A transactional cell holding a value of type `T`.
pub struct TRef<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for TRef<T> {
    fn clone(&self) -> Self {
        TRef { inner: self.inner.clone() }
    }
}

impl<T: Clone + Send + Sync + 'static> TRef<T> {
    /// Creates a TRef outside of any transaction.
    pub fn new(value: T) -> Self {
        TRef {
            inner: Arc::new(Inner {
                id: TRefId::fresh(),
                versioned: ArcSwap::from_pointee(value),
                todo: ArcSwap::from_pointee(HashMap::new()),
            }),
        }
    }

    /// Reads the value without going through a transaction. Intended for
    /// bootstrapping and tests, never called by `commit` itself.
    pub fn read_atomic(&self) -> T {
        (**self.inner.versioned.load()).clone()
    }

    /// Writes a value without going through a transaction, installing a
    /// fresh version the same way `commit` publishes one. Bypasses the
    /// journal/validation protocol entirely, so concurrent transactional
    /// writers can race with it; intended for bootstrapping and tests,
    /// never called by `commit` itself.
    pub fn write_atomic(&self, value: T) {
        self.inner.versioned.store(Arc::new(value));
    }

    /// `TRef.make(a)` (spec.md §4.5): creates a transactional cell and, if
    /// called from inside a running transaction's journal, records it with
    /// `is_new = true` so retry registration knows it cannot have been
    /// externally modified before this attempt publishes it.
    pub fn make<E: Send + 'static>(value: T) -> Stm<E, TRef<T>> {
        Stm::effect(move |journal, _txn| {
            let tref = TRef::new(value.clone());
            tref.touch(journal, true);
            crate::exit::TExit::Succeed(tref)
        })
    }

    fn touch(&self, journal: &mut Journal, is_new: bool) {
        journal.entries.entry(self.inner.id).or_insert_with(|| {
            let version = self.inner.versioned.load_full() as Arc<dyn Any + Send + Sync>;
            let value = (*self.inner.versioned.load()).clone();
            Entry {
                tref: Arc::new(self.clone()) as Arc<dyn ErasedTRef>,
                expected: version,
                new_value: Box::new(value),
                is_new,
                is_changed: false,
            }
        });
    }

    /// `get` (spec.md §4.5): touches the cell (recording the version
    /// observed at first touch) and returns the journal's tentative value.
    pub fn get<E: Send + 'static>(&self) -> Stm<E, T> {
        let this = self.clone();
        Stm::effect(move |journal, _txn| {
            this.touch(journal, false);
            let entry = journal.entries.get(&this.inner.id).expect("just touched");
            let value = entry
                .new_value
                .as_any()
                .downcast_ref::<T>()
                .expect("journal entry type matches TRef<T>")
                .clone();
            crate::exit::TExit::Succeed(value)
        })
    }

    /// `set` (spec.md §4.5): touches the cell, replaces the tentative value
    /// and marks the entry changed.
    pub fn set<E: Send + 'static>(&self, value: T) -> Stm<E, ()> {
        let this = self.clone();
        Stm::effect(move |journal, _txn| {
            this.touch(journal, false);
            let entry = journal.entries.get_mut(&this.inner.id).expect("just touched");
            entry.new_value = Box::new(value.clone());
            entry.is_changed = true;
            crate::exit::TExit::Succeed(())
        })
    }

    /// `update` (spec.md §4.5): read-modify-write without surfacing the old
    /// value.
    pub fn update<E: Send + 'static>(&self, f: impl FnOnce(T) -> T + Send + 'static) -> Stm<E, ()> {
        let this = self.clone();
        self.get().flat_map(move |current| this.set(f(current)))
    }

    /// `modify` (spec.md §4.5): read-modify-write that also returns a
    /// derived value `B`.
    pub fn modify<E: Send + 'static, B: Send + 'static>(
        &self,
        f: impl FnOnce(T) -> (B, T) + Send + 'static,
    ) -> Stm<E, B> {
        let this = self.clone();
        self.get().flat_map(move |current| {
            let (b, next) = f(current);
            this.set(next).as_value(b)
        })
    }
}

impl<T: Clone + Send + Sync + 'static> ErasedTRef for TRef<T> {
    fn id(&self) -> TRefId {
        self.inner.id
    }

    fn current_version(&self) -> Arc<dyn Any + Send + Sync> {
        self.inner.versioned.load_full() as Arc<dyn Any + Send + Sync>
    }

    fn publish(&self, value: Box<dyn AnyClone>) -> Arc<dyn Any + Send + Sync> {
        let value: Box<T> = value
            .as_any()
            .downcast_ref::<T>()
            .expect("journal entry type matches TRef<T>")
            .clone()
            .into();
        self.inner.versioned.store(Arc::from(value));
        self.inner.versioned.load_full() as Arc<dyn Any + Send + Sync>
    }

    fn add_todo(&self, txn: TxnId, callback: WakeCallback) -> bool {
        let mut inserted = false;
        self.inner.todo.rcu(|current| {
            if current.contains_key(&txn) {
                inserted = false;
                current.clone()
            } else {
                inserted = true;
                let mut next = (**current).clone();
                next.insert(txn, callback.clone());
                Arc::new(next)
            }
        });
        if inserted {
            trace!("TRef({:?}): registered wake-up for txn {:?}", self.inner.id, txn);
        }
        inserted
    }

    fn drain_todo(&self) -> Vec<WakeCallback> {
        let drained = self.inner.todo.swap(Arc::new(HashMap::new()));
        drained.values().cloned().collect()
    }
}
