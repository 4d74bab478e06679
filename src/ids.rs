// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use lazy_static::lazy_static;
use std::sync::atomic::{AtomicU64, Ordering};

lazy_static! {
    static ref TREF_IDS: AtomicU64 = AtomicU64::new(0);
    static ref TXN_IDS: AtomicU64 = AtomicU64::new(0);
}

/// Stable identity of a [`crate::TRef`], used as a journal key. Cheap to
/// copy, never reused even after the owning cell is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TRefId(u64);

impl TRefId {
    pub(crate) fn fresh() -> Self {
        TRefId(TREF_IDS.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of a single logical transaction attempt chain. Doubles as the
/// `fiberId` reported by [`crate::fiber_id`] and as the key a suspended
/// transaction registers itself under in a [`crate::TRef`]'s `todo` map.
/// Stable across every retry of the same logical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(u64);

impl TxnId {
    pub(crate) fn fresh() -> Self {
        TxnId(TXN_IDS.fetch_add(1, Ordering::Relaxed))
    }
}
