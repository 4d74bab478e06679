// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::error::Defect;

/// The outcome of one execution attempt of an [`crate::Stm`] against a
/// journal. `Succeed`/`Fail`/`Retry` are the three outcomes spec.md §3
/// describes as the data model's `TExit`. `Die` is the fourth,
/// non-recoverable kind spec.md §7 calls out separately: a host-level
/// defect that unwinds past `fold`/`foldM`/`orElse` instead of being
/// caught by them.
#[derive(Debug)]
pub enum TExit<E, A> {
    Succeed(A),
    Fail(E),
    Retry,
    Die(Defect),
}

impl<E, A> TExit<E, A> {
    pub fn is_retry(&self) -> bool {
        matches!(self, TExit::Retry)
    }
}
