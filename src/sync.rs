// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Swaps in a deadlock-detecting mutex for the global commit lock when the
//! `no_deadlocks` feature is enabled, and falls back to `std::sync::Mutex`
//! otherwise. Mirrors the alias-swap the RLU backend used to pick between
//! `std::sync::Mutex` and `no_deadlocks::Mutex`.

#[cfg(feature = "no_deadlocks")]
pub use no_deadlocks::{Mutex, MutexGuard};

#[cfg(not(feature = "no_deadlocks"))]
pub use std::sync::{Mutex, MutexGuard};
