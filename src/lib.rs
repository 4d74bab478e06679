// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # Composable Software Transactional Memory
//!
//! An implementation of Harris, Marlow, Peyton Jones & Herlihy's
//! *Composable Memory Transactions* (PPoPP 2005): transactional cells
//! ([`TRef`]) are read and written through a composable effect value
//! ([`Stm`]) that runs under optimistic concurrency control. Conflicting
//! attempts roll back and re-execute; a transaction that calls
//! [`Stm::retry`] suspends until one of the cells it read changes.
//!
//! ```
//! # use txstm::{atomically, Stm, TRef};
//! # use std::convert::Infallible;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let a: TRef<i64> = TRef::new(100);
//! let b: TRef<i64> = TRef::new(0);
//!
//! let (a1, b1) = (a.clone(), b.clone());
//! atomically(move || -> Stm<Infallible, ()> {
//!     let (a, b) = (a1.clone(), b1.clone());
//!     a.update(|v| v - 10).zip_right(b.update(|v| v + 10))
//! })
//! .await?;
//!
//! assert_eq!(a.read_atomic(), 90);
//! assert_eq!(b.read_atomic(), 10);
//! # Ok(())
//! # }
//! ```
//!
//! Everything this core needs beyond the algorithm itself (an executor
//! to dispatch wake-up callbacks, a `Future` to drive retries, a
//! monotonic id source) is named in [`executor`]/[`future`]/[`ids`] and
//! wired together by [`atomically`].

mod commit;
mod error;
mod executor;
mod exit;
mod future;
mod ids;
mod journal;
mod stm;
mod sync;
mod trampoline;
mod tref;

pub use error::{CommitError, Defect, TxError};
pub use future::{atomically, atomically_on, Commit};
pub use exit::TExit;
pub use ids::TxnId;
pub use stm::{
    check, collect_all, fiber_id, foreach, foreach_discard, from_either, from_try, partial, Either, Stm,
};
pub use tref::TRef;

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[tokio::test]
    async fn or_else_picks_the_alternative_on_retry() {
        let result = atomically(|| Stm::<Infallible, i32>::retry().or_else(Stm::succeed(7))).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn fallback_recovers_from_failure() {
        let result = atomically(|| Stm::<&'static str, i32>::fail("boom").fallback(42)).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn ensuring_runs_finalizer_on_failure_and_rolls_back() {
        let counter: TRef<i32> = TRef::new(0);
        let c1 = counter.clone();
        let result: Result<(), CommitError<&'static str>> = atomically(move || {
            let c = c1.clone();
            c.update(|v| v + 1)
                .ensuring(c.clone().update(|v| v + 10))
                .zip_right(Stm::fail("boom"))
        })
        .await;

        assert!(result.is_err());
        // Whole transaction rolled back: neither update was published.
        assert_eq!(counter.read_atomic(), 0);
    }

    #[tokio::test]
    async fn fail_never_publishes_a_preceding_write() {
        let cell: TRef<i32> = TRef::new(1);
        let c1 = cell.clone();
        let result: Result<(), CommitError<&'static str>> =
            atomically(move || cell.clone().set(99).zip_right(Stm::fail("x"))).await;

        assert!(result.is_err());
        assert_eq!(c1.read_atomic(), 1);
    }

    #[tokio::test]
    async fn stack_safety_over_a_hundred_thousand_flat_maps() {
        let mut program: Stm<Infallible, i64> = Stm::succeed(0);
        for _ in 0..100_000 {
            program = program.flat_map(|n| Stm::succeed(n + 1));
        }
        // A no-TRef chain never invalidates, so `atomically` calls this
        // closure exactly once; `Mutex<Option<_>>` just lets a one-shot
        // program satisfy the re-callable `Fn` the retry protocol needs.
        let slot = std::sync::Mutex::new(Some(program));
        let result = atomically(move || slot.lock().unwrap().take().expect("invoked more than once")).await;
        assert_eq!(result.unwrap(), 100_000);
    }

    #[tokio::test]
    async fn commit_runs_a_single_stm_value_directly() {
        let cell: TRef<i32> = TRef::new(1);
        let c1 = cell.clone();
        let result: Result<(), CommitError<Infallible>> = c1.update(|v| v + 1).commit().await;
        assert!(result.is_ok());
        assert_eq!(cell.read_atomic(), 2);
    }

    #[tokio::test]
    async fn done_round_trips_through_fiber_id() {
        let result = atomically(|| fiber_id::<Infallible>().flat_map(|id| Stm::done(TExit::Succeed(id)))).await;
        assert!(result.is_ok());
    }

    #[test]
    fn write_atomic_bypasses_the_journal() {
        let cell: TRef<i32> = TRef::new(0);
        cell.write_atomic(42);
        assert_eq!(cell.read_atomic(), 42);
    }
}
