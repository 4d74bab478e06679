// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::any::Any;
use std::fmt;

/// A host-level defect raised by `die`/`dieMessage`. Unlike a typed
/// `Fail(E)`, a defect is never caught by `fold`/`foldM`/`orElse`; it
/// aborts the whole transaction without publishing any write.
pub struct Defect {
    message: String,
    payload: Box<dyn Any + Send>,
}

impl Defect {
    pub fn new(message: impl Into<String>) -> Self {
        Defect {
            message: message.into(),
            payload: Box::new(()),
        }
    }

    pub fn with_payload<T: Send + 'static>(message: impl Into<String>, payload: T) -> Self {
        Defect {
            message: message.into(),
            payload: Box::new(payload),
        }
    }

    /// Wraps a `std::panic::catch_unwind` payload directly, without the
    /// extra indirection `with_payload` would add by re-boxing an already
    /// type-erased `Box<dyn Any + Send>`.
    pub(crate) fn from_panic(message: impl Into<String>, payload: Box<dyn Any + Send>) -> Self {
        Defect {
            message: message.into(),
            payload,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn downcast_payload<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Defect").field("message", &self.message).finish()
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STM defect: {}", self.message)
    }
}

/// The outcome surfaced by [`crate::Stm::commit`] once the transaction
/// reaches a `Done` state. `Retry` never escapes this far: it is resolved
/// internally by the commit protocol's suspend/wake-up loop.
///
/// Bounded by `E: Debug` on the type itself (rather than only on the
/// `Debug` impl below) so the `thiserror`-derived `Error` impl, which
/// copies this enum's own generic bounds, can discharge `Error`'s
/// `Debug` supertrait.
#[derive(thiserror::Error)]
pub enum CommitError<E: fmt::Debug> {
    #[error("transaction failed")]
    Fail(E),

    #[error("transaction aborted with a defect: {0}")]
    Die(Defect),

    /// The task driving this commit was cancelled while suspended on retry.
    #[error("transaction cancelled")]
    Cancelled,
}

impl<E: fmt::Debug> fmt::Debug for CommitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::Fail(e) => f.debug_tuple("Fail").field(e).finish(),
            CommitError::Die(d) => f.debug_tuple("Die").field(d).finish(),
            CommitError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Internal errors of the journal/TRef machinery itself (lock contention,
/// type-erasure mismatches). These never reach a caller: they indicate a
/// bug in the core, not a legitimate transaction outcome.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("journal entry type did not match the TRef's stored type")]
    TypeMismatch,

    #[error("the global commit lock was poisoned by a panicking thread")]
    LockPoisoned,
}
