//! # debt-limit
//!
//! `debt-limit` provides a lock-free, client side rate limiter that smooths bursts
//! while allowing a configurable amount of slack.
//!
//! ## Core Philosophy
//!
//! All callers share one piece of state: the time of the last admitted slot and the
//! "sleep debt" carried forward from it. That state is read, recomputed locally and
//! committed with a single Compare-And-Swap, so no caller ever observes a half
//! written update and no `Mutex` sits in the hot path.
//!
//! ## Key Concepts
//!
//! * **Debt**: each admission adds `period / rate` of debt and idle time pays it
//!   off. Positive debt means the caller is ahead of schedule.
//! * **Burst Credit**: debt may go negative, down to `-max_burst * per_request`,
//!   letting an idle client spend a short burst.
//! * **Two Access Modes**: [`Limiter::take`] makes a single attempt and never
//!   blocks. [`Limiter::spin_take`] retries the CAS a few times and sleeps off any
//!   debt it incurred, bounded by a timeout.
//!
//! ## Example
//!
//! ```rust
//! use debt_limit::DebtLimiter;
//! use debt_limit::Limiter;
//! use std::time::Duration;
//!
//! // 10 requests per second, with room for a burst of 5 after idling.
//! let limiter = DebtLimiter::new(10, 5, Duration::from_secs(1));
//!
//! if limiter.take() {
//!     // Request allowed
//! }
//! ```

use std::fmt::Debug;
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;

mod cell;
mod config;
mod debt;

pub use config::Config;
pub use debt::DebtLimiter;

/// Reasons why a request might be rejected by a limiter.
///
/// `take` and `spin_take` collapse all of these into `false`; the detailed entry
/// points ([`Limiter::process`] and [`Limiter::spin_process`]) keep them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Reason {
    /// Not enough budget: the caller is ahead of schedule by `retry_after`.
    #[error("insufficient budget; retry after {retry_after:?}")]
    Insufficient { retry_after: Duration },

    /// Another caller committed a state change between our read and our write.
    ///
    /// Single attempts do not retry, so this can happen even though budget was
    /// available when the state was read.
    #[error("lost the race to update limiter state")]
    Contended,

    /// Every spin attempt lost its race against another caller.
    #[error("limiter state retries exhausted")]
    RetriesExhausted,

    /// The spin timeout elapsed before admission completed.
    #[error("timed out waiting for admission")]
    TimedOut,
}

impl Reason {
    /// How long the caller should wait before trying again, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Reason::Insufficient { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// The interface shared by limiter implementations.
///
/// Limiters are `Send` and `Sync` so they can be shared across threads via `Arc`.
pub trait Limiter: Debug + Send + Sync {
    /// Makes a single, non-blocking admission attempt.
    ///
    /// # Errors
    ///
    /// Breaks with [`Reason::Insufficient`] when the caller must wait, or
    /// [`Reason::Contended`] when another caller won the race for the state.
    fn process(&self) -> ControlFlow<Reason>;

    /// Reserves the next slot, retrying lost races a bounded number of times.
    ///
    /// Continues with how long the caller must wait before using the slot. The
    /// reservation is committed either way, so a caller that gives up still
    /// consumes it.
    ///
    /// # Errors
    ///
    /// Breaks with [`Reason::RetriesExhausted`] if every attempt lost its race.
    fn reserve(&self) -> ControlFlow<Reason, Duration>;

    /// Returns whether the caller may proceed right now.
    fn take(&self) -> bool {
        self.process().is_continue()
    }

    /// Reserves a slot and sleeps until it arrives, giving up after `max_spin`.
    ///
    /// The reservation and the sleep that follows it form one future raced against
    /// `max_spin`. When the timer wins that future is dropped, so nothing is left
    /// running once this returns.
    ///
    /// Must be polled within a Tokio runtime with the time driver enabled.
    ///
    /// # Errors
    ///
    /// Breaks with [`Reason::RetriesExhausted`] or [`Reason::TimedOut`].
    fn spin_process(
        &self,
        max_spin: Duration,
    ) -> impl Future<Output = ControlFlow<Reason>> + Send {
        async move {
            let admission = async {
                match self.reserve() {
                    ControlFlow::Continue(interval) => {
                        if !interval.is_zero() {
                            sleep(interval).await;
                        }
                        ControlFlow::Continue(())
                    }
                    ControlFlow::Break(reason) => ControlFlow::Break(reason),
                }
            };

            match timeout(max_spin, admission).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(?max_spin, "spin admission timed out");
                    ControlFlow::Break(Reason::TimedOut)
                }
            }
        }
    }

    /// Returns whether the caller may proceed, waiting at most `max_spin`.
    fn spin_take(&self, max_spin: Duration) -> impl Future<Output = bool> + Send {
        async move { self.spin_process(max_spin).await.is_continue() }
    }
}
