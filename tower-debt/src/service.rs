use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use debt_limit::Limiter;
use debt_limit::Reason;
use tokio::time::Sleep;
use tokio::time::sleep;
use tower::BoxError;
use tower::Service;
use tracing::debug;

use crate::error::LimitError;

/// How a service asks its limiter for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One attempt; over-limit requests are rejected immediately.
    Take,
    /// Reserve a slot and wait for it, rejecting if that would take longer than
    /// the given duration.
    Spin(Duration),
}

/// A reserved slot the service is sleeping towards.
struct Wait {
    sleep: Pin<Box<Sleep>>,
    /// The slot lies beyond the spin budget; waking means giving up.
    timed_out: bool,
}

pub struct RateLimitService<L, S> {
    inner: S,
    limiter: Arc<L>,
    mode: Mode,
    wait: Option<Wait>,
    permit_acquired: bool,
}

impl<L, S> fmt::Debug for RateLimitService<L, S>
where
    L: fmt::Debug,
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitService")
            .field("inner", &self.inner)
            .field("limiter", &self.limiter)
            .field("mode", &self.mode)
            .field("waiting", &self.wait.is_some())
            .field("permit_acquired", &self.permit_acquired)
            .finish()
    }
}

// Manually implement Clone because Pin<Box<Sleep>> cannot be cloned
impl<L, S> Clone for RateLimitService<L, S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            // We start with a fresh wait state for the new clone
            wait: None,
            permit_acquired: false,
            mode: self.mode,
        }
    }
}

impl<L, S, Req> Service<Req> for RateLimitService<L, S>
where
    L: Limiter,
    S: Service<Req, Error = BoxError>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // 1. If we are sleeping towards a reserved slot, check if we're done
        if let Some(wait) = self.wait.as_mut() {
            if wait.sleep.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            let timed_out = wait.timed_out;
            self.wait = None;
            if timed_out {
                return Poll::Ready(Err(rejected(Reason::TimedOut)));
            }
            self.permit_acquired = true;
        }

        // 2. Check inner service readiness FIRST to avoid over-consuming budget
        match self.inner.poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {}
        }

        if self.permit_acquired {
            return Poll::Ready(Ok(()));
        }

        // 3. Ask the limiter
        match self.mode {
            Mode::Take => match self.limiter.process() {
                ControlFlow::Continue(()) => {
                    self.permit_acquired = true;
                    Poll::Ready(Ok(()))
                }
                ControlFlow::Break(reason) => Poll::Ready(Err(rejected(reason))),
            },
            Mode::Spin(max_spin) => match self.limiter.reserve() {
                ControlFlow::Continue(interval) if interval.is_zero() => {
                    self.permit_acquired = true;
                    Poll::Ready(Ok(()))
                }
                ControlFlow::Continue(interval) => {
                    // Sleeping for the whole budget is how a too-distant slot
                    // loses its race against the timeout.
                    let timed_out = interval > max_spin;
                    let mut delay = Box::pin(sleep(interval.min(max_spin)));
                    if delay.as_mut().poll(cx).is_pending() {
                        self.wait = Some(Wait {
                            sleep: delay,
                            timed_out,
                        });
                        return Poll::Pending;
                    }
                    if timed_out {
                        return Poll::Ready(Err(rejected(Reason::TimedOut)));
                    }
                    self.permit_acquired = true;
                    Poll::Ready(Ok(()))
                }
                ControlFlow::Break(reason) => Poll::Ready(Err(rejected(reason))),
            },
        }
    }

    fn call(&mut self, req: Req) -> Self::Future {
        self.permit_acquired = false;
        self.inner.call(req)
    }
}

impl<L, S> RateLimitService<L, S> {
    /// Wraps `inner`, rejecting over-limit requests immediately.
    pub fn new(inner: S, limiter: Arc<L>) -> Self {
        Self {
            inner,
            limiter,
            mode: Mode::Take,
            wait: None,
            permit_acquired: false,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Wait up to `max_spin` for a slot instead of rejecting immediately.
    pub fn with_spin(self, max_spin: Duration) -> Self {
        self.with_mode(Mode::Spin(max_spin))
    }

    pub fn limiter(&self) -> &Arc<L> {
        &self.limiter
    }
}

fn rejected(reason: Reason) -> BoxError {
    debug!(%reason, "request rate limited");
    Box::new(LimitError::RateLimited { reason })
}
