use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use debt_limit::Limiter;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::LimitError;
use crate::RateLimitService;
use crate::service::Mode;

/// A boxed, cloneable rate limiting stack with a single error domain.
///
/// Every error leaving the stack is a [`LimitError`]: rejections from the limiter
/// pass through untouched and anything raised by the inner service is wrapped in
/// `LimitError::Inner`. That makes it a drop-in partner for
/// `axum::error_handling::HandleErrorLayer`.
pub struct ManagedRateLimitLayer<L, Req> {
    limiter: Arc<L>,
    mode: Mode,
    _phantom: PhantomData<fn(Req)>,
}

// Note: Deriving Clone causes issues when using the layer with Axum.
// We'll just implemented it explicitly.
impl<L, Req> Clone for ManagedRateLimitLayer<L, Req> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            mode: self.mode,
            _phantom: PhantomData,
        }
    }
}

impl<S, L, Req> Layer<S> for ManagedRateLimitLayer<L, Req>
where
    L: Limiter + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let rl = RateLimitService::new(inner, self.limiter.clone()).with_mode(self.mode);

        let mapped_svc = tower::util::MapErr::new(rl, |err: BoxError| {
            if err.is::<LimitError>() {
                err
            } else {
                // Wrap any other inner service errors
                BoxError::from(LimitError::Inner(err.to_string()))
            }
        });

        BoxCloneSyncService::new(mapped_svc)
    }
}

impl<L: Limiter, Req> ManagedRateLimitLayer<L, Req> {
    /// Rejects over-limit requests immediately.
    pub fn new(limiter: Arc<L>) -> Self {
        Self {
            limiter,
            mode: Mode::Take,
            _phantom: PhantomData,
        }
    }

    /// Waits up to `max_spin` for a slot before rejecting.
    pub fn spinning(limiter: Arc<L>, max_spin: Duration) -> Self {
        Self {
            limiter,
            mode: Mode::Spin(max_spin),
            _phantom: PhantomData,
        }
    }
}
