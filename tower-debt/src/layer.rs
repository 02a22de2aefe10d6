use std::sync::Arc;
use std::time::Duration;

use debt_limit::Config;
use debt_limit::DebtLimiter;
use debt_limit::Limiter;
use tower::Layer;

use crate::service::Mode;
use crate::service::RateLimitService;

/// Applies Rate Limit to requests.
#[derive(Debug)]
pub struct RateLimitLayer<L> {
    limiter: Arc<L>,
    mode: Mode,
}

impl<L> Clone for RateLimitLayer<L> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            mode: self.mode,
        }
    }
}

impl RateLimitLayer<DebtLimiter> {
    /// Create a RateLimitLayer with its own limiter admitting `rate` requests per
    /// `period`.
    ///
    /// A `rate` of zero is treated as 1.
    pub fn from_params(rate: i64, max_burst: u32, period: Duration) -> Self {
        Self::from_config(Config::new(rate, max_burst, period))
    }

    pub fn from_config(config: Config) -> Self {
        Self::new(Arc::new(config.build()))
    }
}

impl<L> RateLimitLayer<L>
where
    L: Limiter,
{
    /// Create a RateLimitLayer that rejects over-limit requests immediately.
    ///
    /// Every service produced by this layer shares `limiter`.
    pub fn new(limiter: Arc<L>) -> Self {
        RateLimitLayer {
            limiter,
            mode: Mode::Take,
        }
    }

    /// Wait for capacity instead of failing immediately.
    ///
    /// Requests whose slot is further away than `max_spin` fail with
    /// `LimitError::RateLimited` once `max_spin` has elapsed.
    pub fn with_spin(self, max_spin: Duration) -> Self {
        self.with_mode(Mode::Spin(max_spin))
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn limiter(&self) -> &Arc<L> {
        &self.limiter
    }
}

impl<L, S> Layer<S> for RateLimitLayer<L> {
    type Service = RateLimitService<L, S>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService::new(service, self.limiter.clone()).with_mode(self.mode)
    }
}
