use std::ops::ControlFlow;
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;
use tracing::debug;
use tracing::trace;

use crate::Config;
use crate::Limiter;
use crate::Reason;
use crate::cell::State;
use crate::cell::StateCell;

/// CAS attempts a spinning caller makes before giving up.
const MAX_SPIN_TRIES: usize = 5;

/// Leaky bucket limiter driven by a single "sleep debt" value.
///
/// Every admission adds `per_request` of debt and the time elapsed since the last
/// admission pays it off. Debt below zero is idle credit, capped at `max_burst`
/// requests' worth.
#[derive(Debug)]
pub struct DebtLimiter {
    state: StateCell,
    /// `period / rate` in nanoseconds.
    per_request: i64,
    /// `-max_burst * per_request` in nanoseconds.
    max_burst_debt: i64,
    clock: Clock,
    /// A fixed point in time to calculate deltas from.
    anchor: Instant,
}

impl DebtLimiter {
    /// Creates a limiter admitting `rate` requests per `period`.
    ///
    /// A `rate` of zero or less is treated as 1.
    pub fn new(rate: i64, max_burst: u32, period: Duration) -> Self {
        Self::with_clock(rate, max_burst, period, Clock::new())
    }

    pub fn with_clock(rate: i64, max_burst: u32, period: Duration, clock: Clock) -> Self {
        Self::from_config(Config::new(rate, max_burst, period), clock)
    }

    pub fn from_config(config: Config, clock: Clock) -> Self {
        let anchor = clock.now();
        Self {
            state: StateCell::new(),
            per_request: config.per_request_nanos(),
            max_burst_debt: -config.max_burst_credit_nanos(),
            clock,
            anchor,
        }
    }

    pub fn per_request(&self) -> Duration {
        nanos(self.per_request)
    }

    /// How much idle credit the limiter can bank, as a positive duration.
    pub fn max_burst_credit(&self) -> Duration {
        nanos(-self.max_burst_debt)
    }

    /// Spins for admission on the calling thread, for callers without a runtime.
    ///
    /// The thread sleeps off whatever debt the admission incurred. If that is longer
    /// than `max_spin` it sleeps for `max_spin` and reports a timeout; the slot it
    /// reserved stays consumed.
    pub fn spin_process_blocking(&self, max_spin: Duration) -> ControlFlow<Reason> {
        let interval = match self.reserve() {
            ControlFlow::Continue(interval) => interval,
            ControlFlow::Break(reason) => return ControlFlow::Break(reason),
        };

        if interval > max_spin {
            std::thread::sleep(max_spin);
            debug!(?max_spin, ?interval, "blocking admission timed out");
            return ControlFlow::Break(Reason::TimedOut);
        }
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
        ControlFlow::Continue(())
    }

    pub fn spin_take_blocking(&self, max_spin: Duration) -> bool {
        self.spin_process_blocking(max_spin).is_continue()
    }

    #[inline]
    fn now(&self) -> i64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as i64
    }

    /// Debt owed by a request arriving at `now`, never below `max_burst_debt`.
    #[inline]
    fn debt_at(&self, previous: State, now: i64) -> i64 {
        previous
            .sleep_debt
            .saturating_add(self.per_request)
            .saturating_sub(now.saturating_sub(previous.last))
            .max(self.max_burst_debt)
    }

    /// The single attempt behind `take`: one read, at most one CAS.
    fn take_from(&self, previous: Option<State>, now: i64) -> ControlFlow<Reason> {
        let next = match previous {
            None => State::first(now),
            Some(previous) => {
                let sleep_debt = self.debt_at(previous, now);
                if sleep_debt > 0 {
                    return ControlFlow::Break(Reason::Insufficient {
                        retry_after: nanos(sleep_debt),
                    });
                }
                State {
                    last: now,
                    sleep_debt,
                }
            }
        };

        if self.state.compare_and_swap(previous, next) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(Reason::Contended)
        }
    }

    /// `interleave` runs between reading a snapshot and committing it.
    #[inline]
    fn admit_interleaved(&self, mut interleave: impl FnMut()) -> ControlFlow<Reason, Duration> {
        for attempt in 1..=MAX_SPIN_TRIES {
            let previous = self.state.load();
            let now = self.now();

            let (next, interval) = match previous {
                None => (State::first(now), 0),
                Some(previous) => {
                    let candidate = self.debt_at(previous, now);
                    if candidate > 0 {
                        // Push our slot into the future and sleep until it arrives.
                        let slot = State {
                            last: now.saturating_add(candidate),
                            sleep_debt: 0,
                        };
                        (slot, candidate)
                    } else {
                        let slot = State {
                            last: now,
                            sleep_debt: candidate,
                        };
                        (slot, 0)
                    }
                }
            };

            interleave();
            if self.state.compare_and_swap(previous, next) {
                return ControlFlow::Continue(nanos(interval));
            }
            trace!(attempt, "lost limiter state race");
        }

        debug!(tries = MAX_SPIN_TRIES, "spin admission retries exhausted");
        ControlFlow::Break(Reason::RetriesExhausted)
    }
}

impl Limiter for DebtLimiter {
    #[inline]
    fn process(&self) -> ControlFlow<Reason> {
        let previous = self.state.load();
        let now = self.now();
        self.take_from(previous, now)
    }

    /// Spinning callers push their slot into the future and sleep until it arrives,
    /// instead of being refused.
    #[inline]
    fn reserve(&self) -> ControlFlow<Reason, Duration> {
        self.admit_interleaved(|| {})
    }
}

fn nanos(value: i64) -> Duration {
    Duration::from_nanos(value.max(0) as u64)
}
