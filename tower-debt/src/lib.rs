//! # Tower Debt
//!
//! `tower-debt` puts the lock-free [`debt_limit::DebtLimiter`] in front of any
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! ## Modes
//!
//! - **Take** (the default): `poll_ready` makes one admission attempt and fails
//!   with [`LimitError::RateLimited`] when the caller is over the limit.
//! - **Spin** ([`RateLimitLayer::with_spin`]): `poll_ready` reserves the next slot
//!   and stays `Pending` until it arrives, failing only if the slot is further away
//!   than the spin budget.
//!
//! All services produced from one layer share one limiter, so the limit applies
//! across clones.
//!
//! ## The Managed Stack
//! [`ManagedRateLimitLayer`] boxes the service and maps every error into
//! [`LimitError`], ready for `HandleErrorLayer`.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`LimitError`], converting rejections to
//!   `429 Too Many Requests` with a JSON `message` body.

mod error;
mod layer;
mod managed_layer;
mod service;


pub use error::LimitError;
pub use error::RATE_LIMITED_MESSAGE;
pub use layer::RateLimitLayer;
pub use managed_layer::ManagedRateLimitLayer;
pub use service::Mode;
pub use service::RateLimitService;
