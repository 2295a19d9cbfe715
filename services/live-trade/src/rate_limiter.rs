//! Per-connection inbound message limiting (token bucket)

use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;

use crate::config::RateLimitConfig;

// Safe constants for fallback values
const DEFAULT_MESSAGES_PER_SECOND: NonZeroU32 = NonZeroU32::new(20).unwrap();
const DEFAULT_BURST_SIZE: NonZeroU32 = NonZeroU32::new(40).unwrap();

/// Token bucket owned by one WebSocket connection
pub struct MessageRateLimiter {
    limiter: Option<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl MessageRateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self::unlimited();
        }

        let quota = Quota::per_second(
            NonZeroU32::new(config.messages_per_second).unwrap_or(DEFAULT_MESSAGES_PER_SECOND),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(DEFAULT_BURST_SIZE));

        Self {
            limiter: Some(GovernorRateLimiter::direct(quota)),
        }
    }

    #[must_use]
    pub const fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Take one token; `false` when the frame must be dropped
    pub fn check(&self) -> bool {
        self.limiter
            .as_ref()
            .is_none_or(|limiter| limiter.check().is_ok())
    }
}
