// Per-user rate limiting for the chat endpoints

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

use crate::types::{AppError, AppResult};

/// Key used for requests without an authenticated user
pub const ANONYMOUS_KEY: &str = "anonymous";

/// Keyed token bucket; one bucket per user id
#[derive(Clone)]
pub struct ChatRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl ChatRateLimiter {
    pub fn per_minute(limit: u32) -> Self {
        let limit = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(limit))),
        }
    }

    pub fn check(&self, key: &str) -> AppResult<()> {
        self.limiter.check_key(&key.to_string()).map_err(|_| {
            warn!(key = %key, "Chat rate limit exceeded");
            AppError::RateLimited("Too many messages, please wait a moment and try again".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_per_key() {
        let limiter = ChatRateLimiter::per_minute(2);
        assert!(limiter.check("user-a").is_ok());
        assert!(limiter.check("user-a").is_ok());
        assert!(matches!(limiter.check("user-a"), Err(AppError::RateLimited(_))));

        assert!(limiter.check("user-b").is_ok());
        assert!(limiter.check(ANONYMOUS_KEY).is_ok());
    }

    #[test]
    fn test_zero_limit_still_admits_one() {
        let limiter = ChatRateLimiter::per_minute(0);
        assert!(limiter.check("user").is_ok());
        assert!(limiter.check("user").is_err());
    }
}
