// Middleware for authentication, CORS, rate limiting

pub mod auth;
pub mod cors;
pub mod rate_limiter;

pub use auth::{issue_token, verify_token, AdminUser, AuthUser, Claims};
pub use cors::cors_layer;
pub use rate_limiter::{ChatRateLimiter, ANONYMOUS_KEY};
