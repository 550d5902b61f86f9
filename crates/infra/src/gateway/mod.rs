//! Customer-facing surface for long-running processes: polling, signed
//! download links, process tokens and request limits.

pub mod postgres;
pub mod rate_limit;
#[cfg(feature = "redis")]
pub mod redis_rate_limit;
pub mod signing;
pub mod status;
pub mod tokens;

pub use postgres::PostgresProcessTokenStore;
pub use rate_limit::{FixedWindowRateLimiter, RateLimited, RateLimiter};
#[cfg(feature = "redis")]
pub use redis_rate_limit::RedisRateLimiter;
pub use signing::{DownloadLinkError, UrlSigner};
pub use status::{
    AsyncStatusGateway, GatewayError, RequestMethod, SanitizedStatus, STATUS_ENDPOINT,
    StatusRequest,
};
pub use tokens::{
    InMemoryProcessTokenStore, ProcessToken, ProcessTokenStore, ProcessTokens,
    is_valid_process_token,
};
