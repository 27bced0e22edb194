pub mod browser;
pub mod filename;
pub mod http_client;
pub mod rate_limiter;
pub mod session_pool;
pub mod transfer;
