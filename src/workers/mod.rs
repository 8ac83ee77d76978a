pub mod polling_supervisor;
pub mod rate_limiter;

pub use polling_supervisor::{PollOutcome, PollingConfig, PollingSupervisor};
pub use rate_limiter::{GatewayRateLimiter, GatewaySlot};
