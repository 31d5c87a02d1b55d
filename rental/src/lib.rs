pub mod orchestrator;
pub mod providers;
pub mod queue;
pub mod rate_limit;
pub mod session_store;

pub use orchestrator::{OtpResult, RentalOrchestrator};
pub use providers::{
    NumberAcquisition, NumberOutcome, OtpPoll, PlatformProbe, SecondaryPlatformProvider,
    SmsProvider, Tier1Provider, Tier2Provider, Tier3Provider,
};
pub use queue::{AdmitDecision, GlobalBoundedQueue};
pub use rate_limit::{format_remaining, RateLimitDecision, RateLimiter};
pub use session_store::SessionStore;
