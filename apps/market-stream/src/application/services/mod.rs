//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `HandlerRegistry`: ordered, failure-isolated trade fan-out
//! - `CredentialCache`: get-or-fetch credential cache with expiry
//! - `MarketCoordinator`: runs one stream per asset class until shutdown

pub mod coordinator;
pub mod credentials;
pub mod handlers;

pub use coordinator::{CoordinatorError, FailurePolicy, MarketCoordinator, StartupConfig};
pub use credentials::{CredentialCache, StaticCredentialSource};
pub use handlers::{DispatchOutcome, HandlerRegistry, TradeHandler};
