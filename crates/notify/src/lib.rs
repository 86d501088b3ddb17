//! Alert delivery for the workload guardian.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable destination adapters
//! - Webhook, Slack, PagerDuty and email adapters
//! - Minijinja template rendering for alert messages
//! - `Dispatcher`: deduplication, alert delays, severity routing,
//!   per-destination token-bucket rate limits and channel health
//! - YAML destination definitions

pub mod config;
pub mod dispatcher;
pub mod email;
pub mod health;
pub mod pagerduty;
pub mod rate_limit;
pub mod slack;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use config::{register_destinations, DestinationConfig, DestinationKind, DestinationsFile};
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher, DispatcherConfig};
pub use health::ChannelHealth;
pub use rate_limit::{RateLimit, TokenBucket};
pub use templating::TemplateRenderer;
pub use traits::{DeliveryResult, Notifier, NotifyError};
