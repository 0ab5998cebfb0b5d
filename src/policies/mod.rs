//! Load balancing strategies and server-list filters.
//!
//! A strategy picks one instance out of the candidates returned by discovery
//! (after filtering). Strategies are shared across services, so any per-service
//! state is keyed by the service name carried in [`PickInfo`].

use std::{fmt::Debug, sync::Arc};

use crate::discovery::Instance;

mod factory;
mod filters;
mod latency;
mod random;
mod round_robin;
mod session_stickiness;
mod weighted_response;

pub use factory::StrategyRegistry;
pub use filters::{FilterRegistry, InstanceFilter, ZONE_AWARE, ZoneAwareFilter};
pub use latency::LatencyStats;
pub use random::RandomStrategy;
pub use round_robin::RoundRobinStrategy;
pub use session_stickiness::SessionStickinessStrategy;
pub use weighted_response::WeightedResponseStrategy;

pub const ROUND_ROBIN: &str = "RoundRobin";
pub const RANDOM: &str = "Random";
pub const SESSION_STICKINESS: &str = "SessionStickiness";
pub const WEIGHTED_RESPONSE: &str = "WeightedResponse";

/// Inputs available to a strategy besides the candidate list.
#[derive(Debug, Clone, Copy)]
pub struct PickInfo<'a> {
    pub service: &'a str,
    pub session_id: Option<&'a str>,
    pub latency: &'a LatencyStats,
}

pub trait Strategy: Send + Sync + Debug {
    /// Index into `instances` of the chosen instance.
    fn pick(&self, instances: &[Arc<Instance>], info: &PickInfo<'_>) -> Option<usize>;

    fn name(&self) -> &'static str;

    /// Called after every attempt against `instance_id`.
    fn on_request_complete(&self, _info: &PickInfo<'_>, _instance_id: &str, _success: bool) {}

    fn reset(&self) {}
}
