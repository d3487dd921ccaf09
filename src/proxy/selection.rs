use std::collections::HashMap;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;

use super::types::IpUsage;
use crate::api::error::ApiError;

/// Source of per-IP usage counts, derived from account bindings
pub trait IpUsageSource: Send + Sync {
    fn ip_usage(&self) -> Result<Vec<IpUsage>, ApiError>;
}

/// Hands out the egress IP a newly registered account is bound to
#[async_trait]
pub trait IpAllocator: Send + Sync {
    async fn allocate_ip(&self, usage: &dyn IpUsageSource) -> Result<String, ApiError>;
}

/// Pick uniformly at random among the allocated IPs with the lowest usage.
///
/// IPs missing from `usage` count as unused; usage for IPs that are no longer
/// allocated is ignored.
pub fn pick_least_used<R: Rng + ?Sized>(
    allocated: &[String],
    usage: &[IpUsage],
    rng: &mut R,
) -> Option<String> {
    let counts: HashMap<&str, u64> = usage.iter().map(|u| (u.ip.as_str(), u.used)).collect();

    let scored: Vec<(&String, u64)> = allocated
        .iter()
        .map(|ip| (ip, counts.get(ip.as_str()).copied().unwrap_or(0)))
        .collect();

    let min = scored.iter().map(|(_, used)| *used).min()?;

    let candidates: Vec<&String> = scored
        .into_iter()
        .filter(|(_, used)| *used == min)
        .map(|(ip, _)| ip)
        .collect();

    candidates.choose(rng).map(|ip| (*ip).clone())
}
