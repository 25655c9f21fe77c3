use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use dealpilot_core::domain::agent::{AgentKind, AgentLimits};
use dealpilot_db::CounterCache;

const HOUR: Duration = Duration::from_secs(3_600);
const DAY: Duration = Duration::from_secs(86_400);

/// Key segment that follows `agent:` for admission counters.
const NAMESPACE: &str = "ratelimit";

pub fn hourly_key(kind: &AgentKind) -> String {
    format!("agent:{NAMESPACE}:{kind}:hour")
}

pub fn daily_key(kind: &AgentKind) -> String {
    format!("agent:{NAMESPACE}:{kind}:day")
}

/// Agent cache keys are `agent:{kind}:{key}`; a kind starting with the
/// counter namespace could address another kind's admission counters.
pub fn is_reserved_kind(kind: &AgentKind) -> bool {
    kind.as_str().split(':').next() == Some(NAMESPACE)
}

/// Hourly and daily admission counters per agent kind.
///
/// Windows are fixed: they start at the first admission and are not extended
/// by later ones. A counter store that cannot be reached admits the run.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CounterCache>,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn CounterCache>) -> Self {
        Self { cache }
    }

    /// Admits the run iff both counters are below their caps, counting it in both.
    pub async fn admit(&self, kind: &AgentKind, limits: &AgentLimits) -> bool {
        let hour_key = hourly_key(kind);
        match self.cache.increment_within(&hour_key, limits.rate_limit_per_hour, HOUR).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(agent_kind = %kind, window = "hour", "rate limit reached");
                return false;
            }
            Err(error) => {
                warn!(agent_kind = %kind, error = %error, "rate limit check failed, admitting");
                return true;
            }
        }

        let day_key = daily_key(kind);
        match self.cache.increment_within(&day_key, limits.rate_limit_per_day, DAY).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                debug!(agent_kind = %kind, window = "day", "rate limit reached");
                if let Err(error) = self.cache.decrement(&hour_key).await {
                    warn!(agent_kind = %kind, error = %error, "could not release hourly slot");
                }
                false
            }
            Err(error) => {
                warn!(agent_kind = %kind, error = %error, "rate limit check failed, admitting");
                true
            }
        }
    }
}
