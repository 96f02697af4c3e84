use std::str::FromStr;

/// Tunables for the orchestrator runtime. Everything can be overridden
/// through `DRAFTFLOW_*` environment variables.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How often the response consumer polls the response queue (in ms)
    pub response_poll_interval_ms: u64,
    /// Maximum messages claimed per poll
    pub response_batch_size: i64,
    /// How long a claimed queue message stays hidden (in seconds)
    pub visibility_timeout_secs: i64,
    /// Deliveries after which a message is parked on the dead letter shelf
    pub max_receive_count: i64,
    /// How often the outbox relay pushes recorded events to subscribers (in ms)
    pub outbox_poll_interval_ms: u64,
    /// Endpoint of the generation agent used for revision requests
    pub generation_agent_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            response_poll_interval_ms: 500,
            response_batch_size: 10,
            visibility_timeout_secs: 30,
            max_receive_count: 5,
            outbox_poll_interval_ms: 250,
            generation_agent_url: "http://127.0.0.1:8700/generate".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            response_poll_interval_ms: env_or(
                "DRAFTFLOW_RESPONSE_POLL_MS",
                defaults.response_poll_interval_ms,
            ),
            response_batch_size: env_or("DRAFTFLOW_RESPONSE_BATCH_SIZE", defaults.response_batch_size),
            visibility_timeout_secs: env_or(
                "DRAFTFLOW_VISIBILITY_TIMEOUT_SECS",
                defaults.visibility_timeout_secs,
            ),
            max_receive_count: env_or("DRAFTFLOW_MAX_RECEIVE_COUNT", defaults.max_receive_count),
            outbox_poll_interval_ms: env_or(
                "DRAFTFLOW_OUTBOX_POLL_MS",
                defaults.outbox_poll_interval_ms,
            ),
            generation_agent_url: std::env::var("DRAFTFLOW_GENERATION_AGENT_URL")
                .unwrap_or(defaults.generation_agent_url),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert!(config.response_poll_interval_ms > 0);
        assert!(config.response_batch_size > 0);
        assert!(config.max_receive_count > 1);
    }
}
