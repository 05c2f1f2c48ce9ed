use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// How long a requester waits for a real partner before the fallback
    /// coin-flip.
    pub match_wait: Duration,
    /// Extra grace period after a lost coin-flip before synthesis is
    /// forced.
    pub synthetic_extra_wait: Duration,
    /// Probability of synthesizing immediately when the first wait
    /// expires.
    pub synthetic_match_probability: f64,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let match_wait = env::var("MATCH_WAIT_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.match_wait);
        let synthetic_extra_wait = env::var("SYNTHETIC_EXTRA_WAIT_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.synthetic_extra_wait);
        let synthetic_match_probability = env::var("SYNTHETIC_MATCH_PROBABILITY")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| p.clamp(0.0, 1.0))
            .unwrap_or(defaults.synthetic_match_probability);

        Self {
            port: env::var("RONDO_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            match_wait,
            synthetic_extra_wait,
            synthetic_match_probability,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: "redis://localhost:6379".to_string(),
            match_wait: Duration::from_secs(5),
            synthetic_extra_wait: Duration::from_secs(5),
            synthetic_match_probability: 0.8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_behavior() {
        let config = Config::default();
        assert_eq!(config.match_wait, Duration::from_secs(5));
        assert_eq!(config.synthetic_extra_wait, Duration::from_secs(5));
        assert!((config.synthetic_match_probability - 0.8).abs() < f64::EPSILON);
    }
}
