//! Runtime configuration for the speed-test engine

use crate::strategy::StrategyChoice;
use std::time::Duration;
use volspeed_platform::DEFAULT_HELPER_TIMEOUT;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Read strategy to use
    pub strategy: StrategyChoice,

    /// Whether the system-wide cache purge may run between phases
    pub purge_cache: bool,

    /// Upper bound on the external read helper
    pub helper_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyChoice::Auto,
            purge_cache: true,
            helper_timeout: DEFAULT_HELPER_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read strategy
    pub fn strategy(mut self, strategy: StrategyChoice) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enable or disable the system cache purge
    pub fn purge_cache(mut self, purge: bool) -> Self {
        self.purge_cache = purge;
        self
    }

    /// Set the helper timeout
    pub fn helper_timeout(mut self, timeout: Duration) -> Self {
        self.helper_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyKind;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.strategy, StrategyChoice::Auto);
        assert!(config.purge_cache);
        assert_eq!(config.helper_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .strategy(StrategyChoice::Fixed(StrategyKind::Buffered))
            .purge_cache(false)
            .helper_timeout(Duration::from_secs(30));

        assert_eq!(config.strategy, StrategyChoice::Fixed(StrategyKind::Buffered));
        assert!(!config.purge_cache);
        assert_eq!(config.helper_timeout, Duration::from_secs(30));
    }
}
