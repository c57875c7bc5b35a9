use rally_common::{DiscoveryError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Default heartbeat period: 5 seconds.
pub const DEFAULT_ALIVE_INTERVAL: Duration = Duration::from_secs(5);
/// Default registry-side liveness TTL: 1 minute.
pub const DEFAULT_ALIVE_TIMEOUT: Duration = Duration::from_secs(60);
/// Default reconciliation period: 1 minute.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
/// Default number of join attempts before giving up.
pub const DEFAULT_JOIN_RETRIES: u32 = 3;
/// Default delay before retrying a contended lock: 250 milliseconds.
pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(250);
/// Default length of a single lockless turn: 500 milliseconds.
pub const DEFAULT_TURN_PERIOD: Duration = Duration::from_millis(500);
/// Default upper bound for the lockless turn draw.
pub const DEFAULT_MAX_TURNS: u32 = 20;

/// Join coordination policy, picked per registry backend: backends exposing a
/// mutual-exclusion primitive use `Locking`, the rest spread join attempts
/// over randomized turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStrategy {
    Locking {
        /// Delay before retrying a join attempt after failing to take the lock.
        lock_retry_interval: Duration,
    },
    Lockless {
        /// Length of a single turn.
        turn_period: Duration,
        /// Upper bound (exclusive) for the random turn draw. The worst-case
        /// pre-attempt delay is `turn_period * max_turns`.
        max_turns: u32,
    },
}

/// Timing and retry configuration shared by all discovery strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// Period of the liveness heartbeat sent to the registry.
    pub alive_interval: Duration,

    /// Registry-side TTL after which a silent node expires. Must be greater
    /// than `alive_interval`.
    pub alive_timeout: Duration,

    /// Period of the reconciliation pass. Zero disables reconciliation.
    pub refresh_interval: Duration,

    /// Maximum number of join attempts before the failure is fatal.
    pub join_retries: u32,

    pub strategy: JoinStrategy,
}

impl DiscoverySettings {
    pub fn new(
        alive_interval: Duration,
        alive_timeout: Duration,
        refresh_interval: Duration,
        join_retries: u32,
        strategy: JoinStrategy,
    ) -> Result<Self> {
        let settings = Self {
            alive_interval,
            alive_timeout,
            refresh_interval,
            join_retries,
            strategy,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Default settings for a lock-capable backend.
    pub fn locking() -> Self {
        Self {
            alive_interval: DEFAULT_ALIVE_INTERVAL,
            alive_timeout: DEFAULT_ALIVE_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            join_retries: DEFAULT_JOIN_RETRIES,
            strategy: JoinStrategy::Locking {
                lock_retry_interval: DEFAULT_LOCK_RETRY_INTERVAL,
            },
        }
    }

    /// Default settings for a backend without a lock primitive.
    pub fn lockless() -> Self {
        Self {
            alive_interval: DEFAULT_ALIVE_INTERVAL,
            alive_timeout: DEFAULT_ALIVE_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            join_retries: DEFAULT_JOIN_RETRIES,
            strategy: JoinStrategy::Lockless {
                turn_period: DEFAULT_TURN_PERIOD,
                max_turns: DEFAULT_MAX_TURNS,
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.alive_interval.is_zero() {
            return Err(DiscoveryError::Config("alive-interval cannot be 0".into()));
        }
        if self.alive_timeout <= self.alive_interval {
            return Err(DiscoveryError::Config(
                "alive-timeout must be greater than alive-interval".into(),
            ));
        }
        match self.strategy {
            JoinStrategy::Locking { lock_retry_interval } => {
                if lock_retry_interval.is_zero() {
                    return Err(DiscoveryError::Config(
                        "lock-retry-interval cannot be 0".into(),
                    ));
                }
            }
            JoinStrategy::Lockless { max_turns, .. } => {
                if max_turns < 1 {
                    return Err(DiscoveryError::Config("max-turns must be at least 1".into()));
                }
            }
        }
        Ok(())
    }
}

/// Which strategy variant a configuration source selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Locking,
    Lockless,
}

/// Raw configuration surface, loadable with the `config` crate. Keys are
/// kebab-case (`alive-interval`, `lock-retry-interval`, ...); duration values
/// are integer milliseconds. `build` turns this into validated
/// [`DiscoverySettings`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DiscoveryConfig {
    pub alive_interval: u64,
    pub alive_timeout: u64,
    pub refresh_interval: u64,
    pub join_retries: u32,
    pub strategy: StrategyKind,
    pub lock_retry_interval: u64,
    pub turn_period: u64,
    pub max_turns: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            alive_interval: DEFAULT_ALIVE_INTERVAL.as_millis() as u64,
            alive_timeout: DEFAULT_ALIVE_TIMEOUT.as_millis() as u64,
            refresh_interval: DEFAULT_REFRESH_INTERVAL.as_millis() as u64,
            join_retries: DEFAULT_JOIN_RETRIES,
            strategy: StrategyKind::Locking,
            lock_retry_interval: DEFAULT_LOCK_RETRY_INTERVAL.as_millis() as u64,
            turn_period: DEFAULT_TURN_PERIOD.as_millis() as u64,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

impl DiscoveryConfig {
    /// Deserializes the raw surface out of an assembled `config::Config`.
    pub fn from_source(source: config::Config) -> Result<Self> {
        source
            .try_deserialize()
            .map_err(|e| DiscoveryError::Config(e.to_string()))
    }

    /// Validates and produces the typed settings.
    pub fn build(self) -> Result<DiscoverySettings> {
        let strategy = match self.strategy {
            StrategyKind::Locking => JoinStrategy::Locking {
                lock_retry_interval: Duration::from_millis(self.lock_retry_interval),
            },
            StrategyKind::Lockless => JoinStrategy::Lockless {
                turn_period: Duration::from_millis(self.turn_period),
                max_turns: self.max_turns,
            },
        };

        DiscoverySettings::new(
            Duration::from_millis(self.alive_interval),
            Duration::from_millis(self.alive_timeout),
            Duration::from_millis(self.refresh_interval),
            self.join_retries,
            strategy,
        )
    }
}
