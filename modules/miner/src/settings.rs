//! Miner configuration

use config::Config;
use std::time::Duration;

const DEFAULT_QUORUM: u32 = 1;
const DEFAULT_GENERATION_ALLOWED_AFTER_MS: u64 = 24 * 60 * 60 * 1000;
const DEFAULT_MINIMAL_OFFSET_MS: u64 = 200;
const DEFAULT_MAX_TRANSACTIONS_IN_KEY_BLOCK: usize = 100;
const DEFAULT_MICRO_BLOCK_INTERVAL_MS: u64 = 5000;
const DEFAULT_ENABLE_MICROBLOCKS_AFTER_HEIGHT: u32 = 0;
const DEFAULT_AVERAGE_BLOCK_DELAY_MS: u64 = 60_000;

/// Tunables of the forging scheduler
#[derive(Debug, Clone)]
pub struct MinerSettings {
    /// Minimum connected peers before the node forges at all
    pub quorum: u32,

    /// Staleness cutoff: past genesis, forging is allowed only this soon
    /// after the last block
    pub interval_after_last_block_then_generation_is_allowed: Duration,

    /// Floor on the scheduling delay of a forge attempt
    pub minimal_block_generation_offset: Duration,

    /// UTX pack limit for key blocks
    pub max_transactions_in_key_block: usize,

    /// Cadence of micro-block attempts
    pub micro_block_interval: Duration,

    /// NG activation threshold
    pub enable_microblocks_after_height: u32,

    /// Consensus parameter for base-target calculation
    pub average_block_delay: Duration,
}

impl MinerSettings {
    pub fn from_config(config: &Config) -> Self {
        let ms = |key: &str, fallback: u64| {
            Duration::from_millis(config.get_int(key).map(|v| v as u64).unwrap_or(fallback))
        };

        Self {
            quorum: config.get_int("quorum").map(|v| v as u32).unwrap_or(DEFAULT_QUORUM),
            interval_after_last_block_then_generation_is_allowed: ms(
                "interval-after-last-block-then-generation-is-allowed",
                DEFAULT_GENERATION_ALLOWED_AFTER_MS,
            ),
            minimal_block_generation_offset: ms(
                "minimal-block-generation-offset",
                DEFAULT_MINIMAL_OFFSET_MS,
            ),
            max_transactions_in_key_block: config
                .get_int("max-transactions-in-key-block")
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_MAX_TRANSACTIONS_IN_KEY_BLOCK),
            micro_block_interval: ms("micro-block-interval", DEFAULT_MICRO_BLOCK_INTERVAL_MS),
            enable_microblocks_after_height: config
                .get_int("enable-microblocks-after-height")
                .map(|v| v as u32)
                .unwrap_or(DEFAULT_ENABLE_MICROBLOCKS_AFTER_HEIGHT),
            average_block_delay: ms("average-block-delay", DEFAULT_AVERAGE_BLOCK_DELAY_MS),
        }
    }
}

impl Default for MinerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
