//! Forge timing metrics

use anyhow::Result;
use prometheus::{Histogram, HistogramOpts, Registry};

/// Millisecond buckets wide enough for both a fast pack-and-sign and a
/// struggling node
const FORGE_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0];

/// Histograms over block and micro-block assembly time
pub struct MinerMetrics {
    pub forge_block_time: Histogram,
    pub forge_micro_block_time: Histogram,
}

impl MinerMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let forge_block_time = Histogram::with_opts(
            HistogramOpts::new("forge_block_time", "Time to assemble and sign a key block (ms)")
                .buckets(FORGE_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(forge_block_time.clone()))?;

        let forge_micro_block_time = Histogram::with_opts(
            HistogramOpts::new(
                "forge_microblock_time",
                "Time to assemble and sign a micro-block (ms)",
            )
            .buckets(FORGE_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(forge_micro_block_time.clone()))?;

        Ok(Self {
            forge_block_time,
            forge_micro_block_time,
        })
    }
}
