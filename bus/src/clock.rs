//! Clock module - periodic tick messages for stats and pruning

use crate::context::Context;
use crate::module::Module;
use crate::MessageBounds;
use anyhow::Result;
use async_trait::async_trait;
use config::Config;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::interval;
use tracing::info;

const DEFAULT_TICK_TOPIC: &str = "clock.tick";
const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Clock tick message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockTickMessage {
    /// Wall-clock time of this tick
    pub time: SystemTime,

    /// Tick number, starting from zero
    pub number: u64,
}

/// Clock module
/// Parameterised by the outer message enum used on the bus
pub struct Clock<M: MessageBounds + From<ClockTickMessage>> {
    _marker: PhantomData<M>,
}

impl<M: MessageBounds + From<ClockTickMessage>> Clock<M> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<M: MessageBounds + From<ClockTickMessage>> Module<M> for Clock<M> {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn description(&self) -> &'static str {
        "Periodic tick publisher"
    }

    async fn init(&self, context: Arc<Context<M>>, config: Arc<Config>) -> Result<()> {
        let topic = config.get_string("topic").unwrap_or(DEFAULT_TICK_TOPIC.to_string());
        let period = Duration::from_millis(
            config.get_int("interval-ms").unwrap_or(DEFAULT_TICK_INTERVAL_MS as i64) as u64,
        );
        info!("Publishing ticks on '{topic}' every {period:?}");

        let bus = context.message_bus.clone();
        context.run(async move {
            let mut ticker = interval(period);
            let mut number = 0u64;
            loop {
                ticker.tick().await;
                let message = ClockTickMessage {
                    time: SystemTime::now(),
                    number,
                };
                let _ = bus.publish(&topic, Arc::new(M::from(message))).await;
                number += 1;
            }
        });

        Ok(())
    }
}
