//! Spindrift miner module
//! The forging core lives in `generator`; this crate root wires it to the
//! bus so mining is rescheduled whenever the local chain advances. The
//! hosting node supplies the collaborator implementations

use anyhow::Result;
use async_trait::async_trait;
use config::Config;
use spindrift_bus::{Context, Module};
use spindrift_common::messages::{HeightUpdateMessage, Message};
use std::sync::Arc;
use tracing::{error, info};

pub mod cancel;
pub mod collaborators;
pub mod generator;
pub mod metrics;
pub mod settings;

// Flattened re-exports
pub use collaborators::{
    Coordinator, History, MinerAccount, NetworkMessage, PeerChannels, PosCalculator, StateReader,
    TimeSource, UtxPool, Wallet,
};
pub use generator::{calc_offset, ForgeError, Miner, MinerDeps};
pub use settings::MinerSettings;

const DEFAULT_HEIGHT_UPDATES_TOPIC: &str = "waves.height.updates";
const DEFAULT_READINESS_TOPIC: &str = "waves.node.readiness";

/// Miner module
pub struct MinerModule {
    miner: Arc<Miner>,
}

impl MinerModule {
    pub fn new(miner: Arc<Miner>) -> Arc<Self> {
        Arc::new(Self { miner })
    }
}

#[async_trait]
impl Module<Message> for MinerModule {
    fn name(&self) -> &'static str {
        "miner"
    }

    fn description(&self) -> &'static str {
        "Block and micro-block forger"
    }

    async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        let height_topic = config
            .get_string("height-updates-topic")
            .unwrap_or(DEFAULT_HEIGHT_UPDATES_TOPIC.to_string());
        let readiness_topic = config
            .get_string("readiness-topic")
            .unwrap_or(DEFAULT_READINESS_TOPIC.to_string());
        info!("Watching heights on '{height_topic}', readiness on '{readiness_topic}'");

        // Reschedule as the chain advances, stand down on restarts
        let height_miner = self.miner.clone();
        let mut height_subscription = context.subscribe(&height_topic).await?;
        context.run(async move {
            loop {
                let Ok((_, message)) = height_subscription.read().await else {
                    error!("Height update read failed");
                    return;
                };
                match message.as_ref() {
                    Message::HeightUpdate(HeightUpdateMessage::Updated { .. }) => {
                        height_miner.schedule_mining();
                    }

                    Message::HeightUpdate(HeightUpdateMessage::RestartRequired { height }) => {
                        info!(height, "Re-sync requested, standing down");
                        height_miner.cancel_mining();
                    }

                    _ => error!("Unexpected message type: {message:?}"),
                }
            }
        });

        // Track the readiness flag chain sync maintains
        let readiness_miner = self.miner.clone();
        let mut readiness_subscription = context.subscribe(&readiness_topic).await?;
        context.run(async move {
            loop {
                let Ok((_, message)) = readiness_subscription.read().await else {
                    return;
                };
                if let Message::Readiness(readiness) = message.as_ref() {
                    readiness_miner.set_ready(readiness.ready);
                }
            }
        });

        self.miner.schedule_mining();
        Ok(())
    }
}
