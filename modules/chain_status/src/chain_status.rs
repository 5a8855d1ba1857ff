//! Spindrift chain status module
//! Consumes the upstream chain event stream and maintains the authoritative
//! local view across appends, rollbacks, sync failures and micro-block
//! resolution, publishing balance deltas and height updates as it goes

use anyhow::Result;
use async_trait::async_trait;
use config::Config;
use spindrift_bus::{Context, Module};
use spindrift_common::messages::{
    BalanceRequestMessage, BalanceUpdatesMessage, ChainEventMessage, HeightUpdateMessage,
    Message, ReadinessMessage,
};
use spindrift_common::BlockchainBalance;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};

pub mod status;
pub mod transitions;
use status::{LastBlockHeight, Status, StatusUpdate};

const DEFAULT_SUBSCRIBE_TOPIC: &str = "waves.chain.events";
const DEFAULT_BALANCE_UPDATES_TOPIC: &str = "waves.balance.updates";
const DEFAULT_HEIGHT_UPDATES_TOPIC: &str = "waves.height.updates";
const DEFAULT_BALANCE_REQUEST_TOPIC: &str = "waves.balance.requests";
const DEFAULT_READINESS_TOPIC: &str = "waves.node.readiness";
const DEFAULT_CLOCK_TOPIC: &str = "clock.tick";

/// How long TransientResolving may wait for authoritative balances before
/// the tracker gives up and asks the supervisor to re-sync
const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 60_000;

/// The tracker state behind the module
struct Tracker {
    status: Status,

    /// When the current TransientResolving started, if it did
    resolving_since: Option<Instant>,

    /// Events processed, for the stats tick
    events_handled: u64,
}

impl Tracker {
    fn new() -> Self {
        Self {
            status: Status::default(),
            resolving_since: None,
            events_handled: 0,
        }
    }

    /// Run one event through the transition function
    fn handle(&mut self, event: &ChainEventMessage) -> StatusUpdate {
        let status = std::mem::take(&mut self.status);
        let update = transitions::apply(status, event);
        self.status = update.new_status.clone();
        self.events_handled += 1;

        self.resolving_since = match self.status {
            Status::TransientResolving { .. } => self.resolving_since.or(Some(Instant::now())),
            _ => None,
        };

        update
    }

    /// Give up on a resolve that never received its balances: report a
    /// restart and fall back to rebuilding from the current fork
    fn force_restart(&mut self) -> Option<StatusUpdate> {
        let (main_fork, stash, current_height_hint) = match std::mem::take(&mut self.status) {
            Status::TransientResolving {
                main_fork,
                stash,
                current_height_hint,
            } => (main_fork, stash, current_height_hint),

            other => {
                self.status = other;
                return None;
            }
        };

        warn!(
            stashed = stash.len(),
            height = current_height_hint,
            "No balances received while resolving, requesting re-sync"
        );

        let previous_fork_diff_index = main_fork.diff_index();
        let update = StatusUpdate {
            updated_last_block_height: LastBlockHeight::RestartRequired(current_height_hint),
            ..StatusUpdate::status_only(Status::TransientRollback {
                new_fork: main_fork,
                new_fork_changes: BlockchainBalance::new(),
                previous_fork_height: current_height_hint,
                previous_fork_diff_index,
            })
        };
        self.status = update.new_status.clone();
        self.resolving_since = None;
        Some(update)
    }
}

/// Where the module publishes each kind of emission
struct Topics {
    balance_updates: String,
    height_updates: String,
    balance_requests: String,
    readiness: String,
}

impl Topics {
    /// Publish everything a status update tells the outside world
    async fn publish(&self, context: &Arc<Context<Message>>, update: &StatusUpdate) {
        if !update.updated_balances.is_empty() {
            let message = Message::BalanceUpdates(BalanceUpdatesMessage {
                updated: update.updated_balances.clone(),
            });
            context
                .message_bus
                .publish(&self.balance_updates, Arc::new(message))
                .await
                .unwrap_or_else(|e| error!("Failed to publish balance updates: {e}"));
        }

        if !update.requested_balances.is_empty() {
            let message = Message::BalanceRequest(BalanceRequestMessage {
                index: update.requested_balances.clone(),
            });
            context
                .message_bus
                .publish(&self.balance_requests, Arc::new(message))
                .await
                .unwrap_or_else(|e| error!("Failed to publish balance request: {e}"));
        }

        let (height_message, ready) = match update.updated_last_block_height {
            LastBlockHeight::NotChanged => return,
            LastBlockHeight::Updated(height) => (HeightUpdateMessage::Updated { height }, true),
            LastBlockHeight::RestartRequired(height) => {
                (HeightUpdateMessage::RestartRequired { height }, false)
            }
        };

        context
            .message_bus
            .publish(&self.height_updates, Arc::new(Message::HeightUpdate(height_message)))
            .await
            .unwrap_or_else(|e| error!("Failed to publish height update: {e}"));

        context
            .message_bus
            .publish(
                &self.readiness,
                Arc::new(Message::Readiness(ReadinessMessage { ready })),
            )
            .await
            .unwrap_or_else(|e| error!("Failed to publish readiness: {e}"));
    }
}

/// Chain status module
#[derive(Default)]
pub struct ChainStatus;

impl ChainStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Module<Message> for ChainStatus {
    fn name(&self) -> &'static str {
        "chain-status"
    }

    fn description(&self) -> &'static str {
        "Blockchain status tracker"
    }

    async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        let subscribe_topic = config
            .get_string("subscribe-topic")
            .unwrap_or(DEFAULT_SUBSCRIBE_TOPIC.to_string());
        info!("Creating chain event subscriber on '{subscribe_topic}'");

        let topics = Arc::new(Topics {
            balance_updates: config
                .get_string("balance-updates-topic")
                .unwrap_or(DEFAULT_BALANCE_UPDATES_TOPIC.to_string()),
            height_updates: config
                .get_string("height-updates-topic")
                .unwrap_or(DEFAULT_HEIGHT_UPDATES_TOPIC.to_string()),
            balance_requests: config
                .get_string("balance-request-topic")
                .unwrap_or(DEFAULT_BALANCE_REQUEST_TOPIC.to_string()),
            readiness: config
                .get_string("readiness-topic")
                .unwrap_or(DEFAULT_READINESS_TOPIC.to_string()),
        });
        info!(
            "Publishing balances on '{}', heights on '{}'",
            topics.balance_updates, topics.height_updates
        );

        let resolve_timeout = Duration::from_millis(
            config.get_int("resolve-timeout").unwrap_or(DEFAULT_RESOLVE_TIMEOUT_MS as i64) as u64,
        );

        let tracker = Arc::new(Mutex::new(Tracker::new()));

        // Chain event loop
        let event_tracker = tracker.clone();
        let event_topics = topics.clone();
        let event_context = context.clone();
        let mut subscription = context.subscribe(&subscribe_topic).await?;
        context.run(async move {
            loop {
                let Ok((_, message)) = subscription.read().await else {
                    error!("Chain event read failed");
                    return;
                };
                match message.as_ref() {
                    Message::Chain(event) => {
                        let span = info_span!("chain_status.handle");
                        async {
                            let update = event_tracker.lock().await.handle(event);
                            event_topics.publish(&event_context, &update).await;
                        }
                        .instrument(span)
                        .await;
                    }

                    _ => error!("Unexpected message type: {message:?}"),
                }
            }
        });

        // Ticker for the resolve timeout and stats
        let clock_topic =
            config.get_string("clock-topic").unwrap_or(DEFAULT_CLOCK_TOPIC.to_string());
        let mut tick_subscription = context.subscribe(&clock_topic).await?;
        let tick_tracker = tracker.clone();
        let tick_topics = topics.clone();
        let tick_context = context.clone();
        context.run(async move {
            loop {
                let Ok((_, message)) = tick_subscription.read().await else {
                    return;
                };

                if let Message::Clock(clock) = message.as_ref() {
                    let mut tracker = tick_tracker.lock().await;

                    let timed_out = tracker
                        .resolving_since
                        .is_some_and(|since| since.elapsed() >= resolve_timeout);
                    if timed_out {
                        if let Some(update) = tracker.force_restart() {
                            tick_topics.publish(&tick_context, &update).await;
                        }
                    }

                    if clock.number % 60 == 0 {
                        info!(
                            status = tracker.status.name(),
                            height = tracker.status.fork_height(),
                            events = tracker.events_handled,
                        );
                    }
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindrift_common::{BlockRef, BlockType, Bytes32, DiffIndex, WavesBlock, WavesFork};
    use std::collections::VecDeque;

    fn root_block() -> WavesBlock {
        WavesBlock {
            block_ref: BlockRef {
                height: 1,
                id: Bytes32([1; 32]),
            },
            reference: Bytes32([0; 32]),
            timestamp_ms: 1000,
            tpe: BlockType::Block,
            changes: BlockchainBalance::new(),
            transactions: vec![],
        }
    }

    #[test]
    fn handle_tracks_resolving_entry_and_exit() {
        let mut tracker = Tracker::new();
        tracker.status = Status::TransientRollback {
            new_fork: WavesFork::from_blocks(vec![root_block()]),
            new_fork_changes: BlockchainBalance::new(),
            previous_fork_height: 2,
            previous_fork_diff_index: DiffIndex::new(),
        };

        // A micro-block promotes to resolving and starts the clock
        let micro = WavesBlock {
            block_ref: BlockRef {
                height: 1,
                id: Bytes32([2; 32]),
            },
            reference: Bytes32([1; 32]),
            tpe: BlockType::MicroBlock,
            ..root_block()
        };
        tracker.handle(&ChainEventMessage::Appended { block: micro });
        assert!(matches!(tracker.status, Status::TransientResolving { .. }));
        assert!(tracker.resolving_since.is_some());

        // Authoritative data resolves and stops it
        tracker.handle(&ChainEventMessage::DataReceived {
            updates: BlockchainBalance::new(),
        });
        assert!(matches!(tracker.status, Status::Normal { .. }));
        assert!(tracker.resolving_since.is_none());
    }

    #[test]
    fn force_restart_reports_and_reenters_rollback() {
        let mut tracker = Tracker::new();
        tracker.status = Status::TransientResolving {
            main_fork: WavesFork::from_blocks(vec![root_block()]),
            stash: VecDeque::new(),
            current_height_hint: 7,
        };
        tracker.resolving_since = Some(Instant::now());

        let update = tracker.force_restart().expect("should produce an update");
        assert_eq!(
            LastBlockHeight::RestartRequired(7),
            update.updated_last_block_height
        );
        assert!(matches!(tracker.status, Status::TransientRollback { .. }));
        assert!(tracker.resolving_since.is_none());
    }

    #[test]
    fn force_restart_is_a_no_op_outside_resolving() {
        let mut tracker = Tracker::new();
        assert!(tracker.force_restart().is_none());
        assert!(matches!(tracker.status, Status::Normal { .. }));

        tracker.status = Status::TransientRollback {
            new_fork: WavesFork::from_blocks(vec![root_block()]),
            new_fork_changes: BlockchainBalance::new(),
            previous_fork_height: 4,
            previous_fork_diff_index: DiffIndex::new(),
        };
        assert!(tracker.force_restart().is_none());
        assert!(matches!(
            tracker.status,
            Status::TransientRollback { previous_fork_height: 4, .. }
        ));
    }
}
