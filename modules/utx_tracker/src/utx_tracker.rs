//! Spindrift UTX tracker module
//! Feeds the pessimistic portfolio index from chain and UTX pool events and
//! answers portfolio queries for order matching

use anyhow::Result;
use async_trait::async_trait;
use config::Config;
use spindrift_bus::{Context, Module};
use spindrift_common::messages::{
    ChainEventMessage, Message, PortfolioUpdatesMessage, QueryMessage, UtxEventMessage,
};
use spindrift_common::Address;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

pub mod portfolios;
use portfolios::PessimisticPortfolios;

const DEFAULT_CHAIN_SUBSCRIBE_TOPIC: &str = "waves.chain.events";
const DEFAULT_UTX_SUBSCRIBE_TOPIC: &str = "waves.utx.events";
const DEFAULT_PORTFOLIO_UPDATES_TOPIC: &str = "waves.portfolio.updates";
const DEFAULT_QUERY_TOPIC: &str = "waves.query.portfolio";
const DEFAULT_CLOCK_TOPIC: &str = "clock.tick";

/// UTX tracker module
#[derive(Default)]
pub struct UtxTracker;

impl UtxTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    /// Publish the affected-address set, if any
    async fn publish_affected(
        context: &Arc<Context<Message>>,
        topic: &str,
        addresses: BTreeSet<Address>,
    ) {
        if addresses.is_empty() {
            return;
        }
        let message = Message::PortfolioUpdates(PortfolioUpdatesMessage { addresses });
        context
            .message_bus
            .publish(topic, Arc::new(message))
            .await
            .unwrap_or_else(|e| error!("Failed to publish portfolio updates: {e}"));
    }
}

#[async_trait]
impl Module<Message> for UtxTracker {
    fn name(&self) -> &'static str {
        "utx-tracker"
    }

    fn description(&self) -> &'static str {
        "Pessimistic portfolio tracker"
    }

    async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        let chain_topic = config
            .get_string("chain-subscribe-topic")
            .unwrap_or(DEFAULT_CHAIN_SUBSCRIBE_TOPIC.to_string());
        let utx_topic = config
            .get_string("utx-subscribe-topic")
            .unwrap_or(DEFAULT_UTX_SUBSCRIBE_TOPIC.to_string());
        info!("Creating subscribers on '{chain_topic}' and '{utx_topic}'");

        let updates_topic = config
            .get_string("portfolio-updates-topic")
            .unwrap_or(DEFAULT_PORTFOLIO_UPDATES_TOPIC.to_string());
        let query_topic =
            config.get_string("query-topic").unwrap_or(DEFAULT_QUERY_TOPIC.to_string());
        info!("Publishing updates on '{updates_topic}', queries on '{query_topic}'");

        let portfolios = Arc::new(PessimisticPortfolios::new());

        // Forged transactions arrive as appended blocks
        let chain_portfolios = portfolios.clone();
        let chain_context = context.clone();
        let chain_updates_topic = updates_topic.clone();
        let mut chain_subscription = context.subscribe(&chain_topic).await?;
        context.run(async move {
            loop {
                let Ok((_, message)) = chain_subscription.read().await else {
                    error!("Chain event read failed");
                    return;
                };
                if let Message::Chain(ChainEventMessage::Appended { block }) = message.as_ref() {
                    let span = info_span!("utx_tracker.forged", block = %block.block_ref);
                    async {
                        let affected = chain_portfolios.process_forged(&block.transactions);
                        Self::publish_affected(&chain_context, &chain_updates_topic, affected)
                            .await;
                    }
                    .instrument(span)
                    .await;
                }
            }
        });

        // UTX pool events
        let utx_portfolios = portfolios.clone();
        let utx_context = context.clone();
        let utx_updates_topic = updates_topic.clone();
        let mut utx_subscription = context.subscribe(&utx_topic).await?;
        context.run(async move {
            loop {
                let Ok((_, message)) = utx_subscription.read().await else {
                    error!("UTX event read failed");
                    return;
                };
                match message.as_ref() {
                    Message::Utx(UtxEventMessage::Snapshot { txs }) => {
                        let span = info_span!("utx_tracker.snapshot", txs = txs.len());
                        async {
                            let affected = utx_portfolios.replace_with(txs);
                            Self::publish_affected(&utx_context, &utx_updates_topic, affected)
                                .await;
                        }
                        .instrument(span)
                        .await;
                    }

                    Message::Utx(UtxEventMessage::Added { txs }) => {
                        let span = info_span!("utx_tracker.added", txs = txs.len());
                        async {
                            let affected = utx_portfolios.add_pending(txs);
                            Self::publish_affected(&utx_context, &utx_updates_topic, affected)
                                .await;
                        }
                        .instrument(span)
                        .await;
                    }

                    _ => error!("Unexpected message type: {message:?}"),
                }
            }
        });

        // Portfolio queries
        let query_portfolios = portfolios.clone();
        context.handle(&query_topic, move |message: Arc<Message>| {
            let portfolios = query_portfolios.clone();
            async move {
                match message.as_ref() {
                    Message::Query(QueryMessage::GetPortfolio { address }) => {
                        Arc::new(Message::Query(QueryMessage::Portfolio {
                            address: *address,
                            balances: portfolios.get_aggregated(address),
                        }))
                    }

                    _ => {
                        error!("Unexpected query: {message:?}");
                        Arc::new(Message::default())
                    }
                }
            }
        });

        // Ticker to log stats
        let clock_topic =
            config.get_string("clock-topic").unwrap_or(DEFAULT_CLOCK_TOPIC.to_string());
        let mut tick_subscription = context.subscribe(&clock_topic).await?;
        let tick_portfolios = portfolios.clone();
        context.run(async move {
            loop {
                let Ok((_, message)) = tick_subscription.read().await else {
                    return;
                };

                if let Message::Clock(clock) = message.as_ref() {
                    if clock.number % 60 == 0 {
                        let (tracked, forged) = tick_portfolios.counts();
                        info!(tracked, forged);
                    }
                }
            }
        });

        Ok(())
    }
}
