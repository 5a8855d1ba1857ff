//! Definition of Spindrift messages

use crate::balance::{BlockchainBalance, DiffIndex};
use crate::byte_array::Address;
use crate::types::{Asset, BlockRef, UtxTransaction, WavesBlock};
use std::collections::{BTreeMap, BTreeSet};

// Bus core messages which we re-export
pub use spindrift_bus::ClockTickMessage;

/// Chain event message - the status tracker's input stream
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ChainEventMessage {
    /// A block or micro-block was appended upstream
    Appended { block: WavesBlock },

    /// The chain was rolled back to the given block
    RolledBackTo { reference: BlockRef },

    /// Synchronisation failed at the given height
    SyncFailed { height: u32 },

    /// Authoritative balances arrived from the source of truth
    DataReceived { updates: BlockchainBalance },
}

/// Balance deltas for downstream subscribers
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BalanceUpdatesMessage {
    pub updated: BlockchainBalance,
}

/// Last-block-height indicator changes
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub enum HeightUpdateMessage {
    /// A key block advanced the chain to this height
    Updated { height: u32 },

    /// The supervisor must re-sync the chain from this height
    RestartRequired { height: u32 },
}

/// Request to the source of truth for balances of the given keys
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BalanceRequestMessage {
    pub index: DiffIndex,
}

/// Whether the local chain view is up to date enough to forge on
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ReadinessMessage {
    pub ready: bool,
}

/// UTX pool events
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum UtxEventMessage {
    /// Full replacement snapshot of the unconfirmed set
    Snapshot { txs: Vec<UtxTransaction> },

    /// Newly broadcast unconfirmed transactions
    Added { txs: Vec<UtxTransaction> },
}

/// Addresses whose pessimistic aggregate changed
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PortfolioUpdatesMessage {
    pub addresses: BTreeSet<Address>,
}

/// Point queries answered over the bus
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum QueryMessage {
    /// Ask for one address's pessimistic aggregate
    GetPortfolio { address: Address },

    /// The aggregate, empty when the address is unknown
    Portfolio {
        address: Address,
        balances: BTreeMap<Asset, i64>,
    },
}

// === Global message enum ===
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Message {
    None(()), // Just so we have a simple default

    // Generic messages, get of jail free cards
    String(String),          // Simple string
    JSON(serde_json::Value), // JSON object

    // Bus standard messages
    Clock(ClockTickMessage), // Clock tick

    // Chain and tracker messages
    Chain(ChainEventMessage),              // Chain events from upstream
    BalanceUpdates(BalanceUpdatesMessage), // Balance deltas to subscribers
    HeightUpdate(HeightUpdateMessage),     // Height indicator changes
    BalanceRequest(BalanceRequestMessage), // Balance requests to the source of truth
    Readiness(ReadinessMessage),           // Forge-readiness flag changes

    // UTX tracker messages
    Utx(UtxEventMessage),                      // UTX pool events
    PortfolioUpdates(PortfolioUpdatesMessage), // Changed pessimistic aggregates
    Query(QueryMessage),                       // Point queries and answers
}

impl Default for Message {
    fn default() -> Self {
        Self::None(())
    }
}

// Casts from specific messages
impl From<ClockTickMessage> for Message {
    fn from(msg: ClockTickMessage) -> Self {
        Message::Clock(msg)
    }
}

impl From<ChainEventMessage> for Message {
    fn from(msg: ChainEventMessage) -> Self {
        Message::Chain(msg)
    }
}

impl From<BalanceUpdatesMessage> for Message {
    fn from(msg: BalanceUpdatesMessage) -> Self {
        Message::BalanceUpdates(msg)
    }
}

impl From<HeightUpdateMessage> for Message {
    fn from(msg: HeightUpdateMessage) -> Self {
        Message::HeightUpdate(msg)
    }
}

impl From<BalanceRequestMessage> for Message {
    fn from(msg: BalanceRequestMessage) -> Self {
        Message::BalanceRequest(msg)
    }
}

impl From<ReadinessMessage> for Message {
    fn from(msg: ReadinessMessage) -> Self {
        Message::Readiness(msg)
    }
}

impl From<UtxEventMessage> for Message {
    fn from(msg: UtxEventMessage) -> Self {
        Message::Utx(msg)
    }
}

impl From<PortfolioUpdatesMessage> for Message {
    fn from(msg: PortfolioUpdatesMessage) -> Self {
        Message::PortfolioUpdates(msg)
    }
}

impl From<QueryMessage> for Message {
    fn from(msg: QueryMessage) -> Self {
        Message::Query(msg)
    }
}
