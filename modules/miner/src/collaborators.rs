//! Collaborator seams the miner forges against
//! Wallets, history, state, the UTX pool, the coordinator, peer channels
//! and the PoS arithmetic all live outside this crate; the miner only
//! consumes these contracts

use anyhow::Result;
use async_trait::async_trait;
use spindrift_common::{
    Block, Bytes32, MicroBlock, NxtConsensusData, PublicKey, Score, Signature, Transaction,
};
use std::sync::Arc;
use std::time::Duration;

/// A wallet account able to sign what it forges
pub trait MinerAccount: Send + Sync {
    fn public_key(&self) -> PublicKey;

    fn sign(&self, bytes: &[u8]) -> Signature;
}

/// Read access to the local block history
#[async_trait]
pub trait History: Send + Sync {
    async fn height(&self) -> Result<u32>;

    async fn last_block(&self) -> Result<Arc<Block>>;

    /// Ancestor of `block` at the given depth, if the chain reaches that far
    async fn parent(&self, block: &Block, depth: u32) -> Result<Option<Arc<Block>>>;

    async fn last_block_timestamp(&self) -> Option<u64>;
}

/// Read access to the ledger state
#[async_trait]
pub trait StateReader: Send + Sync {
    async fn generating_balance(&self, account: &PublicKey, height: u32) -> Result<u64>;
}

/// The unconfirmed transaction pool
#[async_trait]
pub trait UtxPool: Send + Sync {
    async fn pack_unconfirmed(&self, limit: usize) -> Vec<Transaction>;
}

/// The node's wallet
pub trait Wallet: Send + Sync {
    fn private_key_accounts(&self) -> Vec<Arc<dyn MinerAccount>>;
}

/// NTP-corrected wall clock
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the epoch
    fn corrected_time(&self) -> u64;
}

/// The local coordinator deciding whether forged material extends the chain
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn process_single_block(&self, block: Arc<Block>, local: bool) -> Result<Score>;

    async fn process_micro_block(&self, micro: MicroBlock) -> Result<()>;
}

/// What the miner tells the network
#[derive(Debug, Clone)]
pub enum NetworkMessage {
    LocalScoreChanged(Score),
    BlockForged(Arc<Block>),
    MicroBlockInv { total: Signature, prev: Signature },
}

/// All connected peer channels
#[async_trait]
pub trait PeerChannels: Send + Sync {
    fn size(&self) -> usize;

    async fn broadcast(&self, message: NetworkMessage);
}

/// PoS arithmetic, opaque to the miner
pub trait PosCalculator: Send + Sync {
    fn calc_hit(&self, parent: &NxtConsensusData, account: &PublicKey) -> Result<u128>;

    fn calc_target(&self, parent: &Block, current_time_ms: u64, balance: u64) -> Result<u128>;

    fn calc_base_target(
        &self,
        average_block_delay: Duration,
        parent_height: u32,
        parent: &Block,
        great_grandparent: Option<&Block>,
        current_time_ms: u64,
    ) -> u64;

    fn calc_generator_signature(&self, parent: &NxtConsensusData, account: &PublicKey) -> Bytes32;

    fn next_block_generation_time(
        &self,
        height: u32,
        parent: &Block,
        account: &PublicKey,
    ) -> Result<u64>;
}
