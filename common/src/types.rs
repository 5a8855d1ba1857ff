//! Core type definitions for Spindrift

use crate::balance::BlockchainBalance;
use crate::byte_array::{Address, Bytes32, PublicKey, Signature, TxId};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Chain score as accumulated by the coordinator
pub type Score = u128;

/// An asset on the chain - the native token or an issued one
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Asset {
    Waves,
    IssuedAsset(Bytes32),
}

impl Display for Asset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Asset::Waves => write!(f, "WAVES"),
            Asset::IssuedAsset(id) => write!(f, "{id}"),
        }
    }
}

/// Height and id of a block as seen on the event stream
/// Two refs are the same block iff their ids match
#[derive(Debug, Clone, Copy, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub height: u32,
    pub id: Bytes32,
}

impl PartialEq for BlockRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::hash::Hash for BlockRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for BlockRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.height)
    }
}

/// Kind of a chain element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockType {
    Block,
    MicroBlock,
}

/// A block as observed by the status tracker
/// `reference` is the id of the parent in the owning fork; a micro-block
/// keeps the height of the most recent key block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavesBlock {
    pub block_ref: BlockRef,
    pub reference: Bytes32,
    pub timestamp_ms: u64,
    pub tpe: BlockType,
    pub changes: BlockchainBalance,
    pub transactions: Vec<TxId>,
}

impl WavesBlock {
    pub fn id(&self) -> Bytes32 {
        self.block_ref.id
    }

    pub fn height(&self) -> u32 {
        self.block_ref.height
    }
}

/// Version of a node-side block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockVersion {
    Genesis,
    Plain,
    Ng,
}

/// PoS consensus header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NxtConsensusData {
    pub base_target: u64,
    pub generation_signature: Bytes32,
}

/// A transaction carried in a node-side block - opaque payload plus id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub bytes: Vec<u8>,
}

/// A key block as forged and stored by the node
/// Chaining is by signature: `reference` is the parent's signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub version: BlockVersion,
    pub timestamp_ms: u64,
    pub reference: Signature,
    pub consensus: NxtConsensusData,
    pub transactions: Vec<Transaction>,
    pub generator: PublicKey,
    pub signature: Signature,
}

impl Block {
    /// Deterministic byte view of everything the signature covers
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.push(match self.version {
            BlockVersion::Genesis => 1,
            BlockVersion::Plain => 2,
            BlockVersion::Ng => 3,
        });
        bytes.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        bytes.extend_from_slice(self.reference.as_ref());
        bytes.extend_from_slice(&self.consensus.base_target.to_be_bytes());
        bytes.extend_from_slice(self.consensus.generation_signature.as_ref());
        bytes.extend_from_slice(self.generator.as_ref());
        bytes.extend_from_slice(&(self.transactions.len() as u32).to_be_bytes());
        for tx in &self.transactions {
            bytes.extend_from_slice(tx.id.as_ref());
        }
        bytes
    }
}

/// A micro-block extending the most recent key block
/// References the previous and new total-block signatures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroBlock {
    pub generator: PublicKey,
    pub transactions: Vec<Transaction>,
    pub prev_resulting_signature: Signature,
    pub total_resulting_signature: Signature,
    pub signature: Signature,
}

impl MicroBlock {
    /// Deterministic byte view of everything the signature covers
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.generator.as_ref());
        bytes.extend_from_slice(self.prev_resulting_signature.as_ref());
        bytes.extend_from_slice(self.total_resulting_signature.as_ref());
        bytes.extend_from_slice(&(self.transactions.len() as u32).to_be_bytes());
        for tx in &self.transactions {
            bytes.extend_from_slice(tx.id.as_ref());
        }
        bytes
    }
}

/// Transaction kinds distinguished by the UTX tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    Transfer,
    MassTransfer,
    Issue,
    Lease,
    LeaseCancel,
    Exchange,
    Invoke,
}

/// Decoded transaction body, where available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxBody {
    pub tpe: TxType,
    pub timestamp_ms: u64,
}

/// An asset quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset: Asset,
    pub amount: i64,
}

/// One address's balance change within a transaction diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub address: Address,
    pub amount: AssetAmount,
}

/// One address's leasing change within a transaction diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseUpdate {
    pub address: Address,
    /// Amount leased out after this transaction
    pub out: i64,
}

/// Balance effects of a transaction as reported by the node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateUpdate {
    pub balances: Vec<BalanceUpdate>,
    pub leases: Vec<LeaseUpdate>,
}

/// An unconfirmed transaction as delivered by the UTX stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxTransaction {
    pub id: TxId,
    pub diff: Option<StateUpdate>,
    pub transaction: Option<TxBody>,
}

impl UtxTransaction {
    pub fn is_exchange(&self) -> bool {
        matches!(
            self.transaction,
            Some(TxBody {
                tpe: TxType::Exchange,
                ..
            })
        )
    }
}
