//! The forging scheduler
//! Per wallet account, periodically attempts to forge a key block; once one
//! is accepted by the coordinator, extends it with micro-blocks at a fixed
//! cadence until superseded or canceled. Every failure short of cancellation
//! feeds the retry loop, whose pacing comes from the precondition chain

use crate::cancel::{CancelToken, SerialCancelable};
use crate::collaborators::{
    Coordinator, History, MinerAccount, NetworkMessage, PeerChannels, PosCalculator, StateReader,
    TimeSource, UtxPool, Wallet,
};
use crate::metrics::MinerMetrics;
use crate::settings::MinerSettings;
use anyhow::Result;
use prometheus::Registry;
use spindrift_common::params::MAX_TRANSACTIONS_PER_MICROBLOCK;
use spindrift_common::{
    Block, BlockVersion, MicroBlock, NxtConsensusData, PublicKey, Signature, Transaction,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pacing floor for retries whose own delay could not be computed
const PRECONDITION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Why a forge attempt did not produce a block
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("Quorum not available ({have}/{need} peers connected)")]
    QuorumUnavailable { have: usize, need: u32 },

    #[error("Blockchain is not ready for forging")]
    NotReady,

    #[error("Chain is stale: last block at {last_block_at} ms, now {now} ms")]
    ChainStale { last_block_at: u64, now: u64 },

    #[error("Hit {hit} is not below target {target}")]
    NotEligible { hit: u128, target: u128 },

    #[error("Generating balance unavailable: {0}")]
    BalanceUnavailable(String),

    #[error("PoS calculation failed: {0}")]
    PosFailure(String),

    #[error("History unavailable: {0}")]
    HistoryUnavailable(String),

    #[error("Coordinator rejected forged material: {0}")]
    Rejected(String),
}

/// Everything the miner consumes, as trait objects
pub struct MinerDeps {
    pub history: Arc<dyn History>,
    pub state: Arc<dyn StateReader>,
    pub utx: Arc<dyn UtxPool>,
    pub wallet: Arc<dyn Wallet>,
    pub time: Arc<dyn TimeSource>,
    pub coordinator: Arc<dyn Coordinator>,
    pub channels: Arc<dyn PeerChannels>,
    pub pos: Arc<dyn PosCalculator>,
}

/// Outcome of one pass through the forge loop
enum Cycle {
    Cancelled,
    Forged(Arc<Block>),
    Retry(ForgeError),
}

/// Inputs of one attempt, computed before the scheduling delay
#[derive(Debug)]
struct PreparedAttempt {
    offset: Duration,
    balance: u64,
    version: BlockVersion,
}

/// The block and micro-block miner
pub struct Miner {
    deps: MinerDeps,
    settings: MinerSettings,

    /// Maintained by chain sync, only consulted here
    readiness: Arc<AtomicBool>,

    /// One generation of per-account forge tasks
    scheduled_attempts: SerialCancelable,

    /// The single live micro-block chain
    micro_block_attempt: SerialCancelable,

    metrics: MinerMetrics,
}

impl Miner {
    pub fn new(
        deps: MinerDeps,
        settings: MinerSettings,
        readiness: Arc<AtomicBool>,
        registry: &Registry,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            deps,
            settings,
            readiness,
            scheduled_attempts: SerialCancelable::new(),
            micro_block_attempt: SerialCancelable::new(),
            metrics: MinerMetrics::new(registry)?,
        }))
    }

    /// Cancel all outstanding attempts and spawn a forge task per account
    pub fn schedule_mining(self: &Arc<Self>) {
        let token = self.scheduled_attempts.replace();
        self.micro_block_attempt.cancel();

        let accounts = self.deps.wallet.private_key_accounts();
        info!(accounts = accounts.len(), "Scheduling mining");

        for account in accounts {
            let miner = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                miner.generate_block_task(account, token).await;
            });
        }
    }

    /// Stop forging entirely until the next schedule
    pub fn cancel_mining(&self) {
        self.scheduled_attempts.cancel();
        self.micro_block_attempt.cancel();
    }

    /// Update the readiness flag chain sync maintains
    pub fn set_ready(&self, ready: bool) {
        self.readiness.store(ready, Ordering::Release);
    }

    async fn generate_block_task(
        self: Arc<Self>,
        account: Arc<dyn MinerAccount>,
        mut token: CancelToken,
    ) {
        let key = account.public_key();
        loop {
            match self.block_generation_cycle(&account, &mut token).await {
                Cycle::Cancelled => return,

                Cycle::Forged(block) => {
                    if block.version >= BlockVersion::Ng {
                        self.start_micro_block_chain(account, block);
                    }
                    return;
                }

                Cycle::Retry(error) => {
                    debug!(account = %key, %error, "Forge attempt failed, retrying");
                }
            }
        }
    }

    async fn block_generation_cycle(
        &self,
        account: &Arc<dyn MinerAccount>,
        token: &mut CancelToken,
    ) -> Cycle {
        let key = account.public_key();

        let prepared = match self.prepare_attempt(&key).await {
            Ok(prepared) => prepared,
            Err(error) => {
                // The attempt's own delay could not be computed, so floor
                // the retry instead of spinning
                let pacing =
                    PRECONDITION_RETRY_DELAY.max(self.settings.minimal_block_generation_offset);
                if !token.sleep(pacing).await {
                    return Cycle::Cancelled;
                }
                return Cycle::Retry(error);
            }
        };

        debug!(account = %key, offset = ?prepared.offset, "Forge attempt scheduled");
        if !token.sleep(prepared.offset).await {
            return Cycle::Cancelled;
        }

        match self.forge_block(account, prepared.version, prepared.balance).await {
            Ok(block) => Cycle::Forged(block),
            Err(error) => Cycle::Retry(error),
        }
    }

    /// The precondition chain: age check, generation time, offset, balance
    async fn prepare_attempt(&self, key: &PublicKey) -> Result<PreparedAttempt, ForgeError> {
        let height = self
            .deps
            .history
            .height()
            .await
            .map_err(|e| ForgeError::HistoryUnavailable(e.to_string()))?;
        let last_block = self
            .deps
            .history
            .last_block()
            .await
            .map_err(|e| ForgeError::HistoryUnavailable(e.to_string()))?;

        self.check_age(height).await?;

        let generation_time = self
            .deps
            .pos
            .next_block_generation_time(height, &last_block, key)
            .map_err(|e| ForgeError::PosFailure(e.to_string()))?;
        let now = self.deps.time.corrected_time();
        let offset = calc_offset(
            now,
            generation_time,
            self.settings.minimal_block_generation_offset,
        );

        let balance = self
            .deps
            .state
            .generating_balance(key, height)
            .await
            .map_err(|e| ForgeError::BalanceUnavailable(e.to_string()))?;

        let version = if height > self.settings.enable_microblocks_after_height {
            BlockVersion::Ng
        } else {
            BlockVersion::Plain
        };

        Ok(PreparedAttempt {
            offset,
            balance,
            version,
        })
    }

    /// Forging past genesis requires a recent chain tip
    async fn check_age(&self, height: u32) -> Result<(), ForgeError> {
        if height <= 1 {
            return Ok(());
        }
        let Some(last_block_at) = self.deps.history.last_block_timestamp().await else {
            return Ok(());
        };
        let now = self.deps.time.corrected_time();
        let age = Duration::from_millis(now.saturating_sub(last_block_at));
        if age > self.settings.interval_after_last_block_then_generation_is_allowed {
            return Err(ForgeError::ChainStale { last_block_at, now });
        }
        Ok(())
    }

    /// One actual forge: gate on readiness, quorum and PoS eligibility,
    /// then build, sign, submit and broadcast
    async fn forge_block(
        &self,
        account: &Arc<dyn MinerAccount>,
        version: BlockVersion,
        balance: u64,
    ) -> Result<Arc<Block>, ForgeError> {
        let key = account.public_key();

        if !self.readiness.load(Ordering::Acquire) {
            return Err(ForgeError::NotReady);
        }

        // Micro-blocks may have arrived during the delay
        let parent = self
            .deps
            .history
            .last_block()
            .await
            .map_err(|e| ForgeError::HistoryUnavailable(e.to_string()))?;
        let parent_height = self
            .deps
            .history
            .height()
            .await
            .map_err(|e| ForgeError::HistoryUnavailable(e.to_string()))?;

        let peers = self.deps.channels.size();
        if peers < self.settings.quorum as usize {
            return Err(ForgeError::QuorumUnavailable {
                have: peers,
                need: self.settings.quorum,
            });
        }

        let now = self.deps.time.corrected_time();
        let hit = self
            .deps
            .pos
            .calc_hit(&parent.consensus, &key)
            .map_err(|e| ForgeError::PosFailure(e.to_string()))?;
        let target = self
            .deps
            .pos
            .calc_target(&parent, now, balance)
            .map_err(|e| ForgeError::PosFailure(e.to_string()))?;
        if hit >= target {
            return Err(ForgeError::NotEligible { hit, target });
        }

        let great_grandparent = self
            .deps
            .history
            .parent(&parent, 2)
            .await
            .map_err(|e| ForgeError::HistoryUnavailable(e.to_string()))?;
        let base_target = self.deps.pos.calc_base_target(
            self.settings.average_block_delay,
            parent_height,
            &parent,
            great_grandparent.as_deref(),
            now,
        );
        let generation_signature = self.deps.pos.calc_generator_signature(&parent.consensus, &key);

        let unconfirmed =
            self.deps.utx.pack_unconfirmed(self.settings.max_transactions_in_key_block).await;

        info!(
            account = %key,
            parent = %parent.signature,
            hit = %hit,
            target = %target,
            peers,
            quorum = self.settings.quorum,
            txs = unconfirmed.len(),
            "Forging a new block"
        );

        let started = Instant::now();
        let consensus = NxtConsensusData {
            base_target,
            generation_signature,
        };
        let block = Arc::new(sign_block(
            version,
            now,
            parent.signature,
            consensus,
            unconfirmed,
            account.as_ref(),
        ));
        self.metrics.forge_block_time.observe(elapsed_ms(started));

        let score = self
            .deps
            .coordinator
            .process_single_block(block.clone(), true)
            .await
            .map_err(|e| ForgeError::Rejected(e.to_string()))?;

        info!(block = %block.signature, score = %score, "Block appended locally, broadcasting");
        self.deps.channels.broadcast(NetworkMessage::LocalScoreChanged(score)).await;
        self.deps.channels.broadcast(NetworkMessage::BlockForged(block.clone())).await;

        Ok(block)
    }

    /// Replace the live micro-block chain with one extending `carrier`
    fn start_micro_block_chain(self: &Arc<Self>, account: Arc<dyn MinerAccount>, carrier: Arc<Block>) {
        let token = self.micro_block_attempt.replace();
        info!(block = %carrier.signature, "Starting micro-block chain");

        let miner = self.clone();
        tokio::spawn(async move {
            miner.micro_block_loop(account, carrier, token).await;
        });
    }

    async fn micro_block_loop(
        &self,
        account: Arc<dyn MinerAccount>,
        mut accumulated: Arc<Block>,
        mut token: CancelToken,
    ) {
        loop {
            if !token.sleep(self.settings.micro_block_interval).await {
                debug!(block = %accumulated.signature, "Micro-block chain canceled");
                return;
            }

            let peers = self.deps.channels.size();
            if peers < self.settings.quorum as usize {
                debug!(peers, quorum = self.settings.quorum, "Skipping micro-block, no quorum");
                continue;
            }

            let unconfirmed =
                self.deps.utx.pack_unconfirmed(MAX_TRANSACTIONS_PER_MICROBLOCK).await;
            if unconfirmed.is_empty() {
                continue;
            }

            let started = Instant::now();

            // Rebuild the carrier with the accumulated plus new transactions
            let mut transactions = accumulated.transactions.clone();
            transactions.extend(unconfirmed.iter().cloned());
            let total = sign_block(
                accumulated.version,
                accumulated.timestamp_ms,
                accumulated.reference,
                accumulated.consensus,
                transactions,
                account.as_ref(),
            );
            let micro = sign_micro(
                account.as_ref(),
                unconfirmed,
                accumulated.signature,
                total.signature,
            );
            self.metrics.forge_micro_block_time.observe(elapsed_ms(started));

            match self.deps.coordinator.process_micro_block(micro).await {
                Ok(()) => {
                    info!(
                        total = %total.signature,
                        prev = %accumulated.signature,
                        txs = total.transactions.len(),
                        "Micro-block appended, broadcasting inventory"
                    );
                    self.deps
                        .channels
                        .broadcast(NetworkMessage::MicroBlockInv {
                            total: total.signature,
                            prev: accumulated.signature,
                        })
                        .await;
                    accumulated = Arc::new(total);
                }

                Err(error) => {
                    warn!(%error, "Micro-block rejected, keeping previous total block");
                }
            }
        }
    }
}

/// Delay until the computed generation timestamp, aligned up to the next
/// whole second, never below the configured floor
pub fn calc_offset(now_ms: u64, generation_time_ms: u64, minimal: Duration) -> Duration {
    let aligned_ms = generation_time_ms.div_ceil(1000) * 1000;
    Duration::from_millis(aligned_ms.saturating_sub(now_ms)).max(minimal)
}

fn sign_block(
    version: BlockVersion,
    timestamp_ms: u64,
    reference: Signature,
    consensus: NxtConsensusData,
    transactions: Vec<Transaction>,
    account: &dyn MinerAccount,
) -> Block {
    let mut block = Block {
        version,
        timestamp_ms,
        reference,
        consensus,
        transactions,
        generator: account.public_key(),
        signature: Signature::default(),
    };
    block.signature = account.sign(&block.signable_bytes());
    block
}

fn sign_micro(
    account: &dyn MinerAccount,
    transactions: Vec<Transaction>,
    prev_resulting_signature: Signature,
    total_resulting_signature: Signature,
) -> MicroBlock {
    let mut micro = MicroBlock {
        generator: account.public_key(),
        transactions,
        prev_resulting_signature,
        total_resulting_signature,
        signature: Signature::default(),
    };
    micro.signature = account.sign(&micro.signable_bytes());
    micro
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, bail};
    use async_trait::async_trait;
    use spindrift_common::{Bytes32, Score, TxId};
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use std::sync::Mutex;

    struct FakeAccount(u8);

    impl MinerAccount for FakeAccount {
        fn public_key(&self) -> PublicKey {
            PublicKey([self.0; 32])
        }

        // Deterministic stand-in: fold the content into a fixed-width tag
        fn sign(&self, bytes: &[u8]) -> Signature {
            let mut signature = [self.0; 64];
            for (index, byte) in bytes.iter().enumerate() {
                signature[index % 64] ^= *byte;
            }
            Signature(signature)
        }
    }

    struct FakeHistory {
        height: u32,
        last_block: Arc<Block>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl History for FakeHistory {
        async fn height(&self) -> Result<u32> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            Ok(self.height)
        }

        async fn last_block(&self) -> Result<Arc<Block>> {
            Ok(self.last_block.clone())
        }

        async fn parent(&self, _block: &Block, _depth: u32) -> Result<Option<Arc<Block>>> {
            Ok(None)
        }

        async fn last_block_timestamp(&self) -> Option<u64> {
            Some(self.last_block.timestamp_ms)
        }
    }

    struct FakeState {
        balance: Option<u64>,
    }

    #[async_trait]
    impl StateReader for FakeState {
        async fn generating_balance(&self, _account: &PublicKey, _height: u32) -> Result<u64> {
            self.balance.ok_or_else(|| anyhow!("no state for account"))
        }
    }

    struct FakeUtx {
        txs: Mutex<Vec<Transaction>>,
    }

    #[async_trait]
    impl UtxPool for FakeUtx {
        async fn pack_unconfirmed(&self, limit: usize) -> Vec<Transaction> {
            let txs = self.txs.lock().unwrap();
            txs.iter().take(limit).cloned().collect()
        }
    }

    struct FakeWallet {
        accounts: Vec<u8>,
    }

    impl Wallet for FakeWallet {
        fn private_key_accounts(&self) -> Vec<Arc<dyn MinerAccount>> {
            self.accounts.iter().map(|n| Arc::new(FakeAccount(*n)) as Arc<dyn MinerAccount>).collect()
        }
    }

    struct FakeTime {
        now: AtomicU64,
    }

    impl TimeSource for FakeTime {
        fn corrected_time(&self) -> u64 {
            self.now.load(Ordering::Relaxed)
        }
    }

    struct FakeCoordinator {
        accept: bool,
        blocks: Mutex<Vec<Arc<Block>>>,
        micros: Mutex<Vec<MicroBlock>>,
    }

    #[async_trait]
    impl Coordinator for FakeCoordinator {
        async fn process_single_block(&self, block: Arc<Block>, _local: bool) -> Result<Score> {
            if !self.accept {
                bail!("block does not extend the chain");
            }
            self.blocks.lock().unwrap().push(block);
            Ok(42)
        }

        async fn process_micro_block(&self, micro: MicroBlock) -> Result<()> {
            if !self.accept {
                bail!("micro-block does not extend the chain");
            }
            self.micros.lock().unwrap().push(micro);
            Ok(())
        }
    }

    struct FakeChannels {
        peers: AtomicUsize,
        broadcasts: Mutex<Vec<NetworkMessage>>,
    }

    #[async_trait]
    impl PeerChannels for FakeChannels {
        fn size(&self) -> usize {
            self.peers.load(Ordering::Relaxed)
        }

        async fn broadcast(&self, message: NetworkMessage) {
            self.broadcasts.lock().unwrap().push(message);
        }
    }

    struct FakePos {
        hit: u128,
        target: u128,
    }

    impl PosCalculator for FakePos {
        fn calc_hit(&self, _parent: &NxtConsensusData, _account: &PublicKey) -> Result<u128> {
            Ok(self.hit)
        }

        fn calc_target(&self, _parent: &Block, _now: u64, _balance: u64) -> Result<u128> {
            Ok(self.target)
        }

        fn calc_base_target(
            &self,
            _average_block_delay: Duration,
            _parent_height: u32,
            _parent: &Block,
            _great_grandparent: Option<&Block>,
            _now: u64,
        ) -> u64 {
            100
        }

        fn calc_generator_signature(
            &self,
            _parent: &NxtConsensusData,
            _account: &PublicKey,
        ) -> Bytes32 {
            Bytes32([7; 32])
        }

        fn next_block_generation_time(
            &self,
            _height: u32,
            parent: &Block,
            _account: &PublicKey,
        ) -> Result<u64> {
            Ok(parent.timestamp_ms + 1000)
        }
    }

    struct Fixture {
        history: Arc<FakeHistory>,
        coordinator: Arc<FakeCoordinator>,
        channels: Arc<FakeChannels>,
        utx: Arc<FakeUtx>,
        miner: Arc<Miner>,
    }

    fn parent_block() -> Arc<Block> {
        Arc::new(Block {
            version: BlockVersion::Ng,
            timestamp_ms: 100_000,
            reference: Signature([1; 64]),
            consensus: NxtConsensusData {
                base_target: 50,
                generation_signature: Bytes32([3; 32]),
            },
            transactions: vec![],
            generator: PublicKey([9; 32]),
            signature: Signature([2; 64]),
        })
    }

    fn tx(n: u8) -> Transaction {
        Transaction {
            id: TxId([n; 32]),
            bytes: vec![n],
        }
    }

    fn fixture(peers: usize, quorum: u32, hit: u128, target: u128) -> Fixture {
        let history = Arc::new(FakeHistory {
            height: 10,
            last_block: parent_block(),
            reads: AtomicUsize::new(0),
        });
        let coordinator = Arc::new(FakeCoordinator {
            accept: true,
            blocks: Mutex::new(vec![]),
            micros: Mutex::new(vec![]),
        });
        let channels = Arc::new(FakeChannels {
            peers: AtomicUsize::new(peers),
            broadcasts: Mutex::new(vec![]),
        });
        let utx = Arc::new(FakeUtx {
            txs: Mutex::new(vec![tx(1), tx(2)]),
        });

        let deps = MinerDeps {
            history: history.clone(),
            state: Arc::new(FakeState { balance: Some(1000) }),
            utx: utx.clone(),
            wallet: Arc::new(FakeWallet { accounts: vec![5] }),
            time: Arc::new(FakeTime {
                now: AtomicU64::new(101_000),
            }),
            coordinator: coordinator.clone(),
            channels: channels.clone(),
            pos: Arc::new(FakePos { hit, target }),
        };

        let settings = MinerSettings {
            quorum,
            micro_block_interval: Duration::from_millis(50),
            ..MinerSettings::default()
        };

        let readiness = Arc::new(AtomicBool::new(true));
        let miner = Miner::new(deps, settings, readiness, &Registry::new()).unwrap();

        Fixture {
            history,
            coordinator,
            channels,
            utx,
            miner,
        }
    }

    fn account() -> Arc<dyn MinerAccount> {
        Arc::new(FakeAccount(5))
    }

    #[test]
    fn offset_is_floored_at_the_minimum() {
        // Generation time already passed
        let offset = calc_offset(10_000, 5_000, Duration::from_millis(200));
        assert_eq!(Duration::from_millis(200), offset);
    }

    #[test]
    fn offset_aligns_future_timestamps_to_whole_seconds() {
        let offset = calc_offset(10_000, 12_345, Duration::from_millis(200));
        assert_eq!(Duration::from_millis(3_000), offset);

        // Already aligned timestamps stay put
        let offset = calc_offset(10_000, 13_000, Duration::from_millis(200));
        assert_eq!(Duration::from_millis(3_000), offset);
    }

    #[tokio::test]
    async fn quorum_gate_reports_and_broadcasts_nothing() {
        let fixture = fixture(1, 2, 10, 100);

        let error = fixture
            .miner
            .forge_block(&account(), BlockVersion::Ng, 1000)
            .await
            .unwrap_err();

        assert_eq!(
            "Quorum not available (1/2 peers connected)",
            error.to_string()
        );
        assert!(fixture.channels.broadcasts.lock().unwrap().is_empty());
        assert!(fixture.coordinator.blocks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ineligible_hit_is_rejected() {
        let fixture = fixture(3, 1, 100, 100);

        let error = fixture
            .miner
            .forge_block(&account(), BlockVersion::Ng, 1000)
            .await
            .unwrap_err();

        assert!(matches!(error, ForgeError::NotEligible { hit: 100, target: 100 }));
    }

    #[tokio::test]
    async fn unready_blockchain_blocks_forging() {
        let fixture = fixture(3, 1, 10, 100);
        fixture.miner.readiness.store(false, Ordering::Release);

        let error = fixture
            .miner
            .forge_block(&account(), BlockVersion::Ng, 1000)
            .await
            .unwrap_err();
        assert!(matches!(error, ForgeError::NotReady));
    }

    #[tokio::test]
    async fn successful_forge_submits_and_broadcasts() {
        let fixture = fixture(3, 1, 10, 100);

        let block = fixture
            .miner
            .forge_block(&account(), BlockVersion::Ng, 1000)
            .await
            .unwrap();

        assert_eq!(parent_block().signature, block.reference);
        assert_eq!(PublicKey([5; 32]), block.generator);
        assert_eq!(2, block.transactions.len());
        assert_ne!(Signature::default(), block.signature);

        let submitted = fixture.coordinator.blocks.lock().unwrap();
        assert_eq!(1, submitted.len());

        let broadcasts = fixture.channels.broadcasts.lock().unwrap();
        assert_eq!(2, broadcasts.len());
        assert!(matches!(broadcasts[0], NetworkMessage::LocalScoreChanged(42)));
        assert!(
            matches!(&broadcasts[1], NetworkMessage::BlockForged(forged) if forged.signature == block.signature)
        );
    }

    #[tokio::test]
    async fn rejected_block_surfaces_as_retryable() {
        let fixture = fixture(3, 1, 10, 100);
        let coordinator = Arc::new(FakeCoordinator {
            accept: false,
            blocks: Mutex::new(vec![]),
            micros: Mutex::new(vec![]),
        });
        let deps = MinerDeps {
            history: fixture.history.clone(),
            state: Arc::new(FakeState { balance: Some(1000) }),
            utx: fixture.utx.clone(),
            wallet: Arc::new(FakeWallet { accounts: vec![5] }),
            time: Arc::new(FakeTime {
                now: AtomicU64::new(101_000),
            }),
            coordinator,
            channels: fixture.channels.clone(),
            pos: Arc::new(FakePos { hit: 10, target: 100 }),
        };
        let miner = Miner::new(
            deps,
            MinerSettings::default(),
            Arc::new(AtomicBool::new(true)),
            &Registry::new(),
        )
        .unwrap();

        let error = miner.forge_block(&account(), BlockVersion::Ng, 1000).await.unwrap_err();
        assert!(matches!(error, ForgeError::Rejected(_)));
        assert!(fixture.channels.broadcasts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_chain_fails_the_age_check() {
        let fixture = fixture(3, 1, 10, 100);

        // Pretend a very old tip
        let deps = MinerDeps {
            history: Arc::new(FakeHistory {
                height: 10,
                last_block: Arc::new(Block {
                    timestamp_ms: 0,
                    ..(*parent_block()).clone()
                }),
                reads: AtomicUsize::new(0),
            }),
            state: Arc::new(FakeState { balance: Some(1000) }),
            utx: fixture.utx.clone(),
            wallet: Arc::new(FakeWallet { accounts: vec![5] }),
            time: Arc::new(FakeTime {
                now: AtomicU64::new(10 * 24 * 60 * 60 * 1000),
            }),
            coordinator: fixture.coordinator.clone(),
            channels: fixture.channels.clone(),
            pos: Arc::new(FakePos { hit: 10, target: 100 }),
        };
        let miner = Miner::new(
            deps,
            MinerSettings::default(),
            Arc::new(AtomicBool::new(true)),
            &Registry::new(),
        )
        .unwrap();

        let error = miner.prepare_attempt(&PublicKey([5; 32])).await.unwrap_err();
        assert!(matches!(error, ForgeError::ChainStale { .. }));
    }

    #[tokio::test]
    async fn missing_balance_aborts_the_attempt() {
        let fixture = fixture(3, 1, 10, 100);
        let deps = MinerDeps {
            history: fixture.history.clone(),
            state: Arc::new(FakeState { balance: None }),
            utx: fixture.utx.clone(),
            wallet: Arc::new(FakeWallet { accounts: vec![5] }),
            time: Arc::new(FakeTime {
                now: AtomicU64::new(101_000),
            }),
            coordinator: fixture.coordinator.clone(),
            channels: fixture.channels.clone(),
            pos: Arc::new(FakePos { hit: 10, target: 100 }),
        };
        let miner = Miner::new(
            deps,
            MinerSettings::default(),
            Arc::new(AtomicBool::new(true)),
            &Registry::new(),
        )
        .unwrap();

        let error = miner.prepare_attempt(&PublicKey([5; 32])).await.unwrap_err();
        assert!(matches!(error, ForgeError::BalanceUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn micro_block_chain_extends_the_carrier() {
        let fixture = fixture(3, 1, 10, 100);

        let carrier = fixture
            .miner
            .forge_block(&account(), BlockVersion::Ng, 1000)
            .await
            .unwrap();
        fixture.miner.start_micro_block_chain(account(), carrier.clone());

        // Let two intervals elapse
        tokio::time::sleep(Duration::from_millis(160)).await;
        fixture.miner.cancel_mining();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let micros = fixture.coordinator.micros.lock().unwrap();
        assert!(!micros.is_empty());
        assert_eq!(carrier.signature, micros[0].prev_resulting_signature);
        assert_ne!(carrier.signature, micros[0].total_resulting_signature);

        // The second micro-block chains on the first total signature
        if micros.len() > 1 {
            assert_eq!(
                micros[0].total_resulting_signature,
                micros[1].prev_resulting_signature
            );
        }

        let broadcasts = fixture.channels.broadcasts.lock().unwrap();
        assert!(broadcasts.iter().any(|message| matches!(
            message,
            NetworkMessage::MicroBlockInv { prev, .. } if *prev == carrier.signature
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn micro_block_chain_skips_without_transactions() {
        let fixture = fixture(3, 1, 10, 100);
        fixture.utx.txs.lock().unwrap().clear();

        fixture.miner.start_micro_block_chain(account(), parent_block());
        tokio::time::sleep(Duration::from_millis(200)).await;
        fixture.miner.cancel_mining();

        assert!(fixture.coordinator.micros.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn micro_block_rejection_keeps_the_accumulated_block() {
        let fixture = fixture(3, 1, 10, 100);
        let carrier = parent_block();

        // Coordinator that rejects micro-blocks only
        let coordinator = Arc::new(FakeCoordinator {
            accept: false,
            blocks: Mutex::new(vec![]),
            micros: Mutex::new(vec![]),
        });
        let deps = MinerDeps {
            history: fixture.history.clone(),
            state: Arc::new(FakeState { balance: Some(1000) }),
            utx: fixture.utx.clone(),
            wallet: Arc::new(FakeWallet { accounts: vec![5] }),
            time: Arc::new(FakeTime {
                now: AtomicU64::new(101_000),
            }),
            coordinator: coordinator.clone(),
            channels: fixture.channels.clone(),
            pos: Arc::new(FakePos { hit: 10, target: 100 }),
        };
        let settings = MinerSettings {
            micro_block_interval: Duration::from_millis(50),
            ..MinerSettings::default()
        };
        let miner =
            Miner::new(deps, settings, Arc::new(AtomicBool::new(true)), &Registry::new()).unwrap();

        miner.start_micro_block_chain(account(), carrier);
        tokio::time::sleep(Duration::from_millis(200)).await;
        miner.cancel_mining();

        // Nothing accepted, nothing broadcast
        assert!(coordinator.micros.lock().unwrap().is_empty());
        assert!(!fixture
            .channels
            .broadcasts
            .lock()
            .unwrap()
            .iter()
            .any(|message| matches!(message, NetworkMessage::MicroBlockInv { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_scheduling_leaves_no_task_runnable() {
        // No peers, so every cycle fails at the quorum gate and retries
        let fixture = fixture(0, 1, 10, 100);

        fixture.miner.schedule_mining();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fixture.history.reads.load(Ordering::Relaxed) > 0);

        // Schedule a second generation, then cancel everything: nothing
        // from either generation may still touch the chain
        fixture.miner.schedule_mining();
        fixture.miner.cancel_mining();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let settled = fixture.history.reads.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(settled, fixture.history.reads.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_stops_the_micro_block_chain() {
        // Hit never below target, so the rescheduled forge tasks spin
        // without producing a replacement chain
        let fixture = fixture(3, 1, 100, 100);

        fixture.miner.start_micro_block_chain(account(), parent_block());
        tokio::time::sleep(Duration::from_millis(120)).await;
        let produced = fixture.coordinator.micros.lock().unwrap().len();
        assert!(produced > 0);

        // A new scheduling generation supersedes the running chain; no
        // peers-independent forge will succeed here, so no new chain starts
        fixture.miner.schedule_mining();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(produced, fixture.coordinator.micros.lock().unwrap().len());
        fixture.miner.cancel_mining();
    }
}
