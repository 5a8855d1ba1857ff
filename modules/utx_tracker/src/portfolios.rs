//! Pessimistic portfolios
//! Aggregates the negative-only balance effects of unconfirmed transactions
//! per address. One rw-lock guards the aggregate, the per-transaction
//! contributions and the forged-id cache, so every public operation is
//! atomic with respect to the others

use parking_lot::RwLock;
use spindrift_common::params::MAX_FORGED_TRANSACTIONS;
use spindrift_common::{Address, Asset, BlockchainBalance, TxId, UtxTransaction};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// The negative-only contribution of one transaction
/// Balance updates below zero count as-is; leasing out reduces the
/// available Waves balance by the leased amount
pub fn pessimistic_portfolio(tx: &UtxTransaction) -> BlockchainBalance {
    let mut contribution = BlockchainBalance::new();
    let Some(diff) = &tx.diff else {
        return contribution;
    };

    for update in &diff.balances {
        if update.amount.amount < 0 {
            contribution.add(update.address, update.amount.asset, update.amount.amount);
        }
    }

    for lease in &diff.leases {
        if lease.out > 0 {
            contribution.add(lease.address, Asset::Waves, -lease.out);
        }
    }

    contribution
}

struct Inner {
    /// Aggregate negative balances per address, zero entries pruned
    portfolios: BlockchainBalance,

    /// Per-transaction contribution, negative-only
    txs: HashMap<TxId, BlockchainBalance>,

    /// Recently forged ids, insertion order for eviction plus a set for
    /// membership checks
    forged_order: VecDeque<TxId>,
    forged_set: HashSet<TxId>,
}

impl Inner {
    fn remember_forged(&mut self, id: TxId) {
        if self.forged_set.insert(id) {
            self.forged_order.push_back(id);
            while self.forged_order.len() > MAX_FORGED_TRANSACTIONS {
                if let Some(evicted) = self.forged_order.pop_front() {
                    self.forged_set.remove(&evicted);
                }
            }
        }
    }

    fn track(&mut self, id: TxId, contribution: BlockchainBalance, affected: &mut BTreeSet<Address>) {
        affected.extend(contribution.addresses().copied());
        self.portfolios += &contribution;
        self.txs.insert(id, contribution);
    }

    fn untrack(&mut self, id: &TxId, affected: &mut BTreeSet<Address>) -> bool {
        match self.txs.remove(id) {
            Some(contribution) => {
                affected.extend(contribution.addresses().copied());
                self.portfolios -= &contribution;
                true
            }
            None => false,
        }
    }
}

/// Thread-safe pessimistic portfolio index
pub struct PessimisticPortfolios {
    inner: RwLock<Inner>,
}

impl PessimisticPortfolios {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                portfolios: BlockchainBalance::new(),
                txs: HashMap::new(),
                forged_order: VecDeque::new(),
                forged_set: HashSet::new(),
            }),
        }
    }

    /// Atomically replace the in-flight set with `txs`, minus anything
    /// already forged. Returns the addresses whose aggregate changed
    pub fn replace_with(&self, txs: &[UtxTransaction]) -> BTreeSet<Address> {
        let mut inner = self.inner.write();
        let mut affected = BTreeSet::new();

        let incoming: HashMap<TxId, &UtxTransaction> = txs
            .iter()
            .filter(|tx| !inner.forged_set.contains(&tx.id))
            .map(|tx| (tx.id, tx))
            .collect();

        // Drop contributions of transactions that vanished
        let vanished: Vec<TxId> =
            inner.txs.keys().filter(|id| !incoming.contains_key(*id)).copied().collect();
        for id in vanished {
            inner.untrack(&id, &mut affected);
        }

        // Add contributions of transactions we have not seen yet
        for (id, tx) in incoming {
            if !inner.txs.contains_key(&id) {
                inner.track(id, pessimistic_portfolio(tx), &mut affected);
            }
        }

        affected
    }

    /// Drop the contribution of each forged transaction; ids we never saw
    /// are remembered so a late broadcast cannot re-add them
    pub fn process_forged(&self, tx_ids: &[TxId]) -> BTreeSet<Address> {
        let mut inner = self.inner.write();
        let mut affected = BTreeSet::new();

        for id in tx_ids {
            if !inner.untrack(id, &mut affected) {
                inner.remember_forged(*id);
            }
        }

        affected
    }

    /// Add newly broadcast transactions. Duplicates, already-forged ids and
    /// exchange transactions contribute nothing
    pub fn add_pending(&self, txs: &[UtxTransaction]) -> BTreeSet<Address> {
        let mut inner = self.inner.write();
        let mut affected = BTreeSet::new();

        for tx in txs {
            if inner.txs.contains_key(&tx.id)
                || inner.forged_set.contains(&tx.id)
                || tx.is_exchange()
            {
                continue;
            }
            inner.track(tx.id, pessimistic_portfolio(tx), &mut affected);
        }

        affected
    }

    /// Snapshot of one address's aggregate, empty if unknown
    pub fn get_aggregated(&self, address: &Address) -> BTreeMap<Asset, i64> {
        let inner = self.inner.read();
        inner.portfolios.assets_of(address).cloned().unwrap_or_default()
    }

    /// (tracked transactions, cached forged ids) for the stats tick
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.read();
        (inner.txs.len(), inner.forged_set.len())
    }
}

impl Default for PessimisticPortfolios {
    fn default() -> Self {
        Self::new()
    }
}
