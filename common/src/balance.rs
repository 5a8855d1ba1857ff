//! Balance diffs and their key index
//! `BlockchainBalance` is a commutative group under componentwise addition,
//! kept sparse: entries that reach zero are pruned on every operation

use crate::byte_array::Address;
use crate::types::Asset;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{AddAssign, Neg, SubAssign};

/// Sparse per-address, per-asset balance diff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainBalance(BTreeMap<Address, BTreeMap<Asset, i64>>);

impl BlockchainBalance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of addresses with a non-zero entry
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Set one entry, pruning it if zero
    pub fn put(&mut self, address: Address, asset: Asset, value: i64) {
        if value == 0 {
            if let Some(assets) = self.0.get_mut(&address) {
                assets.remove(&asset);
                if assets.is_empty() {
                    self.0.remove(&address);
                }
            }
        } else {
            self.0.entry(address).or_default().insert(asset, value);
        }
    }

    /// Add to one entry, pruning it if the sum reaches zero
    pub fn add(&mut self, address: Address, asset: Asset, value: i64) {
        let current = self.get(&address, &asset).unwrap_or(0);
        self.put(address, asset, current + value);
    }

    pub fn get(&self, address: &Address, asset: &Asset) -> Option<i64> {
        self.0.get(address).and_then(|assets| assets.get(asset)).copied()
    }

    pub fn assets_of(&self, address: &Address) -> Option<&BTreeMap<Asset, i64>> {
        self.0.get(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &BTreeMap<Asset, i64>)> {
        self.0.iter()
    }

    /// The set of (address, asset) keys this diff touches
    pub fn diff_index(&self) -> DiffIndex {
        let mut index = DiffIndex::default();
        for (address, assets) in &self.0 {
            for asset in assets.keys() {
                index.put(*address, *asset);
            }
        }
        index
    }
}

impl AddAssign<&BlockchainBalance> for BlockchainBalance {
    fn add_assign(&mut self, other: &BlockchainBalance) {
        for (address, assets) in &other.0 {
            for (asset, value) in assets {
                self.add(*address, *asset, *value);
            }
        }
    }
}

impl SubAssign<&BlockchainBalance> for BlockchainBalance {
    fn sub_assign(&mut self, other: &BlockchainBalance) {
        for (address, assets) in &other.0 {
            for (asset, value) in assets {
                self.add(*address, *asset, -*value);
            }
        }
    }
}

impl Neg for BlockchainBalance {
    type Output = BlockchainBalance;

    fn neg(self) -> BlockchainBalance {
        let mut negated = BlockchainBalance::new();
        for (address, assets) in self.0 {
            for (asset, value) in assets {
                negated.put(address, asset, -value);
            }
        }
        negated
    }
}

impl FromIterator<(Address, Asset, i64)> for BlockchainBalance {
    fn from_iter<I: IntoIterator<Item = (Address, Asset, i64)>>(entries: I) -> Self {
        let mut balance = BlockchainBalance::new();
        for (address, asset, value) in entries {
            balance.add(address, asset, value);
        }
        balance
    }
}

/// The set of (address, asset) keys touched by a balance diff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffIndex(BTreeMap<Address, BTreeSet<Asset>>);

impl DiffIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn put(&mut self, address: Address, asset: Asset) {
        self.0.entry(address).or_default().insert(asset);
    }

    pub fn contains(&self, address: &Address, asset: &Asset) -> bool {
        self.0.get(address).is_some_and(|assets| assets.contains(asset))
    }

    /// Union in another index
    pub fn merge(&mut self, other: &DiffIndex) {
        for (address, assets) in &other.0 {
            self.0.entry(*address).or_default().extend(assets.iter().copied());
        }
    }

    /// Keys present here but not in `other`
    pub fn difference(&self, other: &DiffIndex) -> DiffIndex {
        let mut result = DiffIndex::new();
        for (address, assets) in &self.0 {
            for asset in assets {
                if !other.contains(address, asset) {
                    result.put(*address, *asset);
                }
            }
        }
        result
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &BTreeSet<Asset>)> {
        self.0.iter()
    }
}

impl FromIterator<(Address, Asset)> for DiffIndex {
    fn from_iter<I: IntoIterator<Item = (Address, Asset)>>(keys: I) -> Self {
        let mut index = DiffIndex::new();
        for (address, asset) in keys {
            index.put(address, asset);
        }
        index
    }
}
