//! Tracker status and the updates each chain event produces

use serde::{Deserialize, Serialize};
use spindrift_common::messages::ChainEventMessage;
use spindrift_common::{BlockchainBalance, DiffIndex, WavesFork};
use std::collections::VecDeque;

/// The tracker's view of the local chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Status {
    /// Following the main fork tip to tip
    Normal {
        main_fork: WavesFork,
        current_height_hint: u32,
    },

    /// A rollback happened and the replacement fork is still being rebuilt
    /// The previous fork's height and key set are kept so the missing
    /// balances can be requested once the new fork catches up
    TransientRollback {
        new_fork: WavesFork,
        new_fork_changes: BlockchainBalance,
        previous_fork_height: u32,
        previous_fork_diff_index: DiffIndex,
    },

    /// Caught up after a rollback, waiting for authoritative balances
    /// Events arriving meanwhile are stashed and replayed in order
    TransientResolving {
        main_fork: WavesFork,
        stash: VecDeque<ChainEventMessage>,
        current_height_hint: u32,
    },
}

impl Default for Status {
    fn default() -> Self {
        Status::Normal {
            main_fork: WavesFork::new(),
            current_height_hint: 0,
        }
    }
}

impl Status {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Status::Normal { .. } => "Normal",
            Status::TransientRollback { .. } => "TransientRollback",
            Status::TransientResolving { .. } => "TransientResolving",
        }
    }

    /// Height of the fork currently tracked
    pub fn fork_height(&self) -> u32 {
        match self {
            Status::Normal { main_fork, .. } => main_fork.height(),
            Status::TransientRollback { new_fork, .. } => new_fork.height(),
            Status::TransientResolving { main_fork, .. } => main_fork.height(),
        }
    }
}

/// Change of the last-block-height indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastBlockHeight {
    NotChanged,
    Updated(u32),
    RestartRequired(u32),
}

impl LastBlockHeight {
    /// Later observations win, except that nothing masks a pending restart
    pub fn combine(self, later: LastBlockHeight) -> LastBlockHeight {
        match (self, later) {
            (earlier, LastBlockHeight::NotChanged) => earlier,
            (LastBlockHeight::RestartRequired(height), LastBlockHeight::Updated(_)) => {
                LastBlockHeight::RestartRequired(height)
            }
            (_, later) => later,
        }
    }
}

/// Everything one event application tells the outside world
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub new_status: Status,
    pub updated_balances: BlockchainBalance,
    pub requested_balances: DiffIndex,
    pub updated_last_block_height: LastBlockHeight,
}

impl StatusUpdate {
    /// An update that only moves the status
    pub fn status_only(new_status: Status) -> Self {
        Self {
            new_status,
            updated_balances: BlockchainBalance::new(),
            requested_balances: DiffIndex::new(),
            updated_last_block_height: LastBlockHeight::NotChanged,
        }
    }

    /// Fold a later update into this one: the later status wins, balances
    /// merge through the group, requested keys union
    pub fn combine(mut self, later: StatusUpdate) -> StatusUpdate {
        self.updated_balances += &later.updated_balances;
        self.requested_balances.merge(&later.requested_balances);
        StatusUpdate {
            new_status: later.new_status,
            updated_balances: self.updated_balances,
            requested_balances: self.requested_balances,
            updated_last_block_height: self
                .updated_last_block_height
                .combine(later.updated_last_block_height),
        }
    }
}
