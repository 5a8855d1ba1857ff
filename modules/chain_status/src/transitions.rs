//! The status transition function
//! Total over every (status, event) pair: unknown combinations log and leave
//! the status unchanged, append failures force a rollback with a restart
//! directive, and nothing in here returns an error

use crate::status::{LastBlockHeight, Status, StatusUpdate};
use spindrift_common::messages::ChainEventMessage;
use spindrift_common::{BlockchainBalance, BlockType, DiffIndex, WavesFork};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Apply one chain event to the current status
pub fn apply(status: Status, event: &ChainEventMessage) -> StatusUpdate {
    match status {
        Status::Normal {
            main_fork,
            current_height_hint,
        } => apply_normal(main_fork, current_height_hint, event),

        Status::TransientRollback {
            new_fork,
            new_fork_changes,
            previous_fork_height,
            previous_fork_diff_index,
        } => apply_rollback(
            new_fork,
            new_fork_changes,
            previous_fork_height,
            previous_fork_diff_index,
            event,
        ),

        Status::TransientResolving {
            main_fork,
            stash,
            current_height_hint,
        } => apply_resolving(main_fork, stash, current_height_hint, event),
    }
}

fn apply_normal(main_fork: WavesFork, hint: u32, event: &ChainEventMessage) -> StatusUpdate {
    match event {
        ChainEventMessage::Appended { block } => match main_fork.with_block(block) {
            Ok(fork) => StatusUpdate {
                new_status: Status::Normal {
                    main_fork: fork,
                    current_height_hint: block.height(),
                },
                updated_balances: block.changes.clone(),
                requested_balances: DiffIndex::new(),
                updated_last_block_height: match block.tpe {
                    BlockType::Block => LastBlockHeight::Updated(block.height()),
                    BlockType::MicroBlock => LastBlockHeight::NotChanged,
                },
            },

            Err(error) => {
                warn!(block = %block.block_ref, %error, "Fork divergence, forcing rollback");
                let previous_index = main_fork.diff_index();
                let (fork, _) = main_fork.drop_tip();
                StatusUpdate {
                    updated_last_block_height: LastBlockHeight::RestartRequired(
                        hint.saturating_sub(1),
                    ),
                    ..StatusUpdate::status_only(Status::TransientRollback {
                        new_fork: fork,
                        new_fork_changes: BlockchainBalance::new(),
                        previous_fork_height: hint,
                        previous_fork_diff_index: previous_index,
                    })
                }
            }
        },

        ChainEventMessage::RolledBackTo { reference } => {
            let (fork, dropped) = main_fork.drop_after(reference);
            StatusUpdate::status_only(Status::TransientRollback {
                new_fork: fork,
                new_fork_changes: BlockchainBalance::new(),
                previous_fork_height: hint,
                previous_fork_diff_index: dropped.diff_index(),
            })
        }

        ChainEventMessage::SyncFailed { height } => {
            let (fork, dropped) = main_fork.drop_from(*height);
            StatusUpdate::status_only(Status::TransientRollback {
                new_fork: fork,
                new_fork_changes: BlockchainBalance::new(),
                previous_fork_height: hint,
                previous_fork_diff_index: dropped.diff_index(),
            })
        }

        other => {
            debug!(event = ?other, "Ignored in Normal");
            StatusUpdate::status_only(Status::Normal {
                main_fork,
                current_height_hint: hint,
            })
        }
    }
}

fn apply_rollback(
    new_fork: WavesFork,
    new_fork_changes: BlockchainBalance,
    previous_fork_height: u32,
    previous_fork_diff_index: DiffIndex,
    event: &ChainEventMessage,
) -> StatusUpdate {
    match event {
        ChainEventMessage::Appended { block } => match new_fork.with_block(block) {
            Ok(fork) => {
                let mut changes = new_fork_changes;
                changes += &block.changes;
                match block.tpe {
                    // Still rebuilding - nothing is published until a
                    // micro-block shows the new fork has caught up
                    BlockType::Block => StatusUpdate::status_only(Status::TransientRollback {
                        new_fork: fork,
                        new_fork_changes: changes,
                        previous_fork_height,
                        previous_fork_diff_index,
                    }),

                    // A micro-block means we are at the tip again: publish
                    // what the new fork changed and ask the source of truth
                    // for whatever the old fork touched that we have not
                    // re-observed
                    BlockType::MicroBlock => {
                        let requested =
                            previous_fork_diff_index.difference(&changes.diff_index());
                        StatusUpdate {
                            new_status: Status::TransientResolving {
                                main_fork: fork,
                                stash: VecDeque::new(),
                                current_height_hint: block.height(),
                            },
                            updated_balances: changes,
                            requested_balances: requested,
                            updated_last_block_height: LastBlockHeight::NotChanged,
                        }
                    }
                }
            }

            Err(error) => {
                warn!(block = %block.block_ref, %error, "Replacement fork diverged, resetting");
                StatusUpdate {
                    updated_last_block_height: LastBlockHeight::RestartRequired(
                        previous_fork_height.saturating_sub(1).max(1),
                    ),
                    ..StatusUpdate::status_only(Status::TransientRollback {
                        new_fork: WavesFork::new(),
                        new_fork_changes: BlockchainBalance::new(),
                        previous_fork_height,
                        previous_fork_diff_index,
                    })
                }
            }
        },

        ChainEventMessage::RolledBackTo { reference } => {
            let (fork, dropped) = new_fork.drop_after(reference);
            rolled_back_further(
                fork,
                dropped,
                new_fork_changes,
                previous_fork_height,
                previous_fork_diff_index,
            )
        }

        ChainEventMessage::SyncFailed { height } => {
            let (fork, dropped) = new_fork.drop_from(*height);
            rolled_back_further(
                fork,
                dropped,
                new_fork_changes,
                previous_fork_height,
                previous_fork_diff_index,
            )
        }

        other => {
            debug!(event = ?other, "Ignored in TransientRollback");
            StatusUpdate::status_only(Status::TransientRollback {
                new_fork,
                new_fork_changes,
                previous_fork_height,
                previous_fork_diff_index,
            })
        }
    }
}

/// A further rollback while already rebuilding: unwind the dropped changes
/// and remember their keys so they are re-requested at resolve time
fn rolled_back_further(
    fork: WavesFork,
    dropped: BlockchainBalance,
    new_fork_changes: BlockchainBalance,
    previous_fork_height: u32,
    previous_fork_diff_index: DiffIndex,
) -> StatusUpdate {
    let mut changes = new_fork_changes;
    changes -= &dropped;
    let mut index = previous_fork_diff_index;
    index.merge(&dropped.diff_index());
    StatusUpdate::status_only(Status::TransientRollback {
        new_fork: fork,
        new_fork_changes: changes,
        previous_fork_height,
        previous_fork_diff_index: index,
    })
}

fn apply_resolving(
    main_fork: WavesFork,
    mut stash: VecDeque<ChainEventMessage>,
    hint: u32,
    event: &ChainEventMessage,
) -> StatusUpdate {
    match event {
        ChainEventMessage::DataReceived { updates } => {
            let seed = StatusUpdate {
                new_status: Status::Normal {
                    main_fork,
                    current_height_hint: hint,
                },
                updated_balances: updates.clone(),
                requested_balances: DiffIndex::new(),
                updated_last_block_height: LastBlockHeight::NotChanged,
            };

            // Replay the stash in arrival order, folding the updates
            stash.into_iter().fold(seed, |update, stashed| {
                let status = update.new_status.clone();
                update.combine(apply(status, &stashed))
            })
        }

        other => {
            debug!(event = ?other, "Stashed while resolving");
            stash.push_back(other.clone());
            StatusUpdate::status_only(Status::TransientResolving {
                main_fork,
                stash,
                current_height_hint: hint,
            })
        }
    }
}
