//! Protocol constants

/// Upper bound on transactions packed into one micro-block
pub const MAX_TRANSACTIONS_PER_MICROBLOCK: usize = 255;

/// Capacity of the forged-transaction id cache in the UTX tracker
pub const MAX_FORGED_TRANSACTIONS: usize = 10_000;
