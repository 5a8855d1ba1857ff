// Spindrift common library - main library exports

pub mod balance;
pub mod byte_array;
pub mod fork;
pub mod messages;
pub mod params;
pub mod types;

// Flattened re-exports
pub use self::balance::{BlockchainBalance, DiffIndex};
pub use self::byte_array::{Address, Bytes32, PublicKey, Signature, TxId};
pub use self::fork::{ForkError, WavesFork};
pub use self::types::*;
