//! Spindrift message bus - in-process topic plumbing shared by all modules

pub mod bus;
pub mod clock;
pub mod context;
pub mod module;

// Flattened re-exports
pub use self::bus::{MessageBus, Subscription, DEFAULT_CHANNEL_CAPACITY};
pub use self::clock::{Clock, ClockTickMessage};
pub use self::context::Context;
pub use self::module::{module_config, Module, Process};

use std::fmt::Debug;

/// Bounds required of the process-wide message enum
pub trait MessageBounds: Clone + Send + Sync + Debug + 'static {}
impl<T: Clone + Send + Sync + Debug + 'static> MessageBounds for T {}
