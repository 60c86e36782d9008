//! Engine module: duplication lifecycle and destination slots

pub mod duplicator;
pub mod slot;

pub use duplicator::DuplicationEngine;
pub use slot::DestinationSlot;
