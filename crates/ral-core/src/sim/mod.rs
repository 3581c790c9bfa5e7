//! In-memory transport for exercising the register model without a bus.
//!
//! [`SimAdapter`] encodes operations as [`SimItem`]s, [`SimSequencer`]
//! executes them against a shared [`LoopbackDevice`].

mod loopback;

pub use loopback::{LoopbackDevice, SimAdapter, SimItem, SimSequencer};
