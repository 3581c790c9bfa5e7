//! Register abstraction layer for hardware verification models.
//!
//! Describes a device's programmable registers as fields with access
//! policies, arranges them in blocks and address maps, and keeps a mirror of
//! the expected hardware state by predicting the effect of every access.

/// Shared enums and configuration for accesses and maps.
pub mod api;
pub use api::{
    parse_address, AccessKind, AccessPath, AccessRights, Addressing, CheckPolicy, Hierarchy,
    MapConfig, PredictKind, ResetKind, Status, DEFAULT_BUS_BYTES,
};

/// Error taxonomy for configuration and operation failures.
pub mod error;
pub use error::{ErrorClass, LayoutError, RalError};

/// Field access policies and their prediction tables.
pub mod policy;
pub use policy::{field_mask, AccessPolicy, ACCESS_POLICY_COUNT};

/// Bit-field model with desired and mirrored values.
pub mod field;
pub use field::{Field, MAX_FIELD_BITS};

/// Registers composed of fields, with front-door operations.
pub mod register;
pub use register::{Register, MAX_REGISTER_BITS};

/// Block hierarchy owning registers and maps.
pub mod block;
pub use block::{Block, FieldRef};

/// Address maps, submaps and transaction orchestration.
pub mod map;
pub use map::{AddressMap, MappedRegister};

/// Adapter, sequencer and predictor contracts.
pub mod bus;
pub use bus::{Adapter, BusItem, BusOperation, Predictor, RegPredictor, Sequencer};

/// Loopback transport for tests and demos.
pub mod sim;

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tokio as _;
