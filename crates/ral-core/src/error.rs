//! Error taxonomy for register-model configuration and front-door operations.

use thiserror::Error;

use crate::AccessPath;

/// Error classes used for reporting and abort policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ErrorClass {
    /// Layout or structural problem detected while building the model.
    Configuration,
    /// Testbench authoring bug detected while issuing an operation.
    Operation,
}

/// Errors raised by model construction and front-door operations.
///
/// Simulated hardware failures are never reported here; they travel through
/// [`crate::Status::Error`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum RalError {
    /// Field was configured twice without an intervening unlock.
    #[error("field `{field}` is already configured")]
    FieldLocked {
        /// Field name.
        field: String,
    },
    /// Field size outside `1..=64` bits.
    #[error("field `{field}` has unsupported size {size}")]
    InvalidFieldSize {
        /// Field name.
        field: String,
        /// Requested size in bits.
        size: u32,
    },
    /// Field extends past the widest supported register.
    #[error("field `{field}` at bit {lsb} with size {size} extends past bit 63")]
    InvalidFieldPosition {
        /// Field name.
        field: String,
        /// Requested LSB position.
        lsb: u32,
        /// Field size in bits.
        size: u32,
    },
    /// Reset value does not fit into the field.
    #[error("reset value {reset:#x} of field `{field}` does not fit in {size} bits")]
    ResetValueOutOfRange {
        /// Field name.
        field: String,
        /// Offending reset value.
        reset: u64,
        /// Field size in bits.
        size: u32,
    },
    /// Register width outside `1..=64` bits.
    #[error("register `{register}` has unsupported width {width}")]
    InvalidRegisterWidth {
        /// Register name.
        register: String,
        /// Requested width in bits.
        width: u32,
    },
    /// Access policy name did not match any known policy.
    #[error("unknown access policy `{0}`")]
    UnknownAccessPolicy(String),
    /// Address string could not be parsed.
    #[error("invalid address literal `{0}`")]
    InvalidAddress(String),
    /// A register, block, map or submap with this name already exists.
    #[error("duplicate name `{name}` in `{scope}`")]
    DuplicateName {
        /// Scope (block or map) where the duplicate was detected.
        scope: String,
        /// Conflicting name.
        name: String,
    },
    /// Two registers in one block share a block-relative address.
    #[error("address {address:#x} is already used in block `{block}`")]
    DuplicateAddress {
        /// Block path.
        block: String,
        /// Conflicting address.
        address: u64,
    },
    /// Register address range collides with an existing mapping.
    #[error("address {address:#x} collides with register `{existing}` in map `{map}`")]
    AddressConflict {
        /// Map name.
        map: String,
        /// Requested address.
        address: u64,
        /// Register already occupying the range.
        existing: String,
    },
    /// Register address breaks the map's alignment rule.
    #[error("address {address:#x} is not aligned to {n_bytes} bytes in map `{map}`")]
    MisalignedAddress {
        /// Map name.
        map: String,
        /// Offending address.
        address: u64,
        /// Bus width in bytes.
        n_bytes: u32,
    },
    /// Register does not belong to the map's block hierarchy.
    #[error("register `{register}` does not belong to the block of map `{map}`")]
    ForeignRegister {
        /// Register full name.
        register: String,
        /// Map name.
        map: String,
    },
    /// Submap belongs to a block outside this map's block hierarchy.
    #[error("submap `{submap}` belongs to a block outside map `{map}`")]
    ForeignSubmap {
        /// Submap name.
        submap: String,
        /// Parent map name.
        map: String,
    },
    /// Submap already has a parent map.
    #[error("submap `{submap}` is already attached to map `{parent}`")]
    SubmapAlreadyParented {
        /// Submap name.
        submap: String,
        /// Existing parent map name.
        parent: String,
    },
    /// Linking the submap would create a cycle.
    #[error("adding submap `{submap}` to `{map}` would create a cycle")]
    SubmapCycle {
        /// Submap name.
        submap: String,
        /// Parent map name.
        map: String,
    },
    /// Structural change attempted on a locked block.
    #[error("block `{0}` is locked")]
    BlockLocked(String),
    /// Read accessor used before the block was locked.
    #[error("block `{0}` is not locked")]
    BlockNotLocked(String),
    /// Access path without an implementation.
    #[error("access path {0} is not implemented")]
    PathNotImplemented(AccessPath),
    /// No adapter reachable from the map.
    #[error("no adapter bound to map `{0}` or its root")]
    AdapterNotBound(String),
    /// No sequencer reachable from the map.
    #[error("no sequencer bound to map `{0}` or its root")]
    SequencerNotBound(String),
    /// Register already has an operation in flight.
    #[error("register `{0}` already has an operation in progress")]
    OperationInProgress(String),
    /// Register is not reachable through the given map.
    #[error("register `{register}` is not mapped in `{map}`")]
    RegisterNotMapped {
        /// Register full name.
        register: String,
        /// Map name.
        map: String,
    },
    /// No register starts at the given address.
    #[error("no register at address {address:#x} in map `{map}`")]
    NoRegisterAtAddress {
        /// Map name.
        map: String,
        /// Looked-up address.
        address: u64,
    },
    /// Adapter received a transport item of a foreign type.
    #[error("adapter received an unexpected transport item type")]
    TransportItemMismatch,
}

impl RalError {
    /// Returns the taxonomy class for this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::PathNotImplemented(_)
            | Self::AdapterNotBound(_)
            | Self::SequencerNotBound(_)
            | Self::OperationInProgress(_)
            | Self::RegisterNotMapped { .. }
            | Self::NoRegisterAtAddress { .. }
            | Self::TransportItemMismatch => ErrorClass::Operation,
            _ => ErrorClass::Configuration,
        }
    }

    /// Errors that abort the current test instead of being inspected.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Operation)
            || matches!(
                self,
                Self::ResetValueOutOfRange { .. }
                    | Self::InvalidFieldSize { .. }
                    | Self::InvalidFieldPosition { .. }
                    | Self::InvalidRegisterWidth { .. }
            )
    }
}

/// Non-fatal field layout violation recorded on a register.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum LayoutError {
    /// Field extends past the register width, or the fields no longer fit.
    #[error("field `{field}` ({lsb}+{size}) does not fit in {width}-bit register")]
    DoesNotFit {
        /// Field name.
        field: String,
        /// Field LSB position.
        lsb: u32,
        /// Field size.
        size: u32,
        /// Register width.
        width: u32,
    },
    /// Field starts at or below the MSB of the previously added field.
    #[error("field `{field}` at bit {lsb} overlaps `{previous}` ending at bit {previous_msb}")]
    Overlap {
        /// Field name.
        field: String,
        /// Field LSB position.
        lsb: u32,
        /// Previously added field.
        previous: String,
        /// MSB of the previously added field.
        previous_msb: u32,
    },
    /// A field with this name is already attached.
    #[error("field `{0}` is already attached")]
    Duplicate(String),
    /// Field was added before `configure` was called.
    #[error("field `{0}` is not configured")]
    Unconfigured(String),
}
