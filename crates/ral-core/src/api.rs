//! Shared vocabulary types for register-model operations and configuration.

use std::fmt;

use crate::RalError;

/// Outcome of an access, as the hardware would report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Status {
    /// Access completed normally.
    #[default]
    Pass,
    /// Access was illegal or failed on the bus.
    Error,
}

impl Status {
    /// Returns `true` for [`Status::Pass`].
    #[must_use]
    pub const fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }

    /// Combines two statuses, keeping the first error.
    #[must_use]
    pub const fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Pass, Self::Pass) => Self::Pass,
            _ => Self::Error,
        }
    }
}

/// Route used to reach a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessPath {
    /// Through the simulated bus protocol.
    #[default]
    FrontDoor,
    /// Direct poke into the design. Not implemented.
    BackDoor,
    /// User-supplied front-door sequence. Not implemented.
    UserFrontDoor,
    /// Model-only update originating from a predictor.
    Predict,
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FrontDoor => "FRONTDOOR",
            Self::BackDoor => "BACKDOOR",
            Self::UserFrontDoor => "USER_FRONTDOOR",
            Self::Predict => "PREDICT",
        };
        f.write_str(name)
    }
}

/// Bus direction of an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessKind {
    /// Register read.
    Read,
    /// Register write.
    Write,
}

/// Kind of mirror update requested from the prediction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PredictKind {
    /// Apply the write half of the access policy.
    Write,
    /// Apply the read half of the access policy.
    Read,
    /// Store the supplied value, ignoring the policy.
    Direct,
}

impl PredictKind {
    /// Bus direction this prediction corresponds to, if any.
    #[must_use]
    pub const fn direction(self) -> Option<AccessKind> {
        match self {
            Self::Write => Some(AccessKind::Write),
            Self::Read => Some(AccessKind::Read),
            Self::Direct => None,
        }
    }
}

impl From<AccessKind> for PredictKind {
    fn from(kind: AccessKind) -> Self {
        match kind {
            AccessKind::Read => Self::Read,
            AccessKind::Write => Self::Write,
        }
    }
}

/// Reset flavour applied by `reset` entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ResetKind {
    /// Power-on reset.
    #[default]
    Hard,
    /// Software-initiated reset.
    Soft,
}

/// Whether read data is compared against the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CheckPolicy {
    /// Update the mirror only.
    #[default]
    NoCheck,
    /// Compare observed data with the mirror before updating it.
    Check,
}

/// Traversal depth for block accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Hierarchy {
    /// Include every locked child block.
    #[default]
    Hier,
    /// Only direct members.
    NoHier,
}

/// Rights a map grants on one of its registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessRights {
    /// Readable and writable through this map.
    #[default]
    ReadWrite,
    /// Readable only.
    ReadOnly,
    /// Writable only.
    WriteOnly,
}

impl AccessRights {
    /// Returns `true` when `kind` is permitted.
    #[must_use]
    pub const fn permits(self, kind: AccessKind) -> bool {
        !matches!(
            (self, kind),
            (Self::ReadOnly, AccessKind::Write) | (Self::WriteOnly, AccessKind::Read)
        )
    }
}

/// Address unit of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Addressing {
    /// Each address names one byte; registers align to the bus width.
    #[default]
    Byte,
    /// Each address names one bus word.
    Word,
}

/// Default bus width in bytes.
pub const DEFAULT_BUS_BYTES: u32 = 4;

/// Construction parameters for an address map.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MapConfig {
    /// Base address added to every register offset.
    pub base_addr: u64,
    /// Bus width in bytes.
    pub n_bytes: u32,
    /// Address unit.
    pub addressing: Addressing,
    /// Run the predictor after each completed front-door access.
    pub auto_predict: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            base_addr: 0,
            n_bytes: DEFAULT_BUS_BYTES,
            addressing: Addressing::Byte,
            auto_predict: false,
        }
    }
}

impl MapConfig {
    /// Number of addresses a register of `width_bits` occupies.
    #[must_use]
    pub const fn address_span(&self, width_bits: u32) -> u64 {
        let n_bytes = if self.n_bytes == 0 { 1 } else { self.n_bytes };
        let reg_bytes = width_bits.div_ceil(8);
        let beats = reg_bytes.div_ceil(n_bytes);
        let beats = if beats == 0 { 1 } else { beats };
        match self.addressing {
            Addressing::Byte => beats as u64 * n_bytes as u64,
            Addressing::Word => beats as u64,
        }
    }

    /// Validates `addr` against the alignment rule of this map.
    ///
    /// Byte-addressed maps require registers to start on a bus-word
    /// boundary. Word-addressed maps accept any address.
    #[must_use]
    pub const fn is_aligned(&self, addr: u64) -> bool {
        match self.addressing {
            Addressing::Byte => self.n_bytes == 0 || addr % self.n_bytes as u64 == 0,
            Addressing::Word => true,
        }
    }
}

/// Parses a hexadecimal address literal such as `"0x1F"`, `"1f"` or `"0X_10"`.
///
/// # Errors
///
/// Returns [`RalError::InvalidAddress`] when `text` is empty or contains
/// non-hex digits.
pub fn parse_address(text: &str) -> Result<u64, RalError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .replace('_', "");
    if digits.is_empty() {
        return Err(RalError::InvalidAddress(text.to_owned()));
    }
    u64::from_str_radix(&digits, 16).map_err(|_| RalError::InvalidAddress(text.to_owned()))
}
