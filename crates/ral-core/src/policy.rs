//! Field access policies and their write/read side-effect tables.
//!
//! Every policy is a pair of behaviours: what a write does to the stored
//! bits, and what a read does to them afterwards. Both halves are pure
//! functions of the current value, the written value and the field mask, so
//! they are shared by mirror prediction and by desired-value updates.
//!
//! | Policy | write(cur, wr) | read |
//! | ------ | -------------- | ---- |
//! | `RO`, `RC`, `RS`, `NOACCESS` | `cur` | `RC` clears, `RS` sets, others unaffected |
//! | `RW`, `WRC`, `WRS`, `WO` | `wr` | `RW` unaffected, `WRC` clears, `WRS` sets, `WO` reset |
//! | `WC`, `WCRS`, `WOC` | `0` | `WCRS` sets, others reset |
//! | `WS`, `WSRC`, `WOS` | `mask` | `WSRC` clears, others reset |
//! | `W1C`, `W1CRS` | `cur & !wr` | `W1CRS` sets, `W1C` reset |
//! | `W1S`, `W1SRC` | `cur \| wr` | `W1SRC` clears, `W1S` reset |
//! | `W1T` | `cur ^ wr` | reset |
//! | `W0C`, `W0CRS` | `cur & wr` | `W0CRS` sets, `W0C` reset |
//! | `W0S`, `W0SRC` | `cur \| !wr` | `W0SRC` clears, `W0S` reset |
//! | `W0T` | `cur ^ !wr` | reset |
//! | `W1`, `WO1` | `wr` once, then `cur` | reset |

use std::fmt;
use std::str::FromStr;

use crate::RalError;

/// Number of supported access policies.
pub const ACCESS_POLICY_COUNT: usize = 26;

/// Hardware-defined access policy of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessPolicy {
    /// Read-only; writes have no effect.
    Ro,
    /// Read-write.
    #[default]
    Rw,
    /// Read clears all bits.
    Rc,
    /// Read sets all bits.
    Rs,
    /// Write stores the value; read clears.
    Wrc,
    /// Write stores the value; read sets.
    Wrs,
    /// Write clears all bits.
    Wc,
    /// Write sets all bits.
    Ws,
    /// Write sets all bits; read clears.
    Wsrc,
    /// Write clears all bits; read sets.
    Wcrs,
    /// Write 1 to clear.
    W1c,
    /// Write 1 to set.
    W1s,
    /// Write 1 to toggle.
    W1t,
    /// Write 0 to clear.
    W0c,
    /// Write 0 to set.
    W0s,
    /// Write 0 to toggle.
    W0t,
    /// Write 1 to set; read clears.
    W1src,
    /// Write 1 to clear; read sets.
    W1crs,
    /// Write 0 to set; read clears.
    W0src,
    /// Write 0 to clear; read sets.
    W0crs,
    /// Write-only.
    Wo,
    /// Write-only; write clears.
    Woc,
    /// Write-only; write sets.
    Wos,
    /// First write after reset stores the value; later writes are ignored.
    W1,
    /// Write-only variant of [`AccessPolicy::W1`].
    Wo1,
    /// Neither readable nor writable.
    NoAccess,
}

impl AccessPolicy {
    /// Every policy, in table order.
    pub const ALL: [Self; ACCESS_POLICY_COUNT] = [
        Self::Ro,
        Self::Rw,
        Self::Rc,
        Self::Rs,
        Self::Wrc,
        Self::Wrs,
        Self::Wc,
        Self::Ws,
        Self::Wsrc,
        Self::Wcrs,
        Self::W1c,
        Self::W1s,
        Self::W1t,
        Self::W0c,
        Self::W0s,
        Self::W0t,
        Self::W1src,
        Self::W1crs,
        Self::W0src,
        Self::W0crs,
        Self::Wo,
        Self::Woc,
        Self::Wos,
        Self::W1,
        Self::Wo1,
        Self::NoAccess,
    ];

    /// Canonical upper-case mnemonic.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ro => "RO",
            Self::Rw => "RW",
            Self::Rc => "RC",
            Self::Rs => "RS",
            Self::Wrc => "WRC",
            Self::Wrs => "WRS",
            Self::Wc => "WC",
            Self::Ws => "WS",
            Self::Wsrc => "WSRC",
            Self::Wcrs => "WCRS",
            Self::W1c => "W1C",
            Self::W1s => "W1S",
            Self::W1t => "W1T",
            Self::W0c => "W0C",
            Self::W0s => "W0S",
            Self::W0t => "W0T",
            Self::W1src => "W1SRC",
            Self::W1crs => "W1CRS",
            Self::W0src => "W0SRC",
            Self::W0crs => "W0CRS",
            Self::Wo => "WO",
            Self::Woc => "WOC",
            Self::Wos => "WOS",
            Self::W1 => "W1",
            Self::Wo1 => "WO1",
            Self::NoAccess => "NOACCESS",
        }
    }

    /// Value stored after writing `written` over `current`.
    ///
    /// `written_before` is only consulted by the one-shot `W1`/`WO1`
    /// policies. Inputs are expected to be masked already; the result is
    /// masked again so it always fits the field.
    #[must_use]
    pub const fn predict_write(
        self,
        current: u64,
        written: u64,
        mask: u64,
        written_before: bool,
    ) -> u64 {
        let next = match self {
            Self::Ro | Self::Rc | Self::Rs | Self::NoAccess => current,
            Self::Rw | Self::Wrc | Self::Wrs | Self::Wo => written,
            Self::Wc | Self::Wcrs | Self::Woc => 0,
            Self::Ws | Self::Wsrc | Self::Wos => mask,
            Self::W1c | Self::W1crs => current & !written,
            Self::W1s | Self::W1src => current | written,
            Self::W1t => current ^ written,
            Self::W0c | Self::W0crs => current & written,
            Self::W0s | Self::W0src => current | (!written & mask),
            Self::W0t => current ^ (!written & mask),
            Self::W1 | Self::Wo1 => {
                if written_before {
                    current
                } else {
                    written
                }
            }
        };
        next & mask
    }

    /// Value the field holds after being read, or `None` when reading leaves
    /// it untouched.
    ///
    /// The write-only family reads back as the reset value.
    #[must_use]
    pub const fn predict_read(self, mask: u64, reset: u64) -> Option<u64> {
        match self {
            Self::Ro | Self::Rw | Self::NoAccess => None,
            Self::Rc | Self::Wrc | Self::Wsrc | Self::W1src | Self::W0src => Some(0),
            Self::Rs | Self::Wrs | Self::Wcrs | Self::W1crs | Self::W0crs => Some(mask),
            Self::Wo
            | Self::Wc
            | Self::Woc
            | Self::Ws
            | Self::Wos
            | Self::W1c
            | Self::W1s
            | Self::W1t
            | Self::W0c
            | Self::W0s
            | Self::W0t
            | Self::W1
            | Self::Wo1 => Some(reset),
        }
    }

    /// Policies whose front-door writes fault when write errors are enabled.
    #[must_use]
    pub const fn faults_on_write(self) -> bool {
        matches!(self, Self::Ro | Self::Rw | Self::Rc | Self::Rs)
    }

    /// Policies whose front-door reads fault when read errors are enabled.
    #[must_use]
    pub const fn faults_on_read(self) -> bool {
        matches!(
            self,
            Self::Wo
                | Self::Woc
                | Self::Wos
                | Self::Wo1
                | Self::NoAccess
                | Self::W1
                | Self::W1t
                | Self::W0t
                | Self::Wc
                | Self::Ws
                | Self::W1c
                | Self::W1s
                | Self::W0c
                | Self::W0s
        )
    }

    /// Returns `true` when software can observe the stored bits.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        !matches!(
            self,
            Self::Wo | Self::Woc | Self::Wos | Self::Wo1 | Self::NoAccess
        )
    }

    /// Returns `true` when software writes can change the stored bits.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        !matches!(self, Self::Ro | Self::Rc | Self::Rs | Self::NoAccess)
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessPolicy {
    type Err = RalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|policy| policy.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| RalError::UnknownAccessPolicy(s.to_owned()))
    }
}

/// Bit mask covering `size` low-order bits.
#[must_use]
pub const fn field_mask(size: u32) -> u64 {
    if size >= u64::BITS {
        u64::MAX
    } else {
        (1_u64 << size) - 1
    }
}
