//! Bit-field state machine: mirrored/desired tracking under an access policy.

use tracing::{trace, warn};

use crate::policy::field_mask;
use crate::{AccessKind, AccessPath, AccessPolicy, PredictKind, RalError, ResetKind, Status};

/// Widest supported field, in bits.
pub const MAX_FIELD_BITS: u32 = u64::BITS;

/// A named bit range inside a register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    size: u32,
    lsb: u32,
    policy: AccessPolicy,
    volatile: bool,
    reset: u64,
    mirrored: u64,
    desired: u64,
    written: bool,
    error_on_read: bool,
    error_on_write: bool,
    response: Status,
    configured: bool,
}

impl Field {
    /// Creates an unconfigured field.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            lsb: 0,
            policy: AccessPolicy::Rw,
            volatile: false,
            reset: 0,
            mirrored: 0,
            desired: 0,
            written: false,
            error_on_read: false,
            error_on_write: false,
            response: Status::Pass,
            configured: false,
        }
    }

    /// Creates and configures a field in one step.
    ///
    /// # Errors
    ///
    /// See [`Field::configure`].
    pub fn configured(
        name: impl Into<String>,
        size: u32,
        lsb: u32,
        policy: AccessPolicy,
        volatile: bool,
        reset: u64,
    ) -> Result<Self, RalError> {
        let mut field = Self::new(name);
        field.configure(size, lsb, policy, volatile, reset)?;
        Ok(field)
    }

    /// Sets the layout and policy, loads the reset value and locks the field.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::FieldLocked`] when already configured,
    /// [`RalError::InvalidFieldSize`] when `size` is outside `1..=64`,
    /// [`RalError::InvalidFieldPosition`] when the field would end past
    /// bit 63, and [`RalError::ResetValueOutOfRange`] when `reset` does not
    /// fit.
    pub fn configure(
        &mut self,
        size: u32,
        lsb: u32,
        policy: AccessPolicy,
        volatile: bool,
        reset: u64,
    ) -> Result<(), RalError> {
        if self.configured {
            return Err(RalError::FieldLocked {
                field: self.name.clone(),
            });
        }
        if size == 0 || size > MAX_FIELD_BITS {
            return Err(RalError::InvalidFieldSize {
                field: self.name.clone(),
                size,
            });
        }
        if u64::from(lsb) + u64::from(size) > u64::from(MAX_FIELD_BITS) {
            return Err(RalError::InvalidFieldPosition {
                field: self.name.clone(),
                lsb,
                size,
            });
        }
        if reset & !field_mask(size) != 0 {
            return Err(RalError::ResetValueOutOfRange {
                field: self.name.clone(),
                reset,
                size,
            });
        }

        self.size = size;
        self.lsb = lsb;
        self.policy = policy;
        self.volatile = volatile;
        self.reset = reset;
        self.mirrored = reset;
        self.desired = reset;
        self.written = false;
        self.configured = true;
        Ok(())
    }

    /// Allows the next [`Field::configure`] call to succeed.
    pub fn unlock(&mut self) {
        self.configured = false;
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width in bits.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Bit position of the field LSB inside its register.
    #[must_use]
    pub const fn lsb_pos(&self) -> u32 {
        self.lsb
    }

    /// Bit position of the field MSB inside its register.
    #[must_use]
    pub const fn msb_pos(&self) -> u32 {
        self.lsb + self.size.saturating_sub(1)
    }

    /// Access policy.
    #[must_use]
    pub const fn access(&self) -> AccessPolicy {
        self.policy
    }

    /// Returns `true` when hardware may change the field on its own.
    #[must_use]
    pub const fn is_volatile(&self) -> bool {
        self.volatile
    }

    /// Returns `true` once [`Field::configure`] has succeeded.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.configured
    }

    /// Reset value.
    #[must_use]
    pub const fn reset_value(&self) -> u64 {
        self.reset
    }

    /// Mask of the bits this field can hold.
    #[must_use]
    pub const fn mask(&self) -> u64 {
        field_mask(self.size)
    }

    /// Current belief about the hardware value.
    #[must_use]
    pub const fn get_mirrored_value(&self) -> u64 {
        self.mirrored
    }

    /// Value the next write will carry.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.desired
    }

    /// Returns `true` once a write has been predicted since the last reset.
    #[must_use]
    pub const fn has_been_written(&self) -> bool {
        self.written
    }

    /// Response recorded by the last [`Field::predict_response`].
    #[must_use]
    pub const fn response(&self) -> Status {
        self.response
    }

    /// Enables simulated errors on illegal front-door reads.
    pub fn set_throw_error_on_read(&mut self, enabled: bool) {
        self.error_on_read = enabled;
    }

    /// Enables simulated errors on illegal front-door writes.
    pub fn set_throw_error_on_write(&mut self, enabled: bool) {
        self.error_on_write = enabled;
    }

    /// Whether simulated read errors are enabled.
    #[must_use]
    pub const fn throws_error_on_read(&self) -> bool {
        self.error_on_read
    }

    /// Whether simulated write errors are enabled.
    #[must_use]
    pub const fn throws_error_on_write(&self) -> bool {
        self.error_on_write
    }

    /// Restores the reset value into mirror and desired value.
    pub fn reset(&mut self, kind: ResetKind) {
        trace!(field = %self.name, ?kind, reset = self.reset, "field reset");
        self.mirrored = self.reset;
        self.desired = self.reset;
        self.written = false;
        self.response = Status::Pass;
    }

    /// Updates the desired value as a write of `value` would.
    pub fn set(&mut self, value: u64) {
        let mask = self.mask();
        if value & !mask != 0 {
            warn!(
                field = %self.name,
                value,
                size = self.size,
                "value truncated to field width"
            );
        }
        self.desired = self
            .policy
            .predict_write(self.desired, value & mask, mask, self.written);
    }

    /// Write half of the policy table applied to `current`.
    #[must_use]
    pub const fn predict_write(&self, current: u64, written: u64) -> u64 {
        let mask = self.mask();
        self.policy
            .predict_write(current & mask, written & mask, mask, self.written)
    }

    /// Read half of the policy table; `None` leaves the mirror untouched.
    #[must_use]
    pub const fn predict_read(&self) -> Option<u64> {
        self.policy.predict_read(self.mask(), self.reset)
    }

    /// Resolves and records the response to an access on `path`.
    pub fn predict_response(&mut self, path: AccessPath, direction: AccessKind) -> Status {
        let illegal = matches!(path, AccessPath::FrontDoor)
            && match direction {
                AccessKind::Write => self.policy.faults_on_write() && self.error_on_write,
                AccessKind::Read => self.policy.faults_on_read() && self.error_on_read,
            };
        self.response = if illegal { Status::Error } else { Status::Pass };
        self.response
    }

    /// Updates the mirror for an observed or requested access.
    ///
    /// `value` is field-relative. `byte_enable` is register-relative: when
    /// none of the byte lanes covering this field are enabled the field is
    /// left untouched.
    pub fn do_predict(
        &mut self,
        value: u64,
        kind: PredictKind,
        path: AccessPath,
        byte_enable: u64,
    ) -> Status {
        let status = match kind.direction() {
            Some(direction) => self.predict_response(path, direction),
            None => {
                self.response = Status::Pass;
                Status::Pass
            }
        };

        if !self.byte_lanes_enabled(byte_enable) {
            trace!(field = %self.name, byte_enable, "byte lanes disabled");
            return status;
        }

        let mask = self.mask();
        let next = match kind {
            PredictKind::Write => {
                let next = self.predict_write(self.mirrored, value);
                self.written = true;
                next
            }
            PredictKind::Read => self.predict_read().unwrap_or(self.mirrored),
            PredictKind::Direct => value,
        } & mask;

        trace!(
            field = %self.name,
            ?kind,
            from = self.mirrored,
            to = next,
            "field predicted"
        );
        self.mirrored = next;
        self.desired = next;
        status
    }

    /// Field-relative predict with all byte lanes enabled.
    pub fn predict(&mut self, value: u64, kind: PredictKind, path: AccessPath) -> Status {
        self.do_predict(value, kind, path, u64::MAX)
    }

    /// Propagates the owning register's error-injection settings.
    pub(crate) fn inherit_error_flags(&mut self, on_read: bool, on_write: bool) {
        self.error_on_read |= on_read;
        self.error_on_write |= on_write;
    }

    fn byte_lanes_enabled(&self, byte_enable: u64) -> bool {
        let first = self.lsb / 8;
        let last = self.msb_pos() / 8;
        (first..=last).any(|lane| lane < u64::BITS && (byte_enable >> lane) & 1 == 1)
    }
}
