//! Transport boundary consumed by address maps.
//!
//! The register model never drives a bus itself. It describes each access
//! as a [`BusOperation`], asks an [`Adapter`] to turn it into a
//! protocol-specific item, pushes that item through a [`Sequencer`], and
//! hands the completed item back to the adapter. A [`Predictor`] then folds
//! the outcome into the mirror.

use std::any::Any;

use async_trait::async_trait;
use tracing::debug;

use crate::{AccessKind, AccessPath, CheckPolicy, PredictKind, RalError, Register, Status};

/// Protocol-specific transaction produced by an [`Adapter`].
pub type BusItem = Box<dyn Any>;

/// Generic description of one register access on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusOperation {
    /// Direction.
    pub kind: AccessKind,
    /// Address as seen from the root map.
    pub addr: u64,
    /// Write data, or read data once the adapter has filled it in.
    pub data: u64,
    /// Number of meaningful data bits.
    pub n_bits: u32,
    /// Byte-lane enables, bit `n` for byte `n`.
    pub byte_enable: u64,
    /// Outcome reported by the adapter.
    pub status: Status,
}

impl BusOperation {
    /// Describes a full-width write.
    #[must_use]
    pub const fn write(addr: u64, data: u64, n_bits: u32) -> Self {
        Self {
            kind: AccessKind::Write,
            addr,
            data,
            n_bits,
            byte_enable: u64::MAX,
            status: Status::Pass,
        }
    }

    /// Describes a full-width read.
    #[must_use]
    pub const fn read(addr: u64, n_bits: u32) -> Self {
        Self {
            kind: AccessKind::Read,
            addr,
            data: 0,
            n_bits,
            byte_enable: u64::MAX,
            status: Status::Pass,
        }
    }
}

/// Converts between [`BusOperation`]s and protocol items.
pub trait Adapter {
    /// Builds the protocol item that carries `op`.
    fn reg2bus(&self, op: &BusOperation) -> BusItem;

    /// Copies the completed item's outcome into `op.status` and `op.data`.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::TransportItemMismatch`] when `item` was not
    /// produced by this adapter.
    fn bus2reg(&self, item: &dyn Any, op: &mut BusOperation) -> Result<(), RalError>;
}

/// Queueing layer that owns access to the physical bus.
#[async_trait(?Send)]
pub trait Sequencer {
    /// Waits for the right to issue `item`.
    async fn start_item(&self, item: &mut BusItem);

    /// Issues `item` and waits until the bus has completed it.
    async fn finish_item(&self, item: &mut BusItem);
}

/// Folds a completed bus operation into the model.
pub trait Predictor {
    /// Updates the mirror of `reg` for `op`, returning the resulting status.
    fn predict(&self, reg: &Register, op: &BusOperation, check: CheckPolicy) -> Status;
}

/// Default predictor: per-field policy prediction on the front-door path.
///
/// A read with [`CheckPolicy::Check`] compares the observed data against
/// the mirror before updating it; a mismatch fails the access.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegPredictor;

impl Predictor for RegPredictor {
    fn predict(&self, reg: &Register, op: &BusOperation, check: CheckPolicy) -> Status {
        let checked = match (op.kind, check) {
            (AccessKind::Read, CheckPolicy::Check) if op.status.is_pass() => {
                if reg.check_mirror(op.data) {
                    Status::Pass
                } else {
                    Status::Error
                }
            }
            _ => Status::Pass,
        };
        let predicted = reg.do_predict(
            op.data,
            PredictKind::from(op.kind),
            AccessPath::FrontDoor,
            op.byte_enable,
        );
        debug!(
            register = %reg.get_full_name(),
            kind = ?op.kind,
            addr = op.addr,
            data = op.data,
            mirrored = reg.get_mirrored_value(),
            "predicted bus operation"
        );
        checked.and(predicted)
    }
}

#[cfg(test)]
mod tests {
    use super::{BusOperation, Predictor, RegPredictor};
    use crate::{AccessKind, AccessPolicy, Block, CheckPolicy, Field, Register, Status};

    fn status_register(block: &mut Block) -> std::rc::Rc<Register> {
        Register::new("ISR", 8)
            .expect("register")
            .configure(block, 0, "isr", |reg| {
                reg.add_field(
                    Field::configured("FLAGS", 8, 0, AccessPolicy::W1c, false, 0xF0)
                        .expect("field"),
                );
            })
            .expect("configured")
    }

    #[test]
    fn write_operation_applies_policy() {
        let mut block = Block::new("top");
        let reg = status_register(&mut block);
        let op = BusOperation::write(0, 0x30, 8);
        assert_eq!(
            RegPredictor.predict(&reg, &op, CheckPolicy::NoCheck),
            Status::Pass
        );
        assert_eq!(reg.get_mirrored_value(), 0xC0);
    }

    #[test]
    fn checked_read_mismatch_fails() {
        let mut block = Block::new("top");
        let reg = status_register(&mut block);
        let mut op = BusOperation::read(0, 8);
        op.data = 0x0F;
        assert_eq!(
            RegPredictor.predict(&reg, &op, CheckPolicy::Check),
            Status::Error
        );
        op.data = 0xF0;
        assert_eq!(
            RegPredictor.predict(&reg, &op, CheckPolicy::Check),
            Status::Pass
        );
        assert_eq!(op.kind, AccessKind::Read);
    }
}
