use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use async_trait::async_trait;
use tracing::trace;

use crate::policy::field_mask;
use crate::{AccessKind, Adapter, BusItem, BusOperation, RalError, Sequencer, Status};

#[derive(Debug, Default)]
struct DeviceState {
    storage: BTreeMap<u64, u64>,
    faults: BTreeSet<u64>,
    log: Vec<SimItem>,
}

/// Sparse word store standing in for a device on the bus.
///
/// Unwritten addresses read as zero. Addresses marked with
/// [`LoopbackDevice::fail_at`] complete every access with an error.
#[derive(Debug, Default)]
pub struct LoopbackDevice {
    state: RefCell<DeviceState>,
}

impl LoopbackDevice {
    /// Returns the stored word, if anything was written at `addr`.
    #[must_use]
    pub fn peek(&self, addr: u64) -> Option<u64> {
        self.state.borrow().storage.get(&addr).copied()
    }

    /// Stores `value` at `addr` without a bus transaction.
    pub fn poke(&self, addr: u64, value: u64) {
        self.state.borrow_mut().storage.insert(addr, value);
    }

    /// Makes every later access to `addr` fail.
    pub fn fail_at(&self, addr: u64) {
        self.state.borrow_mut().faults.insert(addr);
    }

    /// Items executed so far, oldest first.
    #[must_use]
    pub fn transactions(&self) -> Vec<SimItem> {
        self.state.borrow().log.clone()
    }

    fn execute(&self, item: &mut SimItem) {
        let mut state = self.state.borrow_mut();
        if state.faults.contains(&item.addr) {
            item.ok = false;
        } else {
            item.ok = true;
            let lanes = lane_mask(item.byte_enable) & field_mask(item.n_bits);
            let stored = state.storage.get(&item.addr).copied().unwrap_or(0);
            match item.kind {
                AccessKind::Write => {
                    let merged = (stored & !lanes) | (item.data & lanes);
                    state.storage.insert(item.addr, merged);
                }
                AccessKind::Read => item.data = stored & field_mask(item.n_bits),
            }
        }
        trace!(
            kind = ?item.kind,
            addr = item.addr,
            data = item.data,
            ok = item.ok,
            "loopback access"
        );
        state.log.push(item.clone());
    }
}

fn lane_mask(byte_enable: u64) -> u64 {
    (0..8)
        .filter(|lane| byte_enable & (1 << lane) != 0)
        .fold(0, |mask, lane| mask | (0xFF << (lane * 8)))
}

/// Transaction item understood by [`SimSequencer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimItem {
    /// Direction.
    pub kind: AccessKind,
    /// Root address.
    pub addr: u64,
    /// Write data, or read data once executed.
    pub data: u64,
    /// Data width in bits.
    pub n_bits: u32,
    /// Byte-lane enables.
    pub byte_enable: u64,
    /// Whether the device accepted the access.
    pub ok: bool,
}

/// Adapter between [`BusOperation`]s and [`SimItem`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimAdapter;

impl Adapter for SimAdapter {
    fn reg2bus(&self, op: &BusOperation) -> BusItem {
        Box::new(SimItem {
            kind: op.kind,
            addr: op.addr,
            data: op.data,
            n_bits: op.n_bits,
            byte_enable: op.byte_enable,
            ok: false,
        })
    }

    fn bus2reg(&self, item: &dyn Any, op: &mut BusOperation) -> Result<(), RalError> {
        let item = item
            .downcast_ref::<SimItem>()
            .ok_or(RalError::TransportItemMismatch)?;
        op.status = if item.ok { Status::Pass } else { Status::Error };
        if op.kind == AccessKind::Read {
            op.data = item.data;
        }
        Ok(())
    }
}

/// Sequencer that executes items immediately against a [`LoopbackDevice`].
#[derive(Debug, Clone)]
pub struct SimSequencer {
    device: Rc<LoopbackDevice>,
}

impl SimSequencer {
    /// Creates a sequencer driving `device`.
    #[must_use]
    pub const fn new(device: Rc<LoopbackDevice>) -> Self {
        Self { device }
    }

    /// Device behind this sequencer.
    #[must_use]
    pub const fn device(&self) -> &Rc<LoopbackDevice> {
        &self.device
    }
}

#[async_trait(?Send)]
impl Sequencer for SimSequencer {
    async fn start_item(&self, _item: &mut BusItem) {}

    async fn finish_item(&self, item: &mut BusItem) {
        if let Some(item) = item.downcast_mut::<SimItem>() {
            self.device.execute(item);
        }
    }
}
