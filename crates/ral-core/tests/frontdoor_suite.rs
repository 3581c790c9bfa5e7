//! Front-door register operations through bound transports.

#![allow(clippy::pedantic, clippy::nursery)]

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use async_trait::async_trait;
use proptest as _;
use ral_core::sim::{LoopbackDevice, SimAdapter, SimSequencer};
use ral_core::{
    AccessKind, AccessPath, AccessPolicy, AccessRights, Adapter, AddressMap, Block, BusItem,
    BusOperation, CheckPolicy, Field, MapConfig, Predictor, RalError, Register, RegPredictor,
    Sequencer, Status,
};
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

/// Yields to the executor before handing the item to the loopback device.
struct YieldingSequencer {
    inner: SimSequencer,
}

#[async_trait(?Send)]
impl Sequencer for YieldingSequencer {
    async fn start_item(&self, item: &mut BusItem) {
        tokio::task::yield_now().await;
        self.inner.start_item(item).await;
    }

    async fn finish_item(&self, item: &mut BusItem) {
        tokio::task::yield_now().await;
        self.inner.finish_item(item).await;
    }
}

/// Produces items no sequencer or adapter understands.
struct OpaqueAdapter;

impl Adapter for OpaqueAdapter {
    fn reg2bus(&self, _op: &BusOperation) -> BusItem {
        Box::new(())
    }

    fn bus2reg(&self, item: &dyn Any, op: &mut BusOperation) -> Result<(), RalError> {
        SimAdapter.bus2reg(item, op)
    }
}

/// Counts invocations, then defers to the default predictor.
#[derive(Default)]
struct CountingPredictor {
    calls: Cell<usize>,
}

impl Predictor for CountingPredictor {
    fn predict(&self, reg: &Register, op: &BusOperation, check: CheckPolicy) -> Status {
        self.calls.set(self.calls.get() + 1);
        RegPredictor.predict(reg, op, check)
    }
}

struct Soc {
    _top: Block,
    sys: Rc<AddressMap>,
    uart_map: Rc<AddressMap>,
    ctrl: Rc<Register>,
    lsr: Rc<Register>,
    id: Rc<Register>,
    device: Rc<LoopbackDevice>,
}

fn soc(auto_predict: bool) -> Soc {
    let config = MapConfig {
        auto_predict,
        ..MapConfig::default()
    };
    let mut top = Block::new("soc");
    let (lsr, ctrl) = {
        let uart = top.create_block("uart").expect("uart");
        let lsr = Register::new("LSR", 32)
            .expect("register")
            .configure(uart, 0x14, "uart.lsr", |reg| {
                reg.add_field(
                    Field::configured("DR", 1, 0, AccessPolicy::Rc, false, 1).expect("field"),
                );
                reg.add_field(
                    Field::configured("BUSY", 1, 1, AccessPolicy::Ro, true, 0).expect("field"),
                );
            })
            .expect("configured");
        let ctrl = Register::new("CTRL", 32)
            .expect("register")
            .configure(uart, 0x0, "uart.ctrl", |reg| {
                reg.add_field(
                    Field::configured("EN", 1, 0, AccessPolicy::Rw, false, 0).expect("field"),
                );
                reg.add_field(
                    Field::configured("BAUD", 8, 8, AccessPolicy::Rw, false, 0x1A)
                        .expect("field"),
                );
            })
            .expect("configured");
        (lsr, ctrl)
    };

    let sys = top.create_map("sys", config.clone()).expect("sys");
    let uart_map = top.create_map("uart_map", config).expect("uart map");
    uart_map
        .add_reg(&lsr, 0x14, AccessRights::ReadOnly)
        .expect("lsr");
    uart_map
        .add_reg(&ctrl, 0x0, AccessRights::ReadWrite)
        .expect("ctrl");

    let id = Register::new("ID", 16)
        .expect("register")
        .configure(&mut top, 0x0, "id", |reg| {
            reg.add_field(
                Field::configured("REV", 16, 0, AccessPolicy::Ro, false, 0x0102).expect("field"),
            );
        })
        .expect("configured");
    sys.add_reg(&id, 0x0, AccessRights::ReadWrite).expect("id");
    sys.add_submap(&uart_map, 0x1000).expect("submap");

    let device = Rc::new(LoopbackDevice::default());
    sys.set_sequencer(Rc::new(YieldingSequencer {
        inner: SimSequencer::new(Rc::clone(&device)),
    }));
    sys.set_adapter(Rc::new(SimAdapter));
    Soc {
        _top: top,
        sys,
        uart_map,
        ctrl,
        lsr,
        id,
        device,
    }
}

#[tokio::test]
async fn submap_access_uses_root_transport_and_root_address() {
    let soc = soc(true);
    assert!(!soc.uart_map.is_root());
    assert!(Rc::ptr_eq(&soc.uart_map.get_root_map(), &soc.sys));
    assert_eq!(soc.uart_map.get_full_name(), "soc.uart_map");

    let status = soc
        .ctrl
        .write(Some(0x2A01), &soc.uart_map, AccessPath::FrontDoor, CheckPolicy::NoCheck)
        .await
        .expect("write");
    assert_eq!(status, Status::Pass);
    assert_eq!(soc.device.peek(0x1000), Some(0x2A01));
    assert_eq!(soc.ctrl.get_mirrored_value(), 0x2A01);

    soc.device.poke(0x1000, 0x0301);
    let (status, data) = soc
        .ctrl
        .read(&soc.sys, AccessPath::FrontDoor, CheckPolicy::NoCheck)
        .await
        .expect("read");
    assert_eq!((status, data), (Status::Pass, 0x0301));
    // Reading RW fields leaves the mirror alone.
    assert_eq!(soc.ctrl.get_mirrored_value(), 0x2A01);
    assert_eq!(
        soc.device
            .transactions()
            .iter()
            .map(|item| (item.kind, item.addr))
            .collect::<Vec<_>>(),
        [(AccessKind::Write, 0x1000), (AccessKind::Read, 0x1000)]
    );
}

#[tokio::test]
async fn concurrent_operation_on_one_register_is_rejected() {
    let soc = soc(true);
    let (first, second) = tokio::join!(
        soc.ctrl
            .write(Some(1), &soc.uart_map, AccessPath::FrontDoor, CheckPolicy::NoCheck),
        soc.ctrl
            .read(&soc.uart_map, AccessPath::FrontDoor, CheckPolicy::NoCheck),
    );
    assert_eq!(first, Ok(Status::Pass));
    let err = second.expect_err("register busy");
    assert_eq!(err, RalError::OperationInProgress("soc.uart.CTRL".into()));
    assert!(err.is_fatal());
    assert!(!soc.ctrl.is_busy());
}

#[tokio::test]
async fn different_registers_may_run_concurrently() {
    let soc = soc(true);
    let (ctrl, id) = tokio::join!(
        soc.ctrl
            .write(Some(1), &soc.uart_map, AccessPath::FrontDoor, CheckPolicy::NoCheck),
        soc.id
            .read(&soc.sys, AccessPath::FrontDoor, CheckPolicy::NoCheck),
    );
    assert_eq!(ctrl, Ok(Status::Pass));
    assert_eq!(id, Ok((Status::Pass, 0)));
}

#[tokio::test]
async fn read_only_mapping_blocks_writes_without_bus_traffic() {
    let soc = soc(true);
    let status = soc
        .lsr
        .write(Some(0), &soc.uart_map, AccessPath::FrontDoor, CheckPolicy::NoCheck)
        .await
        .expect("write");
    assert_eq!(status, Status::Error);
    assert!(soc.device.transactions().is_empty());
    assert_eq!(soc.lsr.get_mirrored_value(), 0b01);
}

#[tokio::test]
async fn read_clear_field_clears_mirror_after_read() {
    let soc = soc(true);
    soc.device.poke(0x1014, 0b11);
    let (status, data) = soc
        .lsr
        .read(&soc.uart_map, AccessPath::FrontDoor, CheckPolicy::NoCheck)
        .await
        .expect("read");
    assert_eq!((status, data), (Status::Pass, 0b11));
    assert_eq!(soc.lsr.get_mirrored_value() & 0b01, 0);
}

#[tokio::test]
async fn bus_error_forces_read_data_to_zero() {
    let soc = soc(false);
    soc.device.poke(0x0, 0xBEEF);
    soc.device.fail_at(0x0);
    let result = soc
        .id
        .read(&soc.sys, AccessPath::FrontDoor, CheckPolicy::NoCheck)
        .await;
    assert_eq!(result, Ok((Status::Error, 0)));
}

#[tokio::test]
async fn checked_mirror_flags_divergence_on_stable_fields_only() {
    let soc = soc(true);
    soc.device.poke(0x0, 0x0102);
    assert_eq!(
        soc.id
            .mirror(&soc.sys, AccessPath::FrontDoor, CheckPolicy::Check)
            .await,
        Ok(Status::Pass)
    );

    soc.device.poke(0x0, 0x0103);
    assert_eq!(
        soc.id
            .mirror(&soc.sys, AccessPath::FrontDoor, CheckPolicy::Check)
            .await,
        Ok(Status::Error)
    );

    // BUSY is volatile; only DR is compared.
    soc.device.poke(0x1014, 0b11);
    assert_eq!(
        soc.lsr
            .mirror(&soc.uart_map, AccessPath::FrontDoor, CheckPolicy::Check)
            .await,
        Ok(Status::Pass)
    );
}

#[tokio::test]
async fn update_writes_only_when_desired_differs() {
    let soc = soc(true);
    assert_eq!(
        soc.ctrl.update(&soc.uart_map, AccessPath::FrontDoor).await,
        Ok(Status::Pass)
    );
    assert!(soc.device.transactions().is_empty());

    soc.ctrl.set_desired(0x4401);
    assert!(soc.ctrl.needs_update());
    assert_eq!(
        soc.ctrl.update(&soc.uart_map, AccessPath::FrontDoor).await,
        Ok(Status::Pass)
    );
    assert_eq!(soc.device.peek(0x1000), Some(0x4401));
    assert!(!soc.ctrl.needs_update());
}

#[tokio::test]
async fn bound_predictor_replaces_the_default() {
    let soc = soc(true);
    let predictor = Rc::new(CountingPredictor::default());
    soc.uart_map.set_predictor(Rc::clone(&predictor) as Rc<dyn Predictor>);
    soc.ctrl
        .write(Some(1), &soc.uart_map, AccessPath::FrontDoor, CheckPolicy::NoCheck)
        .await
        .expect("write");
    soc.ctrl
        .read(&soc.uart_map, AccessPath::FrontDoor, CheckPolicy::NoCheck)
        .await
        .expect("read");
    assert_eq!(predictor.calls.get(), 2);

    soc.uart_map.set_auto_predict(false);
    soc.ctrl
        .write(Some(0), &soc.uart_map, AccessPath::FrontDoor, CheckPolicy::NoCheck)
        .await
        .expect("write");
    assert_eq!(predictor.calls.get(), 2);
    assert_eq!(soc.ctrl.get_mirrored_value(), 1);
}

#[tokio::test]
async fn predictor_bound_on_the_root_covers_submap_traffic() {
    let soc = soc(true);
    let predictor = Rc::new(CountingPredictor::default());
    soc.sys.set_predictor(Rc::clone(&predictor) as Rc<dyn Predictor>);
    soc.ctrl
        .write(Some(1), &soc.uart_map, AccessPath::FrontDoor, CheckPolicy::NoCheck)
        .await
        .expect("write");
    assert_eq!(predictor.calls.get(), 1);
    assert_eq!(soc.ctrl.get_mirrored_value(), 1);
}

#[tokio::test]
async fn injected_write_error_surfaces_in_status() {
    let soc = soc(true);
    soc.id
        .field_mut("REV")
        .expect("field")
        .set_throw_error_on_write(true);
    let status = soc
        .id
        .write(Some(0xFFFF), &soc.sys, AccessPath::FrontDoor, CheckPolicy::NoCheck)
        .await
        .expect("write");
    assert_eq!(status, Status::Error);
    assert_eq!(soc.id.get_mirrored_value(), 0x0102);
}

#[tokio::test]
async fn operation_errors_are_fatal() {
    let soc = soc(true);
    assert_eq!(
        soc.ctrl
            .write(Some(0), &soc.uart_map, AccessPath::BackDoor, CheckPolicy::NoCheck)
            .await,
        Err(RalError::PathNotImplemented(AccessPath::BackDoor))
    );
    assert!(!soc.ctrl.is_busy());

    let err = soc
        .id
        .read(&soc.uart_map, AccessPath::FrontDoor, CheckPolicy::NoCheck)
        .await
        .expect_err("id is not in the uart map");
    assert!(matches!(err, RalError::RegisterNotMapped { .. }));

    let mut lone = Block::new("lone");
    let map = lone.create_map("bus", MapConfig::default()).expect("map");
    let reg = Register::new("R", 32)
        .expect("register")
        .configure(&mut lone, 0, "r", |_| {})
        .expect("configured");
    map.add_reg(&reg, 0, AccessRights::ReadWrite).expect("mapped");
    assert_eq!(
        reg.write(Some(0), &map, AccessPath::FrontDoor, CheckPolicy::NoCheck)
            .await,
        Err(RalError::SequencerNotBound("bus".into()))
    );
    map.set_sequencer(Rc::new(SimSequencer::new(Rc::new(LoopbackDevice::default()))));
    assert_eq!(
        reg.write(Some(0), &map, AccessPath::FrontDoor, CheckPolicy::NoCheck)
            .await,
        Err(RalError::AdapterNotBound("bus".into()))
    );
    map.set_adapter(Rc::new(OpaqueAdapter));
    assert_eq!(
        reg.write(Some(0), &map, AccessPath::FrontDoor, CheckPolicy::NoCheck)
            .await,
        Err(RalError::TransportItemMismatch)
    );
}

#[test]
fn map_structure_rules() {
    let mut top = Block::new("soc");
    let spi_map = {
        let spi = top.create_block("spi").expect("spi");
        spi.create_map("spi_map", MapConfig::default()).expect("map")
    };
    let gpio_reg = {
        let gpio = top.create_block("gpio").expect("gpio");
        Register::new("DIR", 32)
            .expect("register")
            .configure(gpio, 0, "gpio.dir", |_| {})
            .expect("configured")
    };
    let sys = top.create_map("sys", MapConfig::default()).expect("sys");
    let periph = top.create_map("periph", MapConfig::default()).expect("periph");
    let other = top.create_map("other", MapConfig::default()).expect("other");

    assert!(matches!(
        spi_map.add_reg(&gpio_reg, 0, AccessRights::ReadWrite),
        Err(RalError::ForeignRegister { .. })
    ));
    assert!(matches!(
        spi_map.add_submap(&sys, 0),
        Err(RalError::ForeignSubmap { .. })
    ));
    assert!(matches!(
        sys.add_submap(&spi_map, 0),
        Err(RalError::ForeignSubmap { .. })
    ));
    sys.add_submap(&periph, 0x100).expect("submap");
    assert!(matches!(
        other.add_submap(&periph, 0x200),
        Err(RalError::SubmapAlreadyParented { .. })
    ));
    other.add_submap(&sys, 0x8000).expect("nested");
    assert!(matches!(
        sys.add_submap(&other, 0),
        Err(RalError::SubmapCycle { .. })
    ));
    assert_eq!(periph.to_root_address(0x4), 0x8104);
    assert!(Rc::ptr_eq(&periph.get_root_map(), &other));
    assert_eq!(
        sys.add_reg(&gpio_reg, 0x2, AccessRights::ReadWrite),
        Err(RalError::MisalignedAddress {
            map: "sys".into(),
            address: 0x2,
            n_bytes: 4
        })
    );
}

#[test]
fn registers_behind_a_submap_keep_distinct_root_addresses() {
    let mut top = Block::new("soc");
    let mut make = |name: &str, address| {
        Register::new(name, 32)
            .expect("register")
            .configure(&mut top, address, name, |_| {})
            .expect("configured")
    };
    let a = make("A", 0x0);
    let b = make("B", 0x4);
    let root = Rc::new(AddressMap::new("root", "soc", MapConfig::default()));
    let sub = Rc::new(AddressMap::new("sub", "soc", MapConfig::default()));
    root.add_reg(&a, 0x0, AccessRights::ReadWrite).expect("a");
    sub.add_reg(&b, 0x0, AccessRights::ReadWrite).expect("b");

    assert!(matches!(
        root.add_submap(&sub, 0x0),
        Err(RalError::AddressConflict { address: 0, .. })
    ));
    root.add_submap(&sub, 0x10).expect("disjoint offset");
    assert_eq!(root.get_reg_address(&a), Some(0x0));
    assert_eq!(root.get_reg_address(&b), Some(0x10));
    assert!(root
        .get_reg_by_address(0x10)
        .is_some_and(|found| Rc::ptr_eq(&found, &b)));
}

#[test]
fn wide_registers_reserve_their_full_span() {
    let mut top = Block::new("soc");
    let map = top
        .create_map(
            "bus",
            MapConfig {
                base_addr: 0x4000,
                ..MapConfig::default()
            },
        )
        .expect("map");
    let wide = Register::new("COUNTER", 64)
        .expect("register")
        .configure(&mut top, 0x0, "counter", |_| {})
        .expect("configured");
    let next = Register::new("NEXT", 32)
        .expect("register")
        .configure(&mut top, 0x8, "next", |_| {})
        .expect("configured");
    assert_eq!(map.add_reg(&wide, 0x0, AccessRights::ReadWrite), Ok(0x4000));
    assert!(matches!(
        map.add_reg(&next, 0x4, AccessRights::ReadWrite),
        Err(RalError::AddressConflict { address: 0x4004, .. })
    ));
    assert_eq!(map.add_reg(&next, 0x8, AccessRights::ReadWrite), Ok(0x4008));
    assert!(map.get_reg_by_address(0x4008).is_some());
    assert_eq!(map.get_reg_address(&wide), Some(0x4000));
}
