//! Front-door transaction orchestration through the bound transport.

use tracing::{debug, warn};

use crate::map::address_map::MappedRegister;
use crate::{
    AccessKind, AccessPath, AddressMap, BusOperation, CheckPolicy, Predictor, RalError,
    RegPredictor, Status,
};

impl AddressMap {
    /// Writes `data` to the register at local `address`.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::PathNotImplemented`] for any path other than
    /// [`AccessPath::FrontDoor`], [`RalError::NoRegisterAtAddress`] when no
    /// register starts at `address`, and the transport binding errors of
    /// [`AddressMap::get_transport`].
    pub async fn process_write_operation(
        &self,
        address: u64,
        data: u64,
        path: AccessPath,
        check: CheckPolicy,
    ) -> Result<Status, RalError> {
        let mapped = self.frontdoor_target(address, path)?;
        let op = BusOperation::write(
            self.to_root_address(address),
            data,
            mapped.register.width(),
        );
        self.execute(&mapped, op, check).await.map(|op| op.status)
    }

    /// Reads the register at local `address`, returning status and data.
    ///
    /// # Errors
    ///
    /// Same conditions as [`AddressMap::process_write_operation`].
    pub async fn process_read_operation(
        &self,
        address: u64,
        path: AccessPath,
        check: CheckPolicy,
    ) -> Result<(Status, u64), RalError> {
        let mapped = self.frontdoor_target(address, path)?;
        let op = BusOperation::read(self.to_root_address(address), mapped.register.width());
        self.execute(&mapped, op, check)
            .await
            .map(|op| (op.status, op.data))
    }

    fn frontdoor_target(
        &self,
        address: u64,
        path: AccessPath,
    ) -> Result<MappedRegister, RalError> {
        if path != AccessPath::FrontDoor {
            return Err(RalError::PathNotImplemented(path));
        }
        self.lookup(address)
            .ok_or_else(|| RalError::NoRegisterAtAddress {
                map: self.name().to_owned(),
                address,
            })
    }

    async fn execute(
        &self,
        mapped: &MappedRegister,
        mut op: BusOperation,
        check: CheckPolicy,
    ) -> Result<BusOperation, RalError> {
        let register = &mapped.register;
        if !mapped.rights.permits(op.kind) {
            warn!(
                map = %self.get_full_name(),
                register = %register.get_full_name(),
                kind = ?op.kind,
                rights = ?mapped.rights,
                "access not permitted by map rights"
            );
            op.status = Status::Error;
            return Ok(op);
        }

        let (sequencer, adapter) = self.get_transport()?;
        let mut item = adapter.reg2bus(&op);
        debug!(
            map = %self.get_full_name(),
            register = %register.get_full_name(),
            kind = ?op.kind,
            addr = op.addr,
            data = op.data,
            n_bits = op.n_bits,
            "starting bus operation"
        );
        sequencer.start_item(&mut item).await;
        sequencer.finish_item(&mut item).await;
        adapter.bus2reg(&*item, &mut op)?;
        if op.kind == AccessKind::Read {
            op.data &= crate::policy::field_mask(op.n_bits);
        }

        if self.get_auto_predict() {
            let predicted = match self.predictor() {
                Some(predictor) => predictor.predict(register, &op, check),
                None => RegPredictor.predict(register, &op, check),
            };
            op.status = op.status.and(predicted);
        }
        if !op.status.is_pass() {
            warn!(
                register = %register.get_full_name(),
                kind = ?op.kind,
                addr = op.addr,
                "bus operation completed with error"
            );
        }
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::sim::{LoopbackDevice, SimAdapter, SimSequencer};
    use crate::{
        AccessPath, AccessPolicy, AccessRights, AddressMap, Block, CheckPolicy, Field, MapConfig,
        RalError, Register, Status,
    };

    type Bench = (Block, Rc<Register>, Rc<AddressMap>, Rc<LoopbackDevice>);

    fn bench(auto_predict: bool) -> Bench {
        let mut block = Block::new("top");
        let map = block
            .create_map(
                "bus",
                MapConfig {
                    auto_predict,
                    ..MapConfig::default()
                },
            )
            .expect("map");
        let reg = Register::new("CTRL", 32)
            .expect("register")
            .configure(&mut block, 0x8, "ctrl", |reg| {
                reg.add_field(
                    Field::configured("EN", 1, 0, AccessPolicy::Rw, false, 0).expect("field"),
                );
                reg.add_field(
                    Field::configured("MODE", 3, 1, AccessPolicy::Rw, false, 0).expect("field"),
                );
            })
            .expect("configured");
        map.add_reg(&reg, 0x8, AccessRights::ReadWrite)
            .expect("mapped");
        let device = Rc::new(LoopbackDevice::default());
        map.set_sequencer(Rc::new(SimSequencer::new(Rc::clone(&device))));
        map.set_adapter(Rc::new(SimAdapter));
        (block, reg, map, device)
    }

    #[tokio::test]
    async fn write_reaches_device_and_updates_mirror_when_auto_predicting() {
        let (_block, reg, map, device) = bench(true);
        let status = map
            .process_write_operation(0x8, 0b1011, AccessPath::FrontDoor, CheckPolicy::NoCheck)
            .await
            .expect("write");
        assert_eq!(status, Status::Pass);
        assert_eq!(device.peek(0x8), Some(0b1011));
        assert_eq!(reg.get_mirrored_value(), 0b1011);
    }

    #[tokio::test]
    async fn mirror_is_untouched_without_auto_predict() {
        let (_block, reg, map, _device) = bench(false);
        map.process_write_operation(0x8, 0b1, AccessPath::FrontDoor, CheckPolicy::NoCheck)
            .await
            .expect("write");
        assert_eq!(reg.get_mirrored_value(), 0);
    }

    #[tokio::test]
    async fn non_front_door_paths_are_not_implemented() {
        let (_block, _reg, map, _device) = bench(true);
        for path in [AccessPath::BackDoor, AccessPath::UserFrontDoor] {
            assert_eq!(
                map.process_read_operation(0x8, path, CheckPolicy::NoCheck)
                    .await,
                Err(RalError::PathNotImplemented(path))
            );
        }
    }

    #[tokio::test]
    async fn unknown_address_is_an_operation_error() {
        let (_block, _reg, map, _device) = bench(true);
        let err = map
            .process_write_operation(0x40, 0, AccessPath::FrontDoor, CheckPolicy::NoCheck)
            .await
            .expect_err("nothing mapped at 0x40");
        assert!(err.is_fatal());
    }
}
