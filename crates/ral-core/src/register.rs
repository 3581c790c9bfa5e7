//! Fixed-width register: ordered field container and front-door entry point.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use tracing::{debug, error, warn};

use crate::policy::field_mask;
use crate::{
    AccessPath, AddressMap, Block, CheckPolicy, Field, LayoutError, PredictKind, RalError,
    ResetKind, Status,
};

/// Widest supported register, in bits.
pub const MAX_REGISTER_BITS: u32 = u64::BITS;

/// A register made of non-overlapping fields laid out LSB to MSB.
///
/// Registers are built by value, then handed to their parent [`Block`] by
/// [`Register::configure`], which returns the shared handle used by maps.
#[derive(Debug)]
pub struct Register {
    name: String,
    width: u32,
    address: u64,
    hdl_path: String,
    parent: String,
    fields: RefCell<Vec<Field>>,
    bits_used: u32,
    errors: Vec<LayoutError>,
    error_on_read: bool,
    error_on_write: bool,
    busy: Cell<bool>,
}

impl Register {
    /// Creates an empty register of `width` bits.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::InvalidRegisterWidth`] when `width` is outside
    /// `1..=64`.
    pub fn new(name: impl Into<String>, width: u32) -> Result<Self, RalError> {
        let name = name.into();
        if width == 0 || width > MAX_REGISTER_BITS {
            return Err(RalError::InvalidRegisterWidth {
                register: name,
                width,
            });
        }
        Ok(Self {
            name,
            width,
            address: 0,
            hdl_path: String::new(),
            parent: String::new(),
            fields: RefCell::new(Vec::new()),
            bits_used: 0,
            errors: Vec::new(),
            error_on_read: false,
            error_on_write: false,
            busy: Cell::new(false),
        })
    }

    /// Enables simulated read/write errors on every field added afterwards.
    #[must_use]
    pub const fn with_error_injection(mut self, on_read: bool, on_write: bool) -> Self {
        self.error_on_read = on_read;
        self.error_on_write = on_write;
        self
    }

    /// Records placement, runs `build` to attach fields, and registers the
    /// result with `parent`.
    ///
    /// # Errors
    ///
    /// Propagates [`Block::add_reg`] failures (locked block, duplicate name
    /// or address).
    pub fn configure(
        mut self,
        parent: &mut Block,
        address: u64,
        hdl_path: &str,
        build: impl FnOnce(&mut Self),
    ) -> Result<Rc<Self>, RalError> {
        parent.path().clone_into(&mut self.parent);
        self.address = address;
        hdl_path.clone_into(&mut self.hdl_path);
        build(&mut self);
        parent.add_reg(self)
    }

    /// Appends `field` after validating it against the current layout.
    ///
    /// Violations are logged and recorded in [`Register::errors`]; the
    /// offending field is not attached.
    pub fn add_field(&mut self, mut field: Field) {
        if let Err(err) = self.check_layout(&field) {
            error!(register = %self.get_full_name(), %err, "field layout violation");
            self.errors.push(err);
            return;
        }
        field.inherit_error_flags(self.error_on_read, self.error_on_write);
        self.bits_used += field.size();
        self.fields.get_mut().push(field);
    }

    fn check_layout(&self, field: &Field) -> Result<(), LayoutError> {
        if !field.is_configured() {
            return Err(LayoutError::Unconfigured(field.name().to_owned()));
        }
        let fields = self.fields.borrow();
        if fields.iter().any(|existing| existing.name() == field.name()) {
            return Err(LayoutError::Duplicate(field.name().to_owned()));
        }
        let end = u64::from(field.lsb_pos()) + u64::from(field.size());
        if end > u64::from(self.width) || self.bits_used + field.size() > self.width {
            return Err(LayoutError::DoesNotFit {
                field: field.name().to_owned(),
                lsb: field.lsb_pos(),
                size: field.size(),
                width: self.width,
            });
        }
        if let Some(previous) = fields.last() {
            if field.lsb_pos() <= previous.msb_pos() {
                return Err(LayoutError::Overlap {
                    field: field.name().to_owned(),
                    lsb: field.lsb_pos(),
                    previous: previous.name().to_owned(),
                    previous_msb: previous.msb_pos(),
                });
            }
        }
        Ok(())
    }

    /// Register name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hierarchical name including the parent block path.
    #[must_use]
    pub fn get_full_name(&self) -> String {
        if self.parent.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.parent, self.name)
        }
    }

    /// Path of the owning block; empty before [`Register::configure`].
    #[must_use]
    pub fn parent_path(&self) -> &str {
        &self.parent
    }

    /// Width in bits.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Block-relative address given at configure time.
    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// HDL path recorded at configure time.
    #[must_use]
    pub fn hdl_path(&self) -> &str {
        &self.hdl_path
    }

    /// Layout violations recorded while fields were added.
    #[must_use]
    pub fn errors(&self) -> &[LayoutError] {
        &self.errors
    }

    /// Sum of attached field sizes.
    #[must_use]
    pub const fn bits_used(&self) -> u32 {
        self.bits_used
    }

    /// Returns `true` while a front-door operation is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    /// Attached fields in LSB-to-MSB order.
    #[must_use]
    pub fn fields(&self) -> Ref<'_, [Field]> {
        Ref::map(self.fields.borrow(), Vec::as_slice)
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Ref<'_, Field>> {
        Ref::filter_map(self.fields.borrow(), |fields| {
            fields.iter().find(|field| field.name() == name)
        })
        .ok()
    }

    /// Looks up a field by name for mutation.
    #[must_use]
    pub fn field_mut(&self, name: &str) -> Option<RefMut<'_, Field>> {
        RefMut::filter_map(self.fields.borrow_mut(), |fields| {
            fields.iter_mut().find(|field| field.name() == name)
        })
        .ok()
    }

    pub(crate) fn field_at_mut(&self, index: usize) -> RefMut<'_, Field> {
        RefMut::map(self.fields.borrow_mut(), |fields| &mut fields[index])
    }

    /// Folds every field's desired value into a register value.
    #[must_use]
    pub fn get_desired(&self) -> u64 {
        self.fields
            .borrow()
            .iter()
            .fold(0, |acc, field| acc | (field.get() << field.lsb_pos()))
    }

    /// Folds every field's mirrored value into a register value.
    #[must_use]
    pub fn get_mirrored_value(&self) -> u64 {
        self.fields
            .borrow()
            .iter()
            .fold(0, |acc, field| {
                acc | (field.get_mirrored_value() << field.lsb_pos())
            })
    }

    /// Splits `value` across the fields' desired values, honouring policies.
    pub fn set_desired(&self, value: u64) {
        for field in self.fields.borrow_mut().iter_mut() {
            field.set((value >> field.lsb_pos()) & field.mask());
        }
    }

    /// Returns `true` when a write is needed to bring hardware to the
    /// desired value.
    #[must_use]
    pub fn needs_update(&self) -> bool {
        self.fields
            .borrow()
            .iter()
            .any(|field| field.get() != field.get_mirrored_value())
    }

    /// Resets every field.
    pub fn reset(&self, kind: ResetKind) {
        for field in self.fields.borrow_mut().iter_mut() {
            field.reset(kind);
        }
        debug!(
            register = %self.get_full_name(),
            ?kind,
            mirrored = self.get_mirrored_value(),
            "register reset"
        );
    }

    /// Predicts a register-wide access with every byte lane enabled.
    pub fn predict(&self, value: u64, kind: PredictKind, path: AccessPath) -> Status {
        self.do_predict(value, kind, path, u64::MAX)
    }

    /// Runs field prediction on every field; any field error fails the whole
    /// access.
    pub fn do_predict(
        &self,
        value: u64,
        kind: PredictKind,
        path: AccessPath,
        byte_enable: u64,
    ) -> Status {
        let status = self
            .fields
            .borrow_mut()
            .iter_mut()
            .fold(Status::Pass, |status, field| {
                let slice = (value >> field.lsb_pos()) & field.mask();
                status.and(field.do_predict(slice, kind, path, byte_enable))
            });
        if !status.is_pass() {
            warn!(
                register = %self.get_full_name(),
                ?kind,
                %path,
                "illegal access predicted"
            );
        }
        status
    }

    /// Compares observed read data with the mirror.
    ///
    /// Only readable, non-volatile fields participate. Mismatches are logged
    /// and reported as `false`.
    #[must_use]
    pub fn check_mirror(&self, observed: u64) -> bool {
        let compare = self
            .fields
            .borrow()
            .iter()
            .filter(|field| field.access().is_readable() && !field.is_volatile())
            .fold(0, |acc, field| acc | (field.mask() << field.lsb_pos()));
        let expected = self.get_mirrored_value() & compare;
        let actual = observed & compare & field_mask(self.width);
        if expected != actual {
            error!(
                register = %self.get_full_name(),
                expected,
                actual,
                "mirror mismatch"
            );
        }
        expected == actual
    }

    /// Writes `value`, or the desired value when `None`, through `map`.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::OperationInProgress`] when another operation is in
    /// flight on this register, [`RalError::RegisterNotMapped`] when `map`
    /// cannot reach it, and any error from
    /// [`AddressMap::process_write_operation`].
    pub async fn write(
        &self,
        value: Option<u64>,
        map: &AddressMap,
        path: AccessPath,
        check: CheckPolicy,
    ) -> Result<Status, RalError> {
        let _guard = self.begin_operation()?;
        let data = value.unwrap_or_else(|| self.get_desired());
        let address = self.address_in(map)?;
        map.process_write_operation(address, data, path, check)
            .await
    }

    /// Reads through `map`; data is forced to zero on an error status.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Register::write`].
    pub async fn read(
        &self,
        map: &AddressMap,
        path: AccessPath,
        check: CheckPolicy,
    ) -> Result<(Status, u64), RalError> {
        let _guard = self.begin_operation()?;
        let address = self.address_in(map)?;
        let (status, data) = map.process_read_operation(address, path, check).await?;
        Ok(match status {
            Status::Pass => (status, data),
            Status::Error => (status, 0),
        })
    }

    /// Writes the desired value only when it differs from the mirror.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Register::write`].
    pub async fn update(
        &self,
        map: &AddressMap,
        path: AccessPath,
    ) -> Result<Status, RalError> {
        if !self.needs_update() {
            return Ok(Status::Pass);
        }
        self.write(None, map, path, CheckPolicy::NoCheck).await
    }

    /// Reads the register to refresh the mirror, optionally checking it.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Register::write`].
    pub async fn mirror(
        &self,
        map: &AddressMap,
        path: AccessPath,
        check: CheckPolicy,
    ) -> Result<Status, RalError> {
        self.read(map, path, check).await.map(|(status, _)| status)
    }

    fn address_in(&self, map: &AddressMap) -> Result<u64, RalError> {
        map.get_reg_address(self)
            .ok_or_else(|| RalError::RegisterNotMapped {
                register: self.get_full_name(),
                map: map.name().to_owned(),
            })
    }

    fn begin_operation(&self) -> Result<OperationGuard<'_>, RalError> {
        if self.busy.replace(true) {
            return Err(RalError::OperationInProgress(self.get_full_name()));
        }
        Ok(OperationGuard { busy: &self.busy })
    }
}

/// Clears the in-flight flag when the operation finishes or is dropped.
struct OperationGuard<'a> {
    busy: &'a Cell<bool>,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.busy.set(false);
    }
}
