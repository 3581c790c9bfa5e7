//! Address-space namespace: register placement, submaps and transport binding.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, error};

use crate::{
    parse_address, AccessRights, Adapter, Hierarchy, MapConfig, Predictor, RalError, Register,
    ResetKind, Sequencer,
};

/// A register placed in a map.
#[derive(Debug, Clone)]
pub struct MappedRegister {
    /// Shared handle to the register.
    pub register: Rc<Register>,
    /// Rights granted through this map.
    pub rights: AccessRights,
    /// Number of addresses the register occupies.
    pub span: u64,
}

struct Submap {
    map: Rc<AddressMap>,
    offset: u64,
}

struct ParentLink {
    map: Weak<AddressMap>,
    offset: u64,
}

/// Address range taken by one register, in some map's local key space.
struct Occupied {
    start: u64,
    end: u64,
    register: String,
}

impl Occupied {
    fn overlaps(&self, start: u64, end: u64) -> bool {
        start < self.end && self.start < end
    }
}

#[derive(Default)]
struct Bindings {
    sequencer: Option<Rc<dyn Sequencer>>,
    adapter: Option<Rc<dyn Adapter>>,
    predictor: Option<Rc<dyn Predictor>>,
}

#[derive(Default)]
struct MapState {
    registers: BTreeMap<u64, MappedRegister>,
    submaps: BTreeMap<String, Submap>,
    parent: Option<ParentLink>,
    bindings: Bindings,
    auto_predict: bool,
}

/// Maps addresses to registers for one block, optionally nested in a parent
/// map.
///
/// Registers are keyed by `base_addr + offset`. A submap placed at `offset`
/// contributes its own keys shifted by `offset`, so addresses compose along
/// the chain up to the root map.
pub struct AddressMap {
    name: String,
    block: String,
    config: MapConfig,
    state: RefCell<MapState>,
}

impl fmt::Debug for AddressMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("AddressMap")
            .field("name", &self.name)
            .field("block", &self.block)
            .field("config", &self.config)
            .field("registers", &state.registers.len())
            .field("submaps", &state.submaps.keys().collect::<Vec<_>>())
            .field("is_root", &state.parent.is_none())
            .finish_non_exhaustive()
    }
}

impl AddressMap {
    /// Creates a map owned by the block at `block_path`.
    ///
    /// Maps are normally created through [`crate::Block::create_map`].
    #[must_use]
    pub fn new(name: impl Into<String>, block_path: impl Into<String>, config: MapConfig) -> Self {
        let auto_predict = config.auto_predict;
        Self {
            name: name.into(),
            block: block_path.into(),
            config,
            state: RefCell::new(MapState {
                auto_predict,
                ..MapState::default()
            }),
        }
    }

    /// Map name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hierarchical name including the owning block path.
    #[must_use]
    pub fn get_full_name(&self) -> String {
        format!("{}.{}", self.block, self.name)
    }

    /// Path of the owning block.
    #[must_use]
    pub fn block_path(&self) -> &str {
        &self.block
    }

    /// Construction parameters.
    #[must_use]
    pub const fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Base address added to register offsets.
    #[must_use]
    pub const fn base_addr(&self) -> u64 {
        self.config.base_addr
    }

    /// Places `reg` at `base_addr + offset`.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::ForeignRegister`] when `reg` lives outside this
    /// map's block, [`RalError::MisalignedAddress`] when the address breaks
    /// the alignment rule, [`RalError::AddressConflict`] when the address
    /// range overlaps another register anywhere in the root map's address
    /// space, and [`RalError::DuplicateName`] when the register is already
    /// placed in this map.
    pub fn add_reg(
        &self,
        reg: &Rc<Register>,
        offset: u64,
        rights: AccessRights,
    ) -> Result<u64, RalError> {
        let result = self.try_add_reg(reg, offset, rights);
        if let Err(err) = &result {
            error!(
                map = %self.get_full_name(),
                register = %reg.get_full_name(),
                %err,
                "add_reg failed"
            );
        }
        result
    }

    /// [`AddressMap::add_reg`] with the offset given as a hex literal.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::InvalidAddress`] when `offset` does not parse,
    /// otherwise the errors of [`AddressMap::add_reg`].
    pub fn add_reg_hex(
        &self,
        reg: &Rc<Register>,
        offset: &str,
        rights: AccessRights,
    ) -> Result<u64, RalError> {
        self.add_reg(reg, parse_address(offset)?, rights)
    }

    fn try_add_reg(
        &self,
        reg: &Rc<Register>,
        offset: u64,
        rights: AccessRights,
    ) -> Result<u64, RalError> {
        if !within_block(&self.block, reg.parent_path()) {
            return Err(RalError::ForeignRegister {
                register: reg.get_full_name(),
                map: self.name.clone(),
            });
        }
        let address = self.config.base_addr.wrapping_add(offset);
        if !self.config.is_aligned(address) {
            return Err(RalError::MisalignedAddress {
                map: self.name.clone(),
                address,
                n_bytes: self.config.n_bytes,
            });
        }

        if self
            .state
            .borrow()
            .registers
            .values()
            .any(|mapped| Rc::ptr_eq(&mapped.register, reg))
        {
            return Err(RalError::DuplicateName {
                scope: self.get_full_name(),
                name: reg.name().to_owned(),
            });
        }
        let span = self.config.address_span(reg.width());
        let root_start = self.to_root_address(address);
        if let Some(existing) = self
            .root_occupied()
            .into_iter()
            .find(|taken| taken.overlaps(root_start, root_start.saturating_add(span)))
        {
            return Err(RalError::AddressConflict {
                map: self.name.clone(),
                address,
                existing: existing.register,
            });
        }

        self.state.borrow_mut().registers.insert(
            address,
            MappedRegister {
                register: Rc::clone(reg),
                rights,
                span,
            },
        );
        debug!(
            map = %self.get_full_name(),
            register = %reg.get_full_name(),
            address,
            "register mapped"
        );
        Ok(address)
    }

    /// Nests `submap` at `offset` inside this map.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::ForeignSubmap`] when the submap belongs to a
    /// different block, [`RalError::SubmapAlreadyParented`] when it already
    /// has a parent, [`RalError::SubmapCycle`] when it is this map or one of
    /// its ancestors, [`RalError::DuplicateName`] on a submap name clash and
    /// [`RalError::AddressConflict`] when one of its registers would overlap
    /// a register already reachable from the root map.
    pub fn add_submap(
        self: &Rc<Self>,
        submap: &Rc<Self>,
        offset: u64,
    ) -> Result<(), RalError> {
        if submap.block != self.block {
            return Err(RalError::ForeignSubmap {
                submap: submap.name.clone(),
                map: self.name.clone(),
            });
        }
        if let Some(parent) = submap.get_parent_map() {
            return Err(RalError::SubmapAlreadyParented {
                submap: submap.name.clone(),
                parent: parent.name.clone(),
            });
        }
        if self.ancestry().any(|ancestor| Rc::ptr_eq(&ancestor, submap)) {
            return Err(RalError::SubmapCycle {
                submap: submap.name.clone(),
                map: self.name.clone(),
            });
        }

        if self.state.borrow().submaps.contains_key(&submap.name) {
            return Err(RalError::DuplicateName {
                scope: self.get_full_name(),
                name: submap.name.clone(),
            });
        }
        let taken = self.root_occupied();
        for incoming in submap.occupied() {
            let address = offset.wrapping_add(incoming.start);
            let root_start = self.to_root_address(address);
            let root_end = root_start.saturating_add(incoming.end - incoming.start);
            if let Some(existing) = taken
                .iter()
                .find(|range| range.overlaps(root_start, root_end))
            {
                return Err(RalError::AddressConflict {
                    map: self.name.clone(),
                    address,
                    existing: existing.register.clone(),
                });
            }
        }

        self.state.borrow_mut().submaps.insert(
            submap.name.clone(),
            Submap {
                map: Rc::clone(submap),
                offset,
            },
        );
        submap.state.borrow_mut().parent = Some(ParentLink {
            map: Rc::downgrade(self),
            offset,
        });
        debug!(
            map = %self.get_full_name(),
            submap = %submap.get_full_name(),
            offset,
            "submap linked"
        );
        Ok(())
    }

    /// Parent map, or `None` for a root map.
    #[must_use]
    pub fn get_parent_map(&self) -> Option<Rc<Self>> {
        self.state
            .borrow()
            .parent
            .as_ref()
            .and_then(|link| link.map.upgrade())
    }

    /// Returns `true` when this map has no parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.get_parent_map().is_none()
    }

    /// Follows parent links to the outermost map, starting from `self`.
    #[must_use]
    pub fn get_root_map(self: &Rc<Self>) -> Rc<Self> {
        self.get_parent_map()
            .map_or_else(|| Rc::clone(self), |parent| parent.get_root_map())
    }

    fn ancestry(self: &Rc<Self>) -> impl Iterator<Item = Rc<Self>> {
        std::iter::successors(Some(Rc::clone(self)), |map| map.get_parent_map())
    }

    /// Translates a local address into the root map's address space.
    #[must_use]
    pub fn to_root_address(&self, address: u64) -> u64 {
        let link = self
            .state
            .borrow()
            .parent
            .as_ref()
            .and_then(|link| link.map.upgrade().map(|map| (map, link.offset)));
        match link {
            Some((parent, offset)) => parent.to_root_address(offset.wrapping_add(address)),
            None => address,
        }
    }

    /// Ranges of every register reachable from this map, in local keys.
    fn occupied(&self) -> Vec<Occupied> {
        let state = self.state.borrow();
        let mut ranges: Vec<_> = state
            .registers
            .iter()
            .map(|(start, mapped)| Occupied {
                start: *start,
                end: start.saturating_add(mapped.span),
                register: mapped.register.get_full_name(),
            })
            .collect();
        for sub in state.submaps.values() {
            ranges.extend(sub.map.occupied().into_iter().map(|range| Occupied {
                start: range.start.wrapping_add(sub.offset),
                end: range.end.saturating_add(sub.offset),
                register: range.register,
            }));
        }
        ranges
    }

    /// Ranges taken anywhere under the root map, in root addresses.
    fn root_occupied(&self) -> Vec<Occupied> {
        self.get_parent_map()
            .map_or_else(|| self.occupied(), |parent| parent.root_occupied())
    }

    /// Registers placed directly in this map, by address.
    #[must_use]
    pub fn mapped_registers(&self) -> Vec<(u64, MappedRegister)> {
        self.state
            .borrow()
            .registers
            .iter()
            .map(|(address, mapped)| (*address, mapped.clone()))
            .collect()
    }

    /// Submaps by name with their offsets.
    #[must_use]
    pub fn get_submaps(&self) -> Vec<(String, Rc<Self>, u64)> {
        self.state
            .borrow()
            .submaps
            .iter()
            .map(|(name, sub)| (name.clone(), Rc::clone(&sub.map), sub.offset))
            .collect()
    }

    /// Registers reachable from this map; [`Hierarchy::Hier`] includes
    /// submaps.
    #[must_use]
    pub fn get_registers(&self, hier: Hierarchy) -> Vec<Rc<Register>> {
        let state = self.state.borrow();
        let mut registers: Vec<_> = state
            .registers
            .values()
            .map(|mapped| Rc::clone(&mapped.register))
            .collect();
        if hier == Hierarchy::Hier {
            for sub in state.submaps.values() {
                registers.extend(sub.map.get_registers(Hierarchy::Hier));
            }
        }
        registers
    }

    /// Register starting at local `address`, searching submaps too.
    #[must_use]
    pub fn get_reg_by_address(&self, address: u64) -> Option<Rc<Register>> {
        self.lookup(address).map(|mapped| mapped.register)
    }

    pub(crate) fn lookup(&self, address: u64) -> Option<MappedRegister> {
        let state = self.state.borrow();
        if let Some(mapped) = state.registers.get(&address) {
            return Some(mapped.clone());
        }
        state.submaps.values().find_map(|sub| {
            address
                .checked_sub(sub.offset)
                .and_then(|local| sub.map.lookup(local))
        })
    }

    /// Local address of `reg`, searching submaps too.
    #[must_use]
    pub fn get_reg_address(&self, reg: &Register) -> Option<u64> {
        let state = self.state.borrow();
        state
            .registers
            .iter()
            .find(|(_, mapped)| std::ptr::eq(Rc::as_ptr(&mapped.register), reg))
            .map(|(address, _)| *address)
            .or_else(|| {
                state.submaps.values().find_map(|sub| {
                    sub.map
                        .get_reg_address(reg)
                        .map(|local| sub.offset.wrapping_add(local))
                })
            })
    }

    /// Binds the sequencer that carries this map's transactions.
    pub fn set_sequencer(&self, sequencer: Rc<dyn Sequencer>) {
        self.state.borrow_mut().bindings.sequencer = Some(sequencer);
    }

    /// Binds the adapter that converts operations for the sequencer.
    pub fn set_adapter(&self, adapter: Rc<dyn Adapter>) {
        self.state.borrow_mut().bindings.adapter = Some(adapter);
    }

    /// Binds the predictor used when auto-prediction is enabled.
    pub fn set_predictor(&self, predictor: Rc<dyn Predictor>) {
        self.state.borrow_mut().bindings.predictor = Some(predictor);
    }

    /// Enables or disables prediction after completed front-door accesses.
    pub fn set_auto_predict(&self, enabled: bool) {
        self.state.borrow_mut().auto_predict = enabled;
    }

    /// Returns `true` when auto-prediction is enabled on this map.
    #[must_use]
    pub fn get_auto_predict(&self) -> bool {
        self.state.borrow().auto_predict
    }

    /// Sequencer and adapter used for transactions: this map's own binding
    /// when present, otherwise the parent chain's.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::SequencerNotBound`] or
    /// [`RalError::AdapterNotBound`] when no map up to the root has one.
    pub fn get_transport(&self) -> Result<(Rc<dyn Sequencer>, Rc<dyn Adapter>), RalError> {
        let (sequencer, adapter) = self.resolve_bindings();
        let sequencer = sequencer.ok_or_else(|| RalError::SequencerNotBound(self.name.clone()))?;
        let adapter = adapter.ok_or_else(|| RalError::AdapterNotBound(self.name.clone()))?;
        Ok((sequencer, adapter))
    }

    fn resolve_bindings(&self) -> (Option<Rc<dyn Sequencer>>, Option<Rc<dyn Adapter>>) {
        let (own_sequencer, own_adapter) = {
            let state = self.state.borrow();
            (
                state.bindings.sequencer.clone(),
                state.bindings.adapter.clone(),
            )
        };
        if own_sequencer.is_some() && own_adapter.is_some() {
            return (own_sequencer, own_adapter);
        }
        let (parent_sequencer, parent_adapter) = self
            .get_parent_map()
            .map_or((None, None), |parent| parent.resolve_bindings());
        (
            own_sequencer.or(parent_sequencer),
            own_adapter.or(parent_adapter),
        )
    }

    /// Predictor bound on this map, otherwise the nearest one up the chain.
    pub(crate) fn predictor(&self) -> Option<Rc<dyn Predictor>> {
        let own = self.state.borrow().bindings.predictor.clone();
        own.or_else(|| {
            self.get_parent_map()
                .and_then(|parent| parent.predictor())
        })
    }

    /// Resets every register reachable from this map, submaps included.
    pub fn reset(&self, kind: ResetKind) {
        for register in self.get_registers(Hierarchy::Hier) {
            register.reset(kind);
        }
    }
}

/// Returns `true` when `path` is `block` or one of its descendants.
pub(crate) fn within_block(block: &str, path: &str) -> bool {
    path == block
        || path
            .strip_prefix(block)
            .is_some_and(|rest| rest.starts_with('.'))
}
