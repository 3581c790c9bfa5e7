//! Hierarchical container of registers, child blocks and address maps.

use std::cell::{Ref, RefMut};
use std::rc::Rc;

use tracing::debug;

use crate::{AddressMap, Field, Hierarchy, MapConfig, RalError, Register, ResetKind};

/// Handle to one field inside a shared register.
#[derive(Debug, Clone)]
pub struct FieldRef {
    register: Rc<Register>,
    index: usize,
}

impl FieldRef {
    /// Owning register.
    #[must_use]
    pub const fn register(&self) -> &Rc<Register> {
        &self.register
    }

    /// Borrows the field.
    ///
    /// # Panics
    ///
    /// Panics if the field is currently borrowed mutably.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, Field> {
        Ref::map(self.register.fields(), |fields| &fields[self.index])
    }

    /// Borrows the field for mutation.
    ///
    /// # Panics
    ///
    /// Panics if the field is currently borrowed.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, Field> {
        self.register.field_at_mut(self.index)
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> String {
        self.borrow().name().to_owned()
    }

    /// Hierarchical name including the register's full name.
    #[must_use]
    pub fn get_full_name(&self) -> String {
        format!("{}.{}", self.register.get_full_name(), self.name())
    }
}

/// Structural container for a device's register model.
///
/// A block is built incrementally, then frozen with [`Block::set_lock`].
/// Query accessors require the lock; structural mutation forbids it.
#[derive(Debug)]
pub struct Block {
    name: String,
    path: String,
    registers: Vec<Rc<Register>>,
    blocks: Vec<Block>,
    maps: Vec<Rc<AddressMap>>,
    locked: bool,
}

impl Block {
    /// Creates a root block.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            registers: Vec::new(),
            blocks: Vec::new(),
            maps: Vec::new(),
            locked: false,
        }
    }

    /// Block name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dot-separated path from the root block.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns `true` once [`Block::set_lock`] has been called.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Creates a child block and returns it for population.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::BlockLocked`] after locking and
    /// [`RalError::DuplicateName`] when a child of that name exists.
    pub fn create_block(&mut self, name: &str) -> Result<&mut Self, RalError> {
        self.ensure_unlocked()?;
        if self.blocks.iter().any(|block| block.name == name) {
            return Err(self.duplicate(name));
        }
        let mut child = Self::new(name);
        child.path = format!("{}.{name}", self.path);
        self.blocks.push(child);
        let index = self.blocks.len() - 1;
        Ok(&mut self.blocks[index])
    }

    /// Creates an address map owned by this block.
    ///
    /// The first map created becomes the default map.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::BlockLocked`] after locking and
    /// [`RalError::DuplicateName`] on a map name clash.
    pub fn create_map(
        &mut self,
        name: &str,
        config: MapConfig,
    ) -> Result<Rc<AddressMap>, RalError> {
        self.ensure_unlocked()?;
        if self.maps.iter().any(|map| map.name() == name) {
            return Err(self.duplicate(name));
        }
        let map = Rc::new(AddressMap::new(name, self.path.clone(), config));
        self.maps.push(Rc::clone(&map));
        Ok(map)
    }

    /// Takes ownership of a configured register.
    ///
    /// Called by [`Register::configure`].
    ///
    /// # Errors
    ///
    /// Returns [`RalError::BlockLocked`] after locking,
    /// [`RalError::DuplicateName`] on a name clash and
    /// [`RalError::DuplicateAddress`] when the block-relative address is
    /// already taken.
    pub fn add_reg(&mut self, reg: Register) -> Result<Rc<Register>, RalError> {
        self.ensure_unlocked()?;
        if self.registers.iter().any(|existing| existing.name() == reg.name()) {
            return Err(self.duplicate(reg.name()));
        }
        if self
            .registers
            .iter()
            .any(|existing| existing.address() == reg.address())
        {
            return Err(RalError::DuplicateAddress {
                block: self.path.clone(),
                address: reg.address(),
            });
        }
        let reg = Rc::new(reg);
        debug!(
            block = %self.path,
            register = %reg.name(),
            address = reg.address(),
            "register added"
        );
        self.registers.push(Rc::clone(&reg));
        Ok(reg)
    }

    /// Freezes this block and every child block.
    pub fn set_lock(&mut self) {
        for child in &mut self.blocks {
            child.set_lock();
        }
        self.locked = true;
    }

    /// Default (first created) address map.
    #[must_use]
    pub fn default_map(&self) -> Option<Rc<AddressMap>> {
        self.maps.first().cloned()
    }

    /// Address maps owned by this block.
    #[must_use]
    pub fn get_maps(&self) -> &[Rc<AddressMap>] {
        &self.maps
    }

    /// Looks up a map owned by this block.
    #[must_use]
    pub fn get_map_by_name(&self, name: &str) -> Option<Rc<AddressMap>> {
        self.maps.iter().find(|map| map.name() == name).cloned()
    }

    /// Direct child blocks.
    #[must_use]
    pub fn get_blocks(&self) -> &[Self] {
        &self.blocks
    }

    /// Registers of this block, and of child blocks with [`Hierarchy::Hier`].
    ///
    /// # Errors
    ///
    /// Returns [`RalError::BlockNotLocked`] before [`Block::set_lock`].
    pub fn get_registers(&self, hier: Hierarchy) -> Result<Vec<Rc<Register>>, RalError> {
        self.ensure_locked()?;
        let mut registers = self.registers.clone();
        if hier == Hierarchy::Hier {
            for child in &self.blocks {
                registers.extend(child.get_registers(Hierarchy::Hier)?);
            }
        }
        Ok(registers)
    }

    /// Fields of every register returned by [`Block::get_registers`].
    ///
    /// # Errors
    ///
    /// Returns [`RalError::BlockNotLocked`] before [`Block::set_lock`].
    pub fn get_fields(&self, hier: Hierarchy) -> Result<Vec<FieldRef>, RalError> {
        Ok(self
            .get_registers(hier)?
            .into_iter()
            .flat_map(|register| {
                let count = register.fields().len();
                (0..count).map(move |index| FieldRef {
                    register: Rc::clone(&register),
                    index,
                })
            })
            .collect())
    }

    /// Depth-first register lookup by name; `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::BlockNotLocked`] before [`Block::set_lock`].
    pub fn get_reg_by_name(&self, name: &str) -> Result<Option<Rc<Register>>, RalError> {
        self.ensure_locked()?;
        if let Some(found) = self.registers.iter().find(|reg| reg.name() == name) {
            return Ok(Some(Rc::clone(found)));
        }
        for child in &self.blocks {
            if let Some(found) = child.get_reg_by_name(name)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Depth-first field lookup by name; `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`RalError::BlockNotLocked`] before [`Block::set_lock`].
    pub fn get_field_by_name(&self, name: &str) -> Result<Option<FieldRef>, RalError> {
        Ok(self
            .get_fields(Hierarchy::Hier)?
            .into_iter()
            .find(|field| field.borrow().name() == name))
    }

    /// Resets every register of this block and its children.
    pub fn reset(&self, kind: ResetKind) {
        for register in &self.registers {
            register.reset(kind);
        }
        for child in &self.blocks {
            child.reset(kind);
        }
    }

    fn ensure_unlocked(&self) -> Result<(), RalError> {
        if self.locked {
            Err(RalError::BlockLocked(self.path.clone()))
        } else {
            Ok(())
        }
    }

    fn ensure_locked(&self) -> Result<(), RalError> {
        if self.locked {
            Ok(())
        } else {
            Err(RalError::BlockNotLocked(self.path.clone()))
        }
    }

    fn duplicate(&self, name: &str) -> RalError {
        RalError::DuplicateName {
            scope: self.path.clone(),
            name: name.to_owned(),
        }
    }
}
