//! The core types describing the register space of an endpoint
use crate::{
    error::Error,
    mask,
};
use kstring::KString;
use std::collections::HashMap;

/// Which directions of access a register allows
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    ReadWrite,
}

impl Permission {
    #[must_use]
    pub fn readable(self) -> bool {
        matches!(self, Permission::Read | Permission::ReadWrite)
    }

    #[must_use]
    pub fn writable(self) -> bool {
        matches!(self, Permission::Write | Permission::ReadWrite)
    }
}

/// How block accesses map onto addresses
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    /// A single word
    Single,
    /// A memory, block accesses walk consecutive addresses
    Incremental,
    /// A port (like a FIFO), block accesses hit the same address repeatedly
    NonIncremental,
}

/// The representation of a named register
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegisterDescriptor {
    name: KString,
    /// The word address of this register
    pub address: u32,
    /// The bits of the word this register covers
    pub mask: u32,
    pub permission: Permission,
    pub mode: Mode,
    /// Size in words. Only meaningful for [`Mode::Incremental`].
    pub size: usize,
}

impl RegisterDescriptor {
    /// A read-write, full-width, single-word register
    #[must_use]
    pub fn new(name: &str, address: u32) -> Self {
        Self {
            name: KString::from_ref(name),
            address,
            mask: u32::MAX,
            permission: Permission::ReadWrite,
            mode: Mode::Single,
            size: 1,
        }
    }

    /// Restrict this register to the bits in `mask`
    /// # Errors
    /// Returns an error if `mask` is zero, as it would select nothing
    pub fn with_mask(mut self, mask: u32) -> Result<Self, Error> {
        if mask == 0 {
            return Err(Error::InvalidArgument(format!(
                "Register `{}` can't have an empty mask",
                self.name
            )));
        }
        self.mask = mask;
        Ok(self)
    }

    #[must_use]
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    /// Turn this register into a memory of `size` words
    /// # Errors
    /// Returns an error on a zero size
    pub fn incremental(mut self, size: usize) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::InvalidArgument(format!(
                "Memory `{}` must be at least one word",
                self.name
            )));
        }
        self.mode = Mode::Incremental;
        self.size = size;
        Ok(self)
    }

    /// Turn this register into a non-incrementing port
    #[must_use]
    pub fn non_incremental(mut self) -> Self {
        self.mode = Mode::NonIncremental;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this register covers only part of its word
    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.mask != u32::MAX
    }

    /// Check that `value` fits in the bits this register covers
    /// # Errors
    /// Returns an error if `value` has bits set outside the (right-aligned) mask
    pub fn check_value(&self, value: u32) -> Result<(), Error> {
        let field = mask::field_width(self.mask);
        if value & !field != 0 {
            return Err(Error::InvalidArgument(format!(
                "Value {value:#x} doesn't fit in register `{}` with mask {:#010x}",
                self.name, self.mask
            )));
        }
        Ok(())
    }
}

/// The mapping from register names to their descriptors. Read-only once a session owns it.
#[derive(Debug, Default, Clone)]
pub struct AddressTable {
    registers: HashMap<KString, RegisterDescriptor>,
}

impl AddressTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a register
    /// # Errors
    /// Returns an error if a register of the same name already exists
    pub fn insert(&mut self, register: RegisterDescriptor) -> Result<(), Error> {
        if self.registers.contains_key(register.name()) {
            return Err(Error::InvalidArgument(format!(
                "Duplicate register `{}`",
                register.name()
            )));
        }
        self.registers.insert(register.name.clone(), register);
        Ok(())
    }

    /// Look up a register by name
    /// # Errors
    /// Returns [`Error::UnknownRegister`] if there's no such register
    pub fn resolve(&self, name: &str) -> Result<&RegisterDescriptor, Error> {
        self.registers
            .get(name)
            .ok_or_else(|| Error::UnknownRegister(name.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.values()
    }
}

impl TryFrom<Vec<RegisterDescriptor>> for AddressTable {
    type Error = Error;

    fn try_from(registers: Vec<RegisterDescriptor>) -> Result<Self, Self::Error> {
        let mut table = Self::new();
        for register in registers {
            table.insert(register)?;
        }
        Ok(table)
    }
}
