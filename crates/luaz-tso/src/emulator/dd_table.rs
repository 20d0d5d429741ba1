//! DD table: maps DDnames to dataset names for the emulated address space.

use std::collections::HashMap;

use crate::abi::dair::{DatasetStatus, DARC_DDNAME_IN_USE, DARC_DDNAME_NOT_FOUND};
use crate::alloc::validate_ddname;

/// One DD allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdEntry {
    pub ddname: String,
    pub dsname: String,
    pub status: DatasetStatus,
    /// Deleted from the catalog when the DD is freed.
    pub temporary: bool,
}

/// Why a DD table request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdError {
    InUse,
    NotFound,
    InvalidName,
}

impl DdError {
    /// DYNALLOC reason code reported through DARC (zero for parameter errors).
    pub fn darc(self) -> u16 {
        match self {
            Self::InUse => DARC_DDNAME_IN_USE,
            Self::NotFound => DARC_DDNAME_NOT_FOUND,
            Self::InvalidName => 0,
        }
    }
}

/// DD table for the emulated session.
#[derive(Debug)]
pub struct DdTable {
    entries: HashMap<String, DdEntry>,
    next_dd_num: u32,
}

impl DdTable {
    /// Create an empty DD table.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_dd_num: 1,
        }
    }

    /// Allocate a DDname to a dataset.
    ///
    /// If `ddname` is `None`, a system-generated name (SYSnnnnn) is assigned.
    /// Returns the actual DDname used.
    pub fn allocate(
        &mut self,
        ddname: Option<&str>,
        dsname: &str,
        status: DatasetStatus,
        temporary: bool,
    ) -> Result<String, DdError> {
        let actual = match ddname {
            Some(name) => {
                validate_ddname(name).map_err(|_| DdError::InvalidName)?;
                name.to_ascii_uppercase()
            }
            None => self.generate_ddname(),
        };
        if self.entries.contains_key(&actual) {
            return Err(DdError::InUse);
        }
        self.entries.insert(
            actual.clone(),
            DdEntry {
                ddname: actual.clone(),
                dsname: dsname.to_ascii_uppercase(),
                status,
                temporary,
            },
        );
        Ok(actual)
    }

    /// Unallocate a DDname, returning its entry.
    pub fn unallocate(&mut self, ddname: &str) -> Result<DdEntry, DdError> {
        self.entries
            .remove(&ddname.to_ascii_uppercase())
            .ok_or(DdError::NotFound)
    }

    /// Look up a DD entry by DDname.
    pub fn lookup(&self, ddname: &str) -> Option<&DdEntry> {
        self.entries.get(&ddname.to_ascii_uppercase())
    }

    /// List all current DD allocations, sorted by DDname.
    pub fn list(&self) -> Vec<&DdEntry> {
        let mut entries: Vec<&DdEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.ddname.cmp(&b.ddname));
        entries
    }

    /// Return the number of active DD entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the DD table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn generate_ddname(&mut self) -> String {
        loop {
            let name = format!("SYS{:05}", self.next_dd_num);
            self.next_dd_num += 1;
            if !self.entries.contains_key(&name) {
                return name;
            }
        }
    }
}

impl Default for DdTable {
    fn default() -> Self {
        Self::new()
    }
}
