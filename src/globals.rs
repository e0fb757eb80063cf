//! Per-context table of named global values.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rhai::{Dynamic, Scope};

use crate::bridge;
use crate::error::{Error, Result};
use crate::value::HostValue;

#[derive(Debug, Clone)]
struct Global {
    value: Dynamic,
    constant: bool,
}

/// Named values bound by a context's top-level code or set by the host.
///
/// Names are case-sensitive. Values declared with `const` are read-only.
#[derive(Debug, Default)]
pub struct GlobalsTable {
    entries: RwLock<BTreeMap<String, Global>>,
}

impl GlobalsTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a global as a host value.
    pub fn get(&self, name: &str) -> Result<HostValue> {
        let value = self
            .get_raw(name)
            .ok_or_else(|| Error::name_not_found(name))?;
        bridge::to_host(&value)
    }

    /// Write a global, creating it if absent.
    pub fn set(&self, name: impl Into<String>, value: HostValue) -> Result<()> {
        let name = name.into();
        let mut entries = self.entries.write();

        if entries.get(&name).is_some_and(|g| g.constant) {
            return Err(Error::ReadOnlyGlobal(name));
        }

        entries.insert(
            name,
            Global {
                value: bridge::into_interpreter(value),
                constant: false,
            },
        );
        Ok(())
    }

    /// Check if a global exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Check if a global is read-only.
    pub fn is_constant(&self, name: &str) -> Option<bool> {
        self.entries.read().get(name).map(|g| g.constant)
    }

    /// Get all global names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Get the number of globals.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy every global that has a host representation.
    ///
    /// Globals of unsupported kinds (function pointers, characters) are left out.
    pub fn snapshot(&self) -> BTreeMap<String, HostValue> {
        self.entries
            .read()
            .iter()
            .filter_map(|(name, g)| {
                bridge::to_host(&g.value)
                    .ok()
                    .map(|value| (name.clone(), value))
            })
            .collect()
    }

    pub(crate) fn get_raw(&self, name: &str) -> Option<Dynamic> {
        self.entries.read().get(name).map(|g| g.value.clone())
    }

    /// Build a scope holding the current globals, for running top-level code.
    pub(crate) fn to_scope(&self) -> Scope<'static> {
        let mut scope = Scope::new();
        for (name, g) in self.entries.read().iter() {
            if g.constant {
                scope.push_constant_dynamic(name.clone(), g.value.clone());
            } else {
                scope.push_dynamic(name.clone(), g.value.clone());
            }
        }
        scope
    }

    /// Replace the table with the variables left in `scope`.
    ///
    /// Later entries shadow earlier ones with the same name.
    pub(crate) fn absorb(&self, scope: &Scope<'_>) {
        let mut entries = BTreeMap::new();
        for (name, constant, value) in scope.iter() {
            entries.insert(name.to_string(), Global { value, constant });
        }
        *self.entries.write() = entries;
    }
}
