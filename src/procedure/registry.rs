// Explicit procedure registry, populated once at startup. Descriptors live
// for the process lifetime and are never mutated after registration.

use super::Procedure;
use crate::device::Device;

#[derive(Default)]
pub struct ProcedureRegistry {
    procedures: Vec<Box<dyn Procedure>>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in procedures.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::procedures::erase::EraseProcedure::new()));
        registry.register(Box::new(crate::procedures::script::ScriptProcedure::new(
            crate::procedures::script::default_base_dir(),
        )));
        registry
    }

    pub fn register(&mut self, procedure: Box<dyn Procedure>) {
        self.procedures.push(procedure);
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Procedure> {
        self.procedures.iter().map(|p| p.as_ref())
    }

    pub fn find(&self, name: &str) -> Option<&dyn Procedure> {
        self.iter().find(|p| p.name() == name)
    }

    /// Procedures offerable against this device: anything flagged
    /// `requires_ata` is filtered out for non-ATA devices.
    pub fn eligible<'a>(&'a self, dev: &'a Device) -> impl Iterator<Item = &'a dyn Procedure> {
        self.iter()
            .filter(move |p| dev.ata_capable || !p.capabilities().requires_ata)
    }
}
