use crate::{
    cpu::Module,
    wires::{drive, CdbOut, Wires},
};

/// The common data bus: merges the LSB and ALU writeback ports into the one
/// broadcast every consumer watches. The LSB wins when both are valid (it
/// is typically the older instruction); the ALU holds its result for the
/// next cycle.
#[derive(Debug, Default)]
pub struct CommonDataBus;

impl CommonDataBus {
    pub fn new() -> Self {
        Self
    }
}

impl Module for CommonDataBus {
    fn combinational(&mut self, w: &mut Wires) -> bool {
        let entry = if w.lsb_cdb.entry.valid {
            w.lsb_cdb.entry
        } else {
            w.alu_cdb.entry
        };
        drive(&mut w.cdb, CdbOut { entry })
    }

    fn commit(&mut self, _w: &Wires) {}
}
