use log::debug;

use crate::{
    cpu::Module,
    wires::{drive, RfReply, Wires},
};

pub const RF_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Regs {
    arr: [u32; RF_SIZE],
    // A read request latched this cycle, answered the next.
    pending: bool,
    read1: bool,
    reg1: u8,
    read2: bool,
    reg2: u8,
}

impl Default for Regs {
    fn default() -> Self {
        Self {
            arr: [0; RF_SIZE],
            pending: false,
            read1: false,
            reg1: 0,
            read2: false,
            reg2: 0,
        }
    }
}

/// The 32-entry architectural register file. `x0` is hard-wired to zero.
/// Serves the DU's two read ports with single-cycle latency; writes arrive
/// from ROB retirement and are folded into a reply issued the same cycle,
/// so a read can never miss the value of an instruction that has already
/// retired.
#[derive(Debug, Default)]
pub struct RegisterFile {
    cur: Regs,
    next: Regs,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reg: u8) -> u32 {
        if reg == 0 {
            0
        } else {
            self.cur.arr[reg as usize]
        }
    }

    pub fn snapshot(&self) -> [u32; RF_SIZE] {
        self.cur.arr
    }
}

impl Module for RegisterFile {
    fn combinational(&mut self, w: &mut Wires) -> bool {
        let mut next = self.cur.clone();
        let mut reply = RfReply::default();

        if w.rob_rf.valid && w.rob_rf.rd != 0 {
            next.arr[w.rob_rf.rd as usize] = w.rob_rf.value;
            debug!("rf: x{} <- {:#010x}", w.rob_rf.rd, w.rob_rf.value);
        }

        if self.cur.pending {
            reply = RfReply {
                valid: true,
                read1: self.cur.read1,
                val1: next.arr[self.cur.reg1 as usize],
                read2: self.cur.read2,
                val2: next.arr[self.cur.reg2 as usize],
            };
            next.pending = false;
        }

        if w.du_rf.valid {
            next.pending = true;
            next.read1 = w.du_rf.read1;
            next.reg1 = w.du_rf.reg1;
            next.read2 = w.du_rf.read2;
            next.reg2 = w.du_rf.reg2;
        }

        self.next = next;
        drive(&mut w.rf_du, reply)
    }

    fn commit(&mut self, _w: &Wires) {
        self.cur = self.next.clone();
        self.cur.arr[0] = 0;
    }
}
