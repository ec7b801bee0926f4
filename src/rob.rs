use log::{debug, trace};

use crate::{
    cpu::{Module, Retired},
    inst::{RobIndex, HALT_WORD},
    wires::{drive, Flush, PredLearn, RfWrite, RobReply, StoreCommit, Wires},
};

pub const ROB_SIZE: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobEntry {
    pub ready: bool,
    pub is_branch: bool,
    pub is_jalr: bool,
    pub is_load: bool,
    pub is_store: bool,
    pub writes_rf: bool,
    pub pc: u32,
    pub pred_pc: u32,
    pub real_pc: u32,
    pub rd: u8,
    pub value: u32,
    pub mem_width: u32,
    pub raw: u32,
}

#[derive(Debug, Clone, Default)]
struct Regs {
    slots: Vec<Option<RobEntry>>,
    head: usize,
    len: usize,
    flush_pending: bool,
    flush_pc: u32,
    terminated: bool,
    retire_event: Option<Retired>,
}

impl Regs {
    fn slot(&self, index: RobIndex) -> Option<&RobEntry> {
        self.slots[usize::from(index)].as_ref()
    }

    fn slot_mut(&mut self, index: RobIndex) -> Option<&mut RobEntry> {
        self.slots[usize::from(index)].as_mut()
    }
}

/// The reorder buffer: a circular FIFO of all in-flight instructions.
/// Allocates at the tail for the DU, absorbs completions from the CDB and
/// the LSB, retires in order from the head, and originates the pipeline
/// flush one cycle after a mispredicted branch or JALR retires.
#[derive(Debug)]
pub struct ReorderBuffer {
    cur: Regs,
    next: Regs,
    log: Vec<Retired>,
    mispredicts: u64,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        let regs = Regs {
            slots: vec![None; ROB_SIZE],
            ..Regs::default()
        };
        Self {
            cur: regs.clone(),
            next: regs,
            log: Vec::new(),
            mispredicts: 0,
        }
    }

    pub fn terminated(&self) -> bool {
        self.cur.terminated
    }

    pub fn mispredicts(&self) -> u64 {
        self.mispredicts
    }

    pub fn retired(&self) -> &[Retired] {
        &self.log
    }

    pub fn take_log(&mut self) -> Vec<Retired> {
        std::mem::take(&mut self.log)
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for ReorderBuffer {
    fn combinational(&mut self, w: &mut Wires) -> bool {
        let mut next = self.cur.clone();
        next.retire_event = None;

        let mut reply = RobReply::default();
        let mut flush_out = Flush::default();
        let mut pred_out = PredLearn::default();
        let mut rf_out = RfWrite::default();
        let mut lsb_out = StoreCommit::default();

        if self.cur.flush_pending {
            // The mispredict was detected last cycle; this is the flush
            // cycle. Everything in flight, ourselves included, dies now.
            flush_out = Flush {
                valid: true,
                pc: self.cur.flush_pc,
            };
            next.slots = vec![None; ROB_SIZE];
            next.head = 0;
            next.len = 0;
            next.flush_pending = false;
        } else {
            // Completions from the CDB. The ALU's writeback for a load or
            // store carries the effective address, which belongs to the
            // LSB, not to us.
            let entry = w.cdb.entry;
            if entry.valid {
                if let Some(ent) = next.slot_mut(entry.rob_index) {
                    let addr_broadcast = entry.from_alu && (ent.is_load || ent.is_store);
                    if !addr_broadcast && !ent.ready {
                        ent.ready = true;
                        ent.value = entry.value;
                        if ent.is_branch || ent.is_jalr {
                            ent.real_pc = entry.next_pc;
                        }
                    }
                }
            }

            // A store whose address and data have both resolved in the LSB.
            if w.lsb_rob.valid {
                if let Some(ent) = next.slot_mut(w.lsb_rob.rob_index) {
                    if ent.is_store {
                        ent.ready = true;
                    }
                }
            }

            // In-order retirement, at most one per cycle, and only of
            // entries that were already complete when the cycle began.
            let head_index = RobIndex::from(self.cur.head);
            let head_ready = self
                .cur
                .slot(head_index)
                .map(|ent| ent.ready)
                .unwrap_or(false);
            if self.cur.len > 0 && head_ready {
                let ent = self.cur.slot(head_index).unwrap().clone();
                trace!("rob: retire {:?} at pc {:#010x}", head_index, ent.pc);

                // The halt sentinel only terminates: its architectural
                // write never lands, matching the reference interpreter,
                // which stops before executing it.
                let is_halt = ent.raw == HALT_WORD;

                reply.retire_valid = true;
                reply.retire_index = head_index;
                reply.retire_rd = ent.rd;
                reply.retire_value = ent.value;
                reply.retire_writes_rf = ent.writes_rf && !is_halt;

                if is_halt {
                    next.terminated = true;
                }
                if !is_halt && (ent.is_branch || ent.is_jalr) {
                    pred_out = PredLearn {
                        valid: true,
                        pc: ent.pc,
                        is_branch: ent.is_branch,
                        real_pc: ent.real_pc,
                    };
                    if ent.real_pc != ent.pred_pc {
                        debug!(
                            "rob: mispredict at pc {:#010x}: predicted {:#010x}, real {:#010x}",
                            ent.pc, ent.pred_pc, ent.real_pc
                        );
                        next.flush_pending = true;
                        next.flush_pc = ent.real_pc;
                    }
                }
                if !is_halt && ent.writes_rf && ent.rd != 0 {
                    rf_out = RfWrite {
                        valid: true,
                        rd: ent.rd,
                        value: ent.value,
                    };
                }
                if ent.is_store {
                    lsb_out = StoreCommit {
                        valid: true,
                        rob_index: head_index,
                    };
                }

                next.retire_event = Some(Retired {
                    pc: ent.pc,
                    raw: ent.raw,
                });
                next.slots[usize::from(head_index)] = None;
                next.head = (next.head + 1) % ROB_SIZE;
                next.len -= 1;
            }

            // Allocation: granted in the same cycle the entry is pushed, so
            // the DU's request is never served twice.
            if w.du_rob.alloc_valid && next.len < ROB_SIZE {
                let index = (next.head + next.len) % ROB_SIZE;
                let alloc = &w.du_rob.alloc;
                next.slots[index] = Some(RobEntry {
                    ready: false,
                    is_branch: alloc.is_branch,
                    is_jalr: alloc.is_jalr,
                    is_load: alloc.is_load,
                    is_store: alloc.is_store,
                    writes_rf: alloc.writes_rf,
                    pc: alloc.pc,
                    pred_pc: alloc.pred_pc,
                    real_pc: alloc.pc.wrapping_add(4),
                    rd: alloc.rd,
                    value: 0,
                    mem_width: alloc.mem_width,
                    raw: alloc.raw,
                });
                next.len += 1;
                reply.alloc_valid = true;
                reply.alloc_index = RobIndex::from(index);
            }

            // Operand lookups: a renaming consumer whose tag points at an
            // already-completed producer reads the value straight out of
            // the buffer instead of waiting for a broadcast that already
            // happened.
            if w.du_rob.lookup1 {
                if let Some(ent) = next.slot(w.du_rob.lookup1_index) {
                    if ent.ready {
                        reply.lookup1_ready = true;
                        reply.lookup1_value = ent.value;
                    }
                }
            }
            if w.du_rob.lookup2 {
                if let Some(ent) = next.slot(w.du_rob.lookup2_index) {
                    if ent.ready {
                        reply.lookup2_ready = true;
                        reply.lookup2_value = ent.value;
                    }
                }
            }
        }

        self.next = next;
        let mut changed = drive(&mut w.rob_du, reply);
        changed |= drive(&mut w.flush, flush_out);
        changed |= drive(&mut w.rob_pred, pred_out);
        changed |= drive(&mut w.rob_rf, rf_out);
        changed |= drive(&mut w.rob_lsb, lsb_out);
        changed
    }

    fn commit(&mut self, _w: &Wires) {
        if self.next.flush_pending && !self.cur.flush_pending {
            self.mispredicts += 1;
        }
        self.cur = self.next.clone();
        if let Some(event) = self.cur.retire_event.take() {
            self.log.push(event);
            self.next.retire_event = None;
        }
    }
}
