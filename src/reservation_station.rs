use log::trace;

use crate::{
    cpu::Module,
    inst::{Op, RobIndex},
    wires::{drive, AluIssue, RsToDu, Src, Wires},
};

pub const RS_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsEntry {
    pub op: Op,
    pub rob_index: RobIndex,
    pub pc: u32,
    pub src1: Src,
    pub src2: Src,
    pub imm: i32,
}

#[derive(Debug, Clone, Default)]
struct Regs {
    slots: Vec<Option<RsEntry>>,
    count: usize,
}

/// Unordered pool of ops waiting for operands. Snoops the CDB to fill
/// pending tags and hands at most one fully resolved entry per cycle to the
/// ALU, preferring the smallest ROB index among the ready ones.
#[derive(Debug)]
pub struct ReservationStation {
    cur: Regs,
    next: Regs,
}

impl ReservationStation {
    pub fn new() -> Self {
        let regs = Regs {
            slots: vec![None; RS_SIZE],
            count: 0,
        };
        Self {
            cur: regs.clone(),
            next: regs,
        }
    }
}

impl Default for ReservationStation {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for ReservationStation {
    fn combinational(&mut self, w: &mut Wires) -> bool {
        let mut next = self.cur.clone();
        let mut alu_out = AluIssue::default();
        let mut can_accept = false;

        if w.flush.valid {
            next.slots = vec![None; RS_SIZE];
            next.count = 0;
        } else {
            // Wake up waiting operands.
            let cdb = w.cdb.entry;
            if cdb.valid {
                for slot in next.slots.iter_mut().flatten() {
                    slot.src1.capture(&cdb);
                    slot.src2.capture(&cdb);
                }
            }

            // Issue the ready entry with the smallest ROB index.
            if w.alu_rs.can_accept {
                let pick = next
                    .slots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, slot)| slot.as_ref().map(|ent| (i, ent)))
                    .filter(|(_, ent)| ent.src1.value().is_some() && ent.src2.value().is_some())
                    .min_by_key(|(_, ent)| ent.rob_index)
                    .map(|(i, _)| i);
                if let Some(i) = pick {
                    let ent = next.slots[i].take().unwrap();
                    next.count -= 1;
                    trace!("rs: issue {} for {:?}", ent.op, ent.rob_index);
                    alu_out = AluIssue {
                        valid: true,
                        op: ent.op,
                        rob_index: ent.rob_index,
                        pc: ent.pc,
                        src1: ent.src1.value().unwrap(),
                        src2: ent.src2.value().unwrap(),
                        imm: ent.imm,
                    };
                }
            }

            // Accept a new entry, patched against the live CDB so a
            // broadcast in the hand-off cycle is not lost.
            if w.du_rs.valid {
                let mut ent = RsEntry {
                    op: w.du_rs.op,
                    rob_index: w.du_rs.rob_index,
                    pc: w.du_rs.pc,
                    src1: w.du_rs.src1,
                    src2: w.du_rs.src2,
                    imm: w.du_rs.imm,
                };
                ent.src1.capture(&w.cdb.entry);
                ent.src2.capture(&w.cdb.entry);
                let free = next
                    .slots
                    .iter()
                    .position(|slot| slot.is_none())
                    .expect("reservation station overflow");
                next.slots[free] = Some(ent);
                next.count += 1;
            }

            can_accept = self.cur.count < RS_SIZE;
        }

        self.next = next;
        let mut changed = drive(&mut w.rs_alu, alu_out);
        changed |= drive(&mut w.rs_du, RsToDu { can_accept });
        changed
    }

    fn commit(&mut self, _w: &Wires) {
        self.cur = self.next.clone();
    }
}
