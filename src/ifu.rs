use log::trace;

use crate::{
    cpu::Module,
    inst::Instruction,
    queue::Queue,
    wires::{drive, FetchRequest, IfuToDu, PredRequest, Wires},
};

pub const IFU_QUEUE_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    raw: u32,
    pc: u32,
    /// Filled at push for straight-line code and JAL; branches and JALRs
    /// wait one cycle for the predictor.
    pred_pc: Option<u32>,
}

#[derive(Debug, Clone)]
struct Regs {
    pc: u32,
    queue: Queue<Pending>,
    fetch_in_flight: bool,
    pred_wait: bool,
}

/// Owns the architectural PC. Fetches ahead through the MIU into a small
/// queue of pre-decoded instructions annotated with their predicted
/// successor, and hands the head to the dispatch unit.
#[derive(Debug)]
pub struct InstructionFetchUnit {
    cur: Regs,
    next: Regs,
}

impl InstructionFetchUnit {
    pub fn new() -> Self {
        let regs = Regs {
            pc: 0,
            queue: Queue::new(IFU_QUEUE_SIZE),
            fetch_in_flight: false,
            pred_wait: false,
        };
        Self {
            cur: regs.clone(),
            next: regs,
        }
    }
}

impl Default for InstructionFetchUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for InstructionFetchUnit {
    fn combinational(&mut self, w: &mut Wires) -> bool {
        let mut next = self.cur.clone();
        let mut fetch_out = FetchRequest::default();
        let mut pred_out = PredRequest::default();
        let mut du_out = IfuToDu::default();

        if w.flush.valid {
            next.queue.clear();
            next.pc = w.flush.pc;
            next.fetch_in_flight = false;
            next.pred_wait = false;
        } else {
            // Fetched word arrives: pre-decode its control class.
            if w.miu_ifu.valid && self.cur.fetch_in_flight {
                let raw = w.miu_ifu.raw;
                let pc = w.miu_ifu.pc;
                let inst = Instruction::decode(raw);
                let mut entry = Pending {
                    raw,
                    pc,
                    pred_pc: None,
                };
                if inst.op.is_jal() {
                    let target = pc.wrapping_add(inst.imm as u32);
                    entry.pred_pc = Some(target);
                    next.pc = target;
                } else if inst.op.is_branch() || inst.op.is_jalr() {
                    pred_out = PredRequest {
                        valid: true,
                        pc,
                        is_branch: inst.op.is_branch(),
                        is_jalr: inst.op.is_jalr(),
                    };
                    next.pred_wait = true;
                } else {
                    entry.pred_pc = Some(pc.wrapping_add(4));
                    next.pc = pc.wrapping_add(4);
                }
                trace!("ifu: fetched {raw:#010x} at {pc:#010x}");
                next.queue.push(entry);
                next.fetch_in_flight = false;
            }

            // Predictor reply for the youngest entry.
            if w.pred_ifu.valid && self.cur.pred_wait {
                if let Some(back) = next.queue.back_mut() {
                    back.pred_pc = Some(w.pred_ifu.pred_pc);
                }
                next.pc = w.pred_ifu.pred_pc;
                next.pred_wait = false;
            }

            // Hand the head to the DU once its prediction is resolved.
            if let Some(head) = self.cur.queue.front() {
                if let Some(pred_pc) = head.pred_pc {
                    du_out = IfuToDu {
                        valid: true,
                        raw: head.raw,
                        pc: head.pc,
                        pred_pc,
                    };
                    if w.du_ifu.can_accept {
                        next.queue.pop();
                    }
                }
            }

            // Keep an outstanding fetch request on the wire, or start a new
            // one if there is room ahead.
            if next.fetch_in_flight {
                fetch_out = FetchRequest {
                    valid: true,
                    pc: self.cur.pc,
                };
            } else if !next.pred_wait && !next.queue.is_full() {
                fetch_out = FetchRequest {
                    valid: true,
                    pc: next.pc,
                };
                next.fetch_in_flight = true;
            }
        }

        self.next = next;
        let mut changed = drive(&mut w.ifu_miu, fetch_out);
        changed |= drive(&mut w.ifu_pred, pred_out);
        changed |= drive(&mut w.ifu_du, du_out);
        changed
    }

    fn commit(&mut self, _w: &Wires) {
        self.cur = self.next.clone();
    }
}
