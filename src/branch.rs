use hashbrown::HashMap;
use log::trace;

use crate::{
    cpu::Module,
    wires::{drive, PredReply, Wires},
};

// 2-bit saturating counter: 00 strong not-taken .. 11 strong taken.
const WEAK_TAKEN: u8 = 0b10;
const STRONG_TAKEN: u8 = 0b11;

#[derive(Debug, Clone, Default)]
struct Regs {
    /// Per-site 2-bit counters for conditional branches.
    bht: HashMap<u32, u8>,
    /// Last observed real successor, per site. Kept for branches and JALRs.
    targets: HashMap<u32, u32>,
    /// A prediction latched this cycle, sent to the IFU next cycle.
    reply: Option<u32>,
}

/// Branch predictor. Learns only from ROB retirements, so a flush never
/// needs to undo anything here.
#[derive(Debug)]
pub struct BranchPredictor {
    cur: Regs,
    next: Regs,
}

impl BranchPredictor {
    pub fn new() -> Self {
        Self {
            cur: Regs::default(),
            next: Regs::default(),
        }
    }

    fn predict(regs: &Regs, pc: u32, is_jalr: bool) -> u32 {
        let fallthrough = pc.wrapping_add(4);
        if is_jalr {
            return regs.targets.get(&pc).copied().unwrap_or(fallthrough);
        }
        let counter = regs.bht.get(&pc).copied().unwrap_or(WEAK_TAKEN);
        if counter >= WEAK_TAKEN {
            regs.targets.get(&pc).copied().unwrap_or(fallthrough)
        } else {
            fallthrough
        }
    }
}

impl Default for BranchPredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for BranchPredictor {
    fn combinational(&mut self, w: &mut Wires) -> bool {
        let mut next = self.cur.clone();
        let mut reply = PredReply::default();

        if w.flush.valid {
            next.reply = None;
        } else {
            // Learn first, so a prediction issued this cycle sees the
            // freshest retirement.
            if w.rob_pred.valid {
                let pc = w.rob_pred.pc;
                if w.rob_pred.is_branch {
                    let taken = w.rob_pred.real_pc != pc.wrapping_add(4);
                    let counter = next.bht.entry(pc).or_insert(WEAK_TAKEN);
                    *counter = if taken {
                        (*counter + 1).min(STRONG_TAKEN)
                    } else {
                        counter.saturating_sub(1)
                    };
                }
                next.targets.insert(pc, w.rob_pred.real_pc);
            }

            if let Some(pred_pc) = self.cur.reply {
                reply = PredReply {
                    valid: true,
                    pred_pc,
                };
                next.reply = None;
            }

            if w.ifu_pred.valid && self.cur.reply.is_none() {
                let pred = Self::predict(&next, w.ifu_pred.pc, w.ifu_pred.is_jalr);
                trace!("pred: pc {:#010x} -> {pred:#010x}", w.ifu_pred.pc);
                next.reply = Some(pred);
            }
        }

        self.next = next;
        drive(&mut w.pred_ifu, reply)
    }

    fn commit(&mut self, _w: &Wires) {
        self.cur = self.next.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wires::{PredLearn, PredRequest};

    fn learn(pred: &mut BranchPredictor, pc: u32, real_pc: u32) {
        let mut w = Wires::default();
        w.rob_pred = PredLearn {
            valid: true,
            pc,
            is_branch: true,
            real_pc,
        };
        pred.combinational(&mut w);
        pred.commit(&w);
    }

    fn ask(pred: &mut BranchPredictor, pc: u32, is_jalr: bool) -> u32 {
        let mut w = Wires::default();
        w.ifu_pred = PredRequest {
            valid: true,
            pc,
            is_branch: !is_jalr,
            is_jalr,
        };
        pred.combinational(&mut w);
        pred.commit(&w);
        w.ifu_pred = PredRequest::default();
        pred.combinational(&mut w);
        pred.commit(&w);
        assert!(w.pred_ifu.valid);
        w.pred_ifu.pred_pc
    }

    #[test]
    fn test_unknown_site_falls_through() {
        let mut pred = BranchPredictor::new();
        assert_eq!(ask(&mut pred, 0x40, false), 0x44);
        assert_eq!(ask(&mut pred, 0x40, true), 0x44);
    }

    #[test]
    fn test_counter_saturates() {
        let mut pred = BranchPredictor::new();
        // Starts weak-taken: one not-taken retirement flips the prediction.
        learn(&mut pred, 0x40, 0x44);
        assert_eq!(ask(&mut pred, 0x40, false), 0x44);
        // Two taken retirements push it back over the threshold.
        learn(&mut pred, 0x40, 0x80);
        learn(&mut pred, 0x40, 0x80);
        assert_eq!(ask(&mut pred, 0x40, false), 0x80);
        // Saturated taken: one not-taken retirement keeps the counter over
        // the threshold, but the cached target now points at the
        // fall-through, so the site still predicts pc + 4.
        learn(&mut pred, 0x40, 0x80);
        learn(&mut pred, 0x40, 0x44);
        assert_eq!(ask(&mut pred, 0x40, false), 0x44);
        learn(&mut pred, 0x40, 0x80);
        assert_eq!(ask(&mut pred, 0x40, false), 0x80);
    }

    #[test]
    fn test_jalr_uses_last_target() {
        let mut pred = BranchPredictor::new();
        let mut w = Wires::default();
        w.rob_pred = PredLearn {
            valid: true,
            pc: 0x10,
            is_branch: false,
            real_pc: 0x200,
        };
        pred.combinational(&mut w);
        pred.commit(&w);
        assert_eq!(ask(&mut pred, 0x10, true), 0x200);
    }
}
