use crate::{
    cpu::Module,
    inst::Op,
    wires::{drive, AluIssue, AluToRs, CdbEntry, Wires, Writeback},
};

/// Single-cycle arithmetic/logic unit. Latches one op from the RS, computes
/// it the following cycle and writes back on the CDB; if the LSB is
/// broadcasting that cycle, the result is held until the bus is free. For
/// loads and stores the "result" is the effective address, flagged so that
/// only the LSB consumes it.
#[derive(Debug, Default)]
pub struct ArithmeticLogicUnit {
    cur: AluIssue,
    next: AluIssue,
}

impl ArithmeticLogicUnit {
    pub fn new() -> Self {
        Self::default()
    }
}

fn execute(uop: &AluIssue) -> CdbEntry {
    let AluIssue {
        op, pc, src1, src2, imm, ..
    } = *uop;
    let imm_u = imm as u32;
    let fallthrough = pc.wrapping_add(4);

    let value = match op {
        Op::Lui => imm_u,
        Op::Auipc => pc.wrapping_add(imm_u),
        Op::Jal | Op::Jalr => fallthrough,
        Op::Beq | Op::Bne | Op::Blt | Op::Bge | Op::Bltu | Op::Bgeu => 0,
        op if op.is_mem() => src1.wrapping_add(imm_u),
        Op::Addi => src1.wrapping_add(imm_u),
        Op::Slti => ((src1 as i32) < imm) as u32,
        Op::Sltiu => (src1 < imm_u) as u32,
        Op::Xori => src1 ^ imm_u,
        Op::Ori => src1 | imm_u,
        Op::Andi => src1 & imm_u,
        Op::Slli => src1 << (imm_u & 0x1f),
        Op::Srli => src1 >> (imm_u & 0x1f),
        Op::Srai => ((src1 as i32) >> (imm_u & 0x1f)) as u32,
        Op::Add => src1.wrapping_add(src2),
        Op::Sub => src1.wrapping_sub(src2),
        Op::Sll => src1 << (src2 & 0x1f),
        Op::Slt => ((src1 as i32) < (src2 as i32)) as u32,
        Op::Sltu => (src1 < src2) as u32,
        Op::Xor => src1 ^ src2,
        Op::Srl => src1 >> (src2 & 0x1f),
        Op::Sra => ((src1 as i32) >> (src2 & 0x1f)) as u32,
        Op::Or => src1 | src2,
        Op::And => src1 & src2,
        _ => 0,
    };

    let taken = match op {
        Op::Beq => src1 == src2,
        Op::Bne => src1 != src2,
        Op::Blt => (src1 as i32) < (src2 as i32),
        Op::Bge => (src1 as i32) >= (src2 as i32),
        Op::Bltu => src1 < src2,
        Op::Bgeu => src1 >= src2,
        _ => false,
    };

    let next_pc = match op {
        op if op.is_branch() => {
            if taken {
                pc.wrapping_add(imm_u)
            } else {
                fallthrough
            }
        }
        Op::Jal => pc.wrapping_add(imm_u),
        Op::Jalr => src1.wrapping_add(imm_u) & !1,
        _ => fallthrough,
    };

    CdbEntry {
        valid: true,
        rob_index: uop.rob_index,
        value,
        next_pc,
        from_alu: true,
        mem_op: op.is_mem(),
    }
}

impl Module for ArithmeticLogicUnit {
    fn combinational(&mut self, w: &mut Wires) -> bool {
        let mut next = self.cur;
        let mut writeback = Writeback::default();
        let mut can_accept = false;

        if w.flush.valid {
            next = AluIssue::default();
        } else {
            if self.cur.valid {
                // LSB writebacks take priority on the CDB; hold ours.
                if !w.lsb_cdb.entry.valid {
                    writeback.entry = execute(&self.cur);
                    next = AluIssue::default();
                }
            } else {
                can_accept = true;
                if w.rs_alu.valid {
                    next = w.rs_alu;
                }
            }
        }

        self.next = next;
        let mut changed = drive(&mut w.alu_cdb, writeback);
        changed |= drive(&mut w.alu_rs, AluToRs { can_accept });
        changed
    }

    fn commit(&mut self, _w: &Wires) {
        self.cur = self.next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::RobIndex;

    fn run(op: Op, src1: u32, src2: u32, imm: i32, pc: u32) -> CdbEntry {
        execute(&AluIssue {
            valid: true,
            op,
            rob_index: RobIndex(0),
            pc,
            src1,
            src2,
            imm,
        })
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run(Op::Add, 2, 3, 0, 0).value, 5);
        assert_eq!(run(Op::Add, u32::MAX, 1, 0, 0).value, 0);
        assert_eq!(run(Op::Sub, 2, 3, 0, 0).value, u32::MAX);
        assert_eq!(run(Op::Addi, 40, 0, 2, 0).value, 42);
        assert_eq!(run(Op::Addi, 1, 0, -2, 0).value, u32::MAX);
    }

    #[test]
    fn test_comparisons_signedness() {
        assert_eq!(run(Op::Slt, u32::MAX, 0, 0, 0).value, 1);
        assert_eq!(run(Op::Sltu, u32::MAX, 0, 0, 0).value, 0);
        assert_eq!(run(Op::Slti, u32::MAX, 0, 0, 0).value, 1);
        assert_eq!(run(Op::Sltiu, 1, 0, -1, 0).value, 1);
    }

    #[test]
    fn test_shifts() {
        assert_eq!(run(Op::Sll, 1, 33, 0, 0).value, 2);
        assert_eq!(run(Op::Srl, 0x8000_0000, 31, 0, 0).value, 1);
        assert_eq!(run(Op::Sra, 0x8000_0000, 31, 0, 0).value, u32::MAX);
        assert_eq!(run(Op::Srai, 0xffff_fff0, 0, 2, 0).value, 0xffff_fffc);
    }

    #[test]
    fn test_control_flow() {
        let jal = run(Op::Jal, 0, 0, 16, 0x100);
        assert_eq!(jal.value, 0x104);
        assert_eq!(jal.next_pc, 0x110);

        let jalr = run(Op::Jalr, 0x205, 0, 2, 0x100);
        assert_eq!(jalr.value, 0x104);
        assert_eq!(jalr.next_pc, 0x206);

        let taken = run(Op::Blt, 1, 2, -8, 0x100);
        assert_eq!(taken.next_pc, 0xf8);
        let not_taken = run(Op::Bge, 1, 2, -8, 0x100);
        assert_eq!(not_taken.next_pc, 0x104);
    }

    #[test]
    fn test_mem_address_is_flagged() {
        let entry = run(Op::Lw, 0x100, 0, 8, 0);
        assert_eq!(entry.value, 0x108);
        assert!(entry.is_addr());
        assert!(!run(Op::Add, 1, 2, 0, 0).is_addr());
    }
}
