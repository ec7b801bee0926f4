use crate::{
    cpu::{Cpu, ExecResult, Retired, Stats},
    inst::{Instruction, Op, HALT_WORD},
    image::MemImage,
    miu::Ram,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CpuState {
    Running,
    Halted,
}

/// Reference single-step interpreter. Executes one instruction per "cycle"
/// with no pipeline at all; the out-of-order machine must agree with it on
/// final state and on retirement order.
#[derive(Debug)]
pub struct Emulated {
    regs: [u32; 32],
    mem: Ram,
    pc: u32,
    retired: Vec<Retired>,
}

impl Cpu for Emulated {
    fn new(image: &MemImage) -> Self {
        let mut mem = Ram::new();
        image.apply(&mut mem);
        Self {
            regs: [0; 32],
            mem,
            pc: 0,
            retired: Vec::new(),
        }
    }

    fn exec_all(mut self, max_cycles: u64) -> ExecResult {
        while self.exec_one() == CpuState::Running {
            assert!(
                (self.retired.len() as u64) < max_cycles,
                "no halt after {max_cycles} instructions"
            );
        }

        let stats = Stats {
            cycles_taken: self.retired.len() as u64,
            insts_retired: self.retired.len() as u64,
            mispredicts: 0,
        };
        ExecResult {
            ret: (self.regs[10] & 0xff) as u8,
            regs: self.regs,
            mem: self.mem,
            retired: self.retired,
            stats,
        }
    }
}

impl Emulated {
    fn exec_one(&mut self) -> CpuState {
        let raw = self.mem.read(self.pc, 4);

        // The halt sentinel terminates without executing; x10 keeps
        // whatever the program put there.
        if raw == HALT_WORD {
            self.retired.push(Retired { pc: self.pc, raw });
            return CpuState::Halted;
        }

        let inst = Instruction::decode(raw);
        let pc = self.pc;
        let rs1 = self.reg(inst.rs1);
        let rs2 = self.reg(inst.rs2);
        let imm = inst.imm as u32;
        let mut next_pc = pc.wrapping_add(4);

        match inst.op {
            Op::Lui => self.set_reg(inst.rd, imm),
            Op::Auipc => self.set_reg(inst.rd, pc.wrapping_add(imm)),
            Op::Jal => {
                self.set_reg(inst.rd, pc.wrapping_add(4));
                next_pc = pc.wrapping_add(imm);
            }
            Op::Jalr => {
                self.set_reg(inst.rd, pc.wrapping_add(4));
                next_pc = rs1.wrapping_add(imm) & !1;
            }
            Op::Beq => {
                if rs1 == rs2 {
                    next_pc = pc.wrapping_add(imm);
                }
            }
            Op::Bne => {
                if rs1 != rs2 {
                    next_pc = pc.wrapping_add(imm);
                }
            }
            Op::Blt => {
                if (rs1 as i32) < (rs2 as i32) {
                    next_pc = pc.wrapping_add(imm);
                }
            }
            Op::Bge => {
                if (rs1 as i32) >= (rs2 as i32) {
                    next_pc = pc.wrapping_add(imm);
                }
            }
            Op::Bltu => {
                if rs1 < rs2 {
                    next_pc = pc.wrapping_add(imm);
                }
            }
            Op::Bgeu => {
                if rs1 >= rs2 {
                    next_pc = pc.wrapping_add(imm);
                }
            }
            Op::Lb => {
                let val = self.mem.read(rs1.wrapping_add(imm), 1);
                self.set_reg(inst.rd, val as u8 as i8 as i32 as u32);
            }
            Op::Lh => {
                let val = self.mem.read(rs1.wrapping_add(imm), 2);
                self.set_reg(inst.rd, val as u16 as i16 as i32 as u32);
            }
            Op::Lw => {
                let val = self.mem.read(rs1.wrapping_add(imm), 4);
                self.set_reg(inst.rd, val);
            }
            Op::Lbu => {
                let val = self.mem.read(rs1.wrapping_add(imm), 1);
                self.set_reg(inst.rd, val);
            }
            Op::Lhu => {
                let val = self.mem.read(rs1.wrapping_add(imm), 2);
                self.set_reg(inst.rd, val);
            }
            Op::Sb => self.mem.write(rs1.wrapping_add(imm), 1, rs2),
            Op::Sh => self.mem.write(rs1.wrapping_add(imm), 2, rs2),
            Op::Sw => self.mem.write(rs1.wrapping_add(imm), 4, rs2),
            Op::Addi => self.set_reg(inst.rd, rs1.wrapping_add(imm)),
            Op::Slti => self.set_reg(inst.rd, ((rs1 as i32) < inst.imm) as u32),
            Op::Sltiu => self.set_reg(inst.rd, (rs1 < imm) as u32),
            Op::Xori => self.set_reg(inst.rd, rs1 ^ imm),
            Op::Ori => self.set_reg(inst.rd, rs1 | imm),
            Op::Andi => self.set_reg(inst.rd, rs1 & imm),
            Op::Slli => self.set_reg(inst.rd, rs1 << (imm & 0x1f)),
            Op::Srli => self.set_reg(inst.rd, rs1 >> (imm & 0x1f)),
            Op::Srai => self.set_reg(inst.rd, ((rs1 as i32) >> (imm & 0x1f)) as u32),
            Op::Add => self.set_reg(inst.rd, rs1.wrapping_add(rs2)),
            Op::Sub => self.set_reg(inst.rd, rs1.wrapping_sub(rs2)),
            Op::Sll => self.set_reg(inst.rd, rs1 << (rs2 & 0x1f)),
            Op::Slt => self.set_reg(inst.rd, ((rs1 as i32) < (rs2 as i32)) as u32),
            Op::Sltu => self.set_reg(inst.rd, (rs1 < rs2) as u32),
            Op::Xor => self.set_reg(inst.rd, rs1 ^ rs2),
            Op::Srl => self.set_reg(inst.rd, rs1 >> (rs2 & 0x1f)),
            Op::Sra => self.set_reg(inst.rd, ((rs1 as i32) >> (rs2 & 0x1f)) as u32),
            Op::Or => self.set_reg(inst.rd, rs1 | rs2),
            Op::And => self.set_reg(inst.rd, rs1 & rs2),
            // Malformed words flow through as a bubble, matching the
            // pipeline's tolerant decode.
            Op::Invalid => {}
        }

        self.retired.push(Retired { pc, raw });
        self.pc = next_pc;
        CpuState::Running
    }

    fn reg(&self, reg: u8) -> u32 {
        if reg == 0 {
            0
        } else {
            self.regs[reg as usize]
        }
    }

    fn set_reg(&mut self, reg: u8, value: u32) {
        if reg != 0 {
            self.regs[reg as usize] = value;
        }
    }
}
