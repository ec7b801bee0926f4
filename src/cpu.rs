use log::debug;

use crate::{
    alu::ArithmeticLogicUnit,
    branch::BranchPredictor,
    cdb::CommonDataBus,
    dispatch::DispatchUnit,
    ifu::InstructionFetchUnit,
    image::MemImage,
    lsq::LoadStoreBuffer,
    miu::{MemoryInterfaceUnit, Ram},
    regs::RegisterFile,
    reservation_station::ReservationStation,
    rob::ReorderBuffer,
    wires::Wires,
};

/// A hardware unit in the settle-and-sync model.
///
/// `combinational` recomputes the module's output wires and staged
/// next-cycle registers from its current registers and input wires, and
/// reports whether any output changed; the kernel iterates until a full
/// pass over all modules changes nothing. `commit` then latches the staged
/// registers. Correctness requires `combinational` to be idempotent and to
/// never read its own outputs back.
pub trait Module {
    fn combinational(&mut self, wires: &mut Wires) -> bool;
    fn commit(&mut self, wires: &Wires);
}

/// One retired instruction, in order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Retired {
    pub pc: u32,
    pub raw: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub cycles_taken: u64,
    pub insts_retired: u64,
    pub mispredicts: u64,
}

#[derive(Debug)]
pub struct ExecResult {
    /// Low byte of x10, the program's answer.
    pub ret: u8,
    pub regs: [u32; 32],
    pub mem: Ram,
    pub retired: Vec<Retired>,
    pub stats: Stats,
}

/// A machine model that can run a loaded memory image to the halt sentinel.
pub trait Cpu {
    fn new(image: &MemImage) -> Self;

    fn exec_all(self, max_cycles: u64) -> ExecResult;
}

/// If a cycle's combinational settle needs more passes than this, some
/// module closed a zero-delay loop.
const SETTLE_BOUND: u32 = 64;

/// The full out-of-order machine: ten modules around one wire harness,
/// clocked by `tick`.
#[derive(Debug)]
pub struct OutOfOrder {
    miu: MemoryInterfaceUnit,
    cdb: CommonDataBus,
    pred: BranchPredictor,
    rf: RegisterFile,
    rob: ReorderBuffer,
    ifu: InstructionFetchUnit,
    du: DispatchUnit,
    alu: ArithmeticLogicUnit,
    lsb: LoadStoreBuffer,
    rs: ReservationStation,
    wires: Wires,
    cycles: u64,
}

impl OutOfOrder {
    /// Advance one clock: settle the combinational fabric to a fixed
    /// point, then latch every module once. Returns false once the halt
    /// sentinel has retired.
    pub fn tick(&mut self) -> bool {
        let mut passes = 0;
        loop {
            assert!(
                passes < SETTLE_BOUND,
                "combinational settle did not converge after {SETTLE_BOUND} passes \
                 (zero-delay loop in the module graph)"
            );
            passes += 1;

            // The order of this pass is irrelevant; the loop runs until a
            // whole pass leaves every wire unchanged.
            let mut changed = false;
            changed |= self.miu.combinational(&mut self.wires);
            changed |= self.cdb.combinational(&mut self.wires);
            changed |= self.pred.combinational(&mut self.wires);
            changed |= self.rf.combinational(&mut self.wires);
            changed |= self.rob.combinational(&mut self.wires);
            changed |= self.ifu.combinational(&mut self.wires);
            changed |= self.du.combinational(&mut self.wires);
            changed |= self.alu.combinational(&mut self.wires);
            changed |= self.lsb.combinational(&mut self.wires);
            changed |= self.rs.combinational(&mut self.wires);
            if !changed {
                break;
            }
        }

        self.miu.commit(&self.wires);
        self.cdb.commit(&self.wires);
        self.pred.commit(&self.wires);
        self.rf.commit(&self.wires);
        self.rob.commit(&self.wires);
        self.ifu.commit(&self.wires);
        self.du.commit(&self.wires);
        self.alu.commit(&self.wires);
        self.lsb.commit(&self.wires);
        self.rs.commit(&self.wires);

        self.cycles += 1;
        !self.rob.terminated()
    }

    pub fn mem(&self) -> &Ram {
        self.miu.ram()
    }

    pub fn reg(&self, reg: u8) -> u32 {
        self.rf.get(reg)
    }

    pub fn retired(&self) -> &[Retired] {
        self.rob.retired()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

impl Cpu for OutOfOrder {
    fn new(image: &MemImage) -> Self {
        let mut ram = Ram::new();
        image.apply(&mut ram);

        Self {
            miu: MemoryInterfaceUnit::new(ram),
            cdb: CommonDataBus::new(),
            pred: BranchPredictor::new(),
            rf: RegisterFile::new(),
            rob: ReorderBuffer::new(),
            ifu: InstructionFetchUnit::new(),
            du: DispatchUnit::new(),
            alu: ArithmeticLogicUnit::new(),
            lsb: LoadStoreBuffer::new(),
            rs: ReservationStation::new(),
            wires: Wires::default(),
            cycles: 0,
        }
    }

    fn exec_all(mut self, max_cycles: u64) -> ExecResult {
        while self.tick() {
            assert!(
                self.cycles < max_cycles,
                "no halt after {max_cycles} cycles"
            );
        }

        let mut rob = self.rob;
        let stats = Stats {
            cycles_taken: self.cycles,
            insts_retired: rob.retired().len() as u64,
            mispredicts: rob.mispredicts(),
        };
        debug!(
            "halt: {} instructions in {} cycles, {} mispredicts",
            stats.insts_retired, stats.cycles_taken, stats.mispredicts
        );

        ExecResult {
            ret: (self.rf.get(10) & 0xff) as u8,
            regs: self.rf.snapshot(),
            mem: self.miu.into_ram(),
            retired: rob.take_log(),
            stats,
        }
    }
}
