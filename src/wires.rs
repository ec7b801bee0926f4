//! Wire snapshots exchanged between modules.
//!
//! One struct per directed edge of the module graph. All of them are plain
//! data with structural equality: the kernel's settle loop detects its fixed
//! point by watching whether any module changed the value it drives onto a
//! wire. A wire keeps last cycle's snapshot until its producer drives it
//! again, so every module must drive all of its outputs every cycle.

use crate::inst::{Op, RobIndex};

/// Overwrite a wire iff the new snapshot differs, reporting the change.
pub fn drive<T: PartialEq>(wire: &mut T, value: T) -> bool {
    if *wire != value {
        *wire = value;
        true
    } else {
        false
    }
}

/// A source operand after renaming: either an actual value, or the ROB
/// index of the in-flight instruction that will produce it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Src {
    Value(u32),
    Tag(RobIndex),
}

impl Default for Src {
    fn default() -> Self {
        Src::Value(0)
    }
}

impl Src {
    pub fn value(self) -> Option<u32> {
        match self {
            Src::Value(v) => Some(v),
            Src::Tag(_) => None,
        }
    }

    /// Latch a matching CDB broadcast. Address broadcasts never carry an
    /// operand value and are skipped.
    pub fn capture(&mut self, entry: &CdbEntry) {
        if let Src::Tag(tag) = *self {
            if entry.valid && !entry.is_addr() && entry.rob_index == tag {
                *self = Src::Value(entry.value);
            }
        }
    }
}

/// One writeback on the common data bus.
///
/// `from_alu` distinguishes the ALU port from the LSB port. When the ALU
/// writes back on behalf of a load or store (`mem_op`), the value is the
/// effective address, not a result: the ROB must not treat it as a
/// completion and no operand consumer may latch it.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CdbEntry {
    pub valid: bool,
    pub rob_index: RobIndex,
    pub value: u32,
    pub next_pc: u32,
    pub from_alu: bool,
    pub mem_op: bool,
}

impl CdbEntry {
    pub fn is_addr(&self) -> bool {
        self.from_alu && self.mem_op
    }
}

// IFU -> MIU: instruction fetch request, held until the reply arrives.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub valid: bool,
    pub pc: u32,
}

// MIU -> IFU: fetched word, asserted for one cycle.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FetchReply {
    pub valid: bool,
    pub raw: u32,
    pub pc: u32,
}

// LSB -> MIU: data access request, held until the reply arrives.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MemRequest {
    pub load: bool,
    pub store: bool,
    pub addr: u32,
    pub value: u32,
    pub width: u32,
}

// MIU -> LSB
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MemReply {
    pub load_valid: bool,
    pub value: u32,
    pub store_valid: bool,
}

// IFU -> PRED: asked for control-flow instructions only.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PredRequest {
    pub valid: bool,
    pub pc: u32,
    pub is_branch: bool,
    pub is_jalr: bool,
}

// PRED -> IFU: answered the cycle after the request.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PredReply {
    pub valid: bool,
    pub pred_pc: u32,
}

// IFU -> DU: the queue head, annotated with its predicted successor.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct IfuToDu {
    pub valid: bool,
    pub raw: u32,
    pub pc: u32,
    pub pred_pc: u32,
}

// DU -> IFU
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DuToIfu {
    pub can_accept: bool,
}

// DU -> RF: up to two read ports.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RfRequest {
    pub valid: bool,
    pub read1: bool,
    pub reg1: u8,
    pub read2: bool,
    pub reg2: u8,
}

// RF -> DU: answered the cycle after the request.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RfReply {
    pub valid: bool,
    pub read1: bool,
    pub val1: u32,
    pub read2: bool,
    pub val2: u32,
}

/// Everything the ROB records about an instruction at allocation time.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RobAlloc {
    pub pc: u32,
    pub pred_pc: u32,
    pub rd: u8,
    pub writes_rf: bool,
    pub is_branch: bool,
    pub is_jalr: bool,
    pub is_load: bool,
    pub is_store: bool,
    pub mem_width: u32,
    pub raw: u32,
}

// DU -> ROB: allocation request plus up to two operand lookups for tags
// whose producer may already have completed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RobRequest {
    pub alloc_valid: bool,
    pub alloc: RobAlloc,
    pub lookup1: bool,
    pub lookup1_index: RobIndex,
    pub lookup2: bool,
    pub lookup2_index: RobIndex,
}

// ROB -> DU: allocation grant (same cycle as the request it serves),
// combinational lookup answers, and the currently retiring instruction.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RobReply {
    pub alloc_valid: bool,
    pub alloc_index: RobIndex,
    pub lookup1_ready: bool,
    pub lookup1_value: u32,
    pub lookup2_ready: bool,
    pub lookup2_value: u32,
    pub retire_valid: bool,
    pub retire_index: RobIndex,
    pub retire_rd: u8,
    pub retire_value: u32,
    pub retire_writes_rf: bool,
}

// DU -> RS
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RsIssue {
    pub valid: bool,
    pub op: Op,
    pub rob_index: RobIndex,
    pub pc: u32,
    pub src1: Src,
    pub src2: Src,
    pub imm: i32,
}

// RS -> DU
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RsToDu {
    pub can_accept: bool,
}

// DU -> LSB: the memory half of a load/store dispatch (the address half
// goes through the RS to the ALU).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct LsbIssue {
    pub valid: bool,
    pub is_store: bool,
    pub width: u32,
    pub signed: bool,
    pub rob_index: RobIndex,
    pub data: Src,
}

// LSB -> DU
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct LsbToDu {
    pub can_accept: bool,
}

// RS -> ALU: a fully resolved op, issued for one cycle.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AluIssue {
    pub valid: bool,
    pub op: Op,
    pub rob_index: RobIndex,
    pub pc: u32,
    pub src1: u32,
    pub src2: u32,
    pub imm: i32,
}

// ALU -> RS
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AluToRs {
    pub can_accept: bool,
}

// ALU -> CDB and LSB -> CDB
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Writeback {
    pub entry: CdbEntry,
}

// CDB -> ROB, DU, RS, LSB
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CdbOut {
    pub entry: CdbEntry,
}

// ROB -> PRED: retirement of a branch or JALR.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PredLearn {
    pub valid: bool,
    pub pc: u32,
    pub is_branch: bool,
    pub real_pc: u32,
}

// ROB -> RF: architectural write of the retiring instruction.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RfWrite {
    pub valid: bool,
    pub rd: u8,
    pub value: u32,
}

// ROB -> LSB: the store at this ROB index has retired and may drain.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct StoreCommit {
    pub valid: bool,
    pub rob_index: RobIndex,
}

// LSB -> ROB: this store's address and data are both resolved.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct LsbToRob {
    pub valid: bool,
    pub rob_index: RobIndex,
}

// ROB -> everyone: pipeline flush, asserted for the one cycle after a
// mispredicted branch retires.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Flush {
    pub valid: bool,
    pub pc: u32,
}

/// The full wire harness, owned by the kernel.
#[derive(Debug, Clone, Default)]
pub struct Wires {
    pub ifu_miu: FetchRequest,
    pub miu_ifu: FetchReply,
    pub lsb_miu: MemRequest,
    pub miu_lsb: MemReply,
    pub ifu_pred: PredRequest,
    pub pred_ifu: PredReply,
    pub ifu_du: IfuToDu,
    pub du_ifu: DuToIfu,
    pub du_rf: RfRequest,
    pub rf_du: RfReply,
    pub du_rob: RobRequest,
    pub rob_du: RobReply,
    pub du_rs: RsIssue,
    pub rs_du: RsToDu,
    pub du_lsb: LsbIssue,
    pub lsb_du: LsbToDu,
    pub rs_alu: AluIssue,
    pub alu_rs: AluToRs,
    pub alu_cdb: Writeback,
    pub lsb_cdb: Writeback,
    pub cdb: CdbOut,
    pub rob_pred: PredLearn,
    pub rob_rf: RfWrite,
    pub rob_lsb: StoreCommit,
    pub lsb_rob: LsbToRob,
    pub flush: Flush,
}
