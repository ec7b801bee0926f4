use log::{debug, trace};

use crate::{
    cpu::Module,
    inst::{Instruction, RobIndex},
    rat::{MappingTable, RegState},
    wires::{
        drive, CdbEntry, DuToIfu, LsbIssue, RfRequest, RobAlloc, RobRequest, RsIssue, Src, Wires,
    },
};

/// Rename progress of one source operand.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
enum SrcState {
    #[default]
    Unresolved,
    /// Value in hand.
    Ready(u32),
    /// Register file read outstanding.
    AwaitRf,
    /// Will be produced by the instruction at this ROB index.
    Pending(RobIndex),
}

impl SrcState {
    fn absorb_cdb(&mut self, entry: &CdbEntry) {
        if let SrcState::Pending(tag) = *self {
            if entry.valid && !entry.is_addr() && entry.rob_index == tag {
                *self = SrcState::Ready(entry.value);
            }
        }
    }

    fn to_src(self) -> Src {
        match self {
            SrcState::Ready(value) => Src::Value(value),
            SrcState::Pending(tag) => Src::Tag(tag),
            _ => unreachable!("dispatching an unresolved operand"),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
enum State {
    #[default]
    Idle,
    Decoded,
    WaitRobAlloc,
    WaitOperands,
    OperandsReady,
    Dispatching,
    Stalled,
}

#[derive(Debug, Clone, Default)]
struct Regs {
    state: State,
    inst: Option<Instruction>,
    raw: u32,
    pc: u32,
    pred_pc: u32,
    rob_index: RobIndex,
    renamed: bool,
    src1: SrcState,
    src2: SrcState,
    pending_map: Option<(u8, RobIndex)>,
}

/// The dispatch unit: decodes one instruction at a time, allocates its ROB
/// slot, renames its sources through the mapping table, and issues it to
/// the reservation station (and, for memory ops, the load/store buffer).
#[derive(Debug)]
pub struct DispatchUnit {
    mapping: MappingTable,
    cur: Regs,
    next: Regs,
}

impl DispatchUnit {
    pub fn new() -> Self {
        Self {
            mapping: MappingTable::new(),
            cur: Regs::default(),
            next: Regs::default(),
        }
    }

    /// Resolve one source register, in the priority order: unread source,
    /// x0, the mapping table. A tagged source whose producer retires this
    /// very cycle takes the value straight off the retirement wire;
    /// otherwise it asks the ROB whether the producer has already
    /// completed, and failing that the tag stays pending for the CDB to
    /// fill.
    ///
    /// Returns the resolution plus whether an RF read and/or a ROB lookup
    /// must go out on the wires this cycle. The lookup is asserted for any
    /// tagged source, answered or not: dropping it once the answer arrives
    /// would deassert the answer too and the settle loop would never
    /// converge.
    fn rename_src(
        &self,
        reads: bool,
        reg: u8,
        lookup_ready: bool,
        lookup_value: u32,
        w: &Wires,
    ) -> (SrcState, bool, Option<RobIndex>) {
        if !reads || reg == 0 {
            return (SrcState::Ready(0), false, None);
        }

        let retire = &w.rob_du;
        match self.mapping.get(reg) {
            // A Ready mapping means the last producer's retirement commit
            // already cleared its tag, so the value is in the register
            // file; the RF folds a same-cycle retirement write into its
            // reply. No producer of `reg` can be retiring right now: its
            // tag stays in the table until its own retirement commit, and
            // a flush empties the ROB along with the table.
            RegState::Ready => (SrcState::AwaitRf, true, None),
            RegState::InFlight(tag) => {
                if retire.retire_valid && retire.retire_index == tag {
                    (SrcState::Ready(retire.retire_value), false, None)
                } else if lookup_ready {
                    (SrcState::Ready(lookup_value), false, Some(tag))
                } else {
                    (SrcState::Pending(tag), false, Some(tag))
                }
            }
        }
    }
}

impl Default for DispatchUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for DispatchUnit {
    fn combinational(&mut self, w: &mut Wires) -> bool {
        let mut next = self.cur.clone();
        next.pending_map = None;

        let mut ifu_out = DuToIfu::default();
        let mut rf_out = RfRequest::default();
        let mut rob_out = RobRequest::default();
        let mut rs_out = RsIssue::default();
        let mut lsb_out = LsbIssue::default();

        if w.flush.valid {
            next = Regs::default();
            ifu_out.can_accept = true;
        } else {
            match self.cur.state {
                State::Idle => {
                    ifu_out.can_accept = true;
                    if w.ifu_du.valid {
                        let inst = Instruction::decode(w.ifu_du.raw);
                        trace!(
                            "du: accepted {} at pc {:#010x} (pred {:#010x})",
                            inst.op,
                            w.ifu_du.pc,
                            w.ifu_du.pred_pc
                        );
                        next.inst = Some(inst);
                        next.raw = w.ifu_du.raw;
                        next.pc = w.ifu_du.pc;
                        next.pred_pc = w.ifu_du.pred_pc;
                        next.state = State::Decoded;
                    }
                }

                State::Decoded | State::WaitRobAlloc => {
                    let inst = self.cur.inst.expect("no instruction while allocating");
                    rob_out.alloc_valid = true;
                    rob_out.alloc = RobAlloc {
                        pc: self.cur.pc,
                        pred_pc: self.cur.pred_pc,
                        rd: inst.rd,
                        writes_rf: inst.op.writes_rf() && inst.rd != 0,
                        is_branch: inst.op.is_branch(),
                        is_jalr: inst.op.is_jalr(),
                        is_load: inst.op.is_load(),
                        is_store: inst.op.is_store(),
                        mem_width: inst.op.mem_width(),
                        raw: self.cur.raw,
                    };
                    if w.rob_du.alloc_valid {
                        next.rob_index = w.rob_du.alloc_index;
                        next.renamed = false;
                        next.state = State::WaitOperands;
                    } else {
                        next.state = State::WaitRobAlloc;
                    }
                }

                State::WaitOperands if !self.cur.renamed => {
                    // Rename cycle: consult the mapping table, the retiring
                    // instruction, and the ROB, and fire off RF reads for
                    // sources whose value lives in the register file.
                    let inst = self.cur.inst.expect("no instruction while renaming");

                    let (src1, rf1, tag1) = self.rename_src(
                        inst.op.reads_rs1(),
                        inst.rs1,
                        w.rob_du.lookup1_ready,
                        w.rob_du.lookup1_value,
                        w,
                    );
                    let (src2, rf2, tag2) = self.rename_src(
                        inst.op.reads_rs2(),
                        inst.rs2,
                        w.rob_du.lookup2_ready,
                        w.rob_du.lookup2_value,
                        w,
                    );

                    if let Some(tag) = tag1 {
                        rob_out.lookup1 = true;
                        rob_out.lookup1_index = tag;
                    }
                    if let Some(tag) = tag2 {
                        rob_out.lookup2 = true;
                        rob_out.lookup2_index = tag;
                    }
                    if rf1 || rf2 {
                        rf_out = RfRequest {
                            valid: true,
                            read1: rf1,
                            reg1: inst.rs1,
                            read2: rf2,
                            reg2: inst.rs2,
                        };
                    }

                    next.src1 = src1;
                    next.src2 = src2;
                    next.src1.absorb_cdb(&w.cdb.entry);
                    next.src2.absorb_cdb(&w.cdb.entry);
                    next.renamed = true;
                }

                State::WaitOperands => {
                    if w.rf_du.valid {
                        if self.cur.src1 == SrcState::AwaitRf && w.rf_du.read1 {
                            next.src1 = SrcState::Ready(w.rf_du.val1);
                        }
                        if self.cur.src2 == SrcState::AwaitRf && w.rf_du.read2 {
                            next.src2 = SrcState::Ready(w.rf_du.val2);
                        }
                    }
                    next.src1.absorb_cdb(&w.cdb.entry);
                    next.src2.absorb_cdb(&w.cdb.entry);

                    if next.src1 != SrcState::AwaitRf && next.src2 != SrcState::AwaitRf {
                        next.state = State::OperandsReady;
                    }
                }

                State::OperandsReady | State::Stalled => {
                    next.src1.absorb_cdb(&w.cdb.entry);
                    next.src2.absorb_cdb(&w.cdb.entry);

                    let inst = self.cur.inst.expect("no instruction while dispatching");
                    let room = if inst.op.is_mem() {
                        w.rs_du.can_accept && w.lsb_du.can_accept
                    } else {
                        w.rs_du.can_accept
                    };

                    if self.cur.state == State::Stalled {
                        if room {
                            next.state = State::OperandsReady;
                        }
                    } else if room {
                        // Memory ops go to both: the RS computes the
                        // effective address through the ALU, the LSB tracks
                        // the access itself.
                        rs_out = RsIssue {
                            valid: true,
                            op: inst.op,
                            rob_index: self.cur.rob_index,
                            pc: self.cur.pc,
                            src1: next.src1.to_src(),
                            src2: if inst.op.is_mem() {
                                Src::Value(0)
                            } else {
                                next.src2.to_src()
                            },
                            imm: inst.imm,
                        };
                        if inst.op.is_mem() {
                            lsb_out = LsbIssue {
                                valid: true,
                                is_store: inst.op.is_store(),
                                width: inst.op.mem_width(),
                                signed: inst.op.mem_signed(),
                                rob_index: self.cur.rob_index,
                                data: if inst.op.is_store() {
                                    next.src2.to_src()
                                } else {
                                    Src::Value(0)
                                },
                            };
                        }
                        if inst.op.writes_rf() && inst.rd != 0 {
                            next.pending_map = Some((inst.rd, self.cur.rob_index));
                        }
                        debug!("du: dispatched {} as {:?}", inst.op, self.cur.rob_index);
                        next.state = State::Dispatching;
                    } else {
                        next.state = State::Stalled;
                    }
                }

                State::Dispatching => {
                    next.state = State::Idle;
                    next.inst = None;
                    next.renamed = false;
                }
            }
        }

        self.next = next;
        let mut changed = drive(&mut w.du_ifu, ifu_out);
        changed |= drive(&mut w.du_rf, rf_out);
        changed |= drive(&mut w.du_rob, rob_out);
        changed |= drive(&mut w.du_rs, rs_out);
        changed |= drive(&mut w.du_lsb, lsb_out);
        changed
    }

    fn commit(&mut self, w: &Wires) {
        if w.flush.valid {
            self.mapping.flush();
            self.cur = self.next.clone();
            return;
        }

        self.cur = self.next.clone();

        // A retiring producer's value now lives in the register file; any
        // mapping entry still pointing at it is stale.
        if w.rob_du.retire_valid && w.rob_du.retire_writes_rf {
            self.mapping.clear_retired(w.rob_du.retire_index);
        }

        // The deferred mapping write for the instruction dispatched this
        // cycle, applied after the retirement sweep so a new tag survives.
        if let Some((rd, tag)) = self.cur.pending_map.take() {
            self.mapping.set_in_flight(rd, tag);
            self.next.pending_map = None;
        }
    }
}
