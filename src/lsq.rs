use log::{debug, trace};

use crate::{
    cpu::Module,
    inst::RobIndex,
    queue::Queue,
    wires::{drive, CdbEntry, LsbToDu, LsbToRob, MemRequest, Src, Wires, Writeback},
};

pub const LSB_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsbEntry {
    pub is_store: bool,
    pub width: u32,
    pub signed: bool,
    pub rob_index: RobIndex,
    /// Effective address, filled by the ALU's address broadcast.
    pub addr: Option<u32>,
    /// Store data operand; loads carry a resolved dummy.
    pub data: Src,
    /// Store: "address and data ready" has been reported to the ROB.
    pub reported: bool,
    /// Store: the ROB retired it, so it may drain to memory.
    pub committed: bool,
    /// Load: value broadcast. Store: memory write acknowledged.
    pub finished: bool,
}

/// The single in-flight memory operation. Requests are held on the wire
/// until the MIU replies, so the parameters live here in case the entry
/// itself is popped or flushed in the meantime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
enum MemPort {
    #[default]
    Idle,
    Load {
        rob_index: RobIndex,
        addr: u32,
        width: u32,
    },
    Store {
        rob_index: RobIndex,
        addr: u32,
        width: u32,
        value: u32,
    },
}

#[derive(Debug, Clone)]
struct Regs {
    entries: Queue<LsbEntry>,
    port: MemPort,
}

/// Ordered buffer of in-flight memory operations. Collects addresses and
/// store data from the CDB, forwards stores to younger loads at the same
/// address, serves loads from the MIU one at a time, and drains stores to
/// memory only after the ROB has retired them.
///
/// Every action (forward, issue, report, drain) is decided on the
/// current-cycle registers; CDB snoops land in the next-cycle registers
/// only. Acting on a same-cycle snoop would make our broadcast depend on
/// the bus we are arbitrating for, and the settle loop would not converge.
#[derive(Debug)]
pub struct LoadStoreBuffer {
    cur: Regs,
    next: Regs,
}

fn extend(raw: u32, width: u32, signed: bool) -> u32 {
    match (width, signed) {
        (1, false) => raw & 0xff,
        (1, true) => raw as u8 as i8 as i32 as u32,
        (2, false) => raw & 0xffff,
        (2, true) => raw as u16 as i16 as i32 as u32,
        _ => raw,
    }
}

impl LoadStoreBuffer {
    pub fn new() -> Self {
        let regs = Regs {
            entries: Queue::new(LSB_SIZE),
            port: MemPort::Idle,
        };
        Self {
            cur: regs.clone(),
            next: regs,
        }
    }

    /// Forwarding/issue decision for the oldest pending load, taken on the
    /// current registers: `Some(Some(v))` forwards `v`, `Some(None)` may go
    /// to memory, `None` stalls (or there is no pending load).
    fn load_decision(&self) -> Option<(usize, Option<u32>)> {
        let i = self
            .cur
            .entries
            .iter()
            .position(|ent| !ent.is_store && !ent.finished)?;
        let load = self.cur.entries.get(i).unwrap();
        let addr = load.addr?;

        for j in (0..i).rev() {
            let store = self.cur.entries.get(j).unwrap();
            if !store.is_store {
                continue;
            }
            match store.addr {
                // An unresolved older store could alias us.
                None => return None,
                Some(store_addr) if store_addr == addr => {
                    return match store.data.value() {
                        Some(v) if store.width == load.width => Some((i, Some(v))),
                        // Same address but unusable: wait behind it.
                        _ => None,
                    };
                }
                Some(_) => continue,
            }
        }
        Some((i, None))
    }
}

impl Default for LoadStoreBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for LoadStoreBuffer {
    fn combinational(&mut self, w: &mut Wires) -> bool {
        let mut next = self.cur.clone();
        let mut miu_out = MemRequest::default();
        let mut cdb_out = Writeback::default();
        let mut rob_out = LsbToRob::default();
        let mut can_accept = false;

        if w.flush.valid {
            // Keep only the prefix up to the newest retired store; those
            // must still drain. Any aborted MIU transaction is re-issued.
            loop {
                let keep = match next.entries.back() {
                    Some(back) => back.is_store && back.committed,
                    None => true,
                };
                if keep {
                    break;
                }
                next.entries.pop_back();
            }
            next.port = MemPort::Idle;
        } else {
            // New entry from the DU, patched against the live CDB so a
            // store-data broadcast in the hand-off cycle is not lost.
            if w.du_lsb.valid {
                let mut ent = LsbEntry {
                    is_store: w.du_lsb.is_store,
                    width: w.du_lsb.width,
                    signed: w.du_lsb.signed,
                    rob_index: w.du_lsb.rob_index,
                    addr: None,
                    data: w.du_lsb.data,
                    reported: false,
                    committed: false,
                    finished: false,
                };
                ent.data.capture(&w.cdb.entry);
                assert!(!next.entries.is_full(), "load/store buffer overflow");
                next.entries.push(ent);
            }

            // Snoop the CDB: address broadcasts fill addresses, value
            // broadcasts fill pending store data.
            let cdb = w.cdb.entry;
            if cdb.valid {
                for ent in next.entries.iter_mut() {
                    if cdb.is_addr() {
                        if ent.rob_index == cdb.rob_index && ent.addr.is_none() {
                            trace!("lsb: addr {:#010x} for {:?}", cdb.value, ent.rob_index);
                            ent.addr = Some(cdb.value);
                        }
                    } else if ent.is_store {
                        ent.data.capture(&cdb);
                    }
                }
            }

            // Retirement notice: the store may now touch memory.
            if w.rob_lsb.valid {
                for ent in next.entries.iter_mut() {
                    if ent.is_store && !ent.committed && ent.rob_index == w.rob_lsb.rob_index {
                        ent.committed = true;
                        break;
                    }
                }
            }

            // MIU replies, matched against the outstanding request.
            if w.miu_lsb.load_valid {
                if let MemPort::Load { rob_index, .. } = self.cur.port {
                    // A store may have forwarded to the load while the MIU
                    // request was in flight; the reply is then stale.
                    let fresh = self
                        .cur
                        .entries
                        .iter()
                        .any(|ent| !ent.is_store && ent.rob_index == rob_index && !ent.finished);
                    if fresh {
                        let ent = next
                            .entries
                            .iter_mut()
                            .find(|ent| !ent.is_store && ent.rob_index == rob_index)
                            .expect("load vanished while in flight");
                        let value = extend(w.miu_lsb.value, ent.width, ent.signed);
                        debug!("lsb: loaded {value:#010x} for {rob_index:?}");
                        cdb_out.entry = CdbEntry {
                            valid: true,
                            rob_index,
                            value,
                            next_pc: 0,
                            from_alu: false,
                            mem_op: true,
                        };
                        ent.finished = true;
                    }
                    next.port = MemPort::Idle;
                }
            }
            if w.miu_lsb.store_valid {
                if let MemPort::Store { rob_index, .. } = self.cur.port {
                    if let Some(ent) = next
                        .entries
                        .iter_mut()
                        .find(|ent| ent.is_store && ent.committed && ent.rob_index == rob_index)
                    {
                        ent.finished = true;
                    }
                    next.port = MemPort::Idle;
                }
            }

            // Drain the committed store at the head. Checked on the staged
            // state so a store acknowledged this very cycle is not driven
            // twice; `committed` only ever comes from the ROB wire, never
            // from the bus, so this closes no combinational loop.
            if next.port == MemPort::Idle {
                if let Some(head) = next.entries.front() {
                    if head.is_store && head.committed && !head.finished {
                        if let (Some(addr), Some(value)) = (head.addr, head.data.value()) {
                            next.port = MemPort::Store {
                                rob_index: head.rob_index,
                                addr,
                                width: head.width,
                                value,
                            };
                        }
                    }
                }
            }

            // The oldest pending load: forward from the nearest older store
            // to the same address, or go to memory if no older store could
            // alias it. The LSB owns the bus whenever the MIU did not claim
            // it with a load reply this cycle.
            match self.load_decision() {
                Some((i, Some(value))) => {
                    if !cdb_out.entry.valid {
                        let load = self.cur.entries.get(i).unwrap();
                        let value = extend(value, load.width, load.signed);
                        debug!("lsb: forwarded {value:#010x} to {:?}", load.rob_index);
                        cdb_out.entry = CdbEntry {
                            valid: true,
                            rob_index: load.rob_index,
                            value,
                            next_pc: 0,
                            from_alu: false,
                            mem_op: true,
                        };
                        let ent = next
                            .entries
                            .iter_mut()
                            .find(|ent| !ent.is_store && ent.rob_index == load.rob_index)
                            .expect("forwarded load vanished");
                        ent.finished = true;
                    }
                }
                Some((i, None)) => {
                    if next.port == MemPort::Idle {
                        let load = self.cur.entries.get(i).unwrap();
                        // Skip if the MIU answered this load this very
                        // cycle; re-issuing it would tie up the port.
                        let still_pending = next.entries.iter().any(|ent| {
                            !ent.is_store && ent.rob_index == load.rob_index && !ent.finished
                        });
                        if still_pending {
                            next.port = MemPort::Load {
                                rob_index: load.rob_index,
                                addr: load.addr.unwrap(),
                                width: load.width,
                            };
                        }
                    }
                }
                None => {}
            }

            // Report one execution-complete store to the ROB per cycle.
            let ready_store = self.cur.entries.iter().position(|ent| {
                ent.is_store && !ent.reported && ent.addr.is_some() && ent.data.value().is_some()
            });
            if let Some(i) = ready_store {
                let rob_index = self.cur.entries.get(i).unwrap().rob_index;
                rob_out = LsbToRob {
                    valid: true,
                    rob_index,
                };
                let ent = next
                    .entries
                    .iter_mut()
                    .find(|ent| ent.is_store && !ent.reported && ent.rob_index == rob_index)
                    .expect("reported store vanished");
                ent.reported = true;
            }

            // Finished entries leave from the head.
            while let Some(head) = next.entries.front() {
                if head.finished {
                    next.entries.pop();
                } else {
                    break;
                }
            }

            can_accept = !self.cur.entries.is_full();
        }

        // The outstanding request is held on the wire until its reply.
        match next.port {
            MemPort::Idle => {}
            MemPort::Load { addr, width, .. } => {
                miu_out = MemRequest {
                    load: true,
                    store: false,
                    addr,
                    value: 0,
                    width,
                };
            }
            MemPort::Store {
                addr, width, value, ..
            } => {
                miu_out = MemRequest {
                    load: false,
                    store: true,
                    addr,
                    value,
                    width,
                };
            }
        }

        self.next = next;
        let mut changed = drive(&mut w.lsb_miu, miu_out);
        changed |= drive(&mut w.lsb_cdb, cdb_out);
        changed |= drive(&mut w.lsb_rob, rob_out);
        changed |= drive(&mut w.lsb_du, LsbToDu { can_accept });
        changed
    }

    fn commit(&mut self, _w: &Wires) {
        self.cur = self.next.clone();
    }
}
