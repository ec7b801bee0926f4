use log::trace;

use crate::{
    cpu::Module,
    wires::{drive, FetchReply, MemReply, Wires},
};

pub const RAM_BYTES: usize = 4 << 20;

/// How long the single memory port stays busy per request.
const ACCESS_CYCLES: u32 = 3;

/// Flat little-endian RAM. Any access outside the 4 MiB window is an
/// invariant violation and aborts the simulation.
#[derive(Clone)]
pub struct Ram {
    bytes: Vec<u8>,
}

impl Ram {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; RAM_BYTES],
        }
    }

    pub fn read(&self, addr: u32, width: u32) -> u32 {
        let a = addr as usize;
        assert!(
            a + width as usize <= RAM_BYTES,
            "read of {width} bytes at {addr:#010x} out of RAM bounds"
        );
        let mut val = 0u32;
        for i in 0..width as usize {
            val |= (self.bytes[a + i] as u32) << (i * 8);
        }
        val
    }

    pub fn write(&mut self, addr: u32, width: u32, value: u32) {
        let a = addr as usize;
        assert!(
            a + width as usize <= RAM_BYTES,
            "write of {width} bytes at {addr:#010x} out of RAM bounds"
        );
        for i in 0..width as usize {
            self.bytes[a + i] = (value >> (i * 8)) as u8;
        }
    }
}

impl Default for Ram {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Ram {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "Ram({} bytes)", self.bytes.len())
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
enum State {
    #[default]
    Idle,
    Load,
    Store,
    Fetch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Regs {
    state: State,
    addr: u32,
    value: u32,
    width: u32,
    cycles_left: u32,
    // Stores touch RAM at commit, never during the settle loop.
    pending_store: Option<(u32, u32, u32)>,
}

/// Single-ported memory interface. Serves one LSB or IFU request at a time
/// with a fixed 3-cycle latency; the LSB wins arbitration, loads before
/// stores. A flush resets the port and suppresses any in-flight reply.
#[derive(Debug)]
pub struct MemoryInterfaceUnit {
    ram: Ram,
    cur: Regs,
    next: Regs,
}

impl MemoryInterfaceUnit {
    pub fn new(ram: Ram) -> Self {
        Self {
            ram,
            cur: Regs::default(),
            next: Regs::default(),
        }
    }

    pub fn ram(&self) -> &Ram {
        &self.ram
    }

    pub fn into_ram(self) -> Ram {
        self.ram
    }

    fn take_request(next: &mut Regs, w: &Wires) {
        assert!(
            !(w.lsb_miu.load && w.lsb_miu.store),
            "LSB asserted load and store requests simultaneously"
        );
        if w.lsb_miu.load {
            next.state = State::Load;
            next.addr = w.lsb_miu.addr;
            next.width = w.lsb_miu.width;
            next.cycles_left = ACCESS_CYCLES;
        } else if w.lsb_miu.store {
            next.state = State::Store;
            next.addr = w.lsb_miu.addr;
            next.width = w.lsb_miu.width;
            next.value = w.lsb_miu.value;
            next.cycles_left = ACCESS_CYCLES;
        } else if w.ifu_miu.valid {
            next.state = State::Fetch;
            next.addr = w.ifu_miu.pc;
            next.width = 4;
            next.cycles_left = ACCESS_CYCLES;
        } else {
            next.state = State::Idle;
        }
    }
}

impl Module for MemoryInterfaceUnit {
    fn combinational(&mut self, w: &mut Wires) -> bool {
        let mut next = self.cur.clone();
        let mut reply_ifu = FetchReply::default();
        let mut reply_lsb = MemReply::default();

        if w.flush.valid {
            next = Regs::default();
        } else {
            match self.cur.state {
                State::Idle => Self::take_request(&mut next, w),
                State::Load => {
                    next.cycles_left = self.cur.cycles_left - 1;
                    if next.cycles_left == 0 {
                        reply_lsb.load_valid = true;
                        reply_lsb.value = self.ram.read(self.cur.addr, self.cur.width);
                        Self::take_request(&mut next, w);
                    }
                }
                State::Store => {
                    next.cycles_left = self.cur.cycles_left - 1;
                    if next.cycles_left == 0 {
                        next.pending_store = Some((self.cur.addr, self.cur.width, self.cur.value));
                        reply_lsb.store_valid = true;
                        Self::take_request(&mut next, w);
                    }
                }
                State::Fetch => {
                    next.cycles_left = self.cur.cycles_left - 1;
                    if next.cycles_left == 0 {
                        reply_ifu.valid = true;
                        reply_ifu.raw = self.ram.read(self.cur.addr, 4);
                        reply_ifu.pc = self.cur.addr;
                        Self::take_request(&mut next, w);
                    }
                }
            }
        }

        self.next = next;
        let mut changed = drive(&mut w.miu_ifu, reply_ifu);
        changed |= drive(&mut w.miu_lsb, reply_lsb);
        changed
    }

    fn commit(&mut self, _w: &Wires) {
        self.cur = self.next.clone();
        if let Some((addr, width, value)) = self.cur.pending_store.take() {
            trace!("miu: store {value:#x} ({width}B) at {addr:#010x}");
            self.ram.write(addr, width, value);
            self.next.pending_store = None;
        }
    }
}
