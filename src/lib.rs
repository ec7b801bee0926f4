use cpu::{Cpu, ExecResult};
use image::{ImageError, MemImage};

pub mod alu;
pub mod branch;
pub mod cdb;
pub mod cpu;
pub mod dispatch;
pub mod emulated;
pub mod ifu;
pub mod image;
pub mod inst;
pub mod lsq;
pub mod miu;
pub mod queue;
pub mod rat;
pub mod regs;
pub mod reservation_station;
pub mod rob;
pub mod wires;

/// Parse an ASCII hex image and run it on the chosen machine model until
/// the halt sentinel retires.
pub fn run_hex<C: Cpu>(src: &str, max_cycles: u64) -> Result<ExecResult, ImageError> {
    let image = src.parse::<MemImage>()?;
    Ok(C::new(&image).exec_all(max_cycles))
}
