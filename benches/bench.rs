use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tomasim::cpu::{Cpu, OutOfOrder};
use tomasim::image::MemImage;
use tomasim::inst::HALT_WORD;

fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
    ((imm as u32 & 0xfff) << 20) | ((rs1 as u32) << 15) | ((rd as u32) << 7) | 0b0010011
}

fn add(rd: u8, rs1: u8, rs2: u8) -> u32 {
    ((rs2 as u32) << 20) | ((rs1 as u32) << 15) | ((rd as u32) << 7) | 0b0110011
}

fn beq(rs1: u8, rs2: u8, offset: i32) -> u32 {
    let imm = offset as u32;
    (((imm >> 12) & 1) << 31)
        | (((imm >> 5) & 0x3f) << 25)
        | ((rs2 as u32) << 20)
        | ((rs1 as u32) << 15)
        | (((imm >> 1) & 0xf) << 8)
        | (((imm >> 11) & 1) << 7)
        | 0b1100011
}

fn jal(rd: u8, offset: i32) -> u32 {
    let imm = offset as u32;
    (((imm >> 20) & 1) << 31)
        | (((imm >> 1) & 0x3ff) << 21)
        | (((imm >> 11) & 1) << 20)
        | (((imm >> 12) & 0xff) << 12)
        | ((rd as u32) << 7)
        | 0b1101111
}

fn fib_image(n: i32) -> MemImage {
    let words = [
        addi(1, 0, 0),
        addi(2, 0, 1),
        addi(3, 0, n),
        beq(3, 0, 24),
        add(4, 1, 2),
        addi(1, 2, 0),
        addi(2, 4, 0),
        addi(3, 3, -1),
        jal(0, -20),
        addi(10, 1, 0),
        HALT_WORD,
    ];
    let mut image = MemImage::default();
    for (i, &word) in words.iter().enumerate() {
        image.words.push((i as u32 * 4, word));
    }
    image
}

fn run_fib(n: i32) -> u8 {
    OutOfOrder::new(&fib_image(n)).exec_all(10_000_000).ret
}

fn fib_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib_loop");
    group.sample_size(20);
    group.bench_function("fib 30", |b| b.iter(|| run_fib(black_box(30))));
    group.finish();
}

criterion_group!(benches, fib_loop);
criterion_main!(benches);
