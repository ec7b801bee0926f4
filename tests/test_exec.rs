use tomasim::cpu::{Cpu, OutOfOrder};
use tomasim::emulated::Emulated;
use tomasim::image::MemImage;

mod common;
use common::*;

/// Sum 5+4+3+2+1 with a backward branch, result in x10.
fn countdown_loop() -> Vec<u32> {
    vec![
        addi(1, 0, 5),
        addi(5, 0, 0),
        add(5, 5, 1),    // 0x08: loop body
        addi(1, 1, -1),
        bne(1, 0, -8),   // back to 0x08
        addi(10, 5, 0),
        HALT,
    ]
}

/// Iterative Fibonacci, result in x10.
fn fibonacci(n: i32) -> Vec<u32> {
    vec![
        addi(1, 0, 0),
        addi(2, 0, 1),
        addi(3, 0, n),
        beq(3, 0, 24),   // 0x0c: to 0x24
        add(4, 1, 2),
        addi(1, 2, 0),
        addi(2, 4, 0),
        addi(3, 3, -1),
        jal(0, -20),     // back to 0x0c
        addi(10, 1, 0),  // 0x24
        HALT,
    ]
}

/// Call a function at 0x14 through jal, return through jalr.
fn call_and_return() -> Vec<u32> {
    vec![
        jal(1, 20),      // 0x00: call 0x14, x1 = 4
        addi(10, 5, 0),  // 0x04
        HALT,            // 0x08
        0,               // 0x0c: padding
        0,               // 0x10
        addi(5, 0, 77),  // 0x14: the function
        jalr(0, 1, 0),   // return to 0x04
    ]
}

#[generic_tests::define]
mod t {
    use super::*;

    // The halt sentinel is itself an addi to x10, but it only terminates;
    // the preceding write is the one that sticks.
    #[test]
    fn test_halt_preserves_result<C: Cpu>() {
        let res = run_prog::<C>(&[addi(10, 0, 42), HALT]);
        assert_eq!(res.ret, 42);
        assert_eq!(res.retired.len(), 2);
    }

    #[test]
    fn test_fibonacci<C: Cpu>() {
        assert_eq!(run_prog::<C>(&fibonacci(10)).ret, 55);
        assert_eq!(run_prog::<C>(&fibonacci(1)).ret, 1);
        assert_eq!(run_prog::<C>(&fibonacci(0)).ret, 0);
    }

    #[test]
    fn test_store_load_roundtrip<C: Cpu>() {
        let res = run_prog::<C>(&[
            lui(5, 0x12345),
            addi(5, 5, 0x678),
            sw(5, 0, 0x40),
            lw(10, 0, 0x40),
            addi(10, 10, 0),
            HALT,
        ]);
        assert_eq!(res.ret, 120);
        assert_eq!(res.regs[5], 0x1234_5678);
        assert_eq!(res.mem.read(0x40, 4), 0x1234_5678);
    }

    // A branch pattern that trains the 2-bit counter both ways.
    #[test]
    fn test_branch_pattern<C: Cpu>() {
        let res = run_prog::<C>(&countdown_loop());
        assert_eq!(res.ret, 15);
    }

    // Back-to-back dependent ALU ops exercise the tag-wakeup path.
    #[test]
    fn test_dependent_chain<C: Cpu>() {
        let res = run_prog::<C>(&[
            addi(1, 0, 1),
            add(2, 1, 1),
            add(3, 2, 1),
            addi(10, 3, 0),
            HALT,
        ]);
        assert_eq!(res.ret, 3);
    }

    // Store-to-load forwarding past an unrelated op, regardless of the
    // memory latency.
    #[test]
    fn test_store_forwards_to_load<C: Cpu>() {
        let res = run_prog::<C>(&[
            addi(5, 0, 90),
            sw(5, 0, 0x30),
            addi(6, 0, 7),
            lw(10, 0, 0x30),
            HALT,
        ]);
        assert_eq!(res.ret, 90);
        assert_eq!(res.regs[6], 7);
    }

    #[test]
    fn test_loaded_value_feeds_dependents<C: Cpu>() {
        // The add must capture the load's data broadcast, not the address
        // the ALU computes for it.
        let res = run_prog::<C>(&[
            addi(5, 0, 42),
            sw(5, 0, 0x50),
            lw(6, 0, 0x50),
            add(7, 6, 6),
            addi(10, 7, 0),
            HALT,
        ]);
        assert_eq!(res.ret, 84);
    }

    #[test]
    fn test_store_data_renamed<C: Cpu>() {
        // The store's data operand is produced by a load still in flight
        // when the store dispatches.
        let res = run_segments::<C>(&[
            (
                0,
                &[
                    lw(5, 0, 0x100),
                    sw(5, 0, 0x104),
                    lw(10, 0, 0x104),
                    HALT,
                ],
            ),
            (0x100, &[0xcafe_0042]),
        ]);
        assert_eq!(res.ret, 0x42);
        assert_eq!(res.mem.read(0x104, 4), 0xcafe_0042);
    }

    #[test]
    fn test_raw_chain_same_register<C: Cpu>() {
        let res = run_prog::<C>(&[
            addi(1, 0, 1),
            addi(1, 1, 2),
            addi(1, 1, 4),
            addi(10, 1, 0),
            HALT,
        ]);
        assert_eq!(res.ret, 7);
    }

    #[test]
    fn test_call_and_return<C: Cpu>() {
        let res = run_prog::<C>(&call_and_return());
        assert_eq!(res.ret, 77);
        assert_eq!(res.regs[1], 4);
    }

    #[test]
    fn test_byte_and_half_accesses<C: Cpu>() {
        let res = run_prog::<C>(&[
            addi(5, 0, -128),   // 0xffffff80
            sb(5, 0, 0x40),
            lb(6, 0, 0x40),     // sign-extended
            lbu(7, 0, 0x40),    // zero-extended
            lui(8, 0x8),        // 0x8000
            sh(8, 0, 0x44),
            lh(9, 0, 0x44),
            lhu(11, 0, 0x44),
            addi(10, 7, 0),
            HALT,
        ]);
        assert_eq!(res.ret, 128);
        assert_eq!(res.regs[6], 0xffff_ff80);
        assert_eq!(res.regs[7], 0x80);
        assert_eq!(res.regs[9], 0xffff_8000);
        assert_eq!(res.regs[11], 0x8000);
        // sb touches one byte only.
        assert_eq!(res.mem.read(0x40, 4), 0x80);
    }

    #[test]
    fn test_signed_unsigned_compares<C: Cpu>() {
        let res = run_prog::<C>(&[
            addi(1, 0, -1),
            addi(2, 0, 1),
            slt(3, 1, 2),    // -1 < 1 signed -> 1
            sltu(4, 1, 2),   // 0xffffffff < 1 unsigned -> 0
            slti(5, 1, 0),   // -1 < 0 -> 1
            sltiu(6, 2, -1), // 1 < 0xffffffff -> 1
            sra(7, 1, 2),    // -1 >> 1 arithmetic -> -1
            srl(8, 1, 2),    // logical -> 0x7fffffff
            add(9, 3, 4),
            add(9, 9, 5),
            add(9, 9, 6),
            addi(10, 9, 0),  // 1 + 0 + 1 + 1
            HALT,
        ]);
        assert_eq!(res.ret, 3);
        assert_eq!(res.regs[7], u32::MAX);
        assert_eq!(res.regs[8], 0x7fff_ffff);
    }

    #[test]
    fn test_x0_ignores_writes<C: Cpu>() {
        let res = run_prog::<C>(&[
            addi(0, 0, 99),
            add(5, 0, 0),
            addi(10, 5, 0),
            HALT,
        ]);
        assert_eq!(res.ret, 0);
        assert_eq!(res.regs[0], 0);
    }

    #[test]
    fn test_image_segments<C: Cpu>() {
        let res = run_segments::<C>(&[
            (0, &[lw(10, 0, 0x200), HALT]),
            (0x200, &[0x0000_00aa]),
        ]);
        assert_eq!(res.ret, 0xaa);
    }

    #[instantiate_tests(<Emulated>)]
    mod emulated {}

    #[instantiate_tests(<OutOfOrder>)]
    mod out_of_order {}
}

/// Properties specific to the out-of-order machine, checked against the
/// reference interpreter.
mod ooo {
    use super::*;

    fn assert_matches_reference(words: &[u32]) {
        let ooo = run_prog::<OutOfOrder>(words);
        let emu = run_prog::<Emulated>(words);
        assert_eq!(ooo.ret, emu.ret);
        assert_eq!(ooo.regs, emu.regs);
        assert_eq!(ooo.retired, emu.retired, "retirement order diverged");
    }

    #[test]
    fn test_retirement_order_matches_reference() {
        assert_matches_reference(&fibonacci(10));
        assert_matches_reference(&countdown_loop());
        assert_matches_reference(&call_and_return());
    }

    #[test]
    fn test_mispredict_recovery() {
        // The first encounter of the backward branch and the final exit
        // both mispredict; no wrong-path effect may survive.
        let res = run_prog::<OutOfOrder>(&countdown_loop());
        assert_eq!(res.ret, 15);
        assert!(res.stats.mispredicts >= 1);

        let emu = run_prog::<Emulated>(&countdown_loop());
        assert_eq!(res.retired, emu.retired);
    }

    #[test]
    fn test_store_not_visible_before_retirement() {
        init();
        let words = [
            addi(5, 0, 123),
            sw(5, 0, 0x40),
            addi(6, 0, 1),
            HALT,
        ];
        let image = hex_image(&words).parse::<MemImage>().unwrap();
        let store = sw(5, 0, 0x40);

        let mut cpu = OutOfOrder::new(&image);
        loop {
            let running = cpu.tick();
            if cpu.mem().read(0x40, 4) == 123 {
                assert!(
                    cpu.retired().iter().any(|r| r.raw == store),
                    "store modified RAM before it retired"
                );
            }
            if !running {
                break;
            }
            assert!(cpu.cycles() < MAX_CYCLES);
        }
        assert_eq!(cpu.mem().read(0x40, 4), 123);
    }

    #[test]
    fn test_flush_discards_wrong_path_stores() {
        // The second return mispredicts to the first call site, so the
        // wrong path re-fetches an increment and a store that already ran.
        // Neither may leave a trace.
        let words = [
            jal(1, 32),      // 0x00: call 0x20, x1 = 0x04
            addi(2, 2, 1),   // 0x04
            sw(2, 0, 0x60),  // 0x08: mem[0x60] = 1
            jal(1, 20),      // 0x0c: call 0x20, x1 = 0x10
            lw(10, 0, 0x60), // 0x10
            HALT,            // 0x14
            0,               // 0x18
            0,               // 0x1c
            addi(3, 3, 1),   // 0x20: the function
            jalr(0, 1, 0),   // return
        ];
        let res = run_prog::<OutOfOrder>(&words);
        let emu = run_prog::<Emulated>(&words);
        assert_eq!(res.ret, 1);
        assert_eq!(res.regs[2], 1, "wrong-path increment leaked");
        assert_eq!(res.mem.read(0x60, 4), 1, "wrong-path store leaked");
        assert_eq!(res.regs, emu.regs);
        assert_eq!(res.retired, emu.retired);
        assert!(res.stats.mispredicts >= 1);
    }

    #[test]
    fn test_loop_heavy_program_converges() {
        // Each iteration stores its counter and immediately reloads it
        // through the same address, mixing forwarding with real memory
        // traffic under a trained branch.
        let words = [
            addi(1, 0, 0),    // i
            addi(2, 0, 0),    // acc addr cursor
            addi(3, 0, 8),    // limit
            sw(1, 2, 0x80),   // 0x0c: loop: mem[0x80 + cursor] = i
            lw(4, 2, 0x80),
            addi(2, 2, 4),
            addi(1, 1, 1),
            bne(1, 3, -16),   // back to 0x0c
            lw(10, 0, 0x98),  // mem written in iteration i=6
            HALT,
        ];
        let res = run_prog::<OutOfOrder>(&words);
        let emu = run_prog::<Emulated>(&words);
        assert_eq!(res.ret, emu.ret);
        assert_eq!(res.ret, 6);
        assert_eq!(res.retired, emu.retired);
    }
}
