use std::{
    io::Read,
    path::PathBuf,
    process,
    time::Instant,
};

use clap::Parser;
use log::info;

use tomasim::{cpu::OutOfOrder, run_hex};

/// Cycle-accurate simulator of a Tomasulo-style out-of-order RV32I core.
///
/// Reads an ASCII hex memory image, runs it until the halt sentinel
/// retires, and prints the low byte of x10.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Hex image to load; standard input if omitted.
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Abort if the program has not halted after this many cycles.
    #[arg(long, default_value_t = 100_000_000)]
    max_cycles: u64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let start = Instant::now();

    let src = match &args.file {
        Some(path) => std::fs::read_to_string(path).unwrap_or_else(|e| {
            eprintln!("error: cannot read {}: {e}", path.display());
            process::exit(1);
        }),
        None => {
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("error: cannot read stdin: {e}");
                process::exit(1);
            }
            buf
        }
    };

    let res = match run_hex::<OutOfOrder>(&src, args.max_cycles) {
        Ok(res) => res,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    info!(
        "retired {} instructions in {} cycles ({} mispredicts, {:.2}s)",
        res.stats.insts_retired,
        res.stats.cycles_taken,
        res.stats.mispredicts,
        start.elapsed().as_secs_f32()
    );

    println!("{}", res.ret);
}
