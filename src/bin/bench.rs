//! VM benchmark binary.
//!
//! Measures interpreter throughput on representative cell programs.
//! Run with: `cargo run --release --bin bench`

use std::time::{Duration, Instant};

use ngaro::virtual_machine::Cell;
use ngaro::virtual_machine::image::Image;
use ngaro::virtual_machine::isa::Instruction::{self, *};
use ngaro::virtual_machine::ports::ScriptedPorts;
use ngaro::virtual_machine::vm::VM;

/// Builds a program from opcodes and raw cells.
macro_rules! program {
    ($($c:expr),* $(,)?) => {
        vec![$(Cell::from($c)),*]
    };
}

// ---------------------------------------------------------------------------
// Benchmark harness
// ---------------------------------------------------------------------------

struct BenchResult {
    name: String,
    iterations: u64,
    total: Duration,
    /// Instructions executed by the last run.
    instructions: u64,
}

impl BenchResult {
    fn avg(&self) -> Duration {
        self.total / self.iterations as u32
    }

    fn print(&self) {
        let avg = self.avg();
        let ns_per_op = avg.as_nanos();
        let ns_per_instr = if self.instructions > 0 {
            format!("{:>8.2}", ns_per_op as f64 / self.instructions as f64)
        } else {
            "       -".to_string()
        };
        println!(
            "  {:<30} {:>7} iters {:>10.3} us/iter {:>12} instrs  {} ns/instr",
            self.name,
            self.iterations,
            ns_per_op as f64 / 1000.0,
            self.instructions,
            ns_per_instr,
        );
    }
}

/// Runs `f` for at least `min_duration`, returning aggregated results.
fn bench<F>(name: impl Into<String>, min_duration: Duration, mut f: F) -> BenchResult
where
    F: FnMut() -> u64,
{
    // Warmup
    for _ in 0..5 {
        f();
    }

    let mut iterations = 0u64;
    let mut last_steps = 0u64;
    let start = Instant::now();
    while start.elapsed() < min_duration {
        last_steps = f();
        iterations += 1;
    }
    let total = start.elapsed();

    BenchResult {
        name: name.into(),
        iterations,
        total,
        instructions: last_steps,
    }
}

/// Runs `image` until WAIT halts it; returns the instruction count.
fn run_to_wait(image: &Image) -> u64 {
    let mut vm = VM::new(image.clone(), ScriptedPorts::new([]).halt_on_wait());
    vm.run().expect("bench program faulted").steps
}

fn load(program: &[Cell], capacity: usize) -> Image {
    Image::load(program, capacity).expect("bench program does not fit")
}

// ---------------------------------------------------------------------------
// Benchmark definitions
// ---------------------------------------------------------------------------

/// Address where every counted loop body starts.
const LOOP_START: Cell = 2;

/// Tail of a counted loop: decrement the counter and branch back while it is
/// positive, then halt through WAIT.
fn loop_tail() -> Vec<Cell> {
    program![Dec, Dup, Lit, 0, GtJump, LOOP_START, Drop, Wait]
}

/// `LIT n` followed by `body` repeated `n` times.
fn counted_loop(n: Cell, body: &[Cell]) -> Vec<Cell> {
    let mut image = program![Lit, n];
    image.extend_from_slice(body);
    image.extend(loop_tail());
    image
}

fn tight_loop(n: Cell) -> Vec<Cell> {
    counted_loop(n, &[])
}

fn arithmetic_mix(n: Cell) -> Vec<Cell> {
    counted_loop(
        n,
        &program![
            Lit, 7, Lit, 3, Add, Lit, 5, Mul, Lit, 4, DivMod, Xor, Lit, 2, Shl, Lit, 1, Shr, Drop,
        ],
    )
}

fn call_overhead(n: Cell) -> Vec<Cell> {
    let body_len = 2;
    let target = LOOP_START + body_len + loop_tail().len() as Cell;
    let mut image = counted_loop(n, &program![Call, target]);
    image.push(Cell::from(Instruction::Return));
    image
}

/// Stores the counter at `base + counter` and reads it back.
fn memory(n: Cell, base: Cell) -> Vec<Cell> {
    counted_loop(
        n,
        &program![Dup, Dup, Lit, base, Add, Store, Dup, Lit, base, Add, Fetch, Drop],
    )
}

fn main() {
    let min = Duration::from_secs(2);

    println!("VM Benchmarks (each runs for >= 2s)\n");
    println!(
        "  {:<30} {:>7}       {:>14} {:>12}         {:>10}",
        "benchmark", "iters", "avg time", "instrs/run", "ns/instr"
    );
    println!("  {}", "-".repeat(92));

    // 1. Tight loop (100K iterations)
    let tight = load(&tight_loop(100_000), 64);
    bench("tight_loop(100K)", min, || run_to_wait(&tight)).print();

    // 2. Arithmetic mix (10K iterations)
    let arith = load(&arithmetic_mix(10_000), 64);
    bench("arithmetic_mix(10K)", min, || run_to_wait(&arith)).print();

    // 3. CALL/RETURN overhead (10K calls)
    let calls = load(&call_overhead(10_000), 64);
    bench("call_overhead(10K)", min, || run_to_wait(&calls)).print();

    // 4. Memory fetch/store (5K iterations)
    let mem = load(&memory(5_000, 1_000), 8_192);
    bench("mem_fetch_store(5K)", min, || run_to_wait(&mem)).print();

    // 5. Echo through scripted ports
    for &len in &[1_024usize, 16_384] {
        let input: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
        let echo = load(&program![In, Out, Jump, 0], 4);
        bench(format!("echo({} bytes)", len), min, || {
            let mut vm = VM::new(echo.clone(), ScriptedPorts::new(input.iter().copied()));
            let report = vm.run().expect("echo faulted");
            assert_eq!(vm.ports().output().len(), len);
            report.steps
        })
        .print();
    }

    println!();
}
