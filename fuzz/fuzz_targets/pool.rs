#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pool_hater::{Evaluator, PoolOp, PoolSubject};

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    // Selects the page and arena orders.
    shape: u8,
    ops: Vec<PoolOp>,
}

fn run<const MIN_ORDER: u32, const MAX_ORDER: u32>(ops: Vec<PoolOp>) {
    let subject = match PoolSubject::<MIN_ORDER, MAX_ORDER>::new() {
        Ok(s) => s,
        Err(_) => return,
    };

    let mut eval = Evaluator::new(subject);
    if let Err(failed) = eval.evaluate(ops) {
        panic!("{failed:?}");
    }
}

fuzz_target!(|args: Args| {
    match args.shape % 4 {
        0 => run::<4, 4>(args.ops),
        1 => run::<4, 12>(args.ops),
        2 => run::<6, 16>(args.ops),
        _ => run::<12, 20>(args.ops),
    }
});
