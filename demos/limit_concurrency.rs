use std::ops::{Div, Mul};
use std::thread;
use std::time::{Duration, Instant};

use ringfence::runtime::spawn;
use ringfence::sync::unbounded::unbounded;
use ringfence::sync::Limiter;
use ringfence::time::sleep;

const N: u64 = 10_000;
const MAX_CONCURRENT: u64 = 100;
const SLEEP_TIME: u64 = 1;

#[ringfence::start]
fn main() {
    // Imagine we have data coming in that requires processing (eg. HTTP requests)
    let (producer, mut consumer) = unbounded().unwrap();

    // Doesn't matter where this data comes from, even another thread
    thread::spawn(move || {
        for _ in 0..N {
            producer.produced(1).unwrap();
        }
    });

    let start_time = Instant::now();

    // Because of resource constraints, we only want to process up to 100 at a time
    let limiter = Limiter::new(MAX_CONCURRENT).unwrap();

    let mut n = 0;
    while n < N {
        for _ in 0..consumer.consume().unwrap() {
            // Wait until there's room, only then spawn the fiber
            let job = limiter.next_job().unwrap();

            // Move ownership of the job into the fiber, it completes when dropped
            spawn(move || {
                process_data(n);
                drop(job);
            });
            n += 1;
        }
    }

    limiter.wait_for_all_outstanding().unwrap();

    let theoretical = Duration::from_millis(SLEEP_TIME)
        .mul(N as u32)
        .div(MAX_CONCURRENT as u32);
    println!("Theoretically, this should take {} ms", theoretical.as_millis());
    println!("In practice, this took {} ms", start_time.elapsed().as_millis());
}

/// Blissfully unaware of any concurrency going on.
fn process_data(n: u64) {
    sleep(Duration::from_millis(SLEEP_TIME)).unwrap();
    println!("processed #{n}");
}
