//! Demonstrates a semaphore limiting how many coroutines work at the same time.
//!
//! Five workers compete for two permits. Each worker holds its permit until the next tick, so
//! the output shows at most two workers inside the guarded section at any moment and the rest
//! queued in the order they arrived.
//!
//! Run with: `cargo run --example cooperative_semaphore`

use std::cell::RefCell;
use std::rc::Rc;

use cooperative::{Event, Semaphore, start};

const WORKER_COUNT: usize = 5;
const PERMITS: usize = 2;

fn main() {
    let semaphore = Rc::new(Semaphore::new(PERMITS));

    // Every tick gets a fresh event, so workers that acquire a permit during a tick wait for
    // the next one instead of passing straight through.
    let tick = Rc::new(RefCell::new(Rc::new(Event::new())));

    let workers: Vec<_> = (1..=WORKER_COUNT)
        .map(|id| {
            let semaphore = Rc::clone(&semaphore);
            let tick = Rc::clone(&tick);
            start(async move {
                println!("worker {id}: waiting for a permit");
                let _permit = semaphore.acquire_guard().await;
                println!("worker {id}: working ({} permits left)", semaphore.value());

                let current = Rc::clone(&tick.borrow());
                current.wait().await;

                println!("worker {id}: done");
            })
        })
        .collect();

    for round in 1_usize.. {
        if workers.iter().all(|worker| worker.is_finished()) {
            break;
        }

        println!("--- tick {round} ---");
        let current = tick.replace(Rc::new(Event::new()));
        current.set();
    }

    println!(
        "All workers finished, {} permits available.",
        semaphore.value()
    );
}
