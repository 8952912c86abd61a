//! Demonstrates racing coroutines with `or()` and joining them with `and()`.
//!
//! Three "downloads" finish when their completion event fires. The race resolves as soon as
//! the first one is done, while the join waits for all of them. The losers of the race keep
//! running and their results remain available on their tasks.
//!
//! Run with: `cargo run --example cooperative_race`

use std::rc::Rc;

use cooperative::{Event, and, or, start};

fn download(
    name: &'static str,
    done: &Rc<Event>,
) -> impl Future<Output = &'static str> + use<> {
    let done = Rc::clone(done);
    async move {
        done.wait().await;
        println!("  {name} finished");
        name
    }
}

fn main() {
    let names = ["mirror-a", "mirror-b", "mirror-c"];
    let events: Vec<_> = names.iter().map(|_| Rc::new(Event::new())).collect();

    let race = start(or(names
        .iter()
        .zip(&events)
        .map(|(&name, done)| download(name, done))
        .collect::<Vec<_>>()));

    let join = start(and(names
        .iter()
        .zip(&events)
        .map(|(&name, done)| download(name, done))
        .collect::<Vec<_>>()));

    for (name, event) in names.iter().zip(&events).rev() {
        println!("Completing {name}:");
        event.set();
        println!(
            "  race finished: {}, join finished: {}",
            race.is_finished(),
            join.is_finished()
        );
    }

    if let Some(tasks) = race.take_result() {
        let winners: Vec<_> = tasks.iter().filter_map(|task| task.take_result()).collect();
        println!("Race results (input order): {winners:?}");
    }

    if let Some(tasks) = join.take_result() {
        let results: Vec<_> = tasks.iter().filter_map(|task| task.take_result()).collect();
        println!("Join results (input order): {results:?}");
    }
}
