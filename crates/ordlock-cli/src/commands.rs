//! Subcommand implementations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::ensure;
use ordlock_core::wait_wake;
use ordlock_core::{config, ConditionVariable, LockLevel, Mutex, Thread};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Mutexes exercised by `stress`, outermost first.
const HIERARCHY: [(&str, LockLevel); 8] = [
    ("mutator lock", LockLevel::Mutator),
    ("heap lock", LockLevel::Heap),
    ("thread list lock", LockLevel::ThreadList),
    ("class linker classes lock", LockLevel::ClassLinkerClasses),
    ("monitor pool lock", LockLevel::MonitorPool),
    ("default lock", LockLevel::Default),
    ("mark stack lock", LockLevel::MarkStack),
    ("logging lock", LockLevel::Logging),
];

pub fn print_levels() {
    println!("{:>5}  {:<24} {:<8} unattached", "index", "level", "severity");
    for level in LockLevel::ALL {
        println!(
            "{:>5}  {:<24} {:<8} {}",
            level.index(),
            level.name(),
            if level.is_low_severity() { "warn" } else { "abort" },
            if level.permitted_without_thread() { "yes" } else { "no" }
        );
    }
}

pub fn run_stress(threads: usize, iterations: u64, seed: u64) -> anyhow::Result<()> {
    ensure!(threads > 0, "--threads must be at least 1");
    let backend = wait_wake::default_backend();
    tracing::info!(
        threads,
        iterations,
        backend = backend.name(),
        "starting hierarchy stress"
    );

    let mutexes: Vec<Mutex> = HIERARCHY
        .iter()
        .map(|&(name, level)| Mutex::new(name, level, false))
        .collect();
    let counters: Vec<AtomicU64> = HIERARCHY.iter().map(|_| AtomicU64::new(0)).collect();
    let acquisitions: Vec<AtomicU64> = HIERARCHY.iter().map(|_| AtomicU64::new(0)).collect();
    let full_mask = (1_u32 << HIERARCHY.len()) - 1;

    let start = Instant::now();
    thread::scope(|s| {
        for worker in 0..threads {
            let (mutexes, counters, acquisitions) = (&mutexes, &counters, &acquisitions);
            s.spawn(move || {
                let thread = Thread::attach(format!("stress-{worker}"));
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(worker as u64));
                for _ in 0..iterations {
                    let mask = rng.gen_range(1..=full_mask);
                    let mut held = Vec::with_capacity(HIERARCHY.len());
                    for (i, mutex) in mutexes.iter().enumerate() {
                        if mask & (1 << i) != 0 {
                            held.push((i, mutex.lock(&thread)));
                        }
                    }
                    for &(i, _) in &held {
                        // Unsynchronized increment: only correct under the mutex.
                        let value = counters[i].load(Ordering::Relaxed);
                        counters[i].store(value + 1, Ordering::Relaxed);
                        acquisitions[i].fetch_add(1, Ordering::Relaxed);
                    }
                    while held.pop().is_some() {}
                }
            });
        }
    });
    let elapsed = start.elapsed();

    for (i, mutex) in mutexes.iter().enumerate() {
        let counted = counters[i].load(Ordering::Relaxed);
        let expected = acquisitions[i].load(Ordering::Relaxed);
        ensure!(
            counted == expected,
            "lost updates under \"{}\": {} of {}",
            mutex.name(),
            counted,
            expected
        );
        println!("{mutex}: {} acquisitions, {}", expected, mutex.dump_contention());
    }
    println!(
        "{} workers x {} rounds on {} in {:?}",
        threads,
        iterations,
        backend.name(),
        elapsed
    );
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
pub fn run_ping_pong(rounds: u64) -> anyhow::Result<()> {
    let backend = wait_wake::default_backend();
    let lock = Mutex::new("ping pong lock", LockLevel::Default, false);
    let turn_changed = ConditionVariable::new("turn changed", &lock);
    let turn = AtomicU64::new(0);
    tracing::info!(rounds, backend = backend.name(), "starting ping-pong");

    let start = Instant::now();
    thread::scope(|s| {
        for player in 0..2_u64 {
            let (lock, turn_changed, turn) = (&lock, &turn_changed, &turn);
            s.spawn(move || {
                let thread = Thread::attach(if player == 0 { "ping" } else { "pong" });
                let _held = lock.lock(&thread);
                for _ in 0..rounds {
                    while turn.load(Ordering::Relaxed) % 2 != player {
                        turn_changed.wait(&thread);
                    }
                    turn.fetch_add(1, Ordering::Relaxed);
                    turn_changed.signal(&thread);
                }
            });
        }
    });
    let elapsed = start.elapsed();

    let turns = turn.load(Ordering::Relaxed);
    ensure!(turns == rounds * 2, "expected {} turns, saw {}", rounds * 2, turns);
    let per_sec = turns as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!(
        "{} handoffs on {} in {:?} ({:.0}/s), check_lock_order={}",
        turns,
        backend.name(),
        elapsed,
        per_sec,
        config::global().check_lock_order
    );
    Ok(())
}
