//! Demonstrates how a `ChunkedPool` grows, retires and releases chunks.
//!
//! Every value keeps its address for as long as it is in the pool, even while the pool grows
//! around it. Chunks that no longer serve new values are released as soon as they empty out.

#![allow(
    clippy::arithmetic_side_effects,
    reason = "example code with small values"
)]

use std::ptr::NonNull;

use chunked_pool::ChunkedPool;

fn print_state(label: &str, pool: &ChunkedPool<u64>) {
    let raw = pool.as_raw();

    println!(
        "  {label}: len={}, capacity={}, chunks={} ({} retired), active {}/{}",
        pool.len(),
        pool.capacity(),
        pool.chunk_count(),
        raw.retired_chunk_count(),
        raw.active_high_water(),
        raw.active_capacity()
    );
}

/// Shows the geometric growth of chunk capacities.
fn demonstrate_growth(pool: &mut ChunkedPool<u64>) -> Vec<NonNull<u64>> {
    println!("Example 1: Growth");
    println!("-----------------");

    print_state("idle", pool);

    let mut items = Vec::new();

    for value in 0_u64..60 {
        items.push(pool.insert(value).unwrap());

        if pool.as_raw().active_high_water() == 1 {
            print_state(&format!("after {} inserts", items.len()), pool);
        }
    }

    println!();
    items
}

/// Shows that removing every value of a retired chunk releases it.
fn demonstrate_release(pool: &mut ChunkedPool<u64>, items: &mut Vec<NonNull<u64>>) {
    println!("Example 2: Releasing retired chunks");
    println!("-----------------------------------");

    // The oldest values live in the oldest chunks.
    for (removed, ptr) in items.drain(..42).enumerate() {
        // SAFETY: Each value is still in the pool and is removed exactly once.
        let value = unsafe { pool.remove(ptr) }.unwrap();
        assert_eq!(value, u64::try_from(removed).unwrap());

        if pool.as_raw().retired_chunk_count() == 0 {
            print_state(&format!("after removing {} oldest", removed + 1), pool);
            break;
        }
    }

    println!();
}

/// Shows vacancy reuse inside the active chunk.
fn demonstrate_reuse(pool: &mut ChunkedPool<u64>, items: &mut Vec<NonNull<u64>>) {
    println!("Example 3: Reusing vacated slots");
    println!("--------------------------------");

    let vacated = items.swap_remove(0);

    // SAFETY: The value is still in the pool and is removed exactly once.
    _ = unsafe { pool.remove(vacated) }.unwrap();
    print_state("after removing one value", pool);

    let refilled = pool.insert(999).unwrap();
    println!("  reused the vacated slot: {}", refilled == vacated);
    items.push(refilled);

    print_state("after inserting again", pool);
    println!();
}

fn main() {
    println!("=== Chunk lifecycle examples ===");
    println!();

    let mut pool = ChunkedPool::<u64>::new();

    let mut items = demonstrate_growth(&mut pool);
    demonstrate_release(&mut pool, &mut items);
    demonstrate_reuse(&mut pool, &mut items);

    for ptr in items {
        // SAFETY: Each remaining value is removed exactly once.
        _ = unsafe { pool.remove(ptr) }.unwrap();
    }

    print_state("after removing everything", &pool);
}
