use std::hint;

use pagealloc::{
    Allocator, FreeListAllocator, global::GlobalAdapter, mutex::SpinLock,
    source::os_heap::OsPages,
};

const HEAP_SIZE: usize = 64 * 1024 * 1024;

#[global_allocator]
static HEAP: GlobalAdapter<FreeListAllocator<OsPages, SpinLock>> =
    GlobalAdapter::new(FreeListAllocator::new(OsPages::new(), HEAP_SIZE));

fn report(stage: &str) {
    let heap = HEAP.get();
    let (used, allocated, freed) =
        (heap.used(), heap.total_allocated(), heap.total_freed());
    let blocks = heap.free_block_count();
    let largest = heap.largest_free_block();

    println!(
        "{stage:>10}: used={used} allocated={allocated} freed={freed} \
         free_blocks={blocks} largest={largest}"
    );
}

fn main() {
    report("start");

    let vec: Vec<usize> = (0..10_000).filter(|x| x % 13 == 0).collect();
    println!("collected {} multiples of 13", vec.len());
    report("collect");

    let mut v: Vec<u32> = Vec::new();
    for i in 0..10_000u32 {
        v.push(i);
    }
    v.truncate(100);
    v.shrink_to_fit();
    hint::black_box(v.as_ptr());
    report("shrink");

    let mut s = String::new();
    for _ in 0..10_000 {
        s.push_str("abc");
    }
    hint::black_box(s.len());

    drop(s);
    drop(v);
    drop(vec);
    report("drop");

    let merged = HEAP.get().coalesce();
    println!("coalesced {merged} blocks");
    report("coalesce");
}
