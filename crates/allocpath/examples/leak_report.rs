//! Leak attribution end to end: wrap the system allocator, leak a couple
//! of buffers from distinct call chains, and report where each leaked
//! block came from.
//!
//! cargo run -p allocpath --example leak_report --features alloc-hook

use std::alloc::System;

use allocpath::{
    AllocationPathManager, GlobalPathStorage, PathTrackingAllocator, TrackerConfig, TrackerContext,
};

#[global_allocator]
static ALLOC: PathTrackingAllocator<System> = PathTrackingAllocator::new(System);

#[allocpath::track]
fn build_cache() -> &'static mut [u8] {
    Box::leak(vec![0u8; 64 * 1024].into_boxed_slice())
}

#[allocpath::track]
fn load_index() -> &'static mut [u8] {
    parse_entries()
}

#[allocpath::track]
fn parse_entries() -> &'static mut [u8] {
    Box::leak(vec![0u8; 16 * 1024].into_boxed_slice())
}

fn main() {
    env_logger::init();

    let manager = AllocationPathManager::new(&TrackerConfig::new());
    allocpath::install(TrackerContext::new(
        manager,
        Box::new(GlobalPathStorage::new()),
    ));
    let context = allocpath::installed().expect("just installed");

    let leaks = [
        ("cache", build_cache().as_ptr() as u64),
        ("index", load_index().as_ptr() as u64),
    ];

    for (label, address) in leaks {
        match context.lookup(address) {
            Some(path) => println!("leaked `{label}` block {address:#x} allocated from {path}"),
            None => println!("leaked `{label}` block {address:#x} has no recorded path"),
        }
    }

    println!(
        "captures dropped due to registry/instrumentation limits: {}",
        allocpath::hook::dropped_captures()
    );
}
