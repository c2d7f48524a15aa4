#![cfg(feature = "std")]

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use log::{LevelFilter, Log, Metadata, Record};
use pagealloc::{
    FreeListAllocator, global::GlobalAdapter, mutex::SpinLock,
    source::os_heap::OsPages,
};

#[global_allocator]
static HEAP: GlobalAdapter<FreeListAllocator<OsPages, SpinLock>> =
    GlobalAdapter::new(FreeListAllocator::new(OsPages::new(), 16 << 20));

static LINES: AtomicUsize = AtomicUsize::new(0);

/// Renders every record into a fresh `String`, so each log call allocates
/// from `HEAP`.
struct FormattingLogger;

impl Log for FormattingLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let line = format!(
            "{} {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
        if !line.is_empty() {
            LINES.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {}
}

static LOGGER: FormattingLogger = FormattingLogger;

#[test]
fn allocating_logger_runs_on_top_of_the_heap() {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(LevelFilter::Trace);

    let worker = thread::spawn(|| {
        let mut v: Vec<u8> = Vec::with_capacity(1000);
        v.extend(0..=255);
        v.shrink_to_fit();

        let s: String =
            (0..500u32).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        (v.len(), s.len())
    });
    assert_eq!(worker.join().unwrap(), (256, 500));

    let before = LINES.load(Ordering::Relaxed);
    HEAP.get().coalesce();
    assert!(LINES.load(Ordering::Relaxed) > before);
}
