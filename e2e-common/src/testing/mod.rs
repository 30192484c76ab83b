//! Test support shared by both crates.

mod log;

pub use log::{TestEvent, TestGuard, TestRecord, init_global_test_logging};
