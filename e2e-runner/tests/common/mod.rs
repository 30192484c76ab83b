pub mod assertions;
#[cfg(unix)]
pub mod fixtures;

pub use assertions::{assert_contains, assert_ordered};
#[cfg(unix)]
pub use fixtures::{FakeTools, HealthServer, describe};

pub fn init() {
    e2e_common::testing::init_global_test_logging();
}
