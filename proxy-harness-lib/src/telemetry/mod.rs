pub mod tracing;

pub use self::tracing::{init_test_tracing, init_tracing};
