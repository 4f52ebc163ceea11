pub mod common_tests;
pub mod data_structures;
pub mod error;
pub mod guard;
mod tracing_helpers;

pub use data_structures::{Comparator, Iter, Keys, NaturalOrder, SkipListMap, SubMap, Values};
pub use error::{MapError, Result};
pub use guard::{DeferredGuard, DeferredRef, Guard};

/*

cargo llvm-cov --html

cargo test --features tracing

sudo CARGO_PROFILE_RELEASE_DEBUG=true cargo flamegraph --bench skip_list_map_benchmark --root --

*/
