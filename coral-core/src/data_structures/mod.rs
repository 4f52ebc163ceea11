pub mod comparator;
pub(crate) mod internal;
pub mod skip_map;

pub use comparator::{Comparator, NaturalOrder};
pub use skip_map::{Iter, Keys, SkipListMap, SubMap, Values};
