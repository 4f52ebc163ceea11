//! Lock-free ordered map built on a concurrent skip list.
//!
//! ```text
//! skip_map
//!   ├── node           base nodes, markers, index and head-index nodes
//!   ├── skip_list_map  traversal, insertion, removal, level management
//!   ├── range          key bounds shared by views and iterators
//!   ├── iter           weakly consistent iterators
//!   └── sub_map        live range views
//! ```

mod iter;
mod node;
mod range;
mod skip_list_map;
mod sub_map;

pub use iter::{Iter, Keys, Values};
pub use skip_list_map::SkipListMap;
pub use sub_map::SubMap;
