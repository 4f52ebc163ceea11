//! Crossbeam-based reclamation for coral maps.
//!
//! This crate provides `EpochGuard`, an implementation of the `Guard` trait
//! backed by crossbeam-epoch, and the `EpochSkipListMap` alias for the map
//! configured with it.
//!
//! # Usage
//!
//! ```ignore
//! use coral_crossbeam::EpochSkipListMap;
//!
//! let map: EpochSkipListMap<i32, &str> = EpochSkipListMap::new();
//! map.insert(42, "answer");
//! assert_eq!(map.first_key(), Some(42));
//! ```

pub mod epoch_guard;

use coral_core::{NaturalOrder, SkipListMap};

pub use epoch_guard::{EpochGuard, EpochRef};

/// `SkipListMap` with epoch-based reclamation.
pub type EpochSkipListMap<K, V, C = NaturalOrder> = SkipListMap<K, V, EpochGuard, C>;
