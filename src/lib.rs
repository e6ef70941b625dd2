// Copyright 2024 Oxide Computer Company

//! Match-table engine for a programmable software switch.
//!
//! A table's match unit owns a dense, preallocated array of entries plus an
//! index suited to its matching discipline. Exact units probe a hash map,
//! LPM units walk a bit trie, and ternary units scan their entries in slot
//! order. A packet is looked up by rendering its canonical key from the
//! header vector and dispatching to the unit. The control plane addresses
//! entries through opaque 64-bit handles that pair a slot index with a
//! version counter, so a handle issued before a delete can never alias an
//! entry added after it.

pub mod error;
pub mod exact;
pub mod handle;
pub mod key;
pub mod lpm;
pub mod octets;
pub mod ternary;
pub mod trie;
pub mod unit;

pub use error::MatchError;
pub use exact::ExactUnit;
pub use handle::HandlePool;
pub use key::{KeyBuilder, KeyField, KeyParam, MatchKind, Phv};
pub use lpm::LpmUnit;
pub use octets::Octets;
pub use ternary::TernaryUnit;
pub use trie::PrefixTrie;
pub use unit::{Dumpable, MatchUnit};
