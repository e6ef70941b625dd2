// Copyright 2024 Oxide Computer Company

use std::fmt;

use slog::Logger;

use crate::error::MatchError;
use crate::handle::HandlePool;
use crate::key::{KeyBuilder, KeyParam, Phv};
use crate::octets::Octets;

/// Values stored in a match unit are opaque to it, except that `dump` needs
/// to render them.
pub trait Dumpable {
    fn dump(&self) -> String;
}

macro_rules! dumpable_via_display {
    ($($t:ty),*) => {
        $(
            impl Dumpable for $t {
                fn dump(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

dumpable_via_display!(u8, u16, u32, u64, u128, usize, i32, i64, String);

impl Dumpable for &str {
    fn dump(&self) -> String {
        self.to_string()
    }
}

// An external handle is (slot version << 32) | slot index. Callers treat it
// as opaque. The internal part is extracted with a bitwise mask so a large
// version can never bleed into it.

pub(crate) fn handle_join(version: u32, internal: u32) -> u64 {
    ((version as u64) << 32) | internal as u64
}

pub(crate) fn handle_internal(handle: u64) -> u32 {
    (handle & 0xffff_ffff) as u32
}

pub(crate) fn handle_version(handle: u64) -> u32 {
    (handle >> 32) as u32
}

/// One slot of a unit's preallocated entry array. The version counter
/// belongs to the slot, not the entry: it survives occupancy changes and is
/// bumped once per delete, which is what expires outstanding handles.
#[derive(Debug)]
pub(crate) struct Slot<E> {
    pub version: u32,
    pub entry: Option<E>,
}

impl<E> Default for Slot<E> {
    fn default() -> Self {
        Self { version: 0, entry: None }
    }
}

pub(crate) fn new_slots<E>(size: usize) -> Vec<Slot<E>> {
    let mut slots = Vec::with_capacity(size);
    slots.resize_with(size, Slot::default);
    slots
}

/// Split an external handle and walk it through the liveness and version
/// checks shared by every handle-taking operation. Liveness is checked
/// first: a freed slot reports `InvalidHandle`, a reused slot with a stale
/// version reports `ExpiredHandle`.
pub(crate) fn resolve_handle<E>(
    core: &UnitCore,
    slots: &[Slot<E>],
    handle: u64,
) -> Result<u32, MatchError> {
    let internal = handle_internal(handle);
    if !core.is_live(internal) {
        return Err(MatchError::InvalidHandle);
    }
    let slot = slots
        .get(internal as usize)
        .ok_or(MatchError::InvalidHandle)?;
    if handle_version(handle) != slot.version {
        return Err(MatchError::ExpiredHandle);
    }
    Ok(internal)
}

/// State and protocol common to the three match disciplines: capacity, the
/// canonical key width, occupancy, the key builder, the handle pool, and
/// the logger.
#[derive(Debug)]
pub(crate) struct UnitCore {
    size: usize,
    nbytes_key: usize,
    num_entries: usize,
    builder: KeyBuilder,
    handles: HandlePool,
    log: Logger,
}

impl UnitCore {
    pub fn new(size: usize, builder: KeyBuilder, log: Logger) -> Self {
        let nbytes_key = builder.nbytes();
        Self {
            size,
            nbytes_key,
            num_entries: 0,
            builder,
            handles: HandlePool::new(size),
            log,
        }
    }

    pub fn nbytes_key(&self) -> usize {
        self.nbytes_key
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub fn handles(&self) -> &HandlePool {
        &self.handles
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn is_live(&self, internal: u32) -> bool {
        self.handles.is_live(internal)
    }

    pub fn build_key(&self, phv: &Phv, key: &mut Octets) {
        self.builder.build(phv, key)
    }

    pub fn acquire(&mut self) -> Result<u32, MatchError> {
        if self.num_entries >= self.size {
            return Err(MatchError::TableFull);
        }
        let h = self.handles.acquire().ok_or(MatchError::Allocator)?;
        self.num_entries += 1;
        Ok(h)
    }

    pub fn release(&mut self, internal: u32) -> Result<(), MatchError> {
        self.handles.release(internal)?;
        self.num_entries -= 1;
        Ok(())
    }
}

/// The contract every match discipline implements. A unit owns a dense
/// preallocated entry array, an index suited to its discipline, and a
/// handle pool; the control plane addresses entries through opaque external
/// handles that expire on delete.
///
/// Units are not internally synchronized. Readers and writers serialize
/// through the usual `&self`/`&mut self` rules; sharing a unit across
/// threads requires an external lock.
pub trait MatchUnit<V: Dumpable> {
    /// Render the packet's canonical key and look it up. The returned
    /// handle is the same external handle `add_entry` produced for the
    /// winning entry.
    fn lookup(&self, phv: &Phv) -> Option<(u64, &V)>;

    /// Look up an already-built canonical key.
    fn lookup_key(&self, key: &Octets) -> Option<(u64, &V)>;

    /// Validate `params`, consume a slot, and return the entry's external
    /// handle. `priority` only participates in ternary matching.
    fn add_entry(
        &mut self,
        params: &[KeyParam],
        value: V,
        priority: u32,
    ) -> Result<u64, MatchError>;

    fn delete_entry(&mut self, handle: u64) -> Result<(), MatchError>;

    fn modify_entry(&mut self, handle: u64, value: V)
        -> Result<(), MatchError>;

    fn get_value(&self, handle: u64) -> Result<&V, MatchError>;

    /// Cheap liveness probe: is the handle's slot occupied? The version is
    /// not consulted.
    fn valid_handle(&self, handle: u64) -> bool;

    fn num_entries(&self) -> usize;

    /// One line per live entry, in handle-pool iteration order.
    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result;
}
