// Copyright 2024 Oxide Computer Company

use std::fmt;

use bitvec::prelude::*;
use slog::{debug, Logger};

use crate::error::MatchError;
use crate::key::{KeyBuilder, KeyField, KeyParam, Phv};
use crate::octets::Octets;
use crate::unit::{
    handle_join, handle_internal, new_slots, resolve_handle, Dumpable,
    MatchUnit, Slot, UnitCore,
};

#[derive(Debug)]
struct TernaryEntry<V> {
    key: Octets,
    mask: Octets,
    priority: u32,
    value: V,
}

/// Ternary unit: a dense array of (key, mask, priority) entries scanned
/// linearly on lookup, TCAM style. An entry matches when every packet byte,
/// masked by the entry's mask, equals the entry's key byte. The match with
/// the strictly greatest priority wins; equal priorities go to the earlier
/// slot in pool iteration order.
///
/// Stored keys are canonicalized against their mask on insert, so two
/// entries that match the same packets compare equal byte for byte.
#[derive(Debug)]
pub struct TernaryUnit<V> {
    core: UnitCore,
    slots: Vec<Slot<TernaryEntry<V>>>,
}

/// A mask whose top `prefix_len` bits are set, over `width` bytes.
fn prefix_mask(prefix_len: u32, width: usize) -> Octets {
    let mut bits = bitvec![u8, Msb0; 0; width * 8];
    bits[..prefix_len as usize].fill(true);
    Octets::from(bits.into_vec())
}

impl<V: Dumpable> TernaryUnit<V> {
    pub fn new(size: usize, fields: Vec<KeyField>, log: Logger) -> Self {
        let builder = KeyBuilder::new(fields);
        Self {
            core: UnitCore::new(size, builder, log),
            slots: new_slots(size),
        }
    }

    /// Key and mask from add-time parameters. Mask assembly parallels key
    /// assembly: validity and exact bytes are fully significant, an lpm
    /// parameter becomes a leading-ones mask, and a ternary parameter
    /// carries its own.
    fn build_add_key(
        &self,
        params: &[KeyParam],
    ) -> Result<(Octets, Octets), MatchError> {
        let nbytes = self.core.nbytes_key();
        let mut key = Octets::with_capacity(nbytes);
        let mut mask = Octets::with_capacity(nbytes);

        for p in params {
            if let KeyParam::Valid(v) = p {
                key.push(*v as u8);
                mask.push(0xff);
            }
        }
        for p in params {
            match p {
                KeyParam::Exact(bytes) => {
                    key.extend_from_slice(bytes.as_slice());
                    for _ in 0..bytes.len() {
                        mask.push(0xff);
                    }
                }
                KeyParam::Lpm { key: k, prefix_len } => {
                    if *prefix_len > 8 * k.len() as u32 {
                        return Err(MatchError::BadMatchKey);
                    }
                    key.extend_from_slice(k.as_slice());
                    mask.extend_from_slice(
                        prefix_mask(*prefix_len, k.len()).as_slice(),
                    );
                }
                KeyParam::Ternary { key: k, mask: m } => {
                    if m.len() != k.len() {
                        return Err(MatchError::BadMatchKey);
                    }
                    key.extend_from_slice(k.as_slice());
                    mask.extend_from_slice(m.as_slice());
                }
                KeyParam::Valid(_) => {}
            }
        }

        if key.len() != nbytes || mask.len() != nbytes {
            return Err(MatchError::BadMatchKey);
        }

        // canonicalize: care bits outside the mask are zeroed
        for i in 0..nbytes {
            key[i] &= mask[i];
        }
        Ok((key, mask))
    }
}

impl<V: Dumpable> MatchUnit<V> for TernaryUnit<V> {
    fn lookup(&self, phv: &Phv) -> Option<(u64, &V)> {
        let mut key = Octets::with_capacity(self.core.nbytes_key());
        self.core.build_key(phv, &mut key);
        self.lookup_key(&key)
    }

    fn lookup_key(&self, key: &Octets) -> Option<(u64, &V)> {
        let mut best: Option<(u32, &TernaryEntry<V>)> = None;

        for internal in self.core.handles().iter() {
            let entry = match self.slots[internal as usize].entry.as_ref() {
                Some(e) => e,
                None => continue,
            };
            if let Some((_, b)) = &best {
                if entry.priority <= b.priority {
                    continue;
                }
            }
            let mut matched = true;
            for i in 0..self.core.nbytes_key() {
                if entry.key[i] != key[i] & entry.mask[i] {
                    matched = false;
                    break;
                }
            }
            if matched {
                best = Some((internal, entry));
            }
        }

        best.map(|(internal, entry)| {
            let version = self.slots[internal as usize].version;
            (handle_join(version, internal), &entry.value)
        })
    }

    fn add_entry(
        &mut self,
        params: &[KeyParam],
        value: V,
        priority: u32,
    ) -> Result<u64, MatchError> {
        let (key, mask) = self.build_add_key(params)?;
        let internal = self.core.acquire()?;
        let version = self.slots[internal as usize].version;
        debug!(
            self.core.log(),
            "ternary add: key={} mask={} prio={} handle={}",
            key,
            mask,
            priority,
            internal
        );
        self.slots[internal as usize].entry =
            Some(TernaryEntry { key, mask, priority, value });
        Ok(handle_join(version, internal))
    }

    fn delete_entry(&mut self, handle: u64) -> Result<(), MatchError> {
        let internal = resolve_handle(&self.core, &self.slots, handle)?;
        let slot = &mut self.slots[internal as usize];
        let entry = slot.entry.take().ok_or(MatchError::InvalidHandle)?;
        slot.version = slot.version.wrapping_add(1);
        debug!(
            self.core.log(),
            "ternary delete: key={} handle={}", entry.key, internal
        );
        self.core.release(internal)
    }

    fn modify_entry(
        &mut self,
        handle: u64,
        value: V,
    ) -> Result<(), MatchError> {
        let internal = resolve_handle(&self.core, &self.slots, handle)?;
        match self.slots[internal as usize].entry.as_mut() {
            Some(e) => {
                e.value = value;
                Ok(())
            }
            None => Err(MatchError::InvalidHandle),
        }
    }

    fn get_value(&self, handle: u64) -> Result<&V, MatchError> {
        let internal = resolve_handle(&self.core, &self.slots, handle)?;
        self.slots[internal as usize]
            .entry
            .as_ref()
            .map(|e| &e.value)
            .ok_or(MatchError::InvalidHandle)
    }

    fn valid_handle(&self, handle: u64) -> bool {
        self.core.is_live(handle_internal(handle))
    }

    fn num_entries(&self) -> usize {
        self.core.num_entries()
    }

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for internal in self.core.handles().iter() {
            if let Some(entry) = self.slots[internal as usize].entry.as_ref()
            {
                writeln!(
                    out,
                    "{}: {} &&& {} => {}",
                    internal,
                    entry.key.to_hex(),
                    entry.mask.to_hex(),
                    entry.value.dump()
                )?;
            }
        }
        Ok(())
    }
}
