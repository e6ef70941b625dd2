// Copyright 2024 Oxide Computer Company

use std::collections::HashMap;
use std::fmt;

use slog::{debug, trace, Logger};

use crate::error::MatchError;
use crate::key::{KeyBuilder, KeyField, KeyParam, Phv};
use crate::octets::Octets;
use crate::unit::{
    handle_join, handle_internal, new_slots, resolve_handle, Dumpable,
    MatchUnit, Slot, UnitCore,
};

#[derive(Debug)]
struct ExactEntry<V> {
    key: Octets,
    value: V,
}

/// Exact-match unit: a hash map from canonical key to slot index over a
/// dense entry array. Lookup is one expected O(1) probe.
///
/// Adding a key that is already present succeeds and repoints the index at
/// the new slot. The older slot stays live and addressable through its
/// handle, it just can no longer win a lookup.
#[derive(Debug)]
pub struct ExactUnit<V> {
    core: UnitCore,
    slots: Vec<Slot<ExactEntry<V>>>,
    index: HashMap<Octets, u32>,
}

impl<V: Dumpable> ExactUnit<V> {
    pub fn new(size: usize, fields: Vec<KeyField>, log: Logger) -> Self {
        let builder = KeyBuilder::new(fields);
        Self {
            core: UnitCore::new(size, builder, log),
            slots: new_slots(size),
            index: HashMap::new(),
        }
    }

    /// Canonical key from add-time parameters: validity bytes first, then
    /// exact bytes, both in declaration order. Anything else is refused.
    fn build_add_key(&self, params: &[KeyParam]) -> Result<Octets, MatchError> {
        let mut key = Octets::with_capacity(self.core.nbytes_key());
        for p in params {
            if let KeyParam::Valid(v) = p {
                key.push(*v as u8);
            }
        }
        for p in params {
            match p {
                KeyParam::Exact(bytes) => {
                    key.extend_from_slice(bytes.as_slice())
                }
                KeyParam::Valid(_) => {}
                _ => return Err(MatchError::BadMatchKey),
            }
        }
        if key.len() != self.core.nbytes_key() {
            return Err(MatchError::BadMatchKey);
        }
        Ok(key)
    }
}

impl<V: Dumpable> MatchUnit<V> for ExactUnit<V> {
    fn lookup(&self, phv: &Phv) -> Option<(u64, &V)> {
        let mut key = Octets::with_capacity(self.core.nbytes_key());
        self.core.build_key(phv, &mut key);
        self.lookup_key(&key)
    }

    fn lookup_key(&self, key: &Octets) -> Option<(u64, &V)> {
        let &internal = self.index.get(key)?;
        let slot = &self.slots[internal as usize];
        let entry = slot.entry.as_ref()?;
        trace!(self.core.log(), "exact hit: key={} handle={}", key, internal);
        Some((handle_join(slot.version, internal), &entry.value))
    }

    fn add_entry(
        &mut self,
        params: &[KeyParam],
        value: V,
        _priority: u32,
    ) -> Result<u64, MatchError> {
        let key = self.build_add_key(params)?;
        let internal = self.core.acquire()?;
        let version = self.slots[internal as usize].version;
        debug!(self.core.log(), "exact add: key={} handle={}", key, internal);
        self.index.insert(key.clone(), internal);
        self.slots[internal as usize].entry =
            Some(ExactEntry { key, value });
        Ok(handle_join(version, internal))
    }

    fn delete_entry(&mut self, handle: u64) -> Result<(), MatchError> {
        let internal = resolve_handle(&self.core, &self.slots, handle)?;
        let slot = &mut self.slots[internal as usize];
        let entry = slot.entry.take().ok_or(MatchError::InvalidHandle)?;
        slot.version = slot.version.wrapping_add(1);
        // an entry shadowed by a same-key add no longer owns the index
        // mapping; leave the newer mapping alone
        if self.index.get(&entry.key) == Some(&internal) {
            self.index.remove(&entry.key);
        }
        debug!(
            self.core.log(),
            "exact delete: key={} handle={}", entry.key, internal
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
                    "{}: {} => {}",
                    internal,
                    entry.key.to_hex(),
                    entry.value.dump()
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn unit(size: usize) -> ExactUnit<u32> {
        ExactUnit::new(size, vec![KeyField::exact(0, 2)], quiet())
    }

    #[test]
    fn add_lookup_delete() {
        let mut u = unit(4);
        let h = u
            .add_entry(&[KeyParam::Exact(Octets::from([0xab, 0xcd]))], 7, 0)
            .unwrap();

        let key = Octets::from([0xab, 0xcd]);
        let (found, v) = u.lookup_key(&key).unwrap();
        assert_eq!(found, h);
        assert_eq!(*v, 7);

        u.delete_entry(h).unwrap();
        assert!(u.lookup_key(&key).is_none());
        assert_eq!(u.num_entries(), 0);
    }

    #[test]
    fn wrong_width_is_refused() {
        let mut u = unit(4);
        let r = u.add_entry(&[KeyParam::Exact(Octets::from([0xab]))], 7, 0);
        assert_eq!(r.unwrap_err(), MatchError::BadMatchKey);
        assert_eq!(u.num_entries(), 0);
    }

    #[test]
    fn lpm_param_is_refused() {
        let mut u = unit(4);
        let r = u.add_entry(
            &[KeyParam::Lpm {
                key: Octets::from([0xab, 0xcd]),
                prefix_len: 9,
            }],
            7,
            0,
        );
        assert_eq!(r.unwrap_err(), MatchError::BadMatchKey);
    }

    #[test]
    fn valid_params_build_the_key() {
        let mut u: ExactUnit<u32> = ExactUnit::new(
            4,
            vec![KeyField::valid(0), KeyField::exact(0, 1)],
            quiet(),
        );
        let h = u
            .add_entry(
                &[
                    KeyParam::Valid(true),
                    KeyParam::Exact(Octets::from([0x55])),
                ],
                1,
                0,
            )
            .unwrap();

        let mut phv = Phv::new();
        phv.set_valid(0, true);
        phv.set_field(0, &[0x55]);
        let (found, _) = u.lookup(&phv).unwrap();
        assert_eq!(found, h);

        phv.set_valid(0, false);
        assert!(u.lookup(&phv).is_none());
    }

    #[test]
    fn duplicate_key_shadows_older_entry() {
        let mut u = unit(4);
        let key = [KeyParam::Exact(Octets::from([1u8, 2]))];
        let h0 = u.add_entry(&key, 10, 0).unwrap();
        let h1 = u.add_entry(&key, 20, 0).unwrap();
        assert_eq!(u.num_entries(), 2);

        // lookup sees the later insertion only
        let (found, v) = u.lookup_key(&Octets::from([1u8, 2])).unwrap();
        assert_eq!(found, h1);
        assert_eq!(*v, 20);

        // the shadowed handle still resolves
        assert_eq!(*u.get_value(h0).unwrap(), 10);
        u.modify_entry(h0, 11).unwrap();
        assert_eq!(*u.get_value(h0).unwrap(), 11);

        // deleting the shadowed entry leaves the newer mapping intact
        u.delete_entry(h0).unwrap();
        let (found, _) = u.lookup_key(&Octets::from([1u8, 2])).unwrap();
        assert_eq!(found, h1);
    }

    #[test]
    fn modify_updates_lookup_payload() {
        let mut u = unit(4);
        let key = [KeyParam::Exact(Octets::from([9u8, 9]))];
        let h = u.add_entry(&key, 1, 0).unwrap();
        u.modify_entry(h, 2).unwrap();
        let (found, v) = u.lookup_key(&Octets::from([9u8, 9])).unwrap();
        assert_eq!(found, h);
        assert_eq!(*v, 2);
    }
}
