// Copyright 2024 Oxide Computer Company

use std::fmt;

use slog::{debug, warn, Logger};

use crate::error::MatchError;
use crate::key::{KeyBuilder, KeyField, KeyParam, Phv};
use crate::octets::Octets;
use crate::trie::PrefixTrie;
use crate::unit::{
    handle_join, handle_internal, new_slots, resolve_handle, Dumpable,
    MatchUnit, Slot, UnitCore,
};

#[derive(Debug)]
struct LpmEntry<V> {
    key: Octets,
    prefix_len: u32,
    value: V,
}

/// Longest-prefix-match unit: a bit trie from (canonical key, prefix
/// length) to slot index over a dense entry array.
///
/// A match key holds exactly one `Lpm` parameter, whose bytes land at the
/// end of the canonical key. Exact parameters extend the effective prefix
/// by their full width in bits; validity bytes frame the key but do not
/// count toward the prefix.
#[derive(Debug)]
pub struct LpmUnit<V> {
    core: UnitCore,
    slots: Vec<Slot<LpmEntry<V>>>,
    trie: PrefixTrie,
}

impl<V: Dumpable> LpmUnit<V> {
    pub fn new(size: usize, fields: Vec<KeyField>, log: Logger) -> Self {
        let builder = KeyBuilder::new(fields);
        Self {
            core: UnitCore::new(size, builder, log),
            slots: new_slots(size),
            trie: PrefixTrie::new(),
        }
    }

    fn build_add_key(
        &self,
        params: &[KeyParam],
    ) -> Result<(Octets, u32), MatchError> {
        let mut key = Octets::with_capacity(self.core.nbytes_key());
        let mut prefix_len: u32 = 0;
        let mut lpm: Option<(&Octets, u32)> = None;

        for p in params {
            if let KeyParam::Valid(v) = p {
                key.push(*v as u8);
            }
        }
        for p in params {
            match p {
                KeyParam::Exact(bytes) => {
                    key.extend_from_slice(bytes.as_slice());
                    prefix_len += 8 * bytes.len() as u32;
                }
                KeyParam::Lpm { key: k, prefix_len: pl } => {
                    if lpm.is_some() || *pl > 8 * k.len() as u32 {
                        return Err(MatchError::BadMatchKey);
                    }
                    lpm = Some((k, *pl));
                }
                KeyParam::Valid(_) => {}
                KeyParam::Ternary { .. } => {
                    return Err(MatchError::BadMatchKey)
                }
            }
        }

        // the lpm bytes go last so the prefix is contiguous from the start
        // of the exact section
        let (k, pl) = lpm.ok_or(MatchError::BadMatchKey)?;
        key.extend_from_slice(k.as_slice());
        prefix_len += pl;

        if key.len() != self.core.nbytes_key() {
            return Err(MatchError::BadMatchKey);
        }
        Ok((key, prefix_len))
    }
}

impl<V: Dumpable> MatchUnit<V> for LpmUnit<V> {
    fn lookup(&self, phv: &Phv) -> Option<(u64, &V)> {
        let mut key = Octets::with_capacity(self.core.nbytes_key());
        self.core.build_key(phv, &mut key);
        self.lookup_key(&key)
    }

    fn lookup_key(&self, key: &Octets) -> Option<(u64, &V)> {
        let internal = self.trie.lookup(key.as_slice())?;
        let slot = &self.slots[internal as usize];
        let entry = slot.entry.as_ref()?;
        Some((handle_join(slot.version, internal), &entry.value))
    }

    fn add_entry(
        &mut self,
        params: &[KeyParam],
        value: V,
        _priority: u32,
    ) -> Result<u64, MatchError> {
        let (key, prefix_len) = self.build_add_key(params)?;
        let internal = self.core.acquire()?;
        let version = self.slots[internal as usize].version;
        debug!(
            self.core.log(),
            "lpm add: key={}/{} handle={}", key, prefix_len, internal
        );
        self.trie
            .insert_prefix(key.as_slice(), prefix_len as usize, internal);
        self.slots[internal as usize].entry =
            Some(LpmEntry { key, prefix_len, value });
        Ok(handle_join(version, internal))
    }

    fn delete_entry(&mut self, handle: u64) -> Result<(), MatchError> {
        let internal = resolve_handle(&self.core, &self.slots, handle)?;
        let slot = &mut self.slots[internal as usize];
        let entry = slot.entry.take().ok_or(MatchError::InvalidHandle)?;
        slot.version = slot.version.wrapping_add(1);
        if !self
            .trie
            .delete_prefix(entry.key.as_slice(), entry.prefix_len as usize)
        {
            warn!(
                self.core.log(),
                "lpm delete: {}/{} missing from trie",
                entry.key,
                entry.prefix_len
            );
        }
        debug!(
            self.core.log(),
            "lpm delete: key={}/{} handle={}",
            entry.key,
            entry.prefix_len,
            internal
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
                    "{}: {}/{} => {}",
                    internal,
                    entry.key.to_hex(),
                    entry.prefix_len,
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

    fn v4(a: u8, b: u8, c: u8, d: u8) -> Octets {
        Octets::from([a, b, c, d])
    }

    fn route(key: Octets, prefix_len: u32) -> [KeyParam; 1] {
        [KeyParam::Lpm { key, prefix_len }]
    }

    #[test]
    fn longest_prefix_wins() {
        let mut u: LpmUnit<&'static str> =
            LpmUnit::new(8, vec![KeyField::lpm(0, 4)], quiet());
        u.add_entry(&route(v4(10, 0, 0, 0), 8), "a", 0).unwrap();
        u.add_entry(&route(v4(10, 1, 0, 0), 16), "b", 0).unwrap();

        let (_, v) = u.lookup_key(&v4(10, 1, 2, 3)).unwrap();
        assert_eq!(*v, "b");
        let (_, v) = u.lookup_key(&v4(10, 2, 0, 0)).unwrap();
        assert_eq!(*v, "a");
        assert!(u.lookup_key(&v4(11, 0, 0, 0)).is_none());
    }

    #[test]
    fn delete_uncovers_shorter_prefix() {
        let mut u: LpmUnit<u32> =
            LpmUnit::new(8, vec![KeyField::lpm(0, 4)], quiet());
        let h8 = u.add_entry(&route(v4(10, 0, 0, 0), 8), 1, 0).unwrap();
        let h16 = u.add_entry(&route(v4(10, 1, 0, 0), 16), 2, 0).unwrap();

        u.delete_entry(h16).unwrap();
        let (found, v) = u.lookup_key(&v4(10, 1, 2, 3)).unwrap();
        assert_eq!(found, h8);
        assert_eq!(*v, 1);
    }

    #[test]
    fn exact_params_extend_the_prefix() {
        // [port: exact 2 bytes, dst: lpm 4 bytes]
        let mut u: LpmUnit<u32> = LpmUnit::new(
            8,
            vec![KeyField::exact(0, 2), KeyField::lpm(1, 4)],
            quiet(),
        );
        let h = u
            .add_entry(
                &[
                    KeyParam::Exact(Octets::from([0x00, 0x07])),
                    KeyParam::Lpm { key: v4(10, 0, 0, 0), prefix_len: 8 },
                ],
                42,
                0,
            )
            .unwrap();

        let mut key = Octets::from([0x00u8, 0x07]);
        key.extend_from_slice(&[10, 9, 8, 7]);
        let (found, _) = u.lookup_key(&key).unwrap();
        assert_eq!(found, h);

        // a different exact section misses even though the lpm part matches
        let mut key = Octets::from([0x00u8, 0x08]);
        key.extend_from_slice(&[10, 9, 8, 7]);
        assert!(u.lookup_key(&key).is_none());
    }

    #[test]
    fn lpm_param_count_is_enforced() {
        let mut u: LpmUnit<u32> =
            LpmUnit::new(8, vec![KeyField::lpm(0, 4)], quiet());

        let r = u.add_entry(&[KeyParam::Exact(v4(1, 2, 3, 4))], 0, 0);
        assert_eq!(r.unwrap_err(), MatchError::BadMatchKey);

        let r = u.add_entry(
            &[
                KeyParam::Lpm { key: v4(1, 0, 0, 0), prefix_len: 8 },
                KeyParam::Lpm { key: v4(2, 0, 0, 0), prefix_len: 8 },
            ],
            0,
            0,
        );
        assert_eq!(r.unwrap_err(), MatchError::BadMatchKey);
        assert_eq!(u.num_entries(), 0);
    }

    #[test]
    fn oversized_prefix_is_refused() {
        let mut u: LpmUnit<u32> =
            LpmUnit::new(8, vec![KeyField::lpm(0, 4)], quiet());
        let r = u.add_entry(&route(v4(1, 2, 3, 4), 33), 0, 0);
        assert_eq!(r.unwrap_err(), MatchError::BadMatchKey);
    }
}
