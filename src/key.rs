// Copyright 2024 Oxide Computer Company

use crate::octets::Octets;

/// How a table-key field participates in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The packet field must equal the entry's key bytes.
    Exact,

    /// The entry's first `prefix_len` bits must equal those of the packet
    /// field; the longest installed prefix wins.
    Lpm,

    /// The packet field is masked by the entry's mask and then compared
    /// against the entry's key.
    Ternary,

    /// One byte of header validity. Always significant.
    Valid,
}

/// One field of a table key. `id` indexes the packet header vector: a field
/// id for `Exact`/`Lpm`/`Ternary`, a header id for `Valid`. `width` is the
/// number of bytes the field contributes to the canonical key.
#[derive(Debug, Clone, Copy)]
pub struct KeyField {
    pub kind: MatchKind,
    pub id: usize,
    pub width: usize,
}

impl KeyField {
    pub fn exact(id: usize, width: usize) -> Self {
        Self { kind: MatchKind::Exact, id, width }
    }

    pub fn lpm(id: usize, width: usize) -> Self {
        Self { kind: MatchKind::Lpm, id, width }
    }

    pub fn ternary(id: usize, width: usize) -> Self {
        Self { kind: MatchKind::Ternary, id, width }
    }

    /// Validity fields contribute exactly one byte.
    pub fn valid(id: usize) -> Self {
        Self { kind: MatchKind::Valid, id, width: 1 }
    }
}

/// The parsed view of a packet's headers: per-field byte values plus
/// per-header validity bits. Only what the key builder needs; parsing lives
/// elsewhere.
#[derive(Debug, Clone, Default)]
pub struct Phv {
    fields: Vec<Octets>,
    valid: Vec<bool>,
}

impl Phv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_field(&mut self, id: usize, bytes: &[u8]) {
        if self.fields.len() <= id {
            self.fields.resize_with(id + 1, Octets::new);
        }
        self.fields[id] = Octets::from(bytes);
    }

    pub fn field(&self, id: usize) -> &[u8] {
        self.fields.get(id).map(|o| o.as_slice()).unwrap_or(&[])
    }

    pub fn set_valid(&mut self, id: usize, valid: bool) {
        if self.valid.len() <= id {
            self.valid.resize(id + 1, false);
        }
        self.valid[id] = valid;
    }

    pub fn is_valid(&self, id: usize) -> bool {
        self.valid.get(id).copied().unwrap_or(false)
    }
}

/// One match-key parameter handed to `add_entry`, one per declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParam {
    Exact(Octets),
    Valid(bool),
    Lpm { key: Octets, prefix_len: u32 },
    Ternary { key: Octets, mask: Octets },
}

/// Renders a packet's canonical lookup key from its header vector.
///
/// The canonical layout puts the one validity byte of every `Valid` field
/// first, in declaration order, followed by the bytes of every other field
/// in declaration order. The output width is the sum of the declared field
/// widths, always.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    fields: Vec<KeyField>,
    nbytes: usize,
}

impl KeyBuilder {
    pub fn new(mut fields: Vec<KeyField>) -> Self {
        for f in fields.iter_mut() {
            if f.kind == MatchKind::Valid {
                f.width = 1;
            }
        }
        let nbytes = fields.iter().map(|f| f.width).sum();
        Self { fields, nbytes }
    }

    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    pub fn fields(&self) -> &[KeyField] {
        &self.fields
    }

    pub fn build(&self, phv: &Phv, key: &mut Octets) {
        key.clear();
        for f in &self.fields {
            if f.kind == MatchKind::Valid {
                key.push(phv.is_valid(f.id) as u8);
            }
        }
        for f in &self.fields {
            if f.kind == MatchKind::Valid {
                continue;
            }
            let bytes = phv.field(f.id);
            let n = bytes.len().min(f.width);
            key.extend_from_slice(&bytes[..n]);
            // a short packet field still occupies its declared width
            for _ in n..f.width {
                key.push(0);
            }
        }
    }
}
