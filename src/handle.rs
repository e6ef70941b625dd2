use bitvec::prelude::*;

use crate::error::MatchError;

/// Hands out dense `u32` handles in `[0, size)`. Released handles are
/// recycled before the never-used watermark advances, so acquisition is
/// O(1). Iteration yields live handles in ascending index order and is
/// stable between mutations.
#[derive(Debug)]
pub struct HandlePool {
    live: BitVec<usize, Lsb0>,
    free: Vec<u32>,
    next: u32,
}

impl HandlePool {
    pub fn new(size: usize) -> Self {
        Self {
            live: bitvec![usize, Lsb0; 0; size],
            free: Vec::new(),
            next: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.live.len()
    }

    pub fn acquire(&mut self) -> Option<u32> {
        let h = match self.free.pop() {
            Some(h) => h,
            None => {
                if (self.next as usize) >= self.live.len() {
                    return None;
                }
                let h = self.next;
                self.next += 1;
                h
            }
        };
        self.live.set(h as usize, true);
        Some(h)
    }

    pub fn release(&mut self, h: u32) -> Result<(), MatchError> {
        if !self.is_live(h) {
            return Err(MatchError::InvalidHandle);
        }
        self.live.set(h as usize, false);
        self.free.push(h);
        Ok(())
    }

    pub fn is_live(&self, h: u32) -> bool {
        self.live.get(h as usize).map(|b| *b).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.live.iter_ones().map(|i| i as u32)
    }
}
