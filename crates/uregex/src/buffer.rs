//! UTF-16 text held in foreign linear memory.
//!
//! A [`ManagedBuffer`] owns one block of foreign memory and grows it to the next power
//! of two (at least [`MIN_CAPACITY`] units) whenever a write does not fit. A
//! [`BufferView`] is a borrowed range of an owner; it records the owner's allocation
//! epoch and is refused once the owner has been rewritten or freed.

use std::sync::atomic::{AtomicU64, Ordering};

use uregex_contracts::UCHAR_BYTES;

use crate::call::ForeignCalls;
use crate::codec;
use crate::error::{Error, Result};

pub const MIN_CAPACITY: u32 = 64;

fn next_epoch() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Capacity in units for a buffer that must hold `needed` units, or `None` when its
/// byte size would not fit a 32-bit address space.
pub fn capacity_for(needed: u32) -> Option<u32> {
    let cap = needed.max(MIN_CAPACITY).checked_next_power_of_two()?;
    cap.checked_mul(UCHAR_BYTES).map(|_| cap)
}

/// Units and bytes to allocate for `needed` units.
fn allocation(needed: u32) -> Result<(u32, u32)> {
    let exhausted = Error::OutOfMemory {
        bytes: needed.saturating_mul(UCHAR_BYTES),
    };
    let cap = capacity_for(needed).ok_or(exhausted)?;
    Ok((cap, cap * UCHAR_BYTES))
}

/// Raw `(address, length)` pair as passed across the call boundary. Length is in units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub addr: u32,
    pub len: u32,
}

impl Span {
    pub fn byte_len(self) -> u32 {
        self.len.saturating_mul(UCHAR_BYTES)
    }
}

#[derive(Debug, Default)]
pub struct ManagedBuffer {
    addr: u32,
    len: u32,
    cap: u32,
    epoch: u64,
}

impl ManagedBuffer {
    pub const fn new() -> Self {
        ManagedBuffer {
            addr: 0,
            len: 0,
            cap: 0,
            epoch: 0,
        }
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> u32 {
        self.cap
    }

    pub fn capacity_bytes(&self) -> u32 {
        self.cap * UCHAR_BYTES
    }

    pub fn span(&self) -> Span {
        Span {
            addr: self.addr,
            len: self.len,
        }
    }

    pub fn set_text(&mut self, calls: &mut ForeignCalls, text: &str) -> Result<()> {
        self.set_units(calls, &codec::encode(text))
    }

    /// Replaces the contents. A NUL unit always follows the text and is not counted.
    pub fn set_units(&mut self, calls: &mut ForeignCalls, units: &[u16]) -> Result<()> {
        let needed = u32::try_from(units.len())
            .ok()
            .and_then(|len| len.checked_add(1))
            .ok_or(Error::OutOfMemory { bytes: u32::MAX })?;
        let len = needed - 1;
        if needed > self.cap {
            let (cap, bytes) = allocation(needed)?;
            self.free(calls)?;
            self.addr = calls.malloc(bytes)?;
            self.cap = cap;
        }
        calls.write_units(self.addr, units)?;
        calls.write_units(self.addr + len * UCHAR_BYTES, &[0])?;
        self.len = len;
        self.epoch = next_epoch();
        Ok(())
    }

    pub fn units(&self, calls: &mut ForeignCalls) -> Result<Vec<u16>> {
        if self.len == 0 {
            return Ok(Vec::new());
        }
        calls.read_units(self.addr, self.len)
    }

    pub fn text(&self, calls: &mut ForeignCalls) -> Result<String> {
        codec::decode(&self.units(calls)?)
    }

    /// Non-owning view over units `[start, end)`.
    pub fn slice(&self, start: u32, end: u32) -> Result<BufferView> {
        if start > end || end > self.len {
            return Err(Error::OutOfRange {
                start,
                end,
                len: self.len,
            });
        }
        Ok(BufferView {
            addr: self.addr + start * UCHAR_BYTES,
            len: end - start,
            epoch: self.epoch,
        })
    }

    /// Grows to hold at least `units`, keeping the current contents.
    pub fn reserve(&mut self, calls: &mut ForeignCalls, units: u32) -> Result<()> {
        if units <= self.cap {
            return Ok(());
        }
        let (cap, bytes) = allocation(units)?;
        let addr = calls.malloc(bytes)?;
        if self.len > 0 {
            let kept = calls.read_units(self.addr, self.len)?;
            calls.write_units(addr, &kept)?;
        }
        if self.cap > 0 {
            calls.free(self.addr)?;
        }
        self.addr = addr;
        self.cap = cap;
        self.epoch = next_epoch();
        Ok(())
    }

    /// Drops the contents but keeps the allocation.
    pub fn clear(&mut self) {
        self.len = 0;
        self.epoch = next_epoch();
    }

    pub(crate) fn advance(&mut self, units: u32) {
        self.len = self.len.saturating_add(units).min(self.cap);
    }

    /// Releases the allocation. A buffer that owns nothing is left untouched.
    pub fn free(&mut self, calls: &mut ForeignCalls) -> Result<()> {
        if self.cap == 0 {
            return Ok(());
        }
        let addr = std::mem::take(&mut self.addr);
        self.len = 0;
        self.cap = 0;
        self.epoch = next_epoch();
        calls.free(addr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferView {
    addr: u32,
    len: u32,
    epoch: u64,
}

impl BufferView {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn span(&self) -> Span {
        Span {
            addr: self.addr,
            len: self.len,
        }
    }

    pub fn units(&self, owner: &ManagedBuffer, calls: &mut ForeignCalls) -> Result<Vec<u16>> {
        if owner.epoch != self.epoch || owner.cap == 0 {
            return Err(Error::StaleView);
        }
        if self.len == 0 {
            return Ok(Vec::new());
        }
        calls.read_units(self.addr, self.len)
    }

    pub fn text(&self, owner: &ManagedBuffer, calls: &mut ForeignCalls) -> Result<String> {
        codec::decode(&self.units(owner, calls)?)
    }
}
