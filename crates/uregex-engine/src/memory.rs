use std::collections::{BTreeMap, HashMap};

use uregex_contracts::ForeignError;

pub const PAGE_SIZE: u32 = 65_536;

/// Addresses below this are never handed out, so 0 stays a usable null.
pub const NULL_GUARD: u32 = 1024;

const MIN_BLOCK: u32 = 16;
const MAX_BLOCK: u32 = 1 << 30;

/// Page-granular linear memory with a size-class heap.
///
/// Blocks are rounded to powers of two and recycled through per-size free lists. The
/// allocator bookkeeping lives host-side; the program only ever sees addresses.
pub struct LinearMemory {
    bytes: Vec<u8>,
    max_pages: u32,
    heap_top: u32,
    live: HashMap<u32, u32>,
    free_lists: BTreeMap<u32, Vec<u32>>,
}

impl LinearMemory {
    pub fn new(initial_pages: u32, max_pages: u32, heap_base: u32) -> Self {
        let max_pages = max_pages.max(initial_pages).max(1);
        let initial_pages = initial_pages.max(1);
        Self {
            bytes: vec![0; (initial_pages as usize) * PAGE_SIZE as usize],
            max_pages,
            heap_top: align16(heap_base.max(NULL_GUARD)),
            live: HashMap::new(),
            free_lists: BTreeMap::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[cfg(test)]
    pub(crate) fn pages(&self) -> u32 {
        (self.bytes.len() / PAGE_SIZE as usize) as u32
    }

    #[cfg(test)]
    pub(crate) fn live_blocks(&self) -> usize {
        self.live.len()
    }

    #[cfg(test)]
    pub(crate) fn live_bytes(&self) -> u64 {
        self.live.values().map(|&v| u64::from(v)).sum()
    }

    /// Returns 0 when the request cannot be satisfied within `max_pages`.
    pub fn malloc(&mut self, size: u32) -> u32 {
        if size > MAX_BLOCK {
            return 0;
        }
        let block = size.max(MIN_BLOCK).next_power_of_two();
        if let Some(addr) = self.free_lists.get_mut(&block).and_then(|l| l.pop()) {
            self.live.insert(addr, block);
            return addr;
        }
        let addr = self.heap_top;
        let Some(end) = addr.checked_add(block) else {
            return 0;
        };
        if !self.ensure_len(end) {
            return 0;
        }
        self.heap_top = end;
        self.live.insert(addr, block);
        addr
    }

    pub fn free(&mut self, addr: u32) -> Result<(), ForeignError> {
        if addr == 0 {
            return Ok(());
        }
        let Some(block) = self.live.remove(&addr) else {
            return Err(ForeignError::trap(format!(
                "free of unallocated address {addr:#x}"
            )));
        };
        self.free_lists.entry(block).or_default().push(addr);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn block_size(&self, addr: u32) -> Option<u32> {
        self.live.get(&addr).copied()
    }

    pub fn read_units(&self, addr: u32, len: u32) -> Option<Vec<u16>> {
        let start = addr as usize;
        let end = start.checked_add((len as usize).checked_mul(2)?)?;
        let raw = self.bytes.get(start..end)?;
        Some(
            raw.chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect(),
        )
    }

    /// Reads units up to (not including) the first NUL.
    pub fn read_units_terminated(&self, addr: u32) -> Option<Vec<u16>> {
        let mut out = Vec::new();
        let mut pos = addr as usize;
        loop {
            let raw = self.bytes.get(pos..pos.checked_add(2)?)?;
            let unit = u16::from_le_bytes([raw[0], raw[1]]);
            if unit == 0 {
                return Some(out);
            }
            out.push(unit);
            pos += 2;
        }
    }

    pub fn write_units(&mut self, addr: u32, units: &[u16]) -> bool {
        let start = addr as usize;
        let Some(end) = start.checked_add(units.len() * 2) else {
            return false;
        };
        let Some(dst) = self.bytes.get_mut(start..end) else {
            return false;
        };
        for (chunk, unit) in dst.chunks_exact_mut(2).zip(units) {
            chunk.copy_from_slice(&unit.to_le_bytes());
        }
        true
    }

    fn ensure_len(&mut self, end: u32) -> bool {
        if (end as usize) <= self.bytes.len() {
            return true;
        }
        let pages = end.div_ceil(PAGE_SIZE);
        if pages > self.max_pages {
            return false;
        }
        self.bytes.resize(pages as usize * PAGE_SIZE as usize, 0);
        true
    }
}

fn align16(v: u32) -> u32 {
    (v + 15) & !15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_rounds_and_recycles_blocks() {
        let mut mem = LinearMemory::new(1, 4, 2048);
        let a = mem.malloc(10);
        assert_eq!(a, 2048);
        assert_eq!(mem.block_size(a), Some(16));
        let b = mem.malloc(100);
        assert_eq!(mem.block_size(b), Some(128));
        assert_ne!(a, b);

        mem.free(b).unwrap();
        let c = mem.malloc(65);
        assert_eq!(c, b);
        assert_eq!(mem.live_blocks(), 2);
        assert_eq!(mem.live_bytes(), 16 + 128);
    }

    #[test]
    fn malloc_grows_pages_until_max() {
        let mut mem = LinearMemory::new(1, 2, NULL_GUARD);
        assert_eq!(mem.pages(), 1);
        let big = mem.malloc(PAGE_SIZE / 2);
        assert_ne!(big, 0);
        let bigger = mem.malloc(PAGE_SIZE / 2);
        assert_ne!(bigger, 0);
        assert_eq!(mem.pages(), 2);
        assert_eq!(mem.malloc(PAGE_SIZE), 0);
    }

    #[test]
    fn free_rejects_unknown_and_double_free() {
        let mut mem = LinearMemory::new(1, 1, NULL_GUARD);
        assert!(mem.free(0).is_ok());
        let a = mem.malloc(8);
        mem.free(a).unwrap();
        let err = mem.free(a).unwrap_err();
        assert!(err.message.contains("unallocated"), "{err}");
        assert!(mem.free(12345).is_err());
    }

    #[test]
    fn unit_io_is_little_endian_and_bounded() {
        let mut mem = LinearMemory::new(1, 1, NULL_GUARD);
        let a = mem.malloc(16);
        assert!(mem.write_units(a, &[0x0041, 0xd83d, 0xde00, 0]));
        assert_eq!(&mem.bytes()[a as usize..a as usize + 2], &[0x41, 0x00]);
        assert_eq!(mem.read_units(a, 3).unwrap(), vec![0x0041, 0xd83d, 0xde00]);
        assert_eq!(
            mem.read_units_terminated(a).unwrap(),
            vec![0x0041, 0xd83d, 0xde00]
        );
        assert!(!mem.write_units(PAGE_SIZE - 1, &[1]));
        assert!(mem.read_units(PAGE_SIZE - 2, 2).is_none());
    }
}
