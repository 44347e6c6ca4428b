use std::collections::HashMap;

const PAGE_SIZE: u64 = 4096;

/// Byte-addressable memory that only stores pages that were written. Unwritten bytes read as 0.
#[derive(Clone, Debug, Default)]
pub struct SparseMemory {
    pages: HashMap<u64, Box<[u8; PAGE_SIZE as usize]>>,
}

impl SparseMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, addr: u64, src: &[u8]) {
        let mut addr = addr;
        let mut src = src;
        while !src.is_empty() {
            let page = addr / PAGE_SIZE;
            let offset = (addr % PAGE_SIZE) as usize;
            let n = src.len().min(PAGE_SIZE as usize - offset);
            let bytes = self
                .pages
                .entry(page)
                .or_insert_with(|| Box::new([0u8; PAGE_SIZE as usize]));
            bytes[offset..offset + n].copy_from_slice(&src[..n]);
            addr += n as u64;
            src = &src[n..];
        }
    }

    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut addr = addr;
        let mut done = 0;
        while done < len {
            let page = addr / PAGE_SIZE;
            let offset = (addr % PAGE_SIZE) as usize;
            let n = (len - done).min(PAGE_SIZE as usize - offset);
            if let Some(bytes) = self.pages.get(&page) {
                out[done..done + n].copy_from_slice(&bytes[offset..offset + n]);
            }
            addr += n as u64;
            done += n;
        }
        out
    }

    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }
}
