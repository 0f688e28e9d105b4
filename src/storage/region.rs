//! Paged region files.
//!
//! A region file multiplexes up to 1024 independently sized, compressed
//! payloads (one per chunk of a 32x32 super-region) into one file:
//!
//! * page 0 is the directory: 1024 big-endian `u32` entries, each
//!   `start_page << 8 | page_count`; a zero page count means absent
//! * page 1 is reserved
//! * payloads live on pages 2 and up as `[len: u32 BE][tag: u8][bytes]`,
//!   padded to whole pages, where `len` counts the tag byte

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::RegionError;
use crate::storage::compression::Compression;

/// Region coordinates of the super-region holding chunk `(x, z)`.
pub fn region_coords(x: i32, z: i32) -> (i32, i32) {
    (x >> 5, z >> 5)
}

pub fn region_file_name(x: i32, z: i32) -> String {
    let (rx, rz) = region_coords(x, z);
    format!("r.{rx}.{rz}.{REGION_EXTENSION}")
}

#[inline]
fn directory_index(x: i32, z: i32) -> usize {
    (x.rem_euclid(REGION_SIZE) + z.rem_euclid(REGION_SIZE) * REGION_SIZE) as usize
}

/// Decoded directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub start: u32,
    pub pages: u8,
}

impl Allocation {
    fn unpack(raw: u32) -> Option<Self> {
        let pages = (raw & 0xff) as u8;
        (pages != 0).then_some(Allocation {
            start: raw >> 8,
            pages,
        })
    }

    fn pack(self) -> u32 {
        (self.start << 8) | self.pages as u32
    }

    fn range(self) -> std::ops::Range<u32> {
        self.start..self.start + self.pages as u32
    }
}

fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

pub struct RegionStore {
    path: PathBuf,
    compression: Compression,
    file: Option<File>,
    ensured: bool,
    directory: Option<Box<[u32; REGION_ENTRIES]>>,
    free: Option<BTreeSet<u32>>,
}

impl RegionStore {
    /// Does not touch the disk; call `ensure` before the first `put`.
    pub fn new(path: impl Into<PathBuf>, compression: Compression) -> Self {
        RegionStore {
            path: path.into(),
            compression,
            file: None,
            ensured: false,
            directory: None,
            free: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.file.is_some() || self.path.is_file()
    }

    /// Guarantees a file with a zeroed directory and reserved page.
    /// Idempotent; an existing store is never truncated.
    pub fn ensure(&mut self) -> Result<(), RegionError> {
        if self.ensured {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        let minimum = (RESERVED_PAGES as usize * PAGE_SIZE) as u64;
        if file.metadata()?.len() < minimum {
            tracing::debug!(path = %self.path.display(), "initialising region file");
            file.set_len(minimum)?;
        }
        self.file = Some(file);
        self.ensured = true;
        Ok(())
    }

    /// Opens an existing file without creating it.
    fn open(&mut self) -> Result<Option<&mut File>, RegionError> {
        if self.file.is_none() {
            match OpenOptions::new().read(true).write(true).open(&self.path) {
                Ok(file) => self.file = Some(file),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.file.as_mut())
    }

    fn load_directory(&mut self) -> Result<(), RegionError> {
        if self.directory.is_some() {
            return Ok(());
        }
        let path = self.path.clone();
        let file = self.open()?.ok_or(RegionError::Uninitialized(path))?;
        let mut page = vec![0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(DIRECTORY_PAGE as u64 * PAGE_SIZE as u64))?;
        file.read_exact(&mut page).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => RegionError::Corrupt("truncated directory".into()),
            _ => e.into(),
        })?;

        let mut directory = Box::new([0u32; REGION_ENTRIES]);
        for (entry, raw) in directory.iter_mut().zip(page.chunks_exact(4)) {
            *entry = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        }
        self.directory = Some(directory);
        Ok(())
    }

    fn file_pages(&mut self) -> Result<u32, RegionError> {
        let path = self.path.clone();
        let file = self.open()?.ok_or(RegionError::Uninitialized(path))?;
        Ok(pages_for(file.metadata()?.len() as usize) as u32)
    }

    /// Directory entry for chunk `(x, z)`, if one is allocated.
    pub fn allocation(&mut self, x: i32, z: i32) -> Result<Option<Allocation>, RegionError> {
        if !self.exists() {
            return Ok(None);
        }
        self.load_directory()?;
        Ok(self
            .directory
            .as_ref()
            .and_then(|d| Allocation::unpack(d[directory_index(x, z)])))
    }

    /// All allocated entries as `(directory index, allocation)`.
    pub fn entries(&mut self) -> Result<Vec<(usize, Allocation)>, RegionError> {
        self.load_directory()?;
        Ok(self
            .directory
            .iter()
            .flat_map(|d| d.iter().enumerate())
            .filter_map(|(i, &raw)| Allocation::unpack(raw).map(|a| (i, a)))
            .collect())
    }

    /// Free pages, derived from the directory on first use.
    pub fn free_pages(&mut self) -> Result<&BTreeSet<u32>, RegionError> {
        if self.free.is_none() {
            let total = self.file_pages()?;
            let mut free: BTreeSet<u32> = (RESERVED_PAGES..total).collect();
            for (_, allocation) in self.entries()? {
                for page in allocation.range() {
                    free.remove(&page);
                }
            }
            self.free = Some(free);
        }
        Ok(self.free.get_or_insert_with(BTreeSet::new))
    }

    pub fn get(&mut self, x: i32, z: i32) -> Result<Vec<u8>, RegionError> {
        let allocation = self
            .allocation(x, z)?
            .ok_or(RegionError::Missing { x, z })?;
        let path = self.path.clone();
        let file = self.open()?.ok_or(RegionError::Uninitialized(path))?;

        let capacity = allocation.pages as usize * PAGE_SIZE;
        file.seek(SeekFrom::Start(allocation.start as u64 * PAGE_SIZE as u64))?;
        let mut header = [0u8; PAYLOAD_HEADER_SIZE];
        file.read_exact(&mut header).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => RegionError::Corrupt(format!("payload for ({x}, {z}) past end of file")),
            _ => e.into(),
        })?;
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if length == 0 || length + 4 > capacity {
            return Err(RegionError::Corrupt(format!(
                "payload length {length} does not fit {} pages",
                allocation.pages
            )));
        }
        let compression = Compression::from_tag(header[4])?;

        let mut compressed = vec![0u8; length - 1];
        file.read_exact(&mut compressed).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => RegionError::Corrupt("truncated payload".into()),
            _ => e.into(),
        })?;
        compression.decompress(&compressed)
    }

    pub fn put(&mut self, x: i32, z: i32, data: &[u8]) -> Result<(), RegionError> {
        if self.open()?.is_none() {
            return Err(RegionError::Uninitialized(self.path.clone()));
        }
        let compressed = self.compression.compress(data)?;
        let needed = pages_for(PAYLOAD_HEADER_SIZE + compressed.len());
        if needed > MAX_PAGES_PER_ENTRY {
            return Err(RegionError::TooLarge { pages: needed });
        }

        let existing = self.allocation(x, z)?;
        let (allocation, moved) = match existing {
            Some(current) if current.pages as usize == needed => (current, false),
            _ => (self.find_room(existing, needed)?, true),
        };

        let mut payload = Vec::with_capacity(needed * PAGE_SIZE);
        payload.extend_from_slice(&(compressed.len() as u32 + 1).to_be_bytes());
        payload.push(self.compression.tag());
        payload.extend_from_slice(&compressed);
        payload.resize(needed * PAGE_SIZE, 0);

        let index = directory_index(x, z);
        if let Err(e) = self.write_entry(index, allocation, &payload) {
            tracing::warn!(x, z, error = %e, "region write failed, allocation left unchanged");
            return Err(e);
        }

        // Only a completed write may hand pages over.
        if moved {
            self.commit_move(existing, allocation)?;
        }
        if let Some(directory) = self.directory.as_mut() {
            directory[index] = allocation.pack();
        }
        tracing::trace!(x, z, start = allocation.start, pages = allocation.pages, "region put");
        Ok(())
    }

    fn write_entry(&mut self, index: usize, allocation: Allocation, payload: &[u8]) -> Result<(), RegionError> {
        let path = self.path.clone();
        let file = self.open()?.ok_or(RegionError::Uninitialized(path))?;
        file.seek(SeekFrom::Start(allocation.start as u64 * PAGE_SIZE as u64))?;
        file.write_all(payload)?;
        file.seek(SeekFrom::Start((DIRECTORY_PAGE as usize * PAGE_SIZE + index * 4) as u64))?;
        file.write_all(&allocation.pack().to_be_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Finds room for `needed` pages: first fit among the free pages plus
    /// the ones `previous` gives up, else past the end of the file. The free
    /// set is not touched.
    fn find_room(&mut self, previous: Option<Allocation>, needed: usize) -> Result<Allocation, RegionError> {
        let end = self.file_pages()?.max(RESERVED_PAGES);
        let mut candidates = self.free_pages()?.clone();
        if let Some(previous) = previous {
            candidates.extend(previous.range());
        }

        let mut run_start = None;
        let mut run_len = 0usize;
        let mut last = None;
        for &page in candidates.iter() {
            if last.is_none_or(|l: u32| l + 1 != page) {
                run_start = Some(page);
                run_len = 0;
            }
            run_len += 1;
            last = Some(page);
            if run_len >= needed {
                break;
            }
        }

        let start = match run_start {
            Some(start) if run_len >= needed => start,
            _ => end,
        };
        if start > MAX_START_PAGE {
            return Err(RegionError::TooLarge { pages: needed });
        }
        Ok(Allocation {
            start,
            pages: needed as u8,
        })
    }

    /// Releases `previous` and claims `allocation` in the free set.
    fn commit_move(&mut self, previous: Option<Allocation>, allocation: Allocation) -> Result<(), RegionError> {
        self.free_pages()?;
        let free = self.free.get_or_insert_with(BTreeSet::new);
        if let Some(previous) = previous {
            free.extend(previous.range());
        }
        for page in allocation.range() {
            free.remove(&page);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2654435761).max(1);
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    fn store(dir: &tempfile::TempDir, compression: Compression) -> RegionStore {
        RegionStore::new(dir.path().join("r.0.0.mcr"), compression)
    }

    #[test]
    fn test_put_before_ensure_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = store(&dir, Compression::Zlib);
        let result = region.put(0, 0, b"hello");
        assert!(matches!(result, Err(RegionError::Uninitialized(_))));
        assert!(!dir.path().join("r.0.0.mcr").exists());
    }

    #[test]
    fn test_get_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = store(&dir, Compression::Zlib);
        assert!(matches!(region.get(1, 1), Err(RegionError::Missing { x: 1, z: 1 })));
        region.ensure().unwrap();
        assert!(matches!(region.get(1, 1), Err(RegionError::Missing { x: 1, z: 1 })));
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = store(&dir, Compression::Zlib);
        region.ensure().unwrap();
        region.put(5, 6, b"keep me").unwrap();
        region.ensure().unwrap();

        let mut reopened = store(&dir, Compression::Zlib);
        reopened.ensure().unwrap();
        assert_eq!(reopened.get(5, 6).unwrap(), b"keep me");
    }

    #[test]
    fn test_grow_reuses_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = store(&dir, Compression::None);
        region.ensure().unwrap();

        let small = noisy(50, 1);
        region.put(3, 4, &small).unwrap();
        assert_eq!(region.get(3, 4).unwrap(), small);
        assert_eq!(region.allocation(3, 4).unwrap().unwrap().pages, 1);

        let large = noisy(9000, 2);
        region.put(3, 4, &large).unwrap();
        assert_eq!(region.get(3, 4).unwrap(), large);
        let allocation = region.allocation(3, 4).unwrap().unwrap();
        assert_eq!(allocation.pages, 3);
        assert_eq!(allocation.start, 3);
        let free_before: Vec<u32> = region.free_pages().unwrap().iter().copied().collect();
        assert_eq!(free_before, vec![2]);

        let same_size = noisy(8500, 3);
        region.put(3, 4, &same_size).unwrap();
        let free_after: Vec<u32> = region.free_pages().unwrap().iter().copied().collect();
        assert_eq!(free_before, free_after);
        assert_eq!(region.allocation(3, 4).unwrap(), Some(allocation));
        assert_eq!(region.get(3, 4).unwrap(), same_size);

        region.put(0, 0, b"tiny").unwrap();
        assert_eq!(region.allocation(0, 0).unwrap().unwrap().start, 2);
        assert!(region.free_pages().unwrap().is_empty());
    }

    #[test]
    fn test_failed_write_keeps_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = store(&dir, Compression::None);
        region.ensure().unwrap();
        let original = vec![0xaa; 50];
        region.put(0, 0, &original).unwrap();
        let before = region.allocation(0, 0).unwrap().unwrap();
        assert_eq!(before.start, 2);
        let free_before = region.free_pages().unwrap().clone();

        // A read-only handle makes every write fail.
        region.file = Some(File::open(region.path()).unwrap());
        assert!(region.put(0, 0, &noisy(9000, 9)).is_err());
        assert_eq!(region.free_pages().unwrap(), &free_before);
        assert_eq!(region.allocation(0, 0).unwrap(), Some(before));

        region.file = None;
        region.put(1, 0, &[0xbb; 50]).unwrap();
        assert_ne!(region.allocation(1, 0).unwrap().unwrap().start, before.start);
        assert_eq!(region.get(0, 0).unwrap(), original);
        assert_eq!(region.get(1, 0).unwrap(), vec![0xbb; 50]);
    }

    #[test]
    fn test_free_set_derived_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = store(&dir, Compression::None);
        region.ensure().unwrap();
        region.put(0, 0, &noisy(100, 4)).unwrap();
        region.put(1, 0, &noisy(5000, 5)).unwrap();
        region.put(0, 0, &noisy(9000, 6)).unwrap();

        let mut reopened = store(&dir, Compression::None);
        let free: Vec<u32> = reopened.free_pages().unwrap().iter().copied().collect();
        assert_eq!(free, vec![2]);
        assert_eq!(reopened.entries().unwrap().len(), 2);
    }

    #[test]
    fn test_allocations_stay_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = store(&dir, Compression::None);
        region.ensure().unwrap();
        for round in 0..6u32 {
            for i in 0..8 {
                let len = 100 + ((i * 3 + round as i32 * 5) % 7) as usize * 3000;
                region.put(i, i, &noisy(len, round * 31 + i as u32)).unwrap();
            }
        }
        let mut used = BTreeSet::new();
        for (_, allocation) in region.entries().unwrap() {
            assert!(allocation.start >= RESERVED_PAGES);
            for page in allocation.range() {
                assert!(used.insert(page), "page {page} allocated twice");
            }
        }
        let free = region.free_pages().unwrap().clone();
        assert!(used.is_disjoint(&free));
        assert!(!free.contains(&0) && !free.contains(&1));
    }

    #[test]
    fn test_zlib_payloads_roundtrip_with_negative_coords() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = store(&dir, Compression::Zlib);
        region.ensure().unwrap();
        let data = noisy(20_000, 7);
        region.put(-1, -33, &data).unwrap();
        assert_eq!(region.get(31, 31).unwrap(), data);
    }

    #[test]
    fn test_file_naming() {
        assert_eq!(region_file_name(0, 0), "r.0.0.mcr");
        assert_eq!(region_file_name(31, 32), "r.0.1.mcr");
        assert_eq!(region_file_name(-1, -33), "r.-1.-2.mcr");
    }
}
