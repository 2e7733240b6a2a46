//! Block sources — where block bytes come from.
//!
//! The index and scanner never touch files directly. Every read goes through
//! a [`BlockSource`], which turns an `(offset, on_disk_size)` pair into the
//! raw framed block bytes.
//!
//! - [`MemoryBlockSource`] — owned bytes (tests, freshly written files).
//! - [`MmapBlockSource`] — a read-only memory-mapped file.
//! - [`CachedBlockSource`] — a bounded byte-budget cache in front of any
//!   other source, safe to share between threads.
//!
//! Sources must return byte-identical content for identical requests. They
//! may drop cached blocks at any time; callers keep their own `Arc` to
//! blocks they are still using.

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::Mmap;
use moka::sync::Cache;
use tracing::trace;

// ------------------------------------------------------------------------------------------------
// Trait
// ------------------------------------------------------------------------------------------------

/// Random-access provider of block bytes.
pub trait BlockSource: Send + Sync {
    /// Returns `on_disk_size` bytes starting at `offset`.
    ///
    /// Fails with [`io::ErrorKind::UnexpectedEof`] when the range extends past
    /// the end of the source.
    fn fetch_block(&self, offset: u64, on_disk_size: u32) -> io::Result<Arc<[u8]>>;

    /// Total length of the underlying file in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: BlockSource + ?Sized> BlockSource for Arc<S> {
    fn fetch_block(&self, offset: u64, on_disk_size: u32) -> io::Result<Arc<[u8]>> {
        (**self).fetch_block(offset, on_disk_size)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }
}

/// Resolves `(offset, size)` to a slice range within a buffer of `len` bytes.
fn checked_range(offset: u64, size: u32, len: usize) -> io::Result<std::ops::Range<usize>> {
    let start = usize::try_from(offset).ok();
    let end = start.and_then(|s| s.checked_add(size as usize));
    match (start, end) {
        (Some(start), Some(end)) if end <= len => Ok(start..end),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("block at {offset} (+{size} bytes) exceeds source of {len} bytes"),
        )),
    }
}

// ------------------------------------------------------------------------------------------------
// In-memory source
// ------------------------------------------------------------------------------------------------

/// A source over an owned byte buffer.
#[derive(Debug, Clone)]
pub struct MemoryBlockSource {
    bytes: Arc<[u8]>,
}

impl MemoryBlockSource {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl BlockSource for MemoryBlockSource {
    fn fetch_block(&self, offset: u64, on_disk_size: u32) -> io::Result<Arc<[u8]>> {
        let range = checked_range(offset, on_disk_size, self.bytes.len())?;
        Ok(Arc::from(&self.bytes[range]))
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

// ------------------------------------------------------------------------------------------------
// Memory-mapped source
// ------------------------------------------------------------------------------------------------

/// A source over a read-only memory-mapped file.
#[derive(Debug)]
pub struct MmapBlockSource {
    mmap: Mmap,
}

impl MmapBlockSource {
    /// Maps the file at `path`.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }`. Cell files are immutable once the
    /// writer renames them into place, and the map is read-only, so the
    /// mapped bytes never change underneath readers. Every fetch is
    /// bounds-checked before slicing.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }
}

impl BlockSource for MmapBlockSource {
    fn fetch_block(&self, offset: u64, on_disk_size: u32) -> io::Result<Arc<[u8]>> {
        let range = checked_range(offset, on_disk_size, self.mmap.len())?;
        Ok(Arc::from(&self.mmap[range]))
    }

    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }
}

// ------------------------------------------------------------------------------------------------
// Cache
// ------------------------------------------------------------------------------------------------

/// Hit / miss counters of a [`CachedBlockSource`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Blocks currently resident.
    pub blocks: u64,
    /// Bytes currently resident.
    pub bytes: u64,
}

/// Blocks are keyed by their `(offset, on_disk_size)` handle.
type BlockKey = (u64, u32);

/// A bounded cache of fetched blocks in front of another source.
///
/// Backed by a `moka` cache weighted by block length, so the resident bytes
/// stay within `capacity_bytes` and TinyLFU keeps frequently read blocks
/// (the upper index levels above all) over blocks read once by a scan. A
/// block larger than the whole budget is returned but never cached.
pub struct CachedBlockSource<S> {
    inner: S,
    capacity_bytes: usize,
    blocks: Cache<BlockKey, Arc<[u8]>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: BlockSource> CachedBlockSource<S> {
    pub fn new(inner: S, capacity_bytes: usize) -> Self {
        let blocks = Cache::builder()
            .weigher(|_key: &BlockKey, block: &Arc<[u8]>| {
                block.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(capacity_bytes as u64)
            .eviction_listener(|key: Arc<BlockKey>, _block, cause| {
                trace!(offset = key.0, size = key.1, ?cause, "block left cache");
            })
            .build();
        Self {
            inner,
            capacity_bytes,
            blocks,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Current counters. Pending evictions are applied first so the
    /// resident figures respect the budget.
    pub fn stats(&self) -> CacheStats {
        self.blocks.run_pending_tasks();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            blocks: self.blocks.entry_count(),
            bytes: self.blocks.weighted_size(),
        }
    }

    /// Drops every cached block.
    pub fn clear(&self) {
        self.blocks.invalidate_all();
        self.blocks.run_pending_tasks();
    }
}

impl<S: BlockSource> BlockSource for CachedBlockSource<S> {
    fn fetch_block(&self, offset: u64, on_disk_size: u32) -> io::Result<Arc<[u8]>> {
        let key = (offset, on_disk_size);
        if let Some(block) = self.blocks.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(block);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let block = self.inner.fetch_block(offset, on_disk_size)?;
        if block.len() <= self.capacity_bytes {
            self.blocks.insert(key, Arc::clone(&block));
        }
        Ok(block)
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }
}

impl<S> std::fmt::Debug for CachedBlockSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedBlockSource")
            .field("capacity_bytes", &self.capacity_bytes)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .field("entry_count", &self.blocks.entry_count())
            .field("weighted_size", &self.blocks.weighted_size())
            .finish_non_exhaustive()
    }
}
