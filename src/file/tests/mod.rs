mod tests_index;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::cell::{Cell, CellKey, CellType};
use crate::file::builder::CellFileWriter;
use crate::file::{CellFileReader, Trailer};
use crate::source::{BlockSource, MemoryBlockSource};
use crate::{ReaderConfig, WriterConfig};

/// Key of a single-column cell as built by [`cell`].
fn key(row: &str) -> CellKey {
    CellKey::new(row, "f", "q", 1, CellType::Put)
}

/// A one-byte `Put` in column `f:q` at timestamp 1.
fn cell(row: &str) -> Cell {
    Cell::put(row, "f", "q", 1, "v")
}

/// `count` single-column rows named `r0000`, `r0001`, ...
///
/// With `block_size = 64` every data block holds exactly two of them.
fn numbered_cells(count: usize) -> Vec<Cell> {
    (0..count).map(|i| cell(&format!("r{i:04}"))).collect()
}

fn build_bytes(cells: &[Cell], config: WriterConfig) -> Vec<u8> {
    let mut writer = CellFileWriter::in_memory(config).unwrap();
    for cell in cells {
        writer.append(cell.clone()).unwrap();
    }
    writer.finish_to_vec().unwrap()
}

fn build(cells: &[Cell], config: WriterConfig) -> CellFileReader {
    CellFileReader::open_bytes(build_bytes(cells, config), ReaderConfig::default()).unwrap()
}

/// Overwrites the trailer of `bytes` with `edit(trailer)`, checksum included.
fn rewrite_trailer(bytes: &mut [u8], edit: impl FnOnce(&mut Trailer)) {
    let source = MemoryBlockSource::new(bytes.to_vec());
    let mut trailer = Trailer::read_from(&source, true).unwrap();
    edit(&mut trailer);
    let encoded = trailer.to_bytes().unwrap();
    let start = bytes.len() - encoded.len();
    bytes[start..].copy_from_slice(&encoded);
}

/// Memory source that counts fetches and can be switched to fail.
#[derive(Debug)]
struct TrackedSource {
    inner: MemoryBlockSource,
    fetches: AtomicUsize,
    failing: AtomicBool,
}

impl TrackedSource {
    fn new(bytes: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBlockSource::new(bytes),
            fetches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

/// Opens a reader whose every block fetch goes through `source`.
fn open_tracked(source: &Arc<TrackedSource>, config: ReaderConfig) -> CellFileReader {
    let trailer = Trailer::read_from(&source.inner, true).unwrap();
    CellFileReader::open_index(trailer, Arc::clone(source) as Arc<dyn BlockSource>, config)
        .unwrap()
}

impl BlockSource for TrackedSource {
    fn fetch_block(&self, offset: u64, on_disk_size: u32) -> io::Result<Arc<[u8]>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected fetch failure"));
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_block(offset, on_disk_size)
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }
}
