//! Memory and mmap source tests.

#[cfg(test)]
mod tests {
    use crate::source::{BlockSource, MemoryBlockSource, MmapBlockSource};
    use std::io::{ErrorKind, Write};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn bytes() -> Vec<u8> {
        (0u8..=255).collect()
    }

    #[test]
    fn memory_fetch_ranges() {
        let source = MemoryBlockSource::new(bytes());
        assert_eq!(source.len(), 256);
        assert!(!source.is_empty());
        assert_eq!(&*source.fetch_block(10, 4).unwrap(), &[10, 11, 12, 13]);
        assert_eq!(source.fetch_block(250, 6).unwrap().len(), 6);
        assert!(source.fetch_block(256, 0).unwrap().is_empty());
    }

    /// # Scenario
    /// Requests that run past the end, including offsets that overflow `usize`.
    ///
    /// # Expected behavior
    /// `UnexpectedEof`, never a panic.
    #[test]
    fn memory_out_of_bounds() {
        let source = MemoryBlockSource::new(bytes());
        for (offset, size) in [(250u64, 7u32), (257, 0), (u64::MAX, 1), (0, u32::MAX)] {
            let err = source.fetch_block(offset, size).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnexpectedEof, "{offset}+{size}");
        }
    }

    #[test]
    fn mmap_matches_file_contents() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes()).unwrap();
        file.flush().unwrap();

        let source = MmapBlockSource::open(file.path()).unwrap();
        assert_eq!(source.len(), 256);
        assert_eq!(&*source.fetch_block(100, 3).unwrap(), &[100, 101, 102]);
        assert_eq!(
            source.fetch_block(255, 2).unwrap_err().kind(),
            ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn mmap_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = MmapBlockSource::open(dir.path().join("absent")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn arc_source_delegates() {
        let source: Arc<dyn BlockSource> = Arc::new(MemoryBlockSource::new(bytes()));
        assert_eq!(source.len(), 256);
        assert_eq!(&*source.fetch_block(0, 2).unwrap(), &[0, 1]);
    }
}
