//! Block index tests.
//!
//! Coverage:
//! - Single-, two- and three-level indexes built with a small fan-out
//! - Index coverage: every lookup lands in the block whose
//!   `[first_key, next_first_key)` range contains it
//! - Strict lookups for seek-before
//! - Cursor walks forward and backward over every data block
//! - Mid key selection

#[cfg(test)]
mod tests {
    use crate::WriterConfig;
    use crate::cell::{CellKey, Comparator};
    use crate::codec::{DataBlockEncoding, SeekMode};
    use crate::file::CellFileReader;
    use crate::file::index::BlockIndexEntry;
    use crate::file::tests::{build, numbered_cells};
    use std::cmp::Ordering;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    /// Twenty rows, two per data block: ten data blocks.
    fn reader_with_fan_out(fan_out: usize, encoding: DataBlockEncoding) -> CellFileReader {
        build(
            &numbered_cells(20),
            WriterConfig {
                block_size: 64,
                index_block_entries: fan_out,
                encoding,
                ..WriterConfig::default()
            },
        )
    }

    /// All data block entries in index order, via cursor walking.
    fn data_blocks(reader: &CellFileReader) -> Vec<BlockIndexEntry> {
        let index = reader.index();
        let mut blocks = Vec::new();
        let Some(mut cursor) = index.first_cursor().unwrap() else {
            return blocks;
        };
        loop {
            blocks.push(cursor.data_block().unwrap().clone());
            if !index.advance(&mut cursor).unwrap() {
                return blocks;
            }
        }
    }

    fn lookups() -> Vec<CellKey> {
        let mut keys = vec![CellKey::first_on_row(""), CellKey::first_on_row("zzz")];
        for i in 0..20 {
            let row = format!("r{i:04}");
            keys.push(CellKey::first_on_row(row.as_str()));
            keys.push(crate::file::tests::key(&row));
            keys.push(CellKey::last_on_column(row.as_str(), "f", "q"));
        }
        keys
    }

    /// Greatest block whose first key satisfies `mode`, by linear scan.
    fn reference(blocks: &[BlockIndexEntry], key: &CellKey, mode: SeekMode) -> Option<u64> {
        blocks
            .iter()
            .rev()
            .find(|b| mode.accepts(Comparator::Cell.compare(&b.first_key.key_ref(), &key.key_ref())))
            .map(|b| b.offset)
    }

    /// # Scenario
    /// Build the same twenty rows with fan-outs 128, 4 and 3.
    ///
    /// # Expected behavior
    /// One, two and three index levels respectively, always over ten data
    /// blocks.
    #[test]
    fn fan_out_controls_level_count() {
        init_tracing();
        for (fan_out, levels, root_entries) in [(128, 1, 10), (4, 2, 3), (3, 3, 2)] {
            let reader = reader_with_fan_out(fan_out, DataBlockEncoding::None);
            assert_eq!(reader.trailer().data_block_count, 10);
            assert_eq!(reader.index().levels(), levels, "fan-out {fan_out}");
            assert_eq!(reader.index().root_entry_count(), root_entries, "fan-out {fan_out}");
            assert_eq!(data_blocks(&reader).len(), 10);
        }
    }

    /// # Scenario
    /// Floor and strict lookups on one-, two- and three-level indexes.
    ///
    /// # Expected behavior
    /// Every lookup returns the block a linear scan over the data block
    /// entries picks, including keys equal to intermediate block boundaries.
    #[test]
    fn lookups_match_linear_scan() {
        init_tracing();
        for fan_out in [128, 4, 3, 2] {
            let reader = reader_with_fan_out(fan_out, DataBlockEncoding::Prefix);
            let blocks = data_blocks(&reader);
            let index = reader.index();

            for lookup in lookups() {
                let floor = index.locate_data_block(&lookup.key_ref()).unwrap();
                assert_eq!(
                    floor.map(|b| b.offset),
                    reference(&blocks, &lookup, SeekMode::Floor),
                    "fan-out {fan_out} floor {lookup}"
                );
                let before = index.locate_data_block_before(&lookup.key_ref()).unwrap();
                assert_eq!(
                    before.map(|b| b.offset),
                    reference(&blocks, &lookup, SeekMode::StrictBefore),
                    "fan-out {fan_out} strict {lookup}"
                );
            }
        }
    }

    /// # Scenario
    /// For every floor cursor, compare `next_indexed_key` with the first
    /// key of the following data block.
    ///
    /// # Expected behavior
    /// They match; the last block has no next key.
    #[test]
    fn next_indexed_key_matches_following_block() {
        init_tracing();
        let reader = reader_with_fan_out(3, DataBlockEncoding::None);
        let blocks = data_blocks(&reader);
        let index = reader.index();

        for (i, block) in blocks.iter().enumerate() {
            let cursor = index
                .seek_cursor(&block.first_key.key_ref(), SeekMode::Floor)
                .unwrap()
                .unwrap();
            assert_eq!(cursor.data_block(), Some(block));
            assert_eq!(
                index.next_indexed_key(&cursor),
                blocks.get(i + 1).map(|b| &b.first_key)
            );
        }
    }

    /// # Scenario
    /// Walk a three-level index backward from the last block.
    ///
    /// # Expected behavior
    /// `retreat` visits the blocks in reverse order and reports `false` at
    /// the first block without moving the cursor.
    #[test]
    fn retreat_walks_backward() {
        init_tracing();
        let reader = reader_with_fan_out(3, DataBlockEncoding::None);
        let blocks = data_blocks(&reader);
        let index = reader.index();

        let last = blocks.last().unwrap();
        let mut cursor = index
            .seek_cursor(&CellKey::first_on_row("zzz").key_ref(), SeekMode::Floor)
            .unwrap()
            .unwrap();
        assert_eq!(cursor.data_block(), Some(last));

        let mut seen = vec![cursor.data_block().unwrap().offset];
        while index.retreat(&mut cursor).unwrap() {
            seen.push(cursor.data_block().unwrap().offset);
        }
        seen.reverse();
        assert_eq!(seen, blocks.iter().map(|b| b.offset).collect::<Vec<_>>());
        assert_eq!(cursor.positions(), vec![0, 0, 0]);

        let mut end = index
            .seek_cursor(&CellKey::first_on_row("zzz").key_ref(), SeekMode::Floor)
            .unwrap()
            .unwrap();
        assert!(!index.advance(&mut end).unwrap());
        assert_eq!(end.data_block(), Some(last));
    }

    /// # Scenario
    /// Entries inside every index block are strictly increasing, and data
    /// block entries are increasing across the file.
    #[test]
    fn data_block_entries_strictly_increase() {
        init_tracing();
        let reader = reader_with_fan_out(2, DataBlockEncoding::Diff);
        let blocks = data_blocks(&reader);
        for pair in blocks.windows(2) {
            assert_eq!(
                Comparator::Cell.compare(&pair[0].first_key.key_ref(), &pair[1].first_key.key_ref()),
                Ordering::Less
            );
            assert!(pair[0].offset < pair[1].offset);
        }
        assert_eq!(blocks[0].offset, reader.trailer().first_data_block_offset);
        assert_eq!(blocks[9].offset, reader.trailer().last_data_block_offset);
    }

    /// # Scenario
    /// Mid key of ten blocks under a flat and a three-level index.
    ///
    /// # Expected behavior
    /// The flat index picks block 4 of 0..10 (`r0008`). The three-level
    /// index picks the middle entry at every level, landing on block 4 as
    /// well: root `[b0, b9]` → `b0`'s subtree `[b0, b3, b6]` → `b3`'s leaf
    /// `[b3, b4, b5]` → `b4`.
    #[test]
    fn mid_key_picks_middle_entries() {
        init_tracing();
        for fan_out in [128, 3] {
            let reader = reader_with_fan_out(fan_out, DataBlockEncoding::None);
            let mid = reader.index().mid_key().unwrap().unwrap();
            assert_eq!(mid.row, b"r0008", "fan-out {fan_out}");
        }
    }
}
