//! Encode / decode behaviour shared by every data block encoding.
//!
//! Coverage:
//! - Decoded cells match the input, in order, with values and tags intact
//! - Blocks straddling several restart intervals
//! - `next` / `last` positional helpers
//! - Stepping with `cell_after` across restart points
//! - Empty input rejected
//! - Encoding ids and `PrefixTree` rejection

#[cfg(test)]
mod tests {
    use crate::cell::{Cell, CellKey, CellType, Comparator};
    use crate::codec::tests::sample_cells;
    use crate::codec::{CodecError, DataBlockEncoding, RESTART_INTERVAL};
    use std::cmp::Ordering;
    use std::sync::Arc;

    /// # Scenario
    /// Encode and decode a multi-interval run with every supported encoding.
    ///
    /// # Expected behavior
    /// Every cell comes back identical and strictly increasing.
    #[test]
    fn decode_returns_input_in_order() {
        for with_tags in [false, true] {
            let cells = sample_cells(10, with_tags);
            assert!(cells.len() > 3 * RESTART_INTERVAL);

            for encoding in DataBlockEncoding::SUPPORTED {
                let codec = encoding.codec().unwrap();
                assert_eq!(codec.encoding(), encoding);
                let payload = codec.encode(&cells).unwrap();
                let block = codec.decode(Arc::from(payload)).unwrap();

                assert_eq!(block.cell_count(), cells.len());
                let mut prev: Option<Cell> = None;
                for (i, expected) in cells.iter().enumerate() {
                    let cell = block.cell_at(i).unwrap();
                    assert_eq!(&cell, expected, "{encoding} position {i}");
                    assert_eq!(&block.key_at(i).unwrap(), expected.key());
                    if let Some(p) = prev {
                        assert_eq!(
                            Comparator::Cell.compare_cells(&p, &cell),
                            Ordering::Less,
                            "{encoding} not increasing at {i}"
                        );
                    }
                    prev = Some(cell);
                }
            }
        }
    }

    /// # Scenario
    /// Walk a multi-interval block one step at a time, handing each cell's
    /// key to `cell_after`.
    ///
    /// # Expected behavior
    /// Every step yields the same cell as `cell_at`, including the first cell
    /// after each restart point; stepping past the last cell is out of range.
    #[test]
    fn cell_after_steps_through_block() {
        let cells = sample_cells(9, true);
        assert!(cells.len() > 3 * RESTART_INTERVAL);

        for encoding in DataBlockEncoding::SUPPORTED {
            let codec = encoding.codec().unwrap();
            let block = codec.decode(Arc::from(codec.encode(&cells).unwrap())).unwrap();

            let mut current = block.cell_at(0).unwrap();
            let mut position = 0;
            while let Some(next) = block.next(position) {
                let stepped = block.cell_after(position, current.key()).unwrap();
                assert_eq!(stepped, cells[next], "{encoding} step to {next}");
                assert_eq!(stepped, block.cell_at(next).unwrap());
                position = next;
                current = stepped;
            }
            assert_eq!(position, cells.len() - 1);
            assert!(matches!(
                block.cell_after(position, current.key()),
                Err(CodecError::OutOfRange { .. })
            ));
        }
    }

    #[test]
    fn next_and_last() {
        let cells = sample_cells(1, false);
        for encoding in DataBlockEncoding::SUPPORTED {
            let codec = encoding.codec().unwrap();
            let block = codec.decode(Arc::from(codec.encode(&cells).unwrap())).unwrap();
            assert_eq!(block.next(0), Some(1));
            assert_eq!(block.next(cells.len() - 1), None);
            assert_eq!(block.last(), Some(cells.len() - 1));
            assert!(matches!(
                block.cell_at(cells.len()),
                Err(CodecError::OutOfRange { .. })
            ));
        }
    }

    /// # Scenario
    /// A single cell with empty family, qualifier, and value.
    ///
    /// # Expected behavior
    /// Decodes back exactly.
    #[test]
    fn single_minimal_cell() {
        let cell = Cell::new(CellKey::new("r", "", "", 0, CellType::DeleteFamily), "", Vec::new());
        for encoding in DataBlockEncoding::SUPPORTED {
            let codec = encoding.codec().unwrap();
            let block = codec
                .decode(Arc::from(codec.encode(std::slice::from_ref(&cell)).unwrap()))
                .unwrap();
            assert_eq!(block.cell_count(), 1);
            assert_eq!(block.cell_at(0).unwrap(), cell);
        }
    }

    /// # Scenario
    /// Timestamps far apart and identical, including `u64::MAX` and 0.
    ///
    /// # Expected behavior
    /// Diff's wrapping deltas restore every timestamp.
    #[test]
    fn extreme_timestamps() {
        let cells: Vec<Cell> = [u64::MAX, u64::MAX - 1, 1 << 40, 7, 0]
            .into_iter()
            .map(|ts| Cell::put("r", "f", "q", ts, "v"))
            .collect();
        for encoding in DataBlockEncoding::SUPPORTED {
            let codec = encoding.codec().unwrap();
            let block = codec.decode(Arc::from(codec.encode(&cells).unwrap())).unwrap();
            for (i, cell) in cells.iter().enumerate() {
                assert_eq!(block.cell_at(i).unwrap().timestamp(), cell.timestamp());
            }
        }
    }

    #[test]
    fn empty_input_rejected() {
        for encoding in DataBlockEncoding::SUPPORTED {
            let codec = encoding.codec().unwrap();
            assert!(matches!(codec.encode(&[]), Err(CodecError::EmptyBlock)));
        }
    }

    /// # Scenario
    /// Front coding actually shrinks a run of similar keys.
    ///
    /// # Expected behavior
    /// Prefix and Diff payloads are smaller than the raw payload.
    #[test]
    fn front_coding_is_smaller() {
        let cells = sample_cells(20, false);
        let raw = DataBlockEncoding::None.codec().unwrap().encode(&cells).unwrap();
        let prefix = DataBlockEncoding::Prefix.codec().unwrap().encode(&cells).unwrap();
        let diff = DataBlockEncoding::Diff.codec().unwrap().encode(&cells).unwrap();
        assert!(prefix.len() < raw.len());
        assert!(diff.len() < raw.len());
    }

    #[test]
    fn encoding_ids() {
        for encoding in [
            DataBlockEncoding::None,
            DataBlockEncoding::Prefix,
            DataBlockEncoding::Diff,
            DataBlockEncoding::PrefixTree,
        ] {
            assert_eq!(DataBlockEncoding::from_id(encoding.id()), Some(encoding));
        }
        assert_eq!(DataBlockEncoding::from_id(1), None);
        assert!(matches!(
            DataBlockEncoding::PrefixTree.codec(),
            Err(CodecError::UnsupportedEncoding(6))
        ));
    }
}
