//! Malformed payload tests.
//!
//! Decoding must reject bad framing with a `CodecError` instead of panicking
//! or reading past the payload.

#[cfg(test)]
mod tests {
    use crate::codec::tests::sample_cells;
    use crate::codec::{CodecError, DataBlockEncoding};
    use std::sync::Arc;

    fn encoded(encoding: DataBlockEncoding) -> Vec<u8> {
        encoding.codec().unwrap().encode(&sample_cells(4, true)).unwrap()
    }

    /// # Scenario
    /// Every truncation of a valid payload.
    ///
    /// # Expected behavior
    /// Decode fails each time.
    #[test]
    fn truncated_payloads() {
        for encoding in DataBlockEncoding::SUPPORTED {
            let codec = encoding.codec().unwrap();
            let payload = encoded(encoding);
            for cut in 0..payload.len() {
                assert!(
                    codec.decode(Arc::from(&payload[..cut])).is_err(),
                    "{encoding} accepted payload cut at {cut}"
                );
            }
        }
    }

    #[test]
    fn zero_cell_count() {
        for encoding in DataBlockEncoding::SUPPORTED {
            let codec = encoding.codec().unwrap();
            let mut payload = encoded(encoding);
            let n = payload.len();
            payload[n - 4..].copy_from_slice(&0u32.to_le_bytes());
            assert!(matches!(
                codec.decode(Arc::from(payload)),
                Err(CodecError::EmptyBlock)
            ));
        }
    }

    /// # Scenario
    /// The trailing cell count claims far more cells than the payload holds.
    ///
    /// # Expected behavior
    /// Decode fails without allocating for the bogus count.
    #[test]
    fn inflated_cell_count() {
        for encoding in DataBlockEncoding::SUPPORTED {
            let codec = encoding.codec().unwrap();
            let mut payload = encoded(encoding);
            let n = payload.len();
            payload[n - 4..].copy_from_slice(&u32::MAX.to_le_bytes());
            assert!(codec.decode(Arc::from(payload)).is_err());
        }
    }

    /// # Scenario
    /// Flip every byte of the entry region, one at a time.
    ///
    /// # Expected behavior
    /// Decode either fails or yields a block whose accessors never panic.
    #[test]
    fn flipped_bytes_never_panic() {
        for encoding in DataBlockEncoding::SUPPORTED {
            let codec = encoding.codec().unwrap();
            let payload = encoded(encoding);
            for i in 0..payload.len() {
                let mut bad = payload.clone();
                bad[i] ^= 0xFF;
                if let Ok(block) = codec.decode(Arc::from(bad)) {
                    for pos in 0..block.cell_count() {
                        let _ = block.cell_at(pos);
                    }
                }
            }
        }
    }

    #[test]
    fn raw_payload_fed_to_prefix_decoder() {
        let raw = encoded(DataBlockEncoding::None);
        let prefix = DataBlockEncoding::Prefix.codec().unwrap();
        assert!(prefix.decode(Arc::from(raw)).is_err());
    }

    #[test]
    fn empty_payload() {
        for encoding in DataBlockEncoding::SUPPORTED {
            let codec = encoding.codec().unwrap();
            assert!(codec.decode(Arc::from(Vec::new())).is_err());
        }
    }
}
