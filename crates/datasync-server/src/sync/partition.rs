//! Splits a row count into fixed-size chunks

use super::error::{SyncError, SyncResult};
use super::types::ChunkDescriptor;

/// Number of chunks needed for `total` rows
pub fn chunk_count(total: u64, chunk_size: u64) -> SyncResult<u64> {
    if chunk_size == 0 {
        return Err(SyncError::InvalidChunkSize);
    }
    Ok(total.div_ceil(chunk_size))
}

/// Cover `1..=total` with contiguous chunks of `chunk_size` rows.
///
/// Chunks are numbered from 1, every chunk but the last is full, and an
/// empty input yields no chunks.
pub fn partition(total: u64, chunk_size: u64) -> SyncResult<Vec<ChunkDescriptor>> {
    let count = chunk_count(total, chunk_size)?;

    Ok((0..count)
        .map(|i| {
            let offset = i * chunk_size;
            ChunkDescriptor {
                index: (i + 1) as u32,
                offset,
                size: chunk_size.min(total - offset),
            }
        })
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_and_short_tail() {
        let chunks = partition(2500, 1000).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].offset, 2000);
        assert_eq!(chunks[2].size, 500);

        let exact = partition(3000, 1000).unwrap();
        assert!(exact.iter().all(|c| c.size == 1000));
    }

    #[test]
    fn test_empty_input() {
        assert!(partition(0, 1000).unwrap().is_empty());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            partition(10, 0),
            Err(SyncError::InvalidChunkSize)
        ));
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_every_row_once(total in 0u64..20_000, size in 1u64..3_000) {
            let chunks = partition(total, size).unwrap();

            prop_assert_eq!(chunks.len() as u64, total.div_ceil(size));
            prop_assert_eq!(chunks.iter().map(|c| c.size).sum::<u64>(), total);

            let mut next = 0u64;
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index as usize, i + 1);
                prop_assert_eq!(chunk.offset, next);
                prop_assert!(chunk.size >= 1 && chunk.size <= size);
                if i + 1 < chunks.len() {
                    prop_assert_eq!(chunk.size, size);
                }
                next += chunk.size;
            }
        }
    }
}
