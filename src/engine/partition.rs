//! Row partitioning for the parallel strategies.
//!
//! `run_parallel` splits a table into at most `max_parallelism` partitions of
//! equal size, folding the remainder into the last one. `job` cuts a table
//! into fixed-size chunks with a shorter final chunk. Both write into a
//! caller-supplied (pooled) list so that no allocation happens per call.

/// Contiguous row range handed to one work item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    /// First row.
    pub start: usize,
    /// Number of rows.
    pub len: usize,
}

impl Partition {
    /// One past the last row.
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Fills `out` with `clamp(count / chunk_size, 1, max_parallelism)` equal
/// partitions covering `0..count`; the last partition absorbs the remainder.
///
/// A `chunk_size` of zero is treated as one. Nothing is produced for an
/// empty table.

pub fn split_even(count: usize, chunk_size: usize, max_parallelism: usize, out: &mut Vec<Partition>) {
    out.clear();
    if count == 0 {
        return;
    }
    let partitions = (count / chunk_size.max(1)).clamp(1, max_parallelism.max(1));
    let size = count / partitions;
    for index in 0..partitions {
        let start = index * size;
        let len = if index + 1 == partitions { count - start } else { size };
        out.push(Partition { start, len });
    }
}

/// Fills `out` with `ceil(count / chunk_size)` chunks of `chunk_size` rows
/// covering `0..count`; the final chunk may be shorter.

pub fn split_chunks(count: usize, chunk_size: usize, out: &mut Vec<Partition>) {
    out.clear();
    let chunk = chunk_size.max(1);
    let mut start = 0;
    while start < count {
        let len = chunk.min(count - start);
        out.push(Partition { start, len });
        start += len;
    }
}
