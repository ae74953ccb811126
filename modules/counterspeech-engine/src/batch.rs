use std::iter::Enumerate;
use std::slice::Chunks;

use crate::types::WorkItem;

/// A contiguous, non-empty, ordered slice of the work sequence.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    /// Zero-based batch number within this run.
    pub index: usize,
    /// Position of the first item within the full work sequence.
    pub offset: usize,
    pub items: &'a [WorkItem],
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn texts(&self) -> Vec<&'a str> {
        self.items.iter().map(|item| item.text.as_str()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'a, WorkItem> {
        self.items.iter()
    }
}

/// Lazy batch iterator; see `batches`.
pub struct Batches<'a> {
    chunks: Enumerate<Chunks<'a, WorkItem>>,
    start: usize,
    size: usize,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, items) = self.chunks.next()?;
        Some(Batch {
            index,
            offset: self.start + index * self.size,
            items,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Batches<'_> {}

/// Slice `items` into batches of `size`, in order, with a final partial batch
/// when `items.len()` is not a multiple of `size`.
///
/// # Panics
/// If `size` is zero. `PipelineConfig::validate` rejects that before a run.
pub fn batches(items: &[WorkItem], size: usize) -> Batches<'_> {
    batches_from(items, 0, size)
}

/// Like `batches`, over `items[start..]`. Offsets stay relative to the full
/// slice so a resumed run reports the same positions as a fresh one.
pub fn batches_from(items: &[WorkItem], start: usize, size: usize) -> Batches<'_> {
    assert!(size > 0, "batch size must be at least 1");
    let start = start.min(items.len());
    Batches {
        chunks: items[start..].chunks(size).enumerate(),
        start,
        size,
    }
}
