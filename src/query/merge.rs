use crate::document::driver::DriverError;
use crate::document::types::{Document, Sort};

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type SourceItem = Result<Document, DriverError>;

struct HeapEntry {
    doc: Document,
    source: usize,
    seq: u64,
    sort: Arc<Sort>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed: BinaryHeap is a max-heap and the smallest entry must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .sort
            .compare(&other.doc, &self.doc)
            .then_with(|| other.source.cmp(&self.source))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Lazy k-way merge over per-source ordered channels.
///
/// Holds at most one buffered document per source. After a pop only the source that was
/// popped is pulled again, so no source is read further than the consumer demands. Ties go to
/// the lower source index, then to the earlier document of that source.
pub struct HeapMerge {
    sources: Vec<mpsc::Receiver<SourceItem>>,
    heap: BinaryHeap<HeapEntry>,
    seqs: Vec<u64>,
    sort: Arc<Sort>,
    primed: bool,
}

impl HeapMerge {
    pub fn new(sources: Vec<mpsc::Receiver<SourceItem>>, sort: Option<Sort>) -> Self {
        let seqs = vec![0; sources.len()];
        Self {
            sources,
            heap: BinaryHeap::new(),
            seqs,
            sort: Arc::new(sort.unwrap_or_default()),
            primed: false,
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    async fn pull(&mut self, source: usize) -> Result<(), DriverError> {
        match self.sources[source].recv().await {
            Some(Ok(doc)) => {
                let seq = self.seqs[source];
                self.seqs[source] += 1;
                self.heap.push(HeapEntry {
                    doc,
                    source,
                    seq,
                    sort: self.sort.clone(),
                });
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Ok(()),
        }
    }

    /// Next document in merged order with the index of the source it came from.
    pub async fn next(&mut self) -> Result<Option<(usize, Document)>, DriverError> {
        if !self.primed {
            for source in 0..self.sources.len() {
                self.pull(source).await?;
            }
            self.primed = true;
        }
        let Some(entry) = self.heap.pop() else {
            return Ok(None);
        };
        self.pull(entry.source).await?;
        Ok(Some((entry.source, entry.doc)))
    }
}
