//! Full-scan queries over a record store.

use rayon::prelude::*;
use ro_types::{ObjectiveDirection, RoResult};
use tracing::{debug, warn};

use crate::aggregate::RecordList;
use crate::record::Record;
use crate::store::RecordStore;

impl RecordStore {
    /// Single linear scan for the best record under `objective`.
    ///
    /// A later record replaces the current best only if it is strictly
    /// better, so on ties the first record in scan order wins.
    pub fn search(&self, objective: ObjectiveDirection) -> RoResult<Option<Record>> {
        let mut best: Option<Record> = None;
        for candidate in self.scan()? {
            let replace = match &best {
                None => true,
                Some(current) => objective.improves(candidate.result(), current.result()),
            };
            if replace {
                best = Some(candidate);
            }
        }
        Ok(best)
    }

    pub fn minimum(&self) -> RoResult<Option<Record>> {
        self.search(ObjectiveDirection::Minimize)
    }

    pub fn maximum(&self) -> RoResult<Option<Record>> {
        self.search(ObjectiveDirection::Maximize)
    }

    /// The best `k` records, best first.
    ///
    /// Keeps a sorted buffer of at most `k` entries; a scanned record is
    /// inserted ahead of the first kept entry it strictly beats, evicting the
    /// worst when the buffer overflows.
    pub fn top(&self, k: usize, objective: ObjectiveDirection) -> RoResult<RecordList> {
        let mut kept: Vec<Record> = Vec::with_capacity(k.saturating_add(1).min(1024));
        if k == 0 {
            return Ok(RecordList::new(kept));
        }

        for record in self.scan()? {
            let slot = kept
                .iter()
                .position(|entry| objective.improves(record.result(), entry.result()));
            match slot {
                Some(index) => {
                    kept.insert(index, record);
                    if kept.len() > k {
                        kept.pop();
                    }
                }
                None if kept.len() < k => kept.push(record),
                None => {}
            }
        }
        Ok(RecordList::new(kept))
    }

    /// Every parseable record, in directory order.
    ///
    /// Large directories are parsed in parallel.
    pub fn all(&self) -> RoResult<RecordList> {
        let paths = self.record_paths()?;
        if paths.len() < self.config().parallel_threshold {
            return Ok(RecordList::new(self.scan()?.collect()));
        }

        debug!("Parsing {} records in parallel", paths.len());
        let loaded: Vec<Option<Record>> = paths
            .par_iter()
            .map(|path| match Record::load(path) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping record {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        let records: Vec<Record> = loaded.into_iter().flatten().collect();
        let skipped = paths.len() - records.len();
        self.note_parsed(records.len() as u64, skipped as u64);
        Ok(RecordList::new(records))
    }
}
