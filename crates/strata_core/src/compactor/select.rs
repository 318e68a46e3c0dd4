//! Picking the segments one compaction pass merges.
//!
//! Selection looks at segment statistics only; no segment data is read.

use crate::config::CompactionConfig;
use crate::segment::{Segment, SegmentStats};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Why a segment was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionReason {
    /// The segment is small and another one follows it.
    Small,
    /// The collection is empty but the segment still has counters.
    Empty,
    /// Too many dead markers.
    DeadCount,
    /// Too many dead bytes.
    DeadSize,
    /// Dead bytes are too large a share of the segment.
    DeadShare,
    /// Nothing but remove markers.
    OnlyDeletions,
}

impl fmt::Display for CompactionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Small => "small",
            Self::Empty => "empty",
            Self::DeadCount => "dead count",
            Self::DeadSize => "dead size",
            Self::DeadShare => "dead share",
            Self::OnlyDeletions => "only deletions",
        };
        f.write_str(name)
    }
}

/// What selection knows about one sealed segment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SegmentInfo {
    pub(crate) stats: SegmentStats,
    pub(crate) file_size: u64,
    pub(crate) max_size: u64,
}

/// Decides whether a segment is worth compacting.
pub(crate) fn eligibility(
    info: &SegmentInfo,
    is_last: bool,
    collection_empty: bool,
    config: &CompactionConfig,
) -> Option<CompactionReason> {
    let stats = &info.stats;
    if info.max_size < config.small_datafile_size && !is_last {
        return Some(CompactionReason::Small);
    }
    if collection_empty && !stats.is_empty() {
        return Some(CompactionReason::Empty);
    }
    if stats.number_dead > 0 {
        if stats.number_dead >= config.dead_number_threshold {
            return Some(CompactionReason::DeadCount);
        }
        if stats.size_dead >= config.dead_size_threshold {
            return Some(CompactionReason::DeadSize);
        }
        let dead = stats.size_dead as f64;
        let by_content = dead / (stats.size_dead + stats.size_alive) as f64;
        let by_file = if info.file_size == 0 {
            0.0
        } else {
            dead / info.file_size as f64
        };
        if by_content >= config.dead_share || by_file >= config.dead_share {
            return Some(CompactionReason::DeadShare);
        }
    }
    if stats.number_alive == 0 && stats.number_dead == 0 && stats.number_deletions > 0 {
        return Some(CompactionReason::OnlyDeletions);
    }
    None
}

/// One segment of a batch.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub(crate) segment: Arc<Segment>,
    pub(crate) reason: CompactionReason,
    /// Remove markers must survive unless nothing older can still hold
    /// the documents they remove.
    pub(crate) keep_deletions: bool,
}

/// Result of a selection scan.
#[derive(Debug, Default)]
pub(crate) struct Selection {
    pub(crate) batch: Vec<Candidate>,
    /// Where the next scan starts.
    pub(crate) resume_index: usize,
}

/// Builds the next batch from the sealed segments.
///
/// The scan starts at `resume_index` and takes consecutive eligible
/// segments until the size cap or `max_files` is reached or an ineligible
/// segment follows the batch.
pub(crate) fn select(
    sealed: &[(Arc<Segment>, SegmentInfo)],
    resume_index: usize,
    collection_empty: bool,
    journal_size: u32,
    config: &CompactionConfig,
) -> Selection {
    let cap = config
        .max_size_factor
        .saturating_mul(u64::from(journal_size))
        .min(config.max_result_file_size);
    let start = if resume_index >= sealed.len() {
        0
    } else {
        resume_index
    };

    let mut batch: Vec<Candidate> = Vec::new();
    let mut total = 0u64;
    let mut next = start;
    for (index, (segment, info)) in sealed.iter().enumerate().skip(start) {
        next = index + 1;
        if info.stats.number_uncollected > 0 {
            if batch.is_empty() {
                continue;
            }
            break;
        }
        let is_last = index + 1 == sealed.len();
        let Some(reason) = eligibility(info, is_last, collection_empty, config) else {
            if batch.is_empty() {
                continue;
            }
            next = index;
            break;
        };

        let contribution = if reason == CompactionReason::OnlyDeletions {
            0
        } else {
            info.file_size.saturating_sub(info.stats.size_dead)
        };
        if !batch.is_empty() && total + contribution > cap {
            next = index;
            break;
        }
        total += contribution;
        batch.push(Candidate {
            segment: Arc::clone(segment),
            reason,
            keep_deletions: index > 0,
        });
        if batch.len() >= config.max_files {
            break;
        }
    }

    if let [only] = batch.as_slice() {
        let stats = sealed
            .iter()
            .find(|(segment, _)| segment.id() == only.segment.id())
            .map(|(_, info)| info.stats)
            .unwrap_or_default();
        let drops_deletions = !only.keep_deletions && stats.number_deletions > 0;
        if stats.number_dead == 0 && !drops_deletions {
            batch.clear();
        }
    }

    if batch.is_empty() {
        next = 0;
    }
    Selection {
        batch,
        resume_index: next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(alive: u64, dead: u64, deletions: u64) -> SegmentInfo {
        SegmentInfo {
            stats: SegmentStats {
                number_alive: alive,
                size_alive: alive * 64,
                number_dead: dead,
                size_dead: dead * 64,
                number_deletions: deletions,
                number_uncollected: 0,
            },
            file_size: 56 + (alive + dead + deletions) * 64,
            max_size: 1 << 20,
        }
    }

    fn config() -> CompactionConfig {
        CompactionConfig::default().small_datafile_size(0)
    }

    #[test]
    fn reasons_in_order() {
        let cfg = config();
        assert_eq!(eligibility(&info(10, 0, 0), false, false, &cfg), None);
        assert_eq!(
            eligibility(&info(1, 0, 0), false, true, &cfg),
            Some(CompactionReason::Empty)
        );
        assert_eq!(
            eligibility(&info(10, 5, 0), false, false, &cfg.clone().dead_number_threshold(5)),
            Some(CompactionReason::DeadCount)
        );
        assert_eq!(
            eligibility(&info(100, 5, 0), false, false, &cfg.clone().dead_size_threshold(320)),
            Some(CompactionReason::DeadSize)
        );
        assert_eq!(
            eligibility(&info(10, 5, 0), false, false, &cfg),
            Some(CompactionReason::DeadShare)
        );
        assert_eq!(
            eligibility(&info(0, 0, 3), false, false, &cfg),
            Some(CompactionReason::OnlyDeletions)
        );

        let small = CompactionConfig::default().small_datafile_size(2 << 20);
        assert_eq!(
            eligibility(&info(10, 0, 0), false, false, &small),
            Some(CompactionReason::Small)
        );
        assert_eq!(eligibility(&info(10, 0, 0), true, false, &small), None);
    }

    fn sealed(infos: &[SegmentInfo]) -> Vec<(Arc<Segment>, SegmentInfo)> {
        use crate::segment::SegmentKind;
        use crate::types::{CollectionId, SegmentId};
        use strata_storage::MemoryStore;

        let store: Arc<dyn strata_storage::SegmentStore> = Arc::new(MemoryStore::new());
        infos
            .iter()
            .enumerate()
            .map(|(i, info)| {
                let segment = Segment::create(
                    Arc::clone(&store),
                    SegmentKind::Datafile,
                    SegmentId::new(i as u64 + 1),
                    4096,
                    CollectionId::new(1),
                )
                .unwrap();
                (Arc::new(segment), *info)
            })
            .collect()
    }

    fn ids(selection: &Selection) -> Vec<u64> {
        selection
            .batch
            .iter()
            .map(|c| c.segment.id().as_u64())
            .collect()
    }

    #[test]
    fn batch_is_consecutive_and_resumes() {
        let cfg = config();
        let segments = sealed(&[
            info(10, 0, 0),
            info(10, 5, 0),
            info(10, 5, 0),
            info(10, 0, 0),
            info(10, 5, 0),
        ]);

        let first = select(&segments, 0, false, 1 << 20, &cfg);
        assert_eq!(ids(&first), vec![2, 3]);
        assert_eq!(first.resume_index, 3);
        assert!(first.batch.iter().all(|c| c.keep_deletions));

        let second = select(&segments, first.resume_index, false, 1 << 20, &cfg);
        assert_eq!(ids(&second), vec![5]);

        let wrapped = select(&segments, second.resume_index, false, 1 << 20, &cfg);
        assert_eq!(ids(&wrapped), vec![2, 3]);
    }

    #[test]
    fn nothing_eligible_resets_the_scan() {
        let segments = sealed(&[info(10, 0, 0), info(3, 0, 0)]);
        let selection = select(&segments, 1, false, 1 << 20, &config());
        assert!(selection.batch.is_empty());
        assert_eq!(selection.resume_index, 0);
    }

    #[test]
    fn lone_segment_with_nothing_to_drop_is_skipped() {
        let cfg = config();
        let kept = sealed(&[info(10, 0, 0), info(0, 0, 4)]);
        assert!(select(&kept, 0, false, 1 << 20, &cfg).batch.is_empty());

        let dropped = sealed(&[info(0, 0, 4), info(10, 0, 0)]);
        let selection = select(&dropped, 0, false, 1 << 20, &cfg);
        assert_eq!(ids(&selection), vec![1]);
        assert!(!selection.batch[0].keep_deletions);
    }

    #[test]
    fn max_files_limits_the_batch() {
        let cfg = config().max_files(2);
        let segments = sealed(&[info(1, 5, 0), info(1, 5, 0), info(1, 5, 0)]);
        let selection = select(&segments, 0, false, 1 << 20, &cfg);
        assert_eq!(ids(&selection), vec![1, 2]);
        assert_eq!(selection.resume_index, 2);
    }
}
