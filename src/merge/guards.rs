//! Progress and consistency self-checks
//!
//! Guards scan each page for rank ties and compare it with the page before
//! it. A failed check is counted and logged, never raised.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::warn;

use crate::model::{DocumentId, PartitionId, RankedRecord, ResumePoint};
use crate::observability::{Event, MetricsRegistry};
use crate::ordering::RelevanceOrdering;

/// What a guard is watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardTarget {
    /// Pages fetched from one partition engine
    PartitionFetch(PartitionId),
    /// Pages handed to the client
    EmittedPage,
}

/// Outcome of checking one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardReport {
    /// Last record repeats the previous page's last record
    pub duplicate_batch: bool,
    /// First record does not sort strictly after the previous page's last record
    pub order_regression: bool,
    /// Two consecutive records share a rank key
    pub ties: bool,
}

impl GuardReport {
    pub fn made_progress(&self) -> bool {
        !self.duplicate_batch && !self.order_regression
    }

    pub fn is_clean(&self) -> bool {
        self.made_progress() && !self.ties
    }
}

#[derive(Debug, Clone)]
struct PageBoundary {
    document_id: DocumentId,
    resume: ResumePoint,
}

#[derive(Debug)]
pub struct ConsistencyGuards {
    target: GuardTarget,
    ordering: Arc<RelevanceOrdering>,
    detect_ties: bool,
    metrics: Arc<MetricsRegistry>,
    previous_last: Option<PageBoundary>,
}

impl ConsistencyGuards {
    pub fn new(
        target: GuardTarget,
        ordering: Arc<RelevanceOrdering>,
        detect_ties: bool,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            target,
            ordering,
            detect_ties,
            metrics,
            previous_last: None,
        }
    }

    /// Check a page against the previous one and remember its last record.
    ///
    /// Ties are checked on every page. The progress checks need a previous
    /// page, so the first non-empty page only sets their baseline.
    pub fn check_page(&mut self, records: &[RankedRecord]) -> GuardReport {
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return GuardReport::default();
        };

        let ties = self.detect_ties
            && records
                .windows(2)
                .any(|w| self.ordering.is_tie(&w[0].rank_key, &w[1].rank_key));
        let report = match &self.previous_last {
            None => GuardReport {
                ties,
                ..GuardReport::default()
            },
            Some(previous) => GuardReport {
                duplicate_batch: previous.document_id == last.document_id,
                order_regression: self.ordering.compare(previous.resume.key(), first.key())
                    != Ordering::Less,
                ties,
            },
        };

        self.previous_last = Some(PageBoundary {
            document_id: last.document_id.clone(),
            resume: last.resume_point(),
        });

        self.report(&report, records.len());
        report
    }

    fn report(&self, report: &GuardReport, page_len: usize) {
        if !report.made_progress() {
            let event = match self.target {
                GuardTarget::PartitionFetch(_) => {
                    self.metrics.increment_no_progress_batches();
                    Event::NoProgressBatch
                }
                GuardTarget::EmittedPage => {
                    self.metrics.increment_page_order_regressions();
                    Event::PageOrderRegression
                }
            };
            warn!(
                event = event.as_str(),
                guard = ?self.target,
                duplicate_batch = report.duplicate_batch,
                order_regression = report.order_regression,
                page_len,
                "page failed the progress check"
            );
        }
        if report.ties {
            self.metrics.increment_batches_with_ties();
            warn!(
                event = Event::BatchWithTies.as_str(),
                guard = ?self.target,
                page_len,
                "page contains records with equal rank keys"
            );
        }
    }
}
