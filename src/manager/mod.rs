//! Cursor manager
//!
//! Owns the index registry and every open cursor. Cursors are addressed by
//! numeric handles from a monotonic counter; each cursor sits behind its own
//! mutex so paging, closing and reaping of one cursor serialize while other
//! cursors proceed.
//!
//! Lock order: the registry map is never locked while a cursor entry is held.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::engine::PartitionSource;
use crate::errors::{SearchError, SearchResult};
use crate::executor::{OpenedQuery, QueryExecutor, SearchResultProducer};
use crate::facet::{CountResult, FacetSummary, IntermediateFacetPager, MergedFacets};
use crate::model::{EncodedPage, IndexId, QuerySpec};
use crate::observability::{log_event, Event, MetricsRegistry};

/// Client-visible cursor id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CursorHandle(u64);

impl CursorHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CursorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two cursors of an intermediate query: merged results and facet metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntermediateCursors {
    pub search: CursorHandle,
    pub meta: CursorHandle,
}

struct IndexEntry {
    partitions: Vec<Arc<dyn PartitionSource>>,
}

enum CursorBody {
    Search {
        producer: SearchResultProducer,
        query: Arc<QuerySpec>,
        count: CountResult,
        facets: Option<MergedFacets>,
        summary_taken: bool,
    },
    Meta {
        pager: IntermediateFacetPager,
    },
}

struct CursorEntry {
    body: CursorBody,
    last_used: Instant,
}

impl CursorEntry {
    fn new(body: CursorBody) -> Self {
        Self {
            body,
            last_used: Instant::now(),
        }
    }

    /// Whether nothing more can be asked of this cursor.
    fn is_finished(&self) -> bool {
        match &self.body {
            CursorBody::Search {
                producer,
                facets,
                summary_taken,
                ..
            } => producer.is_exhausted() && (*summary_taken || facets.is_none()),
            CursorBody::Meta { pager } => pager.is_exhausted(),
        }
    }

    fn close(&mut self) -> SearchResult<()> {
        match &mut self.body {
            CursorBody::Search { producer, .. } => producer.close(),
            CursorBody::Meta { .. } => Ok(()),
        }
    }
}

struct CursorSlot {
    index: IndexId,
    entry: Mutex<CursorEntry>,
}

fn lock<T>(mutex: &Mutex<T>) -> SearchResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| SearchError::internal("cursor lock poisoned"))
}

pub struct CursorManager {
    config: Arc<ServiceConfig>,
    metrics: Arc<MetricsRegistry>,
    executor: QueryExecutor,
    indexes: RwLock<HashMap<IndexId, Arc<IndexEntry>>>,
    cursors: Mutex<HashMap<u64, Arc<CursorSlot>>>,
    next_id: AtomicU64,
}

impl CursorManager {
    pub fn new(config: ServiceConfig) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(MetricsRegistry::new());
        let executor = QueryExecutor::new(Arc::clone(&config), Arc::clone(&metrics));
        Self {
            config,
            metrics,
            executor,
            indexes: RwLock::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// Register (or replace) an index and its partitions.
    pub fn register_index(
        &self,
        index: IndexId,
        partitions: Vec<Arc<dyn PartitionSource>>,
    ) -> SearchResult<()> {
        if partitions.is_empty() {
            return Err(SearchError::invalid_query(format!(
                "index '{}' needs at least one partition",
                index
            )));
        }
        let count = partitions.len();
        self.indexes
            .write()
            .map_err(|_| SearchError::internal("index registry lock poisoned"))?
            .insert(index.clone(), Arc::new(IndexEntry { partitions }));
        log_event(
            Event::IndexRegistered,
            &format!("index={} partitions={}", index, count),
        );
        Ok(())
    }

    /// Remove an index and kill its cursors. Returns the number of cursors killed.
    pub fn drop_index(&self, index: &IndexId) -> SearchResult<usize> {
        let removed = self
            .indexes
            .write()
            .map_err(|_| SearchError::internal("index registry lock poisoned"))?
            .remove(index);
        if removed.is_none() {
            return Err(SearchError::invalid_query(format!("unknown index '{}'", index)));
        }
        let killed = self.kill_index_cursors(index)?;
        log_event(
            Event::IndexDropped,
            &format!("index={} cursors_killed={}", index, killed),
        );
        Ok(killed)
    }

    fn partitions(&self, index: &IndexId) -> SearchResult<Arc<IndexEntry>> {
        self.indexes
            .read()
            .map_err(|_| SearchError::internal("index registry lock poisoned"))?
            .get(index)
            .cloned()
            .ok_or_else(|| SearchError::invalid_query(format!("unknown index '{}'", index)))
    }

    fn insert(&self, index: IndexId, body: CursorBody) -> SearchResult<CursorHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(CursorSlot {
            index,
            entry: Mutex::new(CursorEntry::new(body)),
        });
        lock(&self.cursors)?.insert(id, slot);
        Ok(CursorHandle(id))
    }

    async fn open(&self, query: QuerySpec) -> SearchResult<OpenedQuery> {
        let index = self.partitions(&query.index)?;
        self.executor.open(query, &index.partitions).await
    }

    /// Open a query on every partition of its index.
    pub async fn open_query(&self, query: QuerySpec) -> SearchResult<CursorHandle> {
        let opened = self.open(query).await?;
        let index = opened.query.index.clone();
        let count = opened.count;
        let handle = self.insert(
            index.clone(),
            CursorBody::Search {
                producer: opened.producer,
                query: opened.query,
                count: opened.count,
                facets: opened.facets,
                summary_taken: false,
            },
        )?;
        log_event(
            Event::QueryOpened,
            &format!("index={} cursor={} count={}", index, handle, count.value()),
        );
        Ok(handle)
    }

    /// Open a query whose facets are paged out as intermediate buckets on a
    /// separate meta cursor instead of a final summary.
    pub async fn open_intermediate_query(&self, query: QuerySpec) -> SearchResult<IntermediateCursors> {
        let mut opened = self.open(query).await?;
        let buckets = match (&opened.facets, opened.query.facets()) {
            (Some(merged), Some(definitions)) => merged.intermediate_buckets(definitions),
            _ => Ok(Vec::new()),
        };
        let pager = match buckets.and_then(|buckets| IntermediateFacetPager::new(opened.count, buckets)) {
            Ok(pager) => pager,
            Err(e) => {
                if let Err(release) = opened.producer.close() {
                    warn!(event = Event::ReleaseFailed.as_str(), error = %release);
                }
                return Err(e);
            }
        };

        let index = opened.query.index.clone();
        let count = opened.count;
        let search = self.insert(
            index.clone(),
            CursorBody::Search {
                producer: opened.producer,
                query: opened.query,
                count: opened.count,
                facets: None,
                summary_taken: true,
            },
        )?;
        let meta = self.insert(index.clone(), CursorBody::Meta { pager })?;
        log_event(
            Event::QueryOpened,
            &format!(
                "index={} cursor={} meta_cursor={} count={}",
                index,
                search,
                meta,
                count.value()
            ),
        );
        Ok(IntermediateCursors { search, meta })
    }

    fn slot(&self, handle: CursorHandle) -> SearchResult<Arc<CursorSlot>> {
        lock(&self.cursors)?
            .get(&handle.0)
            .cloned()
            .ok_or(SearchError::CursorNotFound(handle.0))
    }

    fn remove_finished(&self, handle: CursorHandle, event: Event) -> SearchResult<()> {
        if lock(&self.cursors)?.remove(&handle.0).is_some() {
            self.metrics.increment_cursors_closed();
            log_event(event, &format!("cursor={}", handle));
        }
        Ok(())
    }

    /// Next page of a cursor, at most `byte_budget` bytes, and whether it is
    /// the last. A cursor that delivered everything is removed, and so is one
    /// whose query failed fatally.
    pub fn get_next_page(
        &self,
        handle: CursorHandle,
        byte_budget: u64,
    ) -> SearchResult<(EncodedPage, bool)> {
        let slot = self.slot(handle)?;
        let (outcome, finished) = {
            let mut entry = lock(&slot.entry)?;
            entry.last_used = Instant::now();
            let outcome = match &mut entry.body {
                CursorBody::Search { producer, .. } => match producer.next_page(byte_budget) {
                    Ok((page, is_last)) => {
                        if is_last {
                            if let Err(e) = producer.close() {
                                warn!(event = Event::ReleaseFailed.as_str(), cursor = %handle, error = %e);
                            }
                        }
                        Ok((page, is_last))
                    }
                    Err(e) => {
                        if e.is_fatal() {
                            if let Err(close_err) = producer.close() {
                                warn!(event = Event::ReleaseFailed.as_str(), cursor = %handle, error = %close_err);
                            }
                        }
                        Err(e)
                    }
                },
                CursorBody::Meta { pager } => pager
                    .next_page(byte_budget)
                    .map(|page| (page, pager.is_exhausted())),
            };
            let finished = match &outcome {
                Ok(_) if entry.is_finished() => Some(Event::CursorExhausted),
                Err(e) if e.is_fatal() => Some(Event::CursorClosed),
                _ => None,
            };
            (outcome, finished)
        };

        if let Some(event) = finished {
            self.remove_finished(handle, event)?;
        }
        outcome
    }

    /// Facet summary of a search cursor. Can be taken once.
    ///
    /// Non-collector queries get a count-only summary.
    pub fn get_merged_facets(&self, handle: CursorHandle) -> SearchResult<FacetSummary> {
        let slot = self.slot(handle)?;
        let (summary, finished) = {
            let mut entry = lock(&slot.entry)?;
            entry.last_used = Instant::now();
            let summary = match &mut entry.body {
                CursorBody::Meta { .. } => {
                    return Err(SearchError::invalid_query(format!(
                        "cursor {} carries intermediate facet buckets, not a summary",
                        handle
                    )))
                }
                CursorBody::Search {
                    query,
                    count,
                    facets,
                    summary_taken,
                    ..
                } => {
                    if *summary_taken {
                        return Err(SearchError::invalid_query(format!(
                            "facet summary of cursor {} was already returned",
                            handle
                        )));
                    }
                    *summary_taken = true;
                    match (facets.take(), query.facets()) {
                        (Some(merged), Some(definitions)) => merged.final_summary(definitions, *count)?,
                        _ => FacetSummary {
                            count: *count,
                            facets: Default::default(),
                        },
                    }
                }
            };
            (summary, entry.is_finished())
        };

        if finished {
            self.remove_finished(handle, Event::CursorExhausted)?;
        }
        Ok(summary)
    }

    /// Close a cursor and release its engine handles. Unknown handles are
    /// already closed.
    pub fn close(&self, handle: CursorHandle) -> SearchResult<()> {
        let Some(slot) = lock(&self.cursors)?.remove(&handle.0) else {
            return Ok(());
        };
        self.metrics.increment_cursors_closed();
        log_event(Event::CursorClosed, &format!("cursor={}", handle));
        let mut entry = lock(&slot.entry)?;
        entry.close()
    }

    fn kill_where<F>(&self, event: Event, predicate: F) -> SearchResult<usize>
    where
        F: Fn(&CursorSlot, &CursorEntry) -> bool,
    {
        let victims: Vec<(u64, Arc<CursorSlot>)> = {
            let mut cursors = lock(&self.cursors)?;
            let ids: Vec<u64> = cursors
                .iter()
                .filter(|(_, slot)| match slot.entry.try_lock() {
                    Ok(entry) => predicate(slot, &entry),
                    // busy cursors are in use, not idle
                    Err(_) => false,
                })
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| cursors.remove(&id).map(|slot| (id, slot)))
                .collect()
        };

        for (id, slot) in &victims {
            let closed = lock(&slot.entry).and_then(|mut entry| entry.close());
            if let Err(e) = closed {
                self.metrics.increment_release_failures();
                warn!(event = Event::ReleaseFailed.as_str(), cursor = id, error = %e);
            }
            log_event(event, &format!("cursor={} index={}", id, slot.index));
        }
        Ok(victims.len())
    }

    /// Close every cursor unused for at least `idle_timeout`.
    pub fn kill_idle_cursors(&self, idle_timeout: Duration) -> SearchResult<usize> {
        let now = Instant::now();
        let killed = self.kill_where(Event::CursorReaped, |_, entry| {
            now.saturating_duration_since(entry.last_used) >= idle_timeout
        })?;
        self.metrics.add_cursors_reaped(killed as u64);
        Ok(killed)
    }

    /// Close every cursor of `index`.
    pub fn kill_index_cursors(&self, index: &IndexId) -> SearchResult<usize> {
        let killed = self.kill_where(Event::CursorClosed, |slot, _| slot.index == *index)?;
        for _ in 0..killed {
            self.metrics.increment_cursors_closed();
        }
        Ok(killed)
    }

    pub fn open_cursors(&self) -> usize {
        lock(&self.cursors).map(|cursors| cursors.len()).unwrap_or(0)
    }

    /// Close every cursor. Idle or not.
    pub fn shutdown(&self) -> SearchResult<usize> {
        let killed = self.kill_where(Event::CursorClosed, |_, _| true)?;
        info!(cursors_closed = killed, "cursor manager shut down");
        Ok(killed)
    }
}
