//! Query execution across the partitions of an index
//!
//! # Opening a query (strict order)
//!
//! 1. Validate the sort, the sequence token and the facet requests
//! 2. Open one cursor per partition and fetch its first page, in parallel
//! 3. Collect per-partition facet tallies for collector queries
//! 4. Merge hit counts and facet tallies
//!
//! Any failure releases every cursor opened so far; the error of the lowest
//! failing partition is returned and the rest are logged.

mod fanout;
mod producer;

use std::sync::Arc;

use tracing::warn;

pub use fanout::PartitionExecutor;
pub use producer::SearchResultProducer;

use crate::config::ServiceConfig;
use crate::cursor::{BatchSizeStrategy, PartitionResultCursor, QueryContext};
use crate::engine::{PartitionFacets, PartitionSource};
use crate::errors::{SearchError, SearchResult};
use crate::facet::{merge_counts, validate_facets, CountResult, FacetBucketMerger, MergedFacets};
use crate::model::{QueryKind, QuerySpec, SequenceToken, SortSpec};
use crate::observability::{log_event, Event, MetricsRegistry, ObservationScope};
use crate::ordering::RelevanceOrdering;

/// A query whose partitions are open and whose first pages are fetched.
pub struct OpenedQuery {
    pub query: Arc<QuerySpec>,
    pub producer: SearchResultProducer,
    pub count: CountResult,
    /// Merged tallies, for collector queries only
    pub facets: Option<MergedFacets>,
}

struct OpenedPartition {
    cursor: PartitionResultCursor,
    facets: Option<PartitionFacets>,
}

pub struct QueryExecutor {
    config: Arc<ServiceConfig>,
    metrics: Arc<MetricsRegistry>,
    partitions: PartitionExecutor,
}

impl QueryExecutor {
    pub fn new(config: Arc<ServiceConfig>, metrics: Arc<MetricsRegistry>) -> Self {
        let partitions = PartitionExecutor::new(config.parallelism);
        Self {
            config,
            metrics,
            partitions,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Open `query` over `sources`.
    pub async fn open(
        &self,
        query: QuerySpec,
        sources: &[Arc<dyn PartitionSource>],
    ) -> SearchResult<OpenedQuery> {
        let partitions = sources.len().to_string();
        let scope = ObservationScope::with_fields(
            "QUERY_OPEN",
            &[("index", query.index.as_str()), ("partitions", partitions.as_str())],
        );

        match self.open_partitions(query, sources).await {
            Ok(opened) => {
                self.metrics.increment_queries_opened();
                scope.complete_with_fields(&[("count", opened.count.value().to_string().as_str())]);
                Ok(opened)
            }
            Err(e) => {
                self.metrics.increment_queries_rejected();
                log_event(Event::QueryRejected, &format!("code={} error={}", e.code(), e));
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn open_partitions(
        &self,
        query: QuerySpec,
        sources: &[Arc<dyn PartitionSource>],
    ) -> SearchResult<OpenedQuery> {
        if sources.is_empty() {
            return Err(SearchError::invalid_query(format!(
                "index '{}' has no partitions",
                query.index
            )));
        }
        if let Some(sort) = &query.sort {
            sort.validate()?;
        }
        let sequence_token = query
            .sequence_token
            .as_deref()
            .map(SequenceToken::decode)
            .transpose()?;
        if let Some(token) = &sequence_token {
            check_token_arity(token, query.sort.as_ref())?;
        }
        let limit = match query.kind {
            QueryKind::Vector { limit: 0 } => {
                return Err(SearchError::invalid_query("vector limit must be positive"))
            }
            QueryKind::Vector { limit } => Some(limit),
            _ => None,
        };
        if let Some(definitions) = query.facets() {
            for source in sources {
                validate_facets(definitions, source.as_ref(), self.config.token_facets_enabled)?;
            }
        }

        let ordering = Arc::new(RelevanceOrdering::for_sort(
            query.sort.as_ref(),
            self.config.null_sort_position,
        ));
        let batch_size = BatchSizeStrategy::for_options(&query.options, &self.config);
        let detect_ties = sequence_token.is_some() || query.options.require_sequence_tokens;
        let with_facets = query.facets().is_some();
        let query = Arc::new(query);
        let context = QueryContext {
            query: Arc::clone(&query),
            ordering: Arc::clone(&ordering),
            sequence_token,
            metrics: Arc::clone(&self.metrics),
        };

        let task_batch_size = batch_size.clone();
        let outcomes = self
            .partitions
            .run_all(sources, move |source| {
                open_partition(source, context.clone(), task_batch_size.clone(), with_facets, limit)
            })
            .await?;

        let mut opened = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (partition, outcome) in outcomes {
            match outcome {
                Ok(partition) => opened.push(partition),
                Err(e) => failures.push((partition, e)),
            }
        }
        opened.sort_by_key(|p| p.cursor.partition_id());
        failures.sort_by_key(|(partition, _)| *partition);

        let mut failures = failures.into_iter();
        if let Some((_, first)) = failures.next() {
            release_all(&mut opened, &self.metrics);
            for (partition, e) in failures {
                warn!(partition, error = %e, "further partition failure while opening query");
            }
            return Err(first);
        }

        let facets = if with_facets {
            let tallies = opened
                .iter_mut()
                .filter_map(|p| p.facets.take().map(|f| (p.cursor.partition_id(), f)))
                .collect();
            match FacetBucketMerger::merge(tallies) {
                Ok(merged) => {
                    self.metrics.increment_facet_merges();
                    log_event(
                        Event::FacetsMerged,
                        &format!("index={} total_hits={}", query.index, merged.total_hits()),
                    );
                    Some(merged)
                }
                Err(e) => {
                    release_all(&mut opened, &self.metrics);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let count = match &facets {
            Some(merged) => CountResult::Total(merged.total_hits()),
            None => merge_counts(opened.iter().filter_map(|p| p.cursor.total_hits())),
        };

        let cursors = opened.into_iter().map(|p| p.cursor).collect();
        let producer = SearchResultProducer::new(
            cursors,
            ordering,
            batch_size,
            detect_ties,
            limit,
            Arc::clone(&self.metrics),
        )?;

        Ok(OpenedQuery {
            query,
            producer,
            count,
            facets,
        })
    }
}

/// A token carries one sort value per sort field, or none for score order.
fn check_token_arity(token: &SequenceToken, sort: Option<&SortSpec>) -> SearchResult<()> {
    let expected = sort.map(|s| s.fields.len());
    let actual = token.last_rank_key().sort_values.as_ref().map(Vec::len);
    if expected != actual {
        return Err(SearchError::invalid_query(
            "sequence token was not issued for this query's sort",
        ));
    }
    Ok(())
}

fn open_partition(
    source: &dyn PartitionSource,
    context: QueryContext,
    mut batch_size: BatchSizeStrategy,
    with_facets: bool,
    limit: Option<usize>,
) -> SearchResult<OpenedPartition> {
    let mut page_size = batch_size.advise_next_batch_size();
    if let Some(limit) = limit {
        page_size = page_size.min(limit);
    }

    let mut cursor = PartitionResultCursor::open(source, context, batch_size)?;
    let facets = cursor.fetch_first_page(page_size).and_then(|_| {
        if with_facets {
            cursor.compute_facets().map(Some)
        } else {
            Ok(None)
        }
    });

    match facets {
        Ok(facets) => Ok(OpenedPartition { cursor, facets }),
        Err(e) => {
            if let Err(release) = cursor.close() {
                warn!(
                    event = Event::ReleaseFailed.as_str(),
                    partition = cursor.partition_id(),
                    error = %release,
                );
            }
            Err(e)
        }
    }
}

fn release_all(opened: &mut [OpenedPartition], metrics: &MetricsRegistry) {
    for partition in opened {
        if let Err(e) = partition.cursor.close() {
            metrics.increment_release_failures();
            warn!(
                event = Event::ReleaseFailed.as_str(),
                partition = partition.cursor.partition_id(),
                error = %e,
            );
        }
    }
}
