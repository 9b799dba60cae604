//! CLI command implementations
//!
//! Each command loads the configuration, registers the fixture index with a
//! fresh cursor manager, runs one query to completion and shuts the manager
//! down. Every output line is a `{"status":"ok","data":...}` frame.

use std::path::Path;

use serde_json::{json, Value};
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::config::ServiceConfig;
use crate::engine::memory::IndexFixture;
use crate::manager::{CursorHandle, CursorManager};
use crate::model::QuerySpec;

use super::args::Command;
use super::errors::CliResult;
use super::io::{read_request, write_response};

/// Sink for output frames
type Emit<'a> = dyn FnMut(Value) -> CliResult<()> + 'a;

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Search {
            config,
            fixture,
            byte_budget,
        } => search(config.as_deref(), &fixture, byte_budget),
        Command::Intermediate {
            config,
            fixture,
            byte_budget,
        } => intermediate(config.as_deref(), &fixture, byte_budget),
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<ServiceConfig> {
    match path {
        Some(path) => Ok(ServiceConfig::load(path)?),
        None => Ok(ServiceConfig::default()),
    }
}

fn runtime() -> CliResult<Runtime> {
    Ok(Builder::new_multi_thread().enable_all().build()?)
}

fn read_query() -> CliResult<QuerySpec> {
    Ok(serde_json::from_value(read_request()?)?)
}

/// Build a manager serving the fixture's index.
fn open_manager(config: ServiceConfig, fixture: &Path) -> CliResult<CursorManager> {
    let fixture = IndexFixture::load(fixture)?;
    let index = fixture.index.clone();
    let partitions = fixture.into_partitions()?;
    let manager = CursorManager::new(config);
    manager.register_index(index, partitions)?;
    Ok(manager)
}

fn drain(
    manager: &CursorManager,
    handle: CursorHandle,
    byte_budget: u64,
    kind: &str,
    emit: &mut Emit<'_>,
) -> CliResult<()> {
    loop {
        let (page, is_last) = manager.get_next_page(handle, byte_budget)?;
        emit(json!({
            "kind": kind,
            "cursor": handle,
            "documents": page.to_json_values()?,
            "bytes": page.byte_size,
            "is_last": is_last,
        }))?;
        if is_last {
            return Ok(());
        }
    }
}

/// Close every cursor whatever the outcome; the outcome's error wins.
fn finish(manager: &CursorManager, outcome: CliResult<()>) -> CliResult<()> {
    let closed = manager.shutdown();
    info!(metrics = %manager.metrics().to_json(), "query finished");
    outcome?;
    closed?;
    Ok(())
}

/// Run `query` and emit every page, then the facet summary.
pub fn execute_search(
    config: ServiceConfig,
    fixture: &Path,
    query: QuerySpec,
    byte_budget: Option<u64>,
    emit: &mut Emit<'_>,
) -> CliResult<()> {
    let byte_budget = byte_budget.unwrap_or(config.default_byte_budget);
    let manager = open_manager(config, fixture)?;
    let runtime = runtime()?;

    let handle = runtime.block_on(manager.open_query(query))?;
    let outcome = (|| -> CliResult<()> {
        // taken first so the cursor goes away with its last page
        let summary = manager.get_merged_facets(handle)?;
        drain(&manager, handle, byte_budget, "page", emit)?;
        emit(json!({ "kind": "facets", "summary": serde_json::to_value(&summary)? }))
    })();
    finish(&manager, outcome)
}

/// Run `query` as an intermediate query: result pages, then facet bucket pages.
pub fn execute_intermediate(
    config: ServiceConfig,
    fixture: &Path,
    query: QuerySpec,
    byte_budget: Option<u64>,
    emit: &mut Emit<'_>,
) -> CliResult<()> {
    let byte_budget = byte_budget.unwrap_or(config.default_byte_budget);
    let manager = open_manager(config, fixture)?;
    let runtime = runtime()?;

    let cursors = runtime.block_on(manager.open_intermediate_query(query))?;
    let outcome = (|| -> CliResult<()> {
        drain(&manager, cursors.search, byte_budget, "page", emit)?;
        drain(&manager, cursors.meta, byte_budget, "meta", emit)
    })();
    finish(&manager, outcome)
}

/// Execute the query read from stdin
pub fn search(config_path: Option<&Path>, fixture: &Path, byte_budget: Option<u64>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let query = read_query()?;
    execute_search(config, fixture, query, byte_budget, &mut write_response)
}

/// Execute the query read from stdin as an intermediate query
pub fn intermediate(
    config_path: Option<&Path>,
    fixture: &Path,
    byte_budget: Option<u64>,
) -> CliResult<()> {
    let config = load_config(config_path)?;
    let query = read_query()?;
    execute_intermediate(config, fixture, query, byte_budget, &mut write_response)
}

/// Load and validate a configuration file
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = ServiceConfig::load(config_path)?;
    write_response(json!({ "valid": true, "config": serde_json::to_value(&config)? }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fixture() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let body = json!({
            "index": "products",
            "fields": { "color": "string_facet" },
            "partitions": [
                { "documents": [
                    { "_id": "1", "_score": 9.0, "color": "red" },
                    { "_id": "2", "_score": 7.0, "color": "red" },
                    { "_id": "3", "_score": 5.0, "color": "red" }
                ] },
                { "documents": [
                    { "_id": "4", "_score": 8.0, "color": "red" },
                    { "_id": "5", "_score": 6.0, "color": "blue" }
                ] }
            ]
        });
        file.write_all(body.to_string().as_bytes()).unwrap();
        file
    }

    fn collector_query() -> QuerySpec {
        serde_json::from_value(json!({
            "index": "products",
            "kind": { "type": "collector", "facets": {
                "color": { "type": "string", "path": "color" }
            } },
            "options": { "docs_requested": 3 }
        }))
        .unwrap()
    }

    fn ids(frame: &Value) -> Vec<String> {
        frame["documents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["_id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_search_pages_then_summary() {
        let file = fixture();
        let mut frames = Vec::new();
        execute_search(
            ServiceConfig::default(),
            file.path(),
            collector_query(),
            None,
            &mut |frame| {
                frames.push(frame);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(ids(&frames[0]), vec!["1", "4", "2"]);
        assert_eq!(frames[0]["is_last"], false);
        assert_eq!(ids(&frames[1]), vec!["5", "3"]);
        assert_eq!(frames[1]["is_last"], true);

        let summary = &frames[2]["summary"];
        assert_eq!(summary["count"]["value"], 5);
        assert_eq!(summary["facets"]["color"]["buckets"][0]["value"], "red");
        assert_eq!(summary["facets"]["color"]["buckets"][0]["count"], 4);
        assert_eq!(summary["facets"]["color"]["buckets"][1]["value"], "blue");
    }

    #[test]
    fn test_intermediate_emits_meta_pages() {
        let file = fixture();
        let mut frames = Vec::new();
        execute_intermediate(
            ServiceConfig::default(),
            file.path(),
            collector_query(),
            None,
            &mut |frame| {
                frames.push(frame);
                Ok(())
            },
        )
        .unwrap();

        let meta: Vec<&Value> = frames.iter().filter(|f| f["kind"] == "meta").collect();
        assert_eq!(meta.len(), 1);
        let documents = meta[0]["documents"].as_array().unwrap();
        assert_eq!(documents[0]["type"], "count");
        assert_eq!(documents[0]["count"], 5);
        assert_eq!(documents[1]["bucket"], "blue");
        assert_eq!(documents[2]["bucket"], "red");
    }

    #[test]
    fn test_missing_fixture_is_config_error() {
        let err = execute_search(
            ServiceConfig::default(),
            Path::new("/nonexistent/fixture.json"),
            collector_query(),
            None,
            &mut |_| Ok(()),
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "SEARCH_CONFIG_INVALID");
    }

    #[test]
    fn test_load_config_defaults() {
        assert_eq!(load_config(None).unwrap(), ServiceConfig::default());
    }
}
