//! Background jobs: status, progress events and failures

mod common;

use common::{init_test_logging, mysql_context, order_row, orders_fixture, PagedConnection};
use std::sync::Arc;
use tributary_cdc::extraction::{BulkLoader, ExtractionQuery};
use tributary_cdc::jobs::{join_job, run_job, spawn_job, JobRegistry, JobStatus, ProgressEventKind};
use tributary_cdc::join_tree::JoinTree;
use tributary_cdc::{CdcError, Result};
use tributary_rdbc::dialect::MySqlDialect;

#[tokio::test]
async fn test_successful_job_events() {
    init_test_logging();
    let conn = Arc::new(
        PagedConnection::new().on("FROM `orders`", (1..=4).map(|i| order_row(i, 1.0)).collect()),
    );
    let (ctx, _staging) = mysql_context(conn, &["orders"], 2);
    let tables = orders_fixture();
    let tree = JoinTree::single(&tables[0]);
    let query = ExtractionQuery::all_columns(&tree, &tables[..1], &MySqlDialect).unwrap();

    let registry = Arc::new(JobRegistry::new());
    let reporter = registry.register("load-1");
    let mut events = registry.subscribe("load-1").unwrap();
    reporter.set_total(4);

    let job_reporter = reporter.clone();
    let handle = spawn_job(registry.clone(), reporter, async move {
        BulkLoader::new(ctx, query).run(Some(&job_reporter)).await
    });
    assert_eq!(join_job(handle).await.unwrap(), 4);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id, "load-1");
        seen.push((event.event, event.percent));
    }
    assert_eq!(
        seen,
        vec![
            (ProgressEventKind::Start, 0),
            (ProgressEventKind::Processing, 50),
            (ProgressEventKind::Processing, 100),
            (ProgressEventKind::Finish, 100),
        ]
    );
    assert_eq!(registry.status("load-1").unwrap().status, JobStatus::Done);
}

#[tokio::test]
async fn test_failed_job_uses_default_code() {
    let registry = JobRegistry::new();
    let reporter = registry.register("tree-1");
    let mut events = reporter.subscribe();

    let result: Result<()> = run_job(&registry, &reporter, async {
        Err(CdcError::validation("no tables selected"))
    })
    .await;
    assert!(result.is_err());

    let status = registry.status("tree-1").unwrap();
    assert_eq!(status.status, JobStatus::Error);
    assert_eq!(status.error_code.as_deref(), Some("1050"));
    assert!(status.error_message.unwrap().contains("no tables selected"));

    assert_eq!(events.recv().await.unwrap().event, ProgressEventKind::Start);
    let last = events.recv().await.unwrap();
    assert_eq!(last.event, ProgressEventKind::Error);
    assert!(last.message.unwrap().contains("no tables selected"));
}

#[tokio::test]
async fn test_failed_job_keeps_database_code() {
    let registry = JobRegistry::new();
    let reporter = registry.register("cdc-1");

    let result: Result<u64> = run_job(&registry, &reporter, async {
        Err(tributary_rdbc::Error::database("1213", "Deadlock found").into())
    })
    .await;
    assert!(result.is_err());
    assert_eq!(
        registry.status("cdc-1").unwrap().error_code.as_deref(),
        Some("1213")
    );
}
