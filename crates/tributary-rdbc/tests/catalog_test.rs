//! Dialect catalog tests against a scripted connection

mod common;

use common::{init_test_logging, row, ScriptedConnection};
use std::sync::Arc;
use std::time::Duration;
use tributary_rdbc::prelude::*;

fn mysql_source() -> SourceDescriptor {
    SourceDescriptor::new(DatabaseType::MySql, "db.internal", "shop", "bi")
}

fn pg_source() -> SourceDescriptor {
    SourceDescriptor::new(DatabaseType::Postgres, "db.internal", "shop", "bi")
}

fn shop_schema() -> ScriptedConnection {
    ScriptedConnection::new()
        .on(
            "INFORMATION_SCHEMA.COLUMNS",
            vec![
                row(&[
                    ("table_name", Some("orders")),
                    ("column_name", Some("id")),
                    ("data_type", Some("int(11)")),
                    ("is_nullable", Some("NO")),
                    ("extra", Some("auto_increment")),
                    ("max_length", None),
                ]),
                row(&[
                    ("table_name", Some("orders")),
                    ("column_name", Some("customer_id")),
                    ("data_type", Some("int(11)")),
                    ("is_nullable", Some("YES")),
                    ("extra", Some("")),
                    ("max_length", None),
                ]),
                row(&[
                    ("table_name", Some("orders")),
                    ("column_name", Some("created_at")),
                    ("data_type", Some("datetime")),
                    ("is_nullable", Some("YES")),
                    ("extra", Some("")),
                    ("max_length", None),
                ]),
                row(&[
                    ("table_name", Some("customers")),
                    ("column_name", Some("id")),
                    ("data_type", Some("int(11)")),
                    ("is_nullable", Some("NO")),
                    ("extra", Some("")),
                    ("max_length", None),
                ]),
                row(&[
                    ("table_name", Some("customers")),
                    ("column_name", Some("name")),
                    ("data_type", Some("varchar(100)")),
                    ("is_nullable", Some("YES")),
                    ("extra", Some("")),
                    ("max_length", Some("100")),
                ]),
                row(&[
                    ("table_name", Some("customers")),
                    ("column_name", Some("location")),
                    ("data_type", Some("geometry")),
                    ("is_nullable", Some("YES")),
                    ("extra", Some("")),
                    ("max_length", None),
                ]),
            ],
        )
        .on(
            "INFORMATION_SCHEMA.STATISTICS",
            vec![
                row(&[
                    ("table_name", Some("orders")),
                    ("index_name", Some("PRIMARY")),
                    ("column_name", Some("id")),
                    ("is_primary", Some("1")),
                    ("is_unique", Some("1")),
                ]),
                row(&[
                    ("table_name", Some("orders")),
                    ("index_name", Some("orders_customer")),
                    ("column_name", Some("customer_id")),
                    ("is_primary", Some("0")),
                    ("is_unique", Some("0")),
                ]),
                row(&[
                    ("table_name", Some("customers")),
                    ("index_name", Some("PRIMARY")),
                    ("column_name", Some("id")),
                    ("is_primary", Some("1")),
                    ("is_unique", Some("1")),
                ]),
            ],
        )
        .on(
            "TABLE_CONSTRAINTS",
            vec![
                row(&[
                    ("table_name", Some("orders")),
                    ("constraint_name", Some("PRIMARY")),
                    ("constraint_type", Some("PRIMARY KEY")),
                    ("column_name", Some("id")),
                    ("ref_table", None),
                    ("ref_column", None),
                    ("on_update", None),
                    ("on_delete", None),
                ]),
                row(&[
                    ("table_name", Some("orders")),
                    ("constraint_name", Some("fk_orders_customer")),
                    ("constraint_type", Some("FOREIGN KEY")),
                    ("column_name", Some("customer_id")),
                    ("ref_table", Some("customers")),
                    ("ref_column", Some("id")),
                    ("on_update", Some("CASCADE")),
                    ("on_delete", Some("RESTRICT")),
                ]),
                row(&[
                    ("table_name", Some("customers")),
                    ("constraint_name", Some("PRIMARY")),
                    ("constraint_type", Some("PRIMARY KEY")),
                    ("column_name", Some("id")),
                    ("ref_table", None),
                    ("ref_column", None),
                    ("on_update", None),
                    ("on_delete", None),
                ]),
            ],
        )
}

#[tokio::test]
async fn test_describe_columns_merges_three_queries() {
    init_test_logging();
    let conn = Arc::new(shop_schema());
    let catalog = DialectCatalog::new(conn.clone(), mysql_source(), "shop-db");

    let tables = catalog
        .describe_columns(&["orders".to_string(), "customers".to_string()])
        .await
        .unwrap();

    assert_eq!(conn.executed().len(), 3);
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].name, "orders");
    assert_eq!(tables[0].source_id, "shop-db");

    let orders = &tables[0];
    let id = orders.column("id").unwrap();
    assert!(id.is_primary && id.is_unique && id.is_index);
    assert!(!id.nullable);
    assert_eq!(id.extra.as_deref(), Some("auto_increment"));
    assert_eq!(id.column_type, ColumnType::Canonical(CanonicalType::Integer));

    let customer_id = orders.column("customer_id").unwrap();
    assert!(customer_id.is_index);
    assert!(!customer_id.is_unique);
    assert!(!customer_id.is_primary);
    assert_eq!(customer_id.extra, None);

    assert!(orders.column("created_at").unwrap().column_type.is_timestamp());

    assert_eq!(orders.foreign_keys.len(), 1);
    let fk = &orders.foreign_keys[0];
    assert_eq!(fk.source_column, "customer_id");
    assert_eq!(fk.target_table, "customers");
    assert_eq!(fk.target_column, "id");
    assert_eq!(fk.on_delete.as_deref(), Some("RESTRICT"));

    let customers = &tables[1];
    let name = customers.column("name").unwrap();
    assert_eq!(name.max_length, Some(100));
    assert_eq!(name.column_type, ColumnType::Canonical(CanonicalType::Text));
    assert_eq!(
        customers.column("location").unwrap().column_type,
        ColumnType::Native("geometry".into())
    );
}

#[tokio::test]
async fn test_describe_skips_missing_tables() {
    let catalog = DialectCatalog::new(Arc::new(shop_schema()), mysql_source(), "shop-db");
    let tables = catalog
        .describe_columns(&["ghost".to_string(), "customers".to_string()])
        .await
        .unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "customers");
}

#[tokio::test]
async fn test_describe_rejects_bad_table_names() {
    let conn = Arc::new(shop_schema());
    let catalog = DialectCatalog::new(conn.clone(), mysql_source(), "shop-db");
    let err = catalog
        .describe_columns(&["orders' OR '1'='1".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert!(conn.executed().is_empty());
}

#[tokio::test]
async fn test_list_tables_excludes_shadow_tables() {
    let conn = ScriptedConnection::new().on(
        "TABLE_TYPE = 'BASE TABLE'",
        vec![
            row(&[("table_name", Some("orders"))]),
            row(&[("table_name", Some("_etl_orders"))]),
            row(&[("table_name", Some("customers"))]),
            row(&[("table_name", Some("orders_audit_copy"))]),
        ],
    );
    let catalog = DialectCatalog::new(Arc::new(conn), mysql_source(), "shop-db");

    let tables = catalog
        .list_tables(&["orders_audit_copy".to_string()])
        .await
        .unwrap();
    assert_eq!(tables, vec!["orders", "customers"]);
}

#[tokio::test]
async fn test_estimate_uses_planner_above_threshold() {
    let conn = Arc::new(ScriptedConnection::new().on(
        "EXPLAIN",
        vec![row(&[(
            "QUERY PLAN",
            Some("Seq Scan on events  (cost=0.00..4000.00 rows=250000 width=8)"),
        )])],
    ));
    let catalog = DialectCatalog::new(conn.clone(), pg_source(), "pg");

    assert_eq!(catalog.estimate_row_count("events").await.unwrap(), 250_000);
    assert!(conn.executed().iter().all(|sql| !sql.contains("COUNT(1)")));
}

#[tokio::test]
async fn test_estimate_falls_back_to_exact_count() {
    let conn = Arc::new(
        ScriptedConnection::new()
            .on(
                "EXPLAIN",
                vec![row(&[(
                    "QUERY PLAN",
                    Some("Seq Scan on events  (cost=0.00..1.12 rows=12 width=8)"),
                )])],
            )
            .on("COUNT(1)", vec![row(&[("cnt", Some("10"))])]),
    );
    let catalog = DialectCatalog::new(conn.clone(), pg_source(), "pg");

    assert_eq!(catalog.estimate_row_count("events").await.unwrap(), 10);
    let executed = conn.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[1].starts_with("SELECT COUNT(1) AS cnt FROM (SELECT * FROM \"events\")"));
}

#[tokio::test]
async fn test_estimate_for_join_query() {
    let conn = Arc::new(ScriptedConnection::new().on("COUNT_BIG(1)", vec![row(&[("cnt", Some("42"))])]));
    let source = SourceDescriptor::new(DatabaseType::SqlServer, "mssql", "shop", "sa");
    let catalog = DialectCatalog::new(conn.clone(), source, "mssql");

    let join = "SELECT * FROM [orders] INNER JOIN [customers] ON ([orders].[customer_id] = [customers].[id])";
    assert_eq!(catalog.estimate_row_count(join).await.unwrap(), 42);
    // no planner estimate on SQL Server
    assert_eq!(conn.executed().len(), 1);
}

#[tokio::test]
async fn test_statistics_unavailable_when_zero_or_null() {
    let conn = ScriptedConnection::new().on(
        "DATA_LENGTH",
        vec![
            row(&[
                ("table_name", Some("orders")),
                ("row_count", Some("1200")),
                ("size_bytes", Some("65536")),
            ]),
            row(&[
                ("table_name", Some("customers")),
                ("row_count", Some("0")),
                ("size_bytes", Some("16384")),
            ]),
            row(&[
                ("table_name", Some("notes")),
                ("row_count", None),
                ("size_bytes", Some("16384")),
            ]),
        ],
    );
    let catalog = DialectCatalog::new(Arc::new(conn), mysql_source(), "shop-db");

    let stats = catalog
        .statistics(&["orders".into(), "customers".into(), "notes".into()])
        .await
        .unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats["orders"].row_count, 1200);
    assert_eq!(stats["orders"].size_bytes, 65536);
}

#[tokio::test]
async fn test_inspect_fills_statistics_and_date_intervals() {
    let conn = shop_schema()
        .on(
            "DATA_LENGTH",
            vec![row(&[
                ("table_name", Some("orders")),
                ("row_count", Some("3")),
                ("size_bytes", Some("16384")),
            ])],
        )
        .on(
            "MIN(`created_at`)",
            vec![row(&[
                ("start_date", Some("2023-01-05 10:00:00")),
                ("end_date", Some("2024-06-30 18:12:00")),
            ])],
        );
    let catalog = DialectCatalog::new(Arc::new(conn), mysql_source(), "shop-db");

    let tables = catalog.inspect(&["orders".into()]).await.unwrap();
    let orders = &tables[0];
    assert_eq!(orders.statistics.unwrap().row_count, 3);
    assert_eq!(orders.date_intervals.len(), 1);
    assert_eq!(orders.date_intervals[0].column, "created_at");
    assert_eq!(orders.date_intervals[0].start.as_deref(), Some("2023-01-05 10:00:00"));
}

#[tokio::test(start_paused = true)]
async fn test_metadata_query_retried_after_deadlock() {
    init_test_logging();
    let conn = Arc::new(
        shop_schema().fail_times("INFORMATION_SCHEMA.COLUMNS", vec![Error::database("1213", "Deadlock found")]),
    );
    let catalog = DialectCatalog::new(conn.clone(), mysql_source(), "shop-db")
        .with_retry_policy(RetryPolicy::for_dialect(&MySqlDialect).with_deadlock_wait(Duration::from_millis(5)));

    let tables = catalog.describe_columns(&["orders".into()]).await.unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(conn.executed().len(), 4);
}

#[tokio::test]
async fn test_connection_error_surfaces_without_retry() {
    let conn = Arc::new(
        ScriptedConnection::new().fail_times("BASE TABLE", vec![Error::connection("connection refused")]),
    );
    let catalog = DialectCatalog::new(conn.clone(), mysql_source(), "shop-db");

    let err = catalog.list_tables(&[]).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connection);
    assert_eq!(conn.executed().len(), 1);
}

#[tokio::test]
async fn test_preview_rows_paginates() {
    let conn = Arc::new(ScriptedConnection::new());
    let catalog = DialectCatalog::new(conn.clone(), mysql_source(), "shop-db");
    catalog.preview_rows("orders", 20).await.unwrap();
    let sql = &conn.executed()[0];
    assert!(sql.contains("`orders`"));
    assert!(sql.contains("LIMIT 20"));
}
