//! Dialect SQL generation across products

use tributary_rdbc::dialect::{CDC_ID, CDC_SYNCED};
use tributary_rdbc::prelude::*;

fn tracked_table() -> TableDescriptor {
    let mut name = ColumnDescriptor::new("name", CanonicalType::Text).with_native_type("varchar");
    name.max_length = Some(120);
    TableDescriptor::new("customers", "src")
        .with_column(
            ColumnDescriptor::new("id", CanonicalType::Integer)
                .with_native_type("int")
                .primary(),
        )
        .with_column(name)
}

fn all_dialects() -> Vec<Box<dyn SqlDialect>> {
    vec![
        dialect_for(DatabaseType::Postgres),
        dialect_for(DatabaseType::MySql),
        dialect_for(DatabaseType::SqlServer),
        dialect_for(DatabaseType::Oracle),
    ]
}

#[test]
fn test_canonical_type_tables() {
    let cases: &[(DatabaseType, &str, CanonicalType)] = &[
        (DatabaseType::Postgres, "bigserial", CanonicalType::Integer),
        (DatabaseType::Postgres, "numeric(12,2)", CanonicalType::DoublePrecision),
        (DatabaseType::Postgres, "character varying(255)", CanonicalType::Text),
        (DatabaseType::Postgres, "interval", CanonicalType::Timestamp),
        (DatabaseType::Postgres, "bytea", CanonicalType::Binary),
        (DatabaseType::MySql, "mediumint", CanonicalType::Integer),
        (DatabaseType::MySql, "enum('a','b')", CanonicalType::Text),
        (DatabaseType::MySql, "year", CanonicalType::Timestamp),
        (DatabaseType::MySql, "longblob", CanonicalType::Binary),
        (DatabaseType::MySql, "boolean", CanonicalType::Boolean),
        (DatabaseType::SqlServer, "nvarchar", CanonicalType::Text),
        (DatabaseType::SqlServer, "datetimeoffset", CanonicalType::Timestamp),
        (DatabaseType::SqlServer, "bit", CanonicalType::Boolean),
        (DatabaseType::SqlServer, "image", CanonicalType::Binary),
        (DatabaseType::Oracle, "varchar2(40)", CanonicalType::Text),
        (DatabaseType::Oracle, "number(10,2)", CanonicalType::DoublePrecision),
        (DatabaseType::Oracle, "timestamp(6) with time zone", CanonicalType::Timestamp),
        (DatabaseType::Oracle, "blob", CanonicalType::Binary),
    ];
    for (product, native, expected) in cases {
        assert_eq!(
            dialect_for(*product).canonical_type(native),
            ColumnType::Canonical(*expected),
            "{} {}",
            product,
            native
        );
    }
}

#[test]
fn test_unmapped_types_pass_through() {
    for dialect in all_dialects() {
        assert_eq!(
            dialect.canonical_type("hierarchyid"),
            ColumnType::Native("hierarchyid".into())
        );
    }
}

#[test]
fn test_metadata_queries_filter_requested_tables() {
    let tables = vec!["orders".to_string(), "o'brien".to_string()];
    for dialect in all_dialects() {
        for sql in [
            dialect.columns_sql("shop", &tables),
            dialect.indexes_sql("shop", &tables),
            dialect.constraints_sql("shop", &tables),
            dialect.statistics_sql("shop", &tables),
        ] {
            assert!(sql.contains("'orders', 'o''brien'"), "{}: {}", dialect.name(), sql);
        }
    }
}

#[test]
fn test_shadow_ddl_has_capture_columns_and_indexes() {
    for dialect in all_dialects() {
        let ddl = dialect.shadow_table_ddl(&tracked_table()).unwrap().join("\n");
        assert!(ddl.contains(&dialect.quote_identifier("_etl_customers")));
        for col in ["cdc_id", "cdc_created_at", "cdc_updated_at", "cdc_delta_flag", "cdc_synced"] {
            assert!(ddl.contains(&dialect.quote_identifier(col)), "{} missing {}", dialect.name(), col);
        }
        for suffix in ["_created", "_synced", "_syn_upd"] {
            let index = format!("_etl_customers{}", suffix);
            assert!(ddl.contains(&dialect.quote_identifier(&index)));
        }
    }
}

#[test]
fn test_shadow_column_types_keep_lengths() {
    let mysql = MySqlDialect.shadow_table_ddl(&tracked_table()).unwrap();
    assert!(mysql[0].contains("`name` varchar(120)"));

    let mssql = SqlServerDialect.shadow_table_ddl(&tracked_table()).unwrap();
    assert!(mssql[0].contains("[name] varchar(120)"));
}

#[test]
fn test_sqlserver_trigger_uses_pseudo_tables() {
    let ddl = SqlServerDialect.trigger_ddl(&tracked_table()).unwrap();
    assert_eq!(ddl.len(), 1);
    assert!(ddl[0].contains("FROM inserted i"));
    assert!(ddl[0].contains("FROM deleted d"));
    assert!(ddl[0].contains("AFTER INSERT, UPDATE, DELETE"));
}

#[test]
fn test_drop_capture_removes_shadow() {
    for dialect in all_dialects() {
        let ddl = dialect.drop_capture_ddl("customers").unwrap();
        let last = ddl.last().unwrap();
        assert!(last.contains("DROP TABLE "), "{}: {}", dialect.name(), last);
        assert!(last.contains(&dialect.quote_identifier("_etl_customers")));
    }
}

#[test]
fn test_shadow_drain_sql() {
    let page = PostgresDialect.shadow_page_sql("_etl_customers", &["id", "name"], 1000);
    assert!(page.contains("\"cdc_id\", \"cdc_created_at\", \"cdc_delta_flag\" FROM"));
    assert!(page.contains("WHERE \"cdc_synced\" = 0 AND \"cdc_id\" > $1 AND \"cdc_id\" <= $2"));
    assert!(page.ends_with("ORDER BY \"cdc_id\" LIMIT 1000 OFFSET 0"));

    let page = SqlServerDialect.shadow_page_sql("_etl_customers", &["id"], 10);
    assert!(page.contains(&format!("ORDER BY [{}] OFFSET 0 ROWS", CDC_ID)));
    assert!(page.contains("@P1 AND [cdc_id] <= @P2"));

    let mark = MySqlDialect.shadow_mark_synced_sql("_etl_customers", &[4, 7, 9]);
    assert_eq!(
        mark,
        format!("UPDATE `_etl_customers` SET `{}` = 1 WHERE `cdc_id` IN (4, 7, 9)", CDC_SYNCED)
    );

    let watermark = OracleDialect.shadow_watermark_sql("_etl_customers");
    assert_eq!(
        watermark,
        "SELECT MAX(\"cdc_id\") AS \"watermark\" FROM \"_etl_customers\" WHERE \"cdc_synced\" = 0"
    );
}

#[test]
fn test_shadow_identity_per_product() {
    let expected = [
        (DatabaseType::Postgres, "\"cdc_id\" bigserial PRIMARY KEY"),
        (DatabaseType::MySql, "`cdc_id` bigint NOT NULL AUTO_INCREMENT PRIMARY KEY"),
        (DatabaseType::SqlServer, "[cdc_id] bigint IDENTITY(1,1) NOT NULL PRIMARY KEY"),
        (DatabaseType::Oracle, "\"cdc_id\" NUMBER GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"),
    ];
    for (product, column) in expected {
        let ddl = dialect_for(product).shadow_table_ddl(&tracked_table()).unwrap();
        assert!(ddl[0].contains(column), "{}: {}", product, ddl[0]);
        // triggers fill every column but the identity
        let triggers = dialect_for(product).trigger_ddl(&tracked_table()).unwrap().join("\n");
        assert!(!triggers.contains(&dialect_for(product).quote_identifier(CDC_ID)));
    }
}

#[test]
fn test_select_page_per_product() {
    let pg = PostgresDialect.select_page("orders", &["id", "total"], 100, 200);
    assert!(pg.contains("\"id\", \"total\""));
    assert!(pg.contains("LIMIT 100"));
    assert!(pg.contains("OFFSET 200"));

    let my = MySqlDialect.select_page("orders", &[], 50, 0);
    assert!(my.contains("SELECT *"));
    assert!(my.contains("`orders`"));

    let ms = SqlServerDialect.select_page("orders", &["id"], 100, 200);
    assert_eq!(
        ms,
        "SELECT [id] FROM [orders] ORDER BY (SELECT NULL) OFFSET 200 ROWS FETCH NEXT 100 ROWS ONLY"
    );
}
