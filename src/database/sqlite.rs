//! Read-only SQLite target database

use super::{ColumnDescription, ExecutionError, QueryRows, SqlExecutor, TableDescription};
use crate::config::DatabaseConfig;
use crate::validation::{CatalogError, CatalogSource, SchemaCatalog};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use std::time::Duration;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Declared types whose columns get sample values collected
const TEXT_AFFINITY: [&str; 3] = ["CHAR", "TEXT", "CLOB"];

/// Pool of read-only connections to the target database
pub struct SqliteDatabase {
    pool: DbPool,
    max_rows: usize,
    timeout: Duration,
}

impl SqliteDatabase {
    pub fn open(config: &DatabaseConfig) -> Result<Self, ExecutionError> {
        if !config.path.exists() {
            return Err(ExecutionError::Unavailable(format!(
                "database file not found: {:?}",
                config.path
            )));
        }

        let manager = SqliteConnectionManager::file(&config.path)
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA query_only = ON;
                    PRAGMA busy_timeout = 5000;
                    ",
                )
            });

        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .build(manager)?;

        tracing::info!(
            "Opened target database {:?} (read-only, pool size {})",
            config.path,
            config.pool_size
        );

        Ok(Self {
            pool,
            max_rows: config.max_rows,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, ExecutionError> {
        Ok(self.pool.get()?)
    }

    /// User tables and views, sorted by name
    pub fn table_names(&self) -> Result<Vec<String>, ExecutionError> {
        let conn = self.get_conn()?;
        list_tables(&conn)
    }

    /// Columns, declared types, nullability, primary keys and up to
    /// `sample_values` most frequent values of each text column
    pub fn describe_table(
        &self,
        table: &str,
        sample_values: usize,
    ) -> Result<TableDescription, ExecutionError> {
        let conn = self.get_conn()?;
        describe(&conn, table, sample_values)
    }

    pub fn describe_all(
        &self,
        sample_values: usize,
    ) -> Result<Vec<TableDescription>, ExecutionError> {
        let conn = self.get_conn()?;
        list_tables(&conn)?
            .iter()
            .map(|table| describe(&conn, table, sample_values))
            .collect()
    }
}

#[async_trait]
impl SqlExecutor for SqliteDatabase {
    async fn execute(&self, sql: &str) -> Result<QueryRows, ExecutionError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();
        let max_rows = self.max_rows;
        let limit = self.timeout.as_secs();
        let (interrupt_tx, mut interrupt_rx) = tokio::sync::oneshot::channel();

        // Checkout may wait on an exhausted pool, so it stays off the async worker
        let task = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            if interrupt_tx.send(conn.get_interrupt_handle()).is_err() {
                // The caller already gave up
                return Err(ExecutionError::Timeout(limit));
            }
            run_query(&conn, &sql, max_rows)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => {
                if let Ok(rows) = &result {
                    tracing::info!(
                        "Query returned {} rows{}",
                        rows.row_count(),
                        if rows.truncated { " (truncated)" } else { "" }
                    );
                }
                result
            }
            Ok(Err(join_err)) => Err(ExecutionError::TaskFailed(join_err.to_string())),
            Err(_) => {
                interrupt_rx.close();
                if let Ok(interrupt) = interrupt_rx.try_recv() {
                    interrupt.interrupt();
                }
                tracing::warn!("Query interrupted after {:?}", self.timeout);
                Err(ExecutionError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

impl CatalogSource for SqliteDatabase {
    fn load_catalog(&self) -> Result<SchemaCatalog, CatalogError> {
        let load = || -> Result<SchemaCatalog, ExecutionError> {
            let conn = self.get_conn()?;
            let mut catalog = SchemaCatalog::new();
            for table in list_tables(&conn)? {
                let columns = column_names(&conn, &table)?;
                catalog.insert_table(&table, columns);
            }
            Ok(catalog)
        };

        load().map_err(|e| CatalogError::LoadError(e.to_string()))
    }
}

fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> Result<QueryRows, ExecutionError> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(ExecutionError::NotReadOnly);
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut result = QueryRows {
        columns,
        ..Default::default()
    };

    while let Some(row) = rows.next()? {
        if result.rows.len() >= max_rows {
            result.truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(result.columns.len());
        for i in 0..result.columns.len() {
            values.push(to_json(row.get_ref(i)?));
        }
        result.rows.push(values);
    }

    Ok(result)
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<{} bytes>", bytes.len())),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn list_tables(conn: &Connection) -> Result<Vec<String>, ExecutionError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>, ExecutionError> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let names = stmt
        .query_map(params![table], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

fn describe(
    conn: &Connection,
    table: &str,
    sample_values: usize,
) -> Result<TableDescription, ExecutionError> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let raw = stmt
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, i64>(3)? > 0,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if raw.is_empty() {
        return Err(ExecutionError::Query(format!("no such table: {}", table)));
    }

    let mut columns = Vec::with_capacity(raw.len());
    for (name, data_type, not_null, primary_key) in raw {
        let upper = data_type.to_uppercase();
        let is_text = upper.is_empty() || TEXT_AFFINITY.iter().any(|t| upper.contains(t));
        let samples = if is_text && sample_values > 0 {
            top_values(conn, table, &name, sample_values)?
        } else {
            Vec::new()
        };

        columns.push(ColumnDescription {
            name,
            data_type: if data_type.is_empty() {
                "TEXT".to_string()
            } else {
                data_type
            },
            nullable: !not_null && !primary_key,
            primary_key,
            sample_values: samples,
        });
    }

    Ok(TableDescription {
        name: table.to_string(),
        columns,
    })
}

fn top_values(
    conn: &Connection,
    table: &str,
    column: &str,
    limit: usize,
) -> Result<Vec<String>, ExecutionError> {
    let column = quote_identifier(column);
    let sql = format!(
        "SELECT CAST({col} AS TEXT) FROM {table}
         WHERE {col} IS NOT NULL AND TRIM(CAST({col} AS TEXT)) <> ''
         GROUP BY {col} ORDER BY COUNT(*) DESC, {col} LIMIT ?1",
        col = column,
        table = quote_identifier(table)
    );
    let mut stmt = conn.prepare(&sql)?;
    let values = stmt
        .query_map(params![limit as i64], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn fixture(dir: &Path) -> DatabaseConfig {
        let path = dir.join("target.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "
            CREATE TABLE tenants (id INTEGER PRIMARY KEY, name TEXT NOT NULL, status VARCHAR(10));
            INSERT INTO tenants (name, status) VALUES
                ('Kim', 'ACTIVE'), ('Lee', 'ACTIVE'), ('Park', 'MOVED_OUT');
            CREATE TABLE units (unit_id INTEGER PRIMARY KEY, area REAL, note BLOB);
            INSERT INTO units (area, note) VALUES (33.5, x'0102');
            ",
        )
        .unwrap();

        DatabaseConfig {
            path,
            max_rows: 2,
            timeout_secs: 5,
            pool_size: 2,
        }
    }

    #[tokio::test]
    async fn test_execute_caps_rows() {
        let temp = TempDir::new().unwrap();
        let db = SqliteDatabase::open(&fixture(temp.path())).unwrap();

        let rows = db.execute("SELECT id, name FROM tenants ORDER BY id").await.unwrap();
        assert_eq!(rows.columns, vec!["id", "name"]);
        assert_eq!(rows.row_count(), 2);
        assert!(rows.truncated);
        assert_eq!(rows.rows[0][1], serde_json::json!("Kim"));
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out_without_blocking() {
        let temp = TempDir::new().unwrap();
        let mut config = fixture(temp.path());
        config.pool_size = 1;
        config.timeout_secs = 1;
        let db = SqliteDatabase::open(&config).unwrap();

        let held = db.get_conn().unwrap();
        let started = std::time::Instant::now();
        let err = db.execute("SELECT 1").await.unwrap_err();

        assert!(matches!(err, ExecutionError::Timeout(1)), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(5));

        drop(held);
        let rows = db.execute("SELECT COUNT(*) FROM tenants").await.unwrap();
        assert_eq!(rows.rows[0][0], serde_json::json!(3));
    }

    #[tokio::test]
    async fn test_value_conversion() {
        let temp = TempDir::new().unwrap();
        let db = SqliteDatabase::open(&fixture(temp.path())).unwrap();

        let rows = db.execute("SELECT unit_id, area, note, NULL FROM units").await.unwrap();
        assert_eq!(rows.rows[0][0], serde_json::json!(1));
        assert_eq!(rows.rows[0][1], serde_json::json!(33.5));
        assert_eq!(rows.rows[0][2], serde_json::json!("<2 bytes>"));
        assert!(rows.rows[0][3].is_null());
        assert!(!rows.truncated);
    }

    #[tokio::test]
    async fn test_raw_error_message() {
        let temp = TempDir::new().unwrap();
        let db = SqliteDatabase::open(&fixture(temp.path())).unwrap();

        let err = db.execute("SELECT missing_col FROM tenants").await.unwrap_err();
        assert!(matches!(err, ExecutionError::Query(_)));
        assert!(err.to_string().contains("missing_col"));
    }

    #[tokio::test]
    async fn test_writes_rejected() {
        let temp = TempDir::new().unwrap();
        let db = SqliteDatabase::open(&fixture(temp.path())).unwrap();

        let err = db.execute("DELETE FROM tenants").await.unwrap_err();
        assert!(matches!(err, ExecutionError::NotReadOnly));
    }

    #[test]
    fn test_missing_file() {
        let config = DatabaseConfig {
            path: "/nonexistent/target.db".into(),
            max_rows: 10,
            timeout_secs: 5,
            pool_size: 1,
        };
        assert!(matches!(
            SqliteDatabase::open(&config),
            Err(ExecutionError::Unavailable(_))
        ));
    }

    #[test]
    fn test_load_catalog() {
        let temp = TempDir::new().unwrap();
        let db = SqliteDatabase::open(&fixture(temp.path())).unwrap();

        let catalog = db.load_catalog().unwrap();
        assert_eq!(catalog.table_names(), vec!["TENANTS", "UNITS"]);
        assert!(catalog.columns("tenants").unwrap().contains("STATUS"));
    }

    #[test]
    fn test_describe_table() {
        let temp = TempDir::new().unwrap();
        let db = SqliteDatabase::open(&fixture(temp.path())).unwrap();

        let table = db.describe_table("tenants", 5).unwrap();
        assert_eq!(table.columns.len(), 3);

        let id = &table.columns[0];
        assert!(id.primary_key);
        assert!(!id.nullable);
        assert!(id.sample_values.is_empty());

        let status = &table.columns[2];
        assert_eq!(status.data_type, "VARCHAR(10)");
        assert!(status.nullable);
        assert_eq!(status.sample_values, vec!["ACTIVE", "MOVED_OUT"]);

        assert!(db.describe_table("nope", 5).is_err());
        assert_eq!(db.describe_all(0).unwrap().len(), 2);
    }
}
