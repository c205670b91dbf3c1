// The daily statistics tables.  A day's rows are written as a whole: all rows for the date are
// deleted and the new ones inserted in one transaction, so re-running the collector for a day
// replaces that day and nothing else.  The tables are created and migrated elsewhere.
//
//   endpoint_stats(date, endpoint, success_count, error_count, avg_duration)
//   node_stats(date, node, success_count, error_count, avg_duration)
//   source_stats(date, source, total)

use crate::{ReportKind, Result, StatsError};

use chrono::NaiveDate;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

#[derive(Debug, Clone, PartialEq)]
pub struct DatedRow {
    pub date: NaiveDate,
    pub group_key: String,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_duration: f64,
}

/// Open a pool for `url`, which is any URL the sqlx Any driver understands (mysql://, sqlite:).
/// The URL can carry credentials so it is never logged.

pub async fn connect(url: &str) -> Result<AnyPool> {
    sqlx::any::install_default_drivers();
    AnyPoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await
        .map_err(|e| StatsError::SinkConnection {
            target: "database".to_string(),
            reason: e.to_string(),
        })
}

/// Replace the rows for `date` in the table for `kind` with `rows`, returning the number of rows
/// inserted.  Nothing is changed if any statement fails.  Rows whose date is not `date` are
/// written under `date`.

pub async fn replace_day(
    pool: &AnyPool,
    kind: ReportKind,
    date: NaiveDate,
    rows: &[DatedRow],
) -> Result<usize> {
    let table = kind.table();
    let day = date.format("%Y-%m-%d").to_string();
    let write_error = |e: sqlx::Error| StatsError::SinkWrite {
        target: table.to_string(),
        reason: e.to_string(),
    };

    let mut tx = pool.begin().await.map_err(|e| StatsError::SinkConnection {
        target: "database".to_string(),
        reason: e.to_string(),
    })?;

    let deleted = sqlx::query(&format!("DELETE FROM {table} WHERE date = ?"))
        .bind(day.clone())
        .execute(&mut *tx)
        .await
        .map_err(write_error)?
        .rows_affected();

    let insert = if kind.has_latency() {
        format!(
            "INSERT INTO {table} (date, {}, success_count, error_count, avg_duration) \
             VALUES (?, ?, ?, ?, ?)",
            kind.key_column()
        )
    } else {
        format!(
            "INSERT INTO {table} (date, {}, total) VALUES (?, ?, ?)",
            kind.key_column()
        )
    };
    for row in rows {
        let query = sqlx::query(&insert)
            .bind(day.clone())
            .bind(row.group_key.clone());
        let query = if kind.has_latency() {
            query
                .bind(row.success_count as i64)
                .bind(row.error_count as i64)
                .bind(row.avg_duration)
        } else {
            query.bind((row.success_count + row.error_count) as i64)
        };
        query.execute(&mut *tx).await.map_err(write_error)?;
    }

    tx.commit().await.map_err(write_error)?;
    tracing::info!(table, date = %day, deleted, inserted = rows.len(), "replaced day");
    Ok(rows.len())
}

#[cfg(test)]
async fn test_pool() -> AnyPool {
    let pool = connect("sqlite::memory:").await.unwrap();
    for ddl in [
        "CREATE TABLE node_stats (date TEXT NOT NULL, node TEXT NOT NULL, \
         success_count INTEGER, error_count INTEGER, avg_duration REAL)",
        "CREATE TABLE endpoint_stats (date TEXT NOT NULL, endpoint TEXT NOT NULL, \
         success_count INTEGER, error_count INTEGER, avg_duration REAL)",
        "CREATE TABLE source_stats (date TEXT NOT NULL, source TEXT NOT NULL, total INTEGER)",
    ] {
        sqlx::query(ddl).execute(&pool).await.unwrap();
    }
    pool
}

#[cfg(test)]
fn row(date: NaiveDate, key: &str, ok: u64, err: u64, avg: f64) -> DatedRow {
    DatedRow {
        date,
        group_key: key.to_string(),
        success_count: ok,
        error_count: err,
        avg_duration: avg,
    }
}

#[cfg(test)]
#[tokio::test]
async fn test_replace_day_twice() {
    let pool = test_pool().await;
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let other = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();

    replace_day(&pool, ReportKind::Nodes, other, &[row(other, "selma", 1, 0, 1.0)])
        .await
        .unwrap();
    let first = [row(day, "selma", 10, 1, 2.0), row(day, "patty", 5, 0, 3.0)];
    assert!(replace_day(&pool, ReportKind::Nodes, day, &first).await.unwrap() == 2);
    let second = [row(day, "selma", 184, 16, 61.0), row(day, "patty", 52, 0, 15.0)];
    assert!(replace_day(&pool, ReportKind::Nodes, day, &second).await.unwrap() == 2);

    let rows = sqlx::query_as::<_, (String, i64, i64, f64)>(
        "SELECT node, success_count, error_count, avg_duration FROM node_stats \
         WHERE date = ? ORDER BY node",
    )
    .bind("2024-03-01".to_string())
    .fetch_all(&pool)
    .await
    .unwrap();
    assert!(
        rows == vec![
            ("patty".to_string(), 52, 0, 15.0),
            ("selma".to_string(), 184, 16, 61.0)
        ]
    );

    // The other day is untouched.
    let (n,) =
        sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM node_stats WHERE date = '2024-02-29'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(n == 1);
}

#[cfg(test)]
#[tokio::test]
async fn test_replace_day_sources_and_empty() {
    let pool = test_pool().await;
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let rows = [row(day, "cli", 7, 0, 0.0), row(day, "web", 3, 0, 0.0)];
    assert!(replace_day(&pool, ReportKind::Sources, day, &rows).await.unwrap() == 2);
    let totals =
        sqlx::query_as::<_, (String, i64)>("SELECT source, total FROM source_stats ORDER BY source")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert!(totals == vec![("cli".to_string(), 7), ("web".to_string(), 3)]);

    // An empty day clears the date.
    assert!(replace_day(&pool, ReportKind::Sources, day, &[]).await.unwrap() == 0);
    let (n,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM source_stats")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(n == 0);
}

#[cfg(test)]
#[tokio::test]
async fn test_replace_day_rolls_back() {
    let pool = test_pool().await;
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    replace_day(&pool, ReportKind::Endpoints, day, &[row(day, "/api/v2/a", 1, 0, 1.0)])
        .await
        .unwrap();
    sqlx::query("CREATE UNIQUE INDEX endpoint_day ON endpoint_stats (date, endpoint)")
        .execute(&pool)
        .await
        .unwrap();

    // The duplicate key fails the second insert, and the delete of the first row is undone.
    let dup = [row(day, "/api/v2/b", 1, 0, 1.0), row(day, "/api/v2/b", 2, 0, 1.0)];
    assert!(matches!(
        replace_day(&pool, ReportKind::Endpoints, day, &dup).await,
        Err(StatsError::SinkWrite { .. })
    ));
    let keys = sqlx::query_as::<_, (String,)>("SELECT endpoint FROM endpoint_stats")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert!(keys == vec![("/api/v2/a".to_string(),)]);
}

#[cfg(test)]
#[tokio::test]
async fn test_connect_failure() {
    assert!(matches!(
        connect("nosuchscheme://nowhere").await,
        Err(StatsError::SinkConnection { .. })
    ));
}
