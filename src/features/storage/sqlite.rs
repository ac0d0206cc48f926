use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::error::PipelineError;

use super::{DocId, Document, DocumentStore, Filter};

/// 以 JSON 文本保存文档的 SQLite 存储
///
/// 所有集合共用一张 `documents` 表，过滤条件通过 `json_extract` 下推到 SQL。
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pub pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub async fn connect_sqlite(path: &str, wal: bool) -> Result<Self, PipelineError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::PersistenceFailed(format!("创建数据库目录失败: {e}")))?;
        }

        let journal = if wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };
        let opt = SqliteConnectOptions::new()
            .filename(Path::new(path))
            .create_if_missing(true)
            .journal_mode(journal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .log_statements(tracing::log::LevelFilter::Off);
        let pool = SqlitePool::connect_with(opt)
            .await
            .map_err(|e| PipelineError::PersistenceFailed(format!("sqlite connect: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<(), PipelineError> {
        let ddl = r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(collection, id)
        );
        CREATE INDEX IF NOT EXISTS idx_documents_user_schedule ON documents(
            collection,
            json_extract(body, '$.osuSettings.hourToPost'),
            json_extract(body, '$.osuSettings.enabled')
        );
        "#;
        sqlx::query(ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::PersistenceFailed(format!("init schema: {e}")))?;
        Ok(())
    }

    /// 连接并初始化表结构
    pub async fn open(path: &str, wal: bool) -> Result<Self, PipelineError> {
        let store = Self::connect_sqlite(path, wal).await?;
        store.init_schema().await?;
        Ok(store)
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, collection: &'static str, filter: &Filter) {
    qb.push(" WHERE collection = ").push_bind(collection);
    for (path, value) in filter.clauses() {
        qb.push(" AND json_extract(body, ")
            .push_bind(format!("$.{path}"))
            .push(")");
        match value {
            Value::Null => {
                qb.push(" IS NULL");
            }
            // json_extract 将 true/false 读作 1/0
            Value::Bool(b) => {
                qb.push(" = ").push_bind(i64::from(*b));
            }
            Value::Number(n) => match n.as_i64() {
                Some(i) => {
                    qb.push(" = ").push_bind(i);
                }
                None => {
                    qb.push(" = ").push_bind(n.as_f64().unwrap_or_default());
                }
            },
            Value::String(s) => {
                qb.push(" = ").push_bind(s.clone());
            }
            other => {
                qb.push(" = json(").push_bind(other.to_string()).push(")");
            }
        }
    }
}

fn decode<T: Document>(body: &str) -> Result<T, PipelineError> {
    serde_json::from_str(body).map_err(|e| {
        PipelineError::Malformed(format!("{} 文档解析失败: {e}", T::COLLECTION))
    })
}

async fn upsert<T: Document>(conn: &mut SqliteConnection, doc: &T) -> Result<(), PipelineError> {
    let body = serde_json::to_string(doc)
        .map_err(|e| PipelineError::Internal(format!("{} 文档序列化失败: {e}", T::COLLECTION)))?;
    sqlx::query(
        "INSERT INTO documents(collection, id, body, updated_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
    )
    .bind(T::COLLECTION)
    .bind(doc.id().as_str())
    .bind(body)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

impl DocumentStore for SqliteDocumentStore {
    async fn find_by_id<T: Document>(&self, id: &DocId) -> Result<T, PipelineError> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? AND id = ?")
                .bind(T::COLLECTION)
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        match body {
            Some(b) => decode(&b),
            None => Err(PipelineError::NotFound(format!("{}/{id}", T::COLLECTION))),
        }
    }

    async fn find_one<T: Document>(&self, filter: &Filter) -> Result<T, PipelineError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT body FROM documents");
        push_filter(&mut qb, T::COLLECTION, filter);
        qb.push(" ORDER BY rowid LIMIT 1");
        let body: Option<String> = qb
            .build_query_scalar()
            .fetch_optional(&self.pool)
            .await?;
        match body {
            Some(b) => decode(&b),
            None => Err(PipelineError::NotFound(format!(
                "{} 中没有匹配 {:?} 的文档",
                T::COLLECTION,
                filter.clauses()
            ))),
        }
    }

    async fn find<T: Document>(&self, filter: &Filter) -> Result<Vec<T>, PipelineError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT body FROM documents");
        push_filter(&mut qb, T::COLLECTION, filter);
        qb.push(" ORDER BY rowid");
        let bodies: Vec<String> = qb.build_query_scalar().fetch_all(&self.pool).await?;
        bodies.iter().map(|b| decode(b)).collect()
    }

    async fn count<T: Document>(&self, filter: &Filter) -> Result<u64, PipelineError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM documents");
        push_filter(&mut qb, T::COLLECTION, filter);
        let n: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn save<T: Document>(&self, doc: &T) -> Result<(), PipelineError> {
        let mut conn = self.pool.acquire().await?;
        upsert(&mut conn, doc).await
    }

    async fn save_pair<A: Document, B: Document>(
        &self,
        first: &A,
        second: &B,
    ) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await?;
        upsert(&mut tx, first).await?;
        upsert(&mut tx, second).await?;
        tx.commit().await?;
        Ok(())
    }
}
