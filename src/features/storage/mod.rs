//! 文档存储契约
//!
//! 流水线只依赖按集合划分的键-文档存储：按 id 查找、按等值过滤查询/计数、整文档保存，
//! 以及同一事务内保存两份文档。

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::PipelineError;

/// SQLite 文档存储实现
pub mod sqlite;
/// 快照追加与读取
pub mod snapshots;

pub use snapshots::{Snapshot, SnapshotStore};
pub use sqlite::SqliteDocumentStore;

/// 文档 id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// 生成新的 UUID v4 id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for DocId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 可存入文档存储的类型
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// 所属集合名
    const COLLECTION: &'static str;

    fn id(&self) -> &DocId;
}

/// 字段路径等值过滤条件（多个条件取交集）
///
/// 路径使用点号分隔的序列化字段名，例如 `osuSettings.hourToPost`。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((path.into(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// 对已序列化的文档求值
    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|(path, expected)| {
            let pointer = format!("/{}", path.replace('.', "/"));
            match doc.pointer(&pointer) {
                Some(actual) => json_eq(actual, expected),
                None => expected.is_null(),
            }
        })
    }
}

/// 数值比较忽略整数/浮点表示差异
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// 异步键-文档存储
pub trait DocumentStore: Send + Sync {
    /// 按 id 查找，不存在返回 `NotFound`
    fn find_by_id<T: Document>(
        &self,
        id: &DocId,
    ) -> impl Future<Output = Result<T, PipelineError>> + Send;

    /// 返回第一个匹配的文档，不存在返回 `NotFound`
    fn find_one<T: Document>(
        &self,
        filter: &Filter,
    ) -> impl Future<Output = Result<T, PipelineError>> + Send;

    /// 返回所有匹配的文档（按写入顺序）
    fn find<T: Document>(
        &self,
        filter: &Filter,
    ) -> impl Future<Output = Result<Vec<T>, PipelineError>> + Send;

    fn count<T: Document>(
        &self,
        filter: &Filter,
    ) -> impl Future<Output = Result<u64, PipelineError>> + Send;

    /// 新增或整体覆盖
    fn save<T: Document>(&self, doc: &T) -> impl Future<Output = Result<(), PipelineError>> + Send;

    /// 原子地保存两份文档：要么都成功，要么都不生效
    fn save_pair<A: Document, B: Document>(
        &self,
        first: &A,
        second: &B,
    ) -> impl Future<Output = Result<(), PipelineError>> + Send;
}
