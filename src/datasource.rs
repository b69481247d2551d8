//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 数据源抽象与注册表
//!
//! 数据源由调用方实现，名字即缓存命名空间。注册表按名字解析数据源，
//! 既提供带类型的视图（读路径），也提供类型无关的视图（主动刷新器）。

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::entity::{Object, RelatedEntity};
use crate::error::{CacheError, Result};

/// 数据源接口
#[async_trait]
pub trait DataSource: Send + Sync {
    /// 数据源产出的对象类型
    type Item: Object;

    /// 数据源名称，同时作为缓存命名空间
    fn name(&self) -> &str;

    /// 按ID批量查询，不存在的ID直接缺席
    async fn query_by_ids(&self, ids: &[String]) -> Result<Vec<Self::Item>>;

    /// 从缓存字节解码对象
    fn unmarshal(&self, bytes: &[u8]) -> std::result::Result<Self::Item, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// 条件查询能力
    fn as_conditional(&self) -> Option<&dyn ConditionalDataSource> {
        None
    }
}

/// 支持按条件查询ID的数据源
#[async_trait]
pub trait ConditionalDataSource: Send + Sync {
    async fn query_ids_by_condition(&self, condition: &Condition) -> Result<Vec<String>>;
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// 查询条件
///
/// 只描述调用方意图，如何落到具体查询由数据源决定。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub filters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub order_by: Option<(String, SortOrder)>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加等值过滤
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// 共享的带类型数据源
pub type SharedDataSource<T> = Arc<dyn DataSource<Item = T>>;

/// 编码后的对象，供类型无关的写回路径使用
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedObject {
    pub id: String,
    pub bytes: Vec<u8>,
    pub related: Vec<RelatedEntity>,
}

impl EncodedObject {
    /// 序列化对象
    pub fn encode<T: Object>(object: &T) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self {
            id: object.string_id(),
            bytes: serde_json::to_vec(object)?,
            related: object.related_ids(),
        })
    }
}

/// 类型无关的数据源视图
#[async_trait]
pub trait ErasedDataSource: Send + Sync {
    fn name(&self) -> &str;

    /// 查询并编码
    async fn fetch_encoded(&self, ids: &[String]) -> Result<Vec<EncodedObject>>;
}

struct Erased<T: Object> {
    source: SharedDataSource<T>,
}

#[async_trait]
impl<T: Object> ErasedDataSource for Erased<T> {
    fn name(&self) -> &str {
        self.source.name()
    }

    async fn fetch_encoded(&self, ids: &[String]) -> Result<Vec<EncodedObject>> {
        let objects = self.source.query_by_ids(ids).await?;
        objects
            .iter()
            .map(|object| EncodedObject::encode(object).map_err(CacheError::from))
            .collect()
    }
}

struct RegisteredSource {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedDataSource>,
}

/// 数据源注册表
#[derive(Default)]
pub struct DataSourceRegistry {
    sources: DashMap<String, RegisteredSource>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
        }
    }

    /// 注册数据源，同名数据源会被替换
    ///
    /// 返回的句柄可以直接交给 `CacheEngine::batch_get_from` 等方法，
    /// 对象类型在编译期确定，不再按名字查找。
    pub fn register<D>(&self, source: D) -> SharedDataSource<D::Item>
    where
        D: DataSource + 'static,
    {
        let shared: SharedDataSource<D::Item> = Arc::new(source);
        self.register_shared(shared)
    }

    /// 注册已共享的数据源
    pub fn register_shared<T: Object>(&self, source: SharedDataSource<T>) -> SharedDataSource<T> {
        let name = source.name().to_string();
        let erased: Arc<dyn ErasedDataSource> = Arc::new(Erased {
            source: Arc::clone(&source),
        });
        self.sources.insert(
            name.clone(),
            RegisteredSource {
                typed: Arc::new(Arc::clone(&source)),
                erased,
            },
        );
        info!("注册数据源: {}", name);
        source
    }

    /// 按名字获取带类型的数据源
    ///
    /// 名字只在运行期确定，类型由注册时保存的句柄向下转换得到，
    /// 类型不符时返回 `DataSourceTypeMismatch`。持有注册句柄的调用方不需要经过这里。
    pub fn get<T: Object>(&self, name: &str) -> Result<SharedDataSource<T>> {
        let entry = self
            .sources
            .get(name)
            .ok_or_else(|| CacheError::UnknownDataSource(name.to_string()))?;
        entry
            .typed
            .downcast_ref::<SharedDataSource<T>>()
            .cloned()
            .ok_or_else(|| {
                CacheError::DataSourceTypeMismatch(format!(
                    "{} 注册的对象类型不是 {}",
                    name,
                    std::any::type_name::<T>()
                ))
            })
    }

    /// 按名字获取类型无关的数据源
    pub fn get_erased(&self, name: &str) -> Result<Arc<dyn ErasedDataSource>> {
        self.sources
            .get(name)
            .map(|entry| Arc::clone(&entry.erased))
            .ok_or_else(|| CacheError::UnknownDataSource(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// 已注册的数据源名称
    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}
