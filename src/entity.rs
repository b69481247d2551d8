//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 缓存实体定义
//!
//! 缓存对象能力、关联声明、软过期元数据以及反馈记录。
//! 关联声明与软过期元数据的JSON字段名与已部署进程共享，不能修改。

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 可缓存对象
///
/// 对象由数据源创建，序列化后的形式归缓存条目所有。
/// `PartialEq` 用于判断刷新后的记录是否真的发生了变化。
pub trait Object: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static {
    /// 稳定的字符串标识
    fn string_id(&self) -> String;

    /// 关联声明：任一关联ID失效时，本对象的缓存条目也随之失效
    fn related_ids(&self) -> Vec<RelatedEntity> {
        Vec::new()
    }
}

/// 关联声明
///
/// `data_source_name` 中的任一 `related_ids` 被清理时，声明方的缓存条目也要被清理。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelatedEntity {
    #[serde(rename = "QuerierName")]
    pub data_source_name: String,
    #[serde(rename = "RelatedIDs")]
    pub related_ids: Vec<String>,
}

impl RelatedEntity {
    pub fn new<I, S>(data_source_name: impl Into<String>, related_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            data_source_name: data_source_name.into(),
            related_ids: related_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// 软过期元数据
///
/// 与存储自身的TTL无关：条目本身可以永不过期，由它决定被动刷新器何时把条目视为陈旧。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheExpire {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ExpireAt")]
    pub expire_at: DateTime<Utc>,
    #[serde(rename = "ExpireDuration", with = "duration_nanos")]
    pub expire_duration: Duration,
}

impl CacheExpire {
    /// 以当前时间为起点创建元数据
    pub fn starting_now(id: impl Into<String>, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            expire_at: now + to_chrono(duration),
            expire_duration: duration,
        }
    }

    /// 是否已经过期
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expire_at
    }
}

/// 反馈位：刷新得到的值与之前缓存的值是否不同
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feedback {
    Unchanged,
    Changed,
}

impl Feedback {
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            Feedback::Changed
        } else {
            Feedback::Unchanged
        }
    }

    /// 存储中的数值表示
    pub fn as_bit(self) -> u8 {
        match self {
            Feedback::Unchanged => 0,
            Feedback::Changed => 1,
        }
    }

    /// 解析存储中的列表元素，非0即视为变化
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim()
            .parse::<i64>()
            .ok()
            .map(|bit| Feedback::from_changed(bit != 0))
    }
}

/// 反馈条目：提供给过期计算器的只读视图
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEntry {
    pub id: String,
    pub data_source_name: String,
    pub current_feedback: Feedback,
    /// 该ID最近的反馈，最新的在前
    pub recent_feedback: Vec<Feedback>,
    pub global_feedback: Vec<Feedback>,
    pub group_feedback: Vec<Feedback>,
    /// 上一次的过期时长
    pub expire_time: Duration,
}

impl FeedbackEntry {
    /// 是否没有任何历史
    pub fn is_empty(&self) -> bool {
        self.recent_feedback.is_empty()
    }

    /// 最近窗口内 (未变化次数, 变化次数)
    pub fn counts(&self) -> (usize, usize) {
        self.recent_feedback
            .iter()
            .fold((0, 0), |(unchanged, changed), fb| match fb {
                Feedback::Unchanged => (unchanged + 1, changed),
                Feedback::Changed => (unchanged, changed + 1),
            })
    }

    /// 导数信号 Dn
    ///
    /// 历史中与当前反馈相同的连续前缀长度；"未变化"取负。
    /// 历史少于两条时为0。
    pub fn dn(&self) -> i32 {
        if self.recent_feedback.len() <= 1 {
            return 0;
        }
        let run = self
            .recent_feedback
            .iter()
            .take_while(|fb| **fb == self.current_feedback)
            .count() as i32;
        match self.current_feedback {
            Feedback::Unchanged => -run,
            Feedback::Changed => run,
        }
    }

    /// 全局历史中的变化次数
    pub fn global_changes(&self) -> usize {
        count_changes(&self.global_feedback)
    }

    /// 分组历史中的变化次数
    pub fn group_changes(&self) -> usize {
        count_changes(&self.group_feedback)
    }
}

fn count_changes(history: &[Feedback]) -> usize {
    history.iter().filter(|fb| **fb == Feedback::Changed).count()
}

/// 一次刷新产生的反馈记录
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRecordEntry {
    pub id: String,
    pub data_source_name: String,
    pub current_feedback: Feedback,
    /// 计算得到的下一次过期时长
    pub expire_time: Duration,
}

/// std Duration 转换为 chrono Duration，溢出时取最大值
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::max_value())
}

mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        serializer.serialize_i64(nanos)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = i64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos.max(0) as u64))
    }
}
