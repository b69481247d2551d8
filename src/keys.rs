//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 远端存储键生成

use chrono::{DateTime, Utc};

use crate::constants::{
    KLC_ENTRY_PREFIX, KLC_GROUP_FEEDBACK_PREFIX, KLC_HIT_CACHE_PREFIX, KLC_ID_EXPIRE_PREFIX,
    KLC_ID_FEEDBACK_PREFIX, KLC_ID_SEPARATOR, KLC_MISS_CACHE_PREFIX, KLC_RELATED_PREFIX,
};

/// 缓存条目键
pub fn entry_key(data_source: &str, id: &str) -> String {
    format!("{}{}:{}", KLC_ENTRY_PREFIX, data_source, id)
}

/// 关联索引键
pub fn related_key(data_source: &str, id: &str) -> String {
    format!("{}{}:{}", KLC_RELATED_PREFIX, data_source, id)
}

/// 分组反馈历史键
pub fn group_feedback_key(data_source: &str) -> String {
    format!("{}{}", KLC_GROUP_FEEDBACK_PREFIX, data_source)
}

/// ID反馈历史键
pub fn id_feedback_key(data_source: &str, id: &str) -> String {
    format!("{}{}:{}", KLC_ID_FEEDBACK_PREFIX, data_source, id)
}

/// 软过期元数据键
pub fn id_expire_key(data_source: &str, id: &str) -> String {
    format!("{}{}:{}", KLC_ID_EXPIRE_PREFIX, data_source, id)
}

/// 刷新队列成员
pub fn refresh_member(data_source: &str, id: &str) -> String {
    format!("{}{}{}", data_source, KLC_ID_SEPARATOR, id)
}

/// 解析刷新队列成员，在第一个分隔符处切分
pub fn parse_refresh_member(member: &str) -> Option<(&str, &str)> {
    match member.split_once(KLC_ID_SEPARATOR) {
        Some((data_source, id)) if !data_source.is_empty() && !id.is_empty() => {
            Some((data_source, id))
        }
        _ => None,
    }
}

/// 命中计数键
pub fn hit_key(at: DateTime<Utc>) -> String {
    format!("{}{}", KLC_HIT_CACHE_PREFIX, at.format("%Y%m"))
}

/// 未命中计数键
pub fn miss_key(at: DateTime<Utc>) -> String {
    format!("{}{}", KLC_MISS_CACHE_PREFIX, at.format("%Y%m"))
}

/// 批量生成键
pub fn key_list<F>(data_source: &str, ids: &[String], key_fn: F) -> Vec<String>
where
    F: Fn(&str, &str) -> String,
{
    ids.iter().map(|id| key_fn(data_source, id)).collect()
}
