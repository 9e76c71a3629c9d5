//! # Tag Entry
//!
//! 从单个标签到当前绑定条目的反向索引。
//! 条目与其键一起保存，标签失效时可按标识从键映射中摘除。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::entry::{CacheEntry, EntryId};

/// 标签索引的生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TagState {
    /// 接受新的绑定
    Active = 0,
    /// 已被扫描回收，绑定方须在新的标签索引上重试
    Evicted = 1,
    /// 已通过 `remove_by_tag` 失效，绑定方须拆除条目
    Removed = 2,
}

impl TagState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TagState::Active,
            1 => TagState::Evicted,
            _ => TagState::Removed,
        }
    }
}

pub(crate) struct TagEntry<K, T> {
    entries: DashMap<EntryId, (Arc<CacheEntry<K, T>>, K)>,
    state: AtomicU8,
}

impl<K, T> TagEntry<K, T>
where
    K: Clone + Eq + std::hash::Hash,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
            state: AtomicU8::new(TagState::Active as u8),
        }
    }

    pub(crate) fn attach(&self, entry: &Arc<CacheEntry<K, T>>, key: &K) {
        self.entries
            .insert(CacheEntry::id(entry), (Arc::clone(entry), key.clone()));
    }

    pub(crate) fn detach(&self, entry: &Arc<CacheEntry<K, T>>) {
        self.entries.remove(&CacheEntry::id(entry));
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, entry: &Arc<CacheEntry<K, T>>) -> bool {
        self.entries.contains_key(&CacheEntry::id(entry))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// 摘除并返回调用时已绑定的全部条目。
    ///
    /// 并发附加的绑定保持不动，其绑定方会观察到非活跃状态并自行清理。
    pub(crate) fn drain(&self) -> Vec<(Arc<CacheEntry<K, T>>, K)> {
        let ids: Vec<EntryId> = self.entries.iter().map(|item| *item.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|(_, bound)| bound))
            .collect()
    }

    pub(crate) fn state(&self) -> TagState {
        TagState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.state() == TagState::Evicted
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.state() == TagState::Removed
    }

    /// 离开 `Active` 状态，已退役时返回 false
    pub(crate) fn mark(&self, state: TagState) -> bool {
        self.state
            .compare_exchange(
                TagState::Active as u8,
                state as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}
