//! # Cache Entry
//!
//! 键映射中的一个槽位：值持有者、过期策略、单向的生命周期状态，
//! 以及该条目绑定的标签集合。

use std::any::{type_name, Any};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::lazy::{LazyTask, LazyValue, SharedTask};
use super::tag::TagEntry;
use super::CacheValue;
use crate::error::{CacheError, FactoryError, Result};

type AnyValue = Arc<dyn Any + Send + Sync>;

/// 条目寿命的计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiration {
    /// 每次成功读取后截止时间变为 `最近读取 + lifetime`
    Sliding(Duration),
    /// 截止时间固定为 `创建时间 + lifetime`
    Absolute(Duration),
}

impl Expiration {
    pub fn lifetime(&self) -> Duration {
        match *self {
            Expiration::Sliding(lifetime) | Expiration::Absolute(lifetime) => lifetime,
        }
    }

    pub fn is_sliding(&self) -> bool {
        matches!(self, Expiration::Sliding(_))
    }

    /// 拒绝为零的寿命
    ///
    /// 超出 `Instant` 表示范围的寿命 (例如 `Duration::MAX`) 视为永不过期。
    pub fn validate(&self) -> Result<()> {
        if self.lifetime().is_zero() {
            return Err(CacheError::invalid_argument(
                "lifetime must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 条目生命周期，最多离开 `Live` 一次且不可恢复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum EntryState {
    Live = 0,
    /// 已观察到超过截止时间
    Expired = 1,
    /// 因移除、替换、标签失效或工厂失败而脱离
    Removed = 2,
}

impl EntryState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => EntryState::Live,
            1 => EntryState::Expired,
            _ => EntryState::Removed,
        }
    }
}

enum Slot {
    Ready(AnyValue),
    Lazy(AnyValue),
    Task(AnyValue),
}

/// 读取槽位的结果：已确定的值，或需要等待的异步计算
pub(crate) enum ValueRead<V> {
    Done(std::result::Result<V, FactoryError>),
    Pending(SharedTask<V>),
}

/// 条目分配的标识，作为标签索引的键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(usize);

pub(crate) struct CacheEntry<K, T> {
    slot: Slot,
    type_name: &'static str,
    expiration: Expiration,
    created: Instant,
    /// 最近一次成功读取距 `created` 的纳秒数
    touched: AtomicU64,
    state: AtomicU8,
    tags: Mutex<Vec<Arc<TagEntry<K, T>>>>,
}

impl<K, T> CacheEntry<K, T> {
    fn with_slot(slot: Slot, type_name: &'static str, expiration: Expiration) -> Self {
        Self {
            slot,
            type_name,
            expiration,
            created: Instant::now(),
            touched: AtomicU64::new(0),
            state: AtomicU8::new(EntryState::Live as u8),
            tags: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn ready<V: CacheValue>(value: V, expiration: Expiration) -> Self {
        Self::with_slot(Slot::Ready(Arc::new(value)), type_name::<V>(), expiration)
    }

    pub(crate) fn lazy<V: CacheValue>(cell: LazyValue<V>, expiration: Expiration) -> Self {
        Self::with_slot(Slot::Lazy(Arc::new(cell)), type_name::<V>(), expiration)
    }

    pub(crate) fn task<V: CacheValue>(cell: LazyTask<V>, expiration: Expiration) -> Self {
        Self::with_slot(Slot::Task(Arc::new(cell)), type_name::<V>(), expiration)
    }

    pub(crate) fn id(entry: &Arc<Self>) -> EntryId {
        EntryId(Arc::as_ptr(entry) as usize)
    }

    /// 以 `V` 类型读取槽位，同步惰性值就地物化
    pub(crate) fn read<V: CacheValue>(&self) -> Result<ValueRead<V>> {
        let mismatch = || CacheError::type_mismatch::<V>(self.type_name);
        match &self.slot {
            Slot::Ready(value) => value
                .downcast_ref::<V>()
                .map(|value| ValueRead::Done(Ok(value.clone())))
                .ok_or_else(mismatch),
            Slot::Lazy(cell) => cell
                .downcast_ref::<LazyValue<V>>()
                .map(|cell| ValueRead::Done(cell.force()))
                .ok_or_else(mismatch),
            Slot::Task(cell) => cell
                .downcast_ref::<LazyTask<V>>()
                .map(|cell| ValueRead::Pending(cell.force()))
                .ok_or_else(mismatch),
        }
    }

    pub(crate) fn state(&self) -> EntryState {
        EntryState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn is_live(&self) -> bool {
        self.state() == EntryState::Live
    }

    /// 离开 `Live` 状态，已离开时返回 false
    pub(crate) fn mark(&self, state: EntryState) -> bool {
        self.state
            .compare_exchange(
                EntryState::Live as u8,
                state as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// 截止时间；超出 `Instant` 表示范围时为 `None` (永不过期)
    pub(crate) fn deadline(&self) -> Option<Instant> {
        let lifetime = self.expiration.lifetime();
        match self.expiration {
            Expiration::Absolute(_) => self.created.checked_add(lifetime),
            Expiration::Sliding(_) => {
                let touched = Duration::from_nanos(self.touched.load(Ordering::Acquire));
                self.created
                    .checked_add(touched)
                    .and_then(|read| read.checked_add(lifetime))
            }
        }
    }

    /// 判断条目在 `now` 时是否已失效，首次发现过期时标记为 Expired
    pub(crate) fn check_expired(&self, now: Instant) -> bool {
        if !self.is_live() {
            return true;
        }
        let Some(deadline) = self.deadline() else {
            return false;
        };
        if now >= deadline {
            self.mark(EntryState::Expired);
            return true;
        }
        false
    }

    /// 成功读取后延长滑动截止时间
    pub(crate) fn touch(&self, now: Instant) {
        if !self.expiration.is_sliding() {
            return;
        }
        let offset = now.saturating_duration_since(self.created).as_nanos();
        let offset = u64::try_from(offset).unwrap_or(u64::MAX);
        self.touched.fetch_max(offset, Ordering::AcqRel);
    }

    /// 记录一次干净的标签绑定。条目不再存活时拒绝，
    /// 保证并发拆除不会漏掉任何绑定。
    pub(crate) fn link_tag(&self, tag: &Arc<TagEntry<K, T>>) -> bool {
        let mut tags = self.tags.lock();
        if !self.is_live() {
            return false;
        }
        if !tags.iter().any(|bound| Arc::ptr_eq(bound, tag)) {
            tags.push(Arc::clone(tag));
        }
        true
    }

    pub(crate) fn unlink_tag(&self, tag: &Arc<TagEntry<K, T>>) {
        self.tags.lock().retain(|bound| !Arc::ptr_eq(bound, tag));
    }

    /// 清空标签集合，调用者须先离开 `Live` 状态
    pub(crate) fn take_tags(&self) -> Vec<Arc<TagEntry<K, T>>> {
        std::mem::take(&mut *self.tags.lock())
    }

    #[cfg(test)]
    pub(crate) fn tag_count(&self) -> usize {
        self.tags.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn linked_tags(&self) -> Vec<Arc<TagEntry<K, T>>> {
        self.tags.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    type Entry = CacheEntry<&'static str, &'static str>;

    #[test]
    fn test_expiration_validate() {
        assert!(Expiration::Sliding(Duration::from_millis(1)).validate().is_ok());
        assert!(matches!(
            Expiration::Absolute(Duration::ZERO).validate(),
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_ready_read_and_type_mismatch() {
        let entry = Entry::ready(42u32, Expiration::Absolute(Duration::from_secs(1)));

        match entry.read::<u32>().unwrap() {
            ValueRead::Done(Ok(value)) => assert_eq!(value, 42),
            _ => panic!("expected a settled value"),
        }

        let err = entry.read::<String>().err().unwrap();
        assert!(matches!(
            err,
            CacheError::TypeMismatch { found: "u32", .. }
        ));
    }

    #[test]
    fn test_absolute_expiry_ignores_reads() {
        let entry = Entry::ready(1u8, Expiration::Absolute(Duration::from_millis(50)));
        let start = Instant::now();

        entry.touch(start + Duration::from_millis(40));
        assert!(!entry.check_expired(start + Duration::from_millis(10)));
        assert!(entry.check_expired(entry.created + Duration::from_millis(50)));
        assert_eq!(entry.state(), EntryState::Expired);
    }

    #[test]
    fn test_sliding_expiry_moves_with_reads() {
        let entry = Entry::ready(1u8, Expiration::Sliding(Duration::from_millis(50)));
        let created = entry.created;

        entry.touch(created + Duration::from_millis(40));
        assert!(!entry.check_expired(created + Duration::from_millis(80)));

        entry.touch(created + Duration::from_millis(80));
        assert!(!entry.check_expired(created + Duration::from_millis(120)));
        assert!(entry.check_expired(created + Duration::from_millis(130)));
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let entry = Entry::ready(1u8, Expiration::Sliding(Duration::from_millis(50)));
        let created = entry.created;

        entry.touch(created + Duration::from_millis(30));
        entry.touch(created + Duration::from_millis(10));
        assert_eq!(entry.deadline(), Some(created + Duration::from_millis(80)));
    }

    #[test]
    fn test_state_transitions_once() {
        let entry = Entry::ready((), Expiration::Absolute(Duration::from_secs(1)));
        assert!(entry.mark(EntryState::Removed));
        assert!(!entry.mark(EntryState::Expired));
        assert_eq!(entry.state(), EntryState::Removed);
        assert!(entry.check_expired(Instant::now()));
    }

    #[test]
    fn test_link_refused_after_teardown() {
        let entry = Arc::new(Entry::ready(0i64, Expiration::Absolute(Duration::from_secs(1))));
        let tag = Arc::new(TagEntry::new());

        assert!(entry.link_tag(&tag));
        assert!(entry.link_tag(&tag));
        assert_eq!(entry.tag_count(), 1);

        entry.mark(EntryState::Removed);
        assert_eq!(entry.take_tags().len(), 1);
        assert!(!entry.link_tag(&Arc::new(TagEntry::new())));
        assert_eq!(entry.tag_count(), 0);
    }

    #[test]
    fn test_lazy_slot_materializes_on_read() {
        let entry = Arc::new(Entry::lazy(
            LazyValue::new(|| Ok(String::from("computed"))),
            Expiration::Sliding(Duration::from_secs(1)),
        ));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let entry = entry.clone();
                thread::spawn(move || match entry.read::<String>() {
                    Ok(ValueRead::Done(Ok(value))) => value,
                    _ => panic!("expected a settled value"),
                })
            })
            .collect();

        for reader in readers {
            assert_eq!(reader.join().unwrap(), "computed");
        }
    }

    #[test]
    fn test_unbounded_lifetime_never_expires() {
        let absolute = Entry::ready(1u8, Expiration::Absolute(Duration::MAX));
        assert!(absolute.deadline().is_none());
        assert!(!absolute.check_expired(Instant::now() + Duration::from_secs(86_400)));

        let sliding = Entry::ready(1u8, Expiration::Sliding(Duration::MAX));
        sliding.touch(Instant::now());
        assert!(!sliding.check_expired(Instant::now()));
        assert!(sliding.is_live());
    }
}
