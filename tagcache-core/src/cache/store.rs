//! # Tag-Aware Cache Store
//!
//! 键映射 (`key -> CacheEntry`) 与标签映射 (`tag -> TagEntry`)，
//! 以及保持二者一致的操作。
//!
//! 两个映射均为 `DashMap`。操作一个映射时从不持有另一个映射的锁，
//! 映射自身的迭代器存活期间也不修改它；级联删除基于快照进行。
//!
//! ## 工厂失败
//!
//! 工厂失败 (返回错误或 panic) 会交给等待该次计算的所有调用者，
//! 随后失败的条目被摘除，下一次 `get_or_add` 会执行自己的工厂。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::config::CacheConfig;
use super::entry::{CacheEntry, EntryState, Expiration, ValueRead};
use super::lazy::{LazyTask, LazyValue};
use super::metrics::{CacheMetrics, CacheMetricsSnapshot};
use super::sweeper::{self, SweepGate, SweepStats};
use super::tag::{TagEntry, TagState};
use super::{CacheKey, CacheValue};
use crate::blocking;
use crate::error::{CacheError, FactoryError, Result};

pub(crate) struct CacheInner<K, T> {
    pub(crate) config: CacheConfig,
    pub(crate) entries: DashMap<K, Arc<CacheEntry<K, T>>>,
    pub(crate) tags: DashMap<T, Arc<TagEntry<K, T>>>,
    pub(crate) gate: SweepGate,
    pub(crate) metrics: Arc<CacheMetrics>,
}

/// 并发、带标签、按时间过期的缓存
///
/// 值可以是任意 `Clone + Send + Sync` 类型；读取方指定期望的类型，
/// 类型不符时得到 [`CacheError::TypeMismatch`]。
/// 克隆 `TagCache` 得到指向同一存储的另一个句柄。
///
/// ```rust
/// use std::time::Duration;
/// use tagcache_core::cache::{Expiration, TagCache};
///
/// let cache: TagCache<&str, &str> = TagCache::new();
/// let ttl = Expiration::Absolute(Duration::from_secs(30));
///
/// cache.add("user:1", &["users"], ttl, String::from("alice")).unwrap();
/// let name: Option<String> = cache.try_get(&"user:1").unwrap();
/// assert_eq!(name.as_deref(), Some("alice"));
///
/// cache.remove_by_tag(&"users");
/// assert_eq!(cache.try_get::<String>(&"user:1").unwrap(), None);
/// ```
pub struct TagCache<K, T = String> {
    pub(crate) inner: Arc<CacheInner<K, T>>,
}

impl<K, T> Clone for TagCache<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: CacheKey, T: CacheKey> Default for TagCache<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, T: CacheKey> fmt::Debug for TagCache<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagCache")
            .field("entries", &self.inner.entries.len())
            .field("tags", &self.inner.tags.len())
            .field("sweeping", &self.inner.gate.is_running())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<K: CacheKey, T: CacheKey> TagCache<K, T> {
    /// 使用默认配置创建缓存 (扫描间隔一分钟)
    pub fn new() -> Self {
        Self::build(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                gate: SweepGate::new(config.scan_frequency),
                config,
                entries: DashMap::new(),
                tags: DashMap::new(),
                metrics: Arc::new(CacheMetrics::new()),
            }),
        }
    }

    /// 查找 `key`，不存在或已过期时返回 `None`。
    ///
    /// 惰性值在调用线程上物化。由 [`get_or_add_async`](Self::get_or_add_async)
    /// 产生且仍在计算中的值通过 [`blocking::wait`] 等待；在 current-thread
    /// 运行时内这样做会死锁 (会记录警告)，运行时内请使用异步接口。
    pub fn try_get<V: CacheValue>(&self, key: &K) -> Result<Option<V>> {
        sweeper::request_sweep(&self.inner);

        let Some(entry) = self.inner.lookup(key) else {
            self.inner.record(CacheMetrics::record_miss);
            return Ok(None);
        };

        let value = self.inner.read_blocking(key, &entry)?;
        self.inner.record(CacheMetrics::record_hit);
        Ok(Some(value))
    }

    /// 同 [`try_get`](Self::try_get)，但不存在时返回 [`CacheError::KeyMiss`]
    pub fn get<V: CacheValue>(&self, key: &K) -> Result<V> {
        self.try_get(key)?.ok_or(CacheError::KeyMiss)
    }

    /// 将 `value` 存入 `key`，替换原有条目
    pub fn add<V: CacheValue>(
        &self,
        key: K,
        tags: &[T],
        expiration: Expiration,
        value: V,
    ) -> Result<()> {
        expiration.validate()?;
        sweeper::request_sweep(&self.inner);

        let created = Arc::new(CacheEntry::ready(value, expiration));
        let replaced = self.inner.entries.insert(key.clone(), Arc::clone(&created));
        if let Some(replaced) = replaced {
            self.inner.retire(&replaced);
        }
        self.inner.record(CacheMetrics::record_insertion);
        debug!(?key, ?expiration, tags = tags.len(), "cache entry added");

        self.inner.bind_tags(&key, tags, &created);
        Ok(())
    }

    /// 返回 `key` 的缓存值，未命中时用 `factory` 计算。
    ///
    /// 同一键上并发竞争的调用者中，只有成功安装条目的那一个的工厂会执行，
    /// 其余调用者等待该结果。
    pub fn get_or_add<V, F>(
        &self,
        key: K,
        tags: &[T],
        expiration: Expiration,
        factory: F,
    ) -> Result<V>
    where
        V: CacheValue,
        F: FnOnce() -> anyhow::Result<V> + Send + 'static,
    {
        expiration.validate()?;
        sweeper::request_sweep(&self.inner);

        let entry = match self.inner.lookup(&key) {
            Some(entry) => {
                self.inner.record(CacheMetrics::record_hit);
                entry
            }
            None => {
                let cell = LazyValue::new(self.inner.instrument(factory));
                let created = Arc::new(CacheEntry::lazy(cell, expiration));
                self.inner.install(&key, tags, created)
            }
        };

        self.inner.read_blocking(&key, &entry)
    }

    /// [`get_or_add`](Self::get_or_add) 的异步版本
    ///
    /// 等待进行中的计算时挂起任务，不阻塞工作线程。
    pub async fn get_or_add_async<V, F, Fut>(
        &self,
        key: K,
        tags: &[T],
        expiration: Expiration,
        factory: F,
    ) -> Result<V>
    where
        V: CacheValue,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        expiration.validate()?;
        sweeper::request_sweep(&self.inner);

        let entry = match self.inner.lookup(&key) {
            Some(entry) => {
                self.inner.record(CacheMetrics::record_hit);
                entry
            }
            None => {
                let cell = LazyTask::new(self.inner.instrument_task(factory));
                let created = Arc::new(CacheEntry::task(cell, expiration));
                self.inner.install(&key, tags, created)
            }
        };

        let outcome = match entry.read::<V>()? {
            ValueRead::Done(outcome) => outcome,
            ValueRead::Pending(task) => task.await,
        };
        self.inner.settle(&key, &entry, outcome)
    }

    /// 摘除 `key` 下的条目 (若存在)
    pub fn remove(&self, key: &K) {
        sweeper::request_sweep(&self.inner);

        if let Some((_, entry)) = self.inner.entries.remove(key) {
            self.inner.retire(&entry);
            self.inner.record(CacheMetrics::record_removal);
            debug!(?key, "cache entry removed");
        }
    }

    /// 使绑定到 `tag` 的所有条目失效
    pub fn remove_by_tag(&self, tag: &T) {
        sweeper::request_sweep(&self.inner);

        let Some((_, tag_entry)) = self.inner.tags.remove(tag) else {
            return;
        };
        tag_entry.mark(TagState::Removed);

        let bound = tag_entry.drain();
        let count = bound.len();
        for (entry, key) in bound {
            self.inner.remove_entry(&key, &entry);
        }

        self.inner.record(CacheMetrics::record_tag_invalidation);
        debug!(?tag, removed = count, "cache tag invalidated");
    }

    /// 在调用线程上执行一次扫描，已有扫描进行中时跳过
    pub fn sweep_now(&self) -> Option<SweepStats> {
        sweeper::sweep_now(&self.inner)
    }

    /// 启动每隔 `interval` 扫描一次的 tokio 任务，缓存被丢弃后退出
    pub fn start_expiration_task(&self, interval: Duration) -> Result<JoinHandle<()>> {
        sweeper::start_expiration_task(&self.inner, interval)
    }

    /// 已存储的条目数，包括尚未回收的过期条目
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// `key` 是否持有未过期条目，不延长滑动截止时间
    pub fn contains_key(&self, key: &K) -> bool {
        let entry = self.inner.entries.get(key).map(|item| Arc::clone(item.value()));
        entry.map_or(false, |entry| !entry.check_expired(Instant::now()))
    }

    /// 标签索引数，包括已清空但尚未回收的
    pub fn tag_count(&self) -> usize {
        self.inner.tags.len()
    }

    /// 当前绑定到 `tag` 的条目数
    pub fn tagged_len(&self, tag: &T) -> usize {
        let tag_entry = self.inner.tags.get(tag).map(|item| Arc::clone(item.value()));
        tag_entry.map_or(0, |tag_entry| tag_entry.len())
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

/// 当前线程是否处于 current-thread tokio 运行时中
fn blocking_in_current_thread_runtime() -> bool {
    Handle::try_current()
        .map_or(false, |handle| handle.runtime_flavor() == RuntimeFlavor::CurrentThread)
}

impl<K: CacheKey, T: CacheKey> CacheInner<K, T> {
    pub(crate) fn record(&self, update: impl FnOnce(&CacheMetrics)) {
        if self.config.enable_metrics {
            update(&self.metrics);
        }
    }

    fn metrics_handle(&self) -> Option<Arc<CacheMetrics>> {
        self.config
            .enable_metrics
            .then(|| Arc::clone(&self.metrics))
    }

    fn instrument<V, F>(&self, factory: F) -> impl FnOnce() -> anyhow::Result<V> + Send + 'static
    where
        F: FnOnce() -> anyhow::Result<V> + Send + 'static,
    {
        let metrics = self.metrics_handle();
        move || {
            if let Some(metrics) = &metrics {
                metrics.record_factory_run();
            }
            let result = factory();
            if let (Err(_), Some(metrics)) = (&result, &metrics) {
                metrics.record_factory_failure();
            }
            result
        }
    }

    fn instrument_task<V, F, Fut>(
        &self,
        factory: F,
    ) -> impl FnOnce() -> BoxFuture<'static, anyhow::Result<V>> + Send + 'static
    where
        V: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let metrics = self.metrics_handle();
        move || {
            if let Some(metrics) = &metrics {
                metrics.record_factory_run();
            }
            let pending = factory();
            let task: BoxFuture<'static, anyhow::Result<V>> = Box::pin(async move {
                let result = pending.await;
                if let (Err(_), Some(metrics)) = (&result, &metrics) {
                    metrics.record_factory_failure();
                }
                result
            });
            task
        }
    }

    /// 获取存活条目，已过期则当场回收
    pub(crate) fn lookup(&self, key: &K) -> Option<Arc<CacheEntry<K, T>>> {
        let entry = self.entries.get(key).map(|item| Arc::clone(item.value()))?;
        if entry.check_expired(Instant::now()) {
            trace!(?key, "cache entry expired on access");
            if self.remove_entry(key, &entry) {
                self.record(|metrics| metrics.record_expirations(1));
            }
            return None;
        }
        Some(entry)
    }

    /// 除非 `key` 已有存活条目，否则安装 `created`。
    ///
    /// 返回最终安装的条目，仅当 `created` 胜出时绑定标签。
    pub(crate) fn install(
        &self,
        key: &K,
        tags: &[T],
        created: Arc<CacheEntry<K, T>>,
    ) -> Arc<CacheEntry<K, T>> {
        let now = Instant::now();
        let mut replaced = None;

        let actual = match self.entries.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().check_expired(now) {
                    replaced = Some(occupied.insert(Arc::clone(&created)));
                    Arc::clone(&created)
                } else {
                    Arc::clone(occupied.get())
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&created));
                Arc::clone(&created)
            }
        };

        if let Some(replaced) = replaced {
            self.retire(&replaced);
            self.record(|metrics| metrics.record_expirations(1));
        }

        if Arc::ptr_eq(&actual, &created) {
            self.record(CacheMetrics::record_miss);
            self.record(CacheMetrics::record_insertion);
            self.bind_tags(key, tags, &created);
        } else {
            trace!(?key, "lost install race, using existing entry");
            self.record(CacheMetrics::record_hit);
        }

        actual
    }

    pub(crate) fn read_blocking<V: CacheValue>(
        &self,
        key: &K,
        entry: &Arc<CacheEntry<K, T>>,
    ) -> Result<V> {
        let read = match entry.read::<V>() {
            Ok(read) => read,
            Err(err) => {
                warn!(?key, error = %err, "cache read with the wrong value type");
                return Err(err);
            }
        };
        let outcome = match read {
            ValueRead::Done(outcome) => outcome,
            ValueRead::Pending(task) => {
                if task.peek().is_none() && blocking_in_current_thread_runtime() {
                    warn!(
                        ?key,
                        "blocking on an async cache value inside a current-thread runtime may deadlock"
                    );
                }
                blocking::wait(task)
            }
        };
        self.settle(key, entry, outcome)
    }

    /// 完成一次读取：延长滑动截止时间，或丢弃工厂失败的条目以便下次重试
    pub(crate) fn settle<V>(
        &self,
        key: &K,
        entry: &Arc<CacheEntry<K, T>>,
        outcome: std::result::Result<V, FactoryError>,
    ) -> Result<V> {
        match outcome {
            Ok(value) => {
                entry.touch(Instant::now());
                Ok(value)
            }
            Err(err) => {
                if self.remove_entry(key, entry) {
                    warn!(?key, error = %err, "cache value factory failed, entry dropped");
                }
                Err(CacheError::Factory(err))
            }
        }
    }

    /// 将已摘除的条目标记为失效并解除其标签绑定
    pub(crate) fn retire(&self, entry: &Arc<CacheEntry<K, T>>) {
        entry.mark(EntryState::Removed);
        self.unbind(entry);
    }

    fn unbind(&self, entry: &Arc<CacheEntry<K, T>>) {
        for tag_entry in entry.take_tags() {
            tag_entry.detach(entry);
        }
    }

    /// 若 `key` 下仍是 `entry` 则从键映射中移除，随后使其退役。
    /// 返回是否由本次调用摘除。
    pub(crate) fn remove_entry(&self, key: &K, entry: &Arc<CacheEntry<K, T>>) -> bool {
        let detached = self
            .entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry))
            .is_some();
        self.retire(entry);
        detached
    }

    pub(crate) fn bind_tags(&self, key: &K, tags: &[T], entry: &Arc<CacheEntry<K, T>>) {
        for tag in tags {
            if !self.bind_tag(key, tag, entry) {
                break;
            }
        }
    }

    /// 将 `entry` 绑定到 `tag` 的索引。
    ///
    /// 条目已失效或标签被并发失效时放弃绑定并返回 false；
    /// 后一种情况下条目会被拆除，如同及时绑定后被失效一样。
    pub(crate) fn bind_tag(&self, key: &K, tag: &T, entry: &Arc<CacheEntry<K, T>>) -> bool {
        loop {
            let tag_entry = Arc::clone(
                self.tags
                    .entry(tag.clone())
                    .or_insert_with(|| Arc::new(TagEntry::new()))
                    .value(),
            );

            tag_entry.attach(entry, key);

            if !entry.is_live() || tag_entry.is_removed() {
                tag_entry.detach(entry);
                self.remove_entry(key, entry);
                trace!(?key, ?tag, "tag bind aborted");
                return false;
            }

            if tag_entry.is_evicted() {
                tag_entry.detach(entry);
                trace!(?key, ?tag, "tag evicted during bind, retrying");
                continue;
            }

            if !entry.link_tag(&tag_entry) {
                tag_entry.detach(entry);
                return false;
            }

            // 扫描可能在检查之后、链接之前回收了该索引
            if tag_entry.is_evicted() {
                entry.unlink_tag(&tag_entry);
                tag_entry.detach(entry);
                trace!(?key, ?tag, "tag evicted while linking, retrying");
                continue;
            }

            return true;
        }
    }
}
