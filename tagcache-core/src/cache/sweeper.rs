//! # Expiration Sweeper
//!
//! 回收过期条目与已清空的标签索引。
//!
//! 每个缓存操作都会调用 [`request_sweep`]。只有距上次扫描已超过扫描间隔、
//! 且没有其他扫描进行中时才会启动；扫描在 tokio 阻塞线程池上执行，
//! 没有运行时则使用独立线程。时间戳与进行中标志都属于缓存实例本身。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::metrics::CacheMetrics;
use super::store::CacheInner;
use super::tag::{TagEntry, TagState};
use super::CacheKey;
use crate::error::{CacheError, Result};

const NEVER: u64 = u64::MAX;

/// 单次扫描的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepStats {
    /// 发现过期并移除的条目数
    pub expired_entries: usize,
    /// 回收的空标签索引数
    pub evicted_tags: usize,
    /// 本次扫描耗时
    pub elapsed: Duration,
}

/// 节流状态：上次扫描开始时间与是否有扫描进行中
#[derive(Debug)]
pub(crate) struct SweepGate {
    origin: Instant,
    frequency: u64,
    last_sweep: AtomicU64,
    running: AtomicBool,
}

impl SweepGate {
    pub(crate) fn new(frequency: Duration) -> Self {
        Self {
            origin: Instant::now(),
            frequency: nanos(frequency),
            last_sweep: AtomicU64::new(NEVER),
            running: AtomicBool::new(false),
        }
    }

    fn offset(&self, now: Instant) -> u64 {
        nanos(now.saturating_duration_since(self.origin))
    }

    /// `now - frequency` 晚于上次扫描时间戳时返回 true
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        let last = self.last_sweep.load(Ordering::Acquire);
        last == NEVER || self.offset(now) > last.saturating_add(self.frequency)
    }

    pub(crate) fn try_claim(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn stamp(&self, now: Instant) {
        self.last_sweep.store(self.offset(now), Ordering::Release);
    }

    pub(crate) fn release(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// 已占用的扫描。丢弃时释放进行中标志，未能执行的任务 (运行时关闭、
/// 线程创建失败) 或 panic 的任务不会阻塞后续扫描。
struct SweepClaim<K: CacheKey, T: CacheKey> {
    inner: Arc<CacheInner<K, T>>,
}

impl<K: CacheKey, T: CacheKey> SweepClaim<K, T> {
    fn run(self) -> SweepStats {
        self.inner.sweep()
    }
}

impl<K: CacheKey, T: CacheKey> Drop for SweepClaim<K, T> {
    fn drop(&mut self) {
        self.inner.gate.release();
    }
}

/// 到期且无扫描进行中时启动后台扫描
pub(crate) fn request_sweep<K: CacheKey, T: CacheKey>(inner: &Arc<CacheInner<K, T>>) {
    let now = Instant::now();
    if !inner.gate.is_due(now) || !inner.gate.try_claim() {
        return;
    }
    inner.gate.stamp(now);

    let claim = SweepClaim {
        inner: Arc::clone(inner),
    };
    let job = move || {
        claim.run();
    };

    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(job);
        }
        Err(_) => {
            let spawned = std::thread::Builder::new()
                .name("tagcache-sweep".to_string())
                .spawn(job);
            if let Err(err) = spawned {
                warn!(error = %err, "failed to spawn cache sweep thread");
            }
        }
    }
}

/// 占用闸门并在调用线程上扫描
pub(crate) fn sweep_now<K: CacheKey, T: CacheKey>(
    inner: &Arc<CacheInner<K, T>>,
) -> Option<SweepStats> {
    if !inner.gate.try_claim() {
        return None;
    }
    inner.gate.stamp(Instant::now());

    let claim = SweepClaim {
        inner: Arc::clone(inner),
    };
    Some(claim.run())
}

/// 周期扫描任务，缓存被丢弃后自行结束
pub(crate) fn start_expiration_task<K: CacheKey, T: CacheKey>(
    inner: &Arc<CacheInner<K, T>>,
    interval: Duration,
) -> Result<JoinHandle<()>> {
    if interval.is_zero() {
        return Err(CacheError::invalid_argument(
            "expiration task interval must be greater than 0",
        ));
    }
    let handle = Handle::try_current()
        .map_err(|err| CacheError::configuration(format!("no tokio runtime: {}", err)))?;

    let cache: Weak<CacheInner<K, T>> = Arc::downgrade(inner);
    Ok(handle.spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await;
        loop {
            timer.tick().await;
            let Some(inner) = cache.upgrade() else {
                debug!("cache dropped, stopping expiration task");
                break;
            };
            if let Some(stats) = sweep_now(&inner) {
                if stats.expired_entries > 0 {
                    debug!("Removed {} expired cache entries", stats.expired_entries);
                }
            }
        }
    }))
}

impl<K: CacheKey, T: CacheKey> CacheInner<K, T> {
    /// 对两个映射完整扫描一遍，调用者须持有扫描占用
    pub(crate) fn sweep(&self) -> SweepStats {
        let started = Instant::now();

        let expired: Vec<(K, Arc<CacheEntry<K, T>>)> = self
            .entries
            .iter()
            .filter(|item| item.value().check_expired(started))
            .map(|item| (item.key().clone(), Arc::clone(item.value())))
            .collect();

        let mut expired_entries = 0;
        for (key, entry) in &expired {
            if self.remove_entry(key, entry) {
                expired_entries += 1;
            }
        }

        let drained: Vec<(T, Arc<TagEntry<K, T>>)> = self
            .tags
            .iter()
            .filter(|item| item.value().is_empty())
            .map(|item| (item.key().clone(), Arc::clone(item.value())))
            .collect();

        let mut evicted_tags = 0;
        for (tag, tag_entry) in &drained {
            if self.evict_tag(tag, tag_entry) {
                evicted_tags += 1;
            }
        }

        let stats = SweepStats {
            expired_entries,
            evicted_tags,
            elapsed: started.elapsed(),
        };
        self.record(|metrics| metrics.record_expirations(expired_entries as u64));
        self.record(CacheMetrics::record_sweep);
        debug!(
            expired = stats.expired_entries,
            evicted_tags = stats.evicted_tags,
            elapsed_us = stats.elapsed.as_micros() as u64,
            "cache sweep finished"
        );
        stats
    }

    /// 回收观察到为空的标签索引。
    ///
    /// 回收过程中并发绑定进来的条目会迁移到同名的新索引。
    pub(crate) fn evict_tag(&self, tag: &T, tag_entry: &Arc<TagEntry<K, T>>) -> bool {
        let removed = self
            .tags
            .remove_if(tag, |_, current| {
                Arc::ptr_eq(current, tag_entry) && current.is_empty()
            })
            .is_some();
        if !removed {
            return false;
        }
        tag_entry.mark(TagState::Evicted);

        for (entry, key) in tag_entry.drain() {
            entry.unlink_tag(tag_entry);
            self.bind_tag(&key, tag, &entry);
        }
        true
    }
}
