//! # Cache Metrics
//!
//! 缓存统计指标，全部基于原子计数器，读写无锁。

use std::sync::atomic::{AtomicU64, Ordering};

/// 缓存统计指标
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// 读取请求总数
    total_requests: AtomicU64,
    /// 命中次数
    hits: AtomicU64,
    /// 未命中次数
    misses: AtomicU64,
    /// 写入次数 (add 以及 get_or_add 成功安装)
    insertions: AtomicU64,
    /// 按键移除次数
    removals: AtomicU64,
    /// 过期回收次数
    expirations: AtomicU64,
    /// 按标签失效次数
    tag_invalidations: AtomicU64,
    /// 工厂执行次数
    factory_runs: AtomicU64,
    /// 工厂失败次数
    factory_failures: AtomicU64,
    /// 完成的扫描次数
    sweeps: AtomicU64,
}

impl CacheMetrics {
    /// 创建新的统计实例
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insertion(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_tag_invalidation(&self) {
        self.tag_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_factory_run(&self) {
        self.factory_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_factory_failure(&self) {
        self.factory_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    /// 计算命中率 (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let hits = self.hits.load(Ordering::Relaxed);
        (hits as f64) / (total as f64)
    }

    /// 获取统计快照
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            tag_invalidations: self.tag_invalidations.load(Ordering::Relaxed),
            factory_runs: self.factory_runs.load(Ordering::Relaxed),
            factory_failures: self.factory_failures.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }

    /// 重置所有统计
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.hits,
            &self.misses,
            &self.insertions,
            &self.removals,
            &self.expirations,
            &self.tag_invalidations,
            &self.factory_runs,
            &self.factory_failures,
            &self.sweeps,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 缓存统计快照
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CacheMetricsSnapshot {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub removals: u64,
    pub expirations: u64,
    pub tag_invalidations: u64,
    pub factory_runs: u64,
    pub factory_failures: u64,
    pub sweeps: u64,
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.hit_rate(), 0.0);

        metrics.record_hit();
        metrics.record_miss();
        metrics.record_hit();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert!((snapshot.hit_rate - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_insertion();
        metrics.record_expirations(4);
        metrics.record_sweep();
        assert_eq!(metrics.snapshot().expirations, 4);

        metrics.reset();
        assert_eq!(metrics.snapshot(), CacheMetricsSnapshot::default());
    }
}
