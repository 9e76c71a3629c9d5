//! # Cache Module
//!
//! 带标签失效与过期回收的并发内存缓存。
//!
//! ## 模块结构
//!
//! - `config`: 缓存配置
//! - `entry`: 缓存条目与过期策略
//! - `tag`: 标签反向索引
//! - `lazy`: 惰性计算单元 (同步 / 异步)
//! - `store`: 缓存主体与公开接口
//! - `sweeper`: 节流的后台过期扫描
//! - `metrics`: 缓存统计
//!
//! ## 特性
//!
//! - 滑动 / 绝对过期
//! - 按标签批量失效
//! - 同一键并发 `get_or_add` 时工厂只执行一次
//! - 后台扫描回收过期条目与空标签
//! - 无全局锁
//!
//! ## 示例
//!
//! ```rust
//! use std::time::Duration;
//! use tagcache_core::cache::{CacheConfig, Expiration, TagCache};
//!
//! # fn main() -> tagcache_core::Result<()> {
//! let config = CacheConfig::default().with_scan_frequency(Duration::from_secs(10));
//! let cache: TagCache<String> = TagCache::with_config(config)?;
//!
//! let tags = ["catalog".to_string()];
//! let price: u64 = cache.get_or_add(
//!     "sku:42".to_string(),
//!     &tags,
//!     Expiration::Sliding(Duration::from_secs(60)),
//!     || Ok(1999),
//! )?;
//! assert_eq!(price, 1999);
//!
//! // 目录变更，整组失效
//! cache.remove_by_tag(&"catalog".to_string());
//! assert!(cache.try_get::<u64>(&"sku:42".to_string())?.is_none());
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;
use std::hash::Hash;

pub mod config;
pub mod entry;
pub mod lazy;
pub mod metrics;
pub mod store;
pub mod sweeper;
pub mod tag;


pub use config::CacheConfig;
pub use entry::Expiration;
pub use lazy::{LazyTask, LazyValue};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use store::TagCache;
pub use sweeper::SweepStats;
pub use tag::TagState;

/// Bounds shared by cache keys and tags
pub trait CacheKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Bounds on cached values; reads hand out clones
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}
