//! # Cache Configuration
//!
//! 缓存配置管理模块。
//!
//! ## 配置选项
//!
//! - `scan_frequency`: 过期扫描的最小间隔
//! - `enable_metrics`: 是否启用统计信息收集
//!
//! ## 示例
//!
//! ```rust
//! use tagcache_core::cache::CacheConfig;
//! use std::time::Duration;
//!
//! // 使用默认配置
//! let config = CacheConfig::default();
//! assert_eq!(config.scan_frequency, Duration::from_secs(60));
//!
//! // 自定义配置
//! let config = CacheConfig::default()
//!     .with_scan_frequency(Duration::from_secs(5))
//!     .with_metrics(false);
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// 默认扫描间隔 (1 分钟)
pub const DEFAULT_SCAN_FREQUENCY: Duration = Duration::from_secs(60);

/// 缓存配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 过期扫描间隔
    ///
    /// 两次后台扫描之间的最短时间。值越小回收越及时，后台开销越大；
    /// 值越大，过期条目可能多停留一段时间。必须大于 0。
    pub scan_frequency: Duration,

    /// 是否启用统计信息收集
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            scan_frequency: DEFAULT_SCAN_FREQUENCY,
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    /// 创建新的缓存配置
    pub fn new(scan_frequency: Duration) -> Self {
        Self {
            scan_frequency,
            ..Default::default()
        }
    }

    /// 设置扫描间隔
    pub fn with_scan_frequency(mut self, scan_frequency: Duration) -> Self {
        self.scan_frequency = scan_frequency;
        self
    }

    /// 设置是否启用统计信息收集
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// 验证配置是否有效
    pub fn validate(&self) -> Result<()> {
        if self.scan_frequency.is_zero() {
            return Err(CacheError::invalid_argument(
                "scan_frequency must be greater than 0",
            ));
        }

        Ok(())
    }

    /// 从 TOML 文本加载配置
    ///
    /// ```toml
    /// enable_metrics = false
    ///
    /// [scan_frequency]
    /// secs = 5
    /// nanos = 0
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为 TOML 文本
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| CacheError::configuration(e.to_string()))
    }
}
