// 配置管理模块

use crate::course::{FailurePolicy, SubtitlePolicy};
use crate::downloader::DEFAULT_CHUNK_SIZE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// 浏览器 UA，课程站点会拒绝默认的 reqwest UA
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/111.0.0.0 Safari/537.36";

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP 客户端配置
    #[serde(default)]
    pub http: HttpConfig,
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 请求节奏配置
    #[serde(default)]
    pub pacing: PacingConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// HTTP 客户端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// 所有请求（页面和文件）使用的 User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// 单个请求总超时（秒），0 表示不限制
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 建立连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 下载时连续多久收不到数据即放弃（秒），0 表示不限制
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_timeout_secs() -> u64 {
    // 讲座视频可能有几百 MB，不设总超时
    0
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    60
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl HttpConfig {
    /// 构建共享的 HTTP 客户端
    ///
    /// 请求头在客户端上统一设置，页面抓取和文件下载共用同一个客户端
    pub fn build_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs));

        if self.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(self.timeout_secs));
        }

        builder.build().context("创建 HTTP 客户端失败")
    }

    /// 下载响应体的空闲超时
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// 下载配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 下载根目录，课程保存到 `<root_dir>/<课程标识>/`
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// 流式写入时每次写盘的字节数
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// 字幕策略
    #[serde(default)]
    pub subtitles: SubtitlePolicy,
    /// 单个文件失败时的处理策略
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            chunk_size: default_chunk_size(),
            subtitles: SubtitlePolicy::default(),
            on_failure: FailurePolicy::default(),
        }
    }
}

/// 请求节奏配置：两个文件之间随机等待 [min, max] 毫秒
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_min_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    3000
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        if self.pacing.min_delay_ms > self.pacing.max_delay_ms {
            anyhow::bail!(
                "pacing.min_delay_ms ({}) 不能大于 pacing.max_delay_ms ({})",
                self.pacing.min_delay_ms,
                self.pacing.max_delay_ms
            );
        }
        if self.download.chunk_size == 0 {
            anyhow::bail!("download.chunk_size 必须大于 0");
        }
        if self.http.user_agent.trim().is_empty() {
            anyhow::bail!("http.user_agent 不能为空");
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| format!("解析配置文件失败: {:?}", path))?;

        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        // 确保父目录存在
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("创建配置目录失败: {:?}", parent))?;
            }
        }

        fs::write(path, content)
            .await
            .with_context(|| format!("写入配置文件失败: {:?}", path))?;

        tracing::info!("✓ 配置已保存: {:?}", path);
        Ok(())
    }

    /// 加载配置；文件不存在时写出默认配置
    ///
    /// 文件存在但无法解析时使用默认配置，不覆盖用户的文件
    pub async fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        if !fs::try_exists(path).await.unwrap_or(false) {
            let default_config = Self::default();
            if let Err(e) = default_config.save_to_file(path).await {
                tracing::warn!("保存默认配置失败: {:#}", e);
            }
            return default_config;
        }

        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {:?}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }
}
