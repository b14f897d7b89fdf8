// 下载错误类型

use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// 单个文件下载过程中可能出现的错误
///
/// 所有错误都原样返回给调用方，下载器内部不做重试也不吞掉错误
#[derive(Debug, Error)]
pub enum FetchError {
    /// 服务器返回非 2xx 状态码
    #[error("HTTP 状态异常: {status} ({url})")]
    Transfer { status: StatusCode, url: String },

    /// 连接层失败（DNS、超时、连接重置、读取响应体失败）
    #[error("网络请求失败: {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// 响应体读取过程中长时间收不到数据
    #[error("网络读取超时: {url}: 超过 {idle:?} 未收到数据")]
    Stalled { url: String, idle: Duration },

    /// 本地文件或目录操作失败
    #[error("文件操作失败: {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// URL 无法解析或不是 http(s)
    #[error("无效的 URL: {0}")]
    InvalidUrl(String),

    /// URL 的最后一段为空，无法推导本地文件名
    #[error("无法从 URL 推导文件名: {0}")]
    EmptyFilename(String),
}

impl FetchError {
    pub(crate) fn network(url: &str, source: reqwest::Error) -> Self {
        FetchError::Network {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            source,
        }
    }

    /// 连接层错误（包括读取超时）
    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::Network { .. } | FetchError::Stalled { .. })
    }

    /// 非成功状态码（如果是 Transfer 错误）
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FetchError::Transfer { status, .. } => Some(*status),
            _ => None,
        }
    }
}
