//! 下载进度观察
//!
//! 进度仅用于展示（日志 / 终端进度条），不影响下载流程。
//! 总大小未知时退化为只计数模式。

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 默认日志节流间隔（毫秒）
pub const DEFAULT_LOG_INTERVAL_MS: u64 = 2000;

const BAR_TEMPLATE: &str =
    "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

const SPINNER_TEMPLATE: &str = "{spinner:.blue} [{elapsed_precise}] {bytes} ({bytes_per_sec}) {msg}";

/// 单次下载的进度快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// 已写入文件的字节数
    pub bytes_transferred: u64,
    /// 预期总字节数（来自 Content-Length，可能缺失）
    pub total_bytes: Option<u64>,
}

impl TransferProgress {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            bytes_transferred: 0,
            total_bytes,
        }
    }

    /// 计算进度百分比，总大小未知时返回 None
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(100.0),
            Some(total) => Some(self.bytes_transferred as f64 / total as f64 * 100.0),
            None => None,
        }
    }
}

/// 进度观察者
///
/// 下载是串行的，同一个观察者会被多次下载复用：
/// 每次下载依次收到 `on_start` → 若干 `on_advance` → `on_finish`
pub trait ProgressObserver: Send + Sync {
    fn on_start(&self, url: &str, total_bytes: Option<u64>);
    fn on_advance(&self, progress: TransferProgress);
    fn on_finish(&self, progress: TransferProgress);
}

/// 不输出任何进度
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_start(&self, _url: &str, _total_bytes: Option<u64>) {}
    fn on_advance(&self, _progress: TransferProgress) {}
    fn on_finish(&self, _progress: TransferProgress) {}
}

/// 进度节流器
///
/// 使用原子操作记录上次输出时间，`should_emit()` 返回 true 时才输出
#[derive(Debug)]
pub struct ProgressThrottler {
    origin: Instant,
    last_emit_nanos: AtomicU64,
    interval_nanos: u64,
}

impl ProgressThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_emit_nanos: AtomicU64::new(0),
            interval_nanos: interval.as_nanos() as u64,
        }
    }

    pub fn should_emit(&self) -> bool {
        let now_nanos = self.origin.elapsed().as_nanos() as u64;
        let last = self.last_emit_nanos.load(Ordering::Relaxed);

        if now_nanos.saturating_sub(last) < self.interval_nanos {
            return false;
        }

        self.last_emit_nanos
            .compare_exchange(last, now_nanos, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// 新的一次下载开始时重置
    pub fn reset(&self) {
        let now_nanos = self.origin.elapsed().as_nanos() as u64;
        self.last_emit_nanos.store(now_nanos, Ordering::Relaxed);
    }
}

/// 通过 tracing 输出进度（按时间节流）
#[derive(Debug)]
pub struct TracingProgress {
    throttler: ProgressThrottler,
}

impl TracingProgress {
    pub fn new(interval: Duration) -> Self {
        Self {
            throttler: ProgressThrottler::new(interval),
        }
    }
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_LOG_INTERVAL_MS))
    }
}

impl ProgressObserver for TracingProgress {
    fn on_start(&self, url: &str, total_bytes: Option<u64>) {
        self.throttler.reset();
        match total_bytes {
            Some(total) => info!("开始下载: {} ({})", url, format_size(total)),
            None => info!("开始下载: {} (大小未知)", url),
        }
    }

    fn on_advance(&self, progress: TransferProgress) {
        if !self.throttler.should_emit() {
            return;
        }
        match progress.percent() {
            Some(percent) => debug!(
                "下载进度: {:.1}% ({}/{})",
                percent,
                format_size(progress.bytes_transferred),
                format_size(progress.total_bytes.unwrap_or_default())
            ),
            None => debug!("已下载: {}", format_size(progress.bytes_transferred)),
        }
    }

    fn on_finish(&self, progress: TransferProgress) {
        debug!("传输结束: {}", format_size(progress.bytes_transferred));
    }
}

/// 终端进度条（indicatif）
///
/// 总大小已知时显示字节进度条，未知时显示 spinner。
/// 进度条挂在 `MultiProgress` 上，控制台日志通过 `multi_progress()` 与它协调输出
pub struct BarProgress {
    multi: MultiProgress,
    bar: Mutex<Option<ProgressBar>>,
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }
}

impl BarProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        Self {
            multi,
            bar: Mutex::new(None),
        }
    }

    /// 供日志层在输出前挂起进度条
    pub fn multi_progress(&self) -> MultiProgress {
        self.multi.clone()
    }

    fn style(template: &str) -> Option<ProgressStyle> {
        ProgressStyle::with_template(template)
            .ok()
            .map(|style| style.progress_chars("█▓▒░  "))
    }
}

impl ProgressObserver for BarProgress {
    fn on_start(&self, url: &str, total_bytes: Option<u64>) {
        let bar = match total_bytes {
            Some(total) => {
                let bar = ProgressBar::new(total);
                match Self::style(BAR_TEMPLATE) {
                    Some(style) => bar.with_style(style),
                    None => bar,
                }
            }
            None => {
                let bar = ProgressBar::new_spinner();
                match Self::style(SPINNER_TEMPLATE) {
                    Some(style) => bar.with_style(style),
                    None => bar,
                }
            }
        };
        bar.set_message(url.rsplit('/').next().unwrap_or(url).to_string());
        let bar = self.multi.add(bar);

        if let Ok(mut slot) = self.bar.lock() {
            if let Some(previous) = slot.replace(bar) {
                previous.finish_and_clear();
                self.multi.remove(&previous);
            }
        }
    }

    fn on_advance(&self, progress: TransferProgress) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.set_position(progress.bytes_transferred);
            }
        }
    }

    fn on_finish(&self, progress: TransferProgress) {
        if let Ok(mut slot) = self.bar.lock() {
            // 完成情况由日志记录，进度条本身清掉
            if let Some(bar) = slot.take() {
                bar.set_position(progress.bytes_transferred);
                bar.finish_and_clear();
                self.multi.remove(&bar);
            }
        }
    }
}

/// 格式化文件大小为人类可读格式
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
