use anyhow::Context;
use clap::Parser;
use ocw_dl::{
    config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH},
    downloader::{BarProgress, ProgressObserver, TracingProgress},
    logging, CourseDownloader, CrawlOptions, DownloadHandler, FailurePolicy, OcwLister, Pacer,
    SubtitlePolicy,
};
use std::future::Future;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 第二次 Ctrl-C 的退出码（128 + SIGINT）
const FORCE_QUIT_EXIT_CODE: i32 = 130;

/// 下载公开课课程的讲座视频、字幕和讲义
#[derive(Parser, Debug)]
#[command(name = "ocw-dl", version, about)]
struct Cli {
    /// 课程根地址，例如 https://ocw.mit.edu/courses/6-006-introduction-to-algorithms-spring-2020/
    course_url: String,

    /// 下载根目录（覆盖配置中的 download.root_dir）
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 配置文件路径
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// 不下载字幕
    #[arg(long)]
    no_subtitles: bool,

    /// 单个文件失败时继续下载其余文件
    #[arg(long)]
    continue_on_error: bool,

    /// 关闭两次下载之间的随机等待
    #[arg(long)]
    no_delay: bool,
}

/// 加载日志配置
///
/// 日志系统要在完整配置之前初始化，这里只读取 `[log]` 段，失败时返回默认配置
async fn load_log_config(config_path: &Path) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(config_path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

/// 命令行参数覆盖配置文件
fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(output) = &cli.output {
        config.download.root_dir = output.clone();
    }
    if cli.no_subtitles {
        config.download.subtitles = SubtitlePolicy::Skip;
    }
    if cli.continue_on_error {
        config.download.on_failure = FailurePolicy::Continue;
    }
    if cli.no_delay {
        config.pacing.min_delay_ms = 0;
        config.pacing.max_delay_ms = 0;
    }
}

/// 监听中断信号
///
/// 第一次收到信号时触发取消（当前文件完成后停止），
/// 第二次收到信号时返回 true，由调用方强制退出
async fn watch_interrupts<F, Fut>(mut next_signal: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_signal().await.is_err() {
        return false;
    }
    warn!("收到中断信号，当前文件完成后停止（再按一次 Ctrl-C 强制退出）");
    cancel.cancel();

    next_signal().await.is_ok()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 终端上显示进度条，日志输出先挂起进度条；非终端（重定向、CI）时用日志代替进度条
    let bar = std::io::stderr()
        .is_terminal()
        .then(|| Arc::new(BarProgress::new()));

    // 必须保持 _log_guard 存活
    let log_config = load_log_config(&cli.config).await;
    let _log_guard = logging::init_logging_with_progress(
        &log_config,
        bar.as_ref().map(|bar| bar.multi_progress()),
    );

    info!("ocw-dl v{} 启动", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load_or_default(&cli.config).await;
    apply_overrides(&mut config, &cli);
    config.validate().context("配置无效")?;

    let observer: Arc<dyn ProgressObserver> = match bar {
        Some(bar) => bar,
        None => Arc::new(TracingProgress::default()),
    };

    let client = config.http.build_client()?;
    let fetcher = DownloadHandler::new(client.clone())
        .with_chunk_size(config.download.chunk_size)
        .with_idle_timeout(config.http.idle_timeout())
        .with_observer(observer);
    let lister = OcwLister::new(client);

    let options = CrawlOptions {
        failure_policy: config.download.on_failure,
        subtitle_policy: config.download.subtitles,
        pacer: Pacer::from_config(&config.pacing),
    };

    let cancel = CancellationToken::new();
    let downloader =
        CourseDownloader::new(lister, fetcher, options).with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, cancel).await {
            error!("强制退出，未完成的文件保留为 .part，重新运行会重新下载");
            std::process::exit(FORCE_QUIT_EXIT_CODE);
        }
    });

    let report = downloader
        .run(&cli.course_url, &config.download.root_dir)
        .await
        .with_context(|| format!("下载课程失败: {}", cli.course_url))?;

    info!(
        "课程目录: {:?}, 新下载 {} 个, 已存在 {} 个",
        report.course_dir,
        report.fetched.len(),
        report.already_present.len()
    );

    if report.cancelled {
        warn!("下载被中断，重新运行同一命令会跳过已完成的文件");
        return Ok(());
    }

    for warning in &report.subtitle_warnings {
        warn!("字幕未下载: {}: {}", warning.url, warning.error);
    }

    if !report.failures.is_empty() {
        for failure in &report.failures {
            error!("失败: {}: {}", failure.url, failure.error);
        }
        anyhow::bail!("{} 个文件下载失败", report.failures.len());
    }

    Ok(())
}
