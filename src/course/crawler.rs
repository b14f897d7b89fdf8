// 课程批量下载流程

use crate::course::lister::PageLister;
use crate::course::pacing::Pacer;
use crate::course::types::{CourseUrls, CrawlError};
use crate::downloader::{sanitize_component, FetchOutcome, FileFetcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 单个文件失败时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 第一个失败即终止整个课程下载
    #[default]
    Abort,
    /// 记录错误，继续下一个文件
    Continue,
}

/// 字幕下载策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitlePolicy {
    /// 字幕失败视为该视频失败（交给 FailurePolicy 处理）
    #[default]
    Required,
    /// 字幕失败只记录警告
    BestEffort,
    /// 不下载字幕
    Skip,
}

/// 批量下载选项
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    pub failure_policy: FailurePolicy,
    pub subtitle_policy: SubtitlePolicy,
    pub pacer: Pacer,
}

/// 失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFailure {
    /// 页面或文件地址
    pub url: String,
    /// 错误描述
    pub error: String,
}

/// 一次课程下载的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// 课程本地目录 `<root>/<slug>`
    pub course_dir: PathBuf,
    /// 本次实际下载的文件
    pub fetched: Vec<PathBuf>,
    /// 已存在而跳过的文件
    pub already_present: Vec<PathBuf>,
    /// 失败的文件（仅 Continue 策略时出现）
    pub failures: Vec<ArtifactFailure>,
    /// BestEffort 策略下失败的字幕，不计入失败
    pub subtitle_warnings: Vec<ArtifactFailure>,
    /// 是否因取消而提前结束
    pub cancelled: bool,
}

impl CrawlReport {
    fn record(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Fetched { path, .. } => self.fetched.push(path),
            FetchOutcome::AlreadyPresent { path } => self.already_present.push(path),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// 讲座标题 → 单级目录名；清理后为空、"." 或 ".." 时用 "_"
fn lecture_folder_name(title: &str) -> String {
    let name = sanitize_component(title);
    if name.is_empty() || name == "." || name == ".." {
        "_".to_string()
    } else {
        name
    }
}

/// 课程下载器
///
/// 严格串行：先按页面顺序下载全部视频（视频 → 字幕），
/// 再按行顺序下载讲义（讲座 → 习题课）。两个文件之间插入随机等待，
/// 同一视频的视频和字幕之间不等待。取消信号在文件之间检查。
pub struct CourseDownloader<L, F> {
    lister: L,
    fetcher: F,
    options: CrawlOptions,
    cancel: CancellationToken,
}

impl<L: PageLister, F: FileFetcher> CourseDownloader<L, F> {
    pub fn new(lister: L, fetcher: F, options: CrawlOptions) -> Self {
        Self {
            lister,
            fetcher,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 下载整门课程到 `<root>/<slug>/`
    pub async fn run(&self, course_url: &str, root: &Path) -> Result<CrawlReport, CrawlError> {
        let urls = CourseUrls::parse(course_url)?;
        let course_dir = root.join(&urls.slug);
        tokio::fs::create_dir_all(&course_dir)
            .await
            .map_err(|source| CrawlError::Io {
                path: course_dir.clone(),
                source,
            })?;

        info!("开始下载课程 {} -> {:?}", urls.slug, course_dir);

        let mut report = CrawlReport {
            course_dir: course_dir.clone(),
            ..Default::default()
        };
        let mut started = false;

        let videos_dir = course_dir.join("videos");
        let video_pages = self
            .lister
            .list_video_pages(urls.video_gallery.as_str())
            .await?;

        for page_url in &video_pages {
            if !self.gate(&mut started).await {
                return Ok(self.cancelled(report));
            }
            if let Err(e) = self.download_video(page_url, &videos_dir, &mut report).await {
                self.handle_failure(page_url, e, &mut report)?;
            }
        }

        let notes_dir = course_dir.join("notes");
        let note_pairs = self
            .lister
            .list_note_pairs(urls.lecture_notes.as_str())
            .await?;

        for pair in &note_pairs {
            for note_url in pair.urls() {
                if !self.gate(&mut started).await {
                    return Ok(self.cancelled(report));
                }
                if let Err(e) = self.download_note(note_url, &notes_dir, &mut report).await {
                    self.handle_failure(note_url, e, &mut report)?;
                }
            }
        }

        info!(
            "课程下载结束: 新下载 {} 个, 已存在 {} 个, 失败 {} 个, 字幕缺失 {} 个",
            report.fetched.len(),
            report.already_present.len(),
            report.failures.len(),
            report.subtitle_warnings.len()
        );
        Ok(report)
    }

    /// 文件之间的关卡：检查取消，必要时随机等待
    async fn gate(&self, started: &mut bool) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if *started && !self.options.pacer.pause(&self.cancel).await {
            return false;
        }
        *started = true;
        true
    }

    fn cancelled(&self, mut report: CrawlReport) -> CrawlReport {
        warn!("下载已取消，已完成的文件保留在 {:?}", report.course_dir);
        report.cancelled = true;
        report
    }

    fn handle_failure(
        &self,
        url: &str,
        err: CrawlError,
        report: &mut CrawlReport,
    ) -> Result<(), CrawlError> {
        match self.options.failure_policy {
            FailurePolicy::Abort => Err(err),
            FailurePolicy::Continue => {
                error!("下载失败，继续下一个: {}: {}", url, err);
                report.failures.push(ArtifactFailure {
                    url: url.to_string(),
                    error: err.to_string(),
                });
                Ok(())
            }
        }
    }

    /// 视频页 → 视频文件 + 字幕，保存到 `videos/<标题>/`
    async fn download_video(
        &self,
        page_url: &str,
        videos_dir: &Path,
        report: &mut CrawlReport,
    ) -> Result<(), CrawlError> {
        let page = self.lister.resolve_video_page(page_url).await?;
        let folder = videos_dir.join(lecture_folder_name(&page.title));

        let outcome = self.fetcher.fetch_to_disk(&page.video_url, &folder).await?;
        info!("视频: {} -> {:?}", page.video_url, outcome.path());
        report.record(outcome);

        let subtitle_url = match (&page.subtitle_url, self.options.subtitle_policy) {
            (_, SubtitlePolicy::Skip) => return Ok(()),
            (None, _) => {
                warn!("视频页没有字幕: {}", page_url);
                return Ok(());
            }
            (Some(url), _) => url,
        };

        match self.fetcher.fetch_to_disk(subtitle_url, &folder).await {
            Ok(outcome) => {
                info!("字幕: {} -> {:?}", subtitle_url, outcome.path());
                report.record(outcome);
                Ok(())
            }
            Err(e) if self.options.subtitle_policy == SubtitlePolicy::BestEffort => {
                warn!("字幕下载失败，忽略: {}: {}", subtitle_url, e);
                report.subtitle_warnings.push(ArtifactFailure {
                    url: subtitle_url.clone(),
                    error: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 讲义页 → 讲义文件，保存到 `notes/`
    async fn download_note(
        &self,
        page_url: &str,
        notes_dir: &Path,
        report: &mut CrawlReport,
    ) -> Result<(), CrawlError> {
        let file_url = self.lister.resolve_note_page(page_url).await?;
        let outcome = self.fetcher.fetch_to_disk(&file_url, notes_dir).await?;
        info!("讲义: {} -> {:?}", file_url, outcome.path());
        report.record(outcome);
        Ok(())
    }
}
