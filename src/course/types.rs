// 课程页面相关类型定义

use crate::downloader::FetchError;
use reqwest::Url;
use thiserror::Error;

/// 讲座视频列表页（相对课程根 URL）
pub const VIDEO_GALLERY_PATH: &str = "video_galleries/lecture-videos/";

/// 讲义索引页（相对课程根 URL）
pub const LECTURE_NOTES_PATH: &str = "pages/lecture-notes/";

/// 视频页解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPage {
    /// 讲座标题（作为子目录名）
    pub title: String,
    /// 视频文件下载链接
    pub video_url: String,
    /// 字幕链接（页面上可能没有）
    pub subtitle_url: Option<String>,
}

/// 讲义索引中的一行：讲座讲义 + 习题课讲义，任一项都可能缺失
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotePair {
    pub lecture: Option<String>,
    pub recitation: Option<String>,
}

impl NotePair {
    pub fn new(lecture: Option<String>, recitation: Option<String>) -> Self {
        Self { lecture, recitation }
    }

    /// 按 讲座 → 习题课 的顺序返回存在的链接，空字符串视为缺失
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        [self.lecture.as_deref(), self.recitation.as_deref()]
            .into_iter()
            .flatten()
            .filter(|url| !url.trim().is_empty())
    }
}

/// 页面结构解析错误
#[derive(Debug, Error)]
pub enum ParseError {
    /// 页面中找不到预期的元素
    #[error("页面 {page} 缺少元素: {selector}")]
    MissingElement { page: String, selector: String },

    /// 链接无法相对页面地址解析
    #[error("页面 {page} 中的链接无效: {href}")]
    InvalidLink { page: String, href: String },

    /// 课程地址无效
    #[error("无效的课程地址: {0}")]
    InvalidCourseUrl(String),

    #[error("选择器无效: {0}")]
    Selector(String),
}

/// 批量下载流程中的错误
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("本地目录操作失败: {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 由课程根 URL 派生出的各个地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseUrls {
    /// 课程根 URL（保证以 '/' 结尾）
    pub root: Url,
    /// 课程标识（根 URL 最后一个非空路径段）
    pub slug: String,
    /// 视频列表页
    pub video_gallery: Url,
    /// 讲义索引页
    pub lecture_notes: Url,
}

impl CourseUrls {
    pub fn parse(course_url: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidCourseUrl(course_url.to_string());

        let mut root = Url::parse(course_url.trim()).map_err(|_| invalid())?;
        if root.scheme() != "http" && root.scheme() != "https" {
            return Err(invalid());
        }

        // 没有结尾 '/' 时 join 会替换掉最后一段
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }

        let slug = root
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(|s| {
                urlencoding::decode(s)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            })
            .ok_or_else(invalid)?;

        let video_gallery = root.join(VIDEO_GALLERY_PATH).map_err(|_| invalid())?;
        let lecture_notes = root.join(LECTURE_NOTES_PATH).map_err(|_| invalid())?;

        Ok(Self {
            root,
            slug,
            video_gallery,
            lecture_notes,
        })
    }
}
