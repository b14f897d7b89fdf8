// OCW Course Downloader Library
// 公开课课程资料下载核心库

// 配置管理模块
pub mod config;

// 课程页面解析与批量下载模块
pub mod course;

// 单文件下载模块
pub mod downloader;

// 日志模块
pub mod logging;

// 导出常用类型
pub use config::AppConfig;
pub use course::{
    CourseDownloader, CourseUrls, CrawlError, CrawlOptions, CrawlReport, FailurePolicy,
    OcwLister, Pacer, PageLister, SubtitlePolicy,
};
pub use downloader::{DownloadHandler, FetchError, FetchOutcome, FileFetcher};
