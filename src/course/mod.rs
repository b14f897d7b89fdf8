// 课程抓取模块

pub mod crawler;
pub mod lister;
pub mod ocw;
pub mod pacing;
pub mod types;

pub use crawler::{
    ArtifactFailure, CourseDownloader, CrawlOptions, CrawlReport, FailurePolicy, SubtitlePolicy,
};
pub use lister::PageLister;
pub use ocw::OcwLister;
pub use pacing::Pacer;
pub use types::{
    CourseUrls, CrawlError, NotePair, ParseError, VideoPage, LECTURE_NOTES_PATH,
    VIDEO_GALLERY_PATH,
};
