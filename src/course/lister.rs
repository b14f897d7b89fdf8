// 课程页面列举接口

use crate::course::types::{CrawlError, NotePair, VideoPage};
use async_trait::async_trait;

/// 课程页面列举器
///
/// 负责抓取并解析课程页面，产出按页面顺序排列的链接；
/// 批量下载流程只消费这些结果，不直接接触 HTML
#[async_trait]
pub trait PageLister: Send + Sync {
    /// 视频列表页 → 各讲座视频页地址
    async fn list_video_pages(&self, gallery_url: &str) -> Result<Vec<String>, CrawlError>;

    /// 讲义索引页 → (讲座讲义页, 习题课讲义页)
    async fn list_note_pairs(&self, notes_index_url: &str) -> Result<Vec<NotePair>, CrawlError>;

    /// 视频页 → 标题、视频下载地址、字幕地址
    async fn resolve_video_page(&self, page_url: &str) -> Result<VideoPage, CrawlError>;

    /// 讲义页 → 文件下载地址
    async fn resolve_note_page(&self, page_url: &str) -> Result<String, CrawlError>;
}
