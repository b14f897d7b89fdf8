//! OCW 课程站点页面解析
//!
//! 页面布局是固定的：
//! - 视频列表页：`a.video-link`
//! - 讲义索引页：表格每行（跳过表头）里文字含 "Lecture" / "Recitation" 的链接
//! - 视频页：`h2` 标题，`video[data-downloadlink]`，其中的 `track[kind=captions]` 为字幕
//! - 讲义页：`a.download-file`

use crate::course::lister::PageLister;
use crate::course::types::{CrawlError, NotePair, ParseError, VideoPage};
use crate::downloader::FetchError;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

/// 基于 HTTP + HTML 解析的页面列举器
#[derive(Debug, Clone)]
pub struct OcwLister {
    /// 与下载器共用同一套请求头配置
    client: Client,
}

impl OcwLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 获取页面 HTML
    async fn fetch_page(&self, url: &str) -> Result<(Url, String), CrawlError> {
        let page_url = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;

        let response = self
            .client
            .get(page_url.clone())
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transfer {
                status,
                url: url.to_string(),
            }
            .into());
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        debug!("页面获取成功: {} ({} bytes)", url, body.len());

        Ok((page_url, body))
    }
}

#[async_trait]
impl PageLister for OcwLister {
    async fn list_video_pages(&self, gallery_url: &str) -> Result<Vec<String>, CrawlError> {
        let (page_url, body) = self.fetch_page(gallery_url).await?;
        let pages = parse_video_gallery(&body, &page_url)?;
        info!("发现 {} 个讲座视频页", pages.len());
        Ok(pages)
    }

    async fn list_note_pairs(&self, notes_index_url: &str) -> Result<Vec<NotePair>, CrawlError> {
        let (page_url, body) = self.fetch_page(notes_index_url).await?;
        let pairs = parse_note_pairs(&body, &page_url)?;
        info!("发现 {} 行讲义", pairs.len());
        Ok(pairs)
    }

    async fn resolve_video_page(&self, page_url: &str) -> Result<VideoPage, CrawlError> {
        let (page_url, body) = self.fetch_page(page_url).await?;
        Ok(parse_video_page(&body, &page_url)?)
    }

    async fn resolve_note_page(&self, page_url: &str) -> Result<String, CrawlError> {
        let (page_url, body) = self.fetch_page(page_url).await?;
        Ok(parse_note_page(&body, &page_url)?)
    }
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Selector(format!("{css}: {e}")))
}

fn resolve(page_url: &Url, href: &str) -> Result<String, ParseError> {
    page_url
        .join(href.trim())
        .map(|u| u.to_string())
        .map_err(|_| ParseError::InvalidLink {
            page: page_url.to_string(),
            href: href.to_string(),
        })
}

fn missing(page_url: &Url, selector: &str) -> ParseError {
    ParseError::MissingElement {
        page: page_url.to_string(),
        selector: selector.to_string(),
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// 解析视频列表页
pub fn parse_video_gallery(html: &str, page_url: &Url) -> Result<Vec<String>, ParseError> {
    let doc = Html::parse_document(html);
    let links = selector("a.video-link[href]")?;

    doc.select(&links)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| resolve(page_url, href))
        .collect()
}

/// 解析讲义索引页
///
/// 第一行是表头；每一行都会产出一个 `NotePair`，即使两项都缺失
pub fn parse_note_pairs(html: &str, page_url: &Url) -> Result<Vec<NotePair>, ParseError> {
    let doc = Html::parse_document(html);
    let rows = selector("tr")?;
    let anchors = selector("a[href]")?;
    let lecture_re = Regex::new(r"Lecture").map_err(|e| ParseError::Selector(e.to_string()))?;
    let recitation_re =
        Regex::new(r"Recitation").map_err(|e| ParseError::Selector(e.to_string()))?;

    let find = |row: &ElementRef<'_>, re: &Regex| -> Result<Option<String>, ParseError> {
        row.select(&anchors)
            .find(|a| re.is_match(&element_text(a)))
            .and_then(|a| a.value().attr("href"))
            .map(|href| resolve(page_url, href))
            .transpose()
    };

    doc.select(&rows)
        .skip(1)
        .map(|row| {
            Ok(NotePair::new(
                find(&row, &lecture_re)?,
                find(&row, &recitation_re)?,
            ))
        })
        .collect()
}

/// 解析讲座视频页
pub fn parse_video_page(html: &str, page_url: &Url) -> Result<VideoPage, ParseError> {
    let doc = Html::parse_document(html);
    let title_sel = selector("h2")?;
    let video_sel = selector("video[data-downloadlink]")?;
    let track_sel = selector(r#"track[kind="captions"][src]"#)?;

    let title = doc
        .select(&title_sel)
        .next()
        .map(|h2| element_text(&h2))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| missing(page_url, "h2"))?;

    let video = doc
        .select(&video_sel)
        .next()
        .ok_or_else(|| missing(page_url, "video[data-downloadlink]"))?;

    let video_url = video
        .value()
        .attr("data-downloadlink")
        .map(|link| resolve(page_url, link))
        .transpose()?
        .ok_or_else(|| missing(page_url, "video[data-downloadlink]"))?;

    let subtitle_url = video
        .select(&track_sel)
        .next()
        .and_then(|track| track.value().attr("src"))
        .map(|src| resolve(page_url, src))
        .transpose()?;

    Ok(VideoPage {
        title,
        video_url,
        subtitle_url,
    })
}

/// 解析讲义页，返回文件下载地址
pub fn parse_note_page(html: &str, page_url: &Url) -> Result<String, ParseError> {
    let doc = Html::parse_document(html);
    let download_sel = selector("a.download-file[href]")?;

    let href = doc
        .select(&download_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .ok_or_else(|| missing(page_url, "a.download-file"))?;

    resolve(page_url, href)
}
