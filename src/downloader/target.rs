// 下载目标与本地文件名推导

use crate::downloader::FetchError;
use reqwest::Url;
use std::path::PathBuf;

/// 文件名中不允许出现的字符，统一替换为 '_'
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// 下载目标：远程 URL + 本地目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// 绝对 http(s) URL
    pub url: Url,
    /// 保存目录（可以尚不存在）
    pub directory: PathBuf,
}

impl DownloadTarget {
    pub fn new(url: &str, directory: impl Into<PathBuf>) -> Result<Self, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        Ok(Self {
            url: parsed,
            directory: directory.into(),
        })
    }

    pub fn local_filename(&self) -> Result<String, FetchError> {
        local_filename(&self.url)
    }

    /// 目标文件的完整本地路径
    pub fn local_path(&self) -> Result<PathBuf, FetchError> {
        Ok(self.directory.join(self.local_filename()?))
    }
}

/// 由 URL 推导本地文件名
///
/// 取 URL 路径最后一个 '/' 之后的部分（不含查询串和片段），
/// 做百分号解码并替换文件系统不安全字符。结果只依赖 URL 本身，
/// 同一个 URL 永远得到同一个文件名，"已存在即跳过" 依赖这一点。
pub fn local_filename(url: &Url) -> Result<String, FetchError> {
    let raw = url.path().rsplit('/').next().unwrap_or_default();

    let decoded = urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string());

    let name = sanitize_component(&decoded);
    if name.is_empty() || name == "." || name == ".." {
        return Err(FetchError::EmptyFilename(url.to_string()));
    }

    Ok(name)
}

/// 把任意字符串清理成单级路径组件
///
/// 也用于讲座标题目录名
pub fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn name_of(url: &str) -> Result<String, FetchError> {
        DownloadTarget::new(url, "out")?.local_filename()
    }

    #[test]
    fn test_basename_is_last_segment() {
        assert_eq!(
            name_of("https://example.edu/courses/demo/lec01.mp4").unwrap(),
            "lec01.mp4"
        );
        assert_eq!(
            name_of("https://example.edu/a/b/c/notes.pdf?download=1#page=2").unwrap(),
            "notes.pdf"
        );
    }

    #[test]
    fn test_percent_decoding_and_sanitizing() {
        assert_eq!(
            name_of("https://example.edu/files/Lecture%201%20Notes.pdf").unwrap(),
            "Lecture 1 Notes.pdf"
        );
        // %2F 解码为 '/'，不能逃出目标目录
        assert_eq!(
            name_of("https://example.edu/files/a%2Fb.txt").unwrap(),
            "a_b.txt"
        );
    }

    #[test]
    fn test_empty_basename_rejected() {
        assert!(matches!(
            name_of("https://example.edu/courses/demo/"),
            Err(FetchError::EmptyFilename(_))
        ));
        assert!(matches!(
            name_of("https://example.edu"),
            Err(FetchError::EmptyFilename(_))
        ));
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            DownloadTarget::new("not a url", "out"),
            Err(FetchError::InvalidUrl(_))
        ));
        assert!(matches!(
            DownloadTarget::new("ftp://example.edu/file.bin", "out"),
            Err(FetchError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_local_path_joins_directory() {
        let target = DownloadTarget::new("https://example.edu/x/y.vtt", "/tmp/course/videos").unwrap();
        assert_eq!(
            target.local_path().unwrap(),
            PathBuf::from("/tmp/course/videos/y.vtt")
        );
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("  Lecture 1: Intro  "), "Lecture 1_ Intro");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
    }

    proptest! {
        // 文件名只由 URL 决定，与目录无关
        #[test]
        fn prop_filename_depends_only_on_url(
            segment in "[A-Za-z0-9._%-]{1,24}",
            dir_a in "[a-z]{1,8}",
            dir_b in "[a-z]{1,8}",
        ) {
            let url = format!("https://example.edu/files/{}", segment);
            let a = DownloadTarget::new(&url, dir_a).unwrap().local_filename();
            let b = DownloadTarget::new(&url, dir_b).unwrap().local_filename();
            match (a, b) {
                (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
                (Err(_), Err(_)) => {}
                _ => prop_assert!(false, "同一 URL 的推导结果不一致"),
            }
        }
    }
}
