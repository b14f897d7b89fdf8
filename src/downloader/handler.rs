// 单文件下载处理器

use crate::downloader::progress::{NoProgress, ProgressObserver, TransferProgress};
use crate::downloader::{DownloadTarget, FetchError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// 默认写入块大小: 8KB
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// 默认读取空闲超时：连续这么久没有收到数据即视为连接失效
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// 下载结果
///
/// 两种情况都带有同一个本地路径，调用方可以区分是否真的发生了传输
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 本次从网络下载并写入
    Fetched { path: PathBuf, bytes: u64 },
    /// 本地已存在，未发起任何请求
    AlreadyPresent { path: PathBuf },
}

impl FetchOutcome {
    pub fn path(&self) -> &Path {
        match self {
            FetchOutcome::Fetched { path, .. } | FetchOutcome::AlreadyPresent { path } => path,
        }
    }

    pub fn was_fetched(&self) -> bool {
        matches!(self, FetchOutcome::Fetched { .. })
    }
}

/// 把远程文件落地到本地目录的能力
///
/// 批量下载流程只依赖这个 trait，测试中可以替换为记录调用顺序的实现
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch_to_disk(&self, url: &str, directory: &Path) -> Result<FetchOutcome, FetchError>;
}

/// 下载处理器
///
/// - 目标文件已存在时直接返回，不发起请求（不校验大小/哈希）
/// - 先校验响应状态码，再创建目标文件，失败时不会留下空文件
/// - 按固定块大小流式写入，并上报进度
#[derive(Clone)]
pub struct DownloadHandler {
    /// HTTP 客户端（已携带配置的 User-Agent）
    client: Client,
    /// 写入块大小
    chunk_size: usize,
    /// 两次收到数据之间允许的最长间隔，None 表示不限制
    idle_timeout: Option<Duration>,
    /// 进度观察者
    observer: Arc<dyn ProgressObserver>,
}

impl DownloadHandler {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            observer: Arc::new(NoProgress),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout.filter(|d| !d.is_zero());
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// 确保 `url` 对应的文件存在于 `directory` 下，返回本地路径
    pub async fn fetch_to_disk(
        &self,
        url: &str,
        directory: &Path,
    ) -> Result<FetchOutcome, FetchError> {
        let target = DownloadTarget::new(url, directory)?;
        let local_path = target.local_path()?;

        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|e| FetchError::io(directory, e))?;

        let exists = tokio::fs::try_exists(&local_path)
            .await
            .map_err(|e| FetchError::io(&local_path, e))?;
        if exists {
            warn!("{:?} 已存在，跳过", local_path);
            return Ok(FetchOutcome::AlreadyPresent { path: local_path });
        }

        let response = self
            .client
            .get(target.url.clone())
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        // 必须在创建文件之前检查状态码
        let status = response.status();
        debug!("响应状态: {} ({})", status, url);
        if !status.is_success() {
            return Err(FetchError::Transfer {
                status,
                url: url.to_string(),
            });
        }

        let total_bytes = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        // 先写到 `<文件名>.part`，完整写完再改名；进程被强制结束时留下的
        // 只有 .part 文件，不会被下次运行当成已完成
        let part_path = partial_path(&local_path);
        let mut file = File::create(&part_path)
            .await
            .map_err(|e| FetchError::io(&part_path, e))?;

        self.observer.on_start(url, total_bytes);
        let mut progress = TransferProgress::new(total_bytes);

        let result = self
            .stream_body(response, &mut file, &part_path, &mut progress)
            .await;
        drop(file);

        let result = match result {
            Ok(()) => tokio::fs::rename(&part_path, &local_path)
                .await
                .map_err(|e| FetchError::io(&local_path, e)),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if let Err(remove_err) = tokio::fs::remove_file(&part_path).await {
                warn!("删除不完整文件失败: {:?}, 错误: {}", part_path, remove_err);
            }
            self.observer.on_finish(progress);
            return Err(e);
        }

        self.observer.on_finish(progress);

        if let Some(total) = total_bytes {
            if progress.bytes_transferred != total {
                warn!(
                    "文件大小与 Content-Length 不一致: 实际 {} bytes, 期望 {} bytes ({:?})",
                    progress.bytes_transferred, total, local_path
                );
            }
        }

        info!("已下载 {} -> {:?}", url, local_path);
        Ok(FetchOutcome::Fetched {
            path: local_path,
            bytes: progress.bytes_transferred,
        })
    }

    /// 流式读取响应体并按块写入文件
    async fn stream_body(
        &self,
        response: reqwest::Response,
        file: &mut File,
        local_path: &Path,
        progress: &mut TransferProgress,
    ) -> Result<(), FetchError> {
        let url = response.url().to_string();
        let mut stream = response.bytes_stream();

        loop {
            // reqwest 0.11 没有读取超时，在这里按块计时
            let next = match self.idle_timeout {
                Some(idle) => tokio::time::timeout(idle, stream.next())
                    .await
                    .map_err(|_| FetchError::Stalled {
                        url: url.clone(),
                        idle,
                    })?,
                None => stream.next().await,
            };
            let Some(chunk_result) = next else {
                break;
            };
            let data = chunk_result.map_err(|e| FetchError::network(&url, e))?;

            for piece in data.chunks(self.chunk_size) {
                file.write_all(piece)
                    .await
                    .map_err(|e| FetchError::io(local_path, e))?;

                progress.bytes_transferred += piece.len() as u64;
                self.observer.on_advance(*progress);
            }
        }

        file.flush()
            .await
            .map_err(|e| FetchError::io(local_path, e))?;

        Ok(())
    }
}

/// 下载中的临时文件：`lec01.mp4` -> `lec01.mp4.part`
fn partial_path(local_path: &Path) -> PathBuf {
    let mut name = local_path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl FileFetcher for DownloadHandler {
    async fn fetch_to_disk(&self, url: &str, directory: &Path) -> Result<FetchOutcome, FetchError> {
        DownloadHandler::fetch_to_disk(self, url, directory).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_UA: &str = "Mozilla/5.0 (test-agent)";

    /// 记录所有进度事件
    #[derive(Default)]
    struct RecordingProgress {
        starts: Mutex<Vec<Option<u64>>>,
        advances: Mutex<Vec<TransferProgress>>,
        finishes: Mutex<Vec<TransferProgress>>,
    }

    impl ProgressObserver for RecordingProgress {
        fn on_start(&self, _url: &str, total_bytes: Option<u64>) {
            self.starts.lock().unwrap().push(total_bytes);
        }
        fn on_advance(&self, progress: TransferProgress) {
            self.advances.lock().unwrap().push(progress);
        }
        fn on_finish(&self, progress: TransferProgress) {
            self.finishes.lock().unwrap().push(progress);
        }
    }

    fn test_client() -> Client {
        Client::builder().user_agent(TEST_UA).build().unwrap()
    }

    fn body_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_fetch_writes_file_and_sends_user_agent() {
        let server = MockServer::start().await;
        let body = body_of(20_000);
        Mock::given(method("GET"))
            .and(path("/files/lec01.mp4"))
            .and(header("user-agent", TEST_UA))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("videos").join("Lecture 1");
        let handler = DownloadHandler::new(test_client());

        let url = format!("{}/files/lec01.mp4", server.uri());
        let outcome = handler.fetch_to_disk(&url, &dest).await.unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                path: dest.join("lec01.mp4"),
                bytes: body.len() as u64
            }
        );
        assert_eq!(std::fs::read(outcome.path()).unwrap(), body);
    }

    #[tokio::test]
    async fn test_second_call_is_skipped_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/notes/lec02.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let handler = DownloadHandler::new(test_client());
        let url = format!("{}/notes/lec02.pdf", server.uri());

        let first = handler.fetch_to_disk(&url, dir.path()).await.unwrap();
        let second = handler.fetch_to_disk(&url, dir.path()).await.unwrap();

        assert!(first.was_fetched());
        assert_eq!(
            second,
            FetchOutcome::AlreadyPresent {
                path: first.path().to_path_buf()
            }
        );
        // expect(1) 在 server drop 时校验请求次数
    }

    #[tokio::test]
    async fn test_existing_file_is_trusted_as_is() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"full content".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("partial.bin");
        std::fs::write(&existing, b"par").unwrap();

        let handler = DownloadHandler::new(test_client());
        let url = format!("{}/data/partial.bin", server.uri());
        let outcome = handler.fetch_to_disk(&url, dir.path()).await.unwrap();

        // 不校验已有文件，截断的旧文件同样视为完成
        assert_eq!(outcome, FetchOutcome::AlreadyPresent { path: existing.clone() });
        assert_eq!(std::fs::read(&existing).unwrap(), b"par");
    }

    #[tokio::test]
    async fn test_error_status_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/missing.mp4"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let handler = DownloadHandler::new(test_client());
        let url = format!("{}/files/missing.mp4", server.uri());

        let err = handler.fetch_to_disk(&url, dir.path()).await.unwrap_err();
        match &err {
            FetchError::Transfer { status, url: err_url } => {
                assert_eq!(status.as_u16(), 404);
                assert_eq!(err_url, &url);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.status().map(|s| s.as_u16()), Some(404));

        // 目录保留，文件不存在（连空文件都没有）
        assert!(dir.path().exists());
        assert!(!dir.path().join("missing.mp4").exists());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_total() {
        let server = MockServer::start().await;
        let body = body_of(50_000);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let recorder = Arc::new(RecordingProgress::default());
        let handler = DownloadHandler::new(test_client()).with_observer(recorder.clone());
        let dir = TempDir::new().unwrap();
        let url = format!("{}/big.bin", server.uri());

        handler.fetch_to_disk(&url, dir.path()).await.unwrap();

        let total = body.len() as u64;
        assert_eq!(*recorder.starts.lock().unwrap(), vec![Some(total)]);

        let advances = recorder.advances.lock().unwrap();
        assert!(!advances.is_empty());
        let mut last = 0;
        for p in advances.iter() {
            assert!(p.bytes_transferred >= last);
            assert!(p.bytes_transferred - last <= DEFAULT_CHUNK_SIZE as u64);
            assert_eq!(p.total_bytes, Some(total));
            last = p.bytes_transferred;
        }
        assert_eq!(last, total);

        let finishes = recorder.finishes.lock().unwrap();
        assert_eq!(finishes.len(), 1);
        assert_eq!(finishes[0].bytes_transferred, total);
    }

    /// 手写 HTTP 响应的单连接服务器：写出响应头和 `body` 后，
    /// `hold` 为 None 时关闭连接，否则保持连接不再发送数据
    async fn spawn_raw_server(
        head: &'static str,
        body: Vec<u8>,
        hold: Option<Duration>,
    ) -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.flush().await.unwrap();
            match hold {
                Some(hold) => tokio::time::sleep(hold).await,
                None => {
                    let _ = socket.shutdown().await;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_unknown_size_completes_in_count_only_mode() {
        // 不带 Content-Length，响应体以关闭连接结束
        let body = body_of(10_000);
        let addr = spawn_raw_server(
            "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n",
            body.clone(),
            None,
        )
        .await;

        let recorder = Arc::new(RecordingProgress::default());
        let handler = DownloadHandler::new(test_client()).with_observer(recorder.clone());
        let dir = TempDir::new().unwrap();
        let url = format!("http://{}/stream/captions.vtt", addr);

        let outcome = handler.fetch_to_disk(&url, dir.path()).await.unwrap();

        assert!(outcome.was_fetched());
        assert_eq!(std::fs::read(outcome.path()).unwrap(), body);
        assert_eq!(*recorder.starts.lock().unwrap(), vec![None]);
        let finishes = recorder.finishes.lock().unwrap();
        assert_eq!(finishes[0].bytes_transferred, body.len() as u64);
        assert_eq!(finishes[0].total_bytes, None);
    }

    #[tokio::test]
    async fn test_truncated_body_removes_partial_file() {
        // 声明 100000 字节，只发送 20000 字节就断开
        let addr = spawn_raw_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 100000\r\nConnection: close\r\n\r\n",
            body_of(20_000),
            None,
        )
        .await;

        let recorder = Arc::new(RecordingProgress::default());
        let handler = DownloadHandler::new(test_client()).with_observer(recorder.clone());
        let dir = TempDir::new().unwrap();
        let url = format!("http://{}/media/lec03.mp4", addr);

        let err = handler.fetch_to_disk(&url, dir.path()).await.unwrap_err();

        assert!(matches!(err, FetchError::Network { .. }), "{err:?}");
        assert!(!dir.path().join("lec03.mp4").exists());
        assert!(!dir.path().join("lec03.mp4.part").exists());
        // 进度仍然正常收尾
        assert_eq!(recorder.finishes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_body_times_out_and_removes_partial_file() {
        // 发送一部分后保持连接但不再发送数据
        let addr = spawn_raw_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 100000\r\n\r\n",
            body_of(20_000),
            Some(Duration::from_secs(30)),
        )
        .await;

        let handler = DownloadHandler::new(test_client())
            .with_idle_timeout(Some(Duration::from_millis(300)));
        let dir = TempDir::new().unwrap();
        let url = format!("http://{}/media/lec04.mp4", addr);

        let err = handler.fetch_to_disk(&url, dir.path()).await.unwrap_err();

        match &err {
            FetchError::Stalled { url: err_url, idle } => {
                assert_eq!(err_url, &url);
                assert_eq!(*idle, Duration::from_millis(300));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_network());
        assert!(!dir.path().join("lec04.mp4").exists());
        assert!(!dir.path().join("lec04.mp4.part").exists());
    }

    #[tokio::test]
    async fn test_leftover_part_file_is_not_trusted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/notes/lec05.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-complete".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        // 上次运行被强制结束时留下的临时文件
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("lec05.pdf.part"), b"%PDF-").unwrap();

        let handler = DownloadHandler::new(test_client());
        let url = format!("{}/notes/lec05.pdf", server.uri());
        let outcome = handler.fetch_to_disk(&url, dir.path()).await.unwrap();

        assert!(outcome.was_fetched());
        assert_eq!(std::fs::read(outcome.path()).unwrap(), b"%PDF-complete");
        assert!(!dir.path().join("lec05.pdf.part").exists());
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/data/videos/lec01.mp4")),
            PathBuf::from("/data/videos/lec01.mp4.part")
        );
    }

    #[test]
    fn test_zero_idle_timeout_disables_it() {
        let handler = DownloadHandler::new(test_client()).with_idle_timeout(Some(Duration::ZERO));
        assert_eq!(handler.idle_timeout, None);
        let handler = DownloadHandler::new(test_client());
        assert_eq!(handler.idle_timeout, Some(DEFAULT_IDLE_TIMEOUT));
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        // 绑定后立即释放端口，连接会被拒绝
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let dir = TempDir::new().unwrap();
        let handler = DownloadHandler::new(test_client());
        let url = format!("http://127.0.0.1:{}/file.zip", port);

        let err = handler.fetch_to_disk(&url, dir.path()).await.unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
        assert!(!dir.path().join("file.zip").exists());
    }

    #[tokio::test]
    async fn test_directory_is_created_with_parents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("WEBVTT"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b").join("c");
        let handler = DownloadHandler::new(test_client());

        let outcome = handler
            .fetch_to_disk(&format!("{}/subs/en.vtt", server.uri()), &nested)
            .await
            .unwrap();

        assert_eq!(outcome.path(), nested.join("en.vtt"));
        assert_eq!(std::fs::read_to_string(nested.join("en.vtt")).unwrap(), "WEBVTT");
    }
}
