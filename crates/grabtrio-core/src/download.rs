//! Download session flow: status message, downloader call, delivery, cleanup.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    config::Config,
    domain::{ChatId, MessageRef, UserId},
    errors::Error,
    messaging::{port::MessagingPort, types::ChatAction},
    preset::QualityPreset,
    session::SessionStore,
    texts,
};

/// File name of the single output inside each arena.
pub const OUTPUT_FILE_NAME: &str = "video.mp4";
pub const MERGE_OUTPUT_FORMAT: &str = "mp4";

/// Everything the downloader needs for one fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadJob {
    pub url: String,
    pub format_selector: &'static str,
    pub output_path: PathBuf,
    pub no_playlist: bool,
    pub merge_output_format: &'static str,
    pub cookies: Option<PathBuf>,
}

/// Failure reported by a downloader, surfaced to the user verbatim.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{detail}")]
pub struct FetchError {
    pub detail: String,
}

impl FetchError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// External fetch + mux engine.
///
/// On success exactly one file exists at `job.output_path`. On failure the
/// path may be missing or hold a partial file.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, job: &DownloadJob) -> std::result::Result<(), FetchError>;
}

/// Why a download flow did not deliver a video.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("no URL stored for this user")]
    MissingSession,

    #[error("download failed: {0}")]
    Adapter(String),

    #[error("file too large to upload: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error(transparent)]
    Transport(#[from] Error),
}

impl DownloadError {
    /// Text placed in the status message when the flow fails.
    pub fn user_detail(&self) -> String {
        match self {
            DownloadError::MissingSession => texts::NO_URL_FOUND.to_string(),
            DownloadError::Adapter(detail) => detail.clone(),
            DownloadError::TooLarge { size, limit } => format!(
                "File is too large to send: {} (limit {})",
                format_megabytes(*size),
                format_megabytes(*limit)
            ),
            DownloadError::Transport(e) => e.to_string(),
        }
    }
}

fn format_megabytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

/// One quality selection, built from the callback and consumed by the flow.
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub callback_id: String,
    pub preset: QualityPreset,
}

/// Successful delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivered {
    pub video: MessageRef,
    pub bytes: u64,
}

/// Per-request scratch directory holding the downloader output.
///
/// The directory name is unique per request, so concurrent downloads never
/// share a path. Dropping the arena removes the directory and its contents.
#[derive(Debug)]
pub struct DownloadArena {
    dir: TempDir,
    output_path: PathBuf,
}

impl DownloadArena {
    pub async fn allocate(root: PathBuf) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&root).await?;
        tokio::task::spawn_blocking(move || -> std::io::Result<Self> {
            let dir = tempfile::Builder::new().prefix("dl-").tempdir_in(&root)?;
            let output_path = dir.path().join(OUTPUT_FILE_NAME);
            Ok(Self { dir, output_path })
        })
        .await
        .map_err(std::io::Error::other)?
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Remove the directory on the blocking pool, logging (not returning) failures.
    pub async fn release(self) {
        let path = self.dir.path().to_path_buf();
        let dir = self.dir;
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "failed to remove download directory")
            }
            Err(e) => warn!(path = %path.display(), error = %e, "download cleanup task failed"),
        }
    }
}

/// Knobs the flow takes from the process config.
#[derive(Clone, Debug)]
pub struct FlowSettings {
    pub temp_dir: PathBuf,
    pub cookies: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// Zero disables the check.
    pub max_upload_bytes: u64,
}

impl From<&Config> for FlowSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            temp_dir: cfg.temp_dir.clone(),
            cookies: cfg.ytdlp_cookies.clone(),
            timeout: cfg.download_timeout,
            max_upload_bytes: cfg.max_upload_bytes,
        }
    }
}

pub struct DownloadFlow {
    sessions: Arc<dyn SessionStore>,
    downloader: Arc<dyn Downloader>,
    messenger: Arc<dyn MessagingPort>,
    settings: FlowSettings,
}

impl DownloadFlow {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        downloader: Arc<dyn Downloader>,
        messenger: Arc<dyn MessagingPort>,
        settings: FlowSettings,
    ) -> Self {
        Self {
            sessions,
            downloader,
            messenger,
            settings,
        }
    }

    /// Run the flow on its own task so the caller can keep accepting updates.
    pub fn spawn(
        self: &Arc<Self>,
        req: DownloadRequest,
    ) -> JoinHandle<std::result::Result<Delivered, DownloadError>> {
        let flow = Arc::clone(self);
        tokio::spawn(async move {
            let user_id = req.user_id.0;
            let chat_id = req.chat_id.0;
            let preset = req.preset;
            let res = flow.run(req).await;
            match &res {
                Ok(d) => info!(user_id, chat_id, %preset, bytes = d.bytes, "video delivered"),
                Err(DownloadError::MissingSession) => {
                    info!(user_id, chat_id, %preset, "quality selected without a stored URL")
                }
                Err(e) => warn!(user_id, chat_id, %preset, error = %e, "download failed"),
            }
            res
        })
    }

    pub async fn run(
        &self,
        req: DownloadRequest,
    ) -> std::result::Result<Delivered, DownloadError> {
        let Some(url) = self.sessions.get(req.user_id).await else {
            if let Err(e) = self
                .messenger
                .answer_callback_query(&req.callback_id, Some(texts::NO_URL_FOUND))
                .await
            {
                warn!(error = %e, "failed to answer callback");
            }
            return Err(DownloadError::MissingSession);
        };

        let label = req.preset.label();
        if let Err(e) = self
            .messenger
            .answer_callback_query(&req.callback_id, Some(&texts::downloading_toast(label)))
            .await
        {
            warn!(error = %e, "failed to answer callback");
        }
        let status = self
            .messenger
            .send_html(req.chat_id, &texts::downloading_status(label))
            .await?;

        info!(
            user_id = req.user_id.0,
            chat_id = req.chat_id.0,
            preset = %req.preset,
            url = %url,
            "download started"
        );

        let result = match DownloadArena::allocate(self.settings.temp_dir.clone()).await {
            Ok(arena) => {
                let res = self.fetch_and_upload(&req, url, &arena).await;
                arena.release().await;
                res
            }
            Err(e) => Err(DownloadError::Adapter(format!(
                "could not prepare download directory: {e}"
            ))),
        };

        match result {
            Ok(delivered) => {
                self.finish_status(status, texts::DOWNLOAD_COMPLETE).await?;
                Ok(delivered)
            }
            Err(err) => {
                if let Err(e) = self
                    .finish_status(status, &texts::download_error(&err.user_detail()))
                    .await
                {
                    warn!(error = %e, "failed to update status message");
                }
                Err(err)
            }
        }
    }

    /// Replace the status text, or follow up with a new message when the
    /// transport cannot edit.
    async fn finish_status(&self, status: MessageRef, html: &str) -> crate::Result<()> {
        if self.messenger.capabilities().supports_edit {
            self.messenger.edit_html(status, html).await
        } else {
            self.messenger.send_html(status.chat_id, html).await.map(|_| ())
        }
    }

    async fn fetch_and_upload(
        &self,
        req: &DownloadRequest,
        url: String,
        arena: &DownloadArena,
    ) -> std::result::Result<Delivered, DownloadError> {
        let job = DownloadJob {
            url,
            format_selector: req.preset.format_selector(),
            output_path: arena.output_path().to_path_buf(),
            no_playlist: true,
            merge_output_format: MERGE_OUTPUT_FORMAT,
            cookies: self.settings.cookies.clone(),
        };

        let fetch = self.downloader.download(&job);
        let fetched = match self.settings.timeout {
            Some(limit) => tokio::time::timeout(limit, fetch).await.map_err(|_| {
                DownloadError::Adapter(format!(
                    "download timed out after {}s",
                    limit.as_secs()
                ))
            })?,
            None => fetch.await,
        };
        fetched.map_err(|e| DownloadError::Adapter(e.detail))?;

        let size = tokio::fs::metadata(&job.output_path)
            .await
            .map_err(|_| {
                DownloadError::Adapter("downloader finished without producing a file".to_string())
            })?
            .len();
        let limit = self.settings.max_upload_bytes;
        if limit > 0 && size > limit {
            return Err(DownloadError::TooLarge { size, limit });
        }

        if self.messenger.capabilities().supports_chat_actions {
            if let Err(e) = self
                .messenger
                .send_chat_action(req.chat_id, ChatAction::UploadVideo)
                .await
            {
                warn!(error = %e, "failed to send chat action");
            }
        }
        let video = self
            .messenger
            .send_video(req.chat_id, &job.output_path)
            .await?;

        Ok(Delivered { video, bytes: size })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::session::InMemorySessionStore;

    struct Harness {
        _root: TempDir,
        sessions: Arc<InMemorySessionStore>,
        downloader: Arc<FakeDownloader>,
        messenger: Arc<FakeMessenger>,
        flow: Arc<DownloadFlow>,
    }

    fn harness_with(
        downloader: FakeDownloader,
        messenger: FakeMessenger,
        tweak: impl FnOnce(&mut FlowSettings),
    ) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let sessions = Arc::new(InMemorySessionStore::new());
        let downloader = Arc::new(downloader);
        let messenger = Arc::new(messenger);
        let mut settings = FlowSettings {
            temp_dir: root.path().join("arenas"),
            cookies: None,
            timeout: None,
            max_upload_bytes: 50 * 1024 * 1024,
        };
        tweak(&mut settings);
        let flow = Arc::new(DownloadFlow::new(
            sessions.clone(),
            downloader.clone(),
            messenger.clone(),
            settings,
        ));
        Harness {
            _root: root,
            sessions,
            downloader,
            messenger,
            flow,
        }
    }

    fn harness(downloader: FakeDownloader) -> Harness {
        harness_with(downloader, FakeMessenger::default(), |_| {})
    }

    fn request(preset: QualityPreset) -> DownloadRequest {
        DownloadRequest {
            chat_id: ChatId(10),
            user_id: UserId(1),
            callback_id: "cb1".to_string(),
            preset,
        }
    }

    #[tokio::test]
    async fn missing_session_never_calls_downloader() {
        for preset in QualityPreset::ALL {
            let h = harness(FakeDownloader::default());
            let err = h.flow.run(request(preset)).await.unwrap_err();

            assert!(matches!(err, DownloadError::MissingSession));
            assert!(h.downloader.jobs().is_empty());
            assert_eq!(
                h.messenger.sent(),
                vec![Sent::Answer(
                    "cb1".to_string(),
                    Some(texts::NO_URL_FOUND.to_string())
                )]
            );
        }
    }

    #[tokio::test]
    async fn success_sends_video_and_edits_status() {
        let h = harness(FakeDownloader::default());
        h.sessions
            .put(UserId(1), "https://example.com/v1".to_string())
            .await;

        let delivered = h.flow.run(request(QualityPreset::P720)).await.unwrap();
        assert_eq!(delivered.bytes, b"fake mp4 bytes".len() as u64);

        let jobs = h.downloader.jobs();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.url, "https://example.com/v1");
        assert_eq!(job.format_selector, "bv*[height<=720]+ba/b[height<=720]");
        assert!(job.no_playlist);
        assert_eq!(job.merge_output_format, "mp4");

        let sent = h.messenger.sent();
        assert_eq!(
            sent[0],
            Sent::Answer("cb1".to_string(), Some("Downloading 720p…".to_string()))
        );
        assert_eq!(
            sent[1],
            Sent::Html(ChatId(10), "⬇️ Downloading video (720p)…".to_string())
        );
        assert_eq!(h.messenger.videos(), vec![job.output_path.clone()]);
        assert_eq!(h.messenger.edits(), vec![texts::DOWNLOAD_COMPLETE.to_string()]);

        // Status edit targets the status message, not the video.
        let Sent::Edit(edited, _) = sent.last().unwrap() else {
            panic!("expected final edit, got {sent:?}");
        };
        assert_eq!(edited.message_id, crate::domain::MessageId(1));

        assert!(!job.output_path.exists());
        assert!(!job.output_path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn adapter_failure_edits_status_with_detail_and_cleans_up() {
        let h = harness(FakeDownloader::failing(
            "ExtractionError: unsupported site",
        ));
        h.sessions
            .put(UserId(1), "https://example.com/v1".to_string())
            .await;

        let err = h.flow.run(request(QualityPreset::P720)).await.unwrap_err();
        assert!(matches!(err, DownloadError::Adapter(ref d) if d.contains("unsupported site")));

        assert!(h.messenger.videos().is_empty());
        let edits = h.messenger.edits();
        assert_eq!(edits.len(), 1);
        assert!(edits[0].starts_with("❌ Download error:"));
        assert!(edits[0].contains("unsupported site"));

        let job = &h.downloader.jobs()[0];
        assert!(!job.output_path.exists());
    }

    #[tokio::test]
    async fn missing_output_file_is_an_adapter_failure() {
        let h = harness(FakeDownloader::without_output());
        h.sessions
            .put(UserId(1), "https://example.com/v1".to_string())
            .await;

        let err = h.flow.run(request(QualityPreset::Best)).await.unwrap_err();
        assert!(matches!(err, DownloadError::Adapter(_)));
        assert!(h.messenger.videos().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_reports_transport_error_and_cleans_up() {
        let h = harness_with(
            FakeDownloader::default(),
            FakeMessenger::rejecting_videos(),
            |_| {},
        );
        h.sessions
            .put(UserId(1), "https://example.com/v1".to_string())
            .await;

        let err = h.flow.run(request(QualityPreset::P1080)).await.unwrap_err();
        assert!(matches!(err, DownloadError::Transport(_)));
        let edits = h.messenger.edits();
        assert_eq!(edits.len(), 1);
        assert!(edits[0].contains("Request Entity Too Large"));
        assert!(!h.downloader.jobs()[0].output_path.exists());
    }

    #[tokio::test]
    async fn oversized_file_is_not_uploaded() {
        let h = harness_with(FakeDownloader::default(), FakeMessenger::default(), |s| {
            s.max_upload_bytes = 4;
        });
        h.sessions
            .put(UserId(1), "https://example.com/v1".to_string())
            .await;

        let err = h.flow.run(request(QualityPreset::P1080)).await.unwrap_err();
        assert!(matches!(err, DownloadError::TooLarge { limit: 4, .. }));
        assert!(h.messenger.videos().is_empty());
        assert!(h.messenger.edits()[0].contains("too large"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_reported_as_adapter_failure() {
        let h = harness_with(
            FakeDownloader::slow(Duration::from_secs(600)),
            FakeMessenger::default(),
            |s| s.timeout = Some(Duration::from_secs(30)),
        );
        h.sessions
            .put(UserId(1), "https://example.com/v1".to_string())
            .await;

        let err = h.flow.run(request(QualityPreset::Best)).await.unwrap_err();
        assert!(matches!(err, DownloadError::Adapter(ref d) if d.contains("timed out")));
        assert!(!h.downloader.jobs()[0].output_path.exists());
    }

    #[tokio::test]
    async fn cookies_are_forwarded_to_the_job() {
        let h = harness_with(FakeDownloader::default(), FakeMessenger::default(), |s| {
            s.cookies = Some(PathBuf::from("/etc/grabtrio/cookies.txt"));
        });
        h.sessions
            .put(UserId(1), "https://example.com/v1".to_string())
            .await;

        h.flow.run(request(QualityPreset::Best)).await.unwrap();
        assert_eq!(
            h.downloader.jobs()[0].cookies,
            Some(PathBuf::from("/etc/grabtrio/cookies.txt"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_downloads_use_distinct_paths() {
        let h = harness(FakeDownloader::slow(Duration::from_millis(20)));
        for user in 1..=8 {
            h.sessions
                .put(UserId(user), format!("https://example.com/{user}"))
                .await;
        }

        let handles: Vec<_> = (1..=8)
            .map(|user| {
                h.flow.spawn(DownloadRequest {
                    chat_id: ChatId(user),
                    user_id: UserId(user),
                    callback_id: format!("cb{user}"),
                    preset: QualityPreset::Best,
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut paths: Vec<PathBuf> = h
            .downloader
            .jobs()
            .into_iter()
            .map(|j| j.output_path)
            .collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 8);
        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn arena_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let arena = DownloadArena::allocate(root.path().join("nested"))
            .await
            .unwrap();
        std::fs::write(arena.output_path(), b"x").unwrap();
        let dir = arena.path().to_path_buf();
        assert!(dir.starts_with(root.path().join("nested")));

        drop(arena);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn arena_release_removes_directory_and_contents() {
        let root = tempfile::tempdir().unwrap();
        let arena = DownloadArena::allocate(root.path().to_path_buf())
            .await
            .unwrap();
        tokio::fs::write(arena.output_path(), vec![0u8; 64 * 1024])
            .await
            .unwrap();
        let dir = arena.path().to_path_buf();

        arena.release().await;
        assert!(!dir.exists());
        assert!(root.path().exists());
    }

    #[tokio::test]
    async fn failed_chat_action_does_not_stop_the_upload() {
        let h = harness_with(
            FakeDownloader::default(),
            FakeMessenger::with_failing_chat_actions(),
            |_| {},
        );
        h.sessions
            .put(UserId(1), "https://example.com/v1".to_string())
            .await;

        h.flow.run(request(QualityPreset::Best)).await.unwrap();
        let sent = h.messenger.sent();
        assert!(sent.contains(&Sent::Action(ChatId(10), ChatAction::UploadVideo)));
        assert_eq!(h.messenger.videos().len(), 1);
        assert_eq!(h.messenger.edits(), vec![texts::DOWNLOAD_COMPLETE.to_string()]);
    }

    #[tokio::test]
    async fn final_status_is_sent_as_new_message_without_edit_support() {
        let h = harness_with(
            FakeDownloader::default(),
            FakeMessenger::without_edits(),
            |_| {},
        );
        h.sessions
            .put(UserId(1), "https://example.com/v1".to_string())
            .await;

        h.flow.run(request(QualityPreset::P720)).await.unwrap();
        let sent = h.messenger.sent();
        assert!(h.messenger.edits().is_empty());
        assert_eq!(
            sent.last(),
            Some(&Sent::Html(ChatId(10), texts::DOWNLOAD_COMPLETE.to_string()))
        );
    }
}
