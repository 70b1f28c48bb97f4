//! Fetches one track's audio and cover into the library

use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::error::DownloadError;
use super::events::DownloadEvent;
use super::queue::TransferProgress;
use crate::catalog::{PersistedTrack, TrackDescriptor};
use crate::provider::{ByteStream, MediaProvider, StreamFormat};
use crate::utils::{cover_art, sanitize_filename, sanitize_filename_with_suffix};

pub const AUDIO_EXTENSION: &str = "opus";
pub const COVER_EXTENSION: &str = "jpg";

/// Largest cover body buffered before it is re-encoded
const MAX_COVER_BYTES: usize = 10 * 1024 * 1024;

/// Tuning for transfers
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Give up on a stream that delivers nothing for this long
    pub idle_timeout: Duration,
    /// Minimum gap between two progress events
    pub progress_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_millis(250),
        }
    }
}

/// Pick the stream to download: the audio-only opus format with the highest itag
pub fn select_format(formats: &[StreamFormat]) -> Option<&StreamFormat> {
    formats
        .iter()
        .filter(|f| f.audio_only)
        .filter(|f| f.codec.as_deref().is_some_and(|c| c.eq_ignore_ascii_case("opus")))
        .max_by_key(|f| f.itag)
}

/// Rate limiter for progress events
struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Downloads a single track into `<root>/<author>/`
pub struct Worker {
    provider: Arc<dyn MediaProvider>,
    root: PathBuf,
    config: WorkerConfig,
    events: broadcast::Sender<DownloadEvent>,
}

impl Worker {
    pub fn new(
        provider: Arc<dyn MediaProvider>,
        root: PathBuf,
        config: WorkerConfig,
        events: broadcast::Sender<DownloadEvent>,
    ) -> Self {
        Self {
            provider,
            root,
            config,
            events,
        }
    }

    /// Download audio and cover, returning the record to add to the catalog
    ///
    /// Nothing is left behind on failure: partial files are removed.
    pub async fn download(
        &self,
        track: TrackDescriptor,
        progress: Arc<TransferProgress>,
    ) -> Result<PersistedTrack, DownloadError> {
        let dir = self.root.join(sanitize_filename(&track.author));
        fs::create_dir_all(&dir)
            .await
            .map_err(DownloadError::filesystem(&dir))?;

        let remote = self
            .provider
            .track(&track.source_url)
            .await
            .map_err(DownloadError::transfer)?;
        let format = select_format(&remote.formats).ok_or(DownloadError::NoOpusFormat)?;
        debug!(
            "Selected itag {} for {} ({} formats offered)",
            format.itag,
            track.id,
            remote.formats.len()
        );

        let filename = unique_filename(&dir, &track.title, &track.id).await;
        let audio_path = dir.join(format!("{}.{}", filename, AUDIO_EXTENSION));
        let cover_path = dir.join(format!("{}.{}", filename, COVER_EXTENSION));

        let (audio, cover) = tokio::join!(
            self.fetch_audio(&track.id, format, &audio_path, &progress),
            self.fetch_cover(&track.cover, &cover_path),
        );

        if let Err(e) = audio {
            let _ = fs::remove_file(&cover_path).await;
            return Err(e);
        }
        if let Err(e) = cover {
            warn!("Cover for {} unavailable, keeping remote URL: {}", track.id, e);
        }

        Ok(PersistedTrack::from_descriptor(track, filename))
    }

    async fn fetch_audio(
        &self,
        id: &str,
        format: &StreamFormat,
        dest: &Path,
        progress: &TransferProgress,
    ) -> Result<(), DownloadError> {
        let mut stream = self.open_stream(&format.url).await?;
        if let Some(total) = stream.total.or(format.content_length) {
            progress.set_total(total);
        }

        let part = part_path(dest);
        let result = self.stream_to(&mut stream, &part, dest, id, progress).await;
        if result.is_err() {
            let _ = fs::remove_file(&part).await;
            return result;
        }

        self.emit_progress(id, 1.0);
        debug!("Wrote audio: {} ({} bytes)", dest.display(), progress.transferred());
        Ok(())
    }

    async fn stream_to(
        &self,
        stream: &mut ByteStream,
        part: &Path,
        dest: &Path,
        id: &str,
        progress: &TransferProgress,
    ) -> Result<(), DownloadError> {
        let mut file = fs::File::create(part)
            .await
            .map_err(DownloadError::filesystem(part))?;
        let mut throttle = ProgressThrottle::new(self.config.progress_interval);

        while let Some(chunk) = self.next_chunk(stream).await? {
            file.write_all(&chunk)
                .await
                .map_err(DownloadError::filesystem(part))?;
            progress.add(chunk.len() as u64);

            if throttle.ready(Instant::now()) {
                if let Some(fraction) = progress.fraction() {
                    self.emit_progress(id, fraction);
                }
            }
        }

        commit(file, part, dest).await
    }

    async fn fetch_cover(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        if url.is_empty() {
            return Err(DownloadError::Transfer("track has no cover URL".to_string()));
        }

        let mut stream = self.open_stream(url).await?;
        let capacity = stream.total.map_or(0, |total| total.min(MAX_COVER_BYTES as u64));
        let mut data = Vec::with_capacity(capacity as usize);
        while let Some(chunk) = self.next_chunk(&mut stream).await? {
            if data.len() + chunk.len() > MAX_COVER_BYTES {
                return Err(DownloadError::Transfer(format!(
                    "cover exceeds {} bytes",
                    MAX_COVER_BYTES
                )));
            }
            data.extend_from_slice(&chunk);
        }

        let jpeg = cover_art::normalize_cover_or_raw(data.into()).await;
        write_file(dest, &jpeg).await?;

        debug!("Wrote cover: {}", dest.display());
        Ok(())
    }

    /// Open a stream, failing if the provider doesn't answer within the idle timeout
    async fn open_stream(&self, url: &str) -> Result<ByteStream, DownloadError> {
        let idle = self.config.idle_timeout;
        match tokio::time::timeout(idle, self.provider.open(url)).await {
            Err(_) => Err(DownloadError::Transfer(format!(
                "no response within {:?}",
                idle
            ))),
            Ok(stream) => stream.map_err(DownloadError::transfer),
        }
    }

    /// Next chunk of a stream, failing if it stays silent past the idle timeout
    async fn next_chunk(&self, stream: &mut ByteStream) -> Result<Option<Bytes>, DownloadError> {
        let idle = self.config.idle_timeout;
        match tokio::time::timeout(idle, stream.chunks.next()).await {
            Err(_) => Err(DownloadError::Transfer(format!(
                "stream stalled for {:?}",
                idle
            ))),
            Ok(None) => Ok(None),
            Ok(Some(chunk)) => chunk.map(Some).map_err(DownloadError::transfer),
        }
    }

    /// Progress events are best-effort; nobody listening is fine
    fn emit_progress(&self, id: &str, fraction: f64) {
        let _ = self.events.send(DownloadEvent::Progress {
            id: id.to_string(),
            fraction,
        });
    }
}

/// Sibling file a download is written to before it is complete
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Sync a finished part file and rename it over `dest`
async fn commit(mut file: fs::File, part: &Path, dest: &Path) -> Result<(), DownloadError> {
    file.flush().await.map_err(DownloadError::filesystem(part))?;
    file.sync_all().await.map_err(DownloadError::filesystem(part))?;
    drop(file);

    fs::rename(part, dest)
        .await
        .map_err(DownloadError::filesystem(dest))
}

/// Write `data` to `dest` through a part file, removing it on failure
async fn write_file(dest: &Path, data: &[u8]) -> Result<(), DownloadError> {
    let part = part_path(dest);
    let result = async {
        let mut file = fs::File::create(&part)
            .await
            .map_err(DownloadError::filesystem(&part))?;
        file.write_all(data)
            .await
            .map_err(DownloadError::filesystem(&part))?;
        commit(file, &part, dest).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&part).await;
    }
    result
}

/// Sanitized `title`, or `title [id]` if a file by that name already exists
///
/// Further clashes get a counter, `title [id 2]` and so on.
async fn unique_filename(dir: &Path, title: &str, id: &str) -> String {
    let plain = sanitize_filename(title);
    if !audio_exists(dir, &plain).await {
        return plain;
    }

    let id = sanitize_filename(id);
    let mut n = 1u32;
    loop {
        let suffix = match n {
            1 => format!(" [{}]", id),
            _ => format!(" [{} {}]", id, n),
        };
        let candidate = sanitize_filename_with_suffix(title, &suffix);
        if !audio_exists(dir, &candidate).await {
            return candidate;
        }
        n += 1;
    }
}

async fn audio_exists(dir: &Path, filename: &str) -> bool {
    fs::try_exists(dir.join(format!("{}.{}", filename, AUDIO_EXTENSION)))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Membership;
    use crate::provider::fake::{self, FakeProvider};

    fn format(itag: u32, codec: &str) -> StreamFormat {
        StreamFormat {
            itag,
            codec: Some(codec.to_string()),
            audio_only: true,
            url: format!("https://cdn.example/{itag}"),
            content_length: None,
        }
    }

    fn worker(provider: FakeProvider, root: &Path) -> (Worker, broadcast::Receiver<DownloadEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let config = WorkerConfig {
            idle_timeout: Duration::from_secs(5),
            progress_interval: Duration::ZERO,
        };
        (Worker::new(Arc::new(provider), root.to_path_buf(), config, tx), rx)
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_select_highest_opus_itag() {
        let formats = vec![format(1, "opus"), format(5, "opus"), format(3, "aac")];
        assert_eq!(select_format(&formats).unwrap().itag, 5);
    }

    #[test]
    fn test_select_ignores_video_and_other_codecs() {
        let mut video = format(300, "opus");
        video.audio_only = false;
        let formats = vec![video, format(140, "mp4a.40.2"), format(250, "opus")];
        assert_eq!(select_format(&formats).unwrap().itag, 250);

        assert!(select_format(&[format(140, "mp4a.40.2")]).is_none());
        assert!(select_format(&[]).is_none());
    }

    #[test]
    fn test_progress_throttle() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(100));
        let start = Instant::now();
        assert!(throttle.ready(start));
        assert!(!throttle.ready(start + Duration::from_millis(50)));
        assert!(throttle.ready(start + Duration::from_millis(150)));
    }

    #[tokio::test]
    async fn test_download_writes_audio_and_cover() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new().with_track("abc", "My:Song*?", "AC/DC");
        let (worker, mut events) = worker(provider, dir.path());

        let track = fake::descriptor("abc", "My:Song*?", "AC/DC", Membership::NoPlaylist);
        let progress = Arc::new(TransferProgress::default());
        let persisted = worker.download(track, progress.clone()).await.unwrap();

        assert_eq!(persisted.filename, "My꞉Song⁎？");
        assert_eq!(persisted.playlists, vec![Membership::NoPlaylist]);
        assert_eq!(progress.transferred(), fake::AUDIO_LEN as u64);

        let author_dir = dir.path().join("AC⧸DC");
        assert_eq!(
            files_in(&author_dir),
            vec!["My꞉Song⁎？.jpg".to_string(), "My꞉Song⁎？.opus".to_string()]
        );
        let audio = std::fs::read(author_dir.join("My꞉Song⁎？.opus")).unwrap();
        assert_eq!(audio.len(), fake::AUDIO_LEN);

        let mut fractions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DownloadEvent::Progress { fraction, .. } = event {
                fractions.push(fraction);
            }
        }
        assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
        assert_eq!(fractions.last(), Some(&1.0));
    }

    #[tokio::test]
    async fn test_broken_stream_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new()
            .with_track("abc", "Song", "Artist")
            .broken_stream("abc");
        let (worker, _events) = worker(provider, dir.path());

        let track = fake::descriptor("abc", "Song", "Artist", Membership::NoPlaylist);
        let err = worker
            .download(track, Arc::new(TransferProgress::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Transfer(_)));
        assert!(files_in(&dir.path().join("Artist")).is_empty());
    }

    #[tokio::test]
    async fn test_missing_cover_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new()
            .with_track("abc", "Song", "Artist")
            .missing_cover("abc");
        let (worker, _events) = worker(provider, dir.path());

        let track = fake::descriptor("abc", "Song", "Artist", Membership::NoPlaylist);
        let persisted = worker
            .download(track, Arc::new(TransferProgress::default()))
            .await
            .unwrap();

        assert_eq!(persisted.cover, fake::cover_url("abc"));
        assert_eq!(files_in(&dir.path().join("Artist")), vec!["Song.opus".to_string()]);
    }

    #[tokio::test]
    async fn test_title_collision_gets_id_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new()
            .with_track("one", "Intro", "Artist")
            .with_track("two", "Intro", "Artist");
        let (worker, _events) = worker(provider, dir.path());

        let first = worker
            .download(
                fake::descriptor("one", "Intro", "Artist", Membership::NoPlaylist),
                Arc::new(TransferProgress::default()),
            )
            .await
            .unwrap();
        let second = worker
            .download(
                fake::descriptor("two", "Intro", "Artist", Membership::NoPlaylist),
                Arc::new(TransferProgress::default()),
            )
            .await
            .unwrap();

        assert_eq!(first.filename, "Intro");
        assert_eq!(second.filename, "Intro [two]");
    }

    #[tokio::test]
    async fn test_long_title_collision_keeps_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let title = "曲".repeat(84);
        let provider = FakeProvider::new()
            .with_track("one", &title, "Artist")
            .with_track("two", &title, "Artist");
        let (worker, _events) = worker(provider, dir.path());

        let first = worker
            .download(
                fake::descriptor("one", &title, "Artist", Membership::NoPlaylist),
                Arc::new(TransferProgress::default()),
            )
            .await
            .unwrap();
        let second = worker
            .download(
                fake::descriptor("two", &title, "Artist", Membership::NoPlaylist),
                Arc::new(TransferProgress::default()),
            )
            .await
            .unwrap();

        assert_ne!(first.filename, second.filename);
        assert!(second.filename.ends_with(" [two]"));
        let audio: Vec<_> = files_in(&dir.path().join("Artist"))
            .into_iter()
            .filter(|name| name.ends_with(".opus"))
            .collect();
        assert_eq!(audio.len(), 2);
    }

    #[tokio::test]
    async fn test_suffixed_name_clash_gets_counter() {
        let dir = tempfile::tempdir().unwrap();
        let author = dir.path().join("Artist");
        std::fs::create_dir_all(&author).unwrap();
        std::fs::write(author.join("Intro.opus"), b"one").unwrap();
        std::fs::write(author.join("Intro [two].opus"), b"other").unwrap();

        assert_eq!(unique_filename(&author, "Intro", "two").await, "Intro [two 2]");
    }

    #[tokio::test]
    async fn test_unanswered_open_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new()
            .with_track("abc", "Song", "Artist")
            .unanswered_open("abc");
        let (tx, _rx) = broadcast::channel(64);
        let config = WorkerConfig {
            idle_timeout: Duration::from_millis(200),
            progress_interval: Duration::ZERO,
        };
        let worker = Worker::new(Arc::new(provider), dir.path().to_path_buf(), config, tx);

        let track = fake::descriptor("abc", "Song", "Artist", Membership::NoPlaylist);
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            worker.download(track, Arc::new(TransferProgress::default())),
        )
        .await
        .expect("download should give up on its own");

        assert!(matches!(result, Err(DownloadError::Transfer(_))));
        assert!(files_in(&dir.path().join("Artist")).is_empty());
    }

    #[tokio::test]
    async fn test_bogus_cover_length_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new()
            .with_track("abc", "Song", "Artist")
            .cover_length("abc", u64::MAX);
        let (worker, _events) = worker(provider, dir.path());

        let track = fake::descriptor("abc", "Song", "Artist", Membership::NoPlaylist);
        let persisted = worker
            .download(track, Arc::new(TransferProgress::default()))
            .await
            .unwrap();
        assert_eq!(persisted.filename, "Song");
        assert!(dir.path().join("Artist").join("Song.jpg").is_file());
    }

    #[tokio::test]
    async fn test_oversized_cover_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new()
            .with_track("abc", "Song", "Artist")
            .cover_bytes("abc", vec![0u8; MAX_COVER_BYTES + 1]);
        let (worker, _events) = worker(provider, dir.path());

        let track = fake::descriptor("abc", "Song", "Artist", Membership::NoPlaylist);
        worker
            .download(track, Arc::new(TransferProgress::default()))
            .await
            .unwrap();
        assert_eq!(files_in(&dir.path().join("Artist")), vec!["Song.opus".to_string()]);
    }
}
