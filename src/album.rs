//! Assembling albums out of individual tracks.
//!
//! An album is a named, ordered list of tracks. Tracks are numbered by their
//! position before any work starts, then processed concurrently:
//!
//! ```text
//! resolve -> metadata -> lyric sidecars -> shared cover -> download -> tag
//! ```
//!
//! A track that fails is recorded in the [`AlbumReport`] and never stops its
//! siblings. The one exception are fatal errors, which indicate a defect that
//! would fail every other track as well.
//!
//! # Layout
//!
//! ```text
//! <output>/<album>/
//!     cover.jpg
//!     01 First Title.flac
//!     01 First Title.lrc
//!     01 First Title.translated.lrc
//!     02 Second Title.mp3
//!     .staging/
//! ```
//!
//! Lyric sidecars are written to `.staging` first and moved next to the
//! audio once it downloaded. Sidecars of tracks that failed remain in
//! `.staging`, next to `retry.txt` listing the ids of every track that was
//! not tagged. That file is a track list itself, so passing it to another
//! run fetches just those tracks. An empty `.staging` is removed.

use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures_util::{stream, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::{fs, sync::OnceCell};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    catalog::Catalog,
    config::Config,
    download::{Downloader, Expect},
    error::{Error, ErrorKind, Result},
    protocol::Level,
    tagger::{CoverImage, Tagger},
    track::{ResolvedTrack, TrackId, TrackMetadata},
    util,
};

/// An album to assemble.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlbumJob {
    /// Name of the album directory, sanitized before use.
    pub name: String,

    /// Tracks in album order.
    pub tracks: Vec<TrackId>,
}

impl AlbumJob {
    #[must_use]
    pub fn new(name: impl Into<String>, tracks: Vec<TrackId>) -> Self {
        Self {
            name: name.into(),
            tracks,
        }
    }
}

/// What became of a single track.
#[derive(Debug)]
pub enum Outcome {
    /// Downloaded and tagged.
    Tagged(PathBuf),

    /// Downloaded, but the tags could not be written.
    Untagged(PathBuf, Error),

    /// The account may not stream this track.
    Denied,

    /// Not downloaded.
    Failed(Error),

    /// Not attempted or interrupted because the run was cancelled.
    Cancelled,
}

impl Outcome {
    #[must_use]
    pub fn is_tagged(&self) -> bool {
        matches!(self, Self::Tagged(_))
    }

    /// The audio file, if it was downloaded.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Tagged(path) | Self::Untagged(path, _) => Some(path),
            Self::Denied | Self::Failed(_) | Self::Cancelled => None,
        }
    }

    /// Short status word for reports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tagged(_) => "tagged",
            Self::Untagged(..) => "untagged",
            Self::Denied => "denied",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Untagged(_, e) | Self::Failed(e) => Some(e),
            Self::Tagged(_) | Self::Denied | Self::Cancelled => None,
        }
    }
}

impl From<Fetched> for Outcome {
    fn from(fetched: Fetched) -> Self {
        match fetched {
            Fetched::Tagged(path) => Self::Tagged(path),
            Fetched::Untagged(path, e) => Self::Untagged(path, e),
        }
    }
}

impl Serialize for Outcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Debug, Serialize)]
pub struct TrackReport {
    pub number: u32,
    pub id: TrackId,

    /// Known once the track's metadata was looked up.
    pub title: Option<String>,

    pub outcome: Outcome,
}

#[derive(Debug, Serialize)]
pub struct AlbumReport {
    pub name: String,
    pub directory: PathBuf,
    pub total: usize,

    /// Number of tracks that were downloaded and tagged.
    pub succeeded: usize,

    /// One entry per track, ordered by track number.
    pub tracks: Vec<TrackReport>,

    /// Track list of the tracks to retry, if any were not tagged.
    pub retry_list: Option<PathBuf>,
}

impl AlbumReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.succeeded == self.total
    }

    /// Tracks that are not fully tagged, in album order.
    #[must_use]
    pub fn retry_queue(&self) -> Vec<TrackId> {
        self.tracks
            .iter()
            .filter(|track| !track.outcome.is_tagged())
            .map(|track| track.id)
            .collect()
    }
}

/// A downloaded track file.
#[derive(Debug)]
pub enum Fetched {
    Tagged(PathBuf),
    Untagged(PathBuf, Error),
}

/// Downloads a resolved track into `dir` and tags it as track `number`.
///
/// The file is named `NN <title>.<ext>`. A file whose tags cannot be written
/// is kept and returned as [`Fetched::Untagged`].
///
/// # Errors
///
/// * `PermissionDenied` if the track has no URL
/// * `Unavailable` if the download failed
/// * `Cancelled` if `cancel` was triggered
#[expect(clippy::too_many_arguments)]
pub async fn fetch_and_tag(
    downloader: &Downloader,
    tagger: Tagger,
    resolved: &ResolvedTrack,
    metadata: &TrackMetadata,
    dir: &Path,
    number: u32,
    cover: Option<Arc<CoverImage>>,
    cancel: &CancellationToken,
) -> Result<Fetched> {
    let Some(url) = &resolved.url else {
        return Err(Error::permission_denied(format!(
            "track {} is not available to this account",
            resolved.id
        )));
    };

    let file_name = format!(
        "{}.{}",
        util::track_stem(number, &metadata.title),
        resolved.extension()
    );
    let path = dir.join(file_name);

    let expect = Expect::audio(downloader.policy());
    downloader.fetch(url, &path, &expect, cancel).await?;

    let task_path = path.clone();
    let metadata = metadata.clone();
    let tagged = tokio::task::spawn_blocking(move || {
        tagger.write(&task_path, &metadata, number, cover.as_deref())
    })
    .await;

    match tagged.map_err(Error::from).and_then(|result| result) {
        Ok(()) => Ok(Fetched::Tagged(path)),
        Err(e) => {
            warn!("cannot tag {}: {e}", path.display());
            Ok(Fetched::Untagged(path, e))
        }
    }
}

/// Parses a newline separated list of track references.
///
/// Blank lines and lines starting with `#` are skipped.
#[must_use]
pub fn parse_track_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

/// Reads a track list from a file. See [`parse_track_list`].
///
/// # Errors
///
/// Returns error if the file cannot be read.
pub async fn read_track_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).await?;
    Ok(parse_track_list(&text))
}

/// Checks that no two album names end up in the same directory.
///
/// Names are compared after sanitizing and case folding, as the file system
/// may not tell letter case apart.
///
/// # Errors
///
/// Returns `AlreadyExists` naming the first directory claimed twice.
pub fn check_distinct<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        let directory = util::sanitize_filename(name);
        if !seen.insert(directory.to_lowercase()) {
            return Err(Error::already_exists(format!(
                "more than one album would be assembled in \"{directory}\""
            )));
        }
    }
    Ok(())
}

/// Per-album state shared by its tracks.
struct Album {
    directory: PathBuf,
    staging: PathBuf,
    cover: OnceCell<Arc<CoverImage>>,
}

pub struct Assembler {
    catalog: Catalog,
    downloader: Downloader,
    tagger: Tagger,
    output: PathBuf,
    level: Level,
    workers: usize,
}

impl Assembler {
    pub const COVER_FILE: &'static str = "cover.jpg";
    pub const STAGING_DIR: &'static str = ".staging";
    pub const RETRY_FILE: &'static str = "retry.txt";

    /// # Errors
    ///
    /// Returns error if the download client cannot be created.
    pub fn new(config: &Config, catalog: Catalog) -> Result<Self> {
        Ok(Self {
            catalog,
            downloader: Downloader::new(config)?,
            tagger: Tagger::new(),
            output: config.output.clone(),
            level: config.level,
            workers: config.workers.max(1),
        })
    }

    #[must_use]
    pub fn with_tagger(mut self, tagger: Tagger) -> Self {
        self.tagger = tagger;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Turns track references into an album job, following short links.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` naming the first reference that holds no
    /// track id.
    pub async fn job(&self, name: impl Into<String>, references: &[String]) -> Result<AlbumJob> {
        let mut tracks = Vec::with_capacity(references.len());
        for reference in references {
            tracks.push(self.catalog.track_id(reference).await?);
        }
        Ok(AlbumJob::new(name, tracks))
    }

    /// Downloads and tags all tracks of `job`.
    ///
    /// # Errors
    ///
    /// Returns error if the album directory cannot be created, or on the
    /// first fatal error of any track. All other failures are reported per
    /// track in the [`AlbumReport`].
    pub async fn assemble(&self, job: &AlbumJob, cancel: &CancellationToken) -> Result<AlbumReport> {
        let directory = self.output.join(util::sanitize_filename(&job.name));
        let staging = directory.join(Self::STAGING_DIR);
        fs::create_dir_all(&staging).await?;

        info!(
            "assembling {} with {} tracks in {}",
            job.name,
            job.tracks.len(),
            directory.display()
        );

        let album = Album {
            directory,
            staging,
            cover: OnceCell::new(),
        };

        let numbered: Vec<(u32, TrackId)> = (1..).zip(job.tracks.iter().copied()).collect();
        let mut tracks: Vec<TrackReport> = stream::iter(numbered)
            .map(|(number, id)| self.track(&album, number, id, cancel))
            .buffer_unordered(self.workers)
            .try_collect()
            .await?;
        tracks.sort_by_key(|track| track.number);

        let succeeded = tracks.iter().filter(|track| track.outcome.is_tagged()).count();
        let mut report = AlbumReport {
            name: job.name.clone(),
            directory: album.directory,
            total: tracks.len(),
            succeeded,
            tracks,
            retry_list: None,
        };

        report.retry_list = write_retry_list(&album.staging, &report).await;
        remove_if_empty(&album.staging).await;

        if report.is_complete() {
            info!("{}: all {} tracks tagged", report.name, report.total);
        } else {
            warn!(
                "{}: {} of {} tracks tagged",
                report.name, report.succeeded, report.total
            );
        }

        Ok(report)
    }

    /// Runs the pipeline of one track, turning every non-fatal error into an
    /// outcome.
    async fn track(
        &self,
        album: &Album,
        number: u32,
        id: TrackId,
        cancel: &CancellationToken,
    ) -> Result<TrackReport> {
        let mut title = None;
        let outcome = if cancel.is_cancelled() {
            Outcome::Cancelled
        } else {
            match self.run_track(album, number, id, &mut title, cancel).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if e.kind == ErrorKind::Cancelled => Outcome::Cancelled,
                Err(e) => {
                    error!("track {number:02} ({id}) failed: {e}");
                    Outcome::Failed(e)
                }
            }
        };

        debug!("track {number:02} ({id}): {}", outcome.label());
        Ok(TrackReport {
            number,
            id,
            title,
            outcome,
        })
    }

    async fn run_track(
        &self,
        album: &Album,
        number: u32,
        id: TrackId,
        title: &mut Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let resolved = self.catalog.resolve(id, self.level).await?;
        if resolved.is_denied() {
            return Ok(Outcome::Denied);
        }

        let metadata = self.catalog.metadata(id).await?;
        *title = Some(metadata.title.clone());

        let stem = util::track_stem(number, &metadata.title);
        let sidecars = write_sidecars(&album.staging, &stem, &metadata).await?;

        let cover = self
            .cover(album, metadata.cover_url.as_ref(), cancel)
            .await;

        let fetched = fetch_and_tag(
            &self.downloader,
            self.tagger,
            &resolved,
            &metadata,
            &album.directory,
            number,
            cover,
            cancel,
        )
        .await?;

        for sidecar in sidecars {
            relocate(&sidecar, &album.directory).await;
        }

        Ok(fetched.into())
    }

    /// The album cover, fetched by the first track that knows its URL.
    ///
    /// A cover already on disk is reused. When fetching fails the track goes
    /// without cover and the next track tries again.
    async fn cover(
        &self,
        album: &Album,
        url: Option<&Url>,
        cancel: &CancellationToken,
    ) -> Option<Arc<CoverImage>> {
        if let Some(cover) = album.cover.get() {
            return Some(Arc::clone(cover));
        }
        let url = url?;

        let path = album.directory.join(Self::COVER_FILE);
        let result = album
            .cover
            .get_or_try_init(|| async move {
                if let Some(cover) = CoverImage::load(&path)? {
                    debug!("reusing {}", path.display());
                    return Ok(Arc::new(cover));
                }

                let expect = Expect::image(self.downloader.policy());
                self.downloader.fetch(url, &path, &expect, cancel).await?;
                CoverImage::load(&path)?
                    .map(Arc::new)
                    .ok_or_else(|| Error::data_loss(format!("{} vanished", path.display())))
            })
            .await;

        match result {
            Ok(cover) => Some(Arc::clone(cover)),
            Err(e) => {
                warn!("cannot fetch cover from {url}: {e}");
                None
            }
        }
    }
}

/// Writes the lyrics of a track into `staging`, returning the files written.
async fn write_sidecars(
    staging: &Path,
    stem: &str,
    metadata: &TrackMetadata,
) -> Result<Vec<PathBuf>> {
    let lyrics = [
        (format!("{stem}.lrc"), metadata.lyrics.as_ref()),
        (
            format!("{stem}.translated.lrc"),
            metadata.translated_lyrics.as_ref(),
        ),
    ];

    let mut written = Vec::new();
    for (file_name, text) in lyrics {
        if let Some(text) = text {
            let path = staging.join(file_name);
            fs::write(&path, text).await?;
            written.push(path);
        }
    }

    Ok(written)
}

/// Writes the retry queue of `report` into `staging` as a track list, or
/// removes a stale one if every track was tagged.
async fn write_retry_list(staging: &Path, report: &AlbumReport) -> Option<PathBuf> {
    let path = staging.join(Assembler::RETRY_FILE);
    let queue = report.retry_queue();

    if queue.is_empty() {
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("cannot remove {}: {e}", path.display());
            }
        }
        return None;
    }

    let list: String = std::iter::once(format!("# {}\n", report.name))
        .chain(queue.iter().map(|id| format!("{id}\n")))
        .collect();

    match fs::write(&path, list).await {
        Ok(()) => Some(path),
        Err(e) => {
            warn!("cannot write {}: {e}", path.display());
            None
        }
    }
}

/// Moves `file` into `dir`, keeping its name.
async fn relocate(file: &Path, dir: &Path) {
    let Some(file_name) = file.file_name() else {
        return;
    };
    if let Err(e) = fs::rename(file, dir.join(file_name)).await {
        warn!("cannot move {} to {}: {e}", file.display(), dir.display());
    }
}

/// Removes `dir` if it holds no entries.
async fn remove_if_empty(dir: &Path) {
    let is_empty = match fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!("cannot list {}: {e}", dir.display());
            return;
        }
    };

    if is_empty {
        if let Err(e) = fs::remove_dir(dir).await {
            warn!("cannot remove {}: {e}", dir.display());
        }
    } else {
        info!("keeping {} for a later retry", dir.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_lists_skip_blanks_and_comments() {
        let text = "# Jay Chou - Ye Hui Mei\n\n1901371647\n  https://music.163.com/#/song?id=2  \n# done\n";
        assert_eq!(
            parse_track_list(text),
            vec!["1901371647", "https://music.163.com/#/song?id=2"]
        );
        assert!(parse_track_list("\n#\n   \n").is_empty());
    }

    #[test]
    fn retry_queue_holds_everything_not_tagged() {
        let track = |number: u32, outcome: Outcome| TrackReport {
            number,
            id: TrackId::new(u64::from(number) * 10),
            title: None,
            outcome,
        };

        let report = AlbumReport {
            name: "x".to_owned(),
            directory: PathBuf::from("x"),
            total: 5,
            succeeded: 1,
            tracks: vec![
                track(1, Outcome::Tagged(PathBuf::from("01 a.flac"))),
                track(
                    2,
                    Outcome::Untagged(PathBuf::from("02 b.flac"), Error::data_loss("bad")),
                ),
                track(3, Outcome::Denied),
                track(4, Outcome::Failed(Error::unavailable("gone"))),
                track(5, Outcome::Cancelled),
            ],
            retry_list: None,
        };

        assert!(!report.is_complete());
        assert_eq!(
            report.retry_queue(),
            vec![
                TrackId::new(20),
                TrackId::new(30),
                TrackId::new(40),
                TrackId::new(50)
            ]
        );
        assert_eq!(report.tracks[1].outcome.path(), Some(Path::new("02 b.flac")));
        assert!(report.tracks[2].outcome.path().is_none());
    }

    #[test]
    fn albums_need_distinct_directories() {
        assert!(check_distinct(["Ye Hui Mei", "Fantasy"]).is_ok());

        let err = check_distinct(["album", "Fantasy", "album"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);

        // Equal once sanitized or case folded.
        assert!(check_distinct(["A/B", "A_B"]).is_err());
        assert!(check_distinct(["Fantasy", "FANTASY"]).is_err());
    }

    #[tokio::test]
    async fn sidecars_are_written_for_present_lyrics_only() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = TrackMetadata {
            title: "Song".to_owned(),
            lyrics: Some("[00:01.00]la".to_owned()),
            ..TrackMetadata::default()
        };

        let written = write_sidecars(dir.path(), "01 Song", &metadata).await.unwrap();
        assert_eq!(written, vec![dir.path().join("01 Song.lrc")]);
        assert_eq!(
            std::fs::read_to_string(&written[0]).unwrap(),
            "[00:01.00]la"
        );
    }

    #[tokio::test]
    async fn staging_is_removed_only_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join(Assembler::STAGING_DIR);

        std::fs::create_dir(&staging).unwrap();
        std::fs::write(staging.join("03 Left.lrc"), "x").unwrap();
        remove_if_empty(&staging).await;
        assert!(staging.exists());

        std::fs::remove_file(staging.join("03 Left.lrc")).unwrap();
        remove_if_empty(&staging).await;
        assert!(!staging.exists());

        // Nothing to do for a directory that is already gone.
        remove_if_empty(&staging).await;
    }

    #[tokio::test]
    async fn retry_list_is_a_track_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = AlbumReport {
            name: "Ye Hui Mei".to_owned(),
            directory: dir.path().to_owned(),
            total: 3,
            succeeded: 1,
            tracks: vec![
                TrackReport {
                    number: 1,
                    id: TrackId::new(11),
                    title: Some("Intro".to_owned()),
                    outcome: Outcome::Failed(Error::unavailable("gone")),
                },
                TrackReport {
                    number: 2,
                    id: TrackId::new(12),
                    title: None,
                    outcome: Outcome::Tagged(PathBuf::from("02 x.flac")),
                },
                TrackReport {
                    number: 3,
                    id: TrackId::new(13),
                    title: None,
                    outcome: Outcome::Cancelled,
                },
            ],
            retry_list: None,
        };

        let path = write_retry_list(dir.path(), &report).await.unwrap();
        assert_eq!(path, dir.path().join(Assembler::RETRY_FILE));
        let references = read_track_list(&path).await.unwrap();
        assert_eq!(references, vec!["11", "13"]);

        // A later run that tagged everything clears the list.
        for track in &mut report.tracks {
            track.outcome = Outcome::Tagged(PathBuf::from("x.flac"));
        }
        assert!(write_retry_list(dir.path(), &report).await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn denied_tracks_are_not_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(&Config::default()).unwrap();
        let resolved = ResolvedTrack {
            id: TrackId::new(7),
            url: None,
            size: 0,
            level: Level::Standard,
            encoding: None,
        };

        let err = fetch_and_tag(
            &downloader,
            Tagger::new(),
            &resolved,
            &TrackMetadata::default(),
            dir.path(),
            1,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
    }
}
