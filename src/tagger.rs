//! Writing descriptive tags into downloaded audio files.
//!
//! Tags are written with `lofty`, which picks the native tag format of each
//! container:
//!
//! * FLAC: Vorbis comments, with the cover as a FLAC picture block
//! * MP3: ID3v2 frames `TIT2`, `TPE1`, `TALB`, `TRCK` and `APIC`
//! * anything else lofty supports: its primary tag type
//!
//! Files without any tag get a new one. An existing front cover is
//! replaced, so tagging the same file twice does not duplicate pictures.

use std::{io, path::Path};

use lofty::{
    config::WriteOptions,
    file::TaggedFileExt,
    picture::{MimeType, Picture, PictureType},
    probe::Probe,
    tag::{Accessor, ItemKey, Tag, TagExt},
};

use crate::{
    error::{Error, Result},
    track::TrackMetadata,
};

/// Encoding of a cover image.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Detects the format from magic bytes, assuming JPEG when unknown.
    #[must_use]
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(&[0x89, b'P', b'N', b'G']) {
            Self::Png
        } else {
            Self::Jpeg
        }
    }

    #[must_use]
    pub fn mime_type(self) -> MimeType {
        match self {
            Self::Jpeg => MimeType::Jpeg,
            Self::Png => MimeType::Png,
        }
    }
}

/// Album cover, shared by all tracks of an album.
#[derive(Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub data: Vec<u8>,
    pub format: ImageFormat,
}

impl CoverImage {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        let format = ImageFormat::detect(&data);
        Self { data, format }
    }

    /// Loads a cover from disk.
    ///
    /// A missing or empty file is not an error: it yields `None`, and tracks
    /// are tagged without a picture.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(data) if data.is_empty() => {
                warn!("ignoring empty cover {}", path.display());
                Ok(None)
            }
            Ok(data) => Ok(Some(Self::new(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no cover at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for CoverImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverImage")
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Textual tags as read back from a file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track: Option<u32>,
    pub lyrics: Option<String>,

    /// Number of front cover pictures.
    pub front_covers: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tagger {
    /// Also embed unsynchronized lyrics into the tag.
    pub embed_lyrics: bool,
}

impl Default for Tagger {
    fn default() -> Self {
        Self::new()
    }
}

impl Tagger {
    #[must_use]
    pub fn new() -> Self {
        Self { embed_lyrics: true }
    }

    /// Writes title, artist, album, track number and optionally the front
    /// cover into the file at `path`.
    ///
    /// The file is never removed, also not when writing fails.
    ///
    /// # Errors
    ///
    /// * `Unimplemented` if the container is not supported
    /// * `DataLoss` if the file cannot be parsed, or the tags cannot be read
    ///   back after writing them
    /// * any I/O error
    pub fn write(
        &self,
        path: &Path,
        metadata: &TrackMetadata,
        number: u32,
        cover: Option<&CoverImage>,
    ) -> Result<()> {
        if reserve_flac_padding(path)? {
            debug!("added padding block to {}", path.display());
        }

        let mut tagged_file = Probe::open(path)?.guess_file_type()?.read()?;

        let tag_type = tagged_file.primary_tag_type();
        if tagged_file.tag(tag_type).is_none() {
            debug!("creating {tag_type:?} tag in {}", path.display());
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let Some(tag) = tagged_file.tag_mut(tag_type) else {
            return Err(Error::internal(format!(
                "{tag_type:?} tag vanished from {}",
                path.display()
            )));
        };

        tag.set_title(metadata.title.clone());
        tag.set_artist(metadata.artist.clone());
        tag.set_album(metadata.album.clone());
        tag.set_track(number);

        if self.embed_lyrics {
            if let Some(lyrics) = &metadata.lyrics {
                tag.insert_text(ItemKey::Lyrics, lyrics.clone());
            }
        }

        if let Some(cover) = cover {
            tag.remove_picture_type(PictureType::CoverFront);
            tag.push_picture(Picture::new_unchecked(
                PictureType::CoverFront,
                Some(cover.format.mime_type()),
                None,
                cover.data.clone(),
            ));
        }

        tag.save_to_path(path, WriteOptions::default())?;

        // Read back: a tag that cannot be found again was not written.
        let written = Self::read(path)?;
        if written.title.unwrap_or_default() != metadata.title || written.track != Some(number) {
            return Err(Error::data_loss(format!(
                "tags of {} did not persist",
                path.display()
            )));
        }

        debug!("tagged {} as #{number} {}", path.display(), metadata.title);
        Ok(())
    }

    /// Reads back the textual tags of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Tags> {
        let tagged_file = Probe::open(path)?.guess_file_type()?.read()?;
        let Some(tag) = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
        else {
            return Ok(Tags::default());
        };

        Ok(Tags {
            title: tag.title().map(|s| s.to_string()),
            artist: tag.artist().map(|s| s.to_string()),
            album: tag.album().map(|s| s.to_string()),
            track: tag.track(),
            lyrics: tag.get_string(&ItemKey::Lyrics).map(str::to_owned),
            front_covers: tag
                .pictures()
                .iter()
                .filter(|picture| picture.pic_type() == PictureType::CoverFront)
                .count(),
        })
    }
}

const FLAC_MAGIC: &[u8; 4] = b"fLaC";
const FLAC_PADDING: u8 = 1;
const FLAC_LAST_BLOCK: u8 = 0x80;

/// Bytes of padding to reserve for tags that are added later.
const FLAC_PADDING_SIZE: u32 = 1024;

/// Makes sure a FLAC file at `path` ends its metadata with a padding block.
///
/// New metadata blocks are inserted before the padding. Without it they
/// would land behind the block that is flagged as the last one, where
/// decoders take them for audio. Other files are left alone.
///
/// Returns whether the file was changed.
fn reserve_flac_padding(path: &Path) -> Result<bool> {
    let data = std::fs::read(path)?;
    let Some(padded) = with_flac_padding(&data)? else {
        return Ok(false);
    };

    let part = crate::download::part_path(path);
    std::fs::write(&part, padded)?;
    std::fs::rename(&part, path)?;
    Ok(true)
}

/// Returns `data` with a trailing padding block, or `None` if it is not a
/// FLAC stream or already has one.
fn with_flac_padding(data: &[u8]) -> Result<Option<Vec<u8>>> {
    if !data.starts_with(FLAC_MAGIC) {
        return Ok(None);
    }

    let mut offset = FLAC_MAGIC.len();
    let (last_header, end) = loop {
        let Some(header) = data.get(offset..offset + 4) else {
            return Err(Error::data_loss("truncated FLAC metadata"));
        };
        let length = usize::from(header[1]) << 16 | usize::from(header[2]) << 8 | usize::from(header[3]);
        let end = offset + 4 + length;
        if end > data.len() {
            return Err(Error::data_loss("truncated FLAC metadata block"));
        }

        if header[0] & FLAC_LAST_BLOCK != 0 {
            if header[0] & !FLAC_LAST_BLOCK == FLAC_PADDING {
                return Ok(None);
            }
            break (offset, end);
        }
        offset = end;
    };

    let padding = FLAC_PADDING_SIZE as usize;
    let length = FLAC_PADDING_SIZE.to_be_bytes();

    let mut padded = Vec::with_capacity(data.len() + 4 + padding);
    padded.extend_from_slice(&data[..end]);
    padded[last_header] &= !FLAC_LAST_BLOCK;
    padded.push(FLAC_LAST_BLOCK | FLAC_PADDING);
    padded.extend_from_slice(&length[1..]);
    padded.resize(padded.len() + padding, 0);
    padded.extend_from_slice(&data[end..]);
    Ok(Some(padded))
}
