mod common;

use std::path::Path;

use common::{flac_bytes, jpeg_bytes, mp3_bytes};
use ncmfetch::{
    tagger::{CoverImage, ImageFormat, Tagger},
    track::{TrackId, TrackMetadata},
};

fn metadata() -> TrackMetadata {
    TrackMetadata {
        id: Some(TrackId::new(1_901_371_647)),
        title: "晴天".to_owned(),
        artist: "Jay Chou/Gary Yang".to_owned(),
        album: "Ye Hui Mei".to_owned(),
        cover_url: None,
        lyrics: Some("[00:01.00]first line".to_owned()),
        translated_lyrics: None,
    }
}

fn write_fixture(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

#[test]
fn flac_without_tags_gets_vorbis_comments_and_picture() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "01 Sunny Day.flac", &flac_bytes(16 * 1024));
    let cover = CoverImage::new(jpeg_bytes());
    assert_eq!(cover.format, ImageFormat::Jpeg);

    Tagger::new()
        .write(&path, &metadata(), 1, Some(&cover))
        .unwrap();

    let tags = Tagger::read(&path).unwrap();
    assert_eq!(tags.title.as_deref(), Some("晴天"));
    assert_eq!(tags.artist.as_deref(), Some("Jay Chou/Gary Yang"));
    assert_eq!(tags.album.as_deref(), Some("Ye Hui Mei"));
    assert_eq!(tags.track, Some(1));
    assert_eq!(tags.lyrics.as_deref(), Some("[00:01.00]first line"));
    assert_eq!(tags.front_covers, 1);
}

/// Block types of the FLAC metadata in `data`, up to the one flagged last,
/// and the offset where the audio frames start.
fn flac_blocks(data: &[u8]) -> (Vec<u8>, usize) {
    assert_eq!(&data[..4], b"fLaC");

    let mut blocks = Vec::new();
    let mut offset = 4;
    loop {
        let header = &data[offset..offset + 4];
        let length = usize::from(header[1]) << 16 | usize::from(header[2]) << 8 | usize::from(header[3]);
        blocks.push(header[0] & 0x7F);
        offset += 4 + length;
        if header[0] & 0x80 != 0 {
            return (blocks, offset);
        }
    }
}

#[test]
fn new_flac_tags_stay_inside_the_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let original = flac_bytes(16 * 1024);
    let path = write_fixture(dir.path(), "05 Streaminfo Only.flac", &original);
    assert_eq!(flac_blocks(&original).0, vec![0]);

    let cover = CoverImage::new(jpeg_bytes());
    Tagger::new()
        .write(&path, &metadata(), 5, Some(&cover))
        .unwrap();

    let data = std::fs::read(&path).unwrap();
    let (blocks, audio) = flac_blocks(&data);
    assert_eq!(blocks.first(), Some(&0), "STREAMINFO comes first");
    assert!(blocks.contains(&4), "VORBIS_COMMENT in {blocks:?}");
    assert!(blocks.contains(&6), "PICTURE in {blocks:?}");

    // The frames behind the metadata are the original ones.
    assert_eq!(&data[audio..], &original[42..]);
}

#[test]
fn mp3_without_tags_gets_id3v2_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "07 Rainy Day.mp3", &mp3_bytes(16 * 1024));
    let cover = CoverImage::new(jpeg_bytes());

    Tagger::new()
        .write(&path, &metadata(), 7, Some(&cover))
        .unwrap();

    let tags = Tagger::read(&path).unwrap();
    assert_eq!(tags.title.as_deref(), Some("晴天"));
    assert_eq!(tags.artist.as_deref(), Some("Jay Chou/Gary Yang"));
    assert_eq!(tags.album.as_deref(), Some("Ye Hui Mei"));
    assert_eq!(tags.track, Some(7));
    assert_eq!(tags.front_covers, 1);
}

#[test]
fn retagging_replaces_the_cover() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["02 Again.flac", "02 Again.mp3"] {
        let data = if name.ends_with(".flac") {
            flac_bytes(16 * 1024)
        } else {
            mp3_bytes(16 * 1024)
        };
        let path = write_fixture(dir.path(), name, &data);
        let cover = CoverImage::new(jpeg_bytes());

        let tagger = Tagger::new();
        tagger.write(&path, &metadata(), 2, Some(&cover)).unwrap();
        tagger.write(&path, &metadata(), 3, Some(&cover)).unwrap();

        let tags = Tagger::read(&path).unwrap();
        assert_eq!(tags.front_covers, 1, "{name}");
        assert_eq!(tags.track, Some(3), "{name}");
    }
}

#[test]
fn missing_cover_tags_without_picture() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "03 Bare.flac", &flac_bytes(16 * 1024));

    let cover = CoverImage::load(dir.path().join("cover.jpg")).unwrap();
    assert!(cover.is_none());

    Tagger::new()
        .write(&path, &metadata(), 3, cover.as_ref())
        .unwrap();

    let tags = Tagger::read(&path).unwrap();
    assert_eq!(tags.track, Some(3));
    assert_eq!(tags.front_covers, 0);
}

#[test]
fn lyrics_can_be_left_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "04 Quiet.flac", &flac_bytes(16 * 1024));

    let tagger = Tagger {
        embed_lyrics: false,
    };
    tagger.write(&path, &metadata(), 4, None).unwrap();

    let tags = Tagger::read(&path).unwrap();
    assert_eq!(tags.title.as_deref(), Some("晴天"));
    assert!(tags.lyrics.is_none());
}

#[test]
fn covers_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "cover.jpg", &jpeg_bytes());

    let cover = CoverImage::load(&path).unwrap().unwrap();
    assert_eq!(cover.data, jpeg_bytes());
    assert_eq!(cover.format, ImageFormat::Jpeg);
}
