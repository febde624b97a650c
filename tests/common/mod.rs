//! A local stand-in for the catalog API and its CDN.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};
use url::Url;

use ncmfetch::{
    config::{Config, DownloadPolicy},
    eapi::{self, Envelope},
    protocol::{detail, lyric, player},
};

/// Smallest audio file the test configuration accepts.
pub const MIN_AUDIO_SIZE: u64 = 8 * 1024;

/// Track id the catalog answers with "please log in".
pub const NEEDS_LOGIN: u64 = 301;

/// Track id the player endpoint answers with an empty `data` list.
pub const NO_GRANT: u64 = 902;

/// Track id the player endpoint answers with an object instead of a list.
pub const MALFORMED_GRANT: u64 = 903;

/// A track known to the mock catalog.
#[derive(Clone, Debug)]
pub struct MockTrack {
    pub id: u64,
    pub title: &'static str,
    pub artists: Vec<&'static str>,
    pub album: &'static str,

    /// File served by the CDN, `None` if the track is denied.
    pub file: Option<&'static str>,
    pub lyrics: Option<&'static str>,
    pub translated: Option<&'static str>,
}

impl MockTrack {
    pub fn new(id: u64, title: &'static str, file: Option<&'static str>) -> Self {
        Self {
            id,
            title,
            artists: vec!["Jay Chou"],
            album: "Ye Hui Mei",
            file,
            lyrics: Some("[00:01.00]first line"),
            translated: None,
        }
    }
}

#[derive(Default)]
pub struct Recorded {
    pub envelopes: Vec<Envelope>,
    pub cookies: Vec<String>,
    pub user_agents: Vec<String>,
    pub real_ips: Vec<String>,
}

pub struct MockState {
    pub base: Url,
    pub tracks: HashMap<u64, MockTrack>,
    pub files: HashMap<&'static str, (&'static str, Vec<u8>)>,

    /// Number of requests that fail before `/cdn/flaky.flac` succeeds.
    pub flaky_failures: usize,

    pub cover_hits: AtomicUsize,
    pub file_hits: Mutex<HashMap<String, usize>>,
    pub recorded: Mutex<Recorded>,
}

impl MockState {
    pub fn hits(&self, file: &str) -> usize {
        self.file_hits
            .lock()
            .unwrap()
            .get(file)
            .copied()
            .unwrap_or_default()
    }

    fn hit(&self, file: &str) -> usize {
        let mut hits = self.file_hits.lock().unwrap();
        let count = hits.entry(file.to_owned()).or_default();
        *count += 1;
        *count
    }
}

pub struct MockCatalog {
    pub state: Arc<MockState>,
}

impl MockCatalog {
    /// Starts a server holding `tracks`, serving a valid FLAC file for
    /// every track that is not denied.
    pub async fn start(tracks: Vec<MockTrack>) -> Self {
        Self::start_with(tracks, 0).await
    }

    pub async fn start_with(tracks: Vec<MockTrack>, flaky_failures: usize) -> Self {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let base: Url = format!("http://{addr}/").parse().unwrap();

        let mut files = HashMap::new();
        files.insert("song.flac", ("audio/flac", flac_bytes(MIN_AUDIO_SIZE as usize * 2)));
        files.insert("song.mp3", ("audio/mpeg", mp3_bytes(MIN_AUDIO_SIZE as usize * 2)));
        files.insert("flaky.flac", ("audio/flac", flac_bytes(MIN_AUDIO_SIZE as usize * 2)));
        files.insert("small.flac", ("audio/flac", flac_bytes(1024)));
        files.insert("page.flac", ("text/html; charset=utf-8", vec![b' '; MIN_AUDIO_SIZE as usize * 2]));
        files.insert("junk.flac", ("audio/flac", vec![0x42; MIN_AUDIO_SIZE as usize * 2]));

        let state = Arc::new(MockState {
            base,
            tracks: tracks.into_iter().map(|track| (track.id, track)).collect(),
            files,
            flaky_failures,
            cover_hits: AtomicUsize::new(0),
            file_hits: Mutex::new(HashMap::new()),
            recorded: Mutex::new(Recorded::default()),
        });

        let app = Router::new()
            .route(player::PATH, post(player_url))
            .route(detail::PATH, post(song_detail))
            .route(lyric::PATH, post(song_lyric))
            .route("/cdn/{file}", get(cdn_file))
            .route("/cover.jpg", get(cover))
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state }
    }

    pub fn url(&self, path: &str) -> Url {
        self.state.base.join(path).unwrap()
    }

    /// Configuration pointing at this server, with scaled down delays.
    pub fn config(&self, output: &std::path::Path) -> Config {
        Config {
            api_url: self.state.base.clone(),
            output: output.to_owned(),
            workers: 3,
            upgrade_http: false,
            download: DownloadPolicy {
                base_delay: Duration::from_millis(50),
                min_audio_size: MIN_AUDIO_SIZE,
                min_image_size: 16,
                ..DownloadPolicy::default()
            },
            ..Config::default()
        }
    }
}

fn record(state: &MockState, headers: &HeaderMap) {
    let value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned()
    };

    let mut recorded = state.recorded.lock().unwrap();
    recorded.cookies.push(value(header::COOKIE));
    recorded.user_agents.push(value(header::USER_AGENT));
    recorded.real_ips.push(value(header::HeaderName::from_static("x-real-ip")));
}

async fn player_url(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    record(&state, &headers);

    let plaintext = eapi::open(&form["params"]).unwrap();
    let envelope = Envelope::parse(&plaintext).unwrap();
    let payload: Value = serde_json::from_str(&envelope.payload).unwrap();
    state.recorded.lock().unwrap().envelopes.push(envelope);

    let id: u64 = payload["ids"][0].as_str().unwrap().parse().unwrap();
    match id {
        NEEDS_LOGIN => return Json(json!({ "code": 301, "message": "需要登录" })),
        NO_GRANT => return Json(json!({ "code": 200, "data": [] })),
        MALFORMED_GRANT => {
            return Json(json!({ "code": 200, "data": { "id": id, "url": null } }));
        }
        _ => {}
    }

    let url = state
        .tracks
        .get(&id)
        .and_then(|track| track.file)
        .map(|file| state.base.join(&format!("cdn/{file}")).unwrap().to_string());
    let level = if url.is_some() { payload["level"].clone() } else { Value::Null };

    Json(json!({
        "code": 200,
        "data": [{
            "id": id,
            "url": url,
            "size": MIN_AUDIO_SIZE * 2,
            "level": level,
            "type": url.as_ref().map(|_| "flac"),
            "br": 999_000,
        }],
    }))
}

async fn song_detail(
    State(state): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    let request: Value = serde_json::from_str(&form["c"]).unwrap();
    let id = request[0]["id"].as_u64().unwrap();

    let songs: Vec<Value> = state
        .tracks
        .get(&id)
        .map(|track| {
            json!({
                "id": track.id,
                "name": track.title,
                "ar": track.artists.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>(),
                "al": { "name": track.album, "picUrl": state.base.join("cover.jpg").unwrap().to_string() },
            })
        })
        .into_iter()
        .collect();

    Json(json!({ "code": 200, "songs": songs }))
}

async fn song_lyric(
    State(state): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    let id: u64 = form["id"].parse().unwrap();
    let track = state.tracks.get(&id);

    Json(json!({
        "code": 200,
        "lrc": { "lyric": track.and_then(|track| track.lyrics).unwrap_or_default() },
        "tlyric": { "lyric": track.and_then(|track| track.translated).unwrap_or_default() },
    }))
}

async fn cdn_file(
    State(state): State<Arc<MockState>>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Response {
    record(&state, &headers);
    let hits = state.hit(&file);

    if file == "flaky.flac" && hits <= state.flaky_failures {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match state.files.get(file.as_str()) {
        Some((content_type, body)) => {
            ([(header::CONTENT_TYPE, *content_type)], body.clone()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn cover(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    state.cover_hits.fetch_add(1, Ordering::SeqCst);

    // Give concurrent tracks a chance to ask for the cover as well.
    tokio::time::sleep(Duration::from_millis(100)).await;
    ([(header::CONTENT_TYPE, "image/jpeg")], jpeg_bytes())
}

/// A FLAC file with a STREAMINFO block and silence, `len` bytes long.
pub fn flac_bytes(len: usize) -> Vec<u8> {
    let mut data = b"fLaC".to_vec();

    // Last metadata block: STREAMINFO, 34 bytes.
    data.extend_from_slice(&[0x80, 0x00, 0x00, 34]);
    data.extend_from_slice(&4096u16.to_be_bytes());
    data.extend_from_slice(&4096u16.to_be_bytes());
    data.extend_from_slice(&[0; 3]);
    data.extend_from_slice(&[0; 3]);
    let packed: u64 = (44_100 << 44) | (1 << 41) | (15 << 36) | 44_100;
    data.extend_from_slice(&packed.to_be_bytes());
    data.extend_from_slice(&[0; 16]);

    data.resize(len.max(data.len()), 0);
    data
}

/// An MPEG-1 Layer III file of silent 128 kbit/s frames, about `len` bytes.
pub fn mp3_bytes(len: usize) -> Vec<u8> {
    const FRAME_SIZE: usize = 417;

    let mut frame = vec![0u8; FRAME_SIZE];
    frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);

    let mut data = Vec::with_capacity(len + FRAME_SIZE);
    while data.len() < len {
        data.extend_from_slice(&frame);
    }
    data
}

/// A JPEG header announcing a 1x1 image, padded to 2 KiB.
pub fn jpeg_bytes() -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];

    // APP0 JFIF
    data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
    data.extend_from_slice(b"JFIF\0");
    data.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);

    // SOF0: 8 bit, 1x1, three components
    data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08, 0x00, 0x01, 0x00, 0x01, 0x03]);
    data.extend_from_slice(&[0x01, 0x11, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);

    data.resize(2046, 0);
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}
