//! Shared test fixtures: in-process bundle host and test catalogs
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::sync::broadcast;

use voicepack::installer::{StateEvent, VoiceState};
use voicepack::{Catalog, ManagerConfig, QualityTier, VoiceDescriptor};

/// How a fixture file is served
pub enum Served {
    /// Plain bytes with a content length
    Bytes(Vec<u8>),
    /// HTTP 500 on the first request, bytes on subsequent ones
    FailThenBytes(Vec<u8>),
    /// Streamed in 1 KiB chunks with a delay between them
    Slow(Vec<u8>),
    /// HTTP 404
    NotFound,
}

#[derive(Clone)]
struct ServerState {
    files: Arc<HashMap<String, Served>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

/// An in-process HTTP host for voice bundles and sidecars
pub struct FixtureServer {
    pub base_url: String,
    state: ServerState,
}

impl FixtureServer {
    pub async fn start(files: HashMap<String, Served>) -> Self {
        let state = ServerState {
            files: Arc::new(files),
            hits: Arc::new(Mutex::new(HashMap::new())),
        };
        let app = Router::new()
            .route("/files/{name}", get(serve_file))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    /// How many requests a fixture file has received
    pub fn hits(&self, name: &str) -> usize {
        *self.state.hits.lock().unwrap().get(name).unwrap_or(&0)
    }
}

async fn serve_file(State(state): State<ServerState>, UrlPath(name): UrlPath<String>) -> Response {
    let count = {
        let mut hits = state.hits.lock().unwrap();
        let count = hits.entry(name.clone()).or_insert(0);
        *count += 1;
        *count
    };

    match state.files.get(&name) {
        Some(Served::Bytes(bytes)) => (StatusCode::OK, bytes.clone()).into_response(),
        Some(Served::FailThenBytes(bytes)) => {
            if count == 1 {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            } else {
                (StatusCode::OK, bytes.clone()).into_response()
            }
        }
        Some(Served::Slow(bytes)) => {
            let chunks: Vec<Vec<u8>> = bytes.chunks(1024).map(<[u8]>::to_vec).collect();
            let stream = futures::stream::unfold(chunks.into_iter(), |mut it| async move {
                let chunk = it.next()?;
                tokio::time::sleep(Duration::from_millis(25)).await;
                Some((Ok::<_, std::io::Error>(Bytes::from(chunk)), it))
            });
            Response::new(Body::from_stream(stream))
        }
        Some(Served::NotFound) | None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Build a gzipped tarball in memory, optionally nested in a wrapper dir
pub fn make_bundle(wrapper: Option<&str>, files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in files {
        let path = wrapper.map_or_else(|| (*name).to_string(), |w| format!("{w}/{name}"));
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// A typical bundle: one model file wrapped in a stem-named directory
pub fn wrapped_bundle(id: &str) -> Vec<u8> {
    make_bundle(Some(id), &[("voice.onnx", b"onnx weights")])
}

/// A descriptor pointing at the fixture server
pub fn test_voice(base_url: &str, id: &str, removable: bool) -> VoiceDescriptor {
    VoiceDescriptor {
        id: id.to_string(),
        display_name: format!("Test voice {id}"),
        quality: QualityTier::Low,
        locale: "en-US".to_string(),
        format: "vits".to_string(),
        bundle_url: format!("{base_url}/files/{id}.tar.gz"),
        size_bytes: 100_000,
        removable,
    }
}

/// Manager config rooted at a scratch dir, shared data pointed at the host
pub fn test_config(data_dir: PathBuf, base_url: &str) -> ManagerConfig {
    let mut config = ManagerConfig::with_data_dir(data_dir);
    config.shared_data_url = format!("{base_url}/files/phoneme-data.tar.gz");
    config.download_timeout = Duration::from_secs(30);
    config
}

/// Pre-create the shared data marker so installs skip its download
pub fn premark_shared_data(config: &ManagerConfig) {
    std::fs::create_dir_all(config.shared_data_dir()).unwrap();
}

/// A catalog of fixture voices
pub fn test_catalog(base_url: &str, ids: &[&str]) -> Catalog {
    Catalog::new(ids.iter().map(|id| test_voice(base_url, id, true)).collect())
}

/// Drain events for `id` until a non-installing state arrives
pub async fn wait_for_terminal(rx: &mut broadcast::Receiver<StateEvent>, id: &str) -> VoiceState {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if event.voice_id == id => match event.state {
                    VoiceState::Installing { .. } => {}
                    state => return state,
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .expect("timed out waiting for terminal state")
}

/// Collect the progress sequence for `id` until a terminal state arrives
pub async fn collect_progress(
    rx: &mut broadcast::Receiver<StateEvent>,
    id: &str,
) -> (Vec<f32>, VoiceState) {
    let mut progress = Vec::new();
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if event.voice_id == id => match event.state {
                    VoiceState::Installing { progress: p } => progress.push(p),
                    state => return state,
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    };
    let state = tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .expect("timed out waiting for terminal state");
    (progress, state)
}
