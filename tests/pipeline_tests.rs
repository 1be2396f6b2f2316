// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests for the loader worker
//!
//! Every test starts a local axum server on `127.0.0.1:0` serving fixture
//! models, spawns a worker, and drives it only through protocol messages.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use glbpipe::codec::{BuiltinCodecFactory, Codec, CodecError, CodecFactory, CodecInitError, CodecKind};
use glbpipe::config::{CodecConfig, WorkerConfig};
use glbpipe::container::{write_glb, ContainerDocument, ContainerFormat};
use glbpipe::protocol::{Request, Response, ResponseKind};
use glbpipe::task::TaskState;
use glbpipe::worker::{Worker, WorkerHandle};
use glbpipe::MemoryModelCache;

// Test configuration
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
const QUIET_PERIOD: Duration = Duration::from_millis(400);
const SLOW_CHUNKS: usize = 64;
const SLOW_CHUNK_LEN: usize = 1024;
const SLOW_DELAY: Duration = Duration::from_millis(50);

// =============================================================================
// FIXTURES
// =============================================================================

const POSITIONS: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn glb(json: Value, bin: &[u8]) -> Vec<u8> {
    let document = ContainerDocument::from_json(json, Some(bin.len())).unwrap();
    write_glb(&document, Some(bin)).unwrap()
}

fn triangle_glb() -> Vec<u8> {
    let mut bin = f32_bytes(&POSITIONS);
    bin.extend_from_slice(&[0, 0, 1, 0, 2, 0, 0, 0]);
    glb(
        json!({
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": [{ "mesh": 0 }],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }] }],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3" },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
            ],
            "bufferViews": [
                { "buffer": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 6 }
            ],
            "buffers": [{ "byteLength": 44 }]
        }),
        &bin,
    )
}

/// A primitive whose geometry sits behind the geometry codec marker.
fn compressed_glb() -> Vec<u8> {
    let mut payload = f32_bytes(&POSITIONS);
    payload.extend_from_slice(&[0, 0, 1, 0, 2, 0]);
    let packed = lz4_flex::compress_prepend_size(&payload);
    glb(
        json!({
            "asset": { "version": "2.0" },
            "extensionsUsed": ["KHR_draco_mesh_compression"],
            "extensionsRequired": ["KHR_draco_mesh_compression"],
            "nodes": [{ "mesh": 0 }],
            "meshes": [{ "primitives": [{
                "attributes": { "POSITION": 0 },
                "indices": 1,
                "extensions": { "KHR_draco_mesh_compression": { "bufferView": 0, "attributes": { "POSITION": 0 } } }
            }] }],
            "accessors": [
                { "componentType": 5126, "count": 3, "type": "VEC3" },
                { "componentType": 5123, "count": 3, "type": "SCALAR" }
            ],
            "bufferViews": [{ "buffer": 0, "byteLength": packed.len() }]
        }),
        &packed,
    )
}

fn version3_glb() -> Vec<u8> {
    let mut bytes = triangle_glb();
    bytes[4..8].copy_from_slice(&3u32.to_le_bytes());
    bytes
}

fn external_gltf() -> (Vec<u8>, Vec<u8>) {
    let bin = f32_bytes(&POSITIONS);
    let json = json!({
        "asset": { "version": "2.0" },
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
        "accessors": [{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3" }],
        "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
        "buffers": [{ "byteLength": 36, "uri": "scene.bin" }]
    });
    (serde_json::to_vec(&json).unwrap(), bin)
}

/// A remote document whose buffer points at the worker's own filesystem.
fn escaping_gltf() -> Vec<u8> {
    let json = json!({
        "asset": { "version": "2.0" },
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
        "accessors": [{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3" }],
        "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
        "buffers": [{ "byteLength": 36, "uri": "file:///etc/hostname" }]
    });
    serde_json::to_vec(&json).unwrap()
}

fn slow_body() -> Body {
    let stream = futures_util::stream::unfold(0usize, |i| async move {
        if i >= SLOW_CHUNKS {
            return None;
        }
        tokio::time::sleep(SLOW_DELAY).await;
        Some((Ok::<_, std::io::Error>(vec![0u8; SLOW_CHUNK_LEN]), i + 1))
    });
    Body::from_stream(stream)
}

struct Fixtures {
    base: String,
    triangle_hits: Arc<AtomicUsize>,
}

impl Fixtures {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }
}

async fn serve_fixtures() -> Fixtures {
    let triangle = triangle_glb();
    let compressed = compressed_glb();
    let version3 = version3_glb();
    let (gltf, gltf_bin) = external_gltf();
    let escaping = escaping_gltf();
    let triangle_hits = Arc::new(AtomicUsize::new(0));
    let hits = triangle_hits.clone();

    let app = Router::new()
        .route(
            "/triangle.glb",
            get(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                let body = triangle.clone();
                async move { body }
            }),
        )
        .route("/compressed.glb", get(move || {
            let body = compressed.clone();
            async move { body }
        }))
        .route("/version3.glb", get(move || {
            let body = version3.clone();
            async move { body }
        }))
        .route("/models/scene.gltf", get(move || {
            let body = gltf.clone();
            async move { body }
        }))
        .route("/models/scene.bin", get(move || {
            let body = gltf_bin.clone();
            async move { body }
        }))
        .route("/models/escaping.gltf", get(move || {
            let body = escaping.clone();
            async move { body }
        }))
        .route("/slow.glb", get(|| async { slow_body() }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Fixtures {
        base: format!("http://{}", addr),
        triangle_hits,
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn spawn_worker() -> (WorkerHandle, UnboundedReceiver<Response>) {
    Worker::new(WorkerConfig::default()).spawn().unwrap()
}

/// Receive until a terminal response for `id` arrives. Returns every
/// response for `id`, terminal last.
async fn until_terminal(rx: &mut UnboundedReceiver<Response>, id: &str) -> Vec<Response> {
    let mut seen = Vec::new();
    loop {
        let response = timeout(RESPONSE_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for worker")
            .expect("worker closed the response stream");
        if response.id.as_deref() != Some(id) {
            continue;
        }
        let terminal = response.is_terminal();
        seen.push(response);
        if terminal {
            return seen;
        }
    }
}

/// Everything received until the stream stays quiet for `QUIET_PERIOD`.
async fn drain(rx: &mut UnboundedReceiver<Response>) -> Vec<Response> {
    let mut seen = Vec::new();
    while let Ok(Some(response)) = timeout(QUIET_PERIOD, rx.recv()).await {
        seen.push(response);
    }
    seen
}

async fn wait_for_final_state(handle: &WorkerHandle, id: &str) -> Option<TaskState> {
    for _ in 0..100 {
        let state = handle.context().tasks.final_state(id);
        if state.is_some_and(|s| s.is_terminal()) && handle.context().tasks.state(id).is_none() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.context().tasks.final_state(id)
}

fn percents(responses: &[Response]) -> Vec<f64> {
    responses
        .iter()
        .filter(|r| r.kind == ResponseKind::Progress)
        .filter_map(|r| r.data.progress)
        .collect()
}

// =============================================================================
// COMPLETION AND PROGRESS
// =============================================================================

#[tokio::test]
async fn test_load_completes_with_monotonic_progress() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = spawn_worker();
    let url = fixtures.url("triangle.glb");

    handle.send(Request::load("t1", &url, None)).unwrap();
    let responses = until_terminal(&mut rx, "t1").await;

    let last = responses.last().unwrap().clone();
    assert_eq!(last.kind, ResponseKind::Complete);

    let percents = percents(&responses);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    assert_eq!(percents.iter().filter(|p| **p == 100.0).count(), 1);
    assert_eq!(percents.last(), Some(&100.0));

    let model = last.into_model().unwrap();
    assert_eq!(model.scene.vertex_count(), 3);
    assert_eq!(model.metadata.url, url);
    assert_eq!(model.metadata.format, ContainerFormat::Glb);
    assert!(model.metadata.load_steps.iter().any(|s| s == "Downloading model"));

    assert_eq!(wait_for_final_state(&handle, "t1").await, Some(TaskState::Completed));
    assert!(handle.context().tasks.is_empty());
}

#[tokio::test]
async fn test_textual_document_with_external_buffer() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = spawn_worker();

    handle
        .send(Request::load("g1", fixtures.url("models/scene.gltf"), None))
        .unwrap();
    let responses = until_terminal(&mut rx, "g1").await;
    let model = responses.last().unwrap().clone().into_model().unwrap();

    assert_eq!(model.metadata.format, ContainerFormat::Gltf);
    let prim = &model.scene.meshes[0].primitives[0];
    assert_eq!(prim.attribute("POSITION").unwrap().to_f32().unwrap(), POSITIONS.to_vec());
}

#[tokio::test]
async fn test_geometry_codec_decodes_on_worker() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = spawn_worker();

    handle
        .send(Request::load("c1", fixtures.url("compressed.glb"), None))
        .unwrap();
    let responses = until_terminal(&mut rx, "c1").await;
    let model = responses.last().unwrap().clone().into_model().unwrap();

    assert_eq!(model.metadata.codecs_used, vec![CodecKind::Geometry]);
    let indices = model.scene.meshes[0].primitives[0].indices.as_ref().unwrap();
    assert_eq!(indices.to_indices(), Some(vec![0, 1, 2]));
}

// =============================================================================
// FAILURES
// =============================================================================

#[tokio::test]
async fn test_missing_model_is_network_error() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = spawn_worker();

    handle
        .send(Request::load("n1", fixtures.url("nope.glb"), None))
        .unwrap();
    let responses = until_terminal(&mut rx, "n1").await;
    let last = responses.last().unwrap();

    assert_eq!(last.kind, ResponseKind::Error);
    assert_eq!(last.data.error.as_deref(), Some("network-error"));
    assert!(last.data.message.as_deref().unwrap().contains("404"));
}

#[tokio::test]
async fn test_version_3_container_fails_parse() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = spawn_worker();

    handle
        .send(Request::load("v3", fixtures.url("version3.glb"), None))
        .unwrap();
    let responses = until_terminal(&mut rx, "v3").await;
    let last = responses.last().unwrap();

    assert_eq!(last.kind, ResponseKind::Error);
    assert_eq!(last.data.error.as_deref(), Some("unsupported-version"));
    assert_eq!(wait_for_final_state(&handle, "v3").await, Some(TaskState::Failed));
}

#[tokio::test]
async fn test_remote_model_cannot_reference_local_files() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = spawn_worker();

    handle
        .send(Request::load("esc", fixtures.url("models/escaping.gltf"), None))
        .unwrap();
    let responses = until_terminal(&mut rx, "esc").await;
    let last = responses.last().unwrap();

    assert_eq!(last.kind, ResponseKind::Error);
    assert_eq!(last.data.error.as_deref(), Some("invalid-model"));
    assert!(last.data.message.as_deref().unwrap().contains("file:///etc/hostname"));
    assert_eq!(wait_for_final_state(&handle, "esc").await, Some(TaskState::Failed));
}

#[tokio::test]
async fn test_disabled_codec_fails_only_the_task_that_needs_it() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = spawn_worker();
    let config = CodecConfig::default().without(CodecKind::Geometry);

    handle
        .send(Request::load("needs", fixtures.url("compressed.glb"), Some(config.clone())))
        .unwrap();
    handle
        .send(Request::load("plain", fixtures.url("triangle.glb"), Some(config)))
        .unwrap();

    let needs = until_terminal(&mut rx, "needs").await;
    let failed = needs.last().unwrap();
    assert_eq!(failed.kind, ResponseKind::Error);
    assert_eq!(failed.data.error.as_deref(), Some("missing-codec"));
    let message = failed.data.message.as_deref().unwrap();
    assert!(message.contains("geometry"), "{}", message);
    assert!(message.contains("meshes[0].primitives[0]"), "{}", message);

    assert_eq!(wait_for_final_state(&handle, "plain").await, Some(TaskState::Completed));
}

#[derive(Debug)]
struct PanickingCodec(CodecKind);

impl Codec for PanickingCodec {
    fn kind(&self) -> CodecKind {
        self.0
    }

    fn resource_path(&self) -> &str {
        "test:panic"
    }

    fn decode(&self, _input: &[u8], _expected_len: Option<usize>) -> Result<Vec<u8>, CodecError> {
        panic!("decoder exploded");
    }
}

struct PanickingFactory;

impl CodecFactory for PanickingFactory {
    fn create(&self, kind: CodecKind, _resource_path: &str) -> Result<Arc<dyn Codec>, CodecInitError> {
        Ok(Arc::new(PanickingCodec(kind)))
    }
}

#[tokio::test]
async fn test_panicking_task_reports_global_and_task_error() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = Worker::new(WorkerConfig::default())
        .with_codec_factory(Arc::new(PanickingFactory))
        .spawn()
        .unwrap();

    handle
        .send(Request::load("boom", fixtures.url("compressed.glb"), None))
        .unwrap();

    let mut errors = Vec::new();
    while errors.len() < 2 {
        let response = timeout(RESPONSE_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        if response.kind == ResponseKind::Error {
            errors.push(response);
        }
    }

    let global = errors.iter().find(|r| r.id.is_none()).expect("global error");
    assert!(global.data.stack.as_deref().unwrap().contains("decoder exploded"));

    // The host also learns that its own task ended.
    let task = errors.iter().find(|r| r.id.as_deref() == Some("boom")).expect("task error");
    assert_eq!(task.data.error.as_deref(), Some("internal-error"));
    assert!(task.data.message.as_deref().unwrap().contains("decoder exploded"));
    assert_eq!(wait_for_final_state(&handle, "boom").await, Some(TaskState::Failed));
}

// =============================================================================
// CANCELLATION
// =============================================================================

/// Blocks the first codec construction until released, which holds the
/// worker thread inside `init` while the test queues more requests.
struct GateFactory {
    gate: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
}

impl CodecFactory for GateFactory {
    fn create(&self, kind: CodecKind, resource_path: &str) -> Result<Arc<dyn Codec>, CodecInitError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(RESPONSE_TIMEOUT);
        }
        BuiltinCodecFactory.create(kind, resource_path)
    }
}

#[tokio::test]
async fn test_cancel_before_first_progress_is_silent() {
    let fixtures = serve_fixtures().await;
    let (release, gate) = std::sync::mpsc::channel();
    let (handle, mut rx) = Worker::new(WorkerConfig::default())
        .with_codec_factory(Arc::new(GateFactory {
            gate: Mutex::new(Some(gate)),
        }))
        .spawn()
        .unwrap();

    handle.send(Request::Init { data: CodecConfig::default() }).unwrap();
    handle
        .send(Request::load("early", fixtures.url("triangle.glb"), None))
        .unwrap();
    handle.send(Request::Cancel { id: "early".into() }).unwrap();
    release.send(()).unwrap();

    let responses = drain(&mut rx).await;
    assert!(responses.iter().any(|r| r.kind == ResponseKind::Complete && r.id.is_none()));
    assert!(
        responses.iter().all(|r| r.id.as_deref() != Some("early")),
        "{:?}",
        responses
    );
    assert_eq!(wait_for_final_state(&handle, "early").await, Some(TaskState::Cancelled));
}

#[tokio::test]
async fn test_cancel_mid_download_stops_messages_and_stream() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = spawn_worker();

    handle
        .send(Request::load("slow", fixtures.url("slow.glb"), None))
        .unwrap();

    loop {
        let response = timeout(RESPONSE_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(response.kind, ResponseKind::Progress);
        if response.data.loaded.is_some() {
            break;
        }
    }
    assert!(handle.cancel("slow"));

    // Whatever was queued before cancel returned is already in the channel.
    let mut queued = Vec::new();
    while let Ok(response) = rx.try_recv() {
        queued.push(response);
    }
    assert!(queued.iter().all(|r| !r.is_terminal()), "{:?}", queued);

    // Nothing is queued afterwards.
    let after = drain(&mut rx).await;
    assert!(after.is_empty(), "{:?}", after);

    // The stream is dropped long before the remaining chunks would arrive.
    let remaining = SLOW_DELAY * SLOW_CHUNKS as u32;
    let state = timeout(remaining / 2, async {
        loop {
            if handle.context().tasks.state("slow").is_none() {
                break handle.context().tasks.final_state("slow");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task entry was not released");
    assert_eq!(state, Some(TaskState::Cancelled));
    assert!(!handle.cancel("slow"));
}

#[tokio::test]
async fn test_duplicate_live_id_is_refused() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = spawn_worker();

    handle
        .send(Request::load("dup", fixtures.url("slow.glb"), None))
        .unwrap();
    loop {
        let response = timeout(RESPONSE_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        if response.data.loaded.is_some() {
            break;
        }
    }
    handle
        .send(Request::load("dup", fixtures.url("triangle.glb"), None))
        .unwrap();

    let refusal = loop {
        let response = timeout(RESPONSE_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        if response.kind == ResponseKind::Error {
            break response;
        }
    };
    assert!(refusal.id.is_none());
    assert_eq!(refusal.data.error.as_deref(), Some("duplicate-task"));
    assert!(refusal.data.message.as_deref().unwrap().contains("dup"));

    // The running task is untouched and still cancellable.
    assert_eq!(handle.context().tasks.get("dup").unwrap().url, fixtures.url("slow.glb"));
    assert!(handle.cancel("dup"));
    assert_eq!(wait_for_final_state(&handle, "dup").await, Some(TaskState::Cancelled));
    assert_eq!(fixtures.triangle_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dispose_cancels_active_tasks() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = spawn_worker();

    handle.send(Request::Init { data: CodecConfig::default() }).unwrap();
    handle
        .send(Request::load("slow", fixtures.url("slow.glb"), None))
        .unwrap();

    loop {
        let response = timeout(RESPONSE_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        if response.id.as_deref() == Some("slow") && response.data.loaded.is_some() {
            break;
        }
    }
    handle.send(Request::Dispose).unwrap();

    let after = drain(&mut rx).await;
    let terminal: Vec<_> = after.iter().filter(|r| r.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert!(terminal[0].id.is_none());
    assert_eq!(terminal[0].data.message.as_deref(), Some("disposed"));
    assert_eq!(wait_for_final_state(&handle, "slow").await, Some(TaskState::Cancelled));
    assert!(handle.context().codecs.is_empty());
}

// =============================================================================
// ISOLATION AND CACHING
// =============================================================================

#[tokio::test]
async fn test_concurrent_tasks_are_isolated() {
    let fixtures = serve_fixtures().await;
    let (handle, mut rx) = spawn_worker();
    let triangle_len = triangle_glb().len() as u64;
    let compressed_len = compressed_glb().len() as u64;

    handle
        .send(Request::load("a", fixtures.url("triangle.glb"), None))
        .unwrap();
    handle
        .send(Request::load("b", fixtures.url("compressed.glb"), None))
        .unwrap();

    let mut by_id: std::collections::HashMap<String, Vec<Response>> = Default::default();
    while by_id.values().filter(|v| v.last().is_some_and(|r| r.is_terminal())).count() < 2 {
        let response = timeout(RESPONSE_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        let id = response.id.clone().expect("every response here belongs to a task");
        by_id.entry(id).or_default().push(response);
    }

    for (id, len) in [("a", triangle_len), ("b", compressed_len)] {
        let responses = &by_id[id];
        for r in responses.iter().filter(|r| r.data.loaded.is_some()) {
            assert!(r.data.loaded.unwrap() <= len);
            assert_eq!(r.data.total, Some(len));
        }
        let p = percents(responses);
        assert!(p.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(responses.last().unwrap().kind, ResponseKind::Complete);
    }

    let a = by_id.remove("a").unwrap().pop().unwrap().into_model().unwrap();
    let b = by_id.remove("b").unwrap().pop().unwrap().into_model().unwrap();
    assert!(a.metadata.codecs_used.is_empty());
    assert_eq!(b.metadata.codecs_used, vec![CodecKind::Geometry]);
    assert_ne!(a.metadata.url, b.metadata.url);
}

#[tokio::test]
async fn test_cache_serves_repeat_loads() {
    let fixtures = serve_fixtures().await;
    let cache = Arc::new(MemoryModelCache::default());
    let (handle, mut rx) = Worker::new(WorkerConfig::default())
        .with_cache(cache.clone())
        .spawn()
        .unwrap();
    let url = fixtures.url("triangle.glb");

    handle.send(Request::load("first", &url, None)).unwrap();
    until_terminal(&mut rx, "first").await;
    handle.send(Request::load("second", &url, None)).unwrap();
    let responses = until_terminal(&mut rx, "second").await;

    let model = responses.last().unwrap().clone().into_model().unwrap();
    assert!(model.metadata.load_steps.iter().any(|s| s == "cache-hit"));
    assert_eq!(fixtures.triangle_hits.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
}

// =============================================================================
// LOCAL FILES
// =============================================================================

#[tokio::test]
async fn test_local_path_loads_without_server() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("triangle.glb");
    std::fs::write(&path, triangle_glb()).unwrap();
    let (handle, mut rx) = spawn_worker();
    let url = path.to_string_lossy().into_owned();

    handle.send(Request::load("local", &url, None)).unwrap();
    let responses = until_terminal(&mut rx, "local").await;

    let total = triangle_glb().len() as u64;
    assert!(responses.iter().any(|r| r.data.loaded == Some(total)));
    let model = responses.last().unwrap().clone().into_model().unwrap();
    assert_eq!(model.scene.vertex_count(), 3);
}
