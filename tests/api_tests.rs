mod common;

use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::TcpListener;

use common::fixtures::test_config;
use common::images::{gradient, png_bytes};

use prism::catalog::Catalog;
use prism::config::Config;
use prism::detector::Detector;
use prism::embedding::ThumbnailEncoder;
use prism::index::SharedIndex;
use prism::server::routes::build_router;
use prism::server::AppState;
use prism::validators::NullTextExtractor;

const DIM: usize = 48;

/// Start a test server on a random port, returning (base_url, data dir).
async fn start_test_server() -> (String, TempDir) {
    start_test_server_with(|_| {}).await
}

async fn start_test_server_with(tweak: impl FnOnce(&mut Config)) -> (String, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path(), DIM);
    tweak(&mut config);

    let detector = Detector::new(
        &config,
        SharedIndex::open(&config.index).unwrap(),
        Catalog::load(&config.catalog.path).unwrap(),
        Arc::new(ThumbnailEncoder::new(DIM).unwrap()),
        Arc::new(NullTextExtractor),
    )
    .unwrap();

    let state = AppState {
        detector: Arc::new(detector),
        config: Arc::new(config),
    };

    let app = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{addr}");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base_url, dir)
}

async fn create_product(client: &reqwest::Client, base_url: &str, id: &str) -> reqwest::Response {
    client
        .post(format!("{base_url}/v1/products"))
        .json(&serde_json::json!({
            "id": id,
            "name": format!("{id} name"),
            "keywords": [id],
        }))
        .send()
        .await
        .unwrap()
}

async fn upload_reference(
    client: &reqwest::Client,
    base_url: &str,
    id: &str,
    body: Vec<u8>,
) -> reqwest::Response {
    client
        .post(format!("{base_url}/v1/products/{id}/references?angle=front"))
        .body(body)
        .send()
        .await
        .unwrap()
}

// ─── Health / metrics ───

#[tokio::test]
async fn test_health_check() {
    let (base_url, _dir) = start_test_server().await;

    let resp = reqwest::get(format!("{base_url}/healthz")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["index_entries"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (base_url, _dir) = start_test_server().await;
    reqwest::get(format!("{base_url}/healthz")).await.unwrap();

    let resp = reqwest::get(format!("{base_url}/metrics")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("prism_http_requests_total"));
}

// ─── Products ───

#[tokio::test]
async fn test_product_crud() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = create_product(&client, &base_url, "soda").await;
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["product"]["id"], "soda");
    assert_eq!(body["product"]["active"], true);

    let resp = create_product(&client, &base_url, "soda").await;
    assert_eq!(resp.status(), 409);

    let resp = client
        .get(format!("{base_url}/v1/products"))
        .send()
        .await
        .unwrap();
    let list: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["indexed_references"], 0);

    let resp = client
        .put(format!("{base_url}/v1/products/soda"))
        .json(&serde_json::json!({ "name": "Soda Zero" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["name"], "Soda Zero");

    let resp = client
        .delete(format!("{base_url}/v1/products/soda"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{base_url}/v1/products/soda"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_reference_upload_and_delete() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    create_product(&client, &base_url, "soda").await;

    let resp = upload_reference(&client, &base_url, "soda", png_bytes(&gradient(160, 120))).await;
    assert_eq!(resp.status(), 201);
    let reference: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(reference["angle"], "front");
    let ref_id = reference["id"].as_str().unwrap().to_string();

    let detail: serde_json::Value = client
        .get(format!("{base_url}/v1/products/soda"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["references"].as_array().unwrap().len(), 1);
    assert_eq!(detail["reference_images"].as_array().unwrap().len(), 1);

    let resp = client
        .delete(format!("{base_url}/v1/products/other/references/{ref_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .delete(format!("{base_url}/v1/products/soda/references/{ref_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["removed_embeddings"], 1);
}

#[tokio::test]
async fn test_reference_upload_rejects_garbage() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    create_product(&client, &base_url, "soda").await;

    let resp = upload_reference(&client, &base_url, "soda", b"not an image".to_vec()).await;
    assert_eq!(resp.status(), 400);

    let resp = upload_reference(&client, &base_url, "missing", png_bytes(&gradient(50, 50))).await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_locked_product_conflicts() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    create_product(&client, &base_url, "soda").await;

    client
        .put(format!("{base_url}/v1/products/soda"))
        .json(&serde_json::json!({ "locked": true }))
        .send()
        .await
        .unwrap();

    let resp = client
        .delete(format!("{base_url}/v1/products/soda"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = upload_reference(&client, &base_url, "soda", png_bytes(&gradient(50, 50))).await;
    assert_eq!(resp.status(), 409);
}

// ─── Detection ───

#[tokio::test]
async fn test_detect_finds_uploaded_reference() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    create_product(&client, &base_url, "soda").await;

    let image = png_bytes(&gradient(320, 320));
    let resp = upload_reference(&client, &base_url, "soda", image.clone()).await;
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{base_url}/v1/detect"))
        .body(image)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["width"], 320);
    assert_eq!(body["height"], 320);

    let detections = body["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0]["product_id"], "soda");
    assert!(detections[0]["confidence"].as_f64().unwrap() >= 0.75);
}

#[tokio::test]
async fn test_detect_empty_index() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base_url}/v1/detect?min_confidence=0.5"))
        .body(png_bytes(&gradient(200, 150)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_detect_rejects_bad_input() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base_url}/v1/detect"))
        .body(Vec::<u8>::new())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{base_url}/v1/detect"))
        .body(b"\x89PNG garbage".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("invalid image"));

    let resp = client
        .post(format!("{base_url}/v1/detect?min_confidence=1.5"))
        .body(png_bytes(&gradient(64, 64)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_oversized_upload_rejected() {
    let (base_url, _dir) = start_test_server_with(|config| {
        config.server.max_image_bytes = 1024;
    })
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base_url}/v1/detect"))
        .body(vec![0u8; 8 * 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);

    let resp = reqwest::get(format!("{base_url}/healthz")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

// ─── Index ───

#[tokio::test]
async fn test_index_stats_and_save() {
    let (base_url, dir) = start_test_server().await;
    let client = reqwest::Client::new();
    create_product(&client, &base_url, "soda").await;
    upload_reference(&client, &base_url, "soda", png_bytes(&gradient(100, 100))).await;

    let stats: serde_json::Value = client
        .get(format!("{base_url}/v1/index/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["index"]["total_embeddings"], 1);
    assert_eq!(stats["index"]["dimension"], DIM);
    assert_eq!(stats["learner"]["enabled"], true);

    let resp = client
        .post(format!("{base_url}/v1/index/save"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["entries"], 1);

    let base = dir.path().join("index").join("product_index");
    assert!(prism::index::snapshot::meta_path(&base).exists());
}
