mod common;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{
    detectors, multipart_request, png_bytes, seasonal_points, CannedTrends, ChannelMeanExtractor,
    Part,
};
use fashion_backend::config::AppConfig;
use fashion_backend::inference::ModelRegistry;
use fashion_backend::recommend::{EmbeddingIndex, Recommender};
use fashion_backend::routes::configure_routes;
use fashion_backend::storage::session::SessionStore;
use fashion_backend::textile::{TextureClassifier, TextureHead};
use fashion_backend::trends::{RetryPolicy, TrendService};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

struct Fixture {
    root: TempDir,
    config: AppConfig,
    models: ModelRegistry,
}

impl Fixture {
    fn new(models: ModelRegistry) -> Self {
        let root = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.storage.uploads_dir = root.path().join("uploads");
        config.storage.predictions_dir = root.path().join("predictions");
        std::fs::create_dir_all(&config.storage.uploads_dir).unwrap();
        std::fs::create_dir_all(&config.storage.predictions_dir).unwrap();
        Self { root, config, models }
    }

    fn uploads(&self) -> &Path {
        &self.config.storage.uploads_dir
    }

    fn predictions(&self) -> &Path {
        &self.config.storage.predictions_dir
    }
}

fn trend_service() -> TrendService {
    let source = CannedTrends(HashMap::from([("cashmere".to_string(), seasonal_points())]));
    let retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        jitter: 0.0,
    };
    TrendService::new(Arc::new(source), retry, 12)
}

macro_rules! app {
    ($fixture:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($fixture.config.clone()))
                .app_data(web::Data::new(SessionStore::new(
                    $fixture.uploads(),
                    $fixture.predictions(),
                )))
                .app_data(web::Data::new($fixture.models.clone()))
                .app_data(web::Data::new(trend_service()))
                .configure(|cfg| configure_routes(cfg, $fixture.predictions().to_path_buf())),
        )
        .await
    };
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut archive = Vec::new();
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut archive));
    for (name, body) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap();
    archive
}

fn with_detectors() -> ModelRegistry {
    ModelRegistry {
        detectors: Some(detectors()),
        ..Default::default()
    }
}

#[actix_web::test]
async fn predicts_a_single_image() {
    let fixture = Fixture::new(with_detectors());
    let app = app!(fixture);
    let image = png_bytes([200, 30, 30]);

    let req = multipart_request(
        "/predict/",
        &[
            Part::Text("user_id", "alice"),
            Part::Text("model_type", "garment"),
            Part::File("file", "look.png", &image),
        ],
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;

    assert_eq!(body["user_id"], "alice");
    assert_eq!(body["results"]["garment"]["shirt"], 1);
    assert!(fixture.predictions().join("alice/garment_look.png").exists());
    assert!(fixture.uploads().join("alice/look.png").exists());
}

#[actix_web::test]
async fn runs_the_chain_over_an_archive() {
    let fixture = Fixture::new(with_detectors());
    let app = app!(fixture);

    let image = png_bytes([10, 120, 10]);
    let archive = zip_bytes(&[
        ("a.png", &image),
        ("nested/b.png", &image),
        ("notes.txt", b"not an image"),
    ]);

    let req = multipart_request(
        "/predict/",
        &[
            Part::Text("user_id", "bob"),
            Part::Text("model_type", "all_in_one"),
            Part::File("file", "batch.zip", &archive),
        ],
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;

    assert_eq!(body["results"]["garment"]["shirt"], 2);
    assert_eq!(body["results"]["color"]["white"], 2);
    assert_eq!(body["results"]["color"]["black"], 2);
    assert_eq!(body["results"]["pattern"]["solid"], 2);
    let user_predictions = fixture.predictions().join("bob");
    assert!(user_predictions.join("pattern_color_garment_a.png").exists());
    assert!(user_predictions.join("pattern_color_garment_b.png").exists());
}

#[actix_web::test]
async fn finder_metadata_in_archives_is_ignored() {
    let fixture = Fixture::new(with_detectors());
    let app = app!(fixture);
    let image = png_bytes([90, 90, 90]);
    let archive = zip_bytes(&[
        ("looks/a.png", &image),
        ("__MACOSX/looks/._a.png", b"\x00\x05\x16\x07 appledouble"),
        ("looks/._a.png", b"\x00\x05\x16\x07 appledouble"),
    ]);

    let req = multipart_request(
        "/predict/",
        &[
            Part::Text("user_id", "mac"),
            Part::Text("model_type", "garment"),
            Part::File("file", "looks.zip", &archive),
        ],
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;

    assert_eq!(body["results"]["garment"]["shirt"], 1);
    assert!(fixture.predictions().join("mac/garment_a.png").exists());
    assert!(!fixture.uploads().join("mac/extracted/__MACOSX").exists());
}

#[actix_web::test]
async fn classifies_fabric_through_predict() {
    let head = TextureHead::from_json(
        r#"{
            "classes": ["silk", "denim"],
            "scaler": { "mean": [0.0, 0.0, 0.0], "scale": [1.0, 1.0, 1.0] },
            "pca": {
                "mean": [0.0, 0.0, 0.0],
                "components": [[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]
            },
            "classifier": { "coef": [[1.0, -1.0], [-1.0, 1.0]], "intercept": [0.0, 0.0] }
        }"#,
    )
    .unwrap();
    let fixture = Fixture::new(ModelRegistry {
        textile: Some(Arc::new(TextureClassifier::new(
            Arc::new(ChannelMeanExtractor),
            head,
            16,
        ))),
        ..Default::default()
    });
    let app = app!(fixture);
    let red = png_bytes([240, 20, 20]);
    let blue = png_bytes([20, 20, 240]);
    let archive = zip_bytes(&[("scarf.png", &red), ("jeans.png", &blue)]);

    let req = multipart_request(
        "/predict/",
        &[
            Part::Text("user_id", "fern"),
            Part::Text("model_type", "textile"),
            Part::File("file", "fabrics.zip", &archive),
        ],
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;

    assert_eq!(body["user_id"], "fern");
    assert_eq!(body["results"]["textile"]["scarf.png"], "silk");
    assert_eq!(body["results"]["textile"]["jeans.png"], "denim");
    assert!(body["results"].get("garment").is_none());
}

#[actix_web::test]
async fn a_new_request_resets_the_session() {
    let fixture = Fixture::new(with_detectors());
    let app = app!(fixture);
    let image = png_bytes([1, 2, 3]);

    for name in ["first.png", "second.png"] {
        let req = multipart_request(
            "/predict/",
            &[
                Part::Text("user_id", "carol"),
                Part::Text("model_type", "pattern"),
                Part::File("file", name, &image),
            ],
        )
        .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    let predictions = fixture.predictions().join("carol");
    assert!(!predictions.join("pattern_first.png").exists());
    assert!(predictions.join("pattern_second.png").exists());
    assert!(!fixture.uploads().join("carol/first.png").exists());
}

#[actix_web::test]
async fn rejects_bad_predict_requests() {
    let fixture = Fixture::new(with_detectors());
    let app = app!(fixture);
    let image = png_bytes([1, 2, 3]);

    let cases: Vec<(Vec<Part<'_>>, StatusCode)> = vec![
        (
            vec![
                Part::Text("user_id", "dave"),
                Part::Text("model_type", "shoes"),
                Part::File("file", "x.png", &image),
            ],
            StatusCode::BAD_REQUEST,
        ),
        (
            vec![
                Part::Text("user_id", "../dave"),
                Part::Text("model_type", "garment"),
                Part::File("file", "x.png", &image),
            ],
            StatusCode::BAD_REQUEST,
        ),
        (
            vec![
                Part::Text("user_id", "dave"),
                Part::Text("model_type", "garment"),
                Part::File("file", "x.7z", b"7z"),
            ],
            StatusCode::BAD_REQUEST,
        ),
        (
            vec![Part::Text("user_id", "dave"), Part::Text("model_type", "garment")],
            StatusCode::BAD_REQUEST,
        ),
    ];

    for (parts, status) in cases {
        let req = multipart_request("/predict/", &parts).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), status);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }
    // "../dave" would have resolved next to the uploads root.
    assert!(!fixture.root.path().join("dave").exists());
}

#[actix_web::test]
async fn missing_models_answer_503() {
    let fixture = Fixture::new(ModelRegistry::default());
    let app = app!(fixture);
    let image = png_bytes([1, 2, 3]);

    let req = multipart_request(
        "/predict/",
        &[
            Part::Text("user_id", "erin"),
            Part::Text("model_type", "textile"),
            Part::File("file", "x.png", &image),
        ],
    )
    .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    let req = multipart_request("/recommend-binary/", &[Part::File("file", "q.png", &image)])
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[actix_web::test]
async fn recommends_similar_images_and_cleans_up() {
    let catalog = TempDir::new().unwrap();
    let red = catalog.path().join("red.png");
    let blue = catalog.path().join("blue.png");
    std::fs::write(&red, png_bytes([250, 5, 5])).unwrap();
    std::fs::write(&blue, png_bytes([5, 5, 250])).unwrap();

    // ImageNet-normalised channel means of pure red and pure blue.
    let index = EmbeddingIndex::from_items(vec![
        (red.clone(), vec![2.2, -2.0, -1.8]),
        (blue.clone(), vec![-2.1, -2.0, 2.6]),
    ])
    .unwrap();
    let recommender = Recommender::new(Arc::new(ChannelMeanExtractor), index, 6, 16);
    let fixture = Fixture::new(ModelRegistry {
        recommender: Some(Arc::new(recommender)),
        ..Default::default()
    });
    let app = app!(fixture);

    let query = png_bytes([240, 10, 10]);
    let req = multipart_request("/recommend-binary/", &[Part::File("file", "query.png", &query)])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;

    let images = body["recommended_images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    let first = STANDARD.decode(images[0].as_str().unwrap()).unwrap();
    assert_eq!(first, std::fs::read(&red).unwrap());
    assert_eq!(std::fs::read_dir(fixture.uploads()).unwrap().count(), 0);
}

#[actix_web::test]
async fn fetches_trends_and_reports_unknown_keywords() {
    let fixture = Fixture::new(ModelRegistry::default());
    let app = app!(fixture);

    let req = test::TestRequest::get().uri("/fetch_trends/cashmere").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["keyword"], "cashmere");
    assert_eq!(body["peak_month"], 12);
    assert_eq!(body["low_month"], 6);
    assert_eq!(body["historical_data"]["dates"].as_array().unwrap().len(), 24);
    assert_eq!(body["forecast_data"]["values"].as_array().unwrap().len(), 12);

    let req = test::TestRequest::get().uri("/fetch_trends/corduroy").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("corduroy"));
}

#[actix_web::test]
async fn health_reports_loaded_models() {
    let fixture = Fixture::new(with_detectors());
    let app = app!(fixture);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["detectors"], true);
    assert_eq!(body["recommender"], false);
}
