//! HTTP API behavior with fake hardware behind the session controller.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode, header};
use chrono::Local;
use image::{GrayImage, Rgb, RgbImage};
use tempfile::TempDir;
use tower::ServiceExt;

use photobooth::camera::FrameSource;
use photobooth::config::{AuthConfig, SessionConfig};
use photobooth::error::Error;
use photobooth::printer::PrintDevice;
use photobooth::session::SessionController;
use photobooth::status::SessionMode;
use photobooth::store::PhotoStore;
use photobooth::web::{AppState, router};

struct FakeCamera;

impl FrameSource for FakeCamera {
    fn capture_frame(&mut self, _timeout: Duration) -> Result<RgbImage, Error> {
        Ok(RgbImage::from_pixel(64, 48, Rgb([10, 20, 30])))
    }
}

struct FakePrinter {
    jobs: Arc<Mutex<u32>>,
}

impl PrintDevice for FakePrinter {
    fn print_image(&mut self, _raster: &GrayImage) -> Result<(), Error> {
        *self.jobs.lock().expect("jobs") += 1;
        Ok(())
    }

    fn print_text(&mut self, _lines: &[String]) -> Result<(), Error> {
        Ok(())
    }
}

struct TestApp {
    app: Router,
    controller: SessionController,
    store: PhotoStore,
    print_jobs: Arc<Mutex<u32>>,
    _dir: TempDir,
}

fn test_app(password: Option<&str>) -> TestApp {
    test_app_with_countdown(password, Duration::ZERO)
}

fn test_app_with_countdown(password: Option<&str>, countdown: Duration) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PhotoStore::open(dir.path()).expect("store");
    let print_jobs = Arc::new(Mutex::new(0));
    let cfg = SessionConfig {
        countdown,
        strip_gap: Duration::from_millis(10),
        strip_shots: 3,
        result_display: Duration::from_secs(1),
    };
    let controller = SessionController::spawn(
        cfg,
        Box::new(FakeCamera),
        Box::new(FakePrinter {
            jobs: Arc::clone(&print_jobs),
        }),
        store.clone(),
        384,
        Duration::from_secs(5),
    )
    .expect("spawn controller");
    let auth = AuthConfig {
        password: password.map(str::to_string),
    };
    let state = AppState::new(controller.clone(), store.clone(), &auth);
    TestApp {
        app: router(state),
        controller,
        store,
        print_jobs,
        _dir: dir,
    }
}

async fn send(app: &TestApp, method: &str, path: &str) -> Response<Body> {
    let req = Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .expect("request");
    app.app.clone().oneshot(req).await.expect("response")
}

async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

async fn wait_for_idle(app: &TestApp) {
    let mut reader = app.controller.status_reader();
    tokio::time::timeout(
        Duration::from_secs(10),
        reader.wait_for(|s| s.mode == SessionMode::Idle && s.generation > 0),
    )
    .await
    .expect("session completes");
}

fn seed_photo(app: &TestApp) -> String {
    let img = RgbImage::from_pixel(32, 24, Rgb([1, 2, 3]));
    app.store
        .save(&img, "photo", Local::now())
        .expect("seed photo")
        .filename
}

#[tokio::test]
async fn status_starts_ready() {
    let app = test_app(None);
    let response = send(&app, "GET", "/api/status").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["in_progress"], false);
    assert_eq!(body["message"], "Ready to take photos!");
}

#[tokio::test]
async fn concurrent_start_is_rejected_with_conflict() {
    let app = test_app_with_countdown(None, Duration::from_millis(500));

    let response = send(&app, "POST", "/api/photo").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, "POST", "/api/strip").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["message"], "busy");

    wait_for_idle(&app).await;
}

#[tokio::test]
async fn finished_session_exposes_photo_url() {
    let app = test_app(None);

    send(&app, "POST", "/api/photo").await;
    let mut reader = app.controller.status_reader();
    let snap = tokio::time::timeout(
        Duration::from_secs(10),
        reader.wait_for(|s| s.mode == SessionMode::Success),
    )
    .await
    .expect("session succeeds");

    let response = send(&app, "GET", "/api/status").await;
    let body = json_body(response).await;
    let filename = snap.photo_filename.expect("filename");
    assert_eq!(body["photo_url"], format!("/photos/{filename}"));

    let response = send(&app, "GET", &format!("/photos/{filename}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "image/jpeg"
    );
}

#[tokio::test]
async fn gallery_endpoints_cover_like_and_delete() {
    let app = test_app(None);
    let filename = seed_photo(&app);

    let response = send(&app, "GET", "/api/photos").await;
    let body = json_body(response).await;
    assert_eq!(body["photos"][0]["filename"], filename);
    assert_eq!(body["photos"][0]["liked"], false);

    let response = send(&app, "POST", &format!("/api/like/{filename}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(send(&app, "GET", "/api/photos").await).await;
    assert_eq!(body["photos"][0]["liked"], true);

    let response = send(&app, "POST", &format!("/api/delete/{filename}")).await;
    assert_eq!(json_body(response).await["status"], "success");
    let body = json_body(send(&app, "GET", "/api/photos").await).await;
    assert_eq!(body["photos"].as_array().expect("array").len(), 0);

    // Everything 404s once the photo is gone.
    for path in [
        format!("/api/like/{filename}"),
        format!("/api/delete/{filename}"),
    ] {
        let response = send(&app, "POST", &path).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    let response = send(&app, "GET", &format!("/photos/{filename}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reprint_sends_stored_photo_to_printer() {
    let app = test_app(None);
    let filename = seed_photo(&app);

    let response = send(&app, "POST", &format!("/api/reprint/{filename}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "success");
    assert_eq!(*app.print_jobs.lock().expect("jobs"), 1);

    let response = send(&app, "POST", "/api/reprint/missing.jpg").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn auth_gate_blocks_without_cookie() {
    let app = test_app(Some("hunter2"));

    let response = send(&app, "GET", "/api/status").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Auth endpoints stay reachable so a client can log in.
    let response = send(&app, "GET", "/api/auth/status").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["authenticated"], false);
}

#[tokio::test]
async fn login_issues_a_working_session_cookie() {
    let app = test_app(Some("hunter2"));

    let req = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"password":"wrong"}"#))
        .expect("request");
    let response = app.app.clone().oneshot(req).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"password":"hunter2"}"#))
        .expect("request");
    let response = app.app.clone().oneshot(req).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response.headers()[header::SET_COOKIE]
        .to_str()
        .expect("cookie header")
        .to_string();
    assert!(cookie.starts_with("booth_session="));

    let session_pair = cookie.split(';').next().expect("cookie pair");
    let req = Request::builder()
        .method("GET")
        .uri("/api/status")
        .header(header::COOKIE, session_pair)
        .body(Body::empty())
        .expect("request");
    let response = app.app.clone().oneshot(req).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ready");
}

#[tokio::test]
async fn no_password_means_no_gate() {
    let app = test_app(None);
    let response = send(&app, "GET", "/api/auth/status").await;
    assert_eq!(json_body(response).await["authenticated"], true);
    assert_eq!(
        send(&app, "GET", "/api/photos").await.status(),
        StatusCode::OK
    );
}
