use std::time::{SystemTime, UNIX_EPOCH};

use super::*;
use crate::config::RelayConfig;
use crate::engine::mock::{MockEngine, MockOptions, MOCK_END_OF_CANDIDATES};
use crate::engine::SessionEngine;
use crate::relay::RelayTrack;
use crate::session::SessionRegistry;

const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

fn new_service(config: RelayConfig, static_dir: Option<PathBuf>) -> RelayService {
    let engine = MockEngine::new(MockOptions::default());
    let relay = RelayTrack::new(
        config.codec.capability(),
        config.track_id.clone(),
        config.stream_id.clone(),
        config.consumer_buffer,
    );
    let negotiator = Negotiator::new(
        engine as Arc<dyn SessionEngine + Send + Sync>,
        relay,
        SessionRegistry::new(),
        config,
    );
    RelayService::new(Arc::new(negotiator), static_dir)
}

fn post(path: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
        .body(Body::from(body))
        .unwrap()
}

async fn body_string(response: Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_whip_and_whep_created() {
    let service = new_service(RelayConfig::default(), None);

    for (path, location) in [("/whip", "/whip"), ("/whep", "/whep")] {
        let response = service.handle(post(path, OFFER)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[LOCATION], location);
        assert_eq!(response.headers()[CONTENT_TYPE], SDP_CONTENT_TYPE);

        let answer = body_string(response).await;
        assert!(answer.starts_with("v=0"), "{answer}");
        assert!(answer.contains(MOCK_END_OF_CANDIDATES), "{answer}");
    }

    assert_eq!(service.negotiator().registry().len().await, 2);
}

#[tokio::test]
async fn test_whip_error_statuses() {
    let service = new_service(
        RelayConfig {
            max_offer_bytes: 16,
            ..Default::default()
        },
        None,
    );

    let response = service.handle(post("/whip", "")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.starts_with("MalformedOffer:"), "{body}");

    let response = service
        .handle(post("/whip", "v=0\r\nthis offer is far too long\r\n"))
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let response = service.handle(post("/whip", "garbage")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(service.negotiator().registry().is_empty().await);
    assert!(!service.negotiator().relay().has_producer());
}

#[tokio::test]
async fn test_whip_second_publisher_conflict() {
    let service = new_service(RelayConfig::default(), None);

    let response = service.handle(post("/whip", OFFER)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = service.handle(post("/whip", OFFER)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_string(response).await;
    assert!(body.starts_with("PublisherActive:"), "{body}");

    // a bad offer stays a bad request while the slot is taken
    let response = service.handle(post("/whip", "hello")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.starts_with("MalformedOffer:"), "{body}");
}

#[tokio::test]
async fn test_method_and_route_handling() {
    let service = new_service(RelayConfig::default(), None);

    let req = Request::builder()
        .method(Method::GET)
        .uri("/whip")
        .body(Body::empty())
        .unwrap();
    let response = service.handle(req).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[ALLOW], "POST");

    // static serving disabled
    let req = Request::builder()
        .method(Method::GET)
        .uri("/index.html")
        .body(Body::empty())
        .unwrap();
    assert_eq!(service.handle(req).await.status(), StatusCode::NOT_FOUND);

    let req = Request::builder()
        .method(Method::DELETE)
        .uri("/other")
        .body(Body::empty())
        .unwrap();
    assert_eq!(service.handle(req).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_static_files() {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("whip-whep-relay-static-{nanos}"));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("index.html"), "<html>relay</html>").unwrap();
    std::fs::write(dir.join("app.js"), "console.log(1)").unwrap();

    let service = new_service(RelayConfig::default(), Some(dir.clone()));

    let get = |uri: &str| {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };

    let response = service.handle(get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(body_string(response).await, "<html>relay</html>");

    let response = service.handle(get("/app.js")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "text/javascript");

    let response = service.handle(get("/missing.css")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let head = Request::builder()
        .method(Method::HEAD)
        .uri("/index.html")
        .body(Body::empty())
        .unwrap();
    let response = service.handle(head).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_LENGTH], "18");
    assert_eq!(body_string(response).await, "");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_static_path() {
    let root = Path::new("/srv/www");
    let tests = vec![
        ("/", Some("/srv/www/index.html")),
        ("/app.js", Some("/srv/www/app.js")),
        ("/assets/", Some("/srv/www/assets/index.html")),
        ("/./a.css", Some("/srv/www/a.css")),
        ("/../etc/passwd", None),
        ("/assets/../../secret", None),
    ];

    for (request_path, expected) in tests {
        assert_eq!(
            static_path(root, request_path),
            expected.map(PathBuf::from),
            "{request_path}"
        );
    }
}
