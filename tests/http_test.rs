mod common;

use std::net::TcpListener;
use std::sync::Arc;

use common::*;
use hyper::{Body, Client, Method, Request, StatusCode};
use tokio::sync::oneshot;
use whip_whep_relay::config::RelayConfig;
use whip_whep_relay::engine::mock::{MockOptions, MOCK_END_OF_CANDIDATES};
use whip_whep_relay::server::{serve_listener, RelayService, SDP_CONTENT_TYPE};
use whip_whep_relay::session::Role;

#[tokio::test]
async fn test_whip_whep_over_http() -> anyhow::Result<()> {
    let (engine, negotiator) = new_negotiator(MockOptions::default(), RelayConfig::default());
    let service = Arc::new(RelayService::new(Arc::clone(&negotiator), None));

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_listener(service, listener, async {
        let _ = shutdown_rx.await;
    }));

    let client = Client::new();
    for (path, role) in [("/whip", Role::Publisher), ("/whep", Role::Subscriber)] {
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{addr}{path}"))
            .header("content-type", SDP_CONTENT_TYPE)
            .body(Body::from(OFFER))?;
        let response = client.request(req).await?;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["location"], path);
        assert_eq!(response.headers()["content-type"], SDP_CONTENT_TYPE);
        let answer = hyper::body::to_bytes(response.into_body()).await?;
        let answer = String::from_utf8(answer.to_vec())?;
        assert!(answer.contains(MOCK_END_OF_CANDIDATES), "{answer}");

        let mock = engine.last_session(role).await.unwrap();
        assert!(mock.gathering_completed());
    }

    let req = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{addr}/whip"))
        .body(Body::empty())?;
    let response = client.request(req).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(negotiator.registry().len().await, 2);

    drop(client);
    let _ = shutdown_tx.send(());
    server.await??;
    negotiator.registry().close_all().await?;

    Ok(())
}
