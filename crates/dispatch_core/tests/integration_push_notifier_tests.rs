#![cfg(feature = "push")]

use std::sync::Arc;

use dispatch_core::dispatch::{
    ChannelRegistry, DispatchNotifier, HttpPushNotifier, MpscOfferChannel, SessionFirstNotifier,
};
use dispatch_core::error::DispatchError;
use dispatch_core::model::MatchOffer;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn offer() -> MatchOffer {
    MatchOffer {
        driver_id: "d1".into(),
        eta_seconds: 42.5,
        cost: 57.5,
    }
}

#[tokio::test]
async fn posts_ride_and_offer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push"))
        .and(body_json(json!({
            "ride_id": "ride-1",
            "offer": {"driver_id": "d1", "eta_seconds": 42.5, "cost": 57.5}
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = HttpPushNotifier::new(format!("{}/push", server.uri())).expect("client");
    notifier.offer("ride-1", &offer()).await.expect("accepted");
}

#[tokio::test]
async fn non_success_status_is_push_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let notifier = HttpPushNotifier::new(format!("{}/push", server.uri())).expect("client");
    let err = notifier.offer("ride-1", &offer()).await.unwrap_err();
    assert!(matches!(err, DispatchError::Push(_)));
}

#[tokio::test]
async fn connected_driver_is_not_pushed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let registry = Arc::new(ChannelRegistry::new());
    let (channel, mut rx) = MpscOfferChannel::new("d1", 4);
    registry.register("d1", Arc::new(channel));
    let push = HttpPushNotifier::new(format!("{}/push", server.uri())).expect("client");
    let notifier = SessionFirstNotifier::new(registry, Arc::new(push));

    notifier.offer("ride-1", &offer()).await.expect("delivered");
    let payload = rx.recv().await.expect("offer on socket");
    assert!(payload.contains("\"driver_id\":\"d1\""));
}

#[tokio::test]
async fn disconnected_driver_is_pushed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let push = HttpPushNotifier::new(format!("{}/push", server.uri())).expect("client");
    let notifier = SessionFirstNotifier::new(Arc::new(ChannelRegistry::new()), Arc::new(push));

    notifier.offer("ride-1", &offer()).await.expect("pushed");
}
