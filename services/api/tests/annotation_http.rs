//! Integration tests for the HTTP annotation adapter against a mock service.

use api_lib::adapters::HttpAnnotationAdapter;
use dictanote_core::ports::{AnnotationService, PortError};
use dictanote_core::pseudonym::{AnnotationRequest, Pseudonymizer, RequestParts};
use dictanote_core::UserIdentity;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> AnnotationRequest {
    Pseudonymizer::default()
        .prepare_request(
            RequestParts {
                transcript: "Madame Dupont a bien dormi, pansement refait.",
                subject_context: Some("Ulcère de jambe"),
                template: None,
                examples: &[],
            },
            "Dupont",
            &UserIdentity::new("account-7").unwrap(),
        )
        .unwrap()
}

fn adapter(server: &MockServer, token: Option<&str>) -> HttpAnnotationAdapter {
    HttpAnnotationAdapter::new(
        format!("{}/v1/annotate", server.uri()),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn posts_the_pseudonymized_request_with_bearer_token() {
    let server = MockServer::start().await;
    let request = request();
    let pseudonym = request.pseudonym().as_str().to_string();

    Mock::given(method("POST"))
        .and(path("/v1/annotate"))
        .and(header("authorization", "Bearer s3cret"))
        .and(body_partial_json(json!({ "pseudonym": pseudonym })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "annotation": format!("{} : nuit calme, pansement refait.", pseudonym),
            "pseudonym": pseudonym,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = adapter(&server, Some("s3cret"))
        .generate_annotation(&request)
        .await
        .unwrap();

    assert!(response.annotation.starts_with(&pseudonym));
    assert_eq!(response.pseudonym.as_deref(), Some(pseudonym.as_str()));
}

#[tokio::test]
async fn the_real_name_never_reaches_the_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "annotation": "ok" })))
        .mount(&server)
        .await;

    adapter(&server, None)
        .generate_annotation(&request())
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let body = String::from_utf8_lossy(&received[0].body).to_lowercase();
    assert!(!body.contains("dupont"));
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn server_errors_are_retryable_status_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({ "error": "model overloaded" })),
        )
        .mount(&server)
        .await;

    let err = adapter(&server, None)
        .generate_annotation(&request())
        .await
        .unwrap_err();

    match &err {
        PortError::Status { code, message } => {
            assert_eq!(*code, 503);
            assert_eq!(message, "model overloaded");
        }
        other => panic!("expected a status error, got {:?}", other),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad template"))
        .mount(&server)
        .await;

    let err = adapter(&server, None)
        .generate_annotation(&request())
        .await
        .unwrap_err();

    assert!(matches!(&err, PortError::Status { code: 400, message } if message == "bad template"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn rejected_token_maps_to_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = adapter(&server, Some("expired"))
        .generate_annotation(&request())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Unauthorized));
}

#[tokio::test]
async fn slow_service_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "annotation": "late" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let adapter = HttpAnnotationAdapter::new(
        format!("{}/v1/annotate", server.uri()),
        None,
        Duration::from_millis(200),
    );
    let err = adapter.generate_annotation(&request()).await.unwrap_err();
    assert!(matches!(err, PortError::Timeout));
}
