use serde_json::json;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wopi_core::{ApiErrorClass, ExtendedData, PutFileRequest, WopiClient, WopiError};

fn client_for(server: &MockServer) -> WopiClient {
    WopiClient::new(
        &format!("{}/wopi/files/large-six-hundred.odt", server.uri()),
        "anything",
    )
    .unwrap()
}

#[tokio::test]
async fn check_file_info_sends_access_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wopi/files/large-six-hundred.odt"))
        .and(query_param("access_token", "anything"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "BaseFileName": "large-six-hundred.odt",
            "Size": 600,
            "OwnerId": "test",
            "UserCanWrite": true,
            "LastModifiedTime": "2024-01-01T00:00:00.000Z"
        })))
        .mount(&server)
        .await;

    let info = client_for(&server).check_file_info().await.unwrap();

    assert_eq!(info.base_file_name, "large-six-hundred.odt");
    assert_eq!(info.size, Some(600));
    assert!(info.user_can_write);
}

#[tokio::test]
async fn get_file_returns_raw_contents() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wopi/files/large-six-hundred.odt/contents"))
        .and(query_param("access_token", "anything"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
        .mount(&server)
        .await;

    let body = client_for(&server).get_file().await.unwrap();
    assert_eq!(&body[..], b"hello");
}

#[tokio::test]
async fn put_file_encodes_storage_flags() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/wopi/files/large-six-hundred.odt/contents"))
        .and(query_param("access_token", "anything"))
        .and(header("x-wopi-override", "PUT"))
        .and(header("x-lool-wopi-isautosave", "false"))
        .and(header("x-lool-wopi-ismodifiedbyuser", "true"))
        .and(header("x-lool-wopi-isexitsave", "true"))
        .and(header(
            "x-lool-wopi-extendeddata",
            "CustomFlag=Custom%20Value;AnotherFlag=AnotherValue",
        ))
        .and(body_bytes(b"payload".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "LastModifiedTime": "2024-01-01T00:00:01.000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut extended_data = ExtendedData::new();
    extended_data.insert("CustomFlag", "Custom Value");
    extended_data.insert("AnotherFlag", "AnotherValue");
    let response = client_for(&server)
        .put_file(&PutFileRequest {
            body: b"payload".to_vec().into(),
            is_autosave: false,
            is_modified_by_user: true,
            is_exit_save: true,
            extended_data,
        })
        .await
        .unwrap();

    assert_eq!(
        response.last_modified_time.as_deref(),
        Some("2024-01-01T00:00:01.000Z")
    );
}

#[tokio::test]
async fn put_file_omits_empty_extended_data_and_accepts_empty_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/wopi/files/large-six-hundred.odt/contents"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .put_file(&PutFileRequest {
            body: b"x".to_vec().into(),
            is_autosave: true,
            ..PutFileRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(response.last_modified_time, None);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("x-lool-wopi-extendeddata"));
    assert_eq!(
        requests[0].headers.get("x-lool-wopi-isautosave").unwrap(),
        "true"
    );
}

#[tokio::test]
async fn put_file_accepts_plain_text_success_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/wopi/files/large-six-hundred.odt/contents"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .put_file(&PutFileRequest {
            body: b"x".to_vec().into(),
            ..PutFileRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(response.last_modified_time, None);
}

#[tokio::test]
async fn put_file_surfaces_conflict_with_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/wopi/files/large-six-hundred.odt/contents"))
        .respond_with(
            ResponseTemplate::new(409)
                .insert_header("Retry-After", "4")
                .set_body_string("locked"),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .put_file(&PutFileRequest::default())
        .await
        .expect_err("expected conflict");

    assert_eq!(err.classification(), Some(ApiErrorClass::Conflict));
    assert!(err.is_retryable());
    assert_eq!(err.retry_after_secs(), Some(4));
    assert!(matches!(err, WopiError::Api { ref body, .. } if body == "locked"));
}

#[tokio::test]
async fn put_file_auth_failure_is_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/wopi/files/large-six-hundred.odt/contents"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .put_file(&PutFileRequest::default())
        .await
        .expect_err("expected auth failure");

    assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn connection_refused_is_retryable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let client = WopiClient::new(&format!("http://127.0.0.1:{port}/wopi/files/a.odt"), "t").unwrap();

    let err = client
        .put_file(&PutFileRequest::default())
        .await
        .expect_err("expected connection failure");

    assert!(matches!(err, WopiError::Request(_)));
    assert!(err.is_retryable());
}
