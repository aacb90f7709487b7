use obscura_lms::bootstrap::{AppPhase, Bootstrap, BootstrapState};
use obscura_lms::config::{ClientOptions, SupabaseConfig};
use obscura_lms::student::StudentApp;
use obscura_lms::{Backend, Error, SupabaseBackend};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> SupabaseConfig {
    let _ = pretty_env_logger::try_init();
    SupabaseConfig::new(&server.uri(), "test_anon_key").unwrap()
}

#[tokio::test]
async fn test_healthy_project_becomes_ready() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/v1/health"))
        .and(header("apikey", "test_anon_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": "v2.150.0",
            "name": "GoTrue"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let bootstrap = Bootstrap::new(Duration::from_secs(5));
    assert_eq!(
        AppPhase::resolve(&bootstrap.state(), false),
        AppPhase::Loading
    );

    let backend = bootstrap
        .load(SupabaseBackend::connect(&config(&server), ClientOptions::default()))
        .await
        .unwrap();

    assert_eq!(bootstrap.state(), BootstrapState::Ready);
    assert!(backend.get_session().await.unwrap().is_none());

    let app = StudentApp::start(backend).await;
    assert_eq!(app.phase(), AppPhase::SignedOut);
}

#[tokio::test]
async fn test_unhealthy_project_fails_with_reason() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/v1/health"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "upstream down"})))
        .mount(&server)
        .await;

    let bootstrap = Bootstrap::new(Duration::from_secs(5));
    let state = bootstrap.watch();

    let err = match bootstrap
        .load(SupabaseBackend::connect(&config(&server), ClientOptions::default()))
        .await
    {
        Ok(_) => panic!("bootstrap should fail"),
        Err(e) => e,
    };

    assert!(matches!(err, Error::Bootstrap(_)));
    match &*state.borrow() {
        BootstrapState::Failed(reason) => assert!(reason.contains("auth service unreachable")),
        other => panic!("unexpected state {:?}", other),
    }
    assert!(matches!(
        AppPhase::resolve(&bootstrap.state(), true),
        AppPhase::Failed(_)
    ));
}

#[tokio::test]
async fn test_slow_project_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/v1/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let bootstrap = Bootstrap::new(Duration::from_millis(100));
    let result = bootstrap
        .load(SupabaseBackend::connect(&config(&server), ClientOptions::default()))
        .await;

    assert!(result.is_err());
    assert_eq!(
        bootstrap.state(),
        BootstrapState::Failed("backend client did not load within 0.1s".to_string())
    );
}
