use obscura_lms::auth::AuthChangeEvent;
use obscura_lms::bootstrap::AppPhase;
use obscura_lms::memory::{MemoryBackend, Op};
use obscura_lms::models::{AuthForm, AuthMode, Role, RowId, COURSES_TABLE, PROFILES_TABLE};
use obscura_lms::realtime::ChangeKind;
use obscura_lms::student::{ensure_profile, LessonView, StudentApp};
use obscura_lms::Backend;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn backend() -> Arc<MemoryBackend> {
    let _ = pretty_env_logger::try_init();
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(
        COURSES_TABLE,
        vec![json!({
            "id": 1,
            "title": "Incident Response",
            "price": 99.0,
            "lessons": [
                {
                    "id": "l-video",
                    "title": "Triage",
                    "type": "video",
                    "content": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                    "created_at": "2024-05-01T10:00:00Z"
                },
                {
                    "id": "l-pdf",
                    "title": "Playbook",
                    "type": "pdf",
                    "content": "https://files.example/playbook.pdf",
                    "created_at": "2024-05-01T11:00:00Z"
                }
            ]
        })],
    );
    backend
}

fn registration(phone: Option<&str>) -> AuthForm {
    AuthForm {
        full_name: Some("Ada Byron".to_string()),
        phone: phone.map(str::to_string),
        ..AuthForm::new("ada@obscura.io", "secret")
    }
}

#[tokio::test]
async fn test_register_creates_student_profile() {
    let backend = backend();
    let mut app = StudentApp::start(backend.clone()).await;
    app.set_auth_mode(AuthMode::Register);

    app.handle_auth(&registration(Some("+15550199"))).await.unwrap();

    assert_eq!(app.phase(), AppPhase::SignedIn);
    let profile = app.profile().unwrap();
    assert_eq!(profile.role, Role::Student);
    assert_eq!(profile.phone.as_deref(), Some("+15550199"));
    assert_eq!(profile.full_name.as_deref(), Some("Ada Byron"));
    assert_eq!(backend.rows(PROFILES_TABLE).len(), 1);
}

#[tokio::test]
async fn test_failed_profile_insert_is_reported_then_reconciled() {
    let backend = backend();
    backend.fail_next(Op::Insert, Some(PROFILES_TABLE), "new row violates row-level security policy");
    let mut app = StudentApp::start(backend.clone()).await;
    app.set_auth_mode(AuthMode::Register);

    let result = app.handle_auth(&registration(Some("+15550199"))).await;

    assert!(result.is_err());
    assert_eq!(app.error().as_deref(), Some("new row violates row-level security policy"));
    // the identity is signed in and gets a bare student profile
    assert_eq!(app.phase(), AppPhase::SignedIn);
    let profile = app.profile().unwrap();
    assert_eq!(profile.role, Role::Student);
    assert_eq!(profile.email.as_deref(), Some("ada@obscura.io"));
    assert!(profile.phone.is_none());
    assert_eq!(backend.rows(PROFILES_TABLE).len(), 1);
}

#[tokio::test]
async fn test_ensure_profile_keeps_existing_row() {
    let backend = backend();
    let user = backend.create_user("grace@obscura.io", "secret");
    backend.seed(
        PROFILES_TABLE,
        vec![json!({"id": user.id, "email": "grace@obscura.io", "role": "student", "phone": "+15550123"})],
    );

    let profile = ensure_profile(backend.as_ref(), &user).await.unwrap();

    assert_eq!(profile.phone.as_deref(), Some("+15550123"));
    assert_eq!(backend.rows(PROFILES_TABLE).len(), 1);
}

#[tokio::test]
async fn test_browse_video_and_document_lessons() {
    let backend = backend();
    backend.create_user("grace@obscura.io", "secret");
    let mut app = StudentApp::start(backend.clone()).await;
    app.handle_auth(&AuthForm::new("grace@obscura.io", "secret"))
        .await
        .unwrap();

    // a login without profile gets one, without a phone
    assert!(app.profile().unwrap().phone.is_none());

    let courses = app.courses();
    assert_eq!(courses.len(), 1);
    let course = app.select_course(&RowId::from("1")).unwrap();
    assert_eq!(course.lessons.len(), 2);

    let view = app.select_lesson("l-video").unwrap();
    assert_eq!(
        view,
        LessonView::Video {
            embed_url: Some(
                "https://www.youtube.com/embed/dQw4w9WgXcQ?modestbranding=1&rel=0&showinfo=0"
                    .to_string()
            )
        }
    );
    assert_eq!(app.watermark().unwrap().label(), "PRIVATE");

    let view = app.select_lesson("l-pdf").unwrap();
    assert_eq!(
        view,
        LessonView::Document {
            url: "https://files.example/playbook.pdf".to_string()
        }
    );
    assert_eq!(app.selected_lesson().unwrap().title, "Playbook");
    assert!(app.watermark().is_some());

    assert!(app.select_lesson("missing").is_none());

    app.close_course();
    assert!(app.selected_lesson().is_none());
    assert!(app.watermark().is_none());
}

#[tokio::test]
async fn test_watermark_shows_phone() {
    let backend = backend();
    let mut app = StudentApp::start(backend.clone()).await;
    app.set_auth_mode(AuthMode::Register);
    app.handle_auth(&registration(Some("+15550199"))).await.unwrap();

    app.select_course(&RowId::from("1")).unwrap();
    app.select_lesson("l-video").unwrap();

    assert_eq!(app.watermark().unwrap().label(), "+15550199");
}

#[tokio::test]
async fn test_courses_follow_remote_changes() {
    let backend = backend();
    backend.create_user("grace@obscura.io", "secret");
    let mut app = StudentApp::start(backend.clone()).await;
    app.handle_auth(&AuthForm::new("grace@obscura.io", "secret"))
        .await
        .unwrap();
    assert!(app.is_live());

    backend
        .insert(COURSES_TABLE, json!({"title": "Threat Hunting", "price": 10.0, "lessons": []}))
        .await
        .unwrap();

    eventually(|| app.courses().len() == 2).await;
    assert!(app.courses().iter().any(|c| c.title == "Threat Hunting"));
}

#[tokio::test]
async fn test_sign_out_clears_everything() {
    let backend = backend();
    backend.create_user("grace@obscura.io", "secret");
    let mut app = StudentApp::start(backend.clone()).await;
    app.handle_auth(&AuthForm::new("grace@obscura.io", "secret"))
        .await
        .unwrap();
    app.select_course(&RowId::from("1"));
    app.select_lesson("l-video");

    app.sign_out().await.unwrap();

    assert_eq!(app.phase(), AppPhase::SignedOut);
    assert!(app.profile().is_none());
    assert!(app.courses().is_empty());
    assert!(app.selected_course().is_none());
    assert!(app.watermark().is_none());
    assert_eq!(backend.channel_count(), 0);
}

#[tokio::test]
async fn test_expired_session_signs_out() {
    let backend = backend();
    backend.create_user("grace@obscura.io", "secret");
    let mut app = StudentApp::start(backend.clone()).await;
    app.handle_auth(&AuthForm::new("grace@obscura.io", "secret"))
        .await
        .unwrap();

    backend.expire_session();
    assert!(backend.get_session().await.unwrap().is_none());

    assert_eq!(app.phase(), AppPhase::SignedOut);
    app.sync_identity().await;
    assert!(app.courses().is_empty());
    assert_eq!(backend.channel_count(), 0);
}

#[tokio::test]
async fn test_wrong_password_is_shown_inline() {
    let backend = backend();
    backend.create_user("grace@obscura.io", "secret");
    let mut app = StudentApp::start(backend.clone()).await;

    assert!(app
        .handle_auth(&AuthForm::new("grace@obscura.io", "nope"))
        .await
        .is_err());

    assert_eq!(app.error().as_deref(), Some("Invalid login credentials"));
    assert_eq!(app.phase(), AppPhase::SignedOut);
}

#[tokio::test]
async fn test_session_ended_elsewhere_clears_everything() {
    let backend = backend();
    backend.create_user("grace@obscura.io", "secret");
    let mut app = StudentApp::start(backend.clone()).await;
    app.handle_auth(&AuthForm::new("grace@obscura.io", "secret"))
        .await
        .unwrap();
    app.select_course(&RowId::from("1")).unwrap();
    app.select_lesson("l-video").unwrap();
    assert_eq!(backend.channel_count(), 1);

    // sync_identity is never called
    backend.sign_out().await.unwrap();

    assert_eq!(app.phase(), AppPhase::SignedOut);
    assert!(app.courses().is_empty());
    assert!(app.profile().is_none());
    assert!(app.selected_course().is_none());
    assert!(app.lesson_view().is_none());
    assert!(app.watermark().is_none());
    eventually(|| backend.channel_count() == 0).await;
    assert!(!app.is_live());

    let selects = backend.select_count(COURSES_TABLE);
    backend.emit_change(COURSES_TABLE, ChangeKind::Update);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.select_count(COURSES_TABLE), selects);
}

#[tokio::test]
async fn test_view_of_previous_identity_is_not_shown() {
    let backend = backend();
    backend.create_user("grace@obscura.io", "secret");
    backend.create_user("alan@obscura.io", "secret");
    let mut app = StudentApp::start(backend.clone()).await;
    app.handle_auth(&AuthForm::new("grace@obscura.io", "secret"))
        .await
        .unwrap();
    app.select_course(&RowId::from("1")).unwrap();

    backend
        .sign_in_with_password("alan@obscura.io", "secret")
        .await
        .unwrap();

    assert!(app.selected_course().is_none());
    eventually(|| app.profile().and_then(|p| p.email) == Some("alan@obscura.io".to_string())).await;
    assert_eq!(app.courses().len(), 1);
    assert_eq!(backend.rows(PROFILES_TABLE).len(), 2);
}

#[tokio::test]
async fn test_auth_listener_on_shared_backend() {
    let memory = backend();
    memory.create_user("grace@obscura.io", "secret");
    let shared: Arc<dyn Backend> = memory;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = shared.on_auth_state_change(move |event, session| {
        let _ = tx.send((event, session.is_some()));
    });

    shared
        .sign_in_with_password("grace@obscura.io", "secret")
        .await
        .unwrap();

    let change = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(change, Some((AuthChangeEvent::SignedIn, true)));
    subscription.unsubscribe();
}
