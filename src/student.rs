//! Student portal: browse courses, watch lessons

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, OnceLock};

use crate::auth::User;
use crate::backend::Backend;
use crate::bootstrap::{AppPhase, BootstrapState, SessionTracker};
use crate::error::Error;
use crate::models::{
    decode_rows, AuthForm, AuthMode, Course, Lesson, LessonKind, Profile, Role, RowId,
    COURSES_TABLE, PROFILES_TABLE,
};
use crate::postgrest::Filter;
use crate::realtime::TableBinding;
use crate::sync::{Admission, Fetcher, IdentitySync};
use crate::watermark::{Watermark, WatermarkSpec};

pub const STUDENT_CHANNEL: &str = "schema-db-changes";

const YOUTUBE_ID: &str = r"^.*(youtu.be/|v/|u/\w/|embed/|watch\?v=|&v=)([^#&?]*).*";

/// The 11-character video id of a YouTube watch, share or embed URL
pub fn youtube_id(url: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(YOUTUBE_ID).ok()).as_ref()?;
    let id = pattern.captures(url)?.get(2)?.as_str();
    (id.len() == 11).then(|| id.to_string())
}

/// Player URL with related videos and branding turned down
pub fn embed_url(video_id: &str) -> String {
    format!(
        "https://www.youtube.com/embed/{}?modestbranding=1&rel=0&showinfo=0",
        video_id
    )
}

/// How the selected lesson is presented
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LessonView {
    /// `embed_url` is `None` when no video id could be read from the content
    Video { embed_url: Option<String> },
    /// Linked out to a new browsing context
    Document { url: String },
}

impl LessonView {
    pub fn of(lesson: &Lesson) -> Self {
        match lesson.kind {
            LessonKind::Video => LessonView::Video {
                embed_url: youtube_id(&lesson.content).map(|id| embed_url(&id)),
            },
            // anything that is not a video is linked out
            LessonKind::Pdf | LessonKind::Other(_) => LessonView::Document {
                url: lesson.content.clone(),
            },
        }
    }
}

struct CourseFetcher;

#[async_trait]
impl Fetcher for CourseFetcher {
    type Output = Vec<Course>;

    fn bindings(&self) -> Vec<TableBinding> {
        vec![TableBinding::all(COURSES_TABLE)]
    }

    async fn refresh(&self, backend: &dyn Backend, output: &mut Vec<Course>) {
        match backend.select(COURSES_TABLE, &[]).await {
            Ok(rows) => *output = decode_rows(COURSES_TABLE, rows),
            Err(e) => log::warn!("could not fetch courses: {}", e),
        }
    }
}

/// Profile of `user`, inserting a student profile when the identity has
/// none (a registration whose second step never landed).
pub async fn ensure_profile(backend: &dyn Backend, user: &User) -> Result<Profile, Error> {
    let rows = backend
        .select(PROFILES_TABLE, &[Filter::eq("id", &user.id)])
        .await?;
    if let Some(profile) = decode_rows::<Profile>(PROFILES_TABLE, rows).into_iter().next() {
        return Ok(profile);
    }

    log::info!("identity {} has no profile, creating one", user.id);
    let profile = Profile {
        id: user.id.clone(),
        email: user.email.clone(),
        role: Role::Student,
        full_name: None,
        phone: None,
    };
    backend
        .insert(PROFILES_TABLE, serde_json::to_value(&profile)?)
        .await?;
    Ok(profile)
}

/// Admits every identity, making sure it has a profile
struct StudentGate;

#[async_trait]
impl Admission for StudentGate {
    type Fetcher = CourseFetcher;
    type Profile = Profile;

    async fn admit(&self, backend: &dyn Backend, user: &User) -> Result<Option<Profile>, String> {
        match ensure_profile(backend, user).await {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                log::warn!("could not load profile of {}: {}", user.id, e);
                Ok(None)
            }
        }
    }

    fn fetcher(&self) -> CourseFetcher {
        CourseFetcher
    }
}

/// State of the student portal
pub struct StudentApp {
    backend: Arc<dyn Backend>,
    session: SessionTracker,
    identity: IdentitySync<StudentGate>,
    /// Identity the open course and lesson belong to
    viewer: Option<String>,
    auth_mode: AuthMode,
    error: Option<String>,
    selected_course: Option<Course>,
    selected_lesson: Option<Lesson>,
    watermark: Option<Watermark>,
}

impl StudentApp {
    pub async fn start(backend: Arc<dyn Backend>) -> Self {
        let session = SessionTracker::start(backend.as_ref()).await;
        let identity = IdentitySync::start(backend.clone(), STUDENT_CHANNEL, StudentGate).await;
        let mut app = Self {
            backend,
            session,
            identity,
            viewer: None,
            auth_mode: AuthMode::Login,
            error: None,
            selected_course: None,
            selected_lesson: None,
            watermark: None,
        };
        app.sync_identity().await;
        app
    }

    pub fn phase(&self) -> AppPhase {
        AppPhase::resolve(&BootstrapState::Ready, self.session.is_signed_in())
    }

    pub fn current_user(&self) -> Option<User> {
        self.session.current_user()
    }

    /// Start or stop the course sync and profile for the current identity
    /// now, and drop a view that belonged to someone else.
    ///
    /// The portal also follows session changes on its own.
    pub async fn sync_identity(&mut self) {
        self.identity.reconcile().await;
        let viewer = self.identity.user_id();
        if viewer != self.viewer {
            self.close_course();
            self.viewer = viewer;
        }
    }

    /// The view is only shown to the identity that opened it
    fn viewing(&self) -> bool {
        self.viewer.is_some() && self.viewer == self.session.current_user().map(|u| u.id)
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn set_auth_mode(&mut self, mode: AuthMode) {
        self.auth_mode = mode;
    }

    pub fn toggle_auth_mode(&mut self) {
        self.auth_mode = self.auth_mode.toggled();
    }

    pub fn error(&self) -> Option<String> {
        self.error.clone()
    }

    /// Submit the auth form; a failure is also kept as the inline error.
    pub async fn handle_auth(&mut self, form: &AuthForm) -> Result<(), Error> {
        self.error = None;
        let result = {
            let _hold = self.identity.hold().await;
            match self.auth_mode {
                AuthMode::Register => self.register(form).await,
                AuthMode::Login => self
                    .backend
                    .sign_in_with_password(&form.email, &form.password)
                    .await
                    .map(|_| ()),
            }
        };
        if let Err(e) = &result {
            self.error = Some(e.user_message());
        }
        self.sync_identity().await;
        result
    }

    async fn register(&self, form: &AuthForm) -> Result<(), Error> {
        let response = self.backend.sign_up(&form.email, &form.password).await?;
        if let Some(user) = response.user {
            self.backend
                .insert(
                    PROFILES_TABLE,
                    json!({
                        "id": user.id,
                        "full_name": form.full_name,
                        "phone": form.phone,
                        "email": form.email,
                        "role": Role::Student.as_str(),
                    }),
                )
                .await?;
        }
        Ok(())
    }

    pub async fn sign_out(&mut self) -> Result<(), Error> {
        let result = self.backend.sign_out().await;
        self.sync_identity().await;
        result
    }

    pub fn profile(&self) -> Option<Profile> {
        if !self.session.is_signed_in() {
            return None;
        }
        self.identity.profile()
    }

    /// Courses in backend order; empty while signed out
    pub fn courses(&self) -> Vec<Course> {
        if !self.session.is_signed_in() {
            return Vec::new();
        }
        self.identity.data().unwrap_or_default()
    }

    /// Whether course changes reach the portal
    pub fn is_live(&self) -> bool {
        self.session.is_signed_in() && self.identity.is_live()
    }

    pub fn select_course(&mut self, id: &RowId) -> Option<&Course> {
        self.selected_lesson = None;
        self.watermark = None;
        self.viewer = self.session.current_user().map(|u| u.id);
        self.selected_course = self.courses().into_iter().find(|c| &c.id == id);
        self.selected_course()
    }

    pub fn selected_course(&self) -> Option<&Course> {
        self.selected_course.as_ref().filter(|_| self.viewing())
    }

    /// Back to the course grid
    pub fn close_course(&mut self) {
        self.selected_course = None;
        self.selected_lesson = None;
        self.watermark = None;
    }

    /// Open a lesson of the selected course; starts the phone watermark.
    pub fn select_lesson(&mut self, lesson_id: &str) -> Option<LessonView> {
        let lesson = self
            .selected_course()?
            .lessons
            .iter()
            .find(|l| l.id == lesson_id)?
            .clone();
        let view = LessonView::of(&lesson);
        let phone = self.profile().and_then(|p| p.phone);
        self.watermark = Some(Watermark::start(WatermarkSpec::student(phone.as_deref())));
        self.selected_lesson = Some(lesson);
        Some(view)
    }

    pub fn selected_lesson(&self) -> Option<&Lesson> {
        self.selected_lesson.as_ref().filter(|_| self.viewing())
    }

    pub fn lesson_view(&self) -> Option<LessonView> {
        self.selected_lesson().map(LessonView::of)
    }

    pub fn watermark(&self) -> Option<&Watermark> {
        self.watermark.as_ref().filter(|_| self.viewing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn youtube_ids() {
        let id = Some("dQw4w9WgXcQ".to_string());
        assert_eq!(youtube_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), id);
        assert_eq!(youtube_id("https://youtu.be/dQw4w9WgXcQ"), id);
        assert_eq!(youtube_id("https://www.youtube.com/embed/dQw4w9WgXcQ?rel=0"), id);
        assert_eq!(youtube_id("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ"), id);
        assert_eq!(youtube_id("https://www.youtube.com/v/dQw4w9WgXcQ"), id);
        assert_eq!(youtube_id("https://www.youtube.com/watch?v=short"), None);
        assert_eq!(youtube_id("https://example.com/lecture.mp4"), None);
    }

    #[test]
    fn lesson_views() {
        let mut lesson = Lesson {
            id: "l1".to_string(),
            title: "Intro".to_string(),
            kind: LessonKind::Video,
            content: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            created_at: Some(Utc::now()),
            extra: Default::default(),
        };
        assert_eq!(
            LessonView::of(&lesson),
            LessonView::Video {
                embed_url: Some(
                    "https://www.youtube.com/embed/dQw4w9WgXcQ?modestbranding=1&rel=0&showinfo=0"
                        .to_string()
                )
            }
        );

        lesson.kind = LessonKind::Pdf;
        lesson.content = "https://files.example/notes.pdf".to_string();
        assert_eq!(
            LessonView::of(&lesson),
            LessonView::Document {
                url: "https://files.example/notes.pdf".to_string()
            }
        );
    }
}
