//! Admin console: course and lesson management, student list

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::auth::User;
use crate::backend::Backend;
use crate::bootstrap::{AppPhase, BootstrapState, SessionTracker};
use crate::error::Error;
use crate::models::{
    decode_rows, AuthForm, AuthMode, Course, CourseForm, Lesson, LessonForm, NewCourse, Profile, Role, RowId,
    COURSES_TABLE, PROFILES_TABLE,
};
use crate::postgrest::Filter;
use crate::realtime::TableBinding;
use crate::sync::{Admission, Fetcher, IdentitySync};

pub const ADMIN_CHANNEL: &str = "admin-updates";
pub const ACCESS_DENIED: &str = "Access denied. Admin role required.";
pub const DELETE_PROMPT: &str = "Delete this course permanently?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminTab {
    Dashboard,
    Courses,
    AddCourse,
    Students,
}

/// Asks the user to confirm a destructive action
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdminData {
    pub courses: Vec<Course>,
    pub students: Vec<Profile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardStats {
    pub course_count: usize,
    pub student_count: usize,
}

struct AdminFetcher;

#[async_trait]
impl Fetcher for AdminFetcher {
    type Output = AdminData;

    fn bindings(&self) -> Vec<TableBinding> {
        vec![TableBinding::all(COURSES_TABLE), TableBinding::all(PROFILES_TABLE)]
    }

    async fn refresh(&self, backend: &dyn Backend, output: &mut AdminData) {
        match backend.select(COURSES_TABLE, &[]).await {
            Ok(rows) => output.courses = decode_rows(COURSES_TABLE, rows),
            Err(e) => log::warn!("could not fetch courses: {}", e),
        }
        let students = [Filter::eq("role", Role::Student.as_str())];
        match backend.select(PROFILES_TABLE, &students).await {
            Ok(rows) => output.students = decode_rows(PROFILES_TABLE, rows),
            Err(e) => log::warn!("could not fetch students: {}", e),
        }
    }
}

/// Profile of `user_id` if it carries the admin role
async fn admin_profile(backend: &dyn Backend, user_id: &str) -> Option<Profile> {
    match backend.select(PROFILES_TABLE, &[Filter::eq("id", user_id)]).await {
        Ok(rows) => decode_rows::<Profile>(PROFILES_TABLE, rows)
            .into_iter()
            .next()
            .filter(|profile| profile.role == Role::Admin),
        Err(e) => {
            log::warn!("could not read profile of {}: {}", user_id, e);
            None
        }
    }
}

/// Lets only admins in, whichever way their session appeared
struct AdminGate;

#[async_trait]
impl Admission for AdminGate {
    type Fetcher = AdminFetcher;
    type Profile = Profile;

    async fn admit(&self, backend: &dyn Backend, user: &User) -> Result<Option<Profile>, String> {
        match admin_profile(backend, &user.id).await {
            Some(profile) => {
                log::info!("admin {} signed in", user.id);
                Ok(Some(profile))
            }
            None => Err(ACCESS_DENIED.to_string()),
        }
    }

    fn fetcher(&self) -> AdminFetcher {
        AdminFetcher
    }
}

/// State of the admin console
pub struct AdminApp {
    backend: Arc<dyn Backend>,
    session: SessionTracker,
    identity: IdentitySync<AdminGate>,
    tab: AdminTab,
    auth_mode: AuthMode,
    error: Option<String>,
    selected_course: Option<Course>,
}

impl AdminApp {
    /// Restore any session and start syncing if it belongs to an admin
    pub async fn start(backend: Arc<dyn Backend>) -> Self {
        let session = SessionTracker::start(backend.as_ref()).await;
        let identity = IdentitySync::start(backend.clone(), ADMIN_CHANNEL, AdminGate).await;
        let mut app = Self {
            backend,
            session,
            identity,
            tab: AdminTab::Dashboard,
            auth_mode: AuthMode::Login,
            error: None,
            selected_course: None,
        };
        app.sync_identity().await;
        app
    }

    /// Reads the identity synchronously, so a sign-out shows at once.
    pub fn phase(&self) -> AppPhase {
        AppPhase::resolve(&BootstrapState::Ready, self.session.is_signed_in())
    }

    pub fn current_user(&self) -> Option<User> {
        self.session.current_user()
    }

    /// Bring the data sync in line with the current identity now.
    ///
    /// The console also does this on its own whenever the session changes;
    /// a session that appears without going through `handle_auth` (a
    /// restored one, say) gets the same role check as a login.
    pub async fn sync_identity(&mut self) {
        self.identity.reconcile().await;
        if let Some(reason) = self.identity.take_refusal() {
            self.error = Some(reason);
        }
        if !self.session.is_signed_in() {
            self.selected_course = None;
            self.tab = AdminTab::Dashboard;
        }
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

    /// Inline error of the auth form, including a refusal the console
    /// ran into on its own
    pub fn error(&self) -> Option<String> {
        self.error.clone().or_else(|| self.identity.refusal())
    }

    /// Submit the auth form in the current mode.
    ///
    /// Failures are also kept as the inline error, with the backend's
    /// message.
    pub async fn handle_auth(&mut self, form: &AuthForm) -> Result<(), Error> {
        self.error = None;
        self.identity.take_refusal();
        let result = {
            let _hold = self.identity.hold().await;
            match self.auth_mode {
                AuthMode::Register => self.register(form).await,
                AuthMode::Login => self.login(form).await,
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
                        "email": form.email,
                        "role": Role::Admin.as_str(),
                    }),
                )
                .await?;
        }
        Ok(())
    }

    async fn login(&self, form: &AuthForm) -> Result<(), Error> {
        let session = self
            .backend
            .sign_in_with_password(&form.email, &form.password)
            .await?;

        if admin_profile(self.backend.as_ref(), &session.user.id).await.is_none() {
            if let Err(e) = self.backend.sign_out().await {
                log::warn!("sign out failed: {}", e);
            }
            return Err(Error::AccessDenied(ACCESS_DENIED.to_string()));
        }
        Ok(())
    }

    pub async fn sign_out(&mut self) -> Result<(), Error> {
        let result = self.backend.sign_out().await;
        self.sync_identity().await;
        result
    }

    pub fn tab(&self) -> AdminTab {
        self.tab
    }

    /// Switching tabs closes the lesson manager
    pub fn set_tab(&mut self, tab: AdminTab) {
        self.tab = tab;
        self.selected_course = None;
    }

    fn data(&self) -> AdminData {
        if !self.session.is_signed_in() {
            return AdminData::default();
        }
        self.identity.data().unwrap_or_default()
    }

    /// Courses in backend order; empty while signed out
    pub fn courses(&self) -> Vec<Course> {
        self.data().courses
    }

    pub fn students(&self) -> Vec<Profile> {
        self.data().students
    }

    pub fn dashboard(&self) -> DashboardStats {
        let data = self.data();
        DashboardStats {
            course_count: data.courses.len(),
            student_count: data.students.len(),
        }
    }

    /// Whether change events reach the console
    pub fn is_live(&self) -> bool {
        self.session.is_signed_in() && self.identity.is_live()
    }

    /// Completed fetches of the running sync
    pub fn generation(&self) -> Option<u64> {
        self.identity.generation()
    }

    pub fn select_course(&mut self, id: &RowId) -> Option<&Course> {
        self.selected_course = self.courses().into_iter().find(|c| &c.id == id);
        self.selected_course.as_ref()
    }

    pub fn selected_course(&self) -> Option<&Course> {
        self.selected_course.as_ref().filter(|_| self.session.is_signed_in())
    }

    pub fn close_course(&mut self) {
        self.selected_course = None;
    }

    /// Insert a course and switch to the course list.
    ///
    /// The list itself updates through the change feed.
    pub async fn add_course(&mut self, form: &CourseForm) -> Result<(), Error> {
        let course = NewCourse::from_form(form)?;
        let result = self
            .backend
            .insert(COURSES_TABLE, serde_json::to_value(&course)?)
            .await;
        self.tab = AdminTab::Courses;
        match result {
            Ok(_) => {
                log::info!("added course {}", course.title);
                Ok(())
            }
            Err(e) => {
                log::warn!("could not add course {}: {}", course.title, e);
                Err(e)
            }
        }
    }

    /// Append a lesson to a course with one update of its `lessons` column.
    ///
    /// On success the selected course shows the lesson right away.
    pub async fn add_lesson(&mut self, course_id: &RowId, form: &LessonForm) -> Result<Lesson, Error> {
        let course = self
            .courses()
            .into_iter()
            .find(|c| &c.id == course_id)
            .or_else(|| self.selected_course.clone().filter(|c| &c.id == course_id))
            .ok_or_else(|| Error::invalid_input(format!("unknown course {}", course_id)))?;

        let lesson = Lesson::from_form(form);
        let mut lessons = course.lessons;
        lessons.push(lesson.clone());

        self.backend
            .update(
                COURSES_TABLE,
                json!({ "lessons": &lessons }),
                &[Filter::eq("id", course_id)],
            )
            .await?;

        if let Some(selected) = self.selected_course.as_mut().filter(|c| &c.id == course_id) {
            selected.lessons = lessons;
        }
        Ok(lesson)
    }

    /// Delete a course after the user confirms; returns whether it was
    /// deleted.
    pub async fn delete_course(&mut self, id: &RowId, confirm: &dyn Confirm) -> Result<bool, Error> {
        if !confirm.confirm(DELETE_PROMPT) {
            return Ok(false);
        }
        self.backend
            .delete(COURSES_TABLE, &[Filter::eq("id", id)])
            .await?;
        if self.selected_course.as_ref().map_or(false, |c| &c.id == id) {
            self.selected_course = None;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_confirm() {
        let yes = |prompt: &str| prompt == DELETE_PROMPT;
        assert!(yes.confirm(DELETE_PROMPT));
        assert!(!(|_: &str| false).confirm(DELETE_PROMPT));
    }
}
