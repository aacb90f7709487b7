//! Domain records stored in the backend and mirrored into view state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::Error;

/// Table holding courses, each with its lessons embedded
pub const COURSES_TABLE: &str = "courses";

/// Table holding application-level user records
pub const PROFILES_TABLE: &str = "profiles";

/// Thumbnail used when the course form leaves the field blank
pub const DEFAULT_THUMBNAIL: &str =
    "https://images.unsplash.com/photo-1636466497217-26a8cbeaf0aa?auto=format&fit=crop&w=800";

/// Row identifier; the backend may hand out integers or uuids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for RowId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => RowId(s),
            Raw::Int(n) => RowId(n.to_string()),
        })
    }
}

/// Kind of lesson content; kinds this crate does not know are kept as-is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LessonKind {
    Video,
    Pdf,
    Other(String),
}

impl Default for LessonKind {
    fn default() -> Self {
        LessonKind::Video
    }
}

impl From<String> for LessonKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "video" => LessonKind::Video,
            "pdf" => LessonKind::Pdf,
            _ => LessonKind::Other(value),
        }
    }
}

impl From<LessonKind> for String {
    fn from(kind: LessonKind) -> Self {
        match kind {
            LessonKind::Video => "video".to_string(),
            LessonKind::Pdf => "pdf".to_string(),
            LessonKind::Other(raw) => raw,
        }
    }
}

/// A lesson, nested inside its course's `lessons` column.
///
/// Every field tolerates null or absence, and keys not listed here are
/// carried in `extra` so that rewriting the column keeps them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: LessonKind,
    /// URL of the video or document
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Lesson {
    /// Builds a fresh lesson from the admin form.
    pub fn from_form(form: &LessonForm) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: form.title.clone(),
            kind: form.kind.clone(),
            content: form.content.clone(),
            created_at: Some(Utc::now()),
            extra: Map::new(),
        }
    }
}

/// A course row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: RowId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub price: f64,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default, deserialize_with = "lenient_lessons")]
    pub lessons: Vec<Lesson>,
}

/// Insert payload for a new course
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCourse {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub thumbnail: String,
    pub lessons: Vec<Lesson>,
}

impl NewCourse {
    /// Applies the form defaults: blank price is zero, blank thumbnail is
    /// the stock image.
    pub fn from_form(form: &CourseForm) -> Result<Self, Error> {
        let price = match form.price.trim() {
            "" => 0.0,
            raw => raw
                .parse::<f64>()
                .map_err(|_| Error::invalid_input(format!("price '{}' is not a number", raw)))?,
        };
        let thumbnail = match form.thumbnail.trim() {
            "" => DEFAULT_THUMBNAIL.to_string(),
            url => url.to_string(),
        };

        Ok(Self {
            title: form.title.clone(),
            description: form.description.clone(),
            price,
            thumbnail,
            lessons: Vec::new(),
        })
    }
}

/// Role carried by a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Student => "student",
        }
    }
}

/// Application-level user record; `id` equals the auth identity id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Course creation form
#[derive(Debug, Clone, Default)]
pub struct CourseForm {
    pub title: String,
    pub description: String,
    pub price: String,
    pub thumbnail: String,
}

/// Lesson creation form
#[derive(Debug, Clone)]
pub struct LessonForm {
    pub title: String,
    pub kind: LessonKind,
    pub content: String,
}

/// Which way the auth form submits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    Register,
}

impl AuthMode {
    pub fn toggled(self) -> Self {
        match self {
            AuthMode::Login => AuthMode::Register,
            AuthMode::Register => AuthMode::Login,
        }
    }
}

/// Login / registration form
#[derive(Debug, Clone, Default)]
pub struct AuthForm {
    pub email: String,
    pub password: String,
    /// Only collected by the student registration form
    pub full_name: Option<String>,
    /// Only collected by the student registration form
    pub phone: Option<String>,
}

impl AuthForm {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            ..Default::default()
        }
    }
}

/// Decodes backend rows, skipping (and logging) rows that do not fit `T`.
pub fn decode_rows<T: serde::de::DeserializeOwned>(table: &str, rows: Vec<serde_json::Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                log::warn!("skipping malformed {} row: {}", table, e);
                None
            }
        })
        .collect()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A null column is no lessons; an entry that is not a lesson object is
/// skipped instead of failing the whole course.
fn lenient_lessons<'de, D>(deserializer: D) -> Result<Vec<Lesson>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Value> = null_as_default(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Lesson>(entry) {
            Ok(lesson) => Some(lesson),
            Err(e) => {
                log::warn!("skipping malformed lesson: {}", e);
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn course_accepts_integer_id_and_null_lessons() {
        let course: Course = serde_json::from_value(json!({
            "id": 7,
            "title": "Mechanics",
            "description": null,
            "price": 12.5,
            "thumbnail": null,
            "lessons": null
        }))
        .unwrap();
        assert_eq!(course.id.as_str(), "7");
        assert!(course.lessons.is_empty());
    }

    #[test]
    fn lesson_uses_type_field() {
        let lesson: Lesson = serde_json::from_value(json!({
            "id": "l1",
            "title": "Intro",
            "type": "pdf",
            "content": "https://example.com/a.pdf",
            "created_at": "2024-03-01T10:00:00.000Z"
        }))
        .unwrap();
        assert_eq!(lesson.kind, LessonKind::Pdf);
        assert_eq!(serde_json::to_value(&lesson).unwrap()["type"], "pdf");
    }

    #[test]
    fn sparse_rows_still_decode() {
        let rows = vec![
            json!({"id": 1, "title": "A", "price": null, "lessons": []}),
            json!({
                "id": 2,
                "title": null,
                "lessons": [
                    {"id": "l", "title": "t", "type": "video", "content": "x"},
                    {"id": "m", "type": "quiz", "content": "y", "duration": 300},
                    "not a lesson"
                ]
            }),
        ];
        let courses: Vec<Course> = decode_rows(COURSES_TABLE, rows);
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[0].price, 0.0);
        assert_eq!(courses[1].title, "");

        let lessons = &courses[1].lessons;
        assert_eq!(lessons.len(), 2);
        assert!(lessons[0].created_at.is_none());
        assert_eq!(lessons[1].kind, LessonKind::Other("quiz".to_string()));

        let written = serde_json::to_value(lessons).unwrap();
        assert_eq!(written[1]["type"], "quiz");
        assert_eq!(written[1]["duration"], 300);
        assert!(written[0].get("created_at").is_none());
    }

    #[test]
    fn new_course_defaults() {
        let course = NewCourse::from_form(&CourseForm {
            title: "Optics".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(course.price, 0.0);
        assert_eq!(course.thumbnail, DEFAULT_THUMBNAIL);
        assert!(course.lessons.is_empty());

        let err = NewCourse::from_form(&CourseForm {
            title: "Optics".to_string(),
            price: "ten".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn decode_rows_skips_malformed() {
        let rows = vec![
            json!({"id": "a", "email": "a@x.io", "role": "student"}),
            json!({"id": "b", "role": "mentor"}),
        ];
        let profiles: Vec<Profile> = decode_rows(PROFILES_TABLE, rows);
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].role, Role::Student);
    }
}
