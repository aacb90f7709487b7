//! Turning flat spreadsheet rows into courses, lessons and parts

/// How a part opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Video,
    Document,
}

impl ContentKind {
    /// Anything whose label mentions "pdf", in any casing, is a document.
    pub fn classify(label: &str) -> Self {
        if label.to_uppercase().contains("PDF") {
            ContentKind::Document
        } else {
            ContentKind::Video
        }
    }
}

/// Label given to parts whose type column is blank
pub const DEFAULT_KIND_LABEL: &str = "Video";

/// One playable or downloadable item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Index of the source row
    pub id: usize,
    pub part: String,
    pub link: String,
    pub kind_label: String,
}

impl Part {
    pub fn kind(&self) -> ContentKind {
        ContentKind::classify(&self.kind_label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLesson {
    pub name: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogCourse {
    pub name: String,
    pub lessons: Vec<CatalogLesson>,
}

impl CatalogCourse {
    pub fn part(&self, id: usize) -> Option<&Part> {
        self.lessons
            .iter()
            .flat_map(|lesson| lesson.parts.iter())
            .find(|part| part.id == id)
    }

    pub fn part_count(&self) -> usize {
        self.lessons.iter().map(|lesson| lesson.parts.len()).sum()
    }
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or("")
}

/// Groups rows laid out as
/// `course | lesson | part | (unused) | link | type`.
///
/// Courses and lessons keep the order in which they first appear; rows
/// without a course name are skipped.
pub fn group_rows(rows: &[Vec<String>]) -> Vec<CatalogCourse> {
    let mut courses: Vec<CatalogCourse> = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let course_name = cell(row, 0);
        if course_name.is_empty() {
            continue;
        }
        let lesson_name = cell(row, 1);
        let kind_label = match cell(row, 5) {
            "" => DEFAULT_KIND_LABEL,
            label => label,
        };
        let part = Part {
            id: index,
            part: cell(row, 2).to_string(),
            link: cell(row, 4).to_string(),
            kind_label: kind_label.to_string(),
        };

        let course = match courses.iter().position(|c| c.name == course_name) {
            Some(i) => &mut courses[i],
            None => {
                courses.push(CatalogCourse {
                    name: course_name.to_string(),
                    lessons: Vec::new(),
                });
                let last = courses.len() - 1;
                &mut courses[last]
            }
        };

        match course.lessons.iter_mut().find(|l| l.name == lesson_name) {
            Some(lesson) => lesson.parts.push(part),
            None => course.lessons.push(CatalogLesson {
                name: lesson_name.to_string(),
                parts: vec![part],
            }),
        }
    }

    courses
}

/// Built-in rows shown when the spreadsheet cannot be read
pub fn demo_rows() -> Vec<Vec<String>> {
    [
        [
            "Cybersecurity Essentials",
            "Network Security",
            "Firewall Fundamentals",
            "",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "Video",
        ],
        [
            "Advanced Frontend",
            "React Architecture",
            "Fiber Engine Deep Dive",
            "",
            "https://www.youtube.com/embed/7YhdqIR2Yzo",
            "Video",
        ],
    ]
    .iter()
    .map(|row| row.iter().map(|c| c.to_string()).collect())
    .collect()
}
