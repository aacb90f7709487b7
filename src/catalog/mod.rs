//! Public course catalog read from a spreadsheet

mod group;
mod sheets;

pub use group::*;
pub use sheets::*;

use crate::watermark::{Watermark, WatermarkSpec};

/// Banner shown when the catalog falls back to the built-in rows
pub const SYNC_WARNING: &str = "Cloud sync unavailable. Connection to Google Sheets failed.";

/// What the renderer should do after a part is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenAction {
    /// Open the URL in a new browsing context
    NewContext(String),
    /// The part is now the active video
    Play,
}

/// View state of the catalog page
pub struct CatalogView {
    courses: Vec<CatalogCourse>,
    loading: bool,
    warning: Option<String>,
    selected: Option<usize>,
    active_video: Option<Part>,
    watermark: Option<Watermark>,
}

impl Default for CatalogView {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogView {
    pub fn new() -> Self {
        Self {
            courses: Vec::new(),
            loading: true,
            warning: None,
            selected: None,
            active_video: None,
            watermark: None,
        }
    }

    /// Read the spreadsheet once. Any failure shows the demo courses and
    /// the warning banner instead; there is no retry.
    pub async fn load(&mut self, source: &SheetsClient) {
        self.loading = true;
        match source.fetch_values().await {
            Ok(rows) => {
                self.courses = group_rows(&rows);
                self.warning = None;
                log::info!("catalog loaded {} courses", self.courses.len());
            }
            Err(e) => {
                log::warn!("catalog fetch failed, using demo data: {}", e);
                self.courses = group_rows(&demo_rows());
                self.warning = Some(SYNC_WARNING.to_string());
            }
        }
        self.loading = false;
    }

    pub fn courses(&self) -> &[CatalogCourse] {
        &self.courses
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn select_course(&mut self, index: usize) -> Option<&CatalogCourse> {
        if index >= self.courses.len() {
            return None;
        }
        self.selected = Some(index);
        self.courses.get(index)
    }

    pub fn selected_course(&self) -> Option<&CatalogCourse> {
        self.selected.and_then(|i| self.courses.get(i))
    }

    pub fn close_course(&mut self) {
        self.selected = None;
    }

    /// Open a part of the selected course by id.
    ///
    /// Documents go to a new browsing context; videos become active and
    /// get the moving watermark.
    pub fn open_part(&mut self, part_id: usize) -> Option<OpenAction> {
        let part = self.selected_course()?.part(part_id)?.clone();
        match part.kind() {
            ContentKind::Document => Some(OpenAction::NewContext(part.link)),
            ContentKind::Video => {
                self.active_video = Some(part);
                self.watermark = Some(Watermark::start(WatermarkSpec::catalog()));
                Some(OpenAction::Play)
            }
        }
    }

    pub fn active_video(&self) -> Option<&Part> {
        self.active_video.as_ref()
    }

    pub fn watermark(&self) -> Option<&Watermark> {
        self.watermark.as_ref()
    }

    /// Closing the player stops the watermark timer
    pub fn close_video(&mut self) {
        self.active_video = None;
        self.watermark = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(rows: Vec<Vec<String>>) -> CatalogView {
        let mut view = CatalogView::new();
        view.courses = group_rows(&rows);
        view.loading = false;
        view
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn playing_needs_no_runtime() {
        let mut view = loaded(vec![row(&["Course", "L1", "Intro", "", "https://v.example/1", "Video"])]);
        view.select_course(0).unwrap();
        assert_eq!(view.open_part(0), Some(OpenAction::Play));
        assert!(view.watermark().is_some());
        view.close_video();
        assert!(view.watermark().is_none());
    }

    #[tokio::test]
    async fn video_parts_play_with_watermark() {
        let mut view = loaded(vec![
            row(&["Course", "L1", "Intro", "", "https://v.example/1", "Video"]),
            row(&["Course", "L1", "Slides", "", "https://d.example/1.pdf", "PDF"]),
        ]);
        assert!(view.open_part(0).is_none());

        view.select_course(0).unwrap();
        assert_eq!(
            view.open_part(1),
            Some(OpenAction::NewContext("https://d.example/1.pdf".to_string()))
        );
        assert!(view.active_video().is_none());

        assert_eq!(view.open_part(0), Some(OpenAction::Play));
        assert_eq!(view.active_video().unwrap().part, "Intro");
        assert!(view.watermark().unwrap().label().starts_with("Obscura Security Asset"));

        view.close_video();
        assert!(view.watermark().is_none());
        assert!(view.selected_course().is_some());
        view.close_course();
        assert!(view.selected_course().is_none());
    }

    #[test]
    fn select_out_of_range() {
        let mut view = loaded(demo_rows());
        assert!(view.select_course(5).is_none());
        assert!(view.selected_course().is_none());
    }
}
