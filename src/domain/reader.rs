use serde::{Deserialize, Serialize};

use crate::domain::Entry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageMode {
    #[default]
    Single,
    Double,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    FitWidth,
    FitHeight,
    #[default]
    FitScreen,
}

/// Failure to load the page currently on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLoadError {
    pub page: u32,
    pub detail: String,
}

/// An open paged stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderState {
    /// Absolute stream URL, still carrying its page placeholder.
    pub stream_template: String,
    /// Base the page addresses are resolved against.
    pub base_url: String,
    pub page_count: u32,
    pub current_page: u32,
    pub last_read_page: u32,
    pub source: Entry,
    pub page_error: Option<PageLoadError>,
}

impl ReaderState {
    pub fn new(
        stream_template: String,
        base_url: String,
        page_count: u32,
        last_read_page: u32,
        source: Entry,
    ) -> Self {
        Self {
            stream_template,
            base_url,
            page_count,
            current_page: 1,
            last_read_page,
            source,
            page_error: None,
        }
    }

    /// Highest addressable page. A stream without a usable count still shows page 1.
    pub fn last_page(&self) -> u32 {
        self.page_count.max(1)
    }

    pub fn clamp(&self, page: u32) -> u32 {
        page.clamp(1, self.last_page())
    }

    /// Move to `page`, clamped to the volume. Clears any error for the previous page.
    pub fn with_page(mut self, page: u32) -> Self {
        let page = self.clamp(page);
        if page != self.current_page {
            self.page_error = None;
        }
        self.current_page = page;
        self
    }

    pub fn is_first_page(&self) -> bool {
        self.current_page <= 1
    }

    pub fn is_last_page(&self) -> bool {
        self.current_page >= self.last_page()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(count: u32) -> ReaderState {
        ReaderState::new(
            "https://h/stream/1?pageNumber=0".into(),
            "https://h".into(),
            count,
            0,
            Entry::default(),
        )
    }

    #[test]
    fn test_starts_at_first_page() {
        let r = reader(20);
        assert_eq!(r.current_page, 1);
        assert!(r.is_first_page());
        assert!(!r.is_last_page());
    }

    #[test]
    fn test_with_page_clamps() {
        assert_eq!(reader(20).with_page(0).current_page, 1);
        assert_eq!(reader(20).with_page(25).current_page, 20);
        assert_eq!(reader(20).with_page(7).current_page, 7);
    }

    #[test]
    fn test_zero_count_pins_to_first_page() {
        let r = reader(0).with_page(5);
        assert_eq!(r.current_page, 1);
        assert!(r.is_last_page());
    }

    #[test]
    fn test_page_change_clears_error() {
        let mut r = reader(20).with_page(3);
        r.page_error = Some(PageLoadError {
            page: 3,
            detail: "timeout".into(),
        });
        assert!(r.clone().with_page(3).page_error.is_some());
        assert!(r.with_page(4).page_error.is_none());
    }

    #[test]
    fn test_modes_deserialize_snake_case() {
        #[derive(Deserialize)]
        struct Modes {
            page: PageMode,
            scale: ScaleMode,
        }
        let modes: Modes = toml::from_str("page = \"double\"\nscale = \"fit_width\"").unwrap();
        assert_eq!(modes.page, PageMode::Double);
        assert_eq!(modes.scale, ScaleMode::FitWidth);
    }
}
