use serde::{Deserialize, Serialize};

/// Link relation of the OPDS page-streaming extension.
pub const PSE_STREAM_REL: &str = "http://vaemendis.net/opds-pse/stream";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub title: Option<String>,
    pub entries: Vec<Entry>,
}

impl Feed {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled catalog)")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub title: Option<String>,
    pub content: Option<String>,
    pub links: Vec<Link>,
}

impl Entry {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }

    /// The page-streaming link of this entry, if it advertises one.
    pub fn stream_link(&self) -> Option<&Link> {
        self.links.iter().find(|link| link.is_stream())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub rel: Option<String>,
    pub count: Option<String>,
    pub last_read: Option<String>,
}

impl Link {
    pub fn is_stream(&self) -> bool {
        self.rel.as_deref() == Some(PSE_STREAM_REL)
    }

    /// Non-blank href, if any.
    pub fn href(&self) -> Option<&str> {
        self.href.as_deref().filter(|h| !h.trim().is_empty())
    }

    /// Total page count; `None` unless it is a decimal integer greater than zero.
    pub fn page_count(&self) -> Option<u32> {
        parse_positive(self.count.as_deref())
    }

    /// Last page read (1-based); `None` unless it is a decimal integer greater than zero.
    pub fn last_read(&self) -> Option<u32> {
        parse_positive(self.last_read.as_deref())
    }
}

fn parse_positive(value: Option<&str>) -> Option<u32> {
    value?.parse::<u32>().ok().filter(|n| *n > 0)
}
