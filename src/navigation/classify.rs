use crate::domain::{Entry, Link};

const ARCHIVE_TYPES: [&str; 2] = ["application/x-cbz", "application/x-zip-compressed"];
const ATOM_TYPE_PREFIX: &str = "application/atom+xml";

/// What activating an entry should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Load a sub-catalog.
    Navigate { href: String },
    /// Open a paged stream with a known page count.
    OpenStream {
        href: String,
        count: u32,
        last_read: Option<u32>,
    },
    /// Open a paged stream whose page count is unusable; reading starts at page 1.
    OpenStreamFromStart { href: String },
    Unhandled,
}

impl LinkAction {
    pub fn label(&self) -> &'static str {
        match self {
            LinkAction::Navigate { .. } => "navigate",
            LinkAction::OpenStream { .. } => "stream",
            LinkAction::OpenStreamFromStart { .. } => "stream (from start)",
            LinkAction::Unhandled => "unhandled",
        }
    }
}

/// Pick the action for an entry by scanning its links in order.
///
/// An archive link makes the entry readable through its page-streaming link. An
/// archive link without a usable stream link does not end the scan, so a later
/// navigation link can still match.
pub fn classify(entry: &Entry) -> LinkAction {
    for link in &entry.links {
        let media_type = link.media_type.as_deref().unwrap_or_default();

        if ARCHIVE_TYPES.contains(&media_type) {
            if let Some(action) = stream_action(entry) {
                return action;
            }
            tracing::debug!(
                "Entry {:?} has an archive link but no usable stream link",
                entry.title
            );
        } else if media_type.starts_with(ATOM_TYPE_PREFIX) {
            return match link.href() {
                Some(href) => LinkAction::Navigate {
                    href: href.to_string(),
                },
                None => LinkAction::Unhandled,
            };
        }
    }

    tracing::debug!("No actionable link in entry {:?}", entry.title);
    LinkAction::Unhandled
}

fn stream_action(entry: &Entry) -> Option<LinkAction> {
    let stream = entry.stream_link()?;
    let href = stream.href()?.to_string();

    Some(match stream.page_count() {
        Some(count) => LinkAction::OpenStream {
            href,
            count,
            last_read: stream.last_read(),
        },
        None => LinkAction::OpenStreamFromStart { href },
    })
}

/// The stream link an activation will read from, for entries classified as streams.
pub fn stream_link(entry: &Entry) -> Option<&Link> {
    entry.stream_link().filter(|link| link.href().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PSE_STREAM_REL;

    fn link(media_type: &str, href: &str) -> Link {
        Link {
            href: Some(href.into()),
            media_type: Some(media_type.into()),
            ..Default::default()
        }
    }

    fn stream(href: &str, count: Option<&str>, last_read: Option<&str>) -> Link {
        Link {
            href: Some(href.into()),
            media_type: Some("image/jpeg".into()),
            rel: Some(PSE_STREAM_REL.into()),
            count: count.map(String::from),
            last_read: last_read.map(String::from),
        }
    }

    fn entry(links: Vec<Link>) -> Entry {
        Entry {
            title: Some("entry".into()),
            content: None,
            links,
        }
    }

    #[test]
    fn test_cbz_with_stream_link() {
        let e = entry(vec![Link {
            href: Some("/stream/42".into()),
            media_type: Some("application/x-cbz".into()),
            rel: Some(PSE_STREAM_REL.into()),
            count: Some("120".into()),
            last_read: Some("37".into()),
        }]);
        assert_eq!(
            classify(&e),
            LinkAction::OpenStream {
                href: "/stream/42".into(),
                count: 120,
                last_read: Some(37),
            }
        );
    }

    #[test]
    fn test_zip_with_separate_stream_link() {
        let e = entry(vec![
            link("application/x-zip-compressed", "/download/1"),
            stream("/pages/{pageNumber}", Some("12"), None),
        ]);
        assert_eq!(
            classify(&e),
            LinkAction::OpenStream {
                href: "/pages/{pageNumber}".into(),
                count: 12,
                last_read: None,
            }
        );
    }

    #[test]
    fn test_stream_without_count_opens_from_start() {
        let e = entry(vec![
            link("application/x-cbz", "/download/1"),
            stream("/pages/{pageNumber}", Some("0"), Some("4")),
        ]);
        assert_eq!(
            classify(&e),
            LinkAction::OpenStreamFromStart {
                href: "/pages/{pageNumber}".into()
            }
        );
    }

    #[test]
    fn test_cbz_without_stream_link_is_unhandled() {
        let e = entry(vec![link("application/x-cbz", "/download/1")]);
        assert_eq!(classify(&e), LinkAction::Unhandled);
    }

    #[test]
    fn test_blank_stream_href_falls_through_to_navigation() {
        let e = entry(vec![
            link("application/x-cbz", "/download/1"),
            stream("  ", Some("10"), None),
            link("application/atom+xml;profile=opds-catalog", "/series/3"),
        ]);
        assert_eq!(
            classify(&e),
            LinkAction::Navigate {
                href: "/series/3".into()
            }
        );
    }

    #[test]
    fn test_first_navigation_link_wins() {
        let e = entry(vec![
            link("text/html", "/web"),
            link("application/atom+xml;kind=navigation", "/first"),
            link("application/atom+xml;kind=acquisition", "/second"),
        ]);
        assert_eq!(
            classify(&e),
            LinkAction::Navigate {
                href: "/first".into()
            }
        );
    }

    #[test]
    fn test_navigation_link_without_href() {
        let e = entry(vec![Link {
            media_type: Some("application/atom+xml".into()),
            ..Default::default()
        }]);
        assert_eq!(classify(&e), LinkAction::Unhandled);
    }

    #[test]
    fn test_no_links() {
        assert_eq!(classify(&entry(vec![])), LinkAction::Unhandled);
        let e = entry(vec![link("image/jpeg", "/thumb.jpg")]);
        assert_eq!(classify(&e), LinkAction::Unhandled);
    }

    #[test]
    fn test_stream_link_helper() {
        let e = entry(vec![stream("/p", Some("3"), None)]);
        assert!(stream_link(&e).is_some());
        assert!(stream_link(&entry(vec![stream("", Some("3"), None)])).is_none());
    }
}
