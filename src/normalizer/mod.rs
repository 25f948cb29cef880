use html_escape::decode_html_entities;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::app::{OpdsError, Result};
use crate::domain::{Entry, Feed, Link};

/// Text element currently being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    FeedTitle,
    EntryTitle,
    EntryContent,
}

/// Extracts the handful of OPDS fields the reader consumes from an Atom catalog.
#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, body: &[u8]) -> Result<Feed> {
        let mut reader = Reader::from_reader(body);
        reader.config_mut().trim_text(true);

        let mut feed = Feed::default();
        let mut saw_feed = false;
        let mut entry: Option<Entry> = None;
        // (field, element depth it was opened at, collected text)
        let mut capture: Option<(Field, usize, String)> = None;
        let mut depth = 0usize;
        let mut buf = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| parse_error(&reader, e))?;

            match event {
                Event::Start(e) => {
                    depth += 1;
                    match e.local_name().as_ref() {
                        b"feed" if depth == 1 => saw_feed = true,
                        b"entry" if entry.is_none() => entry = Some(Entry::default()),
                        b"link" => push_link(entry.as_mut(), &e)?,
                        b"title" if capture.is_none() => {
                            let field = if entry.is_some() {
                                Field::EntryTitle
                            } else {
                                Field::FeedTitle
                            };
                            capture = Some((field, depth, String::new()));
                        }
                        b"content" if capture.is_none() && entry.is_some() => {
                            capture = Some((Field::EntryContent, depth, String::new()));
                        }
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    if e.local_name().as_ref() == b"link" {
                        push_link(entry.as_mut(), &e)?;
                    }
                }
                Event::Text(t) => {
                    if let Some((_, _, text)) = capture.as_mut() {
                        let value = t
                            .unescape()
                            .map_err(|e| OpdsError::FeedParse(e.to_string()))?;
                        append_text(text, &value);
                    }
                }
                Event::CData(c) => {
                    if let Some((_, _, text)) = capture.as_mut() {
                        // Servers escape HTML inside CDATA too
                        let raw = String::from_utf8_lossy(&c.into_inner()).into_owned();
                        append_text(text, &decode_html_entities(&raw));
                    }
                }
                Event::End(e) => {
                    if let Some((field, opened_at, _)) = &capture {
                        if *opened_at == depth {
                            let field = *field;
                            if let Some((_, _, text)) = capture.take() {
                                store_text(&mut feed, entry.as_mut(), field, text);
                            }
                        }
                    }
                    if e.local_name().as_ref() == b"entry" {
                        if let Some(done) = entry.take() {
                            feed.entries.push(done);
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !saw_feed {
            return Err(OpdsError::FeedParse("document has no <feed> root".into()));
        }

        tracing::debug!(
            "Parsed feed {:?} with {} entries",
            feed.title,
            feed.entries.len()
        );
        Ok(feed)
    }
}

fn parse_error(reader: &Reader<&[u8]>, err: quick_xml::Error) -> OpdsError {
    OpdsError::FeedParse(format!(
        "at byte {}: {}",
        reader.buffer_position(),
        err
    ))
}

/// Links outside an entry (catalog navigation) are not consumed.
fn push_link(entry: Option<&mut Entry>, element: &BytesStart<'_>) -> Result<()> {
    let Some(entry) = entry else {
        return Ok(());
    };

    let mut link = Link::default();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| OpdsError::FeedParse(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| OpdsError::FeedParse(e.to_string()))?
            .into_owned();

        match attr.key.local_name().as_ref() {
            b"href" => link.href = Some(value),
            b"type" => link.media_type = Some(value),
            b"rel" => link.rel = Some(value),
            b"count" => link.count = Some(value),
            b"lastRead" => link.last_read = Some(value),
            _ => {}
        }
    }
    entry.links.push(link);
    Ok(())
}

fn append_text(text: &mut String, value: &str) {
    if !text.is_empty() {
        text.push(' ');
    }
    text.push_str(value);
}

fn store_text(feed: &mut Feed, entry: Option<&mut Entry>, field: Field, text: String) {
    if text.is_empty() {
        return;
    }
    match (field, entry) {
        (Field::FeedTitle, _) => {
            if feed.title.is_none() {
                feed.title = Some(text);
            }
        }
        (Field::EntryTitle, Some(entry)) => entry.title = Some(text),
        (Field::EntryContent, Some(entry)) => entry.content = Some(text),
        _ => {}
    }
}
