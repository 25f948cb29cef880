pub mod feed;
pub mod reader;

pub use feed::{Entry, Feed, Link, PSE_STREAM_REL};
pub use reader::{PageLoadError, PageMode, ReaderState, ScaleMode};
