//! Catalog navigation: link classification, URL building and the browse/read
//! state machine with its async driver.

pub mod classify;
pub mod controller;
pub mod state;
pub mod url;

pub use classify::{classify, LinkAction};
pub use controller::NavigationController;
pub use state::{
    Direction, Effect, FeedOp, FeedRequest, NavError, NavigationStack, Navigator, Screen,
};
