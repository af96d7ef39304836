//! Built-in advisory feed clients.
//!
//! Each module holds one client plus its settings struct; endpoints default
//! to the real services and are overridable for tests against a mock
//! server.

pub(crate) mod cisa;
pub(crate) mod github;
pub(crate) mod hackernews;
pub(crate) mod msrc;
pub(crate) mod nvd;
pub(crate) mod osv;
pub(crate) mod rss;
pub(crate) mod xml;

pub use cisa::{CisaFeed, CisaSettings};
pub use github::{GithubFeed, GithubSettings};
pub use hackernews::{HackerNewsFeed, HackerNewsSettings};
pub use msrc::{MsrcFeed, MsrcSettings};
pub use nvd::{NvdFeed, NvdSettings};
pub use osv::{OsvFeed, OsvSettings};
pub use rss::{RssFeed, RssSettings, RssSource};
