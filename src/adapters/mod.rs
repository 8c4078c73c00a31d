//! Adapter traits (A5) for every out-of-scope external collaborator named in
//! `SPEC_FULL.md` §1: the chat platform, the code forge, a headless browser
//! driver, and a web search/fetch provider. Each is a static trait plus a
//! dyn-compatible companion with a blanket impl, so concrete adapters can be
//! boxed and swapped — the same idiom used throughout this codebase for
//! messaging adapters. Only a local/dev-friendly implementation of each is
//! provided here; wiring up the real chat/forge backends is out of scope.

pub mod browser;
pub mod chat;
pub mod forge;
pub mod search;

pub use browser::{Browser, BrowserDyn};
pub use chat::{Chat, ChatDyn};
pub use forge::{Forge, ForgeDyn};
pub use search::{SearchFetch, SearchFetchDyn};
