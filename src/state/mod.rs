//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlPhase`: the coordinator's state machine (idle, fetching, parsing, ... done)
//! - `SessionState`: per-adapter session identity (request counter, User-Agent, proxy)

mod phase;
mod session;

// Re-export main types
pub use phase::CrawlPhase;
pub use session::{SessionState, USER_AGENTS};
