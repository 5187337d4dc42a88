/*!
herald/src/lib.rs

Multi-user, AI-assisted feed ingestion and curation engine.

Mirrors the teacher's single-package dual-target layout (`newscope`'s
`lib.rs`/`main.rs` split): the binary in `main.rs` is a thin CLI shell
over the `Engine` façade exposed here; all engine behavior lives in the
library so it can also be embedded directly by other consumers (the
read-only web UI, an MCP server, etc. — see SPEC_FULL.md §3).
*/

pub mod embedding;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod group_matcher;
pub mod llm;
pub mod opml;
pub mod pipeline;
pub mod poller;
pub mod prompt_loader;
pub mod ranking;
pub mod store;
pub mod webui;

pub use engine::Engine;
pub use error::{HeraldError, Result};
