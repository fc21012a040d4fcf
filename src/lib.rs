//! # shelfname
//!
//! Derive a canonical author/title/year for PDF and EPUB files and rename
//! them consistently.
//!
//! Several imperfect sources (the existing filename, embedded document
//! properties, the text of the first pages) are merged into one record,
//! scored for confidence, optionally corrected by an AI lookup that is
//! cached and deduplicated, and rendered into a sanitized, collision-safe
//! filename.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────┐   ┌──────────────┐
//! │  Extractors  │──▶│ Merge/Clean  │──▶│  Score   │──▶│ AI (cached)  │
//! │ name/props/  │   │  by priority │   │  [0,1]   │   │ if below     │
//! │ content      │   └──────────────┘   └──────────┘   │ threshold    │
//! └──────────────┘                                     └──────┬───────┘
//!                                                             ▼
//!                                        ┌──────────┐   ┌──────────────┐
//!                                        │  rename  │◀──│   naming     │
//!                                        │ / report │   │sanitize+dedup│
//!                                        └──────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! shelfname --dry-run rename ~/Books          # preview new names
//! shelfname rename ~/Books                    # apply
//! PERPLEXITY_API_KEY=pplx-… shelfname --use-ai rename ~/Books
//! shelfname inspect "S_or Dargo - Daily C++ Interview.epub"
//! shelfname cache stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`scan`] | Input discovery |
//! | [`extract`] | Document loading, PDF/EPUB readers |
//! | [`extract_filename`] | Filename pattern rules |
//! | [`extract_properties`] | PDF `/Info` and EPUB Dublin Core |
//! | [`extract_content`] | Leading-page text heuristics |
//! | [`clean`] | Normalization and corruption repair |
//! | [`merge`] | Priority merge with provenance |
//! | [`score`] | Confidence scoring |
//! | [`enhance`] | AI metadata oracle |
//! | [`cache`] | Fingerprinted, single-flight AI result cache |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`naming`] | Filename synthesis |
//! | [`pipeline`] | Per-file orchestration and batch runs |
//! | [`progress`] | Progress reporting |

pub mod cache;
pub mod clean;
pub mod config;
pub mod db;
pub mod enhance;
pub mod error;
pub mod extract;
pub mod extract_content;
pub mod extract_filename;
pub mod extract_properties;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod naming;
pub mod pipeline;
pub mod progress;
pub mod scan;
pub mod score;
