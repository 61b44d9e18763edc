//! # tagweave
//!
//! Semantic annotation and corpus indexing for plain-text knowledge vaults.
//!
//! Documents carry typed, identified annotations ("tags") in a block of
//! inline-comment fragments at the end of the file. A persistent registry
//! gives each concept one stable UUID across the corpus, and the indexing
//! engine aggregates tags into concepts, cross-document relations and
//! co-occurrence rankings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │    Vault    │──▶│  Tag store   │──▶│ Index engine  │──▶ IndexSnapshot
//! │  FS/Memory  │   │ codec + ids │   │ cooperative  │         │
//! └─────────────┘   └──────┬──────┘   └──────────────┘         ▼
//!                          │                                 ┌──────────┐
//!                    ┌─────▼──────┐                          │  Queries │
//!                    │  Registry  │◀── classify ── Classifier│  (tw)    │
//!                    └────────────┘                          └──────────┘
//! ```
//!
//! ## Tag wire format
//!
//! ```text
//! %%--- SEMANTIC TAGS ---%%
//! %%tag::Axiom::2f1c...::"Conservation of Energy"::null%%
//! %%tag::Claim::9a0b...::"Energy is conserved"::2f1c...%%
//! %%--- END SEMANTIC TAGS ---%%
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tw estimate                        # characters and tokens in scope
//! tw tag add notes/a.md Axiom "Conservation of Energy"
//! tw index --progress human          # build and save the snapshot
//! tw related notes/a.md
//! tw concept "conservation of energy"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Tag types and annotation records |
//! | [`tag_codec`] | Fragment and block encoding |
//! | [`registry`] | Persistent concept identity registry |
//! | [`tag_store`] | Per-document tag reads and writes |
//! | [`traits`] | `Vault` and `Classifier` collaborator traits |
//! | [`vault_fs`] | Filesystem vault |
//! | [`vault_memory`] | In-memory vault |
//! | [`classify`] | Classifier output to tag blocks |
//! | [`engine`] | Index build, cost estimate, abort |
//! | [`relations`] | Pairwise relations and co-occurrence |
//! | [`snapshot`] | Index snapshot data model |
//! | [`search`] | Snapshot queries |
//! | [`stats`] | Snapshot statistics |
//! | [`export`] | Snapshot persistence |
//! | [`get`] | Single-document tag listing |
//! | [`progress`] | Index progress reporting |

pub mod classify;
pub mod config;
pub mod engine;
pub mod export;
pub mod get;
pub mod models;
pub mod progress;
pub mod registry;
pub mod relations;
pub mod search;
pub mod snapshot;
pub mod stats;
pub mod tag_codec;
pub mod tag_store;
pub mod traits;
pub mod vault_fs;
pub mod vault_memory;
