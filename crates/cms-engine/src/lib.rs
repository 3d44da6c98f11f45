//! Reconciliation and reparse orchestration for cmake-sync.
//!
//! # Overview
//!
//! - [`Engine`] / [`EngineHandle`]: the tokio task that owns one logical
//!   target, runs reparse cycles and publishes [`ProjectSnapshot`]s as
//!   [`HostEvent`]s
//! - [`Orchestrator`]: the pure reparse state machine behind it
//! - [`reconcile`]: merging the tool's files with the scanned files,
//!   manual edits, generated companions
//! - [`ProjectTree`]: the folder hierarchy handed to the host
//! - [`ConfigurationSet`]: build configurations and staleness
//!
//! # Example
//!
//! ```no_run
//! use cms_core::{EngineConfig, ReparseFlags};
//! use cms_engine::{Engine, HostEvent};
//! use cms_reader::BuildDirParameters;
//!
//! # async fn example() -> Result<(), cms_engine::EngineError> {
//! let (handle, mut events) = Engine::new(EngineConfig::default())
//!     .with_configuration("Debug", BuildDirParameters::new("/src/demo", "/src/demo/build"))
//!     .spawn()?;
//! handle.parse(ReparseFlags::URGENT)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         HostEvent::DataAvailable(snapshot) => {
//!             println!("{}: {} targets", snapshot.project_name, snapshot.targets.len());
//!         }
//!         HostEvent::ErrorOccurred { message, .. } => eprintln!("{message}"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! host ──commands──► engine task ──► Orchestrator::handle ──► effects
//!                        ▲                                     │
//!                        │        scan job (spawn_blocking) ◄──┤
//!                        │        parse job (Reader)        ◄──┤
//!                        │        timers                    ◄──┘
//!                        └──── completions, watcher batches
//! ```
//!
//! Every job is stamped with the version of the cycle that started it.
//! Completions of superseded cycles are dropped.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod configurations;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod snapshot;
pub mod tree;

pub use configurations::{Activation, BuildConfiguration, ConfigurationSet};
pub use engine::{Engine, EngineHandle, HostEvent};
pub use error::EngineError;
pub use orchestrator::{CycleFacts, Effect, EngineEvent, Orchestrator};
pub use reconcile::{ManualEdits, MergeResult, SortedDiff, compare_sorted_lists, generated_files_for, merge};
pub use snapshot::ProjectSnapshot;
pub use tree::{FolderNode, OTHER_LOCATIONS, ProjectTree};
