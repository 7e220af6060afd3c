//! `media_catalog_core`: ingest pipeline and catalog store for a locally
//! mirrored media library sourced from a remote Plex-compatible server.
//!
//! Layering follows the dependency order the façade assembles things in:
//! models and errors at the bottom, then the Store/PathMapper/ExternalClient/
//! Mapper/Validator/ErrorHandler components, then the Orchestrator that
//! drives them, then the Facade that wires it all up for a caller.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod error_handling;
pub mod facade;
pub mod mapper;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod path_mapper;
pub mod validator;

pub use client::{ClientConfig, ClientError, PlexClient};
pub use config::Config;
pub use db::Db;
pub use error::CoreError;
pub use facade::Facade;
pub use models::{ContentItem, ContentKind, Library, LibraryKind, MediaFile};
pub use orchestrator::{Orchestrator, ProgressEvent, ProgressStage, SyncMode, SyncOptions, SyncStats};
pub use path_mapper::PathMapper;
pub use validator::Validator;
