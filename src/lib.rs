//! Download a filtered snapshot of a model hub repository into a local
//! directory.
//!
//! The usual entry point is the [`Driver`], which takes a [`Config`] and runs
//! exactly one snapshot download against the hub it describes.

pub mod config;
mod driver;
mod errors;
pub mod hub;
pub mod patterns;

pub use crate::config::{Config, HubConfig, SnapshotConfig};
pub use crate::driver::{snapshot_download, Driver, Snapshot, SnapshotRequest};
pub use crate::errors::{DownloadFailure, FailedRequest, InvalidRepoType, UnsafePath};
pub use crate::hub::{Hub, HttpHub, RepoFile, RepoInfo, RepoType};
pub use crate::patterns::Pattern;
