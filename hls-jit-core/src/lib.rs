//! Core segment supervisor for just-in-time HLS transcoding.
//!
//! This crate owns the grid model, the transcoder session lifecycle, the
//! registry that resolves a segment request to a session, and the playlist
//! generation that advertises the grid to clients. HTTP routing, media
//! probing's child process, and the transcoder binary itself are external
//! collaborators; this crate defines their boundaries (see [`probe`] and
//! [`session::args`]) without implementing the boundary's other side.

pub mod config;
pub mod error;
pub mod grid;
pub mod hwpool;
pub mod locks;
pub mod playlist;
pub mod postprocess;
pub mod probe;
pub mod registry;
pub mod session;
pub mod sweepers;
pub mod viewer;

pub use config::Config;
pub use error::{HlsJitError, Result};
pub use grid::{Grid, GridCache, GridPlanner, SegmentDescriptor};
pub use probe::{MediaMeta, MediaProbe};
pub use registry::Supervisor;
