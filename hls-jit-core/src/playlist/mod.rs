//! VOD media playlist generation: writes a placeholder file exactly once per
//! `(videoId, label)` and returns it unchanged on subsequent calls.

pub mod builder;
pub mod master;
pub mod variant;

pub use builder::{KnownVariants, PlaylistBuilder, PlaylistOptions};
pub use variant::render_variant_playlist;
