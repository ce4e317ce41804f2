//! Application state shared across all handlers: the supervisor, the loaded
//! configuration, and the sweeper task handles. Shaped like the teacher's
//! `AppState` in `hls-vod-server/src/state.rs`, minus the segment cache
//! (segments here live on disk under the supervisor's control, not in an
//! in-process LRU).

use std::sync::Arc;

use hls_jit_core::{Config, Supervisor};
use tokio::task::JoinHandle;

pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(supervisor: Arc<Supervisor>, config: Arc<Config>) -> Self {
        Self { supervisor, config }
    }
}

/// Join handles for the two sweeper tasks spawned at startup, kept around so
/// the process can be shut down cleanly in tests.
pub struct SweeperHandles {
    pub pause: JoinHandle<()>,
    pub cleanup: JoinHandle<()>,
}

impl Drop for SweeperHandles {
    fn drop(&mut self) {
        self.pause.abort();
        self.cleanup.abort();
    }
}
