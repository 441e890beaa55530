//! Process-wide channel bookkeeping.
//!
//! The registry is not the owner of live channel state — a [`crate::Channel`]
//! owns its own transport and export list and releases them in `Drop`. The
//! registry exists purely for the bookkeeping the original's file-scope
//! `__mpc_base` list provided: a process-wide count/lookup used for
//! diagnostics and for tests asserting teardown actually happened (e.g. "no
//! poller children are left running").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Opaque identifier for a registered channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Bookkeeping recorded about a live channel, for diagnostics only.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub name: String,
    pub is_server: bool,
    /// Poller child pid, for shared-memory channels.
    pub poller_pid: Option<i32>,
}

fn table() -> &'static Mutex<HashMap<ChannelId, ChannelInfo>> {
    static TABLE: std::sync::OnceLock<Mutex<HashMap<ChannelId, ChannelInfo>>> =
        std::sync::OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a newly-created channel, returning its id.
pub fn insert(info: ChannelInfo) -> ChannelId {
    let id = ChannelId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
    table().lock().unwrap_or_else(|e| e.into_inner()).insert(id, info);
    id
}

/// Remove a channel from the registry. Returns `false` if it was not
/// present, which the caller surfaces as [`crate::Error::NotFound`].
pub fn remove(id: ChannelId) -> bool {
    table()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&id)
        .is_some()
}

/// Update the poller pid recorded for a channel, once its poller child has
/// been forked.
pub fn set_poller_pid(id: ChannelId, pid: i32) {
    if let Some(info) = table().lock().unwrap_or_else(|e| e.into_inner()).get_mut(&id) {
        info.poller_pid = Some(pid);
    }
}

/// Number of channels currently registered. Used by tests to assert
/// teardown actually released resources.
pub fn active_channel_count() -> usize {
    table().lock().unwrap_or_else(|e| e.into_inner()).len()
}

/// Poller pids currently recorded, for tests that check exactly one poller
/// child is running per memory-transport channel.
pub fn active_poller_pids() -> Vec<i32> {
    table()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .values()
        .filter_map(|info| info.poller_pid)
        .collect()
}
