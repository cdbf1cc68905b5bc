//! Process-wide check for whether change listening can work here.
//!
//! The probe runs once, on first use, and the answer is kept for the life of
//! the process. It only gates `listen()`; the one-shot theme probe works
//! either way.

use std::sync::OnceLock;

use tracing::debug;

static CAN_LISTEN: OnceLock<bool> = OnceLock::new();

pub fn can_listen() -> bool {
    *CAN_LISTEN.get_or_init(|| {
        let available = crate::watch::listen_supported();
        debug!(available, "probed listen capability");
        available
    })
}
