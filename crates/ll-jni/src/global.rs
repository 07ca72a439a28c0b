use std::sync::OnceLock;

use ll_engine::{Bridge, DefaultBackend};

use crate::logging;

static BRIDGE: OnceLock<Bridge<DefaultBackend>> = OnceLock::new();

/// The process-wide handle registry behind every exported function.
pub fn bridge() -> &'static Bridge<DefaultBackend> {
    BRIDGE.get_or_init(|| {
        logging::init();
        let bridge = Bridge::new(DefaultBackend::default());
        log::info!(
            "local_llama bridge ready (real backend: {})",
            bridge.is_real_backend()
        );
        bridge
    })
}
