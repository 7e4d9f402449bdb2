use std::sync::Once;

static LOGGER: Once = Once::new();

pub fn setup_logger() {
    LOGGER.call_once(|| {
        // another subscriber may already be installed
        let _ = bucky_ring::utils::setup_logger();
    });
}
