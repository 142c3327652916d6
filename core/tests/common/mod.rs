use std::path::Path;

use notes_core::instance::{Instance, InstanceConfig};

pub const DOMAIN: &str = "alice.example.net";

/// The smallest schema notes are created with.
pub const MINIMAL_SCHEMA: &str = r#"{"topNode":"doc","nodes":{"doc":{"content":"text*"}}}"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub async fn new_instance(path: &Path) -> Instance {
    init_tracing();
    Instance::create(path, InstanceConfig::new(DOMAIN))
        .await
        .expect("Test helper: Failed to create instance")
}

pub async fn new_instance_with(path: &Path, configure: impl FnOnce(&mut InstanceConfig)) -> Instance {
    init_tracing();
    let mut config = InstanceConfig::new(DOMAIN);
    configure(&mut config);
    Instance::create(path, config)
        .await
        .expect("Test helper: Failed to create instance")
}
