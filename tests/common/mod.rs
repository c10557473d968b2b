use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use mcplex::config::{ServerConfig, ServerRecord};

/// Returns the path to the `mcp_test_server` binary.
///
/// Cargo sets `CARGO_BIN_EXE_mcp_test_server` when building integration
/// tests; the fallbacks help when running a test binary by hand.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    if let Some(p) = option_env!("CARGO_BIN_EXE_mcp_test_server") {
        return PathBuf::from(p);
    }

    if let Ok(manifest) = std::env::var("CARGO_MANIFEST_DIR") {
        let debug = PathBuf::from(manifest)
            .join("target")
            .join("debug")
            .join("mcp_test_server");
        if debug.exists() {
            return debug;
        }
    }

    PathBuf::from("mcp_test_server")
}

/// A stdio server config spawning the test server.
#[allow(dead_code)]
pub fn test_server_config() -> ServerConfig {
    let mut config = ServerConfig::stdio(test_server_exe().to_string_lossy(), Vec::new());
    config.retry_attempts = 0;
    config.retry_delay = 0.0;
    config
}

/// A stdio server record spawning the test server.
#[allow(dead_code)]
pub fn test_server_record(id: &str) -> ServerRecord {
    ServerRecord::new(id, test_server_config())
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
