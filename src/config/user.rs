//! Settings file discovery and loading.
//!
//! User config location: $XDG_CONFIG_HOME/dap-bridge/dap-bridge.toml
//! Fallback: the platform config directory from `dirs::config_dir()`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::BridgeSettings;
use crate::error::{BridgeError, BridgeResult};

const CONFIG_DIR_NAME: &str = "dap-bridge";
const CONFIG_FILE_NAME: &str = "dap-bridge.toml";

/// Returns the path to the user configuration file.
///
/// 1. If $XDG_CONFIG_HOME is set and non-empty: $XDG_CONFIG_HOME/dap-bridge/dap-bridge.toml
/// 2. Otherwise: <platform config dir>/dap-bridge/dap-bridge.toml
///
/// Returns None if neither location can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => dirs::config_dir()?,
    };
    Some(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Parse and validate settings from TOML text.
pub fn parse_settings(text: &str) -> BridgeResult<BridgeSettings> {
    let settings: BridgeSettings =
        toml::from_str(text).map_err(|e| BridgeError::config(e.to_string()))?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from the user config file, or defaults if there is none.
pub fn load_user_settings() -> BridgeResult<BridgeSettings> {
    let Some(path) = user_config_path() else {
        log::debug!(
            target: "dap_bridge::config",
            "No user config directory, using default settings"
        );
        return Ok(BridgeSettings::default());
    };

    match fs::read_to_string(&path) {
        Ok(text) => {
            log::debug!(target: "dap_bridge::config", "Loading settings from {}", path.display());
            parse_settings(&text).map_err(|e| with_path(&path, e))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BridgeSettings::default()),
        Err(e) => Err(BridgeError::config(format!(
            "could not read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Load settings from `path` if given (the file must exist), otherwise
/// from the user config location.
pub fn load_settings(path: Option<&Path>) -> BridgeResult<BridgeSettings> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| {
                BridgeError::config(format!("could not read {}: {}", path.display(), e))
            })?;
            parse_settings(&text).map_err(|e| with_path(path, e))
        }
        None => load_user_settings(),
    }
}

fn with_path(path: &Path, error: BridgeError) -> BridgeError {
    match error {
        BridgeError::Config { message } => {
            BridgeError::config(format!("{}: {}", path.display(), message))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::time::Duration;
    use tempfile::TempDir;

    fn with_xdg_config_home<T>(value: Option<&Path>, f: impl FnOnce() -> T) -> T {
        let original = env::var_os("XDG_CONFIG_HOME");
        // SAFETY: #[serial(xdg_env)] prevents concurrent modification of XDG_CONFIG_HOME
        unsafe {
            match value {
                Some(path) => env::set_var("XDG_CONFIG_HOME", path),
                None => env::remove_var("XDG_CONFIG_HOME"),
            }
        }

        let result = f();

        // SAFETY: same as above, restoring the original value
        unsafe {
            match original {
                Some(val) => env::set_var("XDG_CONFIG_HOME", val),
                None => env::remove_var("XDG_CONFIG_HOME"),
            }
        }
        result
    }

    #[test]
    #[serial(xdg_env)]
    fn user_config_path_uses_xdg_config_home_when_set() {
        let path = with_xdg_config_home(Some(Path::new("/custom/config")), user_config_path);

        assert_eq!(
            path,
            Some(PathBuf::from("/custom/config/dap-bridge/dap-bridge.toml"))
        );
    }

    #[test]
    #[serial(xdg_env)]
    fn missing_user_file_yields_defaults() {
        let dir = TempDir::new().expect("failed to create temp dir");

        let settings = with_xdg_config_home(Some(dir.path()), load_user_settings).unwrap();

        assert_eq!(settings, BridgeSettings::default());
    }

    #[test]
    #[serial(xdg_env)]
    fn user_file_is_loaded() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let config_dir = dir.path().join("dap-bridge");
        fs::create_dir_all(&config_dir).expect("failed to create config dir");
        fs::write(
            config_dir.join("dap-bridge.toml"),
            r#"
            [backend]
            command = "/opt/go/bin/dlv"

            [backend.dial_retry]
            max_attempts = 6
            "#,
        )
        .expect("failed to write config");

        let settings = with_xdg_config_home(Some(dir.path()), load_user_settings).unwrap();

        assert_eq!(settings.backend.command, "/opt/go/bin/dlv");
        assert_eq!(settings.backend.dial_retry.max_attempts, 6);
        assert_eq!(settings.backend.announce_timeout, Duration::from_secs(5));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("absent.toml");

        let err = load_settings(Some(&path)).unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn invalid_toml_reports_path() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[session\nrequest_timeout = ").expect("failed to write config");

        let err = load_settings(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("broken.toml"), "got: {}", err);
    }

    #[test]
    fn parse_settings_validates() {
        let err = parse_settings("[session]\nchannel_capacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("channel_capacity"));
    }
}
