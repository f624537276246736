//! Centralized path resolution for wpstack
//!
//! # Environment Variables
//!
//! - `WPSTACK_STATE_DIR` - Override the state directory
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `WPSTACK_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/wpstack` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\wpstack`
//!    - macOS/Linux: `~/.local/state/wpstack`
//!
//! Snapshots live at `<state_dir>/<project>/<stack>.json`, next to the
//! simulated cloud used by `--simulate`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "WPSTACK_STATE_DIR";

/// Get the wpstack state directory path
pub fn state_dir() -> Result<PathBuf> {
    // 1. Check environment variable override
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    // 2. Check XDG_STATE_HOME
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("wpstack");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    // 3. Platform default
    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("wpstack");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    // Unix default: ~/.local/state/wpstack
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("wpstack");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Snapshot file of one stack
pub fn stack_state_file(state_dir: &Path, project: &str, stack: &str) -> PathBuf {
    state_dir.join(project).join(format!("{stack}.json"))
}

/// File backing the simulated cloud of one project
pub fn simulated_cloud_file(state_dir: &Path, project: &str) -> PathBuf {
    state_dir.join(project).join("simulated-cloud.json")
}

/// Default stack configuration file, relative to the working directory
pub fn default_config_file(stack: &str) -> PathBuf {
    PathBuf::from(format!("Stack.{stack}.toml"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    /// Serializes tests that touch the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Helper to run a test with temporary env vars set (`Some`) or removed (`None`)
    fn with_env<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();
        for (key, value) in vars {
            // SAFETY: env access in these tests is serialized by ENV_LOCK
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }
        let result = f();
        for (key, original) in originals {
            // SAFETY: as above
            match original {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }
        result
    }

    #[test]
    fn test_state_dir_env_override() {
        with_env(&[(ENV_STATE_DIR, Some("/custom/state/path"))], || {
            assert_eq!(state_dir().unwrap(), PathBuf::from("/custom/state/path"));
        });
    }

    #[test]
    fn test_state_dir_env_override_with_tilde() {
        let home = dirs::home_dir().unwrap();
        with_env(&[(ENV_STATE_DIR, Some("~/wpstack-tilde-test"))], || {
            assert_eq!(state_dir().unwrap(), home.join("wpstack-tilde-test"));
        });
    }

    #[test]
    fn test_xdg_state_home() {
        with_env(
            &[
                (ENV_STATE_DIR, None),
                ("XDG_STATE_HOME", Some("/tmp/xdg-state-test")),
            ],
            || {
                assert_eq!(
                    state_dir().unwrap(),
                    PathBuf::from("/tmp/xdg-state-test/wpstack")
                );
            },
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_default_state_dir_unix() {
        with_env(&[(ENV_STATE_DIR, None), ("XDG_STATE_HOME", None)], || {
            let home = dirs::home_dir().unwrap();
            assert_eq!(
                state_dir().unwrap(),
                home.join(".local").join("state").join("wpstack")
            );
        });
    }

    #[test]
    fn test_stack_files() {
        let dir = Path::new("/state");
        assert_eq!(
            stack_state_file(dir, "wordpress-host", "dev"),
            PathBuf::from("/state/wordpress-host/dev.json")
        );
        assert_eq!(
            simulated_cloud_file(dir, "wordpress-host"),
            PathBuf::from("/state/wordpress-host/simulated-cloud.json")
        );
        assert_eq!(default_config_file("prod"), PathBuf::from("Stack.prod.toml"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_with_env_var() {
        with_env(&[("WPSTACK_TEST_VAR", Some("test_value"))], || {
            assert_eq!(
                expand("/path/$WPSTACK_TEST_VAR/file"),
                PathBuf::from("/path/test_value/file")
            );
        });
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }
}
