use std::path::PathBuf;
use std::time::Duration;

/// Quiet interval before a changed preview re-renders (milliseconds)
pub const DEFAULT_PREVIEW_QUIET_MS: u64 = 300;

/// How long a gateway call may stay unanswered (milliseconds)
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_API_PORT: u16 = 4100;

pub const API_COMMAND_PATH: &str = "/api/command";

/// Prefix front ends put in front of command names on the message bridge
pub const DEFAULT_COMMAND_NAMESPACE: &str = "bridge";

pub fn preview_quiet_interval() -> Duration {
    Duration::from_millis(DEFAULT_PREVIEW_QUIET_MS)
}

pub fn command_timeout() -> Duration {
    Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS)
}

/// Endpoint the network fallback posts commands to.
pub fn default_api_endpoint() -> String {
    format!("http://127.0.0.1:{}{}", DEFAULT_API_PORT, API_COMMAND_PATH)
}

/// Returns the path to the data directory for command-bridge.
/// Uses $XDG_DATA_HOME/command-bridge if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/command-bridge,
/// or ./command-bridge if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join(LOG_FILE_NAME)
}

pub const LOG_FILE_NAME: &str = "command-bridge.log";

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("command-bridge")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_with_env_uses_xdg_data_home_when_set() {
        let path = data_dir_with_env(
            Some("/tmp/test-data".to_string()),
            Some(PathBuf::from("/home/user")),
        );

        assert_eq!(path, PathBuf::from("/tmp/test-data/command-bridge"));
    }

    #[test]
    fn data_dir_with_env_ignores_empty_xdg_data_home() {
        let path = data_dir_with_env(Some(String::new()), Some(PathBuf::from("/home/user")));

        assert_eq!(path, PathBuf::from("/home/user/.local/share/command-bridge"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_home_local_share() {
        let path = data_dir_with_env(None, Some(PathBuf::from("/home/user")));

        assert_eq!(path, PathBuf::from("/home/user/.local/share/command-bridge"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_current_dir_when_no_dirs_available() {
        let path = data_dir_with_env(None, None);
        assert_eq!(path, PathBuf::from("./command-bridge"));
    }

    #[test]
    fn default_api_endpoint_points_at_local_command_route() {
        assert_eq!(default_api_endpoint(), "http://127.0.0.1:4100/api/command");
    }
}
