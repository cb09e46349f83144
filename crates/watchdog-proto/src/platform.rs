#[cfg(unix)]
use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR: &str = "stream-watchdog";

/// Resolve an XDG base directory: the variable when it holds an absolute
/// path, otherwise `fallback` under the home directory.
#[cfg(unix)]
fn xdg_dir(var: Option<OsString>, home: Option<PathBuf>, fallback: &[&str]) -> PathBuf {
    if let Some(dir) = var.map(PathBuf::from).filter(|p| p.is_absolute()) {
        return dir.join(APP_DIR);
    }
    let mut dir = home.unwrap_or_else(|| PathBuf::from("."));
    dir.extend(fallback);
    dir.join(APP_DIR)
}

pub fn data_dir() -> PathBuf {
    // macOS uses the XDG layout too, not Application Support.
    #[cfg(unix)]
    {
        xdg_dir(
            std::env::var_os("XDG_DATA_HOME"),
            dirs::home_dir(),
            &[".local", "share"],
        )
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        xdg_dir(
            std::env::var_os("XDG_CONFIG_HOME"),
            dirs::home_dir(),
            &[".config"],
        )
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn log_path() -> PathBuf {
    data_dir().join("watchdog.log")
}
