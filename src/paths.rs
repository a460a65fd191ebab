//! XDG-compliant state file location.
//!
//! The daemon publishes its snapshot to `$XDG_STATE_HOME/fern/obs-state.json`
//! (falling back to `~/.local/state/fern/` when unset). The consuming shell
//! watches that single file; nothing else is shared between processes.

use std::path::PathBuf;

/// Returns the state directory (`~/.local/state/fern/`).
#[must_use]
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|p| p.join("fern"))
        .unwrap_or_else(|| PathBuf::from(".local/state/fern"))
}

/// Returns the path to the published OBS state file.
#[must_use]
pub fn state_file() -> PathBuf {
    state_dir().join("obs-state.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_dir_ends_with_fern() {
        assert!(state_dir().ends_with("fern"));
    }

    #[test]
    fn state_file_name() {
        let path = state_file();
        assert!(path.to_string_lossy().ends_with("obs-state.json"));
        assert!(path.starts_with(state_dir()));
    }
}
