use std::fs;
use std::path::Path;

use anyhow::Context;
use nas_archive::ArchiveConfig;
use nas_bitpreservation::PreservationConfig;
use nas_index::IndexSettings;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything the `nas` binary reads from its settings file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub archive: ArchiveConfig,
    pub index: IndexSettings,
    pub preservation: PreservationConfig,
}

impl Settings {
    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings = toml::from_str(&text)
            .with_context(|| format!("parsing settings in {}", path.display()))?;
        debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nas.toml");
        fs::write(
            &path,
            "[index]\nmax_threads = 2\ncheck_interval = 250\n\n[preservation]\nwork_dir = \"/var/nas/work\"\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.index.max_threads, 2);
        assert_eq!(settings.index.check_interval, Duration::from_millis(250));
        assert_eq!(settings.index.merge_threshold, IndexSettings::default().merge_threshold);
        assert_eq!(settings.preservation.work_dir, Path::new("/var/nas/work"));
        assert_eq!(settings.archive, ArchiveConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nas.toml");
        fs::write(&path, "[index\n").unwrap();
        let err = Settings::load(&path).unwrap_err();
        assert!(err.to_string().contains("parsing settings"));
    }
}
