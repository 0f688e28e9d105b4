use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::storage::Compression;
use crate::world::generator::default_stage_names;
use crate::world::season::SeasonKind;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorldSettings {
    pub world_path: PathBuf,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub persistence: PersistenceSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub season: Option<SeasonKind>,
    #[serde(default)]
    pub spawn: SpawnSettings,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            world_path: PathBuf::from("world"),
            seed: None,
            storage: StorageSettings::default(),
            persistence: PersistenceSettings::default(),
            generation: GenerationSettings::default(),
            season: None,
            spawn: SpawnSettings::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageSettings {
    pub compression: Compression,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PersistenceSettings {
    pub flush_interval_ms: u64,
    /// Dirty chunks above this count switch the flusher to bursts.
    pub dirty_high_water: usize,
    pub flush_burst: usize,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            dirty_high_water: DEFAULT_DIRTY_HIGH_WATER,
            flush_burst: DEFAULT_FLUSH_BURST,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationSettings {
    pub stages: Vec<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            stages: default_stage_names(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpawnSettings {
    pub pin_radius: i32,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            pin_radius: DEFAULT_PIN_RADIUS,
        }
    }
}

/// Per-world data written next to the region files on first start.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LevelData {
    pub seed: u64,
    pub spawn: (i32, i32, i32),
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// `<config dir>/world.ron` for this application.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "chunkvault").map(|dirs| dirs.config_dir().join("world.ron"))
}

fn read_ron<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, SettingsError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    ron::from_str(&contents)
        .map(Some)
        .map_err(|e| SettingsError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn write_ron<T: Serialize>(path: &Path, value: &T) -> Result<(), SettingsError> {
    let serialized = ron::ser::to_string_pretty(value, Default::default()).map_err(|e| SettingsError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, serialized).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads settings, falling back to defaults when the file does not exist.
pub fn load_settings(path: &Path) -> Result<WorldSettings, SettingsError> {
    match read_ron(path)? {
        Some(settings) => {
            tracing::info!(path = %path.display(), "loaded world settings");
            Ok(settings)
        }
        None => {
            tracing::info!(path = %path.display(), "no settings file, using defaults");
            Ok(WorldSettings::default())
        }
    }
}

pub fn save_settings(path: &Path, settings: &WorldSettings) -> Result<(), SettingsError> {
    write_ron(path, settings)
}

/// Reads `level.ron`, creating it on first start. A seed in the settings
/// only applies to a brand new world.
pub fn load_or_create_level(world_path: &Path, seed: Option<u64>) -> Result<LevelData, SettingsError> {
    let path = world_path.join(LEVEL_FILE);
    if let Some(level) = read_ron::<LevelData>(&path)? {
        if seed.is_some_and(|s| s != level.seed) {
            tracing::warn!(stored = level.seed, "configured seed ignored for existing world");
        }
        return Ok(level);
    }
    let level = LevelData {
        seed: seed.unwrap_or_else(rand::random),
        spawn: (0, SEA_LEVEL + 2, 0),
    };
    write_ron(&path, &level)?;
    tracing::info!(seed = level.seed, "created new world");
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("absent.ron")).unwrap();
        assert_eq!(settings.persistence.flush_interval_ms, DEFAULT_FLUSH_INTERVAL_MS);
        assert_eq!(settings.storage.compression, Compression::Zlib);
        assert_eq!(settings.generation.stages, default_stage_names());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.ron");
        std::fs::write(&path, "(world_path: \"elsewhere\", seed: Some(7), season: Some(Winter))").unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.world_path, PathBuf::from("elsewhere"));
        assert_eq!(settings.seed, Some(7));
        assert_eq!(settings.season, Some(SeasonKind::Winter));
        assert_eq!(settings.spawn.pin_radius, DEFAULT_PIN_RADIUS);
    }

    #[test]
    fn test_settings_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("world.ron");
        let mut settings = WorldSettings::default();
        settings.storage.compression = Compression::Lz4;
        settings.persistence.flush_burst = 3;
        save_settings(&path, &settings).unwrap();
        let loaded = load_settings(&path).unwrap();
        assert_eq!(loaded.storage.compression, Compression::Lz4);
        assert_eq!(loaded.persistence.flush_burst, 3);
    }

    #[test]
    fn test_level_seed_is_sticky() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create_level(dir.path(), Some(42)).unwrap();
        assert_eq!(first.seed, 42);
        let second = load_or_create_level(dir.path(), Some(99)).unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.ron");
        std::fs::write(&path, "this is not ron (").unwrap();
        assert!(matches!(load_settings(&path), Err(SettingsError::Parse { .. })));
    }
}
