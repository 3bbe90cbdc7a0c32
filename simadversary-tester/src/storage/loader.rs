use serde::de::DeserializeOwned;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use simadversary_game::{
    BundleLoader, DataError, DataLoader, EventManifest, EventSetFile, ModeId, Step,
};

/// Scenario data laid out on disk:
/// `scenarios/<mode>/<step>.json`, `events/index.json` and `events/<set>`.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mode directories under `scenarios/`, sorted.
    #[must_use]
    pub fn modes(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.root.join("scenarios")) else {
            return Vec::new();
        };
        let mut modes: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        modes.sort();
        modes
    }

    fn read<T: DeserializeOwned>(
        &self,
        kind: &'static str,
        key: &str,
        relative: &Path,
    ) -> Result<T, DataError> {
        if !is_contained(relative) {
            return Err(DataError::NotFound {
                kind,
                key: key.to_string(),
            });
        }
        let path = self.root.join(relative);
        let text = fs::read_to_string(&path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => DataError::NotFound {
                kind,
                key: key.to_string(),
            },
            _ => DataError::Unreachable(format!("{}: {err}", path.display())),
        })?;
        log::debug!("loaded {kind} from {}", path.display());
        serde_json::from_str(&text).map_err(|source| DataError::Malformed {
            kind,
            key: key.to_string(),
            source,
        })
    }
}

/// Only plain relative segments; no parent hops or absolute paths.
fn is_contained(relative: &Path) -> bool {
    relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}

impl DataLoader for DirectoryLoader {
    type Error = DataError;

    fn load_step(&self, mode: &ModeId, step_id: &str) -> Result<Step, Self::Error> {
        let relative = Path::new("scenarios")
            .join(mode.as_str())
            .join(format!("{step_id}.json"));
        self.read("step", step_id, &relative)
    }

    fn load_event_manifest(&self) -> Result<EventManifest, Self::Error> {
        self.read("event manifest", "index.json", Path::new("events/index.json"))
    }

    fn load_event_set(&self, path: &str) -> Result<EventSetFile, Self::Error> {
        self.read("event set", path, &Path::new("events").join(path))
    }
}

/// Data source selected on the command line.
#[derive(Debug, Clone)]
pub enum TesterLoader {
    Embedded(BundleLoader),
    Directory(DirectoryLoader),
}

impl TesterLoader {
    #[must_use]
    pub fn from_dir(data_dir: Option<PathBuf>) -> Self {
        data_dir.map_or_else(
            || Self::Embedded(BundleLoader::embedded()),
            |dir| Self::Directory(DirectoryLoader::new(dir)),
        )
    }

    #[must_use]
    pub fn modes(&self) -> Vec<String> {
        match self {
            Self::Embedded(loader) => loader.modes(),
            Self::Directory(loader) => loader.modes(),
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Embedded(_) => "embedded bundle".to_string(),
            Self::Directory(loader) => loader.root().display().to_string(),
        }
    }
}

impl DataLoader for TesterLoader {
    type Error = DataError;

    fn load_step(&self, mode: &ModeId, step_id: &str) -> Result<Step, Self::Error> {
        match self {
            Self::Embedded(loader) => loader.load_step(mode, step_id),
            Self::Directory(loader) => loader.load_step(mode, step_id),
        }
    }

    fn load_event_manifest(&self) -> Result<EventManifest, Self::Error> {
        match self {
            Self::Embedded(loader) => loader.load_event_manifest(),
            Self::Directory(loader) => loader.load_event_manifest(),
        }
    }

    fn load_event_set(&self, path: &str) -> Result<EventSetFile, Self::Error> {
        match self {
            Self::Embedded(loader) => loader.load_event_set(path),
            Self::Directory(loader) => loader.load_event_set(path),
        }
    }
}
