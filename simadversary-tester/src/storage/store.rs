use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use simadversary_game::record::sort_newest_first;
use simadversary_game::{MemoryPathStore, PathStore, SessionRecord};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("record on line {line} of {} is malformed: {source}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Path logs appended to a JSON Lines file, one record per line.
#[derive(Debug)]
pub struct JsonFilePathStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFilePathStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl PathStore for JsonFilePathStore {
    type Error = StoreError;

    fn save_path(&self, record: &SessionRecord) -> Result<(), Self::Error> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| self.io_error(err))?;
        file.write_all(line.as_bytes())
            .map_err(|err| self.io_error(err))
    }

    fn list_paths(&self) -> Result<Vec<SessionRecord>, Self::Error> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(self.io_error(err)),
        };
        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| self.io_error(err))?;
            if line.trim().is_empty() {
                continue;
            }
            let record =
                serde_json::from_str(&line).map_err(|source| StoreError::Malformed {
                    path: self.path.clone(),
                    line: index + 1,
                    source,
                })?;
            records.push(record);
        }
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn clear_paths(&self) -> Result<(), Self::Error> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(self.io_error(err)),
            _ => Ok(()),
        }
    }
}

/// Store selected on the command line: in memory unless a path is given.
#[derive(Debug)]
pub enum TesterStore {
    Memory(MemoryPathStore),
    File(JsonFilePathStore),
}

impl TesterStore {
    pub fn from_path(path: Option<PathBuf>) -> Self {
        path.map_or_else(
            || Self::Memory(MemoryPathStore::new()),
            |path| Self::File(JsonFilePathStore::new(path)),
        )
    }

    #[must_use]
    pub fn location(&self) -> Option<&Path> {
        match self {
            Self::Memory(_) => None,
            Self::File(store) => Some(store.path()),
        }
    }
}

impl PathStore for TesterStore {
    type Error = StoreError;

    fn save_path(&self, record: &SessionRecord) -> Result<(), Self::Error> {
        match self {
            Self::Memory(store) => match store.save_path(record) {
                Ok(()) => Ok(()),
                Err(never) => match never {},
            },
            Self::File(store) => store.save_path(record),
        }
    }

    fn list_paths(&self) -> Result<Vec<SessionRecord>, Self::Error> {
        match self {
            Self::Memory(store) => match store.list_paths() {
                Ok(records) => Ok(records),
                Err(never) => match never {},
            },
            Self::File(store) => store.list_paths(),
        }
    }

    fn clear_paths(&self) -> Result<(), Self::Error> {
        match self {
            Self::Memory(store) => match store.clear_paths() {
                Ok(()) => Ok(()),
                Err(never) => match never {},
            },
            Self::File(store) => store.clear_paths(),
        }
    }
}
