//! Directory-backed store using capability-scoped file access.

use std::io;
use std::sync::Arc;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use super::{KeyValueStore, StoreError, StoreFuture};
use crate::config::FleetConfig;

/// [`KeyValueStore`] that maps each key onto a file below a root directory.
///
/// Keys are `/`-separated relative paths. All access goes through a
/// capability handle on the root, so no key can reach outside it.
#[derive(Clone, Debug)]
pub struct FsStore {
    root: Arc<Dir>,
    root_path: Utf8PathBuf,
}

impl FsStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be created or
    /// opened.
    pub fn open(root: impl AsRef<Utf8Path>) -> Result<Self, StoreError> {
        let root_path = root.as_ref().to_path_buf();
        let open_error = |err: io::Error| StoreError::Io {
            key: root_path.to_string(),
            message: err.to_string(),
        };
        Dir::create_ambient_dir_all(&root_path, ambient_authority()).map_err(open_error)?;
        let dir = Dir::open_ambient_dir(&root_path, ambient_authority()).map_err(open_error)?;
        Ok(Self {
            root: Arc::new(dir),
            root_path,
        })
    }

    /// Opens the store at the configured `store_root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be created or
    /// opened.
    pub fn from_config(config: &FleetConfig) -> Result<Self, StoreError> {
        Self::open(config.store_root.as_str())
    }

    /// Root directory on disk.
    #[must_use]
    pub fn root_path(&self) -> &Utf8Path {
        &self.root_path
    }

    async fn blocking<T, F>(&self, key: &str, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Dir) -> Result<T, StoreError> + Send + 'static,
    {
        let root = Arc::clone(&self.root);
        tokio::task::spawn_blocking(move || work(&root))
            .await
            .map_err(|err| StoreError::Io {
                key: key.to_owned(),
                message: err.to_string(),
            })?
    }
}

fn validate_key(key: &str) -> Result<Utf8PathBuf, StoreError> {
    let path = Utf8Path::new(key);
    let is_plain = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_)));
    if !is_plain {
        return Err(StoreError::InvalidKey {
            key: key.to_owned(),
            message: String::from("keys must be relative paths without `.` or `..`"),
        });
    }
    Ok(path.to_path_buf())
}

fn io_error(key: &str, err: &io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_owned(),
        message: err.to_string(),
    }
}

fn collect_keys(dir: &Dir, base: &str, keys: &mut Vec<String>) -> io::Result<()> {
    for entry in dir.entries()? {
        let entry = entry?;
        let name = entry.file_name()?;
        let key = if base.is_empty() {
            name
        } else {
            format!("{base}/{name}")
        };
        if entry.file_type()?.is_dir() {
            collect_keys(&entry.open_dir()?, &key, keys)?;
        } else {
            keys.push(key);
        }
    }
    Ok(())
}

impl KeyValueStore for FsStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let path = validate_key(key)?;
            let owned = key.to_owned();
            self.blocking(key, move |root| match root.read(&path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(io_error(&owned, &err)),
            })
            .await
        })
    }

    fn put<'a>(&'a self, key: &'a str, value: Vec<u8>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = validate_key(key)?;
            let owned = key.to_owned();
            self.blocking(key, move |root| {
                if let Some(parent) = path.parent()
                    && !parent.as_str().is_empty()
                {
                    root.create_dir_all(parent)
                        .map_err(|err| io_error(&owned, &err))?;
                }
                root.write(&path, value)
                    .map_err(|err| io_error(&owned, &err))
            })
            .await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = validate_key(key)?;
            let owned = key.to_owned();
            self.blocking(key, move |root| match root.remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(io_error(&owned, &err)),
            })
            .await
        })
    }

    fn list_keys<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let owned = prefix.to_owned();
            let mut keys = self
                .blocking(prefix, move |root| {
                    let mut keys = Vec::new();
                    collect_keys(root, "", &mut keys).map_err(|err| io_error(&owned, &err))?;
                    Ok(keys)
                })
                .await?;
            keys.retain(|key| key.starts_with(prefix));
            Ok(keys)
        })
    }
}
