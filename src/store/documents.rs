//! JSON document repository over a [`KeyValueStore`].

use tracing::debug;

use crate::fault::Fault;

use super::{Document, KeyValueStore, StoreError};

/// Persists [`Document`]s as JSON under `{prefix}/{id}{extension}`.
#[derive(Clone, Debug)]
pub struct DocumentStore<S> {
    store: S,
    extension: String,
}

impl<S: KeyValueStore> DocumentStore<S> {
    /// Wraps `store`, naming documents with `extension` (for example
    /// `.json`).
    #[must_use]
    pub fn new(store: S, extension: impl Into<String>) -> Self {
        Self {
            store,
            extension: extension.into(),
        }
    }

    /// Borrows the underlying store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.store
    }

    /// Key a document of type `T` with `id` is stored under.
    #[must_use]
    pub fn key_for<T: Document>(&self, id: &str) -> String {
        format!("{}/{id}{}", T::PREFIX, self.extension)
    }

    /// Loads one document.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::ResourceNotFound`] when no document exists and
    /// [`Fault::Store`] when it cannot be read or decoded.
    pub async fn load<T: Document>(&self, id: &str) -> Result<T, Fault> {
        let key = self.key_for::<T>(id);
        let bytes = self
            .store
            .get(&key)
            .await
            .map_err(|err| Fault::store(id, &err))?
            .ok_or_else(|| Fault::ResourceNotFound {
                entity_id: id.to_owned(),
                resource: String::from(T::PREFIX),
            })?;
        serde_json::from_slice(&bytes).map_err(|err| {
            Fault::store(
                id,
                &StoreError::Codec {
                    key,
                    message: err.to_string(),
                },
            )
        })
    }

    /// Writes one document, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::Store`] when encoding or writing fails.
    pub async fn save<T: Document>(&self, document: &T) -> Result<(), Fault> {
        let id = document.document_id();
        let key = self.key_for::<T>(id);
        let bytes = serde_json::to_vec_pretty(document).map_err(|err| {
            Fault::store(
                id,
                &StoreError::Codec {
                    key: key.clone(),
                    message: err.to_string(),
                },
            )
        })?;
        self.store
            .put(&key, bytes)
            .await
            .map_err(|err| Fault::store(id, &err))?;
        debug!(key = %key, "document saved");
        Ok(())
    }

    /// Removes one document. Removing an absent document succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::Store`] when the store fails.
    pub async fn remove<T: Document>(&self, id: &str) -> Result<(), Fault> {
        let key = self.key_for::<T>(id);
        self.store
            .delete(&key)
            .await
            .map_err(|err| Fault::store(id, &err))?;
        debug!(key = %key, "document removed");
        Ok(())
    }

    /// Lists the ids of every stored document of type `T`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::Store`] when the store fails.
    pub async fn list_ids<T: Document>(&self) -> Result<Vec<String>, Fault> {
        let prefix = format!("{}/", T::PREFIX);
        let keys = self
            .store
            .list_keys(&prefix)
            .await
            .map_err(|err| Fault::store(T::PREFIX, &err))?;
        let mut ids: Vec<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.strip_suffix(self.extension.as_str()))
            .filter(|id| !id.is_empty() && !id.contains('/'))
            .map(str::to_owned)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
