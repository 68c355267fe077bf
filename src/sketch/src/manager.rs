use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use sketchd_common::config;
use sketchd_common::descriptor::{Family, Info, SketchKey};
use sketchd_common::error::SketchError;
use sketchd_storage as storage;

use crate::cml::Cml;
use crate::hllpp::HllPP;
use crate::topk::TopK;
use crate::wrapper::{QueryResult, Sketch};

#[derive(Default)]
struct Inner {
    sketches: HashMap<SketchKey, Box<dyn Sketch>>,
    info: HashMap<SketchKey, Info>,
}

/// Manager is the authoritative registry of live sketches. It enforces the
/// identity invariants, routes operations to the right estimator, and
/// mediates descriptor persistence.
///
/// Both maps live behind one lock; every operation runs its in-memory
/// mutation and the associated store calls inside that single critical
/// section, so operations on the same sketch are linearizable in commit
/// order.
pub struct Manager {
    store: Arc<storage::Manager>,
    max_key_size: usize,
    inner: RwLock<Inner>,
}

impl Manager {
    /// open builds a catalog over the given store and rehydrates every
    /// persisted sketch from its descriptor and state blob.
    ///
    /// Descriptors with an unknown family tag are logged and skipped; a
    /// descriptor that cannot be parsed, or a known tag whose state cannot
    /// be reconstructed, fails the whole startup.
    pub async fn open(store: Arc<storage::Manager>, max_key_size: usize) -> anyhow::Result<Self> {
        let mut inner = Inner::default();

        let records = store.load_all_info().await?;
        for (id, record) in records {
            let descriptor: Info = serde_json::from_slice(&record)
                .with_context(|| format!("unreadable descriptor {}", id))?;

            let family = match Family::from_str(&descriptor.family) {
                Ok(family) => family,
                Err(_) => {
                    warn!("invalid sketch type {}, skipping {}", descriptor.family, id);
                    continue;
                }
            };
            let name = id
                .strip_suffix(&format!(".{}", family))
                .with_context(|| format!("descriptor id {} does not match type {}", id, family))?;
            let key = SketchKey::new(name, family);

            let sketch = Self::reconstruct(&key, descriptor.clone(), store.clone())
                .await
                .with_context(|| format!("could not load sketch {}", id))?;
            inner.sketches.insert(key.clone(), sketch);
            inner.info.insert(key, descriptor);
        }

        if !inner.sketches.is_empty() {
            info!("rehydrated {} sketches", inner.sketches.len());
        }

        Ok(Self {
            store,
            max_key_size,
            inner: RwLock::new(inner),
        })
    }

    /// construct allocates an empty estimator for the family. No store IO.
    fn construct(
        key: &SketchKey,
        descriptor: Info,
        store: Arc<storage::Manager>,
    ) -> Result<Box<dyn Sketch>, SketchError> {
        Ok(match key.family {
            Family::Cardinality => Box::new(HllPP::new(descriptor, store)?),
            Family::Frequency => Box::new(Cml::new(descriptor, store)?),
            Family::TopK => Box::new(TopK::new(descriptor, store)?),
        })
    }

    /// reconstruct rebuilds an estimator from its persisted state blob.
    async fn reconstruct(
        key: &SketchKey,
        descriptor: Info,
        store: Arc<storage::Manager>,
    ) -> Result<Box<dyn Sketch>, SketchError> {
        Ok(match key.family {
            Family::Cardinality => Box::new(HllPP::from_data(descriptor, store).await?),
            Family::Frequency => Box::new(Cml::from_data(descriptor, store).await?),
            Family::TopK => Box::new(TopK::from_data(descriptor, store).await?),
        })
    }

    /// create registers a new sketch of the given family under name.
    pub async fn create(
        &self,
        name: &str,
        family: &str,
        properties: HashMap<String, f64>,
    ) -> Result<(), SketchError> {
        let family = Family::from_str(family)?;
        let key = SketchKey::new(name, family);
        let id = key.canonical_id();

        let mut inner = self.inner.write().await;

        if inner.info.contains_key(&key) {
            return Err(SketchError::AlreadyExists(
                name.to_string(),
                family.to_string(),
            ));
        }
        if id.len() > self.max_key_size {
            return Err(SketchError::IdTooLong {
                len: id.len(),
                max: self.max_key_size,
            });
        }

        let descriptor = Info::new(&key, properties);
        let sketch = Self::construct(&key, descriptor.clone(), self.store.clone())?;

        inner.sketches.insert(key.clone(), sketch);
        inner.info.insert(key.clone(), descriptor);

        // Flush the empty state and the descriptor after the in-memory
        // insertion. A persistence failure rolls the insertion back so an
        // interrupted create leaves no trace.
        if let Some(sketch) = inner.sketches.get_mut(&key) {
            if let Err(e) = sketch.save().await {
                inner.sketches.remove(&key);
                inner.info.remove(&key);
                let _ = self.store.delete_data(&id).await;
                let _ = self.store.delete_info(&id).await;
                return Err(e);
            }
        }

        info!("created sketch {}", key);
        Ok(())
    }

    /// delete removes a sketch from the catalog and both stores. In-memory
    /// removal comes first: even when a store call fails, the sketch is no
    /// longer reachable.
    pub async fn delete(&self, name: &str, family: &str) -> Result<(), SketchError> {
        let (key, id) = self.resolve(name, family)?;

        let mut inner = self.inner.write().await;

        if inner.sketches.remove(&key).is_none() {
            return Err(SketchError::NotFound(
                name.to_string(),
                family.to_string(),
            ));
        }
        inner.info.remove(&key);

        self.store
            .delete_info(&id)
            .await
            .map_err(SketchError::storage)?;
        self.store
            .delete_data(&id)
            .await
            .map_err(SketchError::storage)?;

        info!("deleted sketch {}", key);
        Ok(())
    }

    /// list enumerates the currently registered sketches. Order is
    /// unspecified.
    pub async fn list(&self) -> Vec<SketchKey> {
        let inner = self.inner.read().await;
        inner.sketches.keys().cloned().collect()
    }

    /// add ingests a batch of values into a sketch.
    pub async fn add(
        &self,
        name: &str,
        family: &str,
        values: Vec<String>,
    ) -> Result<(), SketchError> {
        let (key, _) = self.resolve(name, family)?;
        let values = into_bytes(values);

        let mut inner = self.inner.write().await;
        match inner.sketches.get_mut(&key) {
            Some(sketch) => sketch.add_multiple(&values).await,
            None => Err(SketchError::NotFound(
                name.to_string(),
                family.to_string(),
            )),
        }
    }

    /// remove deletes a batch of values from a sketch, for families that
    /// support removal.
    pub async fn remove(
        &self,
        name: &str,
        family: &str,
        values: Vec<String>,
    ) -> Result<(), SketchError> {
        let (key, _) = self.resolve(name, family)?;
        let values = into_bytes(values);

        let mut inner = self.inner.write().await;
        match inner.sketches.get_mut(&key) {
            Some(sketch) => sketch.remove_multiple(&values).await,
            None => Err(SketchError::NotFound(
                name.to_string(),
                family.to_string(),
            )),
        }
    }

    /// query computes the family-specific answer: a scalar count for
    /// cardinality, per-value estimates for frequency, the ranking for
    /// top-k (which ignores values).
    pub async fn query(
        &self,
        name: &str,
        family: &str,
        values: Vec<String>,
    ) -> Result<QueryResult, SketchError> {
        let (key, _) = self.resolve(name, family)?;
        let values = into_bytes(values);

        let mut inner = self.inner.write().await;
        let sketch = inner.sketches.get_mut(&key).ok_or_else(|| {
            SketchError::NotFound(name.to_string(), family.to_string())
        })?;

        match key.family {
            Family::Cardinality => Ok(QueryResult::Count(sketch.count()?)),
            Family::Frequency => Ok(QueryResult::Frequencies(sketch.frequency(&values)?)),
            Family::TopK => Ok(QueryResult::Ranking(sketch.ranking()?)),
        }
    }

    /// resolve parses the family tag and renders the storage key. Operations
    /// on sketches that could not exist report NotFound.
    fn resolve(&self, name: &str, family: &str) -> Result<(SketchKey, String), SketchError> {
        let family = Family::from_str(family)
            .map_err(|_| SketchError::NotFound(name.to_string(), family.to_string()))?;
        let key = SketchKey::new(name, family);
        let id = key.canonical_id();
        Ok((key, id))
    }
}

fn into_bytes(values: Vec<String>) -> Vec<Vec<u8>> {
    values.into_iter().map(String::into_bytes).collect()
}

lazy_static::lazy_static! {
    static ref MANAGER: Mutex<Option<Arc<Manager>>> = Mutex::new(None);
}

/// get returns the process-wide catalog, constructing and rehydrating it on
/// first call. Construction is serialized: at most one rehydration ever
/// runs.
pub async fn get() -> anyhow::Result<Arc<Manager>> {
    let mut guard = MANAGER.lock().await;
    if guard.is_none() {
        let settings = config::get()?;
        let store = storage::manager::get().await?;
        let manager = Manager::open(store, settings.max_key_size).await?;
        *guard = Some(Arc::new(manager));
    }
    Ok(guard.as_ref().unwrap().clone())
}

/// destroy drops the process-wide catalog. For tests.
pub async fn destroy() {
    *MANAGER.lock().await = None;
}
