use std::collections::HashMap;
use std::sync::Arc;

use sketchd_common::descriptor::{Family, Info};
use sketchd_common::error::SketchError;
use sketchd_common::estimator::cml::{self, CountMinLog};
use sketchd_common::estimator::Estimator;
use sketchd_storage as storage;

use crate::wrapper::Sketch;

/// Cml binds the Count-Min-Log estimator to a descriptor and the data
/// store: the frequency family. The only family with delete semantics.
pub struct Cml {
    info: Info,
    estimator: CountMinLog,
    store: Arc<storage::Manager>,
}

impl Cml {
    /// new constructs an empty sketch from the descriptor properties. Never
    /// touches the data store.
    pub fn new(info: Info, store: Arc<storage::Manager>) -> Result<Self, SketchError> {
        let capacity = match info.property("capacity") {
            Some(c) => c as u64,
            None => cml::DEFAULT_CAPACITY,
        };
        let error_rate = info.property("errorRate").unwrap_or(cml::DEFAULT_ERROR_RATE);
        let confidence = info.property("confidence").unwrap_or(cml::DEFAULT_CONFIDENCE);

        let estimator = CountMinLog::new(capacity, error_rate, confidence)
            .map_err(|e| SketchError::Construction(info.id.clone(), e.to_string()))?;

        Ok(Self {
            info,
            estimator,
            store,
        })
    }

    /// from_data rebuilds the sketch from its persisted state blob.
    pub async fn from_data(info: Info, store: Arc<storage::Manager>) -> Result<Self, SketchError> {
        let data = store
            .load_data(&info.id, 0, 0)
            .await
            .map_err(SketchError::storage)?;
        let estimator = CountMinLog::decode(&data)
            .map_err(|e| SketchError::Construction(info.id.clone(), e.to_string()))?;

        Ok(Self {
            info,
            estimator,
            store,
        })
    }
}

#[async_trait]
impl Sketch for Cml {
    fn family(&self) -> Family {
        Family::Frequency
    }

    fn info(&self) -> &Info {
        &self.info
    }

    async fn add_multiple(&mut self, values: &[Vec<u8>]) -> Result<(), SketchError> {
        if values.is_empty() {
            return Ok(());
        }

        for v in values {
            self.estimator.increase(v);
        }
        self.info.add_to_state("additions", values.len() as u64);
        self.save().await
    }

    async fn remove_multiple(&mut self, values: &[Vec<u8>]) -> Result<(), SketchError> {
        if values.is_empty() {
            return Ok(());
        }

        for v in values {
            self.estimator.decrease(v);
        }
        self.info.add_to_state("removals", values.len() as u64);
        self.save().await
    }

    fn frequency(&self, values: &[Vec<u8>]) -> Result<HashMap<String, u64>, SketchError> {
        let mut freqs = HashMap::with_capacity(values.len());
        for v in values {
            freqs.insert(
                String::from_utf8_lossy(v).into_owned(),
                self.estimator.frequency(v),
            );
        }
        Ok(freqs)
    }

    async fn save(&mut self) -> Result<(), SketchError> {
        let blob = self.estimator.encode();
        self.store
            .save_data(&self.info.id, &blob)
            .await
            .map_err(SketchError::storage)?;

        let record = serde_json::to_vec(&self.info).map_err(SketchError::serialization)?;
        self.store
            .save_info(&self.info.id, &record)
            .await
            .map_err(SketchError::storage)
    }
}
