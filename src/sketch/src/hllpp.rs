use std::sync::Arc;

use sketchd_common::descriptor::{Family, Info};
use sketchd_common::error::SketchError;
use sketchd_common::estimator::hll::{self, Plus};
use sketchd_common::estimator::Estimator;
use sketchd_storage as storage;

use crate::wrapper::Sketch;

/// HllPP binds the HyperLogLog++ estimator to a descriptor and the data
/// store: the cardinality family.
pub struct HllPP {
    info: Info,
    estimator: Plus,
    store: Arc<storage::Manager>,
}

impl HllPP {
    /// new constructs an empty sketch from the descriptor properties. Never
    /// touches the data store.
    pub fn new(info: Info, store: Arc<storage::Manager>) -> Result<Self, SketchError> {
        let precision = match info.property("precision") {
            Some(p) => p as u8,
            None => hll::DEFAULT_PRECISION,
        };
        let estimator = Plus::with_p(precision)
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
        let estimator = Plus::decode(&data)
            .map_err(|e| SketchError::Construction(info.id.clone(), e.to_string()))?;

        Ok(Self {
            info,
            estimator,
            store,
        })
    }
}

#[async_trait]
impl Sketch for HllPP {
    fn family(&self) -> Family {
        Family::Cardinality
    }

    fn info(&self) -> &Info {
        &self.info
    }

    async fn add_multiple(&mut self, values: &[Vec<u8>]) -> Result<(), SketchError> {
        if values.is_empty() {
            return Ok(());
        }

        for v in values {
            self.estimator.add(v);
        }
        self.info.add_to_state("additions", values.len() as u64);
        self.save().await
    }

    fn count(&mut self) -> Result<u64, SketchError> {
        Ok(self.estimator.count())
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
