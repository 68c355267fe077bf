use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use sketchd_common::descriptor::{Family, Info};
use sketchd_common::error::SketchError;

/// One entry of a top-k ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedItem {
    pub item: String,
    #[serde(rename = "estimatedCount")]
    pub count: u64,
}

/// QueryResult is the family-specific answer shape, passed through to the
/// caller verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    /// Cardinality estimate.
    Count(u64),
    /// Per-value frequency estimates.
    Frequencies(HashMap<String, u64>),
    /// Top-k ranking in descending order.
    Ranking(Vec<RankedItem>),
}

/// Sketch is the uniform capability every estimator family implements. The
/// catalog owns each instance exclusively and dispatches operations on it by
/// family tag.
///
/// Ingest persists the sketch's state no later than its return, so that the
/// persisted form always reflects completed batches.
#[async_trait]
pub trait Sketch: Send + Sync {
    /// family returns the estimator family tag.
    fn family(&self) -> Family;

    /// info returns the descriptor of the sketch.
    fn info(&self) -> &Info;

    /// add_multiple ingests a batch of values, equivalent to ingesting each
    /// value once in the given order, and saves the resulting state.
    async fn add_multiple(&mut self, values: &[Vec<u8>]) -> Result<(), SketchError>;

    /// remove_multiple removes a batch of values for families with delete
    /// semantics.
    async fn remove_multiple(&mut self, _values: &[Vec<u8>]) -> Result<(), SketchError> {
        Err(SketchError::Unsupported {
            family: self.family().as_str(),
            operation: "removals",
        })
    }

    /// count returns the cardinality estimate.
    fn count(&mut self) -> Result<u64, SketchError> {
        Err(SketchError::Unsupported {
            family: self.family().as_str(),
            operation: "counting",
        })
    }

    /// frequency returns the estimated frequency of each given value.
    fn frequency(&self, _values: &[Vec<u8>]) -> Result<HashMap<String, u64>, SketchError> {
        Err(SketchError::Unsupported {
            family: self.family().as_str(),
            operation: "frequencies",
        })
    }

    /// ranking returns the current heavy hitters in descending order.
    fn ranking(&self) -> Result<Vec<RankedItem>, SketchError> {
        Err(SketchError::Unsupported {
            family: self.family().as_str(),
            operation: "rankings",
        })
    }

    /// save persists the sketch state blob and the refreshed descriptor.
    async fn save(&mut self) -> Result<(), SketchError>;
}
