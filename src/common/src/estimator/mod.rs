pub mod cml;
pub mod hll;
pub mod topk;

/// Estimator is the interface shared by the sketch algorithms: streaming
/// ingest plus a stable binary form for persistence.
pub trait Estimator {
    /// Add adds a single value to the sketch.
    fn add(&mut self, v: &[u8]);

    /// Bytes estimates the memory footprint of the sketch, in bytes.
    fn bytes(&self) -> usize;

    /// Encode serializes the sketch into its persistent binary form.
    fn encode(&mut self) -> Vec<u8>;

    /// Decode rebuilds a sketch from its persistent binary form.
    fn decode(data: &[u8]) -> anyhow::Result<Self>
    where
        Self: Sized;
}
