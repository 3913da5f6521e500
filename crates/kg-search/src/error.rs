#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("fusion weight must be non-negative, got {0}")]
    InvalidWeight(f64),
}
