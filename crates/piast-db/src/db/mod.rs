pub mod audit;
pub mod documents;
pub mod processing_log;
