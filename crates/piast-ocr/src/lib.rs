//! OCR invokers for the document pipeline.
//!
//! All model calls go through a shared AI-gateway client (OpenAI-compatible
//! chat completions). Three invokers cover the document classes: modern civil
//! records, archival records (Cyrillic/Gothic script), and passports. Each
//! validates the model's JSON into [`piast_core::models::ParsedExtraction`]
//! before anything crosses back into the pipeline.

pub mod archival;
pub mod error;
pub mod gateway;
pub mod invoker;
pub mod json;
pub mod modern;
pub mod passport;

pub use archival::ArchivalRecordInvoker;
pub use error::OcrError;
pub use gateway::GatewayClient;
pub use invoker::{InvokerSet, OcrInvoker};
pub use modern::ModernRecordInvoker;
pub use passport::PassportInvoker;
