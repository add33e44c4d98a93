//! xlsxdigest - Excel workbook profiling and compression for LLM context windows
//!
//! This crate reduces spreadsheet workbooks to a compact natural-language context
//! that fits a hard character budget. Processing runs as a fixed three-stage pipeline:
//!
//! 1. [`SheetProfiler`] parses the workbook (optionally password-protected) into typed
//!    tables and profiles each column (inferred type, null count, IQR outliers).
//! 2. [`CompressionEngine`] reduces each table according to the compression intensity
//!    and task type, optionally asking a [`RuleAdvisor`] for advisory text.
//! 3. [`ContextFormatter`] renders the reduced tables as indicator lines and truncates
//!    the result to `max_output_length` characters.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::fs::File;
//! use xlsxdigest::{Pipeline, ProcessingConfigBuilder, CompressionIntensity};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProcessingConfigBuilder::new()
//!         .with_compression_intensity(CompressionIntensity::Medium)
//!         .with_max_output_length(1000)
//!         .build()?;
//!
//!     let pipeline = Pipeline::new(config);
//!     let input = File::open("sample_data.xlsx")?;
//!     let context = pipeline.run(input, "Analyze profit trends and anomalies", None)?;
//!
//!     println!("{} ({} chars)", context.content, context.length);
//!     Ok(())
//! }
//! ```
//!
//! # Tagged Outcome
//!
//! ```rust,no_run
//! use xlsxdigest::{Pipeline, ProcessingConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Pipeline::new(ProcessingConfig::from_json(r#"{"task_type": "summary"}"#)?);
//! let outcome = pipeline.process_path("sample_data.xlsx", "Summarize regional sales", None);
//!
//! // {"status":"success","formatted_content":"...","length":...}
//! println!("{}", outcome.to_json()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Advisory Text
//!
//! ```rust,no_run
//! use xlsxdigest::{AdvisorConfig, HttpRuleAdvisor, Pipeline, ProcessingConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let advisor = HttpRuleAdvisor::new(AdvisorConfig::new("sk-..."))?;
//! let pipeline = Pipeline::new(ProcessingConfig::default()).with_advisor(advisor);
//! # Ok(())
//! # }
//! ```

mod advisor;
mod api;
mod builder;
mod compression;
mod error;
mod formatter;
mod parser;
mod security;
mod stage;
mod stats;
mod types;

// 公開API
pub use advisor::{
    compression_rules_request, AdvisorConfig, AdvisorError, CompletionRequest, RuleAdvisor,
    RULES_MAX_TOKENS, RULES_TEMPERATURE,
};
#[cfg(feature = "http-advisor")]
pub use advisor::HttpRuleAdvisor;
pub use api::{CompressionIntensity, TaskType};
pub use builder::{Pipeline, PipelineOutcome, ProcessingConfig, ProcessingConfigBuilder};
pub use compression::CompressionEngine;
pub use error::XlsxDigestError;
pub use formatter::{format_number, ContextFormatter, FormatRequest};
pub use parser::{detect_nulls, detect_outliers, infer_column_type, SheetProfiler, WorkbookSource};
pub use stage::Stage;
pub use types::{
    CellValue, ColumnProfile, ColumnSummary, CompressedSheet, FormattedContext, GroupAggregation,
    InferredType, ParsedWorkbook, ProfiledTable, Table,
};
