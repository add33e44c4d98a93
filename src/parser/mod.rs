//! Parser Module
//!
//! ワークブックの復号・解析とシートのプロファイリングを担当するモジュール。

mod decrypt;
pub(crate) mod profile;
mod workbook;

pub use profile::{detect_nulls, detect_outliers, infer_column_type};
pub use workbook::{SheetProfiler, WorkbookSource};
