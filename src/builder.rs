//! Builder Module
//!
//! Fluent Builder APIで`ProcessingConfig`を構築し、
//! 解析 → 圧縮 → 整形の3ステージを`Pipeline`として実行する。

use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::advisor::RuleAdvisor;
use crate::api::{CompressionIntensity, TaskType};
use crate::compression::CompressionEngine;
use crate::error::XlsxDigestError;
use crate::formatter::{ContextFormatter, FormatRequest};
use crate::parser::{SheetProfiler, WorkbookSource};
use crate::security::SecurityConfig;
use crate::stage::Stage;
use crate::types::FormattedContext;

/// 処理設定
///
/// リクエストごとに1度だけ構築され、以降は読み取り専用です。
/// `ProcessingConfigBuilder`またはJSON（`ProcessingConfig::from_json`）から生成します。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// 圧縮強度
    compression_intensity: CompressionIntensity,

    /// 下流タスクの種別
    task_type: TaskType,

    /// 出力の最大文字数（0の場合は空文字列）
    max_output_length: usize,

    /// 常に削除する列
    exclude_columns: BTreeSet<String>,

    /// 処理対象のシート（空の場合はすべて）
    include_sheets: Vec<String>,

    /// 赤字指標で追跡する値
    anomaly_entity: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            compression_intensity: CompressionIntensity::Medium,
            task_type: TaskType::Analysis,
            max_output_length: 2000,
            exclude_columns: BTreeSet::new(),
            include_sheets: Vec::new(),
            anomaly_entity: "Product C".to_string(),
        }
    }
}

impl ProcessingConfig {
    /// JSONから設定を読み込む
    ///
    /// 省略した項目はデフォルト値になり、未知の圧縮強度・タスク種別は
    /// それぞれのデフォルトにフォールバックします。
    ///
    /// ```rust
    /// use xlsxdigest::{CompressionIntensity, ProcessingConfig};
    ///
    /// let config = ProcessingConfig::from_json(
    ///     r#"{"compression_intensity": "invalid_value", "max_output_length": 500}"#,
    /// ).unwrap();
    /// assert_eq!(config.compression_intensity(), CompressionIntensity::Medium);
    /// assert_eq!(config.max_output_length(), 500);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, XlsxDigestError> {
        let config: ProcessingConfig = serde_json::from_str(json)
            .map_err(|e| XlsxDigestError::Config(format!("Invalid configuration JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn compression_intensity(&self) -> CompressionIntensity {
        self.compression_intensity
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn max_output_length(&self) -> usize {
        self.max_output_length
    }

    pub fn exclude_columns(&self) -> &BTreeSet<String> {
        &self.exclude_columns
    }

    pub fn include_sheets(&self) -> &[String] {
        &self.include_sheets
    }

    pub fn anomaly_entity(&self) -> &str {
        &self.anomaly_entity
    }

    fn validate(&self) -> Result<(), XlsxDigestError> {
        if self.include_sheets.iter().any(|name| name.is_empty()) {
            return Err(XlsxDigestError::Config(
                "include_sheets must not contain an empty sheet name".to_string(),
            ));
        }
        if self.exclude_columns.iter().any(|name| name.is_empty()) {
            return Err(XlsxDigestError::Config(
                "exclude_columns must not contain an empty column name".to_string(),
            ));
        }
        if self.anomaly_entity.trim().is_empty() {
            return Err(XlsxDigestError::Config(
                "anomaly_entity must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fluent Builder APIを提供する構造体
///
/// すべての設定項目にデフォルト値が設定されており、必要な設定のみをオーバーライドできます。
///
/// # 使用例
///
/// ```rust
/// use xlsxdigest::{CompressionIntensity, ProcessingConfigBuilder, TaskType};
///
/// # fn main() -> Result<(), xlsxdigest::XlsxDigestError> {
/// let config = ProcessingConfigBuilder::new()
///     .with_compression_intensity(CompressionIntensity::High)
///     .with_task_type(TaskType::Summary)
///     .with_max_output_length(800)
///     .build()?;
/// assert_eq!(config.max_output_length(), 800);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ProcessingConfigBuilder {
    config: ProcessingConfig,
}

impl ProcessingConfigBuilder {
    /// デフォルト設定を持つビルダーを生成する
    ///
    /// # デフォルト設定
    ///
    /// - 圧縮強度: medium
    /// - タスク種別: analysis
    /// - 最大文字数: 2000
    /// - 除外列・対象シート: なし（すべてのシート）
    /// - 追跡対象: `Product C`
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression_intensity(mut self, intensity: CompressionIntensity) -> Self {
        self.config.compression_intensity = intensity;
        self
    }

    pub fn with_task_type(mut self, task: TaskType) -> Self {
        self.config.task_type = task;
        self
    }

    /// 出力の最大文字数を指定する
    ///
    /// 3未満の値では省略記号を付けずに切り詰めます。
    pub fn with_max_output_length(mut self, max_chars: usize) -> Self {
        self.config.max_output_length = max_chars;
        self
    }

    /// すべての圧縮強度で削除する列を指定する
    pub fn with_exclude_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.exclude_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// 処理対象のシートを指定する
    ///
    /// ワークブックに存在しない名前は解析時に無視されます。
    pub fn with_include_sheets<I, S>(mut self, sheets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.include_sheets = sheets.into_iter().map(Into::into).collect();
        self
    }

    /// 赤字指標で追跡する値を指定する
    pub fn with_anomaly_entity(mut self, entity: impl Into<String>) -> Self {
        self.config.anomaly_entity = entity.into();
        self
    }

    /// 設定を検証し、`ProcessingConfig`を生成する
    ///
    /// # 発生し得るエラー
    ///
    /// * `XlsxDigestError::Config(String)`
    ///   * 空のシート名・列名が含まれている
    ///   * 追跡対象が空
    pub fn build(self) -> Result<ProcessingConfig, XlsxDigestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// パイプラインの実行結果
///
/// JSONでは`status`フィールドで区別されます:
///
/// ```json
/// {"status":"success","formatted_content":"Task: ...","length":42}
/// {"status":"error","message":"Failed to parse Excel file: ..."}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PipelineOutcome {
    Success {
        formatted_content: String,
        length: usize,
    },
    Error {
        message: String,
    },
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success { .. })
    }

    /// JSON文字列に変換
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<Result<FormattedContext, XlsxDigestError>> for PipelineOutcome {
    fn from(result: Result<FormattedContext, XlsxDigestError>) -> Self {
        match result {
            Ok(context) => PipelineOutcome::Success {
                formatted_content: context.content,
                length: context.length,
            },
            Err(err) => PipelineOutcome::Error {
                message: err.to_string(),
            },
        }
    }
}

/// 処理のファサード
///
/// 解析 → 圧縮 → 整形を固定順序で実行し、最初に失敗したステージで停止します。
/// 共有される可変状態を持たないため、アドバイザーが`Send + Sync`であれば
/// 複数のスレッドから同時に使用できます。
///
/// # 使用例
///
/// ```rust,no_run
/// use std::fs::File;
/// use xlsxdigest::{Pipeline, ProcessingConfigBuilder, TaskType};
///
/// # fn main() -> Result<(), xlsxdigest::XlsxDigestError> {
/// let config = ProcessingConfigBuilder::new()
///     .with_task_type(TaskType::Analysis)
///     .build()?;
/// let pipeline = Pipeline::new(config);
///
/// let input = File::open("sample_data.xlsx")?;
/// let context = pipeline.run(input, "Analyze profit trends and anomalies", None)?;
/// println!("{}", context.content);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    config: ProcessingConfig,
    advisor: Option<Box<dyn RuleAdvisor>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("advisor", &self.advisor.is_some())
            .finish()
    }
}

impl Pipeline {
    /// アドバイザーなしのパイプラインを生成
    pub fn new(config: ProcessingConfig) -> Self {
        Self {
            config,
            advisor: None,
        }
    }

    /// 圧縮ステージで使用するアドバイザーを設定
    pub fn with_advisor(mut self, advisor: impl RuleAdvisor + 'static) -> Self {
        self.advisor = Some(Box::new(advisor));
        self
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// パイプラインを実行
    ///
    /// # 引数
    ///
    /// * `input` - ワークブックのリーダー
    /// * `task_description` - タスクの説明（出力の先頭行になる）
    /// * `credentials` - 暗号化されたワークブックのパスワード
    ///
    /// # 処理フロー
    ///
    /// 1. 入力をメモリに読み込む（上限を超える分は読まない）
    /// 2. SheetProfilerで解析
    /// 3. CompressionEngineで圧縮
    /// 4. ContextFormatterで整形
    pub fn run<R: Read>(
        &self,
        input: R,
        task_description: &str,
        credentials: Option<&str>,
    ) -> Result<FormattedContext, XlsxDigestError> {
        // 1. 入力の読み込み（上限 + 1バイトまで読み、サイズ超過は解析ステージで検出）
        let limit = SecurityConfig::default().max_input_file_size;
        let mut bytes = Vec::new();
        input.take(limit.saturating_add(1)).read_to_end(&mut bytes)?;

        // 2. 解析
        let source = WorkbookSource {
            bytes,
            credentials: credentials.map(str::to_string),
        };
        let parsed = SheetProfiler::new(&self.config).execute(source)?;

        // 3. 圧縮
        let mut engine = CompressionEngine::new(&self.config);
        if let Some(advisor) = self.advisor.as_deref() {
            engine = engine.with_advisor(advisor);
        }
        let sheets = engine.execute(parsed)?;

        // 4. 整形
        let context = ContextFormatter::new(&self.config).execute(FormatRequest {
            sheets,
            task_description: task_description.to_string(),
        })?;

        info!(length = context.length, "Pipeline completed");
        Ok(context)
    }

    /// パイプラインを実行し、結果をタグ付きの`PipelineOutcome`として返す
    pub fn process<R: Read>(
        &self,
        input: R,
        task_description: &str,
        credentials: Option<&str>,
    ) -> PipelineOutcome {
        let result = self.run(input, task_description, credentials);
        if let Err(err) = &result {
            warn!(error = %err, "Pipeline failed");
        }
        result.into()
    }

    /// ファイルパスを指定してパイプラインを実行
    pub fn process_path<P: AsRef<Path>>(
        &self,
        path: P,
        task_description: &str,
        credentials: Option<&str>,
    ) -> PipelineOutcome {
        match File::open(path.as_ref()) {
            Ok(file) => self.process(file, task_description, credentials),
            Err(err) => {
                let err = XlsxDigestError::from(err);
                warn!(path = %path.as_ref().display(), error = %err, "Failed to open workbook");
                PipelineOutcome::Error {
                    message: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ProcessingConfigBuilder::new().build().unwrap();
        assert_eq!(config, ProcessingConfig::default());
        assert_eq!(config.compression_intensity(), CompressionIntensity::Medium);
        assert_eq!(config.task_type(), TaskType::Analysis);
        assert_eq!(config.max_output_length(), 2000);
        assert!(config.exclude_columns().is_empty());
        assert!(config.include_sheets().is_empty());
        assert_eq!(config.anomaly_entity(), "Product C");
    }

    #[test]
    fn test_builder_method_chaining() {
        let config = ProcessingConfigBuilder::new()
            .with_compression_intensity(CompressionIntensity::Low)
            .with_task_type(TaskType::Inference)
            .with_max_output_length(0)
            .with_exclude_columns(["Notes", "Notes"])
            .with_include_sheets(["Sales_Data"])
            .with_anomaly_entity("Product X")
            .build()
            .unwrap();

        assert_eq!(config.compression_intensity(), CompressionIntensity::Low);
        assert_eq!(config.task_type(), TaskType::Inference);
        assert_eq!(config.max_output_length(), 0);
        assert_eq!(config.exclude_columns().len(), 1);
        assert_eq!(config.include_sheets(), ["Sales_Data".to_string()]);
        assert_eq!(config.anomaly_entity(), "Product X");
    }

    #[test]
    fn test_build_rejects_empty_sheet_name() {
        let result = ProcessingConfigBuilder::new()
            .with_include_sheets(vec![String::new()])
            .build();
        match result {
            Err(XlsxDigestError::Config(msg)) => assert!(msg.contains("include_sheets")),
            _ => panic!("Expected Config error"),
        }
    }

    #[test]
    fn test_build_rejects_empty_entity() {
        let result = ProcessingConfigBuilder::new().with_anomaly_entity(" ").build();
        assert!(matches!(result, Err(XlsxDigestError::Config(_))));
    }

    #[test]
    fn test_from_json_is_lenient_about_enums() {
        let config = ProcessingConfig::from_json(
            r#"{"compression_intensity": "extreme", "task_type": "SUMMARY", "exclude_columns": ["Id"]}"#,
        )
        .unwrap();
        assert_eq!(config.compression_intensity(), CompressionIntensity::Medium);
        assert_eq!(config.task_type(), TaskType::Summary);
        assert!(config.exclude_columns().contains("Id"));
        assert_eq!(config.max_output_length(), 2000);
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        assert!(matches!(
            ProcessingConfig::from_json("{not json"),
            Err(XlsxDigestError::Config(_))
        ));
        assert!(matches!(
            ProcessingConfig::from_json(r#"{"max_output_length": -1}"#),
            Err(XlsxDigestError::Config(_))
        ));
        assert!(matches!(
            ProcessingConfig::from_json(r#"{"anomaly_entity": ""}"#),
            Err(XlsxDigestError::Config(_))
        ));
    }

    #[test]
    fn test_outcome_json_shape() {
        let success = PipelineOutcome::Success {
            formatted_content: "Task: t".to_string(),
            length: 7,
        };
        assert_eq!(
            success.to_json().unwrap(),
            r#"{"status":"success","formatted_content":"Task: t","length":7}"#
        );

        let error = PipelineOutcome::Error {
            message: "Failed to parse Excel file: bad".to_string(),
        };
        assert_eq!(
            error.to_json().unwrap(),
            r#"{"status":"error","message":"Failed to parse Excel file: bad"}"#
        );
        assert!(!error.is_success());
    }

    #[test]
    fn test_process_invalid_input_returns_error_outcome() {
        let pipeline = Pipeline::new(ProcessingConfig::default());
        let outcome = pipeline.process(std::io::Cursor::new(Vec::new()), "t", None);
        match outcome {
            PipelineOutcome::Error { message } => {
                assert!(message.starts_with("Failed to parse Excel file"));
            }
            _ => panic!("Expected error outcome"),
        }
    }

    #[test]
    fn test_process_path_missing_file() {
        let pipeline = Pipeline::new(ProcessingConfig::default());
        let outcome = pipeline.process_path("/nonexistent/workbook.xlsx", "t", None);
        match outcome {
            PipelineOutcome::Error { message } => assert!(message.starts_with("IO error")),
            _ => panic!("Expected error outcome"),
        }
    }

    #[test]
    fn test_pipeline_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Pipeline>();
    }
}
