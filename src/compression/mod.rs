//! Compression Module
//!
//! プロファイル済みテーブルを圧縮強度とタスク種別に応じて縮約する。
//!
//! 縮約結果はアドバイザーの有無や応答に依存せず、同じ入力と設定に対して常に同じです。
//! アドバイザーの出力は`CompressedSheet::compression_rules`に参考情報として格納されるのみです。

mod aggregate;
mod describe;

use std::collections::HashSet;

use tracing::{debug, info};

use crate::advisor::{compression_rules_request, RuleAdvisor};
use crate::api::{CompressionIntensity, TaskType};
use crate::builder::ProcessingConfig;
use crate::error::XlsxDigestError;
use crate::parser::profile::profile_table;
use crate::stage::Stage;
use crate::stats;
use crate::types::{
    CellValue, ColumnProfile, ColumnSummary, CompressedSheet, InferredType, ParsedWorkbook,
    ProfiledTable, Table,
};

/// 列を残すために必要な非空値の割合
const MIN_NON_NULL_RATIO: f64 = 0.9;

/// 圧縮エンジン
///
/// # 使用例
///
/// ```rust,no_run
/// use xlsxdigest::{CompressionEngine, CompressionIntensity, ProcessingConfigBuilder, SheetProfiler};
///
/// # fn main() -> Result<(), xlsxdigest::XlsxDigestError> {
/// let config = ProcessingConfigBuilder::new()
///     .with_compression_intensity(CompressionIntensity::High)
///     .build()?;
/// let bytes = std::fs::read("sample_data.xlsx")?;
/// let parsed = SheetProfiler::new(&config).parse(&bytes, None)?;
/// let compressed = CompressionEngine::new(&config).compress_workbook(&parsed)?;
/// # Ok(())
/// # }
/// ```
pub struct CompressionEngine<'a> {
    config: &'a ProcessingConfig,
    advisor: Option<&'a dyn RuleAdvisor>,
}

impl<'a> CompressionEngine<'a> {
    /// アドバイザーなしのエンジンを生成
    pub fn new(config: &'a ProcessingConfig) -> Self {
        Self {
            config,
            advisor: None,
        }
    }

    /// シートごとに参考テキストを取得するアドバイザーを設定
    pub fn with_advisor(mut self, advisor: &'a dyn RuleAdvisor) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// 1シートを圧縮
    ///
    /// # 処理フロー
    ///
    /// 1. 入力の検証（不正なテーブルは`Compression`エラー）
    /// 2. `exclude_columns`の列を削除
    /// 3. low: 非空値が`0.9 × 行数`未満の列を削除
    /// 4. medium: 残った列の要約統計量を付与
    /// 5. high: タスク種別に応じた集約（`summary`のみ）
    /// 6. アドバイザーが設定されていれば参考テキストを取得
    ///
    /// # 戻り値
    ///
    /// * `Ok(CompressedSheet)` - 縮約済みのシート
    /// * `Err(XlsxDigestError::Compression)` - 列定義とレコードが一致しない場合など
    pub fn compress(&self, profiled: &ProfiledTable) -> Result<CompressedSheet, XlsxDigestError> {
        validate_profiled(profiled)?;

        let table = &profiled.table;
        let intensity = self.config.compression_intensity();
        let task = self.config.task_type();

        // 1. 除外列と欠損の多い列を落とす
        let kept: Vec<usize> = (0..table.column_count())
            .filter(|&idx| !self.config.exclude_columns().contains(&table.columns[idx]))
            .filter(|&idx| has_enough_values(&profiled.profiles[idx], table.row_count()))
            .collect();
        let (reduced, profiles) = project(profiled, &kept);

        debug!(
            sheet = %table.name,
            intensity = %intensity,
            kept = kept.len(),
            dropped = table.column_count() - kept.len(),
            "Filtered columns"
        );

        // 2. 要約統計量
        let summaries = if intensity == CompressionIntensity::Low {
            Vec::new()
        } else {
            summarize(&reduced, &profiles)
        };

        // 3. タスク別の集約
        let (reduced, aggregation) = match (intensity, task) {
            (CompressionIntensity::High, TaskType::Summary) => {
                match aggregate::group_by_lowest_cardinality(&reduced, &profiles) {
                    Some((grouped, aggregation)) => (grouped, Some(aggregation)),
                    None => (reduced, None),
                }
            }
            _ => (reduced, None),
        };

        // 4. 参考テキスト（縮約結果には影響しない）
        let compression_rules = match self.advisor {
            Some(advisor) => {
                let request = compression_rules_request(&describe::describe_table(profiled), task);
                advisor.complete(&request)
            }
            None => String::new(),
        };

        let output_profile = profile_table(reduced);
        let description =
            describe::describe_compressed(&output_profile, &summaries, aggregation.as_ref());
        let reduced = output_profile.table;

        Ok(CompressedSheet {
            shape: reduced.shape(),
            table: reduced,
            description,
            summaries,
            aggregation,
            compression_rules,
        })
    }

    /// ワークブック全体を圧縮（シート順を保持）
    pub fn compress_workbook(
        &self,
        parsed: &ParsedWorkbook,
    ) -> Result<Vec<CompressedSheet>, XlsxDigestError> {
        let sheets = parsed
            .iter()
            .map(|sheet| self.compress(sheet))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            sheets = sheets.len(),
            intensity = %self.config.compression_intensity(),
            task = %self.config.task_type(),
            "Compressed workbook"
        );
        Ok(sheets)
    }
}

impl Stage for CompressionEngine<'_> {
    type Input = ParsedWorkbook;
    type Output = Vec<CompressedSheet>;

    fn execute(&self, input: ParsedWorkbook) -> Result<Vec<CompressedSheet>, XlsxDigestError> {
        self.compress_workbook(&input)
    }
}

/// テーブル構造とプロファイルの対応を検証
fn validate_profiled(profiled: &ProfiledTable) -> Result<(), XlsxDigestError> {
    profiled.table.validate()?;

    let aligned = profiled.profiles.len() == profiled.table.column_count()
        && profiled
            .profiles
            .iter()
            .zip(&profiled.table.columns)
            .all(|(profile, column)| &profile.name == column);
    if !aligned {
        return Err(XlsxDigestError::Compression(format!(
            "table '{}' has {} column profiles that do not match its {} columns",
            profiled.table.name,
            profiled.profiles.len(),
            profiled.table.column_count()
        )));
    }
    Ok(())
}

/// 非空値の数が`0.9 × 行数`以上かどうか
fn has_enough_values(profile: &ColumnProfile, row_count: usize) -> bool {
    let non_null = row_count.saturating_sub(profile.null_count);
    non_null as f64 >= MIN_NON_NULL_RATIO * row_count as f64
}

/// 指定した列のみからなる新しいテーブルを生成
fn project(profiled: &ProfiledTable, kept: &[usize]) -> (Table, Vec<ColumnProfile>) {
    let table = &profiled.table;
    let columns = kept.iter().map(|&idx| table.columns[idx].clone()).collect();
    let rows = table
        .rows
        .iter()
        .map(|row| kept.iter().map(|&idx| row[idx].clone()).collect())
        .collect();
    let profiles = kept
        .iter()
        .map(|&idx| profiled.profiles[idx].clone())
        .collect();

    (Table::new(table.name.clone(), columns, rows), profiles)
}

/// 列ごとの要約を生成
fn summarize(table: &Table, profiles: &[ColumnProfile]) -> Vec<ColumnSummary> {
    profiles
        .iter()
        .enumerate()
        .map(|(idx, profile)| {
            if profile.inferred_type == InferredType::Numeric {
                let numbers: Vec<f64> = table
                    .column_values(idx)
                    .filter_map(CellValue::as_number)
                    .collect();
                if let (Some(mean), Some(median), Some((min, max))) = (
                    stats::mean(&numbers),
                    stats::median(&numbers),
                    stats::min_max(&numbers),
                ) {
                    return ColumnSummary::Numeric {
                        column: profile.name.clone(),
                        mean,
                        median,
                        std: stats::sample_std(&numbers),
                        min,
                        max,
                    };
                }
            }

            ColumnSummary::Categorical {
                column: profile.name.clone(),
                distinct: distinct_count(table.column_values(idx)),
            }
        })
        .collect()
}

/// 空セルを除いた異なり数
pub(crate) fn distinct_count<'v>(values: impl Iterator<Item = &'v CellValue>) -> usize {
    values
        .filter_map(CellValue::to_text)
        .collect::<HashSet<_>>()
        .len()
}
