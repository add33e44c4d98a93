//! Formatter Module
//!
//! 圧縮済みシートから、文字数上限付きの自然言語コンテキストを生成するモジュール。

use tracing::info;

use crate::builder::ProcessingConfig;
use crate::error::XlsxDigestError;
use crate::stage::Stage;
use crate::types::{CompressedSheet, FormattedContext, Table};

const TRUNCATION_MARKER: &str = "...";

/// 整形ステージの入力
#[derive(Debug, Clone)]
pub struct FormatRequest {
    /// 圧縮済みシート（シート順）
    pub sheets: Vec<CompressedSheet>,
    /// タスクの説明
    pub task_description: String,
}

/// コンテキストフォーマッター
///
/// 出力は次の構造を持つ行の並びです（空のセクションは見出しごと省略）:
///
/// ```text
/// Task: <タスクの説明>
/// Core indicators:
/// - <指標>
///
/// Classification analysis:
/// - <分類分析>
/// ```
///
/// 列の判定は大文字小文字を区別しない完全一致で、
/// `profit`・`total`・`product`・`region`の列名を参照します。
#[derive(Debug)]
pub struct ContextFormatter<'a> {
    config: &'a ProcessingConfig,
}

impl<'a> ContextFormatter<'a> {
    /// 新しいContextFormatterを生成
    pub fn new(config: &'a ProcessingConfig) -> Self {
        Self { config }
    }

    /// 圧縮済みシートを整形する
    ///
    /// # 引数
    ///
    /// * `sheets` - 圧縮済みシート
    /// * `task_description` - タスクの説明
    ///
    /// # 戻り値
    ///
    /// * `Ok(FormattedContext)` - `max_output_length`文字以下のコンテキスト
    /// * `Err(XlsxDigestError::Format)` - シートの構造が不正な場合
    pub fn format(
        &self,
        sheets: &[CompressedSheet],
        task_description: &str,
    ) -> Result<FormattedContext, XlsxDigestError> {
        for sheet in sheets {
            validate_sheet(sheet)?;
        }

        let mut indicators = Vec::new();
        let mut analysis = Vec::new();
        for sheet in sheets {
            indicators.extend(self.core_indicators(&sheet.table));
            analysis.extend(classification_analysis(&sheet.table));
        }

        let mut lines = vec![format!("Task: {}", task_description)];
        let indicators = dedup_preserving_order(indicators);
        if !indicators.is_empty() {
            lines.push("Core indicators:".to_string());
            lines.extend(indicators.into_iter().map(|item| format!("- {}", item)));
        }
        let analysis = dedup_preserving_order(analysis);
        if !analysis.is_empty() {
            lines.push(String::new());
            lines.push("Classification analysis:".to_string());
            lines.extend(analysis.into_iter().map(|item| format!("- {}", item)));
        }

        let content = truncate_chars(&lines.join("\n"), self.config.max_output_length());
        let context = FormattedContext::new(content);

        info!(
            sheets = sheets.len(),
            length = context.length,
            max_length = self.config.max_output_length(),
            "Formatted context"
        );
        Ok(context)
    }

    /// シートごとの主要指標
    fn core_indicators(&self, table: &Table) -> Vec<String> {
        let mut indicators = Vec::new();
        let profit = table.column_index_ignore_case("profit");
        let total = table.column_index_ignore_case("total");
        let product = table.column_index_ignore_case("product");
        let name = table.name.to_lowercase();

        let is_aggregate = name.contains("summary") || (profit.is_some() && total.is_some());
        if is_aggregate {
            if let (Some(profit), Some(_)) = (profit, product) {
                indicators.push(format!(
                    "Total profit: {} yuan",
                    format_number(column_sum(table, profit))
                ));
            }
        } else if name.contains("sales") {
            if let Some(profit) = profit {
                let total_profit = column_sum(table, profit);
                indicators.push(format!("Total profit: {} yuan", format_number(total_profit)));
                if let Some(line) = self.anomaly_indicator(table, profit, total_profit) {
                    indicators.push(line);
                }
            }
        }

        indicators
    }

    /// 追跡対象エンティティの赤字指標
    fn anomaly_indicator(&self, table: &Table, profit: usize, total_profit: f64) -> Option<String> {
        let entity = self.config.anomaly_entity();
        let losses: Vec<f64> = table
            .rows
            .iter()
            .filter(|row| row.iter().any(|cell| cell.as_text() == Some(entity)))
            .filter_map(|row| row[profit].as_number())
            .filter(|&n| n < 0.0)
            .collect();
        if losses.is_empty() {
            return None;
        }

        let loss: f64 = losses.iter().sum();
        let percentage = if total_profit != 0.0 {
            loss.abs() / total_profit * 100.0
        } else {
            0.0
        };
        Some(format!(
            "{} had negative profit in Q4 ({} yuan), accounting for {:.1}%",
            entity,
            format_number(loss),
            percentage
        ))
    }
}

impl Stage for ContextFormatter<'_> {
    type Input = FormatRequest;
    type Output = FormattedContext;

    fn execute(&self, input: FormatRequest) -> Result<FormattedContext, XlsxDigestError> {
        self.format(&input.sheets, &input.task_description)
    }
}

/// 地域別の利益合計が最大の地域
fn classification_analysis(table: &Table) -> Option<String> {
    let region = table.column_index_ignore_case("region")?;
    let profit = table.column_index_ignore_case("profit")?;

    let mut totals: Vec<(String, f64)> = Vec::new();
    for row in &table.rows {
        let key = match row[region].to_text() {
            Some(key) => key,
            None => continue,
        };
        let amount = row[profit].as_number().unwrap_or(0.0);
        match totals.iter_mut().find(|(name, _)| *name == key) {
            Some((_, sum)) => *sum += amount,
            None => totals.push((key, amount)),
        }
    }

    // 同額の場合は先に現れた地域を採用
    let (top_region, top_profit) = totals
        .into_iter()
        .reduce(|best, next| if next.1 > best.1 { next } else { best })?;

    Some(format!(
        "{} region: {} profit share",
        top_region,
        format_number(top_profit)
    ))
}

fn validate_sheet(sheet: &CompressedSheet) -> Result<(), XlsxDigestError> {
    if let Some(problem) = sheet.table.structural_problem() {
        return Err(XlsxDigestError::Format(problem));
    }
    if sheet.shape != sheet.table.shape() {
        return Err(XlsxDigestError::Format(format!(
            "sheet '{}' declares shape {:?} but its table is {:?}",
            sheet.name(),
            sheet.shape,
            sheet.table.shape()
        )));
    }
    Ok(())
}

fn column_sum(table: &Table, column: usize) -> f64 {
    // 空の列の合計は0（-0ではない）
    table
        .column_values(column)
        .filter_map(|v| v.as_number())
        .fold(0.0, |acc, n| acc + n)
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

/// 数値を表示用にスケーリングする
///
/// ```rust
/// use xlsxdigest::format_number;
///
/// assert_eq!(format_number(2_500_000.0), "2.5 million");
/// assert_eq!(format_number(-3_000.0), "-3 thousand");
/// assert_eq!(format_number(999.6), "1000");
/// ```
pub fn format_number(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude >= 1_000_000.0 {
        format!("{:.1} million", value / 1_000_000.0)
    } else if magnitude >= 1_000.0 {
        format!("{:.0} thousand", value / 1_000.0)
    } else {
        format!("{:.0}", value)
    }
}

/// 文字数で切り詰める
///
/// 上限を超える場合は先頭`max_chars - 3`文字に`...`を付加します。
/// 上限が3未満の場合は先頭`max_chars`文字のみを返します。
pub(crate) fn truncate_chars(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    if max_chars < TRUNCATION_MARKER.len() {
        return content.chars().take(max_chars).collect();
    }

    let mut truncated: String = content
        .chars()
        .take(max_chars - TRUNCATION_MARKER.len())
        .collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProcessingConfigBuilder;
    use crate::types::CellValue;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn num(n: f64) -> CellValue {
        CellValue::Number(n)
    }

    fn sheet(name: &str, columns: &[&str], rows: Vec<Vec<CellValue>>) -> CompressedSheet {
        let table = Table::new(name, columns.iter().map(|c| c.to_string()).collect(), rows);
        CompressedSheet {
            shape: table.shape(),
            table,
            description: String::new(),
            summaries: Vec::new(),
            aggregation: None,
            compression_rules: String::new(),
        }
    }

    fn scenario_a() -> CompressedSheet {
        sheet(
            "Sales_Data",
            &["Product", "Profit"],
            vec![
                vec![text("Product C"), num(-1000.0)],
                vec![text("Product C"), num(-2000.0)],
                vec![text("Product A"), num(5000.0)],
            ],
        )
    }

    #[test]
    fn test_format_number_scales() {
        assert_eq!(format_number(2_000.0), "2 thousand");
        assert_eq!(format_number(-3_000.0), "-3 thousand");
        assert_eq!(format_number(1_260_000.0), "1.3 million");
        assert_eq!(format_number(-2_000_000.0), "-2.0 million");
        assert_eq!(format_number(999.0), "999");
        assert_eq!(format_number(0.0), "0");
    }

    #[test]
    fn test_negative_profit_share_above_hundred_percent() {
        let config = ProcessingConfig::default();
        let context = ContextFormatter::new(&config)
            .format(&[scenario_a()], "Analyze profit trends")
            .unwrap();

        assert_eq!(
            context.content,
            "Task: Analyze profit trends\n\
             Core indicators:\n\
             - Total profit: 2 thousand yuan\n\
             - Product C had negative profit in Q4 (-3 thousand yuan), accounting for 150.0%"
        );
        assert_eq!(context.length, context.content.chars().count());
    }

    #[test]
    fn test_anomaly_entity_is_configurable() {
        let config = ProcessingConfigBuilder::new()
            .with_anomaly_entity("Product A")
            .build()
            .unwrap();
        let context = ContextFormatter::new(&config)
            .format(&[scenario_a()], "t")
            .unwrap();
        // Product Aには赤字がない
        assert!(!context.content.contains("negative profit"));
    }

    #[test]
    fn test_empty_sales_sheet_reports_zero_profit() {
        let config = ProcessingConfig::default();
        let empty = sheet("Sales", &["Product", "Profit"], Vec::new());
        let nulls = sheet(
            "Sales_Data",
            &["Product", "Profit"],
            vec![vec![text("Product A"), CellValue::Null]],
        );

        let context = ContextFormatter::new(&config).format(&[empty], "t").unwrap();
        assert_eq!(context.content, "Task: t\nCore indicators:\n- Total profit: 0 yuan");

        let context = ContextFormatter::new(&config).format(&[nulls], "t").unwrap();
        assert!(context.content.ends_with("- Total profit: 0 yuan"));
        assert!(!context.content.contains("-0"));
    }

    #[test]
    fn test_zero_total_profit_reports_zero_percent() {
        let config = ProcessingConfig::default();
        let sales = sheet(
            "Q4 sales",
            &["product", "PROFIT"],
            vec![
                vec![text("Product C"), num(-500.0)],
                vec![text("Product B"), num(500.0)],
            ],
        );
        let context = ContextFormatter::new(&config).format(&[sales], "t").unwrap();
        assert!(context
            .content
            .contains("- Product C had negative profit in Q4 (-500 yuan), accounting for 0.0%"));
    }

    #[test]
    fn test_truncation_keeps_seven_chars_and_marker() {
        let config = ProcessingConfigBuilder::new()
            .with_max_output_length(10)
            .build()
            .unwrap();
        let context = ContextFormatter::new(&config)
            .format(&[scenario_a()], "Analyze profit trends")
            .unwrap();
        assert_eq!(context.content, "Task: A...");
        assert_eq!(context.length, 10);
    }

    #[test]
    fn test_truncation_below_marker_length_has_no_ellipsis() {
        assert_eq!(truncate_chars("Task: x", 2), "Ta");
        assert_eq!(truncate_chars("Task: x", 0), "");
        assert_eq!(truncate_chars("Task: x", 3), "...");
        assert_eq!(truncate_chars("short", 5), "short");
        assert_eq!(truncate_chars("利益の分析です", 5), "利益...");
    }

    #[test]
    fn test_aggregate_sheet_and_classification() {
        let config = ProcessingConfig::default();
        let summary = sheet(
            "Product_Summary",
            &["Product", "Profit"],
            vec![
                vec![text("Product A"), num(1_500_000.0)],
                vec![text("Product B"), num(700_000.0)],
            ],
        );
        let regional = sheet(
            "Regional",
            &["Region", "Profit"],
            vec![
                vec![text("East"), num(400.0)],
                vec![text("West"), num(900.0)],
                vec![text("East"), num(600.0)],
                vec![CellValue::Null, num(5000.0)],
            ],
        );
        let context = ContextFormatter::new(&config)
            .format(&[summary, regional], "Summarize")
            .unwrap();

        assert_eq!(
            context.content,
            "Task: Summarize\n\
             Core indicators:\n\
             - Total profit: 2.2 million yuan\n\
             \n\
             Classification analysis:\n\
             - East region: 1 thousand profit share"
        );
    }

    #[test]
    fn test_region_ties_keep_first_seen() {
        let regional = sheet(
            "R",
            &["Region", "Profit"],
            vec![
                vec![text("North"), num(10.0)],
                vec![text("South"), num(10.0)],
            ],
        );
        assert_eq!(
            classification_analysis(&regional.table),
            Some("North region: 10 profit share".to_string())
        );
    }

    #[test]
    fn test_duplicate_lines_are_collapsed() {
        let config = ProcessingConfig::default();
        let context = ContextFormatter::new(&config)
            .format(&[scenario_a(), scenario_a()], "t")
            .unwrap();
        assert_eq!(context.content.matches("Total profit").count(), 1);
        assert_eq!(context.content.matches("negative profit").count(), 1);
    }

    #[test]
    fn test_sections_omitted_when_empty() {
        let config = ProcessingConfig::default();
        let other = sheet("Inventory", &["Item", "Count"], vec![vec![text("x"), num(1.0)]]);
        let context = ContextFormatter::new(&config).format(&[other], "t").unwrap();
        assert_eq!(context.content, "Task: t");
    }

    #[test]
    fn test_shape_mismatch_is_format_error() {
        let config = ProcessingConfig::default();
        let mut bad = scenario_a();
        bad.shape = (99, 2);
        match ContextFormatter::new(&config).format(&[bad], "t") {
            Err(XlsxDigestError::Format(msg)) => assert!(msg.contains("declares shape")),
            other => panic!("Expected Format error, got {:?}", other),
        }
    }

    #[test]
    fn test_stage_execute() {
        let config = ProcessingConfig::default();
        let context = ContextFormatter::new(&config)
            .execute(FormatRequest {
                sheets: vec![scenario_a()],
                task_description: "t".to_string(),
            })
            .unwrap();
        assert!(context.content.starts_with("Task: t\nCore indicators:"));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_output_never_exceeds_budget(
                task in "\\PC{0,80}",
                profits in proptest::collection::vec(-1.0e7f64..1.0e7, 0..8),
                max_len in 0usize..120,
            ) {
                let config = ProcessingConfigBuilder::new()
                    .with_max_output_length(max_len)
                    .build()
                    .unwrap();
                let rows = profits
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        let product = if i % 2 == 0 { "Product C" } else { "Product A" };
                        vec![text(product), text("East"), num(*p)]
                    })
                    .collect();
                let sales = sheet("Sales_Data", &["Product", "Region", "Profit"], rows);

                let context = ContextFormatter::new(&config).format(&[sales], &task).unwrap();
                prop_assert!(context.length <= max_len);
                prop_assert_eq!(context.length, context.content.chars().count());
            }

            #[test]
            fn test_truncate_chars_prefix(content in "\\PC{0,60}", max_len in 0usize..70) {
                let truncated = truncate_chars(&content, max_len);
                let kept = truncated.trim_end_matches(TRUNCATION_MARKER);
                prop_assert!(truncated.chars().count() <= max_len);
                prop_assert!(content.starts_with(kept));
            }
        }
    }
}
