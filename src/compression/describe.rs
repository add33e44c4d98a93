//! テーブルの自然言語記述

use crate::types::{number_to_text, ColumnSummary, GroupAggregation, ProfiledTable};

/// 行数・列数・列一覧・推定型・空セル数・外れ値数を1段落にまとめる
///
/// 例: `Dataset with 3 rows and 2 columns. Columns: Product, Profit. Data types: Product (text), Profit (numeric). Null values: Profit (1).`
pub(super) fn describe_table(profiled: &ProfiledTable) -> String {
    let table = &profiled.table;
    let mut parts = vec![format!(
        "Dataset with {} rows and {} columns.",
        table.row_count(),
        table.column_count()
    )];

    if !table.columns.is_empty() {
        parts.push(format!("Columns: {}.", table.columns.join(", ")));
        let types: Vec<String> = profiled
            .profiles
            .iter()
            .map(|p| format!("{} ({})", p.name, p.inferred_type))
            .collect();
        parts.push(format!("Data types: {}.", types.join(", ")));
    }

    let nulls: Vec<String> = profiled
        .profiles
        .iter()
        .filter(|p| p.null_count > 0)
        .map(|p| format!("{} ({})", p.name, p.null_count))
        .collect();
    if !nulls.is_empty() {
        parts.push(format!("Null values: {}.", nulls.join(", ")));
    }

    let outliers: Vec<String> = profiled
        .profiles
        .iter()
        .filter(|p| !p.outlier_row_indices.is_empty())
        .map(|p| format!("{} ({})", p.name, p.outlier_row_indices.len()))
        .collect();
    if !outliers.is_empty() {
        parts.push(format!("Outliers: {}.", outliers.join(", ")));
    }

    parts.join(" ")
}

/// 圧縮後のテーブル記述に要約統計量と集約情報を追加する
pub(super) fn describe_compressed(
    profiled: &ProfiledTable,
    summaries: &[ColumnSummary],
    aggregation: Option<&GroupAggregation>,
) -> String {
    let mut description = describe_table(profiled);

    if !summaries.is_empty() {
        let rendered: Vec<String> = summaries.iter().map(describe_summary).collect();
        description.push_str(&format!(" Summary statistics: {}.", rendered.join("; ")));
    }

    if let Some(aggregation) = aggregation {
        let summed = if aggregation.summed_columns.is_empty() {
            "row counts only".to_string()
        } else {
            format!("sums of {}", aggregation.summed_columns.join(", "))
        };
        description.push_str(&format!(
            " Aggregated by {} into {} groups ({}).",
            aggregation.group_column,
            aggregation.groups.len(),
            summed
        ));
    }

    description
}

fn describe_summary(summary: &ColumnSummary) -> String {
    match summary {
        ColumnSummary::Numeric {
            column,
            mean,
            median,
            std,
            min,
            max,
        } => {
            let std = std.map_or_else(|| "n/a".to_string(), |s| format!("{:.2}", s));
            format!(
                "{}: mean {:.2}, median {:.2}, std {}, min {}, max {}",
                column,
                mean,
                median,
                std,
                number_to_text(*min),
                number_to_text(*max)
            )
        }
        ColumnSummary::Categorical { column, distinct } => {
            format!("{}: {} distinct values", column, distinct)
        }
    }
}
