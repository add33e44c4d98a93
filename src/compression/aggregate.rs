//! カテゴリ列によるグループ集約（high圧縮・summaryタスク）

use std::collections::HashMap;

use super::distinct_count;
use crate::types::{CellValue, ColumnProfile, GroupAggregation, InferredType, Table};

/// 異なり数が最小の文字列列でグループ化し、数値列を合計する
///
/// - グループ列の候補は推定型が`Text`で、異なり数が行数未満の列
/// - 異なり数が同じ場合は左側の列を優先
/// - グループは初出順、キーが空のレコードは除外
///
/// 候補がなければ`None`を返します。
pub(super) fn group_by_lowest_cardinality(
    table: &Table,
    profiles: &[ColumnProfile],
) -> Option<(Table, GroupAggregation)> {
    let group_idx = select_group_column(table, profiles)?;
    let numeric: Vec<usize> = profiles
        .iter()
        .enumerate()
        .filter(|(_, p)| p.inferred_type == InferredType::Numeric)
        .map(|(idx, _)| idx)
        .collect();

    let mut groups: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut row_counts: Vec<usize> = Vec::new();
    let mut sums: Vec<Vec<f64>> = Vec::new();

    for row in &table.rows {
        let key = match row[group_idx].as_text() {
            Some(key) => key,
            None => continue,
        };

        let pos = match positions.get(key) {
            Some(&pos) => pos,
            None => {
                let pos = groups.len();
                positions.insert(key.to_string(), pos);
                groups.push(key.to_string());
                row_counts.push(0);
                sums.push(vec![0.0; numeric.len()]);
                pos
            }
        };

        row_counts[pos] += 1;
        for (slot, &col) in numeric.iter().enumerate() {
            if let Some(n) = row[col].as_number() {
                sums[pos][slot] += n;
            }
        }
    }

    let group_column = table.columns[group_idx].clone();
    let summed_columns: Vec<String> = numeric.iter().map(|&idx| table.columns[idx].clone()).collect();

    let mut columns = Vec::with_capacity(summed_columns.len() + 1);
    columns.push(group_column.clone());
    columns.extend(summed_columns.iter().cloned());

    let rows = groups
        .iter()
        .zip(&sums)
        .map(|(key, totals)| {
            let mut record = Vec::with_capacity(totals.len() + 1);
            record.push(CellValue::Text(key.clone()));
            record.extend(totals.iter().map(|&total| CellValue::Number(total)));
            record
        })
        .collect();

    Some((
        Table::new(table.name.clone(), columns, rows),
        GroupAggregation {
            group_column,
            groups,
            row_counts,
            summed_columns,
        },
    ))
}

fn select_group_column(table: &Table, profiles: &[ColumnProfile]) -> Option<usize> {
    let row_count = table.row_count();
    let mut best: Option<(usize, usize)> = None;

    for (idx, profile) in profiles.iter().enumerate() {
        if profile.inferred_type != InferredType::Text {
            continue;
        }
        let distinct = distinct_count(table.column_values(idx));
        if distinct == 0 || distinct >= row_count {
            continue;
        }
        if best.map_or(true, |(_, lowest)| distinct < lowest) {
            best = Some((idx, distinct));
        }
    }

    best.map(|(idx, _)| idx)
}
