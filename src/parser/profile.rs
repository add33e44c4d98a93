//! Column Profiling
//!
//! 列ごとの推定型・空セル数・外れ値を算出する。

use crate::stats::quantile;
use crate::types::{CellValue, ColumnProfile, InferredType, ProfiledTable, Table};

/// IQR法の係数
const IQR_FACTOR: f64 = 1.5;

/// 外れ値検出に必要な最小の非空値数
const MIN_OUTLIER_SAMPLES: usize = 4;

/// 列の型を推定する
///
/// 判定順序:
/// 1. 非空値がすべて数値 → `Numeric`
/// 2. 非空値がすべて文字列 → `Text`
/// 3. 非空値がすべて日時 → `Datetime`
/// 4. 非空値がすべて論理値 → `Other("boolean")`
/// 5. それ以外（すべて空を含む） → `Mixed`
///
/// ```rust
/// use xlsxdigest::{infer_column_type, CellValue, InferredType};
///
/// let values = [CellValue::Number(1.0), CellValue::Null, CellValue::Number(2.5)];
/// assert_eq!(infer_column_type(&values), InferredType::Numeric);
/// ```
pub fn infer_column_type(values: &[CellValue]) -> InferredType {
    let mut non_null = values.iter().filter(|v| !v.is_null()).peekable();
    if non_null.peek().is_none() {
        return InferredType::Mixed;
    }

    let (mut numeric, mut text, mut datetime, mut boolean) = (true, true, true, true);
    for value in non_null {
        numeric &= matches!(value, CellValue::Number(_));
        text &= matches!(value, CellValue::Text(_));
        datetime &= matches!(value, CellValue::DateTime(_));
        boolean &= matches!(value, CellValue::Bool(_));
    }

    if numeric {
        InferredType::Numeric
    } else if text {
        InferredType::Text
    } else if datetime {
        InferredType::Datetime
    } else if boolean {
        InferredType::Other("boolean".to_string())
    } else {
        InferredType::Mixed
    }
}

/// IQR法で外れ値の行インデックスを検出する
///
/// 非空の数値についてQ1・Q3を線形補間で求め、
/// `[Q1 - 1.5·IQR, Q3 + 1.5·IQR]`の外側にある値の行インデックスを行順に返します。
///
/// 非空値が4未満の列、または値にばらつきがない（すべて同値の）列では空を返します。
pub fn detect_outliers(values: &[CellValue]) -> Vec<usize> {
    let numbers: Vec<f64> = values.iter().filter_map(CellValue::as_number).collect();
    if numbers.len() < MIN_OUTLIER_SAMPLES {
        return Vec::new();
    }

    let (q1, q3) = match (quantile(&numbers, 0.25), quantile(&numbers, 0.75)) {
        (Some(q1), Some(q3)) => (q1, q3),
        _ => return Vec::new(),
    };

    // ばらつきのない列は外れ値を持たない
    if numbers.iter().all(|&n| n == numbers[0]) {
        return Vec::new();
    }

    let iqr = q3 - q1;
    let lower = q1 - IQR_FACTOR * iqr;
    let upper = q3 + IQR_FACTOR * iqr;

    values
        .iter()
        .enumerate()
        .filter_map(|(idx, value)| match value.as_number() {
            Some(n) if n < lower || n > upper => Some(idx),
            _ => None,
        })
        .collect()
}

/// 空セルの数を数える
pub fn detect_nulls(values: &[CellValue]) -> usize {
    values.iter().filter(|v| v.is_null()).count()
}

/// テーブルの全列をプロファイルする
pub(crate) fn profile_table(table: Table) -> ProfiledTable {
    let profiles = table
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let values: Vec<CellValue> = table.column_values(idx).cloned().collect();
            let inferred_type = infer_column_type(&values);
            let outlier_row_indices = if inferred_type == InferredType::Numeric {
                detect_outliers(&values)
            } else {
                Vec::new()
            };

            ColumnProfile {
                name: name.clone(),
                inferred_type,
                null_count: detect_nulls(&values),
                outlier_row_indices,
            }
        })
        .collect();

    ProfiledTable { table, profiles }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn numbers(values: &[f64]) -> Vec<CellValue> {
        values.iter().map(|&v| CellValue::Number(v)).collect()
    }

    #[test]
    fn test_infer_numeric_ignores_nulls() {
        let values = vec![CellValue::Number(1.0), CellValue::Null, CellValue::Number(3.0)];
        assert_eq!(infer_column_type(&values), InferredType::Numeric);
    }

    #[test]
    fn test_infer_text() {
        let values = vec![CellValue::Text("a".to_string()), CellValue::Null];
        assert_eq!(infer_column_type(&values), InferredType::Text);
    }

    #[test]
    fn test_infer_mixed_and_all_null() {
        let mixed = vec![CellValue::Text("a".to_string()), CellValue::Number(1.0)];
        assert_eq!(infer_column_type(&mixed), InferredType::Mixed);

        let all_null = vec![CellValue::Null, CellValue::Null];
        assert_eq!(infer_column_type(&all_null), InferredType::Mixed);
        assert_eq!(infer_column_type(&[]), InferredType::Mixed);
    }

    #[test]
    fn test_infer_datetime_and_boolean() {
        let dt = NaiveDate::from_ymd_opt(2023, 10, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            infer_column_type(&[CellValue::DateTime(dt), CellValue::Null]),
            InferredType::Datetime
        );
        assert_eq!(
            infer_column_type(&[CellValue::Bool(true), CellValue::Bool(false)]),
            InferredType::Other("boolean".to_string())
        );
    }

    #[test]
    fn test_detect_outliers_flags_extreme_value() {
        let values = numbers(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 100.0]);
        assert_eq!(detect_outliers(&values), vec![8]);
    }

    #[test]
    fn test_detect_outliers_requires_four_values() {
        let values = numbers(&[1.0, 2.0, 1000.0]);
        assert!(detect_outliers(&values).is_empty());

        // 空セルは数に含めない
        let mut with_nulls = numbers(&[1.0, 2.0, 1000.0]);
        with_nulls.push(CellValue::Null);
        with_nulls.push(CellValue::Null);
        assert!(detect_outliers(&with_nulls).is_empty());
    }

    #[test]
    fn test_detect_outliers_constant_column() {
        let values = numbers(&[5.0, 5.0, 5.0, 5.0, 5.0]);
        assert!(detect_outliers(&values).is_empty());
    }

    #[test]
    fn test_detect_outliers_reports_source_row_indices() {
        let values = vec![
            CellValue::Number(10.0),
            CellValue::Null,
            CellValue::Number(-500.0),
            CellValue::Number(11.0),
            CellValue::Number(12.0),
            CellValue::Number(13.0),
            CellValue::Number(900.0),
        ];
        assert_eq!(detect_outliers(&values), vec![2, 6]);
    }

    #[test]
    fn test_detect_nulls() {
        let values = vec![CellValue::Null, CellValue::Number(1.0), CellValue::Null];
        assert_eq!(detect_nulls(&values), 2);
    }

    #[test]
    fn test_profile_table_only_numeric_columns_get_outliers() {
        let table = Table::new(
            "Sheet1",
            vec!["Name".to_string(), "Value".to_string()],
            (0..9)
                .map(|i| {
                    let value = if i == 8 { 100.0 } else { 1.0 };
                    vec![CellValue::Text(format!("n{}", i)), CellValue::Number(value)]
                })
                .collect(),
        );

        let profiled = profile_table(table);
        assert_eq!(profiled.profiles.len(), 2);
        assert_eq!(profiled.profiles[0].inferred_type, InferredType::Text);
        assert!(profiled.profiles[0].outlier_row_indices.is_empty());
        assert_eq!(profiled.profiles[1].outlier_row_indices, vec![8]);
        assert_eq!(profiled.profile("Value").unwrap().null_count, 0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn column() -> impl Strategy<Value = Vec<CellValue>> {
            prop::collection::vec(
                prop_oneof![
                    Just(CellValue::Null),
                    (-1.0e6f64..1.0e6).prop_map(CellValue::Number),
                ],
                0..40,
            )
        }

        proptest! {
            #[test]
            fn test_outliers_need_four_numbers(values in column()) {
                let outliers = detect_outliers(&values);
                let numbers = values.iter().filter(|v| !v.is_null()).count();
                if numbers < 4 {
                    prop_assert!(outliers.is_empty());
                }
                // 外れ値は数値セルの行のみ、行順
                prop_assert!(outliers.windows(2).all(|w| w[0] < w[1]));
                prop_assert!(outliers.iter().all(|&idx| !values[idx].is_null()));
                prop_assert_eq!(detect_nulls(&values) + numbers, values.len());
            }
        }
    }
}
