//! Types Module
//!
//! パイプライン全体で受け渡す値オブジェクトを定義するモジュール。
//! 各ステージは入力を変更せず、常に新しい値を生成します。

use chrono::NaiveDateTime;
use std::fmt;

use crate::error::XlsxDigestError;

/// セルの値を表す列挙型
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// 数値（f64）
    Number(f64),

    /// 文字列
    Text(String),

    /// 日時
    DateTime(NaiveDateTime),

    /// 論理値
    Bool(bool),

    /// 空セル（エラー値を含む）
    Null,
}

impl CellValue {
    /// 値が空かどうかを判定
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// 数値であれば値を返す
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// 文字列であれば値を返す
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 値を表示用の文字列に変換（空セルは`None`）
    ///
    /// 整数値の数値は小数点なしで表現します（例: `2023.0` -> `"2023"`）。
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Number(n) => Some(number_to_text(*n)),
            CellValue::Text(s) => Some(s.clone()),
            CellValue::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            CellValue::Bool(b) => Some(b.to_string()),
            CellValue::Null => None,
        }
    }
}

/// 数値を文字列化する（整数値は小数点なし）
pub(crate) fn number_to_text(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// 列の推定型
///
/// ネイティブの格納型より緩い分類で、圧縮ポリシーはこの分類を参照します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferredType {
    /// 非空値がすべて数値
    Numeric,
    /// 非空値がすべて文字列
    Text,
    /// 型が混在、またはすべて空
    Mixed,
    /// 非空値がすべて日時
    Datetime,
    /// その他の単一型（例: `boolean`）
    Other(String),
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferredType::Numeric => f.write_str("numeric"),
            InferredType::Text => f.write_str("text"),
            InferredType::Mixed => f.write_str("mixed"),
            InferredType::Datetime => f.write_str("datetime"),
            InferredType::Other(label) => f.write_str(label),
        }
    }
}

/// 1シート分の表データ
///
/// 各レコードは`columns`と同じ順序・同じ幅のセル列です。
/// 欠損値は`CellValue::Null`で表現され、キーの欠落は起こりません。
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// シート名
    pub name: String,
    /// 列名（元シートの列順）
    pub columns: Vec<String>,
    /// レコード（元シートの行順）
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// 新しいテーブルを生成
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    /// 行数
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// 列数
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// `(行数, 列数)`
    pub fn shape(&self) -> (usize, usize) {
        (self.row_count(), self.column_count())
    }

    /// 列名から列インデックスを取得（完全一致）
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// 列名から列インデックスを取得（大文字小文字を区別しない完全一致）
    pub fn column_index_ignore_case(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// 指定列のセルを行順に返す
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &CellValue> + '_ {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    /// 列名でセルを取得
    pub fn get(&self, row: usize, column: &str) -> Option<&CellValue> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// テーブルの構造を検証
    ///
    /// 列名の重複、または列数と幅が異なるレコードを検出した場合に
    /// 問題の説明を返します。エラー種別は呼び出し側のステージが決めます。
    pub(crate) fn structural_problem(&self) -> Option<String> {
        for (idx, column) in self.columns.iter().enumerate() {
            if self.columns[..idx].contains(column) {
                return Some(format!(
                    "table '{}' declares column '{}' more than once",
                    self.name, column
                ));
            }
        }

        let width = self.columns.len();
        self.rows
            .iter()
            .position(|row| row.len() != width)
            .map(|row_idx| {
                format!(
                    "table '{}' row {} has {} cells but {} columns are declared",
                    self.name,
                    row_idx,
                    self.rows[row_idx].len(),
                    width
                )
            })
    }

    /// テーブルの構造を検証し、不正であれば`Compression`エラーを返す
    pub fn validate(&self) -> Result<(), XlsxDigestError> {
        match self.structural_problem() {
            Some(problem) => Err(XlsxDigestError::Compression(problem)),
            None => Ok(()),
        }
    }
}

/// 列ごとのメタデータ
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProfile {
    /// 列名
    pub name: String,
    /// 推定型
    pub inferred_type: InferredType,
    /// 空セル数
    pub null_count: usize,
    /// 外れ値の行インデックス（0始まり、数値列のみ）
    pub outlier_row_indices: Vec<usize>,
}

/// プロファイル済みのテーブル
///
/// `profiles`は`table.columns`と1対1・同順で対応します。
#[derive(Debug, Clone, PartialEq)]
pub struct ProfiledTable {
    pub table: Table,
    pub profiles: Vec<ColumnProfile>,
}

impl ProfiledTable {
    /// 列名からプロファイルを取得
    pub fn profile(&self, column: &str) -> Option<&ColumnProfile> {
        self.profiles.iter().find(|p| p.name == column)
    }
}

/// 解析済みワークブック（シート名 → プロファイル済みテーブル、順序付き）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedWorkbook {
    sheets: Vec<ProfiledTable>,
}

impl ParsedWorkbook {
    pub(crate) fn new(sheets: Vec<ProfiledTable>) -> Self {
        Self { sheets }
    }

    /// シート数
    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    /// シートが1つもないかどうか
    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    /// シート名で検索
    pub fn get(&self, name: &str) -> Option<&ProfiledTable> {
        self.sheets.iter().find(|s| s.table.name == name)
    }

    /// シート名を順序どおりに返す
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.table.name.as_str()).collect()
    }

    /// シートを順序どおりに走査
    pub fn iter(&self) -> std::slice::Iter<'_, ProfiledTable> {
        self.sheets.iter()
    }

    /// 所有権ごとシートを取り出す
    pub fn into_sheets(self) -> Vec<ProfiledTable> {
        self.sheets
    }
}

/// 列ごとの要約（medium以上で付与される助言用メタデータ）
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSummary {
    /// 数値列の基本統計量
    Numeric {
        column: String,
        mean: f64,
        median: f64,
        /// 標本標準偏差（値が2つ未満の場合は`None`）
        std: Option<f64>,
        min: f64,
        max: f64,
    },
    /// 非数値列の異なり数
    Categorical { column: String, distinct: usize },
}

impl ColumnSummary {
    /// 対象の列名
    pub fn column(&self) -> &str {
        match self {
            ColumnSummary::Numeric { column, .. } | ColumnSummary::Categorical { column, .. } => {
                column
            }
        }
    }
}

/// グループ集約の情報（high圧縮・summaryタスク）
#[derive(Debug, Clone, PartialEq)]
pub struct GroupAggregation {
    /// グループ化に使用した列
    pub group_column: String,
    /// グループキー（初出順）
    pub groups: Vec<String>,
    /// グループごとの元の行数（`groups`と同順）
    pub row_counts: Vec<usize>,
    /// 合計した数値列
    pub summed_columns: Vec<String>,
}

/// 圧縮ステージの出力
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedSheet {
    /// 縮約後のテーブル
    pub table: Table,
    /// `(行数, 列数)`
    pub shape: (usize, usize),
    /// 自然言語のデータ記述
    pub description: String,
    /// 列ごとの要約（low圧縮では空）
    pub summaries: Vec<ColumnSummary>,
    /// グループ集約（high圧縮・summaryタスクで該当列がある場合のみ）
    pub aggregation: Option<GroupAggregation>,
    /// アドバイザーからの参考テキスト（制御には使用しない）
    pub compression_rules: String,
}

impl CompressedSheet {
    /// シート名
    pub fn name(&self) -> &str {
        &self.table.name
    }
}

/// 最終成果物
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedContext {
    /// 整形済みテキスト（`max_output_length`文字以下）
    pub content: String,
    /// `content`の文字数
    pub length: usize,
}

impl FormattedContext {
    pub(crate) fn new(content: String) -> Self {
        let length = content.chars().count();
        Self { content, length }
    }
}
