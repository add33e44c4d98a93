//! Public API Types
//!
//! 公開APIで使用する列挙型を定義するモジュール。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 圧縮強度
///
/// テーブルをどこまで積極的に縮約するかを指定します。
/// 各段階は前の段階の縮約をすべて含みます（low ⊆ medium ⊆ high）。
///
/// 文字列からの変換は寛容で、未知の値はエラーにせずデフォルト（`Medium`）に
/// フォールバックします。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CompressionIntensity {
    /// 欠損値が90%を超える列を削除するのみ
    Low,

    /// lowに加えて、列ごとの要約統計量を付与
    #[default]
    Medium,

    /// mediumに加えて、タスク種別に応じた集約を適用
    High,
}

impl CompressionIntensity {
    /// 文字列から圧縮強度を解釈する（大文字小文字を区別しない）
    ///
    /// 未知の値は`CompressionIntensity::default()`になります。
    ///
    /// ```rust
    /// use xlsxdigest::CompressionIntensity;
    ///
    /// assert_eq!(CompressionIntensity::parse_lenient("HIGH"), CompressionIntensity::High);
    /// assert_eq!(CompressionIntensity::parse_lenient("invalid_value"), CompressionIntensity::Medium);
    /// ```
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => CompressionIntensity::Low,
            "medium" => CompressionIntensity::Medium,
            "high" => CompressionIntensity::High,
            _ => CompressionIntensity::default(),
        }
    }

    /// 小文字の識別名
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionIntensity::Low => "low",
            CompressionIntensity::Medium => "medium",
            CompressionIntensity::High => "high",
        }
    }
}

impl From<String> for CompressionIntensity {
    fn from(value: String) -> Self {
        Self::parse_lenient(&value)
    }
}

impl From<CompressionIntensity> for String {
    fn from(value: CompressionIntensity) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for CompressionIntensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 下流タスクの種別
///
/// high圧縮時の集約ポリシーと、アドバイザーへのプロンプトに影響します。
/// 未知の値は`Analysis`にフォールバックします。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    /// 行レベルの詳細を保ったままの分析
    #[default]
    Analysis,

    /// カテゴリ別の集約による要約
    Summary,

    /// パターン・関係性の推論
    Inference,
}

impl TaskType {
    /// 文字列からタスク種別を解釈する（大文字小文字を区別しない）
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "analysis" => TaskType::Analysis,
            "summary" => TaskType::Summary,
            "inference" => TaskType::Inference,
            _ => TaskType::default(),
        }
    }

    /// 小文字の識別名
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Analysis => "analysis",
            TaskType::Summary => "summary",
            TaskType::Inference => "inference",
        }
    }
}

impl From<String> for TaskType {
    fn from(value: String) -> Self {
        Self::parse_lenient(&value)
    }
}

impl From<TaskType> for String {
    fn from(value: TaskType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
