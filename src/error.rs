//! Error Types Module
//!
//! クレート全体で使用する構造化エラー型を定義するモジュール。
//! `thiserror`を使用して、エラーの自動変換とメッセージフォーマットを実現する。

use thiserror::Error;

/// xlsxdigestクレート全体で使用するエラー型
///
/// パイプラインの各ステージ（解析・圧縮・整形）で発生するエラーを
/// 統一的に扱います。表示文字列には必ず発生元の状況が含まれるため、
/// そのまま呼び出し元へのメッセージとして利用できます。
///
/// # エラーの種類
///
/// - `Io`: I/O操作中に発生したエラー
/// - `Parse` / `Decryption`: ワークブックを開けない、またはシートを解読できない（解析ステージ）
/// - `Compression`: 圧縮ステージへの入力テーブルが不正
/// - `Format`: 整形ステージへの入力が不正
/// - `Config`: 設定の検証に失敗した
/// - `SecurityViolation`: 入力サイズなどのセキュリティ制限に違反した
///
/// # 使用例
///
/// ```rust,no_run
/// use xlsxdigest::XlsxDigestError;
///
/// fn read_workbook(path: &str) -> Result<Vec<u8>, XlsxDigestError> {
///     let bytes = std::fs::read(path)?; // Ioエラーが自動的に変換される
///     Ok(bytes)
/// }
/// ```
#[derive(Error, Debug)]
pub enum XlsxDigestError {
    /// I/O操作中に発生したエラー
    ///
    /// `#[from]`属性により、`std::io::Error`から自動的に変換されます。
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Excelファイルの解析中に発生したエラー
    ///
    /// calamineがワークブックまたはシートを解読できなかった場合に使用されます。
    /// 破損したファイル、サポートされていない形式などが原因となります。
    #[error("Failed to parse Excel file: {0}")]
    Parse(#[from] calamine::Error),

    /// 暗号化されたワークブックを復号できなかったエラー
    ///
    /// パスワード未指定・パスワード誤り・未対応の暗号化方式などが原因となります。
    /// 解析ステージのエラーとして扱われます。
    #[error("Failed to parse Excel file: {0}")]
    Decryption(String),

    /// 圧縮ステージの入力が不正なエラー
    ///
    /// 宣言された列とレコードの幅が一致しないテーブルなど、
    /// 構造的に不正な中間データが渡された場合に発生します。
    #[error("Failed to compress data: {0}")]
    Compression(String),

    /// 整形ステージの入力が不正なエラー
    #[error("Failed to format data: {0}")]
    Format(String),

    /// 設定の検証に失敗したエラー
    ///
    /// # 例
    ///
    /// ```rust,no_run
    /// use xlsxdigest::{ProcessingConfigBuilder, XlsxDigestError};
    ///
    /// let result = ProcessingConfigBuilder::new()
    ///     .with_include_sheets(vec![String::new()]) // 空のシート名
    ///     .build();
    ///
    /// if let Err(XlsxDigestError::Config(msg)) = result {
    ///     println!("設定エラー: {}", msg);
    /// }
    /// ```
    #[error("Configuration error: {0}")]
    Config(String),

    /// セキュリティ制限に違反したエラー
    ///
    /// 入力ファイルサイズの上限超過、復号後サイズの上限超過、
    /// 異常に大きい鍵導出回数（spinCount）などで発生します。
    #[error("Security violation: {0}")]
    SecurityViolation(String),
}

impl XlsxDigestError {
    /// 解析ステージ由来のエラーかどうか
    pub fn is_parse(&self) -> bool {
        matches!(
            self,
            XlsxDigestError::Parse(_)
                | XlsxDigestError::Decryption(_)
                | XlsxDigestError::SecurityViolation(_)
        )
    }

    /// 圧縮ステージ由来のエラーかどうか
    pub fn is_compression(&self) -> bool {
        matches!(self, XlsxDigestError::Compression(_))
    }

    /// 整形ステージ由来のエラーかどうか
    pub fn is_format(&self) -> bool {
        matches!(self, XlsxDigestError::Format(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error: XlsxDigestError = io_err.into();

        match error {
            XlsxDigestError::Io(e) => {
                assert_eq!(e.kind(), io::ErrorKind::NotFound);
                assert_eq!(e.to_string(), "File not found");
            }
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_parse_error_display() {
        let error: XlsxDigestError = calamine::Error::Msg("Corrupted file").into();

        let error_msg = error.to_string();
        assert!(error_msg.starts_with("Failed to parse Excel file"));
        assert!(error_msg.contains("Corrupted file"));
        assert!(error.is_parse());
    }

    #[test]
    fn test_decryption_error_is_parse_stage() {
        let error = XlsxDigestError::Decryption("wrong password".to_string());
        assert!(error.is_parse());
        assert!(error
            .to_string()
            .starts_with("Failed to parse Excel file: wrong password"));
    }

    #[test]
    fn test_stage_classification() {
        let compression = XlsxDigestError::Compression("row 3 has 2 cells".to_string());
        assert!(compression.is_compression());
        assert!(!compression.is_parse());
        assert!(compression.to_string().starts_with("Failed to compress data"));

        let format = XlsxDigestError::Format("shape mismatch".to_string());
        assert!(format.is_format());
        assert!(format.to_string().starts_with("Failed to format data"));
    }

    #[test]
    fn test_all_error_formats() {
        let io_err: XlsxDigestError = io::Error::other("test io").into();
        assert!(io_err.to_string().starts_with("IO error"));

        let config_err = XlsxDigestError::Config("test config".to_string());
        assert!(config_err.to_string().starts_with("Configuration error"));

        let security_err = XlsxDigestError::SecurityViolation("too large".to_string());
        assert!(security_err.to_string().starts_with("Security violation"));
    }
}
