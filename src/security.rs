//! Security Module
//!
//! 入力ワークブックの処理に関するセキュリティ制限を定義するモジュール。
//! 巨大な入力ファイル、復号後サイズの詐称、異常な鍵導出回数への対策を提供します。

use crate::error::XlsxDigestError;

/// セキュリティ設定
#[derive(Debug, Clone)]
pub(crate) struct SecurityConfig {
    /// 入力ファイルの最大サイズ（バイト）
    /// デフォルト: 2GB (2_147_483_648 bytes)
    pub max_input_file_size: u64,
    /// 復号後パッケージの最大サイズ（バイト）
    /// デフォルト: 1GB (1_073_741_824 bytes)
    pub max_decrypted_size: u64,
    /// パスワード鍵導出の最大反復回数
    /// デフォルト: 10,000,000（Excelの既定値は100,000）
    pub max_spin_count: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_input_file_size: 2_147_483_648, // 2GB
            max_decrypted_size: 1_073_741_824,  // 1GB
            max_spin_count: 10_000_000,
        }
    }
}

impl SecurityConfig {
    /// 入力サイズを検証
    pub fn check_input_size(&self, size: u64) -> Result<(), XlsxDigestError> {
        if size > self.max_input_file_size {
            return Err(XlsxDigestError::SecurityViolation(format!(
                "Input file size exceeds maximum: {} bytes (max: {} bytes)",
                size, self.max_input_file_size
            )));
        }
        Ok(())
    }

    /// 暗号化ヘッダーに記載された復号後サイズを検証
    pub fn check_decrypted_size(&self, size: u64) -> Result<(), XlsxDigestError> {
        if size > self.max_decrypted_size {
            return Err(XlsxDigestError::SecurityViolation(format!(
                "Decrypted package size exceeds maximum: {} bytes (max: {} bytes)",
                size, self.max_decrypted_size
            )));
        }
        Ok(())
    }

    /// 鍵導出の反復回数を検証
    pub fn check_spin_count(&self, spin_count: u32) -> Result<(), XlsxDigestError> {
        if spin_count > self.max_spin_count {
            return Err(XlsxDigestError::SecurityViolation(format!(
                "Key derivation spin count exceeds maximum: {} (max: {})",
                spin_count, self.max_spin_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_size_limit() {
        let config = SecurityConfig {
            max_input_file_size: 10,
            ..SecurityConfig::default()
        };
        assert!(config.check_input_size(10).is_ok());
        assert!(matches!(
            config.check_input_size(11),
            Err(XlsxDigestError::SecurityViolation(_))
        ));
    }

    #[test]
    fn test_decrypted_size_limit() {
        let config = SecurityConfig::default();
        assert!(config.check_decrypted_size(1024).is_ok());
        assert!(config.check_decrypted_size(u64::MAX).is_err());
    }

    #[test]
    fn test_spin_count_limit() {
        let config = SecurityConfig::default();
        assert!(config.check_spin_count(100_000).is_ok());
        assert!(config.check_spin_count(u32::MAX).is_err());
    }
}
