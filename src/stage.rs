//! Stage Module
//!
//! パイプラインを構成する各ステージの共通契約。

use crate::error::XlsxDigestError;

/// パイプラインの1ステージ
///
/// 入力を所有権ごと受け取り、新しい出力を生成します。
/// 実装は入力を共有状態として保持せず、同じ入力に対して同じ出力を返します
/// （アドバイザーの参考テキストを除く）。
pub trait Stage {
    /// ステージの入力
    type Input;
    /// ステージの出力
    type Output;

    /// ステージを実行
    fn execute(&self, input: Self::Input) -> Result<Self::Output, XlsxDigestError>;
}
