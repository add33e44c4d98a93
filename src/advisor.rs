//! Rule Advisor Module
//!
//! 圧縮ステージに参考テキストを提供する言語モデル連携の境界。
//! アドバイザーの失敗はこの境界を越えて伝播せず、説明付きのフォールバック文字列になります。

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::api::TaskType;

/// 圧縮ルール生成時のサンプリング温度
pub const RULES_TEMPERATURE: f32 = 0.3;

/// 圧縮ルール生成時の最大トークン数
pub const RULES_MAX_TOKENS: u32 = 500;

const RULES_SYSTEM_MESSAGE: &str = "You are a data compression expert. \
You suggest concise, concrete rules for reducing spreadsheet data before it is given to a language model.";

/// アドバイザー内部のエラー
///
/// `RuleAdvisor::complete`の外側には伝播しません。
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// 接続・送受信の失敗
    #[error("transport error: {0}")]
    Transport(String),

    /// タイムアウト
    #[error("request timed out")]
    Timeout,

    /// 成功以外のHTTPステータス
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// 応答に補完テキストが含まれていない
    #[error("response contained no completion text")]
    EmptyResponse,

    /// リクエストを組み立てられない
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// テキスト補完リクエスト
///
/// `temperature`は0.0〜1.0、`max_tokens`は1以上に丸められます。
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    prompt: String,
    system_message: String,
    temperature: f32,
    max_tokens: u32,
}

impl CompletionRequest {
    /// 新しいリクエストを生成
    pub fn new(
        prompt: impl Into<String>,
        system_message: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        let temperature = if temperature.is_nan() {
            0.0
        } else {
            temperature.clamp(0.0, 1.0)
        };
        Self {
            prompt: prompt.into(),
            system_message: system_message.into(),
            temperature,
            max_tokens: max_tokens.max(1),
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn system_message(&self) -> &str {
        &self.system_message
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

/// 圧縮ルール生成用のリクエストを組み立てる
///
/// # 引数
///
/// * `description` - テーブルの自然言語記述
/// * `task` - 下流タスクの種別
pub fn compression_rules_request(description: &str, task: TaskType) -> CompletionRequest {
    let prompt = format!(
        "Based on the following data description, generate compression rules for a {} task.\n\n\
         Data description:\n{}\n\n\
         List which columns to keep, aggregate, or drop, and which statistics matter most.",
        task, description
    );
    CompletionRequest::new(
        prompt,
        RULES_SYSTEM_MESSAGE,
        RULES_TEMPERATURE,
        RULES_MAX_TOKENS,
    )
}

/// テキスト補完のケイパビリティ
///
/// 実装者は`try_complete`を提供します。呼び出し側は`complete`を使用し、
/// 失敗はフォールバック文字列として受け取ります。
pub trait RuleAdvisor: Send + Sync {
    /// 補完を試みる
    fn try_complete(&self, request: &CompletionRequest) -> Result<String, AdvisorError>;

    /// 補完を実行する（失敗しない）
    ///
    /// エラー時は`warn`ログを出力し、
    /// `"Error generating compression rules: <原因>. Continuing with deterministic compression."`
    /// を返します。
    fn complete(&self, request: &CompletionRequest) -> String {
        match self.try_complete(request) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "Rule advisor failed; continuing without advice");
                fallback_text(&err)
            }
        }
    }
}

pub(crate) fn fallback_text(err: &AdvisorError) -> String {
    format!(
        "Error generating compression rules: {}. Continuing with deterministic compression.",
        err
    )
}

/// HTTPアドバイザーの設定
///
/// 資格情報は構築時に明示的に渡します（環境変数は参照しません）。
#[derive(Clone, serde::Deserialize)]
pub struct AdvisorConfig {
    /// APIキー（Bearer認証）
    pub api_key: String,

    /// OpenAI互換エンドポイントのベースURL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// モデル名
    #[serde(default = "default_model")]
    pub model: String,

    /// リクエストのタイムアウト（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl AdvisorConfig {
    /// デフォルトのエンドポイント・モデル・タイムアウトで設定を生成
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// タイムアウト
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

// APIキーはログに出さない
impl fmt::Debug for AdvisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisorConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[cfg(feature = "http-advisor")]
pub use http::HttpRuleAdvisor;

#[cfg(feature = "http-advisor")]
mod http {
    use serde::Deserialize;
    use tracing::debug;

    use super::{AdvisorConfig, AdvisorError, CompletionRequest, RuleAdvisor};
    use crate::error::XlsxDigestError;

    /// OpenAI互換のChat Completions APIを使用するアドバイザー
    ///
    /// ブロッキングクライアントを使用するため、非同期ランタイムのスレッド内から
    /// 呼び出さないでください。
    ///
    /// # 使用例
    ///
    /// ```rust,no_run
    /// use xlsxdigest::{AdvisorConfig, HttpRuleAdvisor};
    ///
    /// # fn main() -> Result<(), xlsxdigest::XlsxDigestError> {
    /// let advisor = HttpRuleAdvisor::new(AdvisorConfig::new("sk-..."))?;
    /// # Ok(())
    /// # }
    /// ```
    #[derive(Debug)]
    pub struct HttpRuleAdvisor {
        client: reqwest::blocking::Client,
        config: AdvisorConfig,
    }

    #[derive(Deserialize)]
    struct ChatCompletionResponse {
        #[serde(default)]
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: Message,
    }

    #[derive(Deserialize)]
    struct Message {
        content: Option<String>,
    }

    impl HttpRuleAdvisor {
        /// 新しいHttpRuleAdvisorを生成
        ///
        /// # 戻り値
        ///
        /// * `Err(XlsxDigestError::Config)` - APIキーまたはベースURLが空、
        ///   もしくはHTTPクライアントを構築できない場合
        pub fn new(config: AdvisorConfig) -> Result<Self, XlsxDigestError> {
            if config.api_key.trim().is_empty() {
                return Err(XlsxDigestError::Config(
                    "advisor api_key must not be empty".to_string(),
                ));
            }
            if config.base_url.trim().is_empty() {
                return Err(XlsxDigestError::Config(
                    "advisor base_url must not be empty".to_string(),
                ));
            }

            let client = reqwest::blocking::Client::builder()
                .timeout(config.timeout())
                .build()
                .map_err(|e| {
                    XlsxDigestError::Config(format!("Failed to build HTTP client: {}", e))
                })?;

            Ok(Self { client, config })
        }

        fn endpoint(&self) -> String {
            format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            )
        }
    }

    fn transport_error(err: reqwest::Error) -> AdvisorError {
        if err.is_timeout() {
            AdvisorError::Timeout
        } else {
            AdvisorError::Transport(err.to_string())
        }
    }

    impl RuleAdvisor for HttpRuleAdvisor {
        fn try_complete(&self, request: &CompletionRequest) -> Result<String, AdvisorError> {
            if request.prompt().trim().is_empty() {
                return Err(AdvisorError::InvalidRequest("prompt is empty".to_string()));
            }

            let body = serde_json::json!({
                "model": self.config.model,
                "messages": [
                    { "role": "system", "content": request.system_message() },
                    { "role": "user", "content": request.prompt() },
                ],
                "temperature": request.temperature(),
                "max_tokens": request.max_tokens(),
            });

            debug!(endpoint = %self.endpoint(), model = %self.config.model, "Requesting completion");

            let response = self
                .client
                .post(self.endpoint())
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .map_err(transport_error)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(AdvisorError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let payload: ChatCompletionResponse = response.json().map_err(transport_error)?;
            payload
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .filter(|content| !content.trim().is_empty())
                .ok_or(AdvisorError::EmptyResponse)
        }
    }
}
