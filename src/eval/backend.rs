//! Remote evaluator client.
//!
//! The service exposes two endpoints, both taking the snippet as a
//! plain-text body:
//!
//! * `POST {base}/single-eval`: fresh throwaway session
//! * `POST {base}/eval/{session}`: persistent session keyed by user
//!
//! `?startupScriptId=CUSTOM_DEFAULT` preloads the service's default imports.
//! The session id is percent-encoded as a single path segment.

use reqwest::{Client, Url};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, error};

use super::EvalError;

const STARTUP_SCRIPT_QUERY: &str = "startupScriptId=CUSTOM_DEFAULT";

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnippetStatus {
    Valid,
    RecoverableDefined,
    RecoverableNotDefined,
    Rejected,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnippetType {
    Addition,
    Modification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalException {
    pub exception_class: String,
    #[serde(default)]
    pub exception_message: String,
}

/// One evaluation reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    pub status: SnippetStatus,
    #[serde(rename = "type")]
    pub kind: SnippetType,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub exception: Option<EvalException>,
    /// The service cut stdout short before sending it.
    #[serde(default)]
    pub stdout_overflow: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

// ── Backend ───────────────────────────────────────────────────────────────────

/// Something that can evaluate snippets. Calls block until the reply is in.
pub trait EvalBackend: Send + Sync {
    fn eval_once(&self, code: &str, startup_script: bool) -> Result<EvalResult, EvalError>;

    fn eval_session(
        &self,
        code: &str,
        session_id: &str,
        startup_script: bool,
    ) -> Result<EvalResult, EvalError>;
}

/// HTTP client for the evaluation service.
///
/// Requests run on the async client and are driven to completion with
/// [`Handle::block_on`], so calls must come from outside the runtime's
/// worker threads (handlers run on the blocking pool).
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    runtime: Handle,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout_seconds: u64, runtime: Handle) -> Result<Self, EvalError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| EvalError::ConnectionFailed(format!("failed to build HTTP client: {e}")))?;
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| EvalError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(EvalError::InvalidUrl(format!("{base_url}: not a base URL")));
        }
        Ok(Self {
            client,
            base_url,
            runtime,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends `segments` to the base path, each escaped on its own.
    fn url(&self, segments: &[&str], startup_script: bool) -> Result<Url, EvalError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| EvalError::InvalidUrl(format!("{}: not a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        url.set_query(startup_script.then_some(STARTUP_SCRIPT_QUERY));
        Ok(url)
    }

    fn post(&self, url: Url, code: &str) -> Result<EvalResult, EvalError> {
        debug!(%url, bytes = code.len(), "sending snippet for evaluation");
        let request = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "text/plain")
            .body(code.to_string());

        self.runtime.block_on(async move {
            let response = request
                .send()
                .await
                .map_err(|e| EvalError::ConnectionFailed(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<failed to read error body>".to_string());
                error!(%status, %url, "evaluation request returned HTTP error");
                return Err(EvalError::RequestFailed {
                    status: status.as_u16(),
                    body,
                });
            }

            response
                .json::<EvalResult>()
                .await
                .map_err(|e| EvalError::BadReply(e.to_string()))
        })
    }
}

impl EvalBackend for HttpBackend {
    fn eval_once(&self, code: &str, startup_script: bool) -> Result<EvalResult, EvalError> {
        self.post(self.url(&["single-eval"], startup_script)?, code)
    }

    fn eval_session(
        &self,
        code: &str,
        session_id: &str,
        startup_script: bool,
    ) -> Result<EvalResult, EvalError> {
        // Dot segments would be dropped by URL normalisation and hit another endpoint.
        if matches!(session_id, "" | "." | "..") {
            return Err(EvalError::InvalidUrl(format!("session id {session_id:?}")));
        }
        self.post(self.url(&["eval", session_id], startup_script)?, code)
    }
}
