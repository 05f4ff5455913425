//! 脚本化 LLM 客户端（用于测试与 headless 回放，无需 API）
//!
//! 按顺序返回预置的响应或错误，并记录每次收到的请求；脚本耗尽时返回 Provider 错误。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ModelRequest, ModelResponse};

#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self::from_results(responses.into_iter().map(Ok))
    }

    pub fn from_results(results: impl IntoIterator<Item = Result<ModelResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// 从 JSON 数组加载脚本（每项为一个 ModelResponse）
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let responses: Vec<ModelResponse> = serde_json::from_str(json)?;
        Ok(Self::new(responses))
    }

    /// 每次调用前等待，模拟网络延迟
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已收到的请求（按调用顺序）
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn send(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::Provider("script lock poisoned".to_string()))?
            .pop_front();
        next.unwrap_or_else(|| Err(LlmError::Provider("script exhausted".to_string())))
    }
}
