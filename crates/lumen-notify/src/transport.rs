use crate::NotifyError;
use async_trait::async_trait;
use std::time::Duration;

/// 出站投递能力
///
/// 通知渠道与指标、日志上报共用。每次调用都可能失败，调用方负责计数与记录。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, endpoint: &str, payload: &serde_json::Value)
        -> Result<(), NotifyError>;
}

/// 基于 HTTP POST 的投递
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Transport(format!(
                "{} responded with status {}",
                endpoint,
                response.status()
            )))
        }
    }
}
