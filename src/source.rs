use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error: {code} - {msg}")]
    Api { code: String, msg: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDetails {
    pub name: Option<String>,
    pub category: Option<String>,
    pub online: Option<bool>,
}

/// Remote service reporting whether a device is currently online.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn online_status(&self, device_id: &str) -> Result<bool, SourceError>;

    async fn device_details(&self, device_id: &str) -> Result<DeviceDetails, SourceError>;
}
