//! Minimal Tuya Cloud OpenAPI client.
//!
//! Only the calls needed to read a device's online flag are implemented.
//! Every request is signed with HMAC-SHA256 over
//! `client_id [+ access_token] + t + stringToSign`, where
//!
//! ```text
//! stringToSign = METHOD \n sha256(body) \n <signed headers> \n path?query
//! ```
//!
//! No headers are signed, so the third line is always empty.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use log::{debug, warn};
use serde_derive::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::TuyaConfig;
use crate::source::{DeviceDetails, SourceError, StatusSource};

const TOKEN_PATH: &str = "/v1.0/token?grant_type=1";
const SIGN_METHOD: &str = "HMAC-SHA256";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
// Refresh a little early so a token never expires mid-request.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const TOKEN_INVALID_CODE: &str = "1010";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    code: Option<Value>,
    msg: Option<String>,
    result: Option<Value>,
}

impl Envelope {
    fn into_result(self) -> Result<Value, SourceError> {
        if !self.success {
            let code = match self.code {
                Some(Value::String(code)) => code,
                Some(code) => code.to_string(),
                None => "unknown".to_string(),
            };
            return Err(SourceError::Api {
                code,
                msg: self.msg.unwrap_or_else(|| "Unknown error".to_string()),
            });
        }
        match self.result {
            Some(Value::Null) | None => Err(SourceError::InvalidResponse(
                "Tuya API returned empty result".to_string(),
            )),
            Some(result) => Ok(result),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResult {
    access_token: String,
    expire_time: u64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct TuyaClient {
    client: reqwest::Client,
    endpoint: String,
    access_id: String,
    access_key: String,
    token: Mutex<Option<AccessToken>>,
}

impl TuyaClient {
    pub fn new(config: &TuyaConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(TuyaClient {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_id: config.access_id.clone(),
            access_key: config.access_key.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, SourceError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
            debug!("Tuya access token expired, refreshing");
        }

        let t = timestamp_millis();
        let payload = format!(
            "{}{}{}",
            self.access_id,
            t,
            string_to_sign("GET", b"", TOKEN_PATH)
        );
        let envelope: Envelope = self
            .client
            .get(format!("{}{}", self.endpoint, TOKEN_PATH))
            .header("client_id", &self.access_id)
            .header("sign", sign(&self.access_key, &payload))
            .header("t", &t)
            .header("sign_method", SIGN_METHOD)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let result: TokenResult = serde_json::from_value(envelope.into_result()?)
            .map_err(|e| SourceError::InvalidResponse(format!("token result: {e}")))?;
        let lifetime = Duration::from_secs(result.expire_time).saturating_sub(TOKEN_EXPIRY_MARGIN);
        debug!("Obtained Tuya access token valid for {}s", lifetime.as_secs());

        let token = AccessToken {
            value: result.access_token,
            expires_at: Instant::now() + lifetime,
        };
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn get(&self, path: &str) -> Result<Value, SourceError> {
        let access_token = self.access_token().await?;
        let t = timestamp_millis();
        let payload = format!(
            "{}{}{}{}",
            self.access_id,
            access_token,
            t,
            string_to_sign("GET", b"", path)
        );

        let envelope: Envelope = self
            .client
            .get(format!("{}{}", self.endpoint, path))
            .header("client_id", &self.access_id)
            .header("access_token", &access_token)
            .header("sign", sign(&self.access_key, &payload))
            .header("t", &t)
            .header("sign_method", SIGN_METHOD)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let result = envelope.into_result();
        if let Err(SourceError::Api { code, .. }) = &result {
            if code == TOKEN_INVALID_CODE {
                warn!("Tuya rejected the access token, it will be refreshed on the next request");
                *self.token.lock().await = None;
            }
        }
        result
    }
}

#[async_trait]
impl StatusSource for TuyaClient {
    async fn online_status(&self, device_id: &str) -> Result<bool, SourceError> {
        let result = self.get(&format!("/v1.0/devices/{device_id}")).await?;
        parse_online(&result)
    }

    async fn device_details(&self, device_id: &str) -> Result<DeviceDetails, SourceError> {
        let result = self.get(&format!("/v1.0/devices/{device_id}")).await?;
        Ok(parse_details(&result))
    }
}

fn parse_online(result: &Value) -> Result<bool, SourceError> {
    match result.get("online") {
        Some(Value::Bool(online)) => Ok(*online),
        Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
        _ => Err(SourceError::InvalidResponse(
            "device online status not found in response".to_string(),
        )),
    }
}

fn parse_details(result: &Value) -> DeviceDetails {
    let text = |key: &str| result.get(key).and_then(Value::as_str).map(str::to_string);
    DeviceDetails {
        name: text("name"),
        category: text("category"),
        online: parse_online(result).ok(),
    }
}

fn string_to_sign(method: &str, body: &[u8], path_and_query: &str) -> String {
    let body_hash = hex::encode(Sha256::digest(body));
    format!("{method}\n{body_hash}\n\n{path_and_query}")
}

fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    hex::encode_upper(mac.finalize().into_bytes())
}

fn timestamp_millis() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope(value: Value) -> Envelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_string_to_sign_hashes_empty_body() {
        assert_eq!(
            string_to_sign("GET", b"", "/v1.0/devices/abc"),
            "GET\ne3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855\n\n/v1.0/devices/abc"
        );
    }

    #[test]
    fn test_sign_is_uppercase_hmac_sha256() {
        assert_eq!(
            sign("Jefe", "what do ya want for nothing?"),
            "5BDCC146BF60754E6A042426089575C75A003F089D2739839DEC58B964EC3843"
        );
    }

    #[test]
    fn test_api_error_carries_code_and_message() {
        let err = envelope(json!({"success": false, "code": 1106, "msg": "permission deny"}))
            .into_result()
            .unwrap_err();
        match err {
            SourceError::Api { code, msg } => {
                assert_eq!(code, "1106");
                assert_eq!(msg, "permission deny");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_result_is_invalid() {
        let err = envelope(json!({"success": true, "result": null}))
            .into_result()
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_online() {
        let result = envelope(json!({"success": true, "result": {"id": "x", "online": true}}))
            .into_result()
            .unwrap();
        assert!(parse_online(&result).unwrap());
        assert!(!parse_online(&json!({"online": false})).unwrap());
        assert!(matches!(
            parse_online(&json!({"name": "plug"})),
            Err(SourceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_details() {
        let details = parse_details(&json!({"name": "Hall plug", "category": "cz", "online": true}));
        assert_eq!(details.name.as_deref(), Some("Hall plug"));
        assert_eq!(details.category.as_deref(), Some("cz"));
        assert_eq!(details.online, Some(true));

        let details = parse_details(&json!({}));
        assert_eq!(details.name, None);
        assert_eq!(details.online, None);
    }
}
