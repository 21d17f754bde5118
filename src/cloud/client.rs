//! Vendor cloud API client
//!
//! Two API surfaces share one session: the account API (login, device listing)
//! and the device API (sensor values). The client builds URLs, performs the
//! GET, unwraps JSONP envelopes and classifies response codes. It never
//! retries; callers own their retry policy.

use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::cloud::session::Session;
use crate::cloud::transport::HttpTransport;
use crate::config::CloudConfig;
use crate::error::CloudError;
use crate::util::redact_url;

/// Account API: request succeeded
pub const CODE_SUCCESS: i64 = 2000;
/// Account API: credentials or session rejected
pub const CODE_LOGIN_FAILED: i64 = 102;
/// Account API: server busy
pub const CODE_BUSY: i64 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Account,
    Device,
}

impl Surface {
    /// The session token travels under a different name on each surface.
    pub fn token_param(&self) -> &'static str {
        match self {
            Surface::Account => "safeToken",
            Surface::Device => "saveToken",
        }
    }
}

pub struct CloudClient {
    transport: Arc<dyn HttpTransport>,
    config: CloudConfig,
}

impl CloudClient {
    pub fn new(transport: Arc<dyn HttpTransport>, config: CloudConfig) -> Self {
        Self { transport, config }
    }

    /// Session parameters merged with call-specific ones; extras win on key clashes.
    pub fn build_url(
        &self,
        session: &Session,
        surface: Surface,
        function: &str,
        extra_params: &[(&str, String)],
    ) -> Result<Url, CloudError> {
        let base = match surface {
            Surface::Account => &self.config.account_base_url,
            Surface::Device => &self.config.device_base_url,
        };

        let mut params: Vec<(&str, String)> = vec![
            ("uid", session.uid().to_string()),
            (surface.token_param(), session.token().to_string()),
        ];
        for (key, value) in extra_params {
            match params.iter().position(|(k, _)| k == key) {
                Some(i) => params[i].1 = value.clone(),
                None => params.push((*key, value.clone())),
            }
        }

        let url = format!("{}{}", base, function);
        Url::parse_with_params(&url, &params)
            .map_err(|e| CloudError::Transport(format!("invalid URL {}: {}", url, e)))
    }

    /// Query the cloud, degrading every failure to `None`.
    ///
    /// Auth failures invalidate `session` so the next `ensure_connected` logs in again.
    pub async fn query(
        &self,
        session: &mut Session,
        surface: Surface,
        function: &str,
        extra_params: &[(&str, String)],
    ) -> Option<Value> {
        match self.try_query(session, surface, function, extra_params).await {
            Ok(value) => Some(value),
            Err(e) => {
                if e.is_auth_failure() {
                    session.invalidate();
                }
                match e {
                    CloudError::Transport(_)
                    | CloudError::HttpStatus(_)
                    | CloudError::MalformedBody(_) => {
                        tracing::warn!("[Cloud] {} request failed: {}", function, e)
                    }
                    _ => tracing::error!("[Cloud] {} failed: {}", function, e),
                }
                None
            }
        }
    }

    async fn try_query(
        &self,
        session: &Session,
        surface: Surface,
        function: &str,
        extra_params: &[(&str, String)],
    ) -> Result<Value, CloudError> {
        let url = self.build_url(session, surface, function, extra_params)?;
        tracing::debug!("[Cloud] Querying {}", redact_url(&url));

        let user_agent = match surface {
            Surface::Account => &self.config.account_user_agent,
            Surface::Device => &self.config.device_user_agent,
        };

        let resp = self
            .transport
            .get(&url, user_agent, self.config.query_timeout())
            .await?;
        tracing::debug!("[Cloud] {} returned HTTP {}", function, resp.status);

        if resp.status != 200 && resp.status != 204 {
            return Err(CloudError::HttpStatus(resp.status));
        }

        let value = parse_body(&resp.body)?;
        classify(surface, value)
    }
}

/// Strip a `callbackName(...)` JSONP envelope, if there is one.
pub fn strip_jsonp(body: &str) -> &str {
    let trimmed = body.trim();
    let inner = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();

    let (Some(open), true) = (inner.find('('), inner.ends_with(')')) else {
        return trimmed;
    };

    let callback = &inner[..open];
    let is_identifier = !callback.is_empty()
        && callback
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.');

    if is_identifier {
        &inner[open + 1..inner.len() - 1]
    } else {
        trimmed
    }
}

pub fn parse_body(body: &[u8]) -> Result<Value, CloudError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| CloudError::MalformedBody(format!("not UTF-8: {}", e)))?;
    Ok(serde_json::from_str(strip_jsonp(text))?)
}

/// Map API-level result codes onto the error taxonomy.
pub fn classify(surface: Surface, value: Value) -> Result<Value, CloudError> {
    match surface {
        Surface::Account => {
            let code = int_field(&value, "code")
                .ok_or_else(|| CloudError::MalformedBody("missing \"code\"".to_string()))?;
            match code {
                CODE_SUCCESS => Ok(value),
                CODE_LOGIN_FAILED => Err(CloudError::AuthFailure),
                CODE_BUSY => Err(CloudError::Busy),
                code => Err(CloudError::Api { code }),
            }
        }
        Surface::Device => {
            let return_code = int_field(&value, "returnCode").ok_or_else(|| {
                CloudError::MalformedBody("missing \"returnCode\"".to_string())
            })?;
            if return_code != 0 {
                return Err(CloudError::DeviceRejected { return_code });
            }
            Ok(value)
        }
    }
}

/// Integer field that may be encoded as a JSON number or a numeric string.
fn int_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
