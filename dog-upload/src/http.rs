//! HTTP implementations of the signed-POST seams.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde_json::{json, Value};
use tracing::debug;

use crate::{FormUploader, PolicyIssuer, UploadCtx, UploadError, UploadPolicy, UploadResult};

/// Asks a trusted endpoint for a pre-authorized POST target.
///
/// Sends `{"path", "contentType"}` with the caller's bearer token. The reply
/// may carry the policy at the root or wrapped in `result` / `data`.
#[derive(Debug, Clone)]
pub struct HttpPolicyIssuer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPolicyIssuer {
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client<S: Into<String>>(client: reqwest::Client, endpoint: S) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PolicyIssuer for HttpPolicyIssuer {
    async fn request_upload_policy(
        &self,
        ctx: &UploadCtx,
        path: &str,
        content_type: &str,
    ) -> UploadResult<UploadPolicy> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "path": path, "contentType": content_type }));
        if let Some(token) = ctx.credentials() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.json::<Value>().await?;
        let policy = extract_policy(body)?;
        debug!(path = %path, fields = policy.form_fields.len(), "received upload policy");
        Ok(policy)
    }
}

/// Posts the payload as `multipart/form-data`: policy fields first, then the
/// file part.
#[derive(Debug, Clone, Default)]
pub struct HttpFormUploader {
    client: reqwest::Client,
}

impl HttpFormUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FormUploader for HttpFormUploader {
    async fn submit(
        &self,
        policy: &UploadPolicy,
        body: Bytes,
        content_type: &str,
    ) -> UploadResult<()> {
        let mut form = Form::new();
        for (key, value) in &policy.form_fields {
            form = form.text(key.clone(), value.clone());
        }
        // Storage services ignore fields that come after the file
        let length = body.len() as u64;
        let file = Part::stream_with_length(Body::from(body), length)
            .file_name("upload")
            .mime_str(content_type)?;
        form = form.part("file", file);

        let response = self
            .client
            .post(&policy.post_url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(UploadError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn extract_policy(body: Value) -> UploadResult<UploadPolicy> {
    let wrapped = ["result", "data"]
        .iter()
        .find_map(|key| body.get(*key).filter(|v| v.get("url").is_some()).cloned());
    let candidate = wrapped.unwrap_or(body);

    let has_url = candidate.get("url").and_then(Value::as_str).is_some();
    let has_fields = candidate.get("fields").map(Value::is_object).unwrap_or(false);
    if !has_url || !has_fields {
        return Err(UploadError::policy_issuance("upload policy requires url and fields"));
    }

    Ok(serde_json::from_value(candidate)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_at_root() {
        let policy = extract_policy(json!({
            "url": "https://storage.test/upload",
            "fields": { "key": "covers/1.jpg", "policy": "abc" }
        }))
        .unwrap();
        assert_eq!(policy.post_url, "https://storage.test/upload");
        assert_eq!(policy.form_fields.len(), 2);
    }

    #[test]
    fn test_policy_wrapped() {
        let wrapped = json!({ "result": { "url": "https://a", "fields": {} } });
        assert_eq!(extract_policy(wrapped).unwrap().post_url, "https://a");

        let data = json!({ "data": { "url": "https://b", "fields": { "k": "v" } } });
        assert_eq!(extract_policy(data).unwrap().post_url, "https://b");
    }

    #[test]
    fn test_policy_missing_fields_is_rejected() {
        let err = extract_policy(json!({ "url": "https://a" })).unwrap_err();
        assert!(matches!(err, UploadError::PolicyIssuance { .. }));
        let attempt = crate::AttemptError::from(err);
        assert!(matches!(attempt, crate::AttemptError::PolicyIssuance(_)));
        assert!(!attempt.is_retryable());
        assert!(extract_policy(json!({ "result": {} })).is_err());
    }
}
