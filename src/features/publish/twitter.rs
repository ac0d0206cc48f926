use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::STANDARD as base64_engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::{Client, Method, StatusCode, header};
use serde::Deserialize;
use sha1::Sha1;

use crate::config::TwitterConfig;
use crate::error::PipelineError;
use crate::features::users::models::TwitterAccount;

type HmacSha1 = Hmac<Sha1>;

/// 已上传媒体的句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle(pub String);

/// 已发布内容的 id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostId(pub String);

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 社交平台发布接口
pub trait SocialPlatform: Send + Sync {
    /// 凭据有效返回 true，被吊销/失效返回 false
    fn verify_credentials(
        &self,
        account: &TwitterAccount,
    ) -> impl Future<Output = Result<bool, PipelineError>> + Send;

    fn upload_media(
        &self,
        account: &TwitterAccount,
        png: &[u8],
    ) -> impl Future<Output = Result<MediaHandle, PipelineError>> + Send;

    fn post(
        &self,
        account: &TwitterAccount,
        caption: &str,
        media: &MediaHandle,
    ) -> impl Future<Output = Result<PostId, PipelineError>> + Send;
}

fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// OAuth 1.0a HMAC-SHA1 签名
///
/// `params` 需包含全部 oauth_* 参数以及查询串/表单参数（未编码）。
pub fn oauth_signature(
    method: &str,
    url: &str,
    params: &[(String, String)],
    consumer_secret: &str,
    token_secret: &str,
) -> Result<String, PipelineError> {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    encoded.sort();
    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let base = format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(url),
        encode(&param_string)
    );
    let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));

    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| PipelineError::Internal(format!("HMAC key: {e}")))?;
    mac.update(base.as_bytes());
    Ok(base64_engine.encode(mac.finalize().into_bytes()))
}

#[derive(Deserialize)]
struct MediaUploadResponse {
    media_id_string: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    id_str: String,
}

/// Twitter v1.1 客户端（用户上下文 OAuth 1.0a）
#[derive(Clone)]
pub struct TwitterClient {
    client: Client,
    api_base: String,
    upload_base: String,
    consumer_key: String,
    consumer_secret: String,
}

impl TwitterClient {
    pub fn new(client: Client, cfg: &TwitterConfig) -> Self {
        Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            upload_base: cfg.upload_base.trim_end_matches('/').to_string(),
            consumer_key: cfg.consumer_key.clone(),
            consumer_secret: cfg.consumer_secret.clone(),
        }
    }

    fn authorization_header(
        &self,
        method: &Method,
        url: &str,
        account: &TwitterAccount,
        request_params: &[(&str, &str)],
    ) -> Result<String, PipelineError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
            .to_string();
        let nonce = hex::encode(rand::thread_rng().r#gen::<[u8; 16]>());

        let mut oauth: Vec<(String, String)> = vec![
            ("oauth_consumer_key".into(), self.consumer_key.clone()),
            ("oauth_nonce".into(), nonce),
            ("oauth_signature_method".into(), "HMAC-SHA1".into()),
            ("oauth_timestamp".into(), timestamp),
            ("oauth_token".into(), account.token.clone()),
            ("oauth_version".into(), "1.0".into()),
        ];

        let mut all = oauth.clone();
        all.extend(
            request_params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        let signature = oauth_signature(
            method.as_str(),
            url,
            &all,
            &self.consumer_secret,
            &account.token_secret,
        )?;
        oauth.push(("oauth_signature".into(), signature));

        let fields = oauth
            .iter()
            .map(|(k, v)| format!(r#"{}="{}""#, encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {fields}"))
    }

    async fn signed_form_post(
        &self,
        url: &str,
        account: &TwitterAccount,
        form: &[(&str, &str)],
        wrap: fn(String) -> PipelineError,
    ) -> Result<reqwest::Response, PipelineError> {
        let auth = self.authorization_header(&Method::POST, url, account, form)?;
        let body = form
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.client
            .post(url)
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| wrap(e.to_string()))
    }
}

impl SocialPlatform for TwitterClient {
    async fn verify_credentials(&self, account: &TwitterAccount) -> Result<bool, PipelineError> {
        if account.token.is_empty() || account.token_secret.is_empty() {
            return Ok(false);
        }
        let url = format!("{}/account/verify_credentials.json", self.api_base);
        let auth = self.authorization_header(&Method::GET, &url, account, &[])?;
        let resp = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            StatusCode::TOO_MANY_REQUESTS => Err(PipelineError::RemoteRateLimited(
                "verify_credentials 返回 429".to_string(),
            )),
            s => Err(PipelineError::RemoteUnavailable(format!(
                "verify_credentials 返回 {s}"
            ))),
        }
    }

    async fn upload_media(
        &self,
        account: &TwitterAccount,
        png: &[u8],
    ) -> Result<MediaHandle, PipelineError> {
        let url = format!("{}/media/upload.json", self.upload_base);
        let media_data = base64_engine.encode(png);
        let resp = self
            .signed_form_post(
                &url,
                account,
                &[("media_data", media_data.as_str())],
                PipelineError::UploadFailed,
            )
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::UploadFailed(format!("HTTP {status}: {text}")));
        }
        let parsed: MediaUploadResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::UploadFailed(format!("响应解析失败: {e}")))?;
        Ok(MediaHandle(parsed.media_id_string))
    }

    async fn post(
        &self,
        account: &TwitterAccount,
        caption: &str,
        media: &MediaHandle,
    ) -> Result<PostId, PipelineError> {
        let url = format!("{}/statuses/update.json", self.api_base);
        let resp = self
            .signed_form_post(
                &url,
                account,
                &[("status", caption), ("media_ids", media.0.as_str())],
                PipelineError::PublishFailed,
            )
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::PublishFailed(format!("HTTP {status}: {text}")));
        }
        let parsed: StatusResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::PublishFailed(format!("响应解析失败: {e}")))?;
        Ok(PostId(parsed.id_str))
    }
}
