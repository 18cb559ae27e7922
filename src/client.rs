use crate::store::{ObjectStore, Scope};
use anyhow::{Context, Result, anyhow};
use reqwest::blocking::{Client, RequestBuilder, multipart};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_HOST: &str = "api.mist.com";

#[derive(Debug, Clone)]
pub struct ResponseData {
    pub body: String,
    pub json: Option<Value>,
}

impl ResponseData {
    fn into_json(self, what: &str) -> Result<Value> {
        self.json
            .ok_or_else(|| anyhow!("{what}: response was not JSON: {}", truncate(&self.body)))
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: Client,
    api_token: String,
}

impl ApiClient {
    /// `host` is either a bare cloud host (`api.eu.mist.com`) or a full URL.
    pub fn new(host: &str, api_token: &str) -> Result<Self> {
        let base_url = base_url(host)?;
        let http = Client::builder()
            .user_agent(concat!("mistrestore/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            base_url,
            http,
            api_token: api_token.to_string(),
        })
    }

    pub fn get(&self, path: &str) -> Result<ResponseData> {
        self.request(Method::GET, path, Option::<&Value>::None)
    }

    pub fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ResponseData> {
        self.request(Method::POST, path, Some(body))
    }

    pub fn put_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ResponseData> {
        self.request(Method::PUT, path, Some(body))
    }

    /// The account behind the token; used to check credentials.
    pub fn whoami(&self) -> Result<Value> {
        self.get("self")?.into_json("reading account")
    }

    pub fn get_org(&self, org_id: &str) -> Result<Value> {
        self.get(&format!("orgs/{org_id}"))?
            .into_json("reading org")
    }

    pub fn org_name(&self, org_id: &str) -> Result<String> {
        let org = self.get_org(org_id)?;
        org.get("name")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| anyhow!("org {org_id} has no name"))
    }

    /// Creates an empty organization and returns its id.
    pub fn create_org(&self, name: &str) -> Result<String> {
        let org = self
            .post_json("orgs", &json!({ "name": name }))?
            .into_json("creating org")?;
        org.get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| anyhow!("created org has no id"))
    }

    fn url(&self, path: &str) -> Result<Url> {
        let normalized = path.trim_start_matches('/');
        self.base_url
            .join(&format!("api/v1/{normalized}"))
            .with_context(|| format!("joining path `{path}` to base URL"))
    }

    fn builder(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(AUTHORIZATION, format!("Token {}", self.api_token))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
    }

    fn request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<ResponseData> {
        let url = self.url(path)?;
        debug!(%method, %url, "sending request");
        let mut request = self.builder(method.clone(), url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request, &method, path, &url)
    }

    fn upload(&self, path: &str, file: &Path) -> Result<ResponseData> {
        let url = self.url(path)?;
        debug!(%url, file = %file.display(), "uploading file");
        let form = multipart::Form::new()
            .file("file", file)
            .with_context(|| format!("opening {}", file.display()))?;
        let request = self.builder(Method::POST, url.clone()).multipart(form);
        self.send(request, &Method::POST, path, &url)
    }

    fn send(
        &self,
        request: RequestBuilder,
        method: &Method,
        path: &str,
        url: &Url,
    ) -> Result<ResponseData> {
        let response = request
            .send()
            .with_context(|| format!("sending request to {url}"))?;

        let status = response.status();
        let text = response.text().context("reading response body")?;
        if !status.is_success() {
            return Err(anyhow!(format_error_message(method, path, status, &text, url)));
        }

        let json = serde_json::from_str(&text).ok();
        debug!(status = status.as_u16(), "request succeeded");
        Ok(ResponseData {
            body: text,
            json,
        })
    }
}

impl ObjectStore for ApiClient {
    fn create(&self, scope: &Scope, collection: &str, body: &Value) -> Result<Value> {
        self.post_json(&format!("{}/{collection}", scope.path()), body)?
            .into_json(&format!("creating {collection}"))
    }

    fn update_setting(&self, scope: &Scope, body: &Value) -> Result<Value> {
        self.put_json(&format!("{}/setting", scope.path()), body)?
            .into_json("updating settings")
    }

    fn import(&self, scope: &Scope, collection: &str, body: &Value) -> Result<Value> {
        let response = self.post_json(&format!("{}/{collection}/import", scope.path()), body)?;
        Ok(response.json.unwrap_or(Value::Null))
    }

    fn update_org(&self, org_id: &str, body: &Value) -> Result<Value> {
        self.put_json(&format!("orgs/{org_id}"), body)?
            .into_json("updating org")
    }

    fn update_portal_template(
        &self,
        scope: &Scope,
        wlan_id: &str,
        body: &Value,
    ) -> Result<Value> {
        let response = self.put_json(
            &format!("{}/wlans/{wlan_id}/portal_template", scope.path()),
            body,
        )?;
        Ok(response.json.unwrap_or(Value::Null))
    }

    fn upload_portal_image(&self, scope: &Scope, wlan_id: &str, image: &Path) -> Result<()> {
        self.upload(
            &format!("{}/wlans/{wlan_id}/portal_image", scope.path()),
            image,
        )
        .map(|_| ())
    }

    fn upload_map_image(&self, site_id: &str, map_id: &str, image: &Path) -> Result<()> {
        self.upload(&format!("sites/{site_id}/maps/{map_id}/image"), image)
            .map(|_| ())
    }
}

fn base_url(host: &str) -> Result<Url> {
    let host = host.trim().trim_end_matches('/');
    let raw = if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}/")
    } else {
        format!("https://{host}/")
    };
    Url::parse(&raw).with_context(|| format!("parsing API host `{host}`"))
}

fn format_error_message(
    method: &Method,
    path: &str,
    status: StatusCode,
    body: &str,
    url: &Url,
) -> String {
    let operation = match *method {
        Method::POST => "create",
        Method::PUT => "update",
        Method::DELETE => "delete",
        Method::GET => "fetch",
        _ => "operate on",
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return format!(
            "Authentication failed ({}) at {url}\n\nPossible causes:\n  • API token revoked or expired\n  • Token has no write access to this organization\n\nTry:\n  mistrestore validate",
            status.as_u16()
        );
    }

    if status == StatusCode::NOT_FOUND {
        return format!("Resource not found (404) while trying to {operation} {path}");
    }

    let mut msg = format!("Failed to {operation} {path}: HTTP {}", status.as_u16());
    match serde_json::from_str::<Value>(body) {
        Ok(json) => {
            if let Some(detail) = json
                .get("detail")
                .or_else(|| json.get("error"))
                .and_then(Value::as_str)
            {
                msg.push_str(&format!("\n\nError: {detail}"));
            }
        }
        Err(_) if !body.trim().is_empty() => {
            msg.push_str(&format!("\n\nResponse: {}", truncate(body)));
        }
        Err(_) => {}
    }
    msg
}

fn truncate(body: &str) -> String {
    if body.chars().count() > 200 {
        format!("{}...", body.chars().take(200).collect::<String>())
    } else {
        body.to_string()
    }
}
