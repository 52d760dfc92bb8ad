//! Minimal MediaWiki API client: log in, look up a file, download it.
//!
//! Only three calls are needed:
//!
//! 1. `action=query&meta=tokens&type=login` then `action=login`: establish a
//!    session (kept in the client's cookie store). Skipped for anonymous use.
//! 2. `action=query&titles=File:<name>&prop=imageinfo&iiprop=url`: resolve a
//!    figure name to a direct URL. Page id `"-1"` means the file does not exist.
//! 3. A plain `GET` of that URL, streamed to disk.

use crate::config::RenderConfig;
use crate::error::SphinxWikiError;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Page id MediaWiki reports for a title that does not exist.
pub const MISSING_PAGE_ID: &str = "-1";

/// Outcome of an imageinfo lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLookup {
    /// No `File:` page with that name.
    Missing,
    /// Direct URL of the current file revision.
    Found { url: String },
}

/// Outcome of downloading an image that the wiki says exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Download {
    Stored { bytes: u64 },
    /// The server answered with a non-success status; nothing was written.
    HttpStatus(u16),
}

// ── API response shapes ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    query: Option<TokenQuery>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    tokens: Tokens,
}

#[derive(Debug, Deserialize)]
struct Tokens {
    logintoken: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    login: Option<LoginResult>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct LoginResult {
    result: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageInfoResponse {
    query: Option<ImageInfoQuery>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ImageInfoQuery {
    #[serde(default)]
    pages: BTreeMap<String, PageInfo>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(default)]
    imageinfo: Vec<ImageInfo>,
}

#[derive(Debug, Deserialize)]
struct ImageInfo {
    url: String,
}

// ── Client ───────────────────────────────────────────────────────────────

/// Session-holding client for one render.
pub struct WikiClient {
    http: reqwest::Client,
    api_url: String,
    credentials: Option<(String, String)>,
    logged_in: bool,
}

impl WikiClient {
    pub fn new(config: &RenderConfig) -> Result<Self, SphinxWikiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .cookie_store(true)
            .user_agent(concat!("sphinx-wiki/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SphinxWikiError::Internal(format!("HTTP client: {e}")))?;

        let credentials = if config.has_credentials() {
            config
                .wiki_username
                .clone()
                .zip(config.wiki_password.clone())
        } else {
            None
        };

        Ok(Self {
            http,
            api_url: config.wiki_api_url.clone(),
            credentials,
            logged_in: false,
        })
    }

    /// Log in once; later calls are no-ops. Anonymous clients never log in.
    pub async fn ensure_logged_in(&mut self) -> Result<(), SphinxWikiError> {
        if self.logged_in {
            return Ok(());
        }
        let Some((user, password)) = self.credentials.clone() else {
            return Ok(());
        };

        let login_err = |reason: String| SphinxWikiError::WikiLogin {
            user: user.clone(),
            reason,
        };

        let token: TokenResponse = self
            .http
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("meta", "tokens"),
                ("type", "login"),
                ("format", "json"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| login_err(e.to_string()))?
            .json()
            .await
            .map_err(|e| login_err(format!("unreadable token response: {e}")))?;

        let token = match (token.query, token.error) {
            (_, Some(err)) => return Err(login_err(format!("{}: {}", err.code, err.info))),
            (Some(q), None) => q.tokens.logintoken,
            (None, None) => return Err(login_err("no login token in response".into())),
        };

        let login: LoginResponse = self
            .http
            .post(&self.api_url)
            .form(&[
                ("action", "login"),
                ("lgname", user.as_str()),
                ("lgpassword", password.as_str()),
                ("lgtoken", token.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| login_err(e.to_string()))?
            .json()
            .await
            .map_err(|e| login_err(format!("unreadable login response: {e}")))?;

        match (login.login, login.error) {
            (_, Some(err)) => Err(login_err(format!("{}: {}", err.code, err.info))),
            (Some(r), None) if r.result == "Success" => {
                info!("Logged in to wiki API as {}", user);
                self.logged_in = true;
                Ok(())
            }
            (Some(r), None) => Err(login_err(match r.reason {
                Some(reason) => format!("{}: {}", r.result, reason),
                None => r.result,
            })),
            (None, None) => Err(login_err("empty login response".into())),
        }
    }

    /// Resolve `File:<name>` to a download URL.
    pub async fn image_url(&self, name: &str) -> Result<ImageLookup, SphinxWikiError> {
        let title = format!("File:{name}");
        let query_err = |reason: String| SphinxWikiError::WikiQuery {
            title: title.clone(),
            reason,
        };

        let resp: ImageInfoResponse = self
            .http
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("titles", title.as_str()),
                ("prop", "imageinfo"),
                ("iiprop", "url"),
                ("format", "json"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| query_err(e.to_string()))?
            .json()
            .await
            .map_err(|e| query_err(format!("unreadable imageinfo response: {e}")))?;

        if let Some(err) = resp.error {
            return Err(query_err(format!("{}: {}", err.code, err.info)));
        }
        let pages = resp
            .query
            .map(|q| q.pages)
            .ok_or_else(|| query_err("response has no 'query' section".into()))?;
        let (page_id, page) = pages
            .into_iter()
            .next()
            .ok_or_else(|| query_err("response lists no pages".into()))?;

        if page_id == MISSING_PAGE_ID {
            return Ok(ImageLookup::Missing);
        }
        let url = page
            .imageinfo
            .into_iter()
            .next()
            .map(|i| i.url)
            .ok_or_else(|| query_err(format!("page {page_id} has no imageinfo")))?;
        debug!("{} -> {}", title, url);
        Ok(ImageLookup::Found { url })
    }

    /// Stream `url` into `dest`.
    ///
    /// Bytes go to a temp file next to `dest` which is renamed into place
    /// once complete, so an interrupted transfer never leaves a truncated
    /// image behind. Transport failures are fatal; an HTTP error status is
    /// reported as [`Download::HttpStatus`].
    pub async fn download(
        &self,
        name: &str,
        url: &str,
        dest: &Path,
    ) -> Result<Download, SphinxWikiError> {
        let fetch_err = |reason: String| SphinxWikiError::ImageFetch {
            name: name.to_string(),
            url: url.to_string(),
            reason,
        };
        let store_err = |source: std::io::Error| SphinxWikiError::ImageStore {
            name: name.to_string(),
            path: dest.to_path_buf(),
            source,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Ok(Download::HttpStatus(status.as_u16()));
        }

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await.map_err(store_err)?;
        let tmp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(parent)
            .map_err(store_err)?;
        let mut file = tokio::fs::File::from_std(tmp.reopen().map_err(store_err)?);

        let mut bytes = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fetch_err(e.to_string()))?;
            file.write_all(&chunk).await.map_err(store_err)?;
            bytes += chunk.len() as u64;
        }
        file.flush().await.map_err(store_err)?;
        drop(file);

        tmp.persist(dest).map_err(|e| store_err(e.error))?;
        Ok(Download::Stored { bytes })
    }
}
