//! Talking to the model hub.

use failure::{Error, ResultExt};
use log::{debug, log_enabled, trace, warn};
use reqwest::blocking::{Client, Request, Response};
use reqwest::header::USER_AGENT;
use reqwest::Url;
use sec::Secret;
use serde_derive::{Deserialize, Serialize};
use serde_json::{self, Value};
use std::fmt::{self, Debug, Display, Formatter};
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use crate::config::HubConfig;
use crate::errors::{FailedRequest, InvalidRepoType};

/// Something which can list and fetch the files in a hub repository.
pub trait Hub {
    /// Look up the files available at a particular revision.
    fn repo_info(
        &self,
        repo_id: &str,
        repo_type: RepoType,
        revision: &str,
    ) -> Result<RepoInfo, Error>;

    /// Download a single file to `dest`, returning the number of bytes
    /// written.
    fn download(
        &self,
        repo_id: &str,
        repo_type: RepoType,
        revision: &str,
        filename: &str,
        dest: &Path,
    ) -> Result<u64, Error>;
}

/// The kinds of repository a hub can host.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Model,
    Dataset,
    Space,
}

impl RepoType {
    fn api_segment(&self) -> &'static str {
        match *self {
            RepoType::Model => "models",
            RepoType::Dataset => "datasets",
            RepoType::Space => "spaces",
        }
    }

    /// Models live at the root of the hub, everything else is namespaced.
    fn url_prefix(&self) -> Option<&'static str> {
        match *self {
            RepoType::Model => None,
            RepoType::Dataset => Some("datasets"),
            RepoType::Space => Some("spaces"),
        }
    }
}

impl Default for RepoType {
    fn default() -> RepoType {
        RepoType::Model
    }
}

impl FromStr for RepoType {
    type Err = InvalidRepoType;

    fn from_str(s: &str) -> Result<RepoType, InvalidRepoType> {
        match s {
            "model" => Ok(RepoType::Model),
            "dataset" => Ok(RepoType::Dataset),
            "space" => Ok(RepoType::Space),
            other => Err(InvalidRepoType {
                given: other.to_string(),
            }),
        }
    }
}

impl Display for RepoType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match *self {
            RepoType::Model => "model",
            RepoType::Dataset => "dataset",
            RepoType::Space => "space",
        };
        f.write_str(name)
    }
}

/// The parts of the hub's repository metadata we care about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoInfo {
    /// The commit the revision resolved to.
    pub sha: Option<String>,
    pub siblings: Vec<RepoFile>,
}

impl RepoInfo {
    pub fn filenames(&self) -> impl Iterator<Item = &str> + Clone {
        self.siblings.iter().map(|f| f.rfilename.as_str())
    }

    pub fn file(&self, filename: &str) -> Option<&RepoFile> {
        self.siblings.iter().find(|f| f.rfilename == filename)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoFile {
    /// The file's path relative to the repository root, `/` separated.
    pub rfilename: String,
    /// Only reported when the listing was requested with blob metadata.
    pub size: Option<u64>,
}

/// A [`Hub`] which uses the hub's HTTP API.
#[derive(Clone)]
pub struct HttpHub {
    client: Client,
    endpoint: Url,
    token: Option<Secret<String>>,
    user_agent: String,
}

impl HttpHub {
    pub fn with_config(cfg: &HubConfig) -> Result<HttpHub, Error> {
        let endpoint = Url::parse(cfg.endpoint())
            .with_context(|_| format!("Invalid hub endpoint, {:?}", cfg.endpoint()))?;
        if endpoint.cannot_be_a_base() {
            return Err(failure::err_msg(format!(
                "The hub endpoint must be a http(s) URL, not {:?}",
                cfg.endpoint()
            )));
        }

        let client = Client::builder()
            .build()
            .context("Unable to create the HTTP client")?;

        Ok(HttpHub {
            client,
            endpoint,
            token: cfg.token.clone(),
            user_agent: cfg.user_agent.clone(),
        })
    }

    /// Where to ask for a repository's file listing.
    pub fn info_url(
        &self,
        repo_id: &str,
        repo_type: RepoType,
        revision: &str,
    ) -> Result<Url, Error> {
        let mut url = self.endpoint.clone();

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| failure::err_msg("The hub endpoint can't be a base URL"))?;
            segments
                .pop_if_empty()
                .push("api")
                .push(repo_type.api_segment());
            segments.extend(repo_id.split('/'));
            segments.push("revision").push(revision);
        }

        url.query_pairs_mut().append_pair("blobs", "true");
        Ok(url)
    }

    /// Where to download a particular file from.
    pub fn file_url(
        &self,
        repo_id: &str,
        repo_type: RepoType,
        revision: &str,
        filename: &str,
    ) -> Result<Url, Error> {
        let mut url = self.endpoint.clone();

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| failure::err_msg("The hub endpoint can't be a base URL"))?;
            segments.pop_if_empty();
            if let Some(prefix) = repo_type.url_prefix() {
                segments.push(prefix);
            }
            segments.extend(repo_id.split('/'));
            segments.push("resolve").push(revision);
            segments.extend(filename.split('/'));
        }

        Ok(url)
    }

    fn build_request(&self, url: Url) -> Result<Request, Error> {
        let mut builder = self
            .client
            .get(url)
            .header(USER_AGENT, self.user_agent.as_str());
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token.reveal());
        }

        let request = builder
            .build()
            .context("Generated invalid request. This is a bug.")?;
        Ok(request)
    }

    /// The request's headers, pretty-printed with the access token masked.
    fn redacted_headers(&self, request: &Request) -> String {
        let headers = format!("Request Headers {:#?}", request.headers());

        match self.token {
            Some(ref token) if !token.reveal().is_empty() => {
                headers.replace(token.reveal().as_str(), "XXXXXXXXXX")
            }
            _ => headers,
        }
    }

    fn send_request(&self, url: Url) -> Result<Response, Error> {
        debug!("Sending request to {}", url);

        let request = self.build_request(url.clone())?;

        if log_enabled!(log::Level::Trace) {
            for line in self.redacted_headers(&request).lines() {
                trace!("{}", line);
            }
        }

        let response = self
            .client
            .execute(request)
            .context("Unable to send request")?;

        let status = response.status();
        debug!("Received response ({})", status);

        if log_enabled!(log::Level::Trace) {
            for line in format!("Response Headers {:#?}", response.headers()).lines() {
                trace!("{}", line);
            }
        }

        if !status.is_success() {
            warn!("Request failed with {}", status);

            let err = FailedRequest {
                status,
                url: url.to_string(),
            };
            return Err(err.into());
        }

        Ok(response)
    }
}

impl Hub for HttpHub {
    fn repo_info(
        &self,
        repo_id: &str,
        repo_type: RepoType,
        revision: &str,
    ) -> Result<RepoInfo, Error> {
        let url = self.info_url(repo_id, repo_type, revision)?;
        let response = match self.send_request(url) {
            Ok(response) => response,
            Err(e) => {
                let missing = e
                    .downcast_ref::<FailedRequest>()
                    .map(FailedRequest::is_not_found)
                    .unwrap_or(false);
                if !missing {
                    return Err(e);
                }

                let hint = format!(
                    "Unable to list {}, the repository may be private, gated, \
                     or not exist (try passing a token)",
                    repo_id
                );
                return Err(e.context(hint).into());
            }
        };

        let raw: Value = response.json().context("The response wasn't valid JSON")?;

        if log_enabled!(log::Level::Trace) {
            trace!("Body:");
            let pretty = serde_json::to_string_pretty(&raw).unwrap_or_default();
            for line in pretty.lines() {
                trace!("{}", line);
            }
        }

        let info: RepoInfo =
            serde_json::from_value(raw).context("Unable to deserialize response")?;
        debug!(
            "{} has {} files at {}",
            repo_id,
            info.siblings.len(),
            info.sha.as_ref().map(String::as_str).unwrap_or(revision)
        );

        Ok(info)
    }

    fn download(
        &self,
        repo_id: &str,
        repo_type: RepoType,
        revision: &str,
        filename: &str,
        dest: &Path,
    ) -> Result<u64, Error> {
        let url = self.file_url(repo_id, repo_type, revision, filename)?;
        let mut response = self.send_request(url)?;

        let mut file = File::create(dest)
            .with_context(|_| format!("Unable to create {}", dest.display()))?;
        let bytes = response
            .copy_to(&mut file)
            .context("Unable to read the response body")?;

        trace!("Wrote {} bytes to {}", bytes, dest.display());
        Ok(bytes)
    }
}

impl Debug for HttpHub {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("HttpHub")
            .field("endpoint", &self.endpoint.as_str())
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}
