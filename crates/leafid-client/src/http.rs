use crate::builder::base_url;
use crate::{Error, Result};
use core::time::Duration;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

/// Client for the HTTP API (`GET /api/v1/next/{key}`).
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: reqwest::Client,
    base: Url,
}

/// Either `{"id": N}` or `{"msg": "..."}`.
#[derive(Debug, Deserialize)]
struct ResultBody {
    id: Option<u64>,
    msg: Option<String>,
}

impl HttpClient {
    pub(crate) fn new(addr: &str, timeout: Option<Duration>) -> Result<Self> {
        let base = Url::parse(&base_url(addr))
            .map_err(|e| Error::InvalidConfig(format!("invalid http address {addr:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "invalid http address {addr:?}"
            )));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let inner = builder
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        Ok(Self { inner, base })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) async fn next(&self, key: &str, step: u32) -> Result<u64> {
        let mut url = self.url(&["api", "v1", "next", key]);
        if step != 0 {
            url.query_pairs_mut()
                .append_pair("step", &step.to_string());
        }

        let response = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let result: ResultBody =
            serde_json::from_slice(&body).map_err(|e| Error::ResultNotRecognized {
                status: status.as_u16(),
                reason: e.to_string(),
            })?;

        match (status.is_success(), result) {
            (true, ResultBody { id: Some(id), .. }) => Ok(id),
            (false, ResultBody { msg: Some(msg), .. }) => Err(classify(status, msg)),
            _ => Err(Error::ResultNotRecognized {
                status: status.as_u16(),
                reason: "expected an id or an error message".into(),
            }),
        }
    }

    pub(crate) async fn ping(&self) -> Result<()> {
        let response = self
            .inner
            .get(self.url(&["api", "v1", "health"]))
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(classify(status, format!("health check returned {status}"))),
        }
    }
}

fn classify(status: StatusCode, msg: String) -> Error {
    match status {
        StatusCode::BAD_REQUEST => Error::WrongRequestFormat(msg),
        StatusCode::INTERNAL_SERVER_ERROR => Error::Server(msg),
        StatusCode::SERVICE_UNAVAILABLE => Error::Unavailable(msg),
        _ => Error::GetIdFailed(msg),
    }
}
