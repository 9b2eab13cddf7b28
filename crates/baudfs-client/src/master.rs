//! Blocking HTTP helper for the master's client-facing surface.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::error::ClientError;

/// Path serving the data partition view.
pub const DATA_PARTITION_VIEW_URL: &str = "/client/dataPartitions";

/// Tries each configured master in order until one answers.
pub struct MasterHelper {
    masters: Vec<String>,
    client: reqwest::blocking::Client,
}

impl MasterHelper {
    pub fn new(masters: Vec<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { masters, client }
    }

    /// Parses a comma-separated master list.
    pub fn from_hosts(master_hosts: &str) -> Self {
        Self::new(
            master_hosts
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
        )
    }

    /// GETs `path` with query `params` from the first master that
    /// returns 200.
    pub fn request(
        &self,
        path: &str,
        params: &HashMap<String, String>,
    ) -> Result<Vec<u8>, ClientError> {
        let mut last_err = String::from("no masters configured");
        for master in &self.masters {
            let url = format!("http://{}{}", master, path);
            let resp = self.client.get(&url).query(params).send();
            match resp {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .bytes()
                        .map(|b| b.to_vec())
                        .map_err(|e| ClientError::MasterRequest(e.to_string()));
                }
                Ok(resp) => {
                    last_err = format!("{}: http {}", master, resp.status());
                    warn!(%master, status = %resp.status(), "master request rejected");
                }
                Err(e) => {
                    last_err = format!("{}: {}", master, e);
                    warn!(%master, error = %e, "master request failed");
                }
            }
        }
        Err(ClientError::MasterRequest(last_err))
    }
}
