//! REDCap-style record API over HTTP.
//!
//! Both registries speak the same form-encoded protocol: records are
//! exported as a flat JSON array and imported one at a time, the server
//! answering with a write count. Imports overwrite stored values unless the
//! client was built with [`RedcapClient::keep_existing_values`].

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use cohort_core::config::EndpointConfig;
use cohort_core::FlatRecord;
use cohort_sync::{ImportAck, RecordExport, RecordImport, TransportError};

const TIMEOUT: Duration = Duration::from_secs(60);

pub struct RedcapClient {
    name: String,
    url: String,
    token: String,
    overwrite: bool,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

impl RedcapClient {
    pub fn new(name: &str, endpoint: &EndpointConfig) -> Self {
        Self {
            name: name.to_owned(),
            url: endpoint.url.clone(),
            token: endpoint.token.clone(),
            overwrite: true,
            agent: ureq::AgentBuilder::new().timeout(TIMEOUT).build(),
        }
    }

    /// Import with `overwriteBehavior=normal`: blank values never erase
    /// stored ones.
    pub fn keep_existing_values(mut self) -> Self {
        self.overwrite = false;
        self
    }

    fn overwrite_behavior(&self) -> &'static str {
        if self.overwrite {
            "overwrite"
        } else {
            "normal"
        }
    }

    fn post(&self, form: &[(&str, &str)]) -> Result<ureq::Response, TransportError> {
        self.agent
            .post(&self.url)
            .send_form(form)
            .map_err(|e| match e {
                ureq::Error::Status(status, response) => TransportError::Status {
                    endpoint: self.url.clone(),
                    status,
                    body: response.into_string().unwrap_or_default(),
                },
                ureq::Error::Transport(t) => TransportError::Request {
                    endpoint: self.url.clone(),
                    message: t.to_string(),
                },
            })
    }

    fn decode_err(&self, e: impl std::fmt::Display) -> TransportError {
        TransportError::Decode {
            endpoint: self.url.clone(),
            message: e.to_string(),
        }
    }
}

/// Flat export values are strings; anything else is rendered as JSON text.
fn flatten(row: serde_json::Map<String, Value>) -> FlatRecord {
    row.into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, v)
        })
        .collect()
}

impl RecordExport for RedcapClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn export_records(&self, fields: &[String]) -> Result<Vec<FlatRecord>, TransportError> {
        let field_keys: Vec<String> = (0..fields.len()).map(|i| format!("fields[{i}]")).collect();
        let mut form: Vec<(&str, &str)> = vec![
            ("token", self.token.as_str()),
            ("content", "record"),
            ("action", "export"),
            ("format", "json"),
            ("type", "flat"),
            ("returnFormat", "json"),
        ];
        form.extend(field_keys.iter().map(String::as_str).zip(fields.iter().map(String::as_str)));

        let rows: Vec<serde_json::Map<String, Value>> = self
            .post(&form)?
            .into_json()
            .map_err(|e| self.decode_err(e))?;
        debug!(source = %self.name, rows = rows.len(), "exported records");
        Ok(rows.into_iter().map(flatten).collect())
    }
}

impl RecordImport for RedcapClient {
    fn import_record(&self, record: &FlatRecord) -> Result<ImportAck, TransportError> {
        let data = serde_json::to_string(&[record]).map_err(|e| self.decode_err(e))?;
        let form = [
            ("token", self.token.as_str()),
            ("content", "record"),
            ("action", "import"),
            ("format", "json"),
            ("type", "flat"),
            ("overwriteBehavior", self.overwrite_behavior()),
            ("returnContent", "count"),
            ("returnFormat", "json"),
            ("data", data.as_str()),
        ];
        let resp: CountResponse = self
            .post(&form)?
            .into_json()
            .map_err(|e| self.decode_err(e))?;
        Ok(ImportAck { count: resp.count })
    }
}
