use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use reqwest::blocking::Client;
use serde::Serialize;

use crate::report::Report;

/// Cloud telemetry collaborator.
pub trait Transport {
    fn authenticate(&mut self, token: &str) -> Result<(), anyhow::Error>;
    fn submit(&mut self, report: &Report) -> Result<(), anyhow::Error>;
}

/// What the uploader does with a failed submission. Neither policy retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadFailurePolicy {
    #[default]
    Silent,
    Log,
}

impl FromStr for UploadFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(UploadFailurePolicy::Silent),
            "log" => Ok(UploadFailurePolicy::Log),
            other => Err(anyhow::anyhow!("Unknown upload failure policy: {other}")),
        }
    }
}

/// Best-effort hand-off of finished reports to the transport.
#[derive(Debug)]
pub struct Uploader<T> {
    transport: T,
    policy: UploadFailurePolicy,
}

impl<T: Transport> Uploader<T> {
    /// The transport must already be authenticated.
    pub fn new(transport: T, policy: UploadFailurePolicy) -> Uploader<T> {
        Uploader { transport, policy }
    }

    pub fn send(&mut self, report: Report) {
        if let Err(e) = self.transport.submit(&report) {
            match self.policy {
                UploadFailurePolicy::Silent => log::debug!("Upload failed: {e:#}"),
                UploadFailurePolicy::Log => log::warn!("Upload failed: {e:#}"),
            }
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    timestamp: String,
    fields: &'a Report,
}

/// HTTPS client for the AMMS ingestion endpoint.
///
/// Must be created and used outside the tokio runtime.
#[derive(Debug)]
pub struct AmmsClient {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl AmmsClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<AmmsClient, anyhow::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(AmmsClient {
            client,
            endpoint: endpoint.to_string(),
            token: None,
        })
    }
}

impl Transport for AmmsClient {
    fn authenticate(&mut self, token: &str) -> Result<(), anyhow::Error> {
        let token = token.trim();
        if token.is_empty() {
            return Err(anyhow::anyhow!("Empty station token"));
        }
        self.token = Some(token.to_string());
        Ok(())
    }

    fn submit(&mut self, report: &Report) -> Result<(), anyhow::Error> {
        let token = self.token.as_deref().context("Not authenticated")?;
        let payload = Payload {
            timestamp: Local::now().to_rfc3339(),
            fields: report,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .with_context(|| format!("POST {} failed", self.endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("POST {} returned {status}", self.endpoint));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::reading::Reading;

    /// Records submissions; fails every call when `fail` is set.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) token: Option<String>,
        pub(crate) submitted: Vec<Report>,
        pub(crate) fail: bool,
    }

    impl Transport for RecordingTransport {
        fn authenticate(&mut self, token: &str) -> Result<(), anyhow::Error> {
            self.token = Some(token.to_string());
            Ok(())
        }

        fn submit(&mut self, report: &Report) -> Result<(), anyhow::Error> {
            self.submitted.push(report.clone());
            if self.fail {
                return Err(anyhow::anyhow!("link down"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_send_hands_report_to_transport() {
        let mut uploader = Uploader::new(RecordingTransport::default(), UploadFailurePolicy::Silent);
        let report = Report::build(&Reading {
            temperature_c: Some(21.5),
            ..Default::default()
        });

        uploader.send(report.clone());

        assert_eq!(uploader.transport().submitted, vec![report]);
    }

    #[test]
    fn test_failure_is_swallowed_under_both_policies() {
        for policy in [UploadFailurePolicy::Silent, UploadFailurePolicy::Log] {
            let transport = RecordingTransport {
                fail: true,
                ..Default::default()
            };
            let mut uploader = Uploader::new(transport, policy);

            uploader.send(Report::default());
            uploader.send(Report::default());

            // One attempt per report, no retries.
            assert_eq!(uploader.transport().submitted.len(), 2);
        }
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!(
            "silent".parse::<UploadFailurePolicy>().unwrap(),
            UploadFailurePolicy::Silent
        );
        assert_eq!(
            " LOG ".parse::<UploadFailurePolicy>().unwrap(),
            UploadFailurePolicy::Log
        );
        assert!("retry".parse::<UploadFailurePolicy>().is_err());
    }

    #[test]
    fn test_amms_client_rejects_empty_token() {
        let mut client = AmmsClient::new("http://127.0.0.1:9/", Duration::from_secs(1)).unwrap();

        assert!(client.authenticate("  ").is_err());
        assert!(client.submit(&Report::default()).is_err());
    }

    #[test]
    fn test_payload_shape() {
        let report = Report::build(&Reading {
            humidity: Some(48),
            ..Default::default()
        });
        let payload = Payload {
            timestamp: "2026-10-16T12:00:00+00:00".to_string(),
            fields: &report,
        };

        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"timestamp":"2026-10-16T12:00:00+00:00","fields":{"humidity":48.0}}"#
        );
    }
}
