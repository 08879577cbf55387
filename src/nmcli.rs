use std::time::Duration;

use anyhow::Context;
use tokio::process::Command;

use crate::connectivity::Provisioner;

pub const HOTSPOT_PROFILE: &str = "gateway-portal";

const CONNECT_WAIT_SECS: &str = "20";
const PORTAL_POLL: Duration = Duration::from_secs(2);

/// Provisioner backed by NetworkManager's command line client.
///
/// The portal is a NetworkManager hotspot. The operator's portal UI adds a
/// connection profile; once a profile shows up that did not exist when the
/// portal opened, the hotspot is torn down and that profile is activated.
#[derive(Debug)]
pub struct NmcliProvisioner {
    interface: String,
}

impl NmcliProvisioner {
    pub fn new(interface: &str) -> NmcliProvisioner {
        NmcliProvisioner {
            interface: interface.to_string(),
        }
    }

    async fn profiles(&self) -> Result<Vec<String>, anyhow::Error> {
        let out = nmcli(&["-t", "-f", "NAME", "connection", "show"]).await?;
        Ok(parse_profiles(&out))
    }
}

async fn nmcli(args: &[&str]) -> Result<String, anyhow::Error> {
    let output = Command::new("nmcli")
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .context("Failed to run nmcli")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "nmcli {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_profiles(out: &str) -> Vec<String> {
    out.lines()
        .map(|line| line.replace("\\:", ":"))
        .filter(|name| !name.is_empty())
        .collect()
}

fn new_profile(known: &[String], current: Vec<String>) -> Option<String> {
    current
        .into_iter()
        .find(|name| name != HOTSPOT_PROFILE && !known.contains(name))
}

impl Provisioner for NmcliProvisioner {
    async fn connect_known(&self) -> Result<(), anyhow::Error> {
        nmcli(&["--wait", CONNECT_WAIT_SECS, "device", "connect", &self.interface]).await?;
        Ok(())
    }

    async fn serve_portal(&self, portal_name: &str) -> Result<(), anyhow::Error> {
        let known = self.profiles().await?;

        nmcli(&[
            "device",
            "wifi",
            "hotspot",
            "ifname",
            &self.interface,
            "con-name",
            HOTSPOT_PROFILE,
            "ssid",
            portal_name,
        ])
        .await
        .context("Failed to start provisioning portal")?;

        let mut ticker = tokio::time::interval(PORTAL_POLL);
        loop {
            ticker.tick().await;

            if let Some(profile) = new_profile(&known, self.profiles().await?) {
                log::info!("Operator provisioned \"{profile}\"");
                self.close_portal().await?;
                nmcli(&["--wait", CONNECT_WAIT_SECS, "connection", "up", &profile]).await?;
                return Ok(());
            }
        }
    }

    async fn close_portal(&self) -> Result<(), anyhow::Error> {
        nmcli(&["connection", "down", HOTSPOT_PROFILE]).await?;
        Ok(())
    }
}
