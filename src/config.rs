use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::{env, fs, path::Path, time::Duration};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRaw {
    pub chain_id: u64,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    pub entry_point: String,
    pub factory: String,
    #[serde(default)]
    pub bundler: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub chain_id: u64,
    pub rpc_url: String,
    pub entry_point: Address,
    pub factory: Address,
    pub bundler_url: Option<String>,
}

/// Values that override the deployment artifact.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub rpc: Option<String>,
    pub entry_point: Option<String>,
    pub factory: Option<String>,
    pub bundler: Option<String>,
}

pub fn load_deployment(path: &Path, overrides: Overrides) -> Result<Deployment> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read deployment json at {}", path.display()))?;
    let raw: DeploymentRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse deployment json at {}", path.display()))?;
    resolve(raw, overrides)
}

fn resolve(raw: DeploymentRaw, overrides: Overrides) -> Result<Deployment> {
    let rpc_url = if let Some(rpc) = overrides.rpc {
        rpc
    } else if let Some(env_var) = raw.rpc_env_var.clone() {
        env::var(&env_var).unwrap_or(raw.rpc.clone())
    } else {
        raw.rpc.clone()
    };

    let entry_point = parse_addr(overrides.entry_point.as_deref().unwrap_or(&raw.entry_point))
        .context("invalid entryPoint address")?;
    let factory = parse_addr(overrides.factory.as_deref().unwrap_or(&raw.factory))
        .context("invalid factory address")?;

    if rpc_url.contains("alchemy.com/v2/") || rpc_url.contains("infura.io/v3/") {
        tracing::warn!("RPC URL looks like it may contain an API key; consider AA_USEROP_RPC_URL instead of committing it.");
    }

    Ok(Deployment {
        chain_id: raw.chain_id,
        rpc_url,
        entry_point,
        factory,
        bundler_url: overrides.bundler.or(raw.bundler),
    })
}

/// Network timeout applied to every RPC client. Never unbounded.
pub fn rpc_timeout(seconds: u64) -> Duration {
    Duration::from_secs(seconds.max(1))
}

pub fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}
