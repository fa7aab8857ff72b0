use crate::{
    encoding::{self, canonicalize, parse_h256, CanonicalizeError},
    rpc::{JsonRpcClient, TransportError},
    types::SignedUserOperation,
};
use anyhow::{anyhow, Result};
use ethers::types::{Address, H256};
use serde_json::Value;
use std::time::Duration;

/// EntryPoint failure code for a reused or out-of-sequence nonce.
const NONCE_COLLISION_CODE: &str = "AA25";

/// Outcome of one `eth_sendUserOperation` call.
///
/// Transport failures are a value here, not an `Err`, so a failed submission
/// never unwinds past the client.
#[derive(Debug)]
pub enum Submission {
    /// Response body without an `error` member.
    Accepted(Value),
    /// Response body with an `error` member, passed through as received.
    Rejected(Value),
    /// No usable response.
    Failed(TransportError),
}

impl Submission {
    fn from_response(res: Result<Value, TransportError>) -> Self {
        match res {
            Ok(body) if body.get("error").is_some() => Self::Rejected(body),
            Ok(body) => Self::Accepted(body),
            Err(e) => Self::Failed(e),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The raw response body, if one was received.
    pub fn body(&self) -> Option<&Value> {
        match self {
            Self::Accepted(body) | Self::Rejected(body) => Some(body),
            Self::Failed(_) => None,
        }
    }

    /// The JSON-RPC `error` member of a rejected submission.
    pub fn rpc_error(&self) -> Option<&Value> {
        match self {
            Self::Rejected(body) => body.get("error"),
            _ => None,
        }
    }

    /// The userOpHash echoed back by the bundler on acceptance.
    pub fn user_op_hash(&self) -> Option<H256> {
        match self {
            Self::Accepted(body) => body.get("result").and_then(|r| parse_userop_hash(r).ok()),
            _ => None,
        }
    }

    /// True when the EntryPoint rejected the nonce. The caller should resolve
    /// the nonce again (usually with a different increment) and re-sign.
    pub fn is_nonce_collision(&self) -> bool {
        let Some(err) = self.rpc_error() else {
            return false;
        };
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or_default();
        message.contains(NONCE_COLLISION_CODE)
            || message.to_ascii_lowercase().contains("invalid account nonce")
    }
}

#[derive(Debug, Clone)]
pub struct BundlerClient {
    rpc: JsonRpcClient,
}

impl BundlerClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            rpc: JsonRpcClient::new(url, timeout)?,
        })
    }

    /// Submits a signed operation. Its wire object is canonical by construction.
    pub async fn send_user_operation(
        &self,
        op: &SignedUserOperation,
        entrypoint: Address,
    ) -> Submission {
        self.submit(encoding::user_op_to_json(op.op()), entrypoint).await
    }

    /// Canonicalizes `user_op` and submits it. Fails before any network I/O if
    /// a field has no wire representation.
    pub async fn send_raw_user_operation(
        &self,
        user_op: Value,
        entrypoint: Address,
    ) -> Result<Submission, CanonicalizeError> {
        let user_op = canonicalize(&user_op)?;
        Ok(self.submit(user_op, entrypoint).await)
    }

    async fn submit(&self, user_op: Value, entrypoint: Address) -> Submission {
        tracing::info!(
            bundler = %self.rpc.url(),
            entrypoint = %encoding::fmt_address(entrypoint),
            sender = ?user_op.get("sender"),
            nonce = ?user_op.get("nonce"),
            "eth_sendUserOperation"
        );

        let params = serde_json::json!([user_op, encoding::fmt_address(entrypoint)]);
        let submission =
            Submission::from_response(self.rpc.call("eth_sendUserOperation", params).await);

        match &submission {
            Submission::Accepted(_) => tracing::info!("user operation accepted"),
            Submission::Rejected(body) => {
                tracing::warn!(error = %body["error"], "bundler rejected user operation")
            }
            Submission::Failed(e) => tracing::warn!(error = %e, "bundler submission failed"),
        }

        submission
    }
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Most bundlers return the userOpHash directly as a JSON string.
    // Some wrap it in an object: { "result": "0x..." }.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(anyhow!(
            "unexpected eth_sendUserOperation result shape (expected string or {{result: ...}}): {}",
            res
        ));
    };

    parse_h256(hash_str)
}
