//! JSON-RPC ledger connection.

use super::transaction::Transaction;
use super::{Instruction, LedgerAccount, LedgerConnection, LedgerError};
use crate::config::{Commitment, Config};
use crate::domain::{Keypair, Pubkey, TxSignature};
use async_trait::async_trait;
use backoff::future::retry_notify;
use backoff::ExponentialBackoff;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future::try_join_all;
use reqwest::Client;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `getMultipleAccounts` accepts at most this many keys per call.
const MAX_MULTIPLE_ACCOUNTS: usize = 100;

/// Ledger connection over the node's JSON-RPC API.
#[derive(Debug, Clone)]
pub struct RpcLedger {
    client: Client,
    url: String,
    commitment: Commitment,
    retry_max_elapsed: Duration,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl RpcLedger {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            commitment: Commitment::Confirmed,
            retry_max_elapsed: Duration::from_secs(10),
            confirm_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.rpc_url.clone())
            .with_commitment(config.commitment)
            .with_retry_max_elapsed(config.retry_max_elapsed)
            .with_confirm_timeout(config.confirm_timeout)
    }

    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = commitment;
        self
    }

    /// Backoff budget for reads; zero disables retry.
    pub fn with_retry_max_elapsed(mut self, budget: Duration) -> Self {
        self.retry_max_elapsed = budget;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One JSON-RPC round trip.
    async fn call(&self, method: &str, params: &Value) -> Result<Value, LedgerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Network(e.to_string()))?;

        let status = response.status();
        if status == 429 {
            return Err(LedgerError::RateLimited);
        }
        if !status.is_success() {
            return Err(LedgerError::Http {
                status: status.as_u16(),
                message: if status.is_server_error() {
                    "Server error".to_string()
                } else {
                    "Client error".to_string()
                },
            });
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| LedgerError::Parse(e.to_string()))?;
        parse_rpc_response(body)
    }

    /// Idempotent call retried with exponential backoff on transient failures.
    async fn call_with_retry(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        if self.retry_max_elapsed.is_zero() {
            return self.call(method, &params).await;
        }
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.retry_max_elapsed),
            ..Default::default()
        };
        retry_notify(
            backoff,
            || async {
                self.call(method, &params).await.map_err(|e| {
                    if e.is_transient() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            },
            |err: LedgerError, wait: Duration| {
                warn!("{} failed ({}), retrying in {:?}", method, err, wait);
            },
        )
        .await
    }

    async fn fetch_chunk(&self, chunk: &[Pubkey]) -> Result<Vec<Option<LedgerAccount>>, LedgerError> {
        let keys: Vec<String> = chunk.iter().map(|k| k.to_string()).collect();
        let result = self
            .call_with_retry(
                "getMultipleAccounts",
                json!([keys, { "encoding": "base64", "commitment": self.commitment.as_str() }]),
            )
            .await?;
        let values = result
            .get("value")
            .and_then(|v| v.as_array())
            .ok_or_else(|| LedgerError::Parse("Expected value array".to_string()))?;
        if values.len() != chunk.len() {
            return Err(LedgerError::Parse(format!(
                "Asked for {} accounts, got {}",
                chunk.len(),
                values.len()
            )));
        }
        values.iter().map(parse_account).collect()
    }

    async fn latest_blockhash(&self) -> Result<[u8; 32], LedgerError> {
        let result = self
            .call_with_retry(
                "getLatestBlockhash",
                json!([{ "commitment": self.commitment.as_str() }]),
            )
            .await?;
        parse_blockhash(&result)
    }

    async fn confirm(&self, signature: &TxSignature) -> Result<(), LedgerError> {
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;
        loop {
            let result = self
                .call_with_retry(
                    "getSignatureStatuses",
                    json!([[signature.as_str()], { "searchTransactionHistory": false }]),
                )
                .await?;
            match parse_signature_status(&result, self.commitment)? {
                SignatureStatus::Reached => return Ok(()),
                SignatureStatus::Failed(err) => return Err(err),
                SignatureStatus::Pending => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LedgerError::ConfirmationTimeout(signature.to_string()));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl LedgerConnection for RpcLedger {
    async fn fetch_account(&self, address: &Pubkey) -> Result<Option<LedgerAccount>, LedgerError> {
        debug!("Fetching account {}", address);
        let result = self
            .call_with_retry(
                "getAccountInfo",
                json!([
                    address.to_string(),
                    { "encoding": "base64", "commitment": self.commitment.as_str() }
                ]),
            )
            .await?;
        let value = result
            .get("value")
            .ok_or_else(|| LedgerError::Parse("Missing value field".to_string()))?;
        parse_account(value)
    }

    async fn fetch_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<LedgerAccount>>, LedgerError> {
        debug!("Fetching {} accounts", addresses.len());
        let chunks = addresses
            .chunks(MAX_MULTIPLE_ACCOUNTS)
            .map(|chunk| self.fetch_chunk(chunk));
        let results = try_join_all(chunks).await?;
        Ok(results.into_iter().flatten().collect())
    }

    async fn submit(
        &self,
        instruction: Instruction,
        signers: &[&Keypair],
    ) -> Result<TxSignature, LedgerError> {
        let blockhash = self.latest_blockhash().await?;
        let tx = Transaction::new_signed(&instruction, signers, blockhash)?;
        let wire = BASE64.encode(tx.serialize()?);

        // Never retried: a lost response does not mean the transaction was dropped.
        let result = self
            .call(
                "sendTransaction",
                &json!([
                    wire,
                    { "encoding": "base64", "preflightCommitment": self.commitment.as_str() }
                ]),
            )
            .await?;
        let signature = result
            .as_str()
            .map(|s| TxSignature::new(s.to_string()))
            .ok_or_else(|| LedgerError::Parse("Expected signature string".to_string()))?;
        info!("Submitted transaction {}", signature);

        self.confirm(&signature).await?;
        info!(
            "Transaction {} reached {} commitment",
            signature,
            self.commitment.as_str()
        );
        Ok(signature)
    }
}

/// Unwrap a JSON-RPC envelope into its `result`.
fn parse_rpc_response(body: Value) -> Result<Value, LedgerError> {
    if let Some(error) = body.get("error") {
        // Preflight simulation failures carry the transaction error in `data.err`.
        if let Some(err) = error.get("data").and_then(|d| d.get("err")) {
            if !err.is_null() {
                return Err(parse_transaction_error(err));
            }
        }
        return Err(LedgerError::Rpc {
            code: error.get("code").and_then(|c| c.as_i64()).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string(),
        });
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| LedgerError::Parse("Missing result field".to_string()))
}

/// Map a ledger transaction error object onto `LedgerError`.
///
/// `{"InstructionError":[i,{"Custom":n}]}` carries a program error code;
/// everything else is reported verbatim.
fn parse_transaction_error(err: &Value) -> LedgerError {
    let custom = err
        .get("InstructionError")
        .and_then(|v| v.as_array())
        .filter(|pair| pair.len() == 2)
        .and_then(|pair| {
            let index = pair[0].as_u64().and_then(|i| u8::try_from(i).ok())?;
            let code = pair[1]
                .get("Custom")
                .and_then(|c| c.as_u64())
                .and_then(|c| u32::try_from(c).ok())?;
            Some((index, code))
        });
    match custom {
        Some((index, code)) => LedgerError::InstructionFailed { index, code },
        None => LedgerError::Rejected(err.to_string()),
    }
}

fn parse_account(value: &Value) -> Result<Option<LedgerAccount>, LedgerError> {
    if value.is_null() {
        return Ok(None);
    }
    let owner = value
        .get("owner")
        .and_then(|v| v.as_str())
        .ok_or_else(|| LedgerError::Parse("Missing owner field".to_string()))?;
    let owner = Pubkey::from_str(owner)
        .map_err(|e| LedgerError::Parse(format!("Invalid owner: {}", e)))?;
    let lamports = value
        .get("lamports")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| LedgerError::Parse("Missing lamports field".to_string()))?;
    let encoded = value
        .get("data")
        .and_then(|v| v.as_array())
        .and_then(|pair| pair.first())
        .and_then(|v| v.as_str())
        .ok_or_else(|| LedgerError::Parse("Missing data field".to_string()))?;
    let data = BASE64
        .decode(encoded)
        .map_err(|e| LedgerError::Parse(format!("Invalid account data: {}", e)))?;
    Ok(Some(LedgerAccount {
        owner,
        lamports,
        data,
    }))
}

fn parse_blockhash(result: &Value) -> Result<[u8; 32], LedgerError> {
    let encoded = result
        .get("value")
        .and_then(|v| v.get("blockhash"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| LedgerError::Parse("Missing blockhash field".to_string()))?;
    Pubkey::from_str(encoded)
        .map(|k| k.to_bytes())
        .map_err(|e| LedgerError::Parse(format!("Invalid blockhash: {}", e)))
}

#[derive(Debug, PartialEq)]
enum SignatureStatus {
    Pending,
    Reached,
    Failed(LedgerError),
}

fn parse_signature_status(
    result: &Value,
    wanted: Commitment,
) -> Result<SignatureStatus, LedgerError> {
    let status = result
        .get("value")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| LedgerError::Parse("Expected value array".to_string()))?;
    if status.is_null() {
        return Ok(SignatureStatus::Pending);
    }
    if let Some(err) = status.get("err").filter(|e| !e.is_null()) {
        return Ok(SignatureStatus::Failed(parse_transaction_error(err)));
    }
    let reached = status
        .get("confirmationStatus")
        .and_then(|v| v.as_str())
        .and_then(Commitment::parse)
        .map(|c| c >= wanted)
        .unwrap_or(false);
    Ok(if reached {
        SignatureStatus::Reached
    } else {
        SignatureStatus::Pending
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_custom_instruction_error() {
        let err = json!({ "InstructionError": [0, { "Custom": 6000 }] });
        assert_eq!(
            parse_transaction_error(&err),
            LedgerError::InstructionFailed { index: 0, code: 6000 }
        );
    }

    #[test]
    fn test_parse_other_transaction_errors() {
        let err = json!("AccountNotFound");
        assert!(matches!(parse_transaction_error(&err), LedgerError::Rejected(_)));

        let err = json!({ "InstructionError": [0, "InvalidAccountData"] });
        assert!(matches!(parse_transaction_error(&err), LedgerError::Rejected(_)));
    }

    #[test]
    fn test_parse_preflight_failure() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {
                "code": -32002,
                "message": "Transaction simulation failed",
                "data": { "err": { "InstructionError": [0, { "Custom": 6013 }] }, "logs": [] }
            }
        });
        assert_eq!(
            parse_rpc_response(body),
            Err(LedgerError::InstructionFailed { index: 0, code: 6013 })
        );
    }

    #[test]
    fn test_parse_plain_rpc_error() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32602, "message": "Invalid params" }
        });
        assert_eq!(
            parse_rpc_response(body),
            Err(LedgerError::Rpc {
                code: -32602,
                message: "Invalid params".to_string()
            })
        );
    }

    #[test]
    fn test_parse_account() {
        let owner = Pubkey::new([3; 32]);
        let value = json!({
            "data": [BASE64.encode([1u8, 2, 3]), "base64"],
            "executable": false,
            "lamports": 1_000_000,
            "owner": owner.to_string(),
            "rentEpoch": 0
        });
        let account = parse_account(&value).unwrap().unwrap();
        assert_eq!(account.owner, owner);
        assert_eq!(account.lamports, 1_000_000);
        assert_eq!(account.data, vec![1, 2, 3]);

        assert_eq!(parse_account(&Value::Null).unwrap(), None);
        assert!(parse_account(&json!({ "lamports": 1 })).is_err());
    }

    #[test]
    fn test_parse_blockhash() {
        let hash = Pubkey::new([5; 32]);
        let result = json!({
            "context": { "slot": 1 },
            "value": { "blockhash": hash.to_string(), "lastValidBlockHeight": 100 }
        });
        assert_eq!(parse_blockhash(&result).unwrap(), [5; 32]);
    }

    #[test]
    fn test_parse_signature_status() {
        let pending = json!({ "value": [null] });
        assert_eq!(
            parse_signature_status(&pending, Commitment::Confirmed).unwrap(),
            SignatureStatus::Pending
        );

        let processed = json!({ "value": [{ "err": null, "confirmationStatus": "processed" }] });
        assert_eq!(
            parse_signature_status(&processed, Commitment::Confirmed).unwrap(),
            SignatureStatus::Pending
        );
        assert_eq!(
            parse_signature_status(&processed, Commitment::Processed).unwrap(),
            SignatureStatus::Reached
        );

        let finalized = json!({ "value": [{ "err": null, "confirmationStatus": "finalized" }] });
        assert_eq!(
            parse_signature_status(&finalized, Commitment::Confirmed).unwrap(),
            SignatureStatus::Reached
        );

        let failed = json!({
            "value": [{
                "err": { "InstructionError": [0, { "Custom": 6008 }] },
                "confirmationStatus": "confirmed"
            }]
        });
        assert_eq!(
            parse_signature_status(&failed, Commitment::Confirmed).unwrap(),
            SignatureStatus::Failed(LedgerError::InstructionFailed { index: 0, code: 6008 })
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let ledger = RpcLedger::new("http://127.0.0.1:1").with_retry_max_elapsed(Duration::ZERO);
        let err = ledger
            .fetch_account(&Pubkey::new([1; 32]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Network(_)), "got {:?}", err);
    }
}
