use crate::domain::{Keypair, KeypairError, MarketIndex, Pubkey};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Program id of the devnet deployment.
pub const DEFAULT_PROGRAM_ID: &str = "AHjGBth6uAKVipLGnooZ9GYn7vwSKPJLX4Lq7Hio3CjT";

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub program_id: Pubkey,
    pub commitment: Commitment,
    /// Unset means the client runs read-only.
    pub keypair_path: Option<String>,
    pub retry_max_elapsed: Duration,
    pub confirm_timeout: Duration,
    pub markets: Vec<MarketIndex>,
}

/// How settled a transaction must be before the ledger reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processed" => Some(Commitment::Processed),
            "confirmed" => Some(Commitment::Confirmed),
            "finalized" => Some(Commitment::Finalized),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let rpc_url = env_map
            .get("LEDGER_RPC_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("LEDGER_RPC_URL".to_string()))?;

        let program_id = env_map
            .get("PROGRAM_ID")
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_PROGRAM_ID);
        let program_id = Pubkey::from_str(program_id).map_err(|e| {
            ConfigError::InvalidValue("PROGRAM_ID".to_string(), e.to_string())
        })?;

        let commitment = env_map
            .get("COMMITMENT")
            .map(|s| s.as_str())
            .unwrap_or("confirmed");
        let commitment = Commitment::parse(commitment).ok_or_else(|| {
            ConfigError::InvalidValue(
                "COMMITMENT".to_string(),
                format!("must be processed, confirmed, or finalized, got {}", commitment),
            )
        })?;

        let keypair_path = env_map
            .get("KEYPAIR_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let retry_max_elapsed = parse_millis(&env_map, "RPC_RETRY_MAX_ELAPSED_MS", "10000")?;
        let confirm_timeout = parse_millis(&env_map, "CONFIRM_TIMEOUT_MS", "30000")?;
        let markets = parse_markets_from_map(&env_map)?;

        Ok(Config {
            rpc_url,
            program_id,
            commitment,
            keypair_path,
            retry_max_elapsed,
            confirm_timeout,
            markets,
        })
    }

    /// Load the signing key named by `KEYPAIR_PATH`, if any.
    pub fn load_keypair(&self) -> Result<Option<Keypair>, KeypairError> {
        self.keypair_path
            .as_ref()
            .map(Keypair::read_from_file)
            .transpose()
    }
}

fn parse_millis(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<Duration, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), "must be a valid u64".to_string()))
}

fn parse_markets_from_map(
    env_map: &HashMap<String, String>,
) -> Result<Vec<MarketIndex>, ConfigError> {
    let Some(markets_str) = env_map.get("MARKETS") else {
        return Ok(MarketIndex::canonical());
    };
    let mut markets = Vec::new();
    for part in markets_str.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let index = part.parse::<u8>().map_err(|_| {
            ConfigError::InvalidValue(
                "MARKETS".to_string(),
                format!("{} is not a market index (0-255)", part),
            )
        })?;
        let market = MarketIndex::from(index);
        if !markets.contains(&market) {
            markets.push(market);
        }
    }
    if markets.is_empty() {
        return Err(ConfigError::InvalidValue(
            "MARKETS".to_string(),
            "must list at least one market index".to_string(),
        ));
    }
    Ok(markets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(
            "LEDGER_RPC_URL".to_string(),
            "https://api.devnet.solana.com".to_string(),
        );
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.program_id.to_string(), DEFAULT_PROGRAM_ID);
        assert_eq!(config.commitment, Commitment::Confirmed);
        assert_eq!(config.keypair_path, None);
        assert_eq!(config.retry_max_elapsed, Duration::from_millis(10_000));
        assert_eq!(config.confirm_timeout, Duration::from_millis(30_000));
        assert_eq!(config.markets, MarketIndex::canonical());
    }

    #[test]
    fn test_missing_rpc_url() {
        let result = Config::from_env_map(HashMap::new());
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "LEDGER_RPC_URL"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_program_id() {
        let mut env_map = setup_required_env();
        env_map.insert("PROGRAM_ID".to_string(), "not-base58-0OIl".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PROGRAM_ID"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_commitment() {
        let mut env_map = setup_required_env();
        env_map.insert("COMMITMENT".to_string(), "max".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "COMMITMENT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_timeout() {
        let mut env_map = setup_required_env();
        env_map.insert("CONFIRM_TIMEOUT_MS".to_string(), "-1".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "CONFIRM_TIMEOUT_MS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_markets_list() {
        let mut env_map = setup_required_env();
        env_map.insert("MARKETS".to_string(), " 0, 2 ,7,2".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(
            config.markets,
            vec![MarketIndex::Btc, MarketIndex::Sol, MarketIndex::Other(7)]
        );

        let mut env_map = setup_required_env();
        env_map.insert("MARKETS".to_string(), "0,256".to_string());
        assert!(Config::from_env_map(env_map).is_err());

        let mut env_map = setup_required_env();
        env_map.insert("MARKETS".to_string(), " , ".to_string());
        assert!(Config::from_env_map(env_map).is_err());
    }

    #[test]
    fn test_load_keypair() {
        let kp = Keypair::from_secret(&[1; 32]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&kp.to_bytes().to_vec()).unwrap()).unwrap();

        let mut env_map = setup_required_env();
        env_map.insert(
            "KEYPAIR_PATH".to_string(),
            file.path().display().to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        let loaded = config.load_keypair().unwrap().unwrap();
        assert_eq!(loaded.pubkey(), kp.pubkey());

        let read_only = Config::from_env_map(setup_required_env()).unwrap();
        assert!(read_only.load_keypair().unwrap().is_none());
    }
}
