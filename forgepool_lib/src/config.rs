// Copyright (C) 2025 Forgepool Developers (see AUTHORS)
//
// This file is part of Forgepool
//
// Forgepool is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Forgepool is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// Forgepool. If not, see <https://www.gnu.org/licenses/>.

use crate::rewards::PayoutMethod;
use noderpc::NodeRpcConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct PoolIdentityConfig {
    pub pool_name: String,
    /// Coinbase destination for every template we request.
    pub pool_payout_address: String,
    /// Chain's target seconds between blocks; feeds the luck metric.
    #[serde(default = "default_target_block_time")]
    pub target_block_time_s: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StratumConfig {
    pub hostname: String,
    pub port: u16,
    /// Every new worker starts here.
    pub initial_difficulty: u64,
    pub min_difficulty: u64,
    pub max_difficulty: u64,
    #[serde(default = "default_target_share_time")]
    pub target_share_time_s: u64,
    #[serde(default = "default_retarget_interval")]
    pub vardiff_retarget_interval_s: u64,
    #[serde(default = "default_vardiff_variance")]
    pub vardiff_variance: f64,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_s: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PayoutConfig {
    pub payout_method: PayoutMethod,
    #[serde(default = "default_pplns_window")]
    pub pplns_window: usize,
    /// Integer percent, 0..=100, taken off the block reward first.
    pub pool_fee_percent: u64,
    pub min_payout: u64,
    #[serde(default = "default_payout_interval")]
    pub payout_interval_s: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_miners")]
    pub max_miners: usize,
    #[serde(default = "default_max_workers_per_miner")]
    pub max_workers_per_miner: usize,
    #[serde(default)]
    pub ban_on_invalid_share: bool,
    #[serde(default = "default_max_invalid_shares")]
    pub max_invalid_shares: u64,
    #[serde(default = "default_ban_duration")]
    pub ban_duration_s: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkConfig {
    #[serde(default = "default_template_refresh")]
    pub template_refresh_interval_s: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log to file if specified
    pub file: Option<String>,
    /// Console logging; defaults to on.
    pub console: Option<bool>,
    /// Log level (defaults to "info")
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            console: None,
            level: default_log_level(),
        }
    }
}

fn default_target_block_time() -> u64 {
    120
}

fn default_target_share_time() -> u64 {
    10
}

fn default_retarget_interval() -> u64 {
    30
}

fn default_vardiff_variance() -> f64 {
    0.3
}

fn default_max_connections_per_ip() -> usize {
    8
}

fn default_connection_timeout() -> u64 {
    300
}

fn default_pplns_window() -> usize {
    1_000
}

fn default_payout_interval() -> u64 {
    3_600
}

fn default_max_miners() -> usize {
    10_000
}

fn default_max_workers_per_miner() -> usize {
    32
}

fn default_max_invalid_shares() -> u64 {
    50
}

fn default_ban_duration() -> u64 {
    600
}

fn default_template_refresh() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub pool: PoolIdentityConfig,
    pub stratum: StratumConfig,
    pub payout: PayoutConfig,
    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,
    #[serde(default = "default_work")]
    pub work: WorkConfig,
    pub noderpc: NodeRpcConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_miners: default_max_miners(),
        max_workers_per_miner: default_max_workers_per_miner(),
        ban_on_invalid_share: false,
        max_invalid_shares: default_max_invalid_shares(),
        ban_duration_s: default_ban_duration(),
    }
}

fn default_work() -> WorkConfig {
    WorkConfig {
        template_refresh_interval_s: default_template_refresh(),
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("FORGEPOOL").separator("_"))
            .build()?
            .try_deserialize()
    }

    pub fn with_stratum_port(mut self, port: u16) -> Self {
        self.stratum.port = port;
        self
    }

    pub fn with_api_port(mut self, port: u16) -> Self {
        self.api.port = port;
        self
    }

    pub fn with_payout_method(mut self, method: PayoutMethod) -> Self {
        self.payout.payout_method = method;
        self
    }

    pub fn with_initial_difficulty(mut self, difficulty: u64) -> Self {
        self.stratum.initial_difficulty = difficulty;
        self
    }

    pub fn with_noderpc_url(mut self, url: String) -> Self {
        self.noderpc.url = url;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> String {
        r#"
[pool]
pool_name = "forgepool"
pool_payout_address = "pooladdressxxxxxxxxxxxxxxxx"

[stratum]
hostname = "0.0.0.0"
port = 2215
initial_difficulty = 16000
min_difficulty = 1000
max_difficulty = 1000000000

[payout]
payout_method = "PPLNS"
pool_fee_percent = 1
min_payout = 100000000

[noderpc]
url = "http://127.0.0.1:18443"
username = "rpcuser"
password = "rpcpass"

[api]
port = 2216
"#
        .to_string()
    }

    #[test]
    fn test_load_sample_config() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(sample_toml().as_bytes()).unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.pool.pool_name, "forgepool");
        assert_eq!(config.stratum.port, 2215);
        assert_eq!(config.payout.payout_method, PayoutMethod::Pplns);
        assert_eq!(config.payout.pool_fee_percent, 1);

        // Defaults fill the omitted sections
        assert_eq!(config.stratum.connection_timeout_s, 300);
        assert_eq!(config.stratum.target_share_time_s, 10);
        assert_eq!(config.limits.max_workers_per_miner, 32);
        assert_eq!(config.work.template_refresh_interval_s, 5);
        assert_eq!(config.payout.pplns_window, 1_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_payout_method_parses_uppercase() {
        for (text, expected) in [
            ("\"PPLNS\"", PayoutMethod::Pplns),
            ("\"PPS\"", PayoutMethod::Pps),
            ("\"PROPORTIONAL\"", PayoutMethod::Proportional),
            ("\"SOLO\"", PayoutMethod::Solo),
        ] {
            let method: PayoutMethod = serde_json::from_str(text).unwrap();
            assert_eq!(method, expected);
        }
    }

    #[test]
    fn test_builders() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(sample_toml().as_bytes()).unwrap();
        let config = Config::load(file.path().to_str().unwrap())
            .unwrap()
            .with_stratum_port(4444)
            .with_payout_method(PayoutMethod::Solo)
            .with_initial_difficulty(32_000);

        assert_eq!(config.stratum.port, 4444);
        assert_eq!(config.payout.payout_method, PayoutMethod::Solo);
        assert_eq!(config.stratum.initial_difficulty, 32_000);
    }
}
