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

//! Types for the upstream `getblocktemplate` response.

use crate::work::WorkError;
use serde::{Deserialize, Serialize};

/// The region the pool and miner fill inside the coinbase input:
/// 4 bytes extranonce1 + 4 bytes extranonce2.
pub const EXTRANONCE_REGION_SIZE: usize = 8;

/// A candidate block from the upstream node. The coinbase transaction sits
/// at `transactions[0]` with a zeroed extranonce region whose byte offset
/// the template states explicitly.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlockTemplate {
    pub version: u32,
    pub previousblockhash: String,
    /// Coinbase first, then the rest in consensus order.
    pub transactions: Vec<TemplateTransaction>,
    /// Byte offset of the extranonce region inside the coinbase
    /// serialization.
    pub extranonce_offset: usize,
    /// Total coinbase payout in base units.
    pub coinbasevalue: u64,
    pub target: String,
    pub curtime: u64,
    pub bits: String,
    pub height: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateTransaction {
    /// Raw transaction serialization, hex.
    pub data: String,
    /// Display-order txid, hex.
    pub txid: String,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub weight: u64,
}

impl BlockTemplate {
    pub fn from_json(json: &str) -> Result<Self, WorkError> {
        let template: BlockTemplate = serde_json::from_str(json)
            .map_err(|e| WorkError::new(format!("Failed to parse block template: {e}")))?;
        template.validate()?;
        Ok(template)
    }

    fn validate(&self) -> Result<(), WorkError> {
        if self.transactions.is_empty() {
            return Err(WorkError::new("Block template has no coinbase transaction"));
        }
        let coinbase_len = self.transactions[0].data.len() / 2;
        if self.extranonce_offset + EXTRANONCE_REGION_SIZE > coinbase_len {
            return Err(WorkError::new(format!(
                "Extranonce offset {} out of range for {}-byte coinbase",
                self.extranonce_offset, coinbase_len
            )));
        }
        if self.previousblockhash.len() != 64 {
            return Err(WorkError::new("Bad previousblockhash length"));
        }
        Ok(())
    }

    pub fn coinbase(&self) -> &TemplateTransaction {
        &self.transactions[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        serde_json::json!({
            "version": 1,
            "previousblockhash": "00000000000000000000000000000000000000000000000000000000000000aa",
            "transactions": [
                {
                    "data": format!("{}{}{}", "01".repeat(42), "00".repeat(8), "02".repeat(20)),
                    "txid": "aa".repeat(32),
                },
                {
                    "data": "0200ff",
                    "txid": "bb".repeat(32),
                    "fee": 100,
                    "weight": 400,
                }
            ],
            "extranonce_offset": 42,
            "coinbasevalue": 5_000_000_000u64,
            "target": "00000000ffff0000000000000000000000000000000000000000000000000000",
            "curtime": 1_700_000_000u64,
            "bits": "1d00ffff",
            "height": 1234,
        })
        .to_string()
    }

    #[test]
    fn test_parse_block_template() {
        let template = BlockTemplate::from_json(&sample_json()).unwrap();
        assert_eq!(template.height, 1234);
        assert_eq!(template.extranonce_offset, 42);
        assert_eq!(template.transactions.len(), 2);
        assert_eq!(template.coinbase().txid, "aa".repeat(32));
        assert_eq!(template.coinbasevalue, 5_000_000_000);
    }

    #[test]
    fn test_rejects_template_without_coinbase() {
        let mut value: serde_json::Value = serde_json::from_str(&sample_json()).unwrap();
        value["transactions"] = serde_json::json!([]);
        assert!(BlockTemplate::from_json(&value.to_string()).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_extranonce_offset() {
        let mut value: serde_json::Value = serde_json::from_str(&sample_json()).unwrap();
        value["extranonce_offset"] = serde_json::json!(1_000);
        assert!(BlockTemplate::from_json(&value.to_string()).is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(BlockTemplate::from_json("not json").is_err());
    }
}
