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

//! Contract for the durable store adapter.
//!
//! The pool keeps its authoritative state in memory; an external adapter may
//! mirror miners, shares, rounds and payments durably. All writes are
//! idempotent upserts keyed by the entity's stable id, and all reads are
//! bounded scans in reverse chronological order, so the core can replay a
//! write after a crash without corrupting the mirror.

use super::miner::Miner;
use super::payment::Payment;
use super::round::Round;
use super::share::Share;
use crate::ids::MinerId;
use std::error::Error;
use std::future::Future;

pub trait StoreAdapter: Send + Sync {
    type Err: Error + Send + Sync + 'static;

    /// Upsert a miner record by id.
    fn upsert_miner(&self, miner: &Miner) -> impl Future<Output = Result<(), Self::Err>> + Send;

    /// Upsert a share by id. The durable mirror is expected to bound its own
    /// retention the way the in-memory ring does.
    fn upsert_share(&self, share: &Share) -> impl Future<Output = Result<(), Self::Err>> + Send;

    /// Upsert a round by id; called once on open and once on closure.
    fn upsert_round(&self, round: &Round) -> impl Future<Output = Result<(), Self::Err>> + Send;

    /// Upsert a payment by id; called on creation and on each status change.
    fn upsert_payment(&self, payment: &Payment)
        -> impl Future<Output = Result<(), Self::Err>> + Send;

    /// Most recent shares, newest first.
    fn recent_shares(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Share>, Self::Err>> + Send;

    /// Most recent payments for one miner, newest first.
    fn miner_payments(
        &self,
        miner_id: MinerId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Payment>, Self::Err>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{PaymentId, ShareId, WorkerId};
    use crate::store::payment::PaymentStatus;
    use crate::work::job::JobId;
    use std::collections::BTreeMap;
    use std::convert::Infallible;
    use std::sync::Mutex;
    use std::time::SystemTime;

    /// Minimal adapter proving the contract is implementable: keyed maps,
    /// so a replayed upsert overwrites instead of duplicating.
    #[derive(Default)]
    struct MemoryAdapter {
        shares: Mutex<BTreeMap<ShareId, Share>>,
        payments: Mutex<BTreeMap<PaymentId, Payment>>,
    }

    impl StoreAdapter for MemoryAdapter {
        type Err = Infallible;

        async fn upsert_miner(&self, _miner: &Miner) -> Result<(), Infallible> {
            Ok(())
        }

        async fn upsert_share(&self, share: &Share) -> Result<(), Infallible> {
            self.shares
                .lock()
                .unwrap()
                .insert(share.share_id, share.clone());
            Ok(())
        }

        async fn upsert_round(&self, _round: &Round) -> Result<(), Infallible> {
            Ok(())
        }

        async fn upsert_payment(&self, payment: &Payment) -> Result<(), Infallible> {
            self.payments
                .lock()
                .unwrap()
                .insert(payment.payment_id, payment.clone());
            Ok(())
        }

        async fn recent_shares(&self, limit: usize) -> Result<Vec<Share>, Infallible> {
            Ok(self
                .shares
                .lock()
                .unwrap()
                .values()
                .rev()
                .take(limit)
                .cloned()
                .collect())
        }

        async fn miner_payments(
            &self,
            miner_id: MinerId,
            limit: usize,
        ) -> Result<Vec<Payment>, Infallible> {
            Ok(self
                .payments
                .lock()
                .unwrap()
                .values()
                .rev()
                .filter(|p| p.miner_id == miner_id)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    fn share(id: u64) -> Share {
        Share {
            share_id: ShareId(id),
            miner_id: MinerId(1),
            worker_id: WorkerId(1),
            worker_name: "rig0".to_string(),
            job_id: JobId([0u8; 32]),
            nonce: id as u32,
            extranonce2: "00000000".to_string(),
            hash: [0u8; 32],
            difficulty: 1_000,
            timestamp: SystemTime::now(),
            valid: true,
            is_block: false,
            reject_reason: None,
        }
    }

    #[tokio::test]
    async fn test_upserts_are_idempotent() {
        let adapter = MemoryAdapter::default();

        // Replaying the same write must not duplicate
        adapter.upsert_share(&share(1)).await.unwrap();
        adapter.upsert_share(&share(1)).await.unwrap();
        adapter.upsert_share(&share(2)).await.unwrap();

        let shares = adapter.recent_shares(10).await.unwrap();
        assert_eq!(shares.len(), 2);
        // Newest first
        assert_eq!(shares[0].share_id, ShareId(2));
    }

    #[tokio::test]
    async fn test_bounded_miner_payment_scan() {
        let adapter = MemoryAdapter::default();
        for id in 1..=5u64 {
            let payment = Payment {
                payment_id: PaymentId(id),
                miner_id: MinerId(if id % 2 == 0 { 2 } else { 1 }),
                payout_address: "addr".to_string(),
                amount: 100,
                created_at: SystemTime::now(),
                tx_hash: None,
                confirmed_at: None,
                status: PaymentStatus::Pending,
            };
            adapter.upsert_payment(&payment).await.unwrap();
        }

        let payments = adapter.miner_payments(MinerId(1), 2).await.unwrap();
        assert_eq!(payments.len(), 2);
        assert_eq!(payments[0].payment_id, PaymentId(5));
        assert_eq!(payments[1].payment_id, PaymentId(3));
    }
}
