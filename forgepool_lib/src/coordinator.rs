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

//! The pool coordinator actor.
//!
//! One task owns the entity store, the job window, the round register and
//! the VarDiff controller. Sessions and the stats API talk to it through
//! [`PoolHandle`]: a typed command in, a oneshot reply out. Serial command
//! processing is what makes the §-level atomicity guarantees hold — a round
//! closure, reward credit and fresh-job broadcast all happen between two
//! mailbox pops.

use crate::banlist::Banlist;
use crate::config::Config;
use crate::ids::{ConnId, IdAllocator, MinerId, WorkerId};
use crate::rewards::{self, PayoutMethod};
use crate::stats;
use crate::store::share::{RejectReason, Share};
use crate::store::{PoolStore, StoreError, StoreLimits};
use crate::stratum::client_connections::ConnectionsHandle;
use crate::stratum::error::Error;
use crate::stratum::messages::Request;
use crate::validator::{self, Submission};
use crate::vardiff::{Vardiff, VardiffConfig};
use crate::work::gbt::BlockTemplate;
use crate::work::job::{Job, JobId, JobTracker, EXTRANONCE2_SIZE};
use crate::work::notify;
use noderpc::NodeRpc;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// How often payout eligibility is re-checked.
const PAYOUT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// How often idle workers are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest username accepted as a payout address.
const MIN_ADDRESS_LENGTH: usize = 20;

/// Worker name used when the username carries no `.worker` suffix.
const DEFAULT_WORKER_NAME: &str = "default";

/// Coordinator-facing settings distilled from [`Config`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub pool_name: String,
    pub payout_address: String,
    pub initial_difficulty: u64,
    pub vardiff: VardiffConfig,
    pub payout_method: PayoutMethod,
    pub pplns_window: usize,
    pub pool_fee_percent: u64,
    pub min_payout: u64,
    pub payout_interval: Duration,
    pub ban_on_invalid_share: bool,
    pub max_invalid_shares: u64,
    pub ban_duration: Duration,
    pub connection_timeout: Duration,
    pub template_refresh_interval: Duration,
    pub target_block_time: Duration,
    pub limits: StoreLimits,
}

impl From<&Config> for PoolSettings {
    fn from(config: &Config) -> Self {
        Self {
            pool_name: config.pool.pool_name.clone(),
            payout_address: config.pool.pool_payout_address.clone(),
            initial_difficulty: config.stratum.initial_difficulty,
            vardiff: VardiffConfig {
                target_share_time: config.stratum.target_share_time_s,
                retarget_interval: config.stratum.vardiff_retarget_interval_s,
                variance: config.stratum.vardiff_variance,
                min_difficulty: config.stratum.min_difficulty,
                max_difficulty: config.stratum.max_difficulty,
            },
            payout_method: config.payout.payout_method,
            pplns_window: config.payout.pplns_window,
            pool_fee_percent: config.payout.pool_fee_percent,
            min_payout: config.payout.min_payout,
            payout_interval: Duration::from_secs(config.payout.payout_interval_s),
            ban_on_invalid_share: config.limits.ban_on_invalid_share,
            max_invalid_shares: config.limits.max_invalid_shares,
            ban_duration: Duration::from_secs(config.limits.ban_duration_s),
            connection_timeout: Duration::from_secs(config.stratum.connection_timeout_s),
            template_refresh_interval: Duration::from_secs(config.work.template_refresh_interval_s),
            target_block_time: Duration::from_secs(config.pool.target_block_time_s),
            limits: StoreLimits {
                max_miners: config.limits.max_miners,
                max_workers_per_miner: config.limits.max_workers_per_miner,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscribeInfo {
    pub extranonce1: String,
    pub extranonce2_size: usize,
}

#[derive(Debug, Clone)]
pub struct AuthorizeOutcome {
    pub miner_id: MinerId,
    pub worker_id: WorkerId,
    pub difficulty: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SubmitOutcome {
    pub is_block: bool,
}

#[derive(Debug)]
pub enum PoolCmd {
    Subscribe {
        conn_id: ConnId,
        peer: SocketAddr,
        user_agent: Option<String>,
        resp: oneshot::Sender<SubscribeInfo>,
    },
    Authorize {
        conn_id: ConnId,
        username: String,
        password: String,
        resp: oneshot::Sender<Result<AuthorizeOutcome, Error>>,
    },
    Submit {
        conn_id: ConnId,
        job_id: String,
        extranonce2: String,
        ntime: String,
        nonce: String,
        resp: oneshot::Sender<Result<SubmitOutcome, Error>>,
    },
    Disconnect {
        conn_id: ConnId,
    },
    RefreshWork {
        resp: oneshot::Sender<()>,
    },
    ProcessPayouts {
        resp: oneshot::Sender<usize>,
    },
    SweepInactive {
        resp: oneshot::Sender<usize>,
    },
    BanMiner {
        username: String,
        duration: Duration,
        resp: oneshot::Sender<Result<(), StoreError>>,
    },
    UnbanMiner {
        username: String,
        resp: oneshot::Sender<Result<(), StoreError>>,
    },
    /// Operator broadcast: ask every miner to reconnect elsewhere.
    Reconnect {
        host: String,
        port: u16,
        wait_s: u64,
    },
    /// Operator broadcast: display a message on every miner.
    ShowMessage {
        text: String,
    },
    PoolStats {
        resp: oneshot::Sender<stats::PoolStats>,
    },
    RecentBlocks {
        limit: usize,
        resp: oneshot::Sender<Vec<stats::BlockInfo>>,
    },
    RecentPayments {
        limit: usize,
        resp: oneshot::Sender<Vec<stats::PaymentInfo>>,
    },
    TopMiners {
        limit: usize,
        resp: oneshot::Sender<Vec<stats::TopMinerInfo>>,
    },
    MinerStats {
        address: String,
        resp: oneshot::Sender<Option<stats::MinerStatsInfo>>,
    },
    CurrentRound {
        resp: oneshot::Sender<stats::RoundInfo>,
    },
}

fn channel_closed() -> Error {
    Error::IoError(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "pool coordinator stopped",
    ))
}

/// Cloneable handle to the coordinator actor.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    cmd_tx: mpsc::Sender<PoolCmd>,
}

impl PoolHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PoolCmd,
    ) -> Result<T, Error> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| channel_closed())?;
        rx.await.map_err(|_| channel_closed())
    }

    pub async fn subscribe(
        &self,
        conn_id: ConnId,
        peer: SocketAddr,
        user_agent: Option<String>,
    ) -> Result<SubscribeInfo, Error> {
        self.request(|resp| PoolCmd::Subscribe {
            conn_id,
            peer,
            user_agent,
            resp,
        })
        .await
    }

    pub async fn authorize(
        &self,
        conn_id: ConnId,
        username: String,
        password: String,
    ) -> Result<AuthorizeOutcome, Error> {
        self.request(|resp| PoolCmd::Authorize {
            conn_id,
            username,
            password,
            resp,
        })
        .await?
    }

    pub async fn submit(
        &self,
        conn_id: ConnId,
        job_id: String,
        extranonce2: String,
        ntime: String,
        nonce: String,
    ) -> Result<SubmitOutcome, Error> {
        self.request(|resp| PoolCmd::Submit {
            conn_id,
            job_id,
            extranonce2,
            ntime,
            nonce,
            resp,
        })
        .await?
    }

    pub async fn disconnect(&self, conn_id: ConnId) {
        let _ = self.cmd_tx.send(PoolCmd::Disconnect { conn_id }).await;
    }

    /// Fetch a template and install a fresh job now.
    pub async fn refresh_work(&self) -> Result<(), Error> {
        self.request(|resp| PoolCmd::RefreshWork { resp }).await
    }

    /// Run one payout cycle; returns the number of payments created.
    pub async fn process_payouts(&self) -> Result<usize, Error> {
        self.request(|resp| PoolCmd::ProcessPayouts { resp }).await
    }

    /// Remove workers idle past the connection timeout.
    pub async fn sweep_inactive(&self) -> Result<usize, Error> {
        self.request(|resp| PoolCmd::SweepInactive { resp }).await
    }

    pub async fn ban_miner(
        &self,
        username: String,
        duration: Duration,
    ) -> Result<Result<(), StoreError>, Error> {
        self.request(|resp| PoolCmd::BanMiner {
            username,
            duration,
            resp,
        })
        .await
    }

    pub async fn unban_miner(&self, username: String) -> Result<Result<(), StoreError>, Error> {
        self.request(|resp| PoolCmd::UnbanMiner { username, resp }).await
    }

    pub async fn reconnect_all(&self, host: String, port: u16, wait_s: u64) {
        let _ = self
            .cmd_tx
            .send(PoolCmd::Reconnect { host, port, wait_s })
            .await;
    }

    pub async fn show_message_all(&self, text: String) {
        let _ = self.cmd_tx.send(PoolCmd::ShowMessage { text }).await;
    }

    pub async fn pool_stats(&self) -> Result<stats::PoolStats, Error> {
        self.request(|resp| PoolCmd::PoolStats { resp }).await
    }

    pub async fn recent_blocks(&self, limit: usize) -> Result<Vec<stats::BlockInfo>, Error> {
        self.request(|resp| PoolCmd::RecentBlocks { limit, resp }).await
    }

    pub async fn recent_payments(&self, limit: usize) -> Result<Vec<stats::PaymentInfo>, Error> {
        self.request(|resp| PoolCmd::RecentPayments { limit, resp }).await
    }

    pub async fn top_miners(&self, limit: usize) -> Result<Vec<stats::TopMinerInfo>, Error> {
        self.request(|resp| PoolCmd::TopMiners { limit, resp }).await
    }

    pub async fn miner_stats(&self, address: String) -> Result<Option<stats::MinerStatsInfo>, Error> {
        self.request(|resp| PoolCmd::MinerStats { address, resp }).await
    }

    pub async fn current_round(&self) -> Result<stats::RoundInfo, Error> {
        self.request(|resp| PoolCmd::CurrentRound { resp }).await
    }
}

/// Per-connection bookkeeping the coordinator keeps for routing.
#[derive(Debug)]
struct SessionEntry {
    extranonce1: String,
    peer: SocketAddr,
    user_agent: Option<String>,
    miner_id: Option<MinerId>,
    worker_id: Option<WorkerId>,
}

pub struct PoolCoordinator<N: NodeRpc> {
    settings: PoolSettings,
    node: Arc<N>,
    store: PoolStore,
    vardiff: Vardiff,
    jobs: JobTracker,
    sessions: HashMap<ConnId, SessionEntry>,
    connections: ConnectionsHandle,
    banlist: Arc<Banlist>,
    network_difficulty: u64,
    network_height: u64,
    cmd_rx: mpsc::Receiver<PoolCmd>,
}

/// Spawn the coordinator actor and return its handle.
pub fn start_pool_coordinator<N: NodeRpc + 'static>(
    settings: PoolSettings,
    node: Arc<N>,
    ids: Arc<IdAllocator>,
    connections: ConnectionsHandle,
    banlist: Arc<Banlist>,
) -> PoolHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let handle = PoolHandle { cmd_tx };

    let store = PoolStore::new(ids, settings.limits, SystemTime::now());
    let coordinator = PoolCoordinator {
        vardiff: Vardiff::new(settings.vardiff),
        settings,
        node,
        store,
        jobs: JobTracker::new(),
        sessions: HashMap::new(),
        connections,
        banlist,
        network_difficulty: 0,
        network_height: 0,
        cmd_rx,
    };

    tokio::spawn(coordinator.run());
    handle
}

impl<N: NodeRpc> PoolCoordinator<N> {
    async fn run(mut self) {
        let mut refresh = tokio::time::interval(self.settings.template_refresh_interval);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut payouts = tokio::time::interval(PAYOUT_CHECK_INTERVAL);
        payouts.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            info!("Coordinator mailbox closed, draining");
                            break;
                        }
                    }
                }
                _ = refresh.tick() => {
                    self.refresh_work(false).await;
                }
                _ = payouts.tick() => {
                    self.process_payouts();
                }
                _ = sweep.tick() => {
                    self.sweep_inactive().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: PoolCmd) {
        match cmd {
            PoolCmd::Subscribe {
                conn_id,
                peer,
                user_agent,
                resp,
            } => {
                let entry = self.sessions.entry(conn_id).or_insert_with(|| SessionEntry {
                    extranonce1: format!("{:08x}", conn_id.0 as u32),
                    peer,
                    user_agent,
                    miner_id: None,
                    worker_id: None,
                });
                let _ = resp.send(SubscribeInfo {
                    extranonce1: entry.extranonce1.clone(),
                    extranonce2_size: EXTRANONCE2_SIZE,
                });
            }
            PoolCmd::Authorize {
                conn_id,
                username,
                password,
                resp,
            } => {
                let result = self.handle_authorize(conn_id, &username, &password);
                let authorized = result.as_ref().ok().map(|outcome| outcome.difficulty);
                let _ = resp.send(result);
                if let Some(difficulty) = authorized {
                    self.push_initial_work(conn_id, difficulty).await;
                }
            }
            PoolCmd::Submit {
                conn_id,
                job_id,
                extranonce2,
                ntime,
                nonce,
                resp,
            } => {
                let result = self
                    .handle_submit(conn_id, &job_id, &extranonce2, &ntime, &nonce)
                    .await;
                let _ = resp.send(result);
            }
            PoolCmd::Disconnect { conn_id } => {
                if let Some(entry) = self.sessions.remove(&conn_id) {
                    if let Some(worker_id) = entry.worker_id {
                        self.store.remove_worker(worker_id);
                    }
                }
                self.connections.remove(conn_id).await;
            }
            PoolCmd::RefreshWork { resp } => {
                self.refresh_work(false).await;
                let _ = resp.send(());
            }
            PoolCmd::ProcessPayouts { resp } => {
                let _ = resp.send(self.process_payouts());
            }
            PoolCmd::SweepInactive { resp } => {
                let _ = resp.send(self.sweep_inactive().await);
            }
            PoolCmd::BanMiner {
                username,
                duration,
                resp,
            } => {
                let _ = resp.send(self.ban_by_username(&username, duration).await);
            }
            PoolCmd::UnbanMiner { username, resp } => {
                let result = match self.store.get_miner_by_username(&username) {
                    Some(miner) => {
                        let miner_id = miner.miner_id;
                        self.banlist.unban_username(&username);
                        self.store.unban_miner(miner_id)
                    }
                    None => Err(StoreError::UnknownMiner),
                };
                let _ = resp.send(result);
            }
            PoolCmd::Reconnect { host, port, wait_s } => {
                let message = Request::new_reconnect(&host, port, wait_s);
                self.broadcast(&message).await;
            }
            PoolCmd::ShowMessage { text } => {
                let message = Request::new_show_message(&text);
                self.broadcast(&message).await;
            }
            PoolCmd::PoolStats { resp } => {
                let _ = resp.send(stats::pool_stats(
                    &self.store,
                    &self.settings.pool_name,
                    self.network_difficulty,
                    self.network_height,
                    self.settings.target_block_time,
                    SystemTime::now(),
                ));
            }
            PoolCmd::RecentBlocks { limit, resp } => {
                let _ = resp.send(stats::recent_blocks(
                    &self.store,
                    self.network_height,
                    limit,
                ));
            }
            PoolCmd::RecentPayments { limit, resp } => {
                let _ = resp.send(stats::recent_payments(&self.store, limit));
            }
            PoolCmd::TopMiners { limit, resp } => {
                let _ = resp.send(stats::top_miners(&self.store, limit, SystemTime::now()));
            }
            PoolCmd::MinerStats { address, resp } => {
                let found = self
                    .store
                    .get_miner_by_username(&address)
                    .or_else(|| self.store.miners().find(|m| m.payout_address == address))
                    .map(|miner| stats::miner_stats(&self.store, miner, SystemTime::now()));
                let _ = resp.send(found);
            }
            PoolCmd::CurrentRound { resp } => {
                let _ = resp.send(stats::current_round(&self.store));
            }
        }
    }

    // ---- authorize --------------------------------------------------------

    fn handle_authorize(
        &mut self,
        conn_id: ConnId,
        username: &str,
        _password: &str,
    ) -> Result<AuthorizeOutcome, Error> {
        let now = SystemTime::now();
        let peer = self
            .sessions
            .get(&conn_id)
            .map(|entry| entry.peer)
            .ok_or(Error::NotSubscribed)?;

        // "address" or "address.workername"
        let (miner_name, worker_name) = match username.split_once('.') {
            Some((miner, worker)) if !worker.is_empty() => (miner, worker),
            Some((miner, _)) => (miner, DEFAULT_WORKER_NAME),
            None => (username, DEFAULT_WORKER_NAME),
        };

        if miner_name.len() < MIN_ADDRESS_LENGTH {
            return Err(Error::InvalidParams(format!(
                "payout address too short: {miner_name}"
            )));
        }

        if self.banlist.is_username_banned(miner_name, now) {
            return Err(Error::Banned);
        }

        let miner_id = match self.store.get_miner_by_username(miner_name) {
            Some(miner) => {
                if miner.is_banned(now) {
                    return Err(Error::Banned);
                }
                miner.miner_id
            }
            // First authorize registers the miner; the literal username is
            // the payout address, validated by the payout dispatcher later.
            None => self
                .store
                .register_miner(miner_name, miner_name, None, now)
                .map_err(|e| Error::AtCapacity(e.to_string()))?,
        };

        let worker_id = self
            .store
            .add_worker(
                miner_id,
                worker_name,
                self.settings.initial_difficulty,
                peer.ip(),
                Some(peer.port()),
                now,
            )
            .map_err(|e| Error::AtCapacity(e.to_string()))?;

        let user_agent = {
            let entry = self.sessions.get_mut(&conn_id).expect("checked above");
            entry.miner_id = Some(miner_id);
            entry.worker_id = Some(worker_id);
            entry.user_agent.clone()
        };
        if let Some(worker) = self.store.get_worker_mut(worker_id) {
            worker.user_agent = user_agent;
        }

        info!(
            "Authorized {}.{} as worker {} on {}",
            miner_name, worker_name, worker_id, conn_id
        );
        Ok(AuthorizeOutcome {
            miner_id,
            worker_id,
            difficulty: self.settings.initial_difficulty,
        })
    }

    /// A freshly authorized session gets its difficulty, then the current
    /// job with clean_jobs forced so it starts from scratch.
    async fn push_initial_work(&mut self, conn_id: ConnId, difficulty: u64) {
        self.send_to_session(conn_id, &Request::new_set_difficulty(difficulty))
            .await;

        let Some(job) = self.jobs.current() else {
            debug!("No current job to push to {}", conn_id);
            return;
        };
        match notify::notify_params(job) {
            Ok(mut params) => {
                params.clean_jobs = true;
                self.send_to_session(conn_id, &Request::new_notify(params)).await;
            }
            Err(e) => error!("Failed to build notify for {}: {}", conn_id, e),
        }
    }

    // ---- submit -----------------------------------------------------------

    async fn handle_submit(
        &mut self,
        conn_id: ConnId,
        job_id_hex: &str,
        extranonce2: &str,
        ntime_hex: &str,
        nonce_hex: &str,
    ) -> Result<SubmitOutcome, Error> {
        let now = SystemTime::now();

        let entry = self.sessions.get(&conn_id).ok_or(Error::NotSubscribed)?;
        let extranonce1 = entry.extranonce1.clone();
        let (miner_id, worker_id) = match (entry.miner_id, entry.worker_id) {
            (Some(miner_id), Some(worker_id)) => (miner_id, worker_id),
            _ => return Err(Error::UnauthorizedWorker),
        };

        if let Some(miner) = self.store.get_miner(miner_id) {
            if miner.is_banned(now) {
                return Err(Error::Banned);
            }
        }

        let job_id = JobId::from_hex(job_id_hex).ok_or(Error::JobNotFound)?;
        let ntime = u32::from_str_radix(ntime_hex, 16)
            .map_err(|_| Error::InvalidParams("bad ntime".to_string()))?;
        let nonce = u32::from_str_radix(nonce_hex, 16)
            .map_err(|_| Error::InvalidParams("bad nonce".to_string()))?;

        let resolved = self.jobs.find(&job_id);

        // The hash only exists when the job is known; an unresolved job is
        // rejected as stale before the hash matters.
        let hash = match &resolved {
            Some(job) => job
                .compute_share_hash(&extranonce1, extranonce2, ntime, nonce)
                .map_err(|e| Error::InvalidParams(e.message))?,
            None => [0xffu8; 32],
        };

        let worker = self
            .store
            .get_worker(worker_id)
            .ok_or(Error::UnauthorizedWorker)?;
        let worker_difficulty = worker.current_difficulty;
        let worker_name = worker.worker_name.clone();

        let submission = Submission {
            job_id,
            nonce,
            hash,
            timestamp: now,
        };
        let verdict = validator::validate(
            &submission,
            resolved.as_deref(),
            self.store.shares(),
            worker_difficulty,
        );

        let share = Share {
            share_id: self.store.ids().next_share_id(),
            miner_id,
            worker_id,
            worker_name,
            job_id,
            nonce,
            extranonce2: extranonce2.to_string(),
            hash,
            difficulty: worker_difficulty,
            timestamp: now,
            valid: verdict.is_ok(),
            is_block: matches!(verdict, Ok(true)),
            reject_reason: verdict.err(),
        };

        match verdict {
            Ok(is_block) => {
                self.store.record_share(share);
                self.account_accepted_share(miner_id, worker_id, now);
                self.retarget_worker(conn_id, worker_id, now).await;

                if is_block {
                    let job = resolved.expect("accepted share resolved its job");
                    self.process_block_found(
                        job, miner_id, worker_id, hash, &extranonce1, extranonce2, ntime, nonce,
                    )
                    .await;
                }
                Ok(SubmitOutcome { is_block })
            }
            Err(reason) => {
                self.store.record_share(share);
                self.account_rejected_share(miner_id, worker_id, reason, now);
                if reason.counts_as_invalid() {
                    self.check_invalid_shares(miner_id, now).await;
                }
                Err(Error::Rejected(reason))
            }
        }
    }

    fn account_accepted_share(&mut self, miner_id: MinerId, worker_id: WorkerId, now: SystemTime) {
        if let Some(worker) = self.store.get_worker_mut(worker_id) {
            worker.shares_accepted += 1;
            worker.record_share_time(now);
            worker.last_activity = now;
            worker.active = true;
        }
        if let Some(miner) = self.store.get_miner_mut(miner_id) {
            miner.shares_accepted += 1;
            miner.last_seen = now;
            // A valid share clears the abuse counter
            miner.invalid_share_count = 0;
        }
    }

    fn account_rejected_share(
        &mut self,
        miner_id: MinerId,
        worker_id: WorkerId,
        reason: RejectReason,
        now: SystemTime,
    ) {
        if let Some(worker) = self.store.get_worker_mut(worker_id) {
            worker.shares_rejected += 1;
            worker.last_activity = now;
            match reason {
                RejectReason::Stale => worker.shares_stale += 1,
                RejectReason::Duplicate => worker.shares_duplicate += 1,
                RejectReason::LowDifficulty => {}
            }
        }
        if let Some(miner) = self.store.get_miner_mut(miner_id) {
            miner.shares_rejected += 1;
            miner.last_seen = now;
            if reason.counts_as_invalid() {
                miner.invalid_share_count += 1;
            }
        }
    }

    /// Retarget after an accepted share; a change is pushed to the session
    /// before its next notify.
    async fn retarget_worker(&mut self, conn_id: ConnId, worker_id: WorkerId, now: SystemTime) {
        let new_difficulty = {
            let Some(worker) = self.store.get_worker(worker_id) else {
                return;
            };
            if !self.vardiff.should_adjust(worker, now) {
                return;
            }
            let new_difficulty = self.vardiff.new_difficulty(worker);
            if new_difficulty == worker.current_difficulty {
                return;
            }
            new_difficulty
        };

        if let Some(worker) = self.store.get_worker_mut(worker_id) {
            info!(
                "Retargeting worker {}: {} -> {}",
                worker_id, worker.current_difficulty, new_difficulty
            );
            worker.current_difficulty = new_difficulty;
        }
        self.send_to_session(conn_id, &Request::new_set_difficulty(new_difficulty))
            .await;
    }

    async fn check_invalid_shares(&mut self, miner_id: MinerId, now: SystemTime) {
        if !self.settings.ban_on_invalid_share {
            return;
        }
        let Some(miner) = self.store.get_miner(miner_id) else {
            return;
        };
        if miner.invalid_share_count < self.settings.max_invalid_shares {
            return;
        }

        let username = miner.username.clone();
        let until = now + self.settings.ban_duration;
        warn!(
            "Banning miner {} for {}s after {} invalid shares",
            username,
            self.settings.ban_duration.as_secs(),
            miner.invalid_share_count
        );
        let _ = self.store.ban_miner(miner_id, until);
        self.banlist.ban_username(&username, until);
        self.close_miner_sessions(miner_id).await;
    }

    async fn close_miner_sessions(&mut self, miner_id: MinerId) {
        let conns: Vec<ConnId> = self
            .sessions
            .iter()
            .filter(|(_, entry)| entry.miner_id == Some(miner_id))
            .map(|(conn_id, _)| *conn_id)
            .collect();
        for conn_id in conns {
            self.connections.shutdown_client(conn_id).await;
        }
    }

    async fn ban_by_username(
        &mut self,
        username: &str,
        duration: Duration,
    ) -> Result<(), StoreError> {
        let now = SystemTime::now();
        let miner_id = self
            .store
            .get_miner_by_username(username)
            .map(|m| m.miner_id)
            .ok_or(StoreError::UnknownMiner)?;
        let until = now + duration;
        self.store.ban_miner(miner_id, until)?;
        self.banlist.ban_username(username, until);
        self.close_miner_sessions(miner_id).await;
        Ok(())
    }

    // ---- block found ------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn process_block_found(
        &mut self,
        job: Arc<Job>,
        miner_id: MinerId,
        worker_id: WorkerId,
        hash: [u8; 32],
        extranonce1: &str,
        extranonce2: &str,
        ntime: u32,
        nonce: u32,
    ) {
        let now = SystemTime::now();
        info!(
            "Block candidate at height {} from miner {}: {}",
            job.height,
            miner_id,
            hex::encode(hash)
        );

        let submit_result = match job.assemble_block_hex(extranonce1, extranonce2, ntime, nonce) {
            Ok(block_hex) => self.node.submit_block(&block_hex).await,
            Err(e) => {
                // Cannot happen for a share that already validated, but a
                // broken template must not leave miners on a dead round.
                error!("Failed to assemble block: {}", e);
                Err(noderpc::NodeRpcError::Other(e.message))
            }
        };

        match submit_result {
            Ok(()) => {
                info!("Block at height {} accepted by the node", job.height);
                if let Some(worker) = self.store.get_worker_mut(worker_id) {
                    worker.blocks_found += 1;
                }
                if let Some(miner) = self.store.get_miner_mut(miner_id) {
                    miner.blocks_found += 1;
                }

                let closed = self
                    .store
                    .close_round(job.height, Some(hash), job.reward, Some(miner_id), now);
                let payouts = self.compute_rewards(&closed.round, miner_id);
                let total: u64 = payouts.values().sum();
                self.store.credit_rewards(&payouts);
                info!(
                    "Round {} closed: reward {} split {} ways ({} base units)",
                    closed.round.round_id,
                    job.reward,
                    payouts.len(),
                    total
                );
            }
            Err(e) => {
                // The candidate is dead either way; rotate the round so
                // miners do not keep working a stale template.
                error!("Block submission failed at height {}: {}", job.height, e);
                self.store.close_round(job.height, None, 0, Some(miner_id), now);
            }
        }

        self.refresh_work(true).await;
    }

    fn compute_rewards(
        &self,
        round: &crate::store::round::Round,
        finder: MinerId,
    ) -> HashMap<MinerId, u64> {
        let fee = self.settings.pool_fee_percent;
        match self.settings.payout_method {
            PayoutMethod::Pplns => {
                let window = self.store.latest_valid_shares(self.settings.pplns_window);
                let samples: Vec<rewards::ShareSample> = window
                    .iter()
                    .map(|s| rewards::ShareSample {
                        miner_id: s.miner_id,
                    })
                    .collect();
                rewards::pplns(&samples, round.block_reward, fee)
            }
            PayoutMethod::Pps => rewards::pps(
                &round.miner_shares,
                self.network_difficulty,
                self.settings.initial_difficulty,
                round.block_reward,
                fee,
            ),
            PayoutMethod::Proportional => {
                rewards::proportional(&round.miner_shares, round.block_reward, fee)
            }
            PayoutMethod::Solo => rewards::solo(finder, round.block_reward, fee),
        }
    }

    // ---- work -------------------------------------------------------------

    async fn refresh_work(&mut self, force_clean: bool) {
        let template_json = match self
            .node
            .get_block_template(&self.settings.payout_address)
            .await
        {
            Ok(json) => json,
            Err(e) => {
                // Keep the current job; the next cycle retries.
                warn!("Template refresh failed, keeping current job: {}", e);
                return;
            }
        };

        let template = match BlockTemplate::from_json(&template_json) {
            Ok(template) => template,
            Err(e) => {
                warn!("Bad block template, keeping current job: {}", e);
                return;
            }
        };

        if let Ok(difficulty) = self.node.get_difficulty().await {
            self.network_difficulty = difficulty;
        }
        if let Ok(height) = self.node.get_best_height().await {
            self.network_height = height;
        }

        let prev_changed = self
            .jobs
            .current()
            .map(|job| job.prev_hash != template.previousblockhash)
            .unwrap_or(true);
        let clean_jobs = force_clean || prev_changed;

        let job = match Job::from_template(
            &template,
            self.network_difficulty,
            clean_jobs,
            SystemTime::now(),
        ) {
            Ok(job) => self.jobs.install(job),
            Err(e) => {
                warn!("Failed to build job from template: {}", e);
                return;
            }
        };

        debug!(
            "Installed job {} at height {} (clean_jobs={})",
            job.job_id, job.height, job.clean_jobs
        );
        match notify::notify_message(&job) {
            Ok(message) => self.broadcast(&message).await,
            Err(e) => error!("Failed to build notify: {}", e),
        }
    }

    // ---- payouts ----------------------------------------------------------

    fn process_payouts(&mut self) -> usize {
        let now = SystemTime::now();
        let eligible: Vec<MinerId> = self
            .store
            .miners()
            .filter(|miner| {
                if miner.unpaid_balance < self.settings.min_payout {
                    return false;
                }
                match miner.last_payout {
                    Some(last) => now
                        .duration_since(last)
                        .map(|since| since >= self.settings.payout_interval)
                        .unwrap_or(false),
                    None => true,
                }
            })
            .map(|miner| miner.miner_id)
            .collect();

        let mut created = 0;
        for miner_id in eligible {
            match self.store.create_payment(miner_id, now) {
                Ok(payment) => {
                    info!(
                        "Payment {} pending: {} base units to {}",
                        payment.payment_id, payment.amount, payment.payout_address
                    );
                    created += 1;
                }
                Err(e) => error!("Failed to create payment for {}: {}", miner_id, e),
            }
        }
        created
    }

    // ---- housekeeping -----------------------------------------------------

    async fn sweep_inactive(&mut self) -> usize {
        let now = SystemTime::now();
        let idle = self
            .store
            .inactive_workers(self.settings.connection_timeout, now);
        let count = idle.len();
        for worker_id in idle {
            debug!("Sweeping inactive worker {}", worker_id);
            self.store.remove_worker(worker_id);
            let conns: Vec<ConnId> = self
                .sessions
                .iter()
                .filter(|(_, entry)| entry.worker_id == Some(worker_id))
                .map(|(conn_id, _)| *conn_id)
                .collect();
            for conn_id in conns {
                self.connections.shutdown_client(conn_id).await;
            }
        }
        count
    }

    // ---- delivery ---------------------------------------------------------

    async fn broadcast(&self, message: &Request) {
        match serde_json::to_string(message) {
            Ok(line) => self.connections.send_to_all(Arc::new(line)).await,
            Err(e) => error!("Failed to serialize broadcast: {}", e),
        }
    }

    async fn send_to_session(&self, conn_id: ConnId, message: &Request) {
        match serde_json::to_string(message) {
            Ok(line) => {
                self.connections
                    .send_to_client(conn_id, Arc::new(line))
                    .await
            }
            Err(e) => error!("Failed to serialize message for {}: {}", conn_id, e),
        }
    }
}
