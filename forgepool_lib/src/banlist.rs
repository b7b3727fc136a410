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

//! Banned IPs and usernames, checked on the accept path.
//!
//! This set sits behind its own mutex so the listener can screen incoming
//! connections without touching the coordinator. Entries expire lazily.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::SystemTime;

#[derive(Debug, Default)]
struct BanState {
    ips: HashMap<IpAddr, SystemTime>,
    usernames: HashMap<String, SystemTime>,
}

#[derive(Debug, Default)]
pub struct Banlist {
    inner: Mutex<BanState>,
}

impl Banlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban_ip(&self, ip: IpAddr, until: SystemTime) {
        let mut state = self.inner.lock().unwrap();
        state.ips.insert(ip, until);
    }

    pub fn unban_ip(&self, ip: &IpAddr) {
        let mut state = self.inner.lock().unwrap();
        state.ips.remove(ip);
    }

    pub fn is_ip_banned(&self, ip: &IpAddr, now: SystemTime) -> bool {
        let mut state = self.inner.lock().unwrap();
        match state.ips.get(ip) {
            Some(until) if now < *until => true,
            Some(_) => {
                state.ips.remove(ip);
                false
            }
            None => false,
        }
    }

    pub fn ban_username(&self, username: &str, until: SystemTime) {
        let mut state = self.inner.lock().unwrap();
        state.usernames.insert(username.to_string(), until);
    }

    pub fn unban_username(&self, username: &str) {
        let mut state = self.inner.lock().unwrap();
        state.usernames.remove(username);
    }

    pub fn is_username_banned(&self, username: &str, now: SystemTime) -> bool {
        let mut state = self.inner.lock().unwrap();
        match state.usernames.get(username) {
            Some(until) if now < *until => true,
            Some(_) => {
                state.usernames.remove(username);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ip_ban_and_lazy_expiry() {
        let banlist = Banlist::new();
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let now = SystemTime::now();

        assert!(!banlist.is_ip_banned(&ip, now));
        banlist.ban_ip(ip, now + Duration::from_secs(60));
        assert!(banlist.is_ip_banned(&ip, now));

        // Past expiry the entry is dropped on observation
        assert!(!banlist.is_ip_banned(&ip, now + Duration::from_secs(61)));
        assert!(!banlist.is_ip_banned(&ip, now));
    }

    #[test]
    fn test_username_ban_and_unban() {
        let banlist = Banlist::new();
        let now = SystemTime::now();

        banlist.ban_username("addr1", now + Duration::from_secs(600));
        assert!(banlist.is_username_banned("addr1", now));
        assert!(!banlist.is_username_banned("addr2", now));

        banlist.unban_username("addr1");
        assert!(!banlist.is_username_banned("addr1", now));
    }

    #[test]
    fn test_unban_ip() {
        let banlist = Banlist::new();
        let ip: IpAddr = "192.0.2.2".parse().unwrap();
        let now = SystemTime::now();

        banlist.ban_ip(ip, now + Duration::from_secs(600));
        banlist.unban_ip(&ip);
        assert!(!banlist.is_ip_banned(&ip, now));
    }
}
