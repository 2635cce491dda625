//! Connectivity state shared between the network workers and the job worker.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

/// High-level connectivity state for logs and the sync precondition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectivityState {
    Disconnected = 0,
    Connecting = 1,
    LinkUpNoIp = 2,
    Online = 3,
}

impl ConnectivityState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::LinkUpNoIp,
            3 => Self::Online,
            _ => Self::Disconnected,
        }
    }
}

/// Wi-Fi credentials source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WifiConfig {
    pub ssid: &'static str,
    pub password: &'static str,
}

impl WifiConfig {
    pub const fn new(ssid: &'static str, password: &'static str) -> Self {
        Self { ssid, password }
    }
}

/// Immutable connectivity snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectivitySnapshot {
    pub state: ConnectivityState,
    pub link_up: bool,
    pub has_ipv4: bool,
    pub revision: u32,
}

impl ConnectivitySnapshot {
    pub const fn disconnected() -> Self {
        Self {
            state: ConnectivityState::Disconnected,
            link_up: false,
            has_ipv4: false,
            revision: 0,
        }
    }

    /// Online means usable for transfers: link plus IPv4 config.
    pub const fn online(self) -> bool {
        self.link_up && self.has_ipv4
    }
}

/// Lock-free shared connectivity status.
#[derive(Debug)]
pub struct ConnectivityHandle {
    state: AtomicU8,
    link_up: AtomicBool,
    has_ipv4: AtomicBool,
    revision: AtomicU32,
}

impl ConnectivityHandle {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectivityState::Disconnected as u8),
            link_up: AtomicBool::new(false),
            has_ipv4: AtomicBool::new(false),
            revision: AtomicU32::new(0),
        }
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        ConnectivitySnapshot {
            state: ConnectivityState::from_raw(self.state.load(Ordering::Acquire)),
            link_up: self.link_up.load(Ordering::Acquire),
            has_ipv4: self.has_ipv4.load(Ordering::Acquire),
            revision: self.revision.load(Ordering::Acquire),
        }
    }

    pub fn is_online(&self) -> bool {
        self.snapshot().online()
    }

    pub fn mark_connecting(&self) {
        if self.store_state(ConnectivityState::Connecting) {
            self.bump_revision();
        }
    }

    pub fn mark_disconnected(&self) {
        let mut changed = false;
        changed |= self.store_bool(&self.link_up, false);
        changed |= self.store_bool(&self.has_ipv4, false);
        changed |= self.store_state(ConnectivityState::Disconnected);
        if changed {
            self.bump_revision();
        }
    }

    pub fn update_link_ip(&self, link_up: bool, has_ipv4: bool) {
        let mut changed = false;
        changed |= self.store_bool(&self.link_up, link_up);
        changed |= self.store_bool(&self.has_ipv4, has_ipv4);

        let next = if !link_up {
            ConnectivityState::Disconnected
        } else if !has_ipv4 {
            ConnectivityState::LinkUpNoIp
        } else {
            ConnectivityState::Online
        };
        changed |= self.store_state(next);

        if changed {
            self.bump_revision();
        }
    }

    fn store_state(&self, next: ConnectivityState) -> bool {
        self.state.swap(next as u8, Ordering::AcqRel) != next as u8
    }

    fn store_bool(&self, cell: &AtomicBool, next: bool) -> bool {
        cell.swap(next, Ordering::AcqRel) != next
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for ConnectivityHandle {
    fn default() -> Self {
        Self::new()
    }
}
