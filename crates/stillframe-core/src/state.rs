//! Selection state persisted across deep sleep.
//!
//! Two fixed-size records live in RTC fast memory: the rotation cursors and
//! the best-access-point hint. Both carry a magic+version header and a
//! checksum; any mismatch decodes to defaults instead of an error, because
//! the memory is legitimately garbage after full power loss.

use crate::name::{ImageName, NAME_MAX};

const SELECTION_MAGIC: u32 = 0x3153_4653; // "SFS1"
const SELECTION_VERSION: u8 = 1;
const NAME_SLOT_LEN: usize = 1 + NAME_MAX;

/// Encoded size of [`SelectionState`].
pub const SELECTION_RECORD_LEN: usize = 12 + 4 * NAME_SLOT_LEN + 4;

const AP_HINT_MAGIC: u32 = 0x3141_4653; // "SFA1"
const AP_HINT_VERSION: u8 = 1;

/// Encoded size of [`ApHint`].
pub const AP_HINT_RECORD_LEN: usize = 24;

/// Sentinel for "no sequential position recorded yet".
pub const INVALID_INDEX: u32 = u32::MAX;

/// Rotation cursors and the one-shot priority override.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SelectionState {
    /// Legacy single cursor kept in the record for layout compatibility;
    /// selection never reads it.
    pub last_image_index: u32,
    pub last_image_name: ImageName,
    /// Render-once override consumed by the next RenderNext job.
    pub priority_image_name: ImageName,
    pub last_permanent_name: ImageName,
    pub last_temporary_name: ImageName,
    /// Alternation bit: which collection produced the previous render.
    pub last_was_temporary: bool,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self {
            last_image_index: INVALID_INDEX,
            last_image_name: ImageName::new(),
            priority_image_name: ImageName::new(),
            last_permanent_name: ImageName::new(),
            last_temporary_name: ImageName::new(),
            last_was_temporary: false,
        }
    }
}

impl SelectionState {
    pub fn encode(&self, out: &mut [u8; SELECTION_RECORD_LEN]) {
        out.fill(0);
        out[0..4].copy_from_slice(&SELECTION_MAGIC.to_le_bytes());
        out[4] = SELECTION_VERSION;
        out[5] = u8::from(self.last_was_temporary);
        out[8..12].copy_from_slice(&self.last_image_index.to_le_bytes());

        let mut offset = 12;
        for name in [
            &self.last_image_name,
            &self.priority_image_name,
            &self.last_permanent_name,
            &self.last_temporary_name,
        ] {
            encode_name(&mut out[offset..offset + NAME_SLOT_LEN], name);
            offset += NAME_SLOT_LEN;
        }

        let checksum = checksum32(&out[..SELECTION_RECORD_LEN - 4]);
        out[SELECTION_RECORD_LEN - 4..].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Decode a record, falling back to defaults on any validation failure.
    pub fn decode_or_default(buf: &[u8]) -> Self {
        Self::decode(buf).unwrap_or_default()
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < SELECTION_RECORD_LEN {
            return None;
        }
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != SELECTION_MAGIC || buf[4] != SELECTION_VERSION {
            return None;
        }
        let expected = u32::from_le_bytes([
            buf[SELECTION_RECORD_LEN - 4],
            buf[SELECTION_RECORD_LEN - 3],
            buf[SELECTION_RECORD_LEN - 2],
            buf[SELECTION_RECORD_LEN - 1],
        ]);
        if checksum32(&buf[..SELECTION_RECORD_LEN - 4]) != expected {
            return None;
        }

        let mut state = Self {
            last_image_index: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            last_was_temporary: buf[5] & 0x01 != 0,
            ..Self::default()
        };

        let mut offset = 12;
        for slot in [
            &mut state.last_image_name,
            &mut state.priority_image_name,
            &mut state.last_permanent_name,
            &mut state.last_temporary_name,
        ] {
            *slot = decode_name(&buf[offset..offset + NAME_SLOT_LEN])?;
            offset += NAME_SLOT_LEN;
        }

        Some(state)
    }
}

/// Last known-good access point, keyed by a hash of the configured SSID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApHint {
    pub ssid_hash: u32,
    pub bssid: [u8; 6],
    pub channel: u8,
    pub rssi: i8,
}

impl ApHint {
    pub fn encode(&self, out: &mut [u8; AP_HINT_RECORD_LEN]) {
        out.fill(0);
        out[0..4].copy_from_slice(&AP_HINT_MAGIC.to_le_bytes());
        out[4] = AP_HINT_VERSION;
        out[5] = self.channel;
        out[6] = self.rssi as u8;
        out[8..12].copy_from_slice(&self.ssid_hash.to_le_bytes());
        out[12..18].copy_from_slice(&self.bssid);
        let checksum = checksum32(&out[..AP_HINT_RECORD_LEN - 4]);
        out[AP_HINT_RECORD_LEN - 4..].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Decode a hint record; `None` when absent, corrupt, or keyed to a
    /// different SSID.
    pub fn decode(buf: &[u8], ssid_hash: u32) -> Option<Self> {
        if buf.len() < AP_HINT_RECORD_LEN {
            return None;
        }
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != AP_HINT_MAGIC || buf[4] != AP_HINT_VERSION {
            return None;
        }
        let expected = u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]);
        if checksum32(&buf[..AP_HINT_RECORD_LEN - 4]) != expected {
            return None;
        }
        let stored_hash = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if stored_hash != ssid_hash {
            return None;
        }

        let mut bssid = [0u8; 6];
        bssid.copy_from_slice(&buf[12..18]);
        Some(Self {
            ssid_hash: stored_hash,
            bssid,
            channel: buf[5],
            rssi: buf[6] as i8,
        })
    }
}

/// Network identity hash used to key the AP hint.
pub fn ssid_hash(ssid: &str) -> u32 {
    checksum32(ssid.as_bytes())
}

/// Persistence backend for the two retained records.
///
/// Infallible by design: a backend that cannot produce a stored record
/// reports defaults, mirroring the decode-or-default record format.
pub trait StateStore {
    fn load(&mut self) -> SelectionState;
    fn save(&mut self, state: &SelectionState);

    fn load_ap_hint(&mut self, ssid_hash: u32) -> Option<ApHint>;
    fn save_ap_hint(&mut self, hint: &ApHint);
    /// Drop a hint that stopped working so the next attempt scans fresh.
    fn clear_ap_hint(&mut self);

    /// Last-write-wins mailbox for external command handlers; the worker
    /// consumes the override on its next RenderNext job.
    fn set_priority_image(&mut self, name: &str) {
        let mut state = self.load();
        state.priority_image_name.clear();
        let _ = state.priority_image_name.push_str(name);
        self.save(&state);
    }
}

/// In-memory backend used by host tests and early bring-up.
#[derive(Debug)]
pub struct MemoryStateStore {
    selection: [u8; SELECTION_RECORD_LEN],
    hint: [u8; AP_HINT_RECORD_LEN],
}

impl MemoryStateStore {
    pub const fn new() -> Self {
        Self {
            selection: [0; SELECTION_RECORD_LEN],
            hint: [0; AP_HINT_RECORD_LEN],
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&mut self) -> SelectionState {
        SelectionState::decode_or_default(&self.selection)
    }

    fn save(&mut self, state: &SelectionState) {
        state.encode(&mut self.selection);
    }

    fn load_ap_hint(&mut self, ssid_hash: u32) -> Option<ApHint> {
        ApHint::decode(&self.hint, ssid_hash)
    }

    fn save_ap_hint(&mut self, hint: &ApHint) {
        hint.encode(&mut self.hint);
    }

    fn clear_ap_hint(&mut self) {
        self.hint.fill(0);
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_name(slot: &mut [u8], name: &ImageName) {
    slot[0] = name.len() as u8;
    slot[1..1 + name.len()].copy_from_slice(name.as_bytes());
}

fn decode_name(slot: &[u8]) -> Option<ImageName> {
    let len = slot[0] as usize;
    if len > NAME_MAX {
        return None;
    }
    let text = core::str::from_utf8(&slot[1..1 + len]).ok()?;
    let mut name = ImageName::new();
    let _ = name.push_str(text);
    Some(name)
}

// FNV-1a over the raw record bytes.
fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C_9DC5u32;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}
