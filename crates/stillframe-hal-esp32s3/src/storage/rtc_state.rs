//! Selection state and AP hint retained in RTC fast memory across deep
//! sleep.
//!
//! The records survive `sleep_deep` but not a power cycle; both decode to
//! defaults when the memory comes up as garbage, so no explicit first-boot
//! initialization is needed.

use core::cell::UnsafeCell;

use esp_hal::ram;
use stillframe_core::state::{
    AP_HINT_RECORD_LEN, ApHint, SELECTION_RECORD_LEN, SelectionState, StateStore,
};

/// Byte record kept out of the zero-init segment.
struct RetainedRecord<const N: usize>(UnsafeCell<[u8; N]>);

// Access only happens inside critical_section::with.
unsafe impl<const N: usize> Sync for RetainedRecord<N> {}

impl<const N: usize> RetainedRecord<N> {
    const fn new() -> Self {
        Self(UnsafeCell::new([0; N]))
    }

    fn read(&self) -> [u8; N] {
        critical_section::with(|_| unsafe { *self.0.get() })
    }

    fn write(&self, bytes: &[u8; N]) {
        critical_section::with(|_| unsafe { *self.0.get() = *bytes });
    }
}

#[ram(rtc_fast, persistent)]
static SELECTION_RECORD: RetainedRecord<SELECTION_RECORD_LEN> = RetainedRecord::new();

#[ram(rtc_fast, persistent)]
static AP_HINT_RECORD: RetainedRecord<AP_HINT_RECORD_LEN> = RetainedRecord::new();

/// [`StateStore`] backed by the two retained records.
pub struct RtcStateStore;

impl RtcStateStore {
    pub const fn new() -> Self {
        Self
    }
}

impl StateStore for RtcStateStore {
    fn load(&mut self) -> SelectionState {
        SelectionState::decode_or_default(&SELECTION_RECORD.read())
    }

    fn save(&mut self, state: &SelectionState) {
        let mut buf = [0u8; SELECTION_RECORD_LEN];
        state.encode(&mut buf);
        SELECTION_RECORD.write(&buf);
    }

    fn load_ap_hint(&mut self, ssid_hash: u32) -> Option<ApHint> {
        ApHint::decode(&AP_HINT_RECORD.read(), ssid_hash)
    }

    fn save_ap_hint(&mut self, hint: &ApHint) {
        let mut buf = [0u8; AP_HINT_RECORD_LEN];
        hint.encode(&mut buf);
        AP_HINT_RECORD.write(&buf);
    }

    fn clear_ap_hint(&mut self) {
        AP_HINT_RECORD.write(&[0u8; AP_HINT_RECORD_LEN]);
    }
}

impl Default for RtcStateStore {
    fn default() -> Self {
        Self::new()
    }
}
