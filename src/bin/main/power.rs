use core::time::Duration;

use esp_hal::{
    peripherals::LPWR,
    rtc_cntl::{Rtc, sleep::TimerWakeupSource},
};

/// Deep sleep until the RTC timer fires. Execution resumes at reset with
/// RTC fast memory intact.
pub(super) fn enter_deep_sleep(sleep_secs: u64) -> ! {
    let mut rtc = Rtc::new(unsafe { LPWR::steal() });
    let wake_source = TimerWakeupSource::new(Duration::from_secs(sleep_secs));
    rtc.sleep_deep(&[&wake_source]);
}
