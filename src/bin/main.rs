#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_net::Stack;
use embassy_time::{Duration as EmbassyDuration, Instant, Timer, WithTimeout};
use esp_hal::{
    clock::CpuClock,
    rtc_cntl::{SocResetReason, reset_reason, wakeup_cause},
    system::Cpu,
    timer::timg::TimerGroup,
};
use esp_radio::wifi::{ClientConfig, ModeConfig, ScanConfig, ScanMethod, WifiController};
use log::{LevelFilter, info, warn};
use static_cell::StaticCell;
use stillframe_core::{
    blob::SharedBlobStore,
    clock::VALID_EPOCH_MIN,
    jobs::{JobEngine, JobState},
    sched::{RenderGate, RenderScheduler},
    select::SelectMode,
    state::{ApHint, StateStore, ssid_hash},
};
use stillframe_hal_esp32s3::{
    clock::WallClock,
    network::{ConnectivityHandle, WifiConfig},
    storage::rtc_state::RtcStateStore,
};

use frame_env::FrameEnv;

#[path = "main/blob_pull.rs"]
mod blob_pull;
#[path = "main/frame_env.rs"]
mod frame_env;
#[path = "main/power.rs"]
mod power;

const WIFI_RETRY_BACKOFF_MIN_SECS: u64 = 2;
const WIFI_RETRY_BACKOFF_MAX_SECS: u64 = 120;
const NETWORK_POLL_INTERVAL_MS: u64 = 500;
const DHCP_TIMEOUT_SECS: u64 = 15;
const SCAN_MAX_RESULTS: usize = 8;

const SELECT_MODE: SelectMode = SelectMode::Random;
const RENDER_RETRY_MS: u64 = 5_000;
const FRAME_TICK_MS: u64 = 50;
/// Zero: the wake cycle renders once per wake, not on a powered cadence.
const RENDER_REFRESH_INTERVAL_MS: u64 = 0;
/// How long the frame sleeps between wake cycles.
const SLEEP_INTERVAL_SECS: u64 = 3_600;
/// Grace period for Wi-Fi and the pull before rendering without them.
const ONLINE_WAIT_MS: u64 = 45_000;
/// Hard cap on one wake cycle; sleep happens even with work undone.
const AWAKE_TIMEOUT_MS: u64 = 180_000;

const WIFI_SSID: &str = env!(
    "STILLFRAME_WIFI_SSID",
    "Set STILLFRAME_WIFI_SSID in your environment before building/flashing."
);
const WIFI_PASSWORD: &str = env!(
    "STILLFRAME_WIFI_PASSWORD",
    "Set STILLFRAME_WIFI_PASSWORD in your environment before building/flashing."
);
const WIFI_CONFIG: WifiConfig = WifiConfig::new(WIFI_SSID, WIFI_PASSWORD);
/// Container SAS URL for the cloud archive; sync is skipped when unset.
const ARCHIVE_SAS_URL: Option<&str> = option_env!("STILLFRAME_SAS_URL");

static CONNECTIVITY: ConnectivityHandle = ConnectivityHandle::new();
static ENGINE: JobEngine = JobEngine::new();
/// Remote container backing both the wake-time pull and the sync jobs.
static REMOTE_ARCHIVE: SharedBlobStore = SharedBlobStore::new();
static RENDER_GATE: RenderGate = RenderGate::new();
static WALL_CLOCK: WallClock = WallClock::new();
static NET_RESOURCES: StaticCell<embassy_net::StackResources<4>> = StaticCell::new();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

fn wifi_retry_backoff_secs(consecutive_failures: u32) -> u64 {
    // 2, 4, 8, 16, 32, 64, 120, 120, ...
    let shift = consecutive_failures.min(6);
    WIFI_RETRY_BACKOFF_MIN_SECS
        .saturating_mul(1u64 << shift)
        .min(WIFI_RETRY_BACKOFF_MAX_SECS)
}

async fn wait_before_wifi_retry(consecutive_failures: &mut u32) {
    let delay_secs = wifi_retry_backoff_secs(*consecutive_failures);
    *consecutive_failures = consecutive_failures.saturating_add(1);
    info!(
        "wifi retrying in {}s (consecutive_failures={})",
        delay_secs, *consecutive_failures
    );
    Timer::after_secs(delay_secs).await;
}

/// Directed scan for the configured network; the strongest match becomes the
/// retained hint so the next wake connects without a full sweep.
async fn discover_ap_hint(
    wifi_controller: &mut WifiController<'_>,
    state: &mut RtcStateStore,
    key: u32,
) -> Option<ApHint> {
    let scan = ScanConfig::default().with_max(SCAN_MAX_RESULTS);
    match wifi_controller.scan_with_config_async(scan).await {
        Ok(results) => {
            let best = results
                .iter()
                .filter(|ap| ap.ssid.as_str() == WIFI_CONFIG.ssid)
                .max_by_key(|ap| ap.signal_strength);
            match best {
                Some(ap) => {
                    let hint = ApHint {
                        ssid_hash: key,
                        bssid: ap.bssid,
                        channel: ap.channel,
                        rssi: ap.signal_strength,
                    };
                    state.save_ap_hint(&hint);
                    info!(
                        "wifi ap discovered channel={} rssi={}",
                        hint.channel, hint.rssi
                    );
                    Some(hint)
                }
                None => {
                    info!("wifi scan found no matching network");
                    None
                }
            }
        }
        Err(err) => {
            info!("wifi scan failed: {:?}", err);
            None
        }
    }
}

async fn wifi_connection_loop(
    wifi_controller: &mut WifiController<'_>,
    stack: Stack<'_>,
    connectivity: &'static ConnectivityHandle,
) -> ! {
    let mut state = RtcStateStore::new();
    let key = ssid_hash(WIFI_CONFIG.ssid);
    let mut consecutive_failures = 0u32;

    loop {
        connectivity.mark_connecting();

        if !wifi_controller.is_started().unwrap_or(false) {
            if let Err(err) = wifi_controller.start_async().await {
                info!("wifi start failed: {:?}", err);
                connectivity.mark_disconnected();
                wait_before_wifi_retry(&mut consecutive_failures).await;
                continue;
            }
        }

        let mut hint = state.load_ap_hint(key);
        if hint.is_none() {
            hint = discover_ap_hint(wifi_controller, &mut state, key).await;
        }

        let mut client_config = ClientConfig::default()
            .with_ssid(WIFI_CONFIG.ssid.into())
            .with_password(WIFI_CONFIG.password.into());
        client_config = match hint {
            Some(hint) => client_config
                .with_scan_method(ScanMethod::Fast)
                .with_channel(hint.channel)
                .with_bssid(hint.bssid),
            None => client_config.with_scan_method(ScanMethod::AllChannels),
        };
        if let Err(err) = wifi_controller.set_config(&ModeConfig::Client(client_config)) {
            info!("wifi mode config failed: {:?}", err);
            state.clear_ap_hint();
            wait_before_wifi_retry(&mut consecutive_failures).await;
            continue;
        }

        if let Err(err) = wifi_controller.connect_async().await {
            info!("wifi connect failed: {:?}", err);
            connectivity.mark_disconnected();
            if hint.is_some() {
                // The hinted AP may be gone; rescan on the next attempt.
                state.clear_ap_hint();
            }
            let _ = wifi_controller.disconnect_async().await;
            wait_before_wifi_retry(&mut consecutive_failures).await;
            continue;
        }

        match stack
            .wait_config_up()
            .with_timeout(EmbassyDuration::from_secs(DHCP_TIMEOUT_SECS))
            .await
        {
            Ok(()) => {
                connectivity.update_link_ip(stack.is_link_up(), stack.config_v4().is_some());
                info!("wifi connected and dhcp ready");
            }
            Err(_) => {
                info!("dhcp timeout; forcing reconnect");
                connectivity.update_link_ip(stack.is_link_up(), false);
                let _ = wifi_controller.disconnect_async().await;
                wait_before_wifi_retry(&mut consecutive_failures).await;
                continue;
            }
        }

        consecutive_failures = 0;

        loop {
            let link_up = stack.is_link_up();
            let has_ipv4 = stack.config_v4().is_some();
            let is_connected = matches!(wifi_controller.is_connected(), Ok(true));

            connectivity.update_link_ip(link_up, has_ipv4);

            if !(link_up && has_ipv4 && is_connected) {
                info!(
                    "wifi state lost (link_up={} has_ipv4={} connected={}); reconnecting",
                    link_up, has_ipv4, is_connected
                );
                break;
            }

            Timer::after_millis(NETWORK_POLL_INTERVAL_MS).await;
        }

        connectivity.mark_disconnected();
        let _ = wifi_controller.disconnect_async().await;
        wait_before_wifi_retry(&mut consecutive_failures).await;
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: stillframe starting");

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    let boot_reset_reason = reset_reason(Cpu::ProCpu);
    let boot_wakeup_cause = wakeup_cause();
    let woke_from_deep_sleep = boot_reset_reason == Some(SocResetReason::CoreDeepSleep);
    info!(
        "boot reset_reason={:?} wakeup_cause={:?}",
        boot_reset_reason, boot_wakeup_cause
    );

    // esp-radio requires an allocator; image payloads share the same heap.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 98304);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let radio = match esp_radio::init() {
        Ok(radio) => radio,
        Err(err) => {
            info!("esp-radio init failed: {:?}", err);
            loop {
                Timer::after_secs(1).await;
            }
        }
    };

    let (mut wifi_controller, interfaces) =
        match esp_radio::wifi::new(&radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                info!("wifi peripheral init failed: {:?}", err);
                loop {
                    Timer::after_secs(1).await;
                }
            }
        };

    let stack_config = embassy_net::Config::dhcpv4(Default::default());
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        stack_config,
        NET_RESOURCES.init(embassy_net::StackResources::<4>::new()),
        0x51A7_F0A3_11C4_0D92,
    );

    let mut env = FrameEnv::new(&RENDER_GATE, &CONNECTIVITY, &WALL_CLOCK, &REMOTE_ARCHIVE);

    info!(
        "frame started: mode={:?} sleep_interval_s={} sas_configured={}",
        SELECT_MODE,
        SLEEP_INTERVAL_SECS,
        ARCHIVE_SAS_URL.is_some()
    );
    if woke_from_deep_sleep {
        info!("wake cycle resumed from deep sleep");
    }

    CONNECTIVITY.mark_connecting();

    let net_future = net_runner.run();
    let wifi_future = wifi_connection_loop(&mut wifi_controller, stack, &CONNECTIVITY);
    let worker_future = ENGINE.run(&mut env);
    let frame_future = async {
        let mut scheduler =
            RenderScheduler::new(SELECT_MODE, RENDER_REFRESH_INTERVAL_MS, RENDER_RETRY_MS);
        let mut pull_attempted = false;
        let mut sync_job: Option<u32> = None;
        let mut sync_watched = false;

        loop {
            let now_ms = Instant::now().as_millis();

            // One pull per wake, as soon as the network is usable.
            if CONNECTIVITY.is_online() && !pull_attempted {
                pull_attempted = true;

                if let Some(sas_url) = ARCHIVE_SAS_URL {
                    // Same container the worker's sync jobs operate on; the
                    // state store views the same retained RTC records.
                    let mut pull_blob = REMOTE_ARCHIVE.handle();
                    let mut pull_state = RtcStateStore::new();
                    if blob_pull::pull_once(&ENGINE, &mut pull_blob, &mut pull_state, sas_url)
                        .await
                    {
                        scheduler.request_refresh();
                    }

                    // A full mirror pass additionally needs real time for
                    // expiry decisions.
                    // TODO: anchor WALL_CLOCK from an SNTP client so sync can
                    // run unattended.
                    if WALL_CLOCK.now_epoch(Instant::now().as_millis()) >= VALID_EPOCH_MIN {
                        sync_job = ENGINE.enqueue_sync(sas_url, Instant::now().as_millis());
                    } else {
                        info!("sync skipped: wall clock not set");
                    }
                }
            }

            if let Some(id) = sync_job
                && !sync_watched
            {
                match ENGINE.job(id) {
                    Some(job) if job.state == JobState::Done => {
                        sync_watched = true;
                        scheduler.request_refresh();
                    }
                    Some(job) if job.state == JobState::Error => {
                        sync_watched = true;
                        warn!("sync failed msg={}", job.message);
                    }
                    Some(_) => {}
                    None => sync_watched = true,
                }
            }

            scheduler.tick(&ENGINE, &RENDER_GATE, now_ms);

            let work_settled = pull_attempted && (sync_job.is_none() || sync_watched);
            let gave_up_waiting = now_ms >= ONLINE_WAIT_MS && !CONNECTIVITY.is_online();
            let cycle_done = scheduler.is_idle() && (work_settled || gave_up_waiting);
            if cycle_done || now_ms >= AWAKE_TIMEOUT_MS {
                if now_ms >= AWAKE_TIMEOUT_MS {
                    warn!("wake cycle overran; sleeping with work pending");
                }
                info!(
                    "wake cycle complete after {}ms; sleeping {}s",
                    now_ms, SLEEP_INTERVAL_SECS
                );
                power::enter_deep_sleep(SLEEP_INTERVAL_SECS);
            }

            Timer::after_millis(FRAME_TICK_MS).await;
        }
    };

    let _ = embassy_futures::join::join4(net_future, wifi_future, worker_future, frame_future)
        .await;
    unreachable!()
}
