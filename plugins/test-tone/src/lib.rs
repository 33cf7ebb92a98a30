//! Test tone source plugin
//!
//! Implements the TSDR native module contract without any hardware: once
//! streaming, it emits a complex exponential at a configurable offset from
//! the center frequency, paced to the configured sample rate.
//!
//! # Init Parameters
//!
//! Whitespace- or comma-separated `key=value` pairs:
//!
//! - `tone=<hz>` - tone offset in Hz (may be negative, default 100000)
//! - `amplitude=<linear>` - peak amplitude before gain (default 0.5)
//! - `block=<samples>` - samples per callback (default 4096)
//! - `rate=<hz>` - initial sample rate (default 2048000)

#![allow(non_snake_case)]

use std::ffi::{c_char, c_int, c_void};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tsdr_plugin_api::{
    c_str_to_string, write_c_str, SampleCallback, StatusCode, PLUGIN_API_VERSION, TEXT_BUFFER_LEN,
};

const PLUGIN_NAME: &str = "TSDR Test Tone Plugin";

pub const MIN_SAMPLE_RATE: u32 = 1_000;
pub const MAX_SAMPLE_RATE: u32 = 40_000_000;
const DEFAULT_SAMPLE_RATE: u32 = 2_048_000;
const DEFAULT_BLOCK: usize = 4096;
const MAX_BLOCK: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq)]
struct ToneSettings {
    tone_hz: f64,
    amplitude: f32,
    block: usize,
    sample_rate: u32,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            tone_hz: 100_000.0,
            amplitude: 0.5,
            block: DEFAULT_BLOCK,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

struct Device {
    initialized: bool,
    settings: ToneSettings,
    base_freq: u32,
    gain_db: f32,
    last_status: StatusCode,
    last_error: String,
}

impl Device {
    const fn new() -> Self {
        Self {
            initialized: false,
            settings: ToneSettings {
                tone_hz: 100_000.0,
                amplitude: 0.5,
                block: DEFAULT_BLOCK,
                sample_rate: DEFAULT_SAMPLE_RATE,
            },
            base_freq: 0,
            gain_db: 0.0,
            last_status: StatusCode::Ok,
            last_error: String::new(),
        }
    }

    fn fail(&mut self, status: StatusCode, message: impl Into<String>) -> StatusCode {
        self.last_status = status;
        self.last_error = message.into();
        status
    }

    fn ok(&mut self) -> StatusCode {
        self.last_status = StatusCode::Ok;
        self.last_error.clear();
        StatusCode::Ok
    }

    fn peak(&self) -> f32 {
        self.settings.amplitude * 10f32.powf(self.gain_db / 20.0)
    }
}

static DEVICE: Mutex<Device> = Mutex::new(Device::new());
static RUNNING: AtomicBool = AtomicBool::new(false);

fn parse_params(params: &str) -> Result<ToneSettings, String> {
    let mut settings = ToneSettings::default();

    for pair in params
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
    {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{pair}'"))?;
        let bad = || format!("invalid value '{value}' for {key}");

        match key {
            "tone" => settings.tone_hz = value.parse().map_err(|_| bad())?,
            "amplitude" => settings.amplitude = value.parse().map_err(|_| bad())?,
            "block" => {
                settings.block = value.parse().map_err(|_| bad())?;
                if settings.block == 0 || settings.block > MAX_BLOCK {
                    return Err(bad());
                }
            }
            "rate" => {
                settings.sample_rate = value.parse().map_err(|_| bad())?;
                if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&settings.sample_rate) {
                    return Err(bad());
                }
            }
            _ => return Err(format!("unknown parameter '{key}'")),
        }
    }

    Ok(settings)
}

#[no_mangle]
pub extern "system" fn tsdrplugin_getapiversion() -> u32 {
    PLUGIN_API_VERSION
}

/// # Safety
///
/// `name` must be valid for writes of `TEXT_BUFFER_LEN` bytes.
#[no_mangle]
pub unsafe extern "system" fn tsdrplugin_getName(name: *mut c_char) {
    write_c_str(name, TEXT_BUFFER_LEN, PLUGIN_NAME);
}

/// # Safety
///
/// `params` must be null or a valid null-terminated string.
#[no_mangle]
pub unsafe extern "system" fn tsdrplugin_init(params: *const c_char) -> c_int {
    let params = c_str_to_string(params).unwrap_or_default();
    let mut device = DEVICE.lock();

    match parse_params(&params) {
        Ok(settings) => {
            device.settings = settings;
            device.gain_db = 0.0;
            device.initialized = true;
            device.ok().code()
        }
        Err(message) => device.fail(StatusCode::PluginParametersWrong, message).code(),
    }
}

#[no_mangle]
pub extern "system" fn tsdrplugin_setsamplerate(rate: u32) -> u32 {
    let mut device = DEVICE.lock();
    if !device.initialized {
        device.fail(StatusCode::CannotOpenDevice, "not initialized");
        return 0;
    }
    if RUNNING.load(Ordering::SeqCst) {
        return device.settings.sample_rate;
    }
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
        device.fail(StatusCode::SampleRateWrong, format!("unsupported sample rate {rate}"));
        return 0;
    }
    device.settings.sample_rate = rate;
    device.ok();
    rate
}

#[no_mangle]
pub extern "system" fn tsdrplugin_getsamplerate() -> u32 {
    let device = DEVICE.lock();
    if device.initialized {
        device.settings.sample_rate
    } else {
        0
    }
}

#[no_mangle]
pub extern "system" fn tsdrplugin_setbasefreq(freq: u32) -> c_int {
    let mut device = DEVICE.lock();
    if !device.initialized {
        return device.fail(StatusCode::CannotOpenDevice, "not initialized").code();
    }
    device.base_freq = freq;
    device.ok().code()
}

#[no_mangle]
pub extern "system" fn tsdrplugin_setgain(gain: f32) -> c_int {
    let mut device = DEVICE.lock();
    if !gain.is_finite() {
        return device.fail(StatusCode::InvalidParameter, "gain must be finite").code();
    }
    device.gain_db = gain;
    device.ok().code()
}

#[no_mangle]
pub extern "system" fn tsdrplugin_stop() -> c_int {
    RUNNING.store(false, Ordering::SeqCst);
    StatusCode::Ok.code()
}

/// Stream the tone into `cb` until `tsdrplugin_stop` is called
///
/// # Safety
///
/// `cb` must be safe to call with `ctx` from this thread.
#[no_mangle]
pub unsafe extern "system" fn tsdrplugin_readasync(cb: SampleCallback, ctx: *mut c_void) -> c_int {
    {
        let mut device = DEVICE.lock();
        if !device.initialized {
            return device.fail(StatusCode::CannotOpenDevice, "not initialized").code();
        }
        if RUNNING.swap(true, Ordering::SeqCst) {
            return device.fail(StatusCode::AlreadyRunning, "already streaming").code();
        }
    }

    let mut phase = 0.0f64;
    let mut buffer: Vec<f32> = Vec::new();

    while RUNNING.load(Ordering::SeqCst) {
        let (settings, peak) = {
            let device = DEVICE.lock();
            (device.settings.clone(), device.peak())
        };

        let step = TAU * settings.tone_hz / f64::from(settings.sample_rate);
        buffer.clear();
        buffer.reserve(settings.block * 2);
        for _ in 0..settings.block {
            buffer.push(peak * phase.cos() as f32);
            buffer.push(peak * phase.sin() as f32);
            phase = (phase + step) % TAU;
        }

        cb(buffer.as_mut_ptr(), buffer.len() as u32, ctx, 0);

        std::thread::sleep(Duration::from_secs_f64(
            settings.block as f64 / f64::from(settings.sample_rate),
        ));
    }

    StatusCode::Ok.code()
}

#[no_mangle]
pub extern "system" fn tsdrplugin_cleanup() {
    RUNNING.store(false, Ordering::SeqCst);
    let mut device = DEVICE.lock();
    device.initialized = false;
    device.ok();
}

/// # Safety
///
/// `text` must be valid for writes of `TEXT_BUFFER_LEN` bytes.
#[no_mangle]
pub unsafe extern "system" fn tsdrplugin_getlasterrortext(text: *mut c_char) -> c_int {
    let device = DEVICE.lock();
    write_c_str(text, TEXT_BUFFER_LEN, &device.last_error);
    device.last_status.code()
}
