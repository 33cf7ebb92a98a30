//! Built-in source catalog
//!
//! One declaration per hardware backend shipped with TempestSDR. The native
//! modules themselves are built separately and found at runtime by the
//! resolver; declaring a source here does not require its module to exist.

use super::descriptor::SourceDescriptor;
use crate::register_source;

// SoapySDR covers many devices; rate is whatever the driver settles on.
register_source!("Soapy", "TSDRPlugin_Soapy", false);

fn uhd() -> SourceDescriptor {
    SourceDescriptor::new("USRP (via UHD)", "TSDRPlugin_UHD", false)
        .with_default_params("--rate 25e6")
        .with_description("Ettus USRP devices through the UHD driver")
}

register_source!("TSDRPlugin_UHD", uhd);

fn mirics() -> SourceDescriptor {
    SourceDescriptor::new("Mirics dongle", "TSDRPlugin_Mirics", false)
        .with_frequency_bounds(150_000, 2_000_000_000)
        .with_description("Mirics MSi2500 based dongles")
}

register_source!("TSDRPlugin_Mirics", mirics);

fn rtlsdr() -> SourceDescriptor {
    SourceDescriptor::new("RTL-SDR", "TSDRPlugin_RTLSDR", true)
        .with_frequency_bounds(24_000_000, 1_766_000_000)
        .with_sample_rate_bounds(225_001, 3_200_000)
        .with_default_params("0")
        .with_description("Realtek RTL2832U dongles")
}

register_source!("TSDRPlugin_RTLSDR", rtlsdr);

fn raw_file() -> SourceDescriptor {
    SourceDescriptor::new("Raw IQ file", "TSDRPlugin_RawFile", true)
        .with_description("Replays interleaved float32 I/Q samples from a file")
}

register_source!("TSDRPlugin_RawFile", raw_file);

fn test_tone() -> SourceDescriptor {
    SourceDescriptor::new("Test tone", "TSDRPlugin_TestTone", true)
        .with_sample_rate_bounds(1_000, 40_000_000)
        .with_default_params("tone=100000")
        .with_description("Synthetic complex tone, no hardware required")
}

register_source!("TSDRPlugin_TestTone", test_tone);
