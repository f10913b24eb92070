pub mod bank;
pub mod bas;
pub mod capture;
pub mod config;
pub mod console_display;
pub mod dsp;
pub mod error;
pub mod filter;
pub mod goertzel;
pub mod throttle;
pub mod types;
pub mod wbas;

#[cfg(feature = "audio")]
pub mod audio_input;
