#[cfg(feature = "audio")]
use goertzel_bank::audio_input;
use goertzel_bank::bank::AnalyzerBank;
use goertzel_bank::capture::{CaptureSource, SimulatedSource, TonePreset};
use goertzel_bank::config::BankConfig;
use goertzel_bank::console_display;

use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "goertzel-bank")]
#[command(about = "Streaming Goertzel detector bank for a set of target frequencies")]
struct Cli {
    /// JSON bank config; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target frequency in Hz (repeatable). Defaults to 440 and 1000.
    #[arg(long = "freq")]
    freqs: Vec<f32>,

    /// Capture sample rate (Hz)
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Samples per analysis block
    #[arg(long)]
    block_size: Option<usize>,

    /// Capture from the default audio input instead of the simulator
    #[arg(long)]
    live: bool,

    /// Capture source to select after startup (device or preset name)
    #[arg(long)]
    source: Option<String>,

    /// Print the available capture sources and exit
    #[arg(long)]
    list_sources: bool,

    /// Simulator tone in Hz (repeatable); mixed at equal amplitude
    #[arg(long = "tone")]
    tones: Vec<f64>,

    /// Enable console display (terminal TUI)
    #[arg(long)]
    console: bool,

    /// Console display refresh rate (Hz)
    #[arg(long, default_value_t = 20)]
    display_hz: u32,

    /// Stop after this many seconds (runs until interrupted otherwise)
    #[arg(long)]
    seconds: Option<f64>,
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match BankConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load config {:?}: {}", path, e);
                process::exit(1);
            }
        },
        None => BankConfig::default(),
    };
    if let Some(rate) = cli.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(size) = cli.block_size {
        config.block_size = size;
    }

    let freqs = if cli.freqs.is_empty() {
        vec![440.0, 1000.0]
    } else {
        cli.freqs.clone()
    };

    info!("═══════════════════════════════════════════════");
    info!("  GOERTZEL BANK v{}", env!("CARGO_PKG_VERSION"));
    info!("  Rate: {}Hz  Block: {}", config.sample_rate, config.block_size);
    info!("  Mode: {}", if cli.live { "LIVE" } else { "SIMULATOR" });
    if cli.console { info!("  UI: Console TUI"); }
    info!("═══════════════════════════════════════════════");

    let source = open_source(&cli, &config);
    let cycles_per_second = config.sample_rate as f64 / config.block_size as f64;

    let bank = match AnalyzerBank::initialize(config, source) {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to initialize analyzer bank: {}", e);
            process::exit(1);
        }
    };

    if cli.list_sources {
        match bank.query_sources() {
            Ok(sources) => {
                for name in sources {
                    println!("{}", name);
                }
            }
            Err(e) => error!("Source enumeration failed: {}", e),
        }
        bank.cleanup();
        return;
    }

    if let Some(name) = &cli.source {
        match bank.set_source(name) {
            Ok(true) => {}
            Ok(false) => warn!("Source {:?} not found, keeping the current one", name),
            Err(e) => error!("Failed to switch to source {:?}: {}", name, e),
        }
    }

    for &f in &freqs {
        if let Err(e) = bank.create_analyzer(f) {
            error!("Skipping {} Hz: {}", f, e);
        }
    }

    let rx = bank.subscribe();
    let mut handles = Vec::new();

    if cli.console {
        let hz = cli.display_hz;
        handles.push(thread::Builder::new().name("display".into()).spawn(move || {
            console_display::ConsoleDisplay::new(rx, hz, cycles_per_second).run();
        }).unwrap());
    } else {
        let every = (cycles_per_second.round() as u64).max(1);
        handles.push(thread::Builder::new().name("reporter".into()).spawn(move || {
            for snapshot in rx.iter().filter(|s| s.cycle % every == 0) {
                info!("{}", snapshot);
            }
        }).unwrap());
    }

    bank.start();

    match cli.seconds {
        Some(secs) => {
            thread::sleep(Duration::from_secs_f64(secs.max(0.0)));
            info!("Stopping after {:.1}s ({} cycles)", secs, bank.cycles());
            bank.stop();
            // Dropping the bank closes the subscriber channels.
            bank.cleanup();
            for h in handles {
                let _ = h.join();
            }
        }
        None => {
            info!("Running. Press Ctrl+C to stop.");
            for h in handles {
                let _ = h.join();
            }
        }
    }
}

fn open_source(cli: &Cli, config: &BankConfig) -> Box<dyn CaptureSource> {
    if cli.live {
        #[cfg(feature = "audio")]
        {
            match audio_input::CpalSource::open_default(config.sample_rate) {
                Ok(src) => return Box::new(src),
                Err(e) => error!("Live capture unavailable ({}). Falling back to simulator.", e),
            }
        }
        #[cfg(not(feature = "audio"))]
        {
            error!("Live capture requires 'audio' feature. Falling back to simulator.");
        }
    }

    let sim = SimulatedSource::new(config.sample_rate);
    if cli.tones.is_empty() {
        return Box::new(sim);
    }
    let amp = 1.0 / cli.tones.len() as f64;
    let tones: Vec<(f64, f64)> = cli.tones.iter().map(|&f| (f, amp)).collect();
    Box::new(sim.with_preset(TonePreset::new("tone", &tones)))
}
