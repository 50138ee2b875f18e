mod config;
mod output;

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{debug, error, info, warn};

use dotmatrix_core::{
    CoreError,
    audio_queue::audio_queue,
    cartridge::Cartridge,
    gameboy::GameBoy,
    input::Button,
    ppu::FRAME_BYTES,
    snapshot::MachineState,
};

use crate::config::Config;
use crate::output::WavRecorder;

#[derive(Parser)]
#[command(name = "dotmatrix", about = "Headless DMG Game Boy runner")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Number of frames to run (config file value when omitted)
    #[arg(long)]
    frames: Option<u64>,

    /// Stop once this many CPU cycles have run, checked between frames
    #[arg(long)]
    cycles: Option<u64>,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the last frame to this PNG file
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Record audio to this WAV file
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Write a save state on exit
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Restore a save state before running
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Print bytes sent over the serial port
    #[arg(long)]
    serial: bool,

    /// Buttons held for the whole run, e.g. `start,a`
    #[arg(long, value_delimiter = ',')]
    hold: Vec<Button>,

    /// Log filter, takes precedence over RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(filter: Option<&str>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(filter) = filter {
        builder.parse_filters(filter);
    }
    builder.init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => config::load_from_file(path),
        None => Config::default(),
    };
    let frames = args.frames.unwrap_or(config.frames);
    let cycle_limit = args.cycles.unwrap_or(u64::MAX);

    let cart = Cartridge::from_file(&args.rom)?;
    let mut gb = GameBoy::new(cart);
    gb.mmu.ppu.set_palette(config.palette);
    gb.mmu.apu.set_master_volume(config.master_volume);

    if let Some(path) = &args.load_state {
        let state = MachineState::from_bytes(&fs::read(path)?)?;
        gb.restore(&state)?;
        info!("Loaded state from {}", path.display());
    }

    for &button in &args.hold {
        gb.set_button(button, true);
    }

    let (mut producer, consumer) = audio_queue(config.audio_queue_frames);
    let mut recorder = args.wav.as_deref().map(WavRecorder::create).transpose()?;
    let mut frame: Vec<u8> = Vec::with_capacity(FRAME_BYTES);

    let mut cycles = 0u64;
    let mut frames_run = 0u64;
    let mut fault: Option<CoreError> = None;
    while frames_run < frames && cycles < cycle_limit {
        match gb.run_frame(&mut frame, &mut producer) {
            Ok(c) => {
                cycles += c;
                frames_run += 1;
            }
            Err(e) => {
                // The fault itself is reported once, by `main`.
                error!("{}", gb.cpu.debug_state());
                fault = Some(e);
                break;
            }
        }
        match recorder.as_mut() {
            Some(rec) => rec.drain(&consumer)?,
            None => while consumer.pop_stereo().is_some() {},
        }
    }
    info!("Ran {frames_run} frames ({cycles} cycles)");
    debug!("{}", gb.cpu.debug_state());

    if let Some(rec) = recorder {
        let written = rec.finalize()?;
        info!("Wrote {written} stereo frames of audio");
    }

    if let Some(path) = &args.screenshot {
        match output::write_png(path, &frame) {
            Ok(()) => info!("Saved screenshot to {}", path.display()),
            Err(e) => warn!("Screenshot not written: {e}"),
        }
    }

    if let Some(path) = &args.save_state {
        fs::write(path, gb.snapshot().to_bytes()?)?;
        info!("Saved state to {}", path.display());
    }

    if let Some(cart) = gb.mmu.cart.as_ref() {
        cart.save_ram()?;
    }

    if args.serial {
        let out = gb.take_serial_output();
        print!("{}", String::from_utf8_lossy(&out));
    }

    match fault {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
