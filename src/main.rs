//! Satsuma entry point: load BIOS/ROM/save, build the console, run frames.

mod frontend;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use gumdrop::Options;

use emu::gba::Gba;
use frontend::{BufferedVideo, FileSave, RingAudio, SharedInput};

#[derive(Options)]
struct EmuOptions {
    /// Path to the ROM to run.
    #[options(free, required)]
    rom: PathBuf,

    /// Path to a 16 KiB GBA BIOS image (started from the cartridge entry
    /// point when absent).
    #[options(short = "b", meta = "FILE")]
    bios: Option<PathBuf>,

    /// Run this many frames and exit (0 = run until interrupted).
    #[options(default = "0")]
    frames: u64,

    /// Run unthrottled instead of pacing to ~59.73 fps.
    #[options(no_short)]
    unthrottled: bool,

    /// Enable debug logging.
    #[options(short = "d")]
    debug: bool,

    /// Only log warnings and errors.
    #[options(short = "q")]
    quiet: bool,

    /// Print help and exit.
    #[options(short = "h")]
    help: bool,

    /// Print the version and exit.
    #[options(short = "v")]
    version: bool,
}

fn main() -> ExitCode {
    let options = EmuOptions::parse_args_default_or_exit();

    if options.version {
        println!("satsuma {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let default_level = if options.debug {
        "debug"
    } else if options.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            // The documented fatal exit status.
            ExitCode::from(255)
        }
    }
}

fn run(options: &EmuOptions) -> anyhow::Result<()> {
    let rom = std::fs::read(&options.rom)
        .with_context(|| format!("reading ROM {:?}", options.rom))?;
    if rom.is_empty() || rom.len() > 32 * 1024 * 1024 {
        bail!("ROM size {} is outside 1 B - 32 MiB", rom.len());
    }

    let bios = match &options.bios {
        Some(path) => {
            Some(std::fs::read(path).with_context(|| format!("reading BIOS {path:?}"))?)
        }
        None => None,
    };

    let save_path = options.rom.with_extension("sav");
    let (video, _frame) = BufferedVideo::new();
    let (audio, _samples) = RingAudio::new(0x1000);
    let (input, _keys) = SharedInput::new();

    let mut gba = Gba::new(
        bios,
        rom,
        Box::new(video),
        Box::new(audio),
        Box::new(input),
        Some(Box::new(FileSave::new(save_path.clone()))),
    )?;

    load_existing_save(&mut gba, &save_path);

    tracing::info!(
        "running \"{}\" ({} frames{})",
        gba.cpu.bus.cartridge.header.game_title,
        if options.frames == 0 { "unlimited".to_string() } else { options.frames.to_string() },
        if options.unthrottled { ", unthrottled" } else { "" },
    );

    let frame_duration = Duration::from_nanos(1_000_000_000 * 280_896 / (1 << 24));
    let mut frame: u64 = 0;
    loop {
        let frame_start = Instant::now();
        gba.run_frame();
        frame += 1;

        if options.frames != 0 && frame >= options.frames {
            break;
        }
        if !options.unthrottled {
            let elapsed = frame_start.elapsed();
            if elapsed < frame_duration {
                std::thread::sleep(frame_duration - elapsed);
            }
        }
    }

    Ok(())
}

fn load_existing_save(gba: &mut Gba, path: &Path) {
    match std::fs::read(path) {
        Ok(image) => {
            tracing::info!("loaded save file {path:?}");
            gba.load_save(&image);
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => tracing::warn!("could not read save file {path:?}: {error}"),
    }
}
