use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nibble::config::{KernelConfig, LayerOrder};
use nibble::demo;
use nibble::display::TermDisplay;
use nibble::input::TerminalInput;
use nibble::kernel::Kernel;
use nibble::sound::{Heartbeat, SimpleBeep};

#[derive(Parser, Debug)]
#[command(name = "nibble", about = "Fantasy console kernel with a terminal front end.")]
struct Args {
    /// Cartridge started as pid 1
    #[arg(default_value = "apps/system/core/init.nib")]
    init: PathBuf,

    /// Cartridge opened by the menu key
    #[arg(long, value_name = "PATH", default_value = "apps/system/core/menu.nib")]
    menu: PathBuf,

    /// General purpose RAM in bytes
    #[arg(long, value_name = "BYTES", default_value_t = 32 * 1024)]
    ram_size: usize,

    /// Private memory per process in bytes
    #[arg(long, value_name = "BYTES", default_value_t = 64 * 1024)]
    cartridge_size: usize,

    /// Ticks per second
    #[arg(long, default_value_t = 60.0, value_parser = positive_rate)]
    fps: f64,

    /// Compose the CPU surface over the GPU layer instead of under it
    #[arg(long, action = clap::ArgAction::SetTrue)]
    cpu_on_top: bool,

    /// Directory recordings are written to
    #[arg(long, value_name = "PATH", default_value = ".")]
    capture_dir: PathBuf,

    /// Write logs here instead of stderr (the terminal belongs to the display)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn positive_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(format!("{rate} is not a positive frame rate"))
    }
}

impl Args {
    fn config(&self) -> KernelConfig {
        KernelConfig {
            ram_size: self.ram_size,
            cartridge_size: self.cartridge_size,
            init_cartridge: self.init.clone(),
            menu_cartridge: self.menu.clone(),
            frame_rate: self.fps,
            layer_order: if self.cpu_on_top {
                LayerOrder::GpuBelow
            } else {
                LayerOrder::CpuBelow
            },
            capture_dir: self.capture_dir.clone(),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let logs = tracing_subscriber::fmt().with_env_filter(filter);
    match &args.log_file {
        Some(path) => logs
            .with_ansi(false)
            .with_writer(Mutex::new(File::create(path)?))
            .init(),
        None => logs.with_writer(std::io::stderr).init(),
    }

    // initialise
    let mut display = TermDisplay::new()?;
    let mut input = TerminalInput::new()?;
    let mut sound = SimpleBeep::new();
    let heartbeat = Heartbeat::spawn(args.fps);

    let mut kernel = Kernel::new(args.config(), Box::new(demo::loader()));
    kernel.startup();
    kernel.run(&mut display, &mut input, &mut sound, &heartbeat)?;
    kernel.shutdown();

    // shove some junk on stdout to stop the cli messing up the last frame
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_must_be_positive() {
        for fps in ["0", "-30", "inf", "NaN", "fast"] {
            assert!(Args::try_parse_from(["nibble", "--fps", fps]).is_err(), "{}", fps);
        }
        let args = Args::try_parse_from(["nibble", "--fps", "30"]).unwrap();
        assert_eq!(args.config().frame_rate, 30.0);
    }
}
