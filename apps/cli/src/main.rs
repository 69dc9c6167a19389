use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kbfw_core::transport::{NusbBus, UsbBus};
use kbfw_core::{ExtractConfig, ExtractionError, extract, find_by_vendor};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    /// Full firmware region (0x2C00, 1100 packets)
    Firmware,
    /// Version-info region (0x2800, 10 packets)
    Version,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Keyboard firmware memory reader (Pure Rust)", long_about = None)]
struct Args {
    /// Show the list of all USB devices and exit
    #[arg(short, long)]
    list: bool,

    /// Show every device from this vendor and exit
    #[arg(long, value_name = "VID", value_parser = parse_u16)]
    scan_vendor: Option<u16>,

    /// Region preset to start from
    #[arg(long, value_enum, default_value_t = Preset::Firmware)]
    preset: Preset,

    /// Load settings from a TOML file (flags still override)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective settings to a TOML file
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// The device's vendor ID (hex with 0x, or decimal)
    #[arg(long, value_parser = parse_u16)]
    vendor_id: Option<u16>,

    /// The device's product ID (hex with 0x, or decimal)
    #[arg(long, value_parser = parse_u16)]
    product_id: Option<u16>,

    /// Interface to claim
    #[arg(long, value_parser = parse_u8)]
    interface: Option<u8>,

    /// First offset to read
    #[arg(long, value_parser = parse_u32)]
    base: Option<u32>,

    /// Number of 64-byte packets to read
    #[arg(long, value_parser = parse_u32)]
    count: Option<u32>,

    /// Per-transfer timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Do not detach the kernel HID driver before claiming
    #[arg(long)]
    no_detach: bool,

    /// Write the raw dump to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print a hex view of the dump to stdout
    #[arg(long)]
    hex: bool,

    /// Give more output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_int<T>(
    s: &str,
    radix_parse: fn(&str, u32) -> Result<T, std::num::ParseIntError>,
) -> Result<T, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => radix_parse(hex, 16),
        None => radix_parse(s, 10),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    parse_int(s, u8::from_str_radix)
}

fn parse_u16(s: &str) -> Result<u16, String> {
    parse_int(s, u16::from_str_radix)
}

fn parse_u32(s: &str) -> Result<u32, String> {
    parse_int(s, u32::from_str_radix)
}

impl Args {
    /// Device listing requested instead of a dump: `Some(vendor filter)`.
    fn listing(&self) -> Option<Option<u16>> {
        if self.list {
            Some(None)
        } else {
            self.scan_vendor.map(Some)
        }
    }

    fn effective_config(&self) -> Result<ExtractConfig> {
        let mut config = match &self.config {
            Some(path) => ExtractConfig::load_from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => match self.preset {
                Preset::Firmware => ExtractConfig::firmware(),
                Preset::Version => ExtractConfig::version(),
            },
        };

        if let Some(v) = self.vendor_id {
            config.vendor_id = v;
        }
        if let Some(v) = self.product_id {
            config.product_id = v;
        }
        if let Some(v) = self.interface {
            config.interface_id = v;
        }
        if let Some(v) = self.base {
            config.base_offset = v;
        }
        if let Some(v) = self.count {
            config.packet_count = v;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
        }
        if self.no_detach {
            config.detach_kernel_driver = false;
        }
        Ok(config)
    }
}

fn print_devices(bus: &NusbBus, vendor_id: Option<u16>) -> Result<()> {
    let devices = bus.devices()?;
    let devices = match vendor_id {
        Some(vid) => find_by_vendor(devices, vid),
        None => devices,
    };
    println!("List of current devices:");
    for device in devices {
        println!("{}", device);
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    // Listing needs no configuration.
    if let Some(vendor_id) = args.listing() {
        return print_devices(&NusbBus::default(), vendor_id);
    }

    let config = args.effective_config()?;
    let bus = NusbBus::new(config.detach_kernel_driver);

    if let Some(path) = &args.save_config {
        config.save_to_file(path)?;
        info!(path = %path.display(), "Saved configuration");
    }

    info!(bytes = config.dump_len(), "Starting to read device memory...");

    let dump = match extract(&bus, &config) {
        Ok(dump) => dump,
        Err(e @ ExtractionError::DeviceNotFound { .. }) => {
            if args.verbose >= 2 {
                print_devices(&bus, None)?;
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(path) = &args.output {
        dump.save_to_file(path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), bytes = dump.len(), "Dump saved");
    }
    if args.hex {
        print!("{}", dump.hexdump());
    }
    if args.output.is_none() && !args.hex {
        println!(
            "Read {} bytes from 0x{:08X} (use --output or --hex to keep them)",
            dump.len(),
            dump.base()
        );
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        let not_found = e
            .downcast_ref::<ExtractionError>()
            .is_some_and(ExtractionError::is_not_found);
        std::process::exit(if not_found { 2 } else { 1 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_u16("0x2516"), Ok(0x2516));
        assert_eq!(parse_u16("46"), Ok(46));
        assert_eq!(parse_u32("0X2C00"), Ok(0x2C00));
        assert!(parse_u8("0x100").is_err());
        assert!(parse_u16("keyboard").is_err());
    }

    #[test]
    fn test_flags_override_preset() {
        let args = Args::parse_from(["kbfw", "--preset", "version", "--count", "2", "--no-detach"]);
        let config = args.effective_config().unwrap();
        assert_eq!(config.base_offset, 0x2800);
        assert_eq!(config.packet_count, 2);
        assert!(!config.detach_kernel_driver);
    }

    #[test]
    fn test_listing_ignores_config() {
        let args = Args::parse_from(["kbfw", "--list", "--config", "/nonexistent/kbfw.toml"]);
        assert_eq!(args.listing(), Some(None));
        assert!(args.effective_config().is_err());

        let args = Args::parse_from(["kbfw", "--scan-vendor", "0x2516"]);
        assert_eq!(args.listing(), Some(Some(0x2516)));

        let args = Args::parse_from(["kbfw", "--preset", "version"]);
        assert_eq!(args.listing(), None);
    }

    #[test]
    fn test_args_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
