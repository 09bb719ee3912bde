//! picflash CLI - Command-line tool for PIC32MX serial bootloaders.
//!
//! ## Features
//!
//! - Interactive bootloader session driven by single keystrokes
//! - Unattended automated flash (`session --auto`)
//! - Offline image building from Intel HEX, with optional encryption
//! - Image inspection, device table and serial port listing
//! - Configuration files and environment variable support

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use console::style;
use env_logger::Env;
use log::{debug, warn};
use picflash::{DeviceGeometry, FlashPolicy};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod files;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl+C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl+C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// picflash - Build and flash images for PIC32MX serial bootloaders.
///
/// Environment variables:
///   PICFLASH_PORT    - Default serial port
///   PICFLASH_BAUD    - Default baud rate (default: 115200)
///   PICFLASH_DEVICE  - Default device (e.g. PIC32MX250F128B)
#[derive(Parser)]
#[command(name = "picflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (first port that appears if not specified).
    #[arg(short, long, global = true, env = "PICFLASH_PORT")]
    pub port: Option<String>,

    /// Baud rate of the bootloader link [default: 115200].
    #[arg(short, long, global = true, env = "PICFLASH_BAUD")]
    pub baud: Option<u32>,

    /// Target device (e.g. PIC32MX250F128B; the PIC32 prefix is optional).
    #[arg(short, long, global = true, env = "PICFLASH_DEVICE")]
    pub device: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Write permissions and hex parsing mode.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct PolicyArgs {
    /// Never write boot flash.
    #[arg(long)]
    pub no_boot_flash: bool,

    /// Allow writing the configuration words page.
    #[arg(long)]
    pub allow_configuration: bool,

    /// Skip malformed hex records instead of failing.
    #[arg(long)]
    pub lenient_hex: bool,
}

impl PolicyArgs {
    /// Whether boot flash may be written.
    pub(crate) fn allow_boot_flash(&self, config: &Config) -> bool {
        !self.no_boot_flash && config.allow_boot_flash()
    }

    /// Whether the configuration page may be written.
    pub(crate) fn allow_configuration(&self, config: &Config) -> bool {
        self.allow_configuration || config.allow_configuration()
    }

    /// Whether malformed hex records are rejected.
    pub(crate) fn strict(&self, config: &Config) -> bool {
        !self.lenient_hex && config.strict_hex()
    }

    /// Write policy for a bootloader of `boot_length` bytes.
    pub(crate) fn resolve(&self, config: &Config, boot_length: u32) -> FlashPolicy {
        FlashPolicy::new(boot_length)
            .with_boot_flash(self.allow_boot_flash(config))
            .with_configuration(self.allow_configuration(config))
    }
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Talk to the bootloader: interactive keys, or one automated flash.
    Session {
        /// Input files: .hex firmware, .img image, .key encryption key.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Flash once as soon as the device connects, then exit.
        #[arg(long)]
        auto: bool,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Build an image file from a hex file without a device.
    Make {
        /// Input .hex, output .img and optional .key.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Bootloader size reported by the device (hex).
        #[arg(long, value_parser = parse_hex_u32)]
        boot_length: u32,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Show the contents of an image file.
    Info {
        /// Path to the image file.
        image: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List supported devices.
    Devices {
        /// Output the device table as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Run the CRC and cipher self-tests.
    SelfTest,
}

/// Parse hexadecimal value (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex value: {e}"))
}

/// Look up the target device from the command line, environment or config.
pub(crate) fn resolve_device(cli: &Cli, config: &Config) -> Result<&'static DeviceGeometry> {
    let Some(name) = config.device(cli.device.as_deref()) else {
        bail!("No device given; use --device, PICFLASH_DEVICE or [flash] device in picflash.toml");
    };
    DeviceGeometry::by_name(&name).with_context(|| "Run `picflash devices` for the supported parts")
}

/// Print non-fatal warnings.
pub(crate) fn warn_all(cli: &Cli, warnings: &[String]) {
    for warning in warnings {
        warn!("{warning}");
        if !cli.quiet {
            eprintln!("{} {}", style("⚠").yellow(), warning);
        }
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn main() -> Result<()> {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "picflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        warn!("Failed to install Ctrl+C handler: {e}");
    }
    picflash::set_interrupt_checker(was_interrupted);

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Session {
            files,
            auto,
            policy,
        } => {
            let success = commands::session::cmd_session(&cli, &config, files, *auto, policy)?;
            if *auto && !success {
                eprintln!("{} Automated flash did not complete", style("Error:").red().bold());
                std::process::exit(1);
            }
        },
        Commands::Make {
            files,
            boot_length,
            policy,
        } => {
            commands::image::cmd_make(&cli, &config, files, *boot_length, policy)?;
        },
        Commands::Info { image, json } => {
            commands::image::cmd_info(image, *json)?;
        },
        Commands::Devices { json } => {
            commands::device::cmd_devices(*json)?;
        },
        Commands::ListPorts { json } => {
            commands::device::cmd_list_ports(*json)?;
        },
        Commands::SelfTest => {
            commands::device::cmd_self_test(&cli)?;
        },
    }

    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_session() {
        let cli = Cli::try_parse_from([
            "picflash",
            "--port",
            "/dev/ttyUSB0",
            "--baud",
            "57600",
            "--device",
            "mx250f128b",
            "session",
            "app.hex",
            "app.img",
            "--auto",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, Some(57600));
        assert_eq!(cli.device.as_deref(), Some("mx250f128b"));
        if let Commands::Session {
            files,
            auto,
            policy,
        } = cli.command
        {
            assert_eq!(files, vec![PathBuf::from("app.hex"), PathBuf::from("app.img")]);
            assert!(auto);
            assert!(!policy.no_boot_flash);
        } else {
            panic!("Expected Session command");
        }
    }

    #[test]
    fn test_cli_session_needs_files() {
        assert!(Cli::try_parse_from(["picflash", "session"]).is_err());
    }

    #[test]
    fn test_cli_parse_make() {
        let cli = Cli::try_parse_from([
            "picflash",
            "make",
            "app.hex",
            "app.img",
            "--boot-length",
            "0x1000",
            "--no-boot-flash",
            "--allow-configuration",
            "--lenient-hex",
        ])
        .unwrap();
        if let Commands::Make {
            files,
            boot_length,
            policy,
        } = cli.command
        {
            assert_eq!(files.len(), 2);
            assert_eq!(boot_length, 0x1000);
            assert!(policy.no_boot_flash);
            assert!(policy.allow_configuration);
            assert!(policy.lenient_hex);
        } else {
            panic!("Expected Make command");
        }
    }

    #[test]
    fn test_cli_make_needs_boot_length() {
        assert!(Cli::try_parse_from(["picflash", "make", "app.hex", "app.img"]).is_err());
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["picflash", "info", "--json", "app.img"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { json: true, .. }));
    }

    #[test]
    fn test_cli_parse_simple_commands() {
        let cli = Cli::try_parse_from(["picflash", "devices", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Devices { json: true }));
        let cli = Cli::try_parse_from(["picflash", "list-ports"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: false }));
        let cli = Cli::try_parse_from(["picflash", "self-test"]).unwrap();
        assert!(matches!(cli.command, Commands::SelfTest));
    }

    #[test]
    fn test_cli_invalid_baud() {
        assert!(Cli::try_parse_from(["picflash", "--baud", "fast", "devices"]).is_err());
    }

    #[test]
    fn test_cli_verbosity() {
        let cli = Cli::try_parse_from(["picflash", "-vv", "-q", "devices"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
    }

    // ---- parse_hex_u32 ----

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_hex_u32("0X00_00_10_00").unwrap(), 0x1000);
        assert_eq!(parse_hex_u32("  ff ").unwrap(), 0xFF);
        assert!(parse_hex_u32("0xGG").is_err());
        assert!(parse_hex_u32("0x1FFFFFFFF").is_err());
    }

    // ---- policy flags ----

    #[test]
    fn test_policy_flags_override_config() {
        let config: Config =
            toml::from_str("[flash]\nallow_boot_flash = true\nstrict_hex = true\n").unwrap();
        let args = PolicyArgs {
            no_boot_flash: true,
            allow_configuration: true,
            lenient_hex: true,
        };
        let policy = args.resolve(&config, 0x1000);
        assert_eq!(policy.boot_length, 0x1000);
        assert!(!policy.allow_boot_flash);
        assert!(policy.allow_configuration);
        assert!(!args.strict(&config));

        let defaults = PolicyArgs::default().resolve(&Config::default(), 0x800);
        assert!(defaults.allow_boot_flash);
        assert!(!defaults.allow_configuration);
    }

    #[test]
    fn test_resolve_device() {
        let cli = Cli::try_parse_from(["picflash", "-d", "pic32mx170f256b", "devices"]).unwrap();
        let device = resolve_device(&cli, &Config::default()).unwrap();
        assert_eq!(device.row_size, 256);

        let cli = Cli::try_parse_from(["picflash", "-d", "nope", "devices"]).unwrap();
        assert!(resolve_device(&cli, &Config::default()).is_err());
    }
}
