//! Device table, port listing and self-test command implementations.

use {
    anyhow::{Context, Result},
    console::style,
    picflash::{DeviceGeometry, NativePortEnumerator, PortEnumerator},
};

use crate::Cli;

/// Devices command implementation.
pub(crate) fn cmd_devices(json: bool) -> Result<()> {
    let devices = DeviceGeometry::all();

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "devices": devices,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Supported devices").bold().underlined());
    eprintln!(
        "  {:17} {:>10} {:>9} {:>8} {:>8}",
        "Part", "Device id", "Flash", "RAM", "Row"
    );
    for dev in devices {
        eprintln!(
            "  {:17} {:>10} {:>8}K {:>7}K {:>8}",
            style(dev.name).cyan(),
            format!("{:08X}", dev.device_id),
            dev.flash_size / 1024,
            dev.ram_size / 1024,
            dev.row_size
        );
    }
    Ok(())
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports().context("Failed to enumerate serial ports")?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }
    Ok(())
}

/// Run every known-answer test. Nothing is flashed if this fails.
pub(crate) fn run_self_tests() -> Result<()> {
    picflash::protocol::crc::self_test().context("CRC self-test failed")?;
    picflash::crypto::self_test().context("Cipher self-test failed")?;
    Ok(())
}

/// Self-test command implementation.
pub(crate) fn cmd_self_test(cli: &Cli) -> Result<()> {
    run_self_tests()?;
    if !cli.quiet {
        eprintln!("{} CRC32-K and ChaCha20 self-tests passed", style("✓").green());
    }
    Ok(())
}
