//! Offline image commands: build an image from hex, and inspect one.

use {
    anyhow::{Context, Result, bail},
    console::style,
    picflash::{
        DeviceGeometry, Image, ImageBuilder, Key,
        protocol::packet::{self, Packet},
    },
    std::path::{Path, PathBuf},
};

use crate::files::FileSet;
use crate::{Cli, PolicyArgs, config::Config, resolve_device, warn_all};

/// Make command implementation.
pub(crate) fn cmd_make(
    cli: &Cli,
    config: &Config,
    files: &[PathBuf],
    boot_length: u32,
    policy: &PolicyArgs,
) -> Result<()> {
    let (set, warnings) = FileSet::classify(files);
    warn_all(cli, &warnings);
    let FileSet {
        hex: Some(hex),
        image: Some(image_path),
        key,
    } = set
    else {
        bail!("make needs a .hex input and a .img output");
    };

    let device = resolve_device(cli, config)?;
    let key = key
        .map(|path| {
            Key::from_file(&path).with_context(|| format!("Failed to load key {}", path.display()))
        })
        .transpose()?;
    if key.is_some() {
        picflash::crypto::self_test().context("Cipher self-test failed")?;
    }
    let encrypted = key.is_some();

    let image = ImageBuilder::new(device, policy.resolve(config, boot_length))
        .with_key(key)
        .strict(policy.strict(config))
        .build_from_file(&hex)
        .with_context(|| format!("Failed to build image from {}", hex.display()))?;
    image
        .write(&image_path)
        .with_context(|| format!("Failed to write {}", image_path.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} {} packets for {}{} written to {}",
            style("✓").green(),
            image.len(),
            style(device).cyan(),
            if encrypted { " (encrypted)" } else { "" },
            image_path.display()
        );
    }
    Ok(())
}

/// One line of the packet listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PacketSummary {
    /// Position in the image.
    pub index: usize,
    /// `data`, `iv`, `end` or `encrypted`.
    pub kind: &'static str,
    /// Target address of a data packet.
    pub address: Option<u32>,
    /// Bytes the bootloader writes.
    pub used_length: Option<u16>,
    /// Framed length on the wire.
    pub length: usize,
    /// CRC check result, when the packet is readable.
    pub crc_ok: Option<bool>,
}

/// Describe every packet of `image`. In an encrypted image the first packet
/// is the IV; the data packets cannot be decoded, so only their length is
/// known.
pub(crate) fn summarize(image: &Image) -> Vec<PacketSummary> {
    let encrypted = image.is_encrypted();
    image
        .packets()
        .iter()
        .enumerate()
        .map(|(index, bytes)| {
            let mut summary = PacketSummary {
                index,
                kind: "encrypted",
                address: None,
                used_length: None,
                length: bytes.len(),
                crc_ok: None,
            };
            if packet::is_end_packet(bytes) {
                summary.kind = "end";
                return summary;
            }
            if encrypted {
                if index == 0 {
                    summary.kind = "iv";
                    summary.crc_ok = Some(Packet::decode_iv(bytes).is_ok());
                }
                return summary;
            }
            match Packet::decode(bytes) {
                Ok(Packet::Data {
                    address,
                    used_length,
                    ..
                }) => {
                    summary.kind = "data";
                    summary.address = Some(address);
                    summary.used_length = Some(used_length);
                    summary.crc_ok = Some(true);
                },
                Ok(_) => summary.kind = "end",
                Err(_) => {
                    summary.kind = "data";
                    summary.crc_ok = Some(false);
                },
            }
            summary
        })
        .collect()
}

fn load_image(path: &Path) -> Result<Image> {
    Image::read(path).with_context(|| format!("Failed to load image {}", path.display()))
}

/// Info command implementation.
pub(crate) fn cmd_info(path: &Path, json: bool) -> Result<()> {
    let image = load_image(path)?;
    let packets = summarize(&image);

    if json {
        return print_info_json(image.device(), image.is_encrypted(), &packets);
    }

    eprintln!("{}", style("Image").bold().underlined());
    eprintln!("  Device:    {}", style(image.device()).cyan());
    eprintln!("  Device id: 0x{:08X}", image.device().device_id);
    eprintln!("  Packets:   {}", image.len());
    eprintln!(
        "  Encrypted: {}",
        if image.is_encrypted() { "yes" } else { "no" }
    );

    eprintln!("\n{}", style("Packets").bold().underlined());
    for p in &packets {
        let detail = match (p.address, p.used_length) {
            (Some(address), Some(used)) => format!("@ 0x{address:08X} ({used} bytes)"),
            _ => String::new(),
        };
        let crc = match p.crc_ok {
            Some(true) => style("CRC ok").green().to_string(),
            Some(false) => style("CRC bad").red().to_string(),
            None => String::new(),
        };
        eprintln!(
            "  [{:4}] {:9} {:5} bytes {} {}",
            p.index, p.kind, p.length, detail, crc
        );
    }
    Ok(())
}

fn print_info_json(
    device: &DeviceGeometry,
    encrypted: bool,
    packets: &[PacketSummary],
) -> Result<()> {
    let packets: Vec<serde_json::Value> = packets
        .iter()
        .map(|p| {
            serde_json::json!({
                "index": p.index,
                "kind": p.kind,
                "address": p.address.map(|a| format!("0x{a:08X}")),
                "used_length": p.used_length,
                "length": p.length,
                "crc_ok": p.crc_ok,
            })
        })
        .collect();

    let info = serde_json::json!({
        "ok": true,
        "data": {
            "device": device.name,
            "device_id": format!("0x{:08X}", device.device_id),
            "encrypted": encrypted,
            "packet_count": packets.len(),
            "packets": packets,
        }
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
