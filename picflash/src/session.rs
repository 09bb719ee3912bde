//! Cooperative control loop.
//!
//! One [`Session`] owns a [`Transport`] and a [`LinkProtocol`]. Each pass of
//! the loop:
//!
//! 1. reconciles port presence (attach/detach),
//! 2. feeds every received chunk to the protocol,
//! 3. advances a pending automated step (building the image when asked),
//! 4. services one command,
//! 5. probes for the bootloader when connecting,
//! 6. sends whatever the protocol queued.
//!
//! Transport errors are logged and the loop carries on.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::crypto::Key;
use crate::error::{Error, Result};
use crate::image::{Image, ImageBuilder};
use crate::port::{PortEvent, Transport};
use crate::protocol::link::{AutoAction, LinkEvent, LinkProtocol, LinkState};
use crate::target::{DeviceGeometry, FlashPolicy};

/// Pause after a connect probe.
pub const PROBE_DELAY: Duration = Duration::from_millis(100);

/// Pause when a pass found nothing to do.
const IDLE_DELAY: Duration = Duration::from_millis(10);

/// Commands a front end can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Leave the loop.
    Quit,
    /// Leave the bootloader and start the application.
    QuitBootloader,
    /// Request device info.
    Info,
    /// Build the image from the hex file.
    MakeImage,
    /// Load the image file.
    LoadImage,
    /// Erase application flash.
    Erase,
    /// Request the flash CRC.
    Crc,
    /// Send the next packet.
    WriteNext,
    /// Run the automated flash.
    AutoFlash,
    /// Ask the application to enter the bootloader.
    JumpToBootloader,
}

/// Inputs of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Expected device.
    pub device: &'static DeviceGeometry,
    /// Hex file to build images from.
    pub hex_path: Option<PathBuf>,
    /// Image file to load, or to save built images to.
    pub image_path: Option<PathBuf>,
    /// Encryption key.
    pub key: Option<Key>,
    /// Allow writes into boot flash.
    pub allow_boot_flash: bool,
    /// Allow writes into the configuration page.
    pub allow_configuration: bool,
    /// Strict hex parsing.
    pub strict_hex: bool,
    /// Start the automated flash on connect and stop when it ends.
    pub auto: bool,
}

impl SessionConfig {
    /// Configuration for `device` with default permissions and no files.
    pub fn new(device: &'static DeviceGeometry) -> Self {
        Self {
            device,
            hex_path: None,
            image_path: None,
            key: None,
            allow_boot_flash: true,
            allow_configuration: false,
            strict_hex: true,
            auto: false,
        }
    }

    fn policy(&self, boot_length: u32) -> FlashPolicy {
        FlashPolicy::new(boot_length)
            .with_boot_flash(self.allow_boot_flash)
            .with_configuration(self.allow_configuration)
    }
}

/// The control loop.
pub struct Session<T: Transport> {
    transport: T,
    link: LinkProtocol,
    config: SessionConfig,
    auto_started: bool,
    flash_success: bool,
}

impl<T: Transport> Session<T> {
    /// Create a session.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            link: LinkProtocol::new().with_device(config.device),
            config,
            auto_started: false,
            flash_success: false,
        }
    }

    /// The protocol state machine.
    pub fn link(&self) -> &LinkProtocol {
        &self.link
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run until [`Command::Quit`], an interrupt, or (in auto mode) the end
    /// of the automated flash. Returns whether an automated flash succeeded.
    pub fn run<C, E>(&mut self, mut next_command: C, mut on_event: E) -> Result<bool>
    where
        C: FnMut() -> Option<Command>,
        E: FnMut(&LinkEvent),
    {
        info!("Session started for {}", self.config.device);
        while self.poll_once(next_command(), &mut on_event) {
            if crate::is_interrupted_requested() {
                info!("Session interrupted");
                break;
            }
        }
        Ok(self.flash_success)
    }

    /// One pass of the loop. Returns `false` when the loop should stop.
    pub fn poll_once<E>(&mut self, command: Option<Command>, on_event: &mut E) -> bool
    where
        E: FnMut(&LinkEvent),
    {
        match self.transport.poll_presence() {
            Ok(Some(PortEvent::Attached(name))) => {
                on_event(&LinkEvent::Info(format!("Opened {name}")));
                self.link.port_attached();
            },
            Ok(Some(PortEvent::Detached(name))) => {
                on_event(&LinkEvent::Warning(format!("Port {name} removed")));
                self.link.port_detached();
            },
            Ok(None) => {},
            Err(e) => warn!("Port scan failed: {e}"),
        }

        let chunks = self.transport.drain();
        let busy = !chunks.is_empty() || command.is_some();
        for chunk in &chunks {
            let events = self.link.feed(chunk);
            self.dispatch(&events, on_event);
        }

        if self.config.auto && !self.auto_started && self.link.state() == LinkState::Connected {
            self.auto_started = self.link.start_auto_flash();
        }

        if let Some(AutoAction::BuildImage { boot_length }) = self.link.advance() {
            let image = self.build_or_load(boot_length).map(Arc::new);
            self.link.image_ready(image);
        }

        let mut keep_running = true;
        if let Some(command) = command {
            keep_running = self.handle_command(command);
        }

        let probed = self.link.probe();
        self.flush(on_event);
        let events = self.link.take_events();
        self.dispatch(&events, on_event);

        if probed {
            thread::sleep(PROBE_DELAY);
        } else if !busy {
            thread::sleep(IDLE_DELAY);
        }

        if self.config.auto && self.auto_started && !self.link.state().is_auto() {
            debug!("Automated flash finished");
            keep_running = false;
        }
        keep_running
    }

    fn dispatch<E>(&mut self, events: &[LinkEvent], on_event: &mut E)
    where
        E: FnMut(&LinkEvent),
    {
        for event in events {
            if let LinkEvent::FlashComplete { success } = event {
                self.flash_success = *success;
            }
            on_event(event);
        }
    }

    fn flush<E>(&mut self, on_event: &mut E)
    where
        E: FnMut(&LinkEvent),
    {
        for bytes in self.link.take_outbound() {
            if let Err(e) = self.transport.write_bytes(&bytes) {
                warn!("Write failed: {e}");
                on_event(&LinkEvent::Warning(format!("Write failed: {e}")));
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> bool {
        debug!("Command {command:?}");
        match command {
            Command::Quit => return false,
            Command::QuitBootloader => self.link.quit_bootloader(),
            Command::Info => self.link.request_info(),
            Command::MakeImage => match self.link.device_info().boot_length {
                Some(boot_length) => {
                    let image = self.build_image(boot_length).map(Arc::new);
                    self.link.image_ready(image);
                },
                None => self.link.image_ready(Err(Error::Protocol(
                    "bootloader size unknown, request info first".into(),
                ))),
            },
            Command::LoadImage => {
                let image = self.load_image().map(Arc::new);
                self.link.image_ready(image);
            },
            Command::Erase => {
                self.flash_success = false;
                self.link.erase();
            },
            Command::Crc => self.link.request_crc(),
            Command::WriteNext => self.link.write_next(),
            Command::AutoFlash => {
                self.link.start_auto_flash();
            },
            Command::JumpToBootloader => self.link.jump_to_bootloader(),
        }
        true
    }

    fn build_or_load(&self, boot_length: u32) -> Result<Image> {
        if self.config.hex_path.is_some() {
            self.build_image(boot_length)
        } else {
            self.load_image()
        }
    }

    fn build_image(&self, boot_length: u32) -> Result<Image> {
        let Some(hex_path) = &self.config.hex_path else {
            return Err(Error::MissingInput("no hex file given".into()));
        };
        let image = ImageBuilder::new(self.config.device, self.config.policy(boot_length))
            .with_key(self.config.key.clone())
            .strict(self.config.strict_hex)
            .build_from_file(hex_path)?;
        if let Some(image_path) = &self.config.image_path {
            image.write(image_path)?;
            info!("Saved image to {}", image_path.display());
        }
        Ok(image)
    }

    fn load_image(&self) -> Result<Image> {
        let Some(image_path) = &self.config.image_path else {
            return Err(Error::MissingInput("no image file given".into()));
        };
        let image = Image::read(image_path)?;
        if image.device().device_id != self.config.device.device_id {
            return Err(Error::InvalidImage(format!(
                "image is for {}, expected {}",
                image.device(),
                self.config.device
            )));
        }
        Ok(image)
    }
}
