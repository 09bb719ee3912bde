//! Link protocol state machine.
//!
//! [`LinkProtocol`] does no I/O. The caller feeds it received bytes, drains
//! the bytes it wants sent with [`LinkProtocol::take_outbound`], and drives
//! the automated sequence with [`LinkProtocol::advance`]:
//!
//! ```text
//! PortClosed -> TryConnect -> Connected
//!                                |  start_auto_flash()
//!                                v
//!   AutoInfoStart -> AutoInfoPending -> AutoImageStart -> AutoImagePending
//!     -> AutoEraseStart -> AutoErasePending -> AutoWriteStart -> AutoWritePending
//!                                |
//!                                v
//!                            Connected
//! ```
//!
//! Every `...Start` state issues its command on the next `advance()` and
//! moves to `...Pending`. Pending states are left only by a watch: a line
//! watch fires when a completed device line contains its pattern, an ACK
//! watch fires on every ACK or NACK byte. A watch returns [`Watch::Keep`]
//! to stay registered or [`Watch::Done`] to be removed. Failures fall back
//! to `Connected`.

use std::fmt;
use std::mem;
use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::error::Result;
use crate::image::Image;
use crate::protocol::codes::{ACK_OK, AckCode, NackCode, Response, command};
use crate::target::DeviceGeometry;

/// Retries of a packet answered with a CRC mismatch (unencrypted images only).
pub const MAX_CRC_RETRIES: u32 = 3;

/// Line pattern of the device id info line. Two spaces keep it from
/// matching the `DEVID Ver` line.
const DEVID_PATTERN: &str = "DEVID  ";
const BOOT_SIZE_PATTERN: &str = "Bootloader size";
const VERSION_PATTERN: &str = "Bootloader Version";
const ERASE_FINISHED_PATTERN: &str = "Erase finished";

/// Protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transport.
    PortClosed,
    /// Transport open, probing for the bootloader.
    TryConnect,
    /// Bootloader answered the probe.
    Connected,
    /// About to request device info.
    AutoInfoStart,
    /// Waiting for device info.
    AutoInfoPending,
    /// About to request an image build.
    AutoImageStart,
    /// Waiting for the image.
    AutoImagePending,
    /// About to erase.
    AutoEraseStart,
    /// Waiting for the erase to finish.
    AutoErasePending,
    /// About to send the first packet.
    AutoWriteStart,
    /// Sending packets.
    AutoWritePending,
}

impl LinkState {
    /// Whether the automated sequence is running.
    pub fn is_auto(self) -> bool {
        !matches!(self, Self::PortClosed | Self::TryConnect | Self::Connected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Something the front end should show or act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The bootloader answered the connect probe.
    Connected,
    /// An acknowledge byte, with the running ACK count.
    Ack {
        /// Decoded code.
        code: AckCode,
        /// ACKs seen since the last manual erase.
        count: usize,
    },
    /// A negative acknowledge byte, with the running NACK count.
    Nack {
        /// Decoded code.
        code: NackCode,
        /// NACKs seen since the last manual erase.
        count: usize,
    },
    /// A complete line of device text.
    Line(String),
    /// The protocol state changed.
    StateChanged {
        /// Previous state.
        from: LinkState,
        /// New state.
        to: LinkState,
    },
    /// Informational message.
    Info(String),
    /// Non-fatal problem.
    Warning(String),
    /// Failed operation.
    Error(String),
    /// A packet was sent.
    Progress {
        /// Index of the packet just sent.
        index: usize,
        /// Packets in the image.
        total: usize,
    },
    /// The automated sequence finished.
    FlashComplete {
        /// Whether every packet was written.
        success: bool,
    },
}

/// Work the caller must do for the automated sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoAction {
    /// Build (or load) the image for a bootloader of `boot_length` bytes and
    /// report it with [`LinkProtocol::image_ready`].
    BuildImage {
        /// Bootloader size reported by the device.
        boot_length: u32,
    },
}

/// What a watch wants after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watch {
    /// Stay registered.
    Keep,
    /// Remove the watch.
    Done,
}

/// Values learned from the info command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Bootloader version text.
    pub version: Option<String>,
    /// DEVID register.
    pub device_id: Option<u32>,
    /// Bootloader size in bytes.
    pub boot_length: Option<u32>,
}

#[derive(Debug, Default)]
struct ManualStats {
    acks: usize,
    nacks: usize,
    cursor: usize,
    success: bool,
}

#[derive(Debug, Default)]
struct AutoContext {
    acks: usize,
    nacks: usize,
    erase_failures: usize,
    retries: u32,
    cursor: usize,
}

struct LinkCore {
    state: LinkState,
    outbox: Vec<Vec<u8>>,
    events: Vec<LinkEvent>,
    info: DeviceInfo,
    manual: ManualStats,
    auto: AutoContext,
    image: Option<Arc<Image>>,
    device: Option<&'static DeviceGeometry>,
}

impl LinkCore {
    fn set_state(&mut self, to: LinkState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("Link state {from} -> {to}");
        self.state = to;
        self.events.push(LinkEvent::StateChanged { from, to });
    }

    fn send(&mut self, bytes: Vec<u8>) {
        trace!("TX {} bytes", bytes.len());
        self.outbox.push(bytes);
    }
}

type LineAction = Box<dyn FnMut(&str, &mut LinkContext<'_>) -> Watch + Send>;
type AckAction = Box<dyn FnMut(Response, &mut LinkContext<'_>) -> Watch + Send>;

struct LineWatch {
    pattern: String,
    action: LineAction,
}

/// Handle passed to watches while they run.
pub struct LinkContext<'a> {
    core: &'a mut LinkCore,
    added_lines: Vec<LineWatch>,
    added_acks: Vec<AckAction>,
    cancelled: bool,
}

impl<'a> LinkContext<'a> {
    fn new(core: &'a mut LinkCore) -> Self {
        Self {
            core,
            added_lines: Vec::new(),
            added_acks: Vec::new(),
            cancelled: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.core.state
    }

    /// Change state.
    pub fn set_state(&mut self, state: LinkState) {
        self.core.set_state(state);
    }

    /// Queue bytes for sending.
    pub fn send(&mut self, bytes: impl Into<Vec<u8>>) {
        self.core.send(bytes.into());
    }

    /// Report an event.
    pub fn emit(&mut self, event: LinkEvent) {
        self.core.events.push(event);
    }

    /// Values learned from the info command so far.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.core.info
    }

    /// Register a line watch.
    pub fn watch_line<F>(&mut self, pattern: impl Into<String>, action: F)
    where
        F: FnMut(&str, &mut LinkContext<'_>) -> Watch + Send + 'static,
    {
        self.added_lines.push(LineWatch {
            pattern: pattern.into(),
            action: Box::new(action),
        });
    }

    /// Register an ACK/NACK watch.
    pub fn watch_ack<F>(&mut self, action: F)
    where
        F: FnMut(Response, &mut LinkContext<'_>) -> Watch + Send + 'static,
    {
        self.added_acks.push(Box::new(action));
    }

    /// Drop every other registered watch once the current dispatch ends.
    /// Watches registered through this context survive.
    pub fn cancel_watches(&mut self) {
        self.cancelled = true;
    }

    fn fail_auto(&mut self, message: String) {
        warn!("{message}");
        self.emit(LinkEvent::Error(message));
        self.set_state(LinkState::Connected);
        self.cancel_watches();
    }
}

/// The host side of the bootloader link.
pub struct LinkProtocol {
    core: LinkCore,
    line: String,
    line_watches: Vec<LineWatch>,
    ack_watches: Vec<AckAction>,
}

impl Default for LinkProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkProtocol {
    /// Create a protocol in [`LinkState::PortClosed`].
    pub fn new() -> Self {
        Self {
            core: LinkCore {
                state: LinkState::PortClosed,
                outbox: Vec::new(),
                events: Vec::new(),
                info: DeviceInfo::default(),
                manual: ManualStats::default(),
                auto: AutoContext::default(),
                image: None,
                device: None,
            },
            line: String::new(),
            line_watches: Vec::new(),
            ack_watches: Vec::new(),
        }
    }

    /// Device the automated sequence must find. Its id is checked against
    /// the DEVID the bootloader reports.
    #[must_use]
    pub fn with_device(mut self, device: &'static DeviceGeometry) -> Self {
        self.core.device = Some(device);
        self
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.core.state
    }

    /// Values learned from the info command.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.core.info
    }

    /// Current image, if any.
    pub fn image(&self) -> Option<&Arc<Image>> {
        self.core.image.as_ref()
    }

    /// Whether the last manual write pass ended without NACKs.
    pub fn manual_success(&self) -> bool {
        self.core.manual.success
    }

    /// Bytes queued for sending, oldest first.
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        mem::take(&mut self.core.outbox)
    }

    /// Events reported since the last call.
    pub fn take_events(&mut self) -> Vec<LinkEvent> {
        mem::take(&mut self.core.events)
    }

    /// A transport was opened.
    pub fn port_attached(&mut self) {
        self.reset_link();
        self.core.set_state(LinkState::TryConnect);
    }

    /// The transport went away.
    pub fn port_detached(&mut self) {
        self.reset_link();
        self.core.set_state(LinkState::PortClosed);
    }

    fn reset_link(&mut self) {
        self.line.clear();
        self.line_watches.clear();
        self.ack_watches.clear();
        self.core.outbox.clear();
        self.core.info = DeviceInfo::default();
    }

    /// Queue a connect probe when trying to connect. Returns whether one was
    /// queued; the caller should give the device a moment before probing
    /// again.
    pub fn probe(&mut self) -> bool {
        if self.core.state != LinkState::TryConnect {
            return false;
        }
        self.core.send(vec![command::PROBE]);
        true
    }

    /// Process received bytes and return the resulting events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<LinkEvent> {
        trace!("RX {bytes:02X?}");
        for &byte in bytes {
            self.handle_byte(byte);
        }
        self.take_events()
    }

    fn handle_byte(&mut self, byte: u8) {
        if self.core.state == LinkState::TryConnect && byte == ACK_OK {
            self.core.set_state(LinkState::Connected);
            self.core.events.push(LinkEvent::Connected);
            return;
        }

        if let Some(response) = Response::classify(byte) {
            match response {
                Response::Ack(code) => {
                    self.core.manual.acks += 1;
                    self.core.events.push(LinkEvent::Ack {
                        code,
                        count: self.core.manual.acks,
                    });
                },
                Response::Nack(code) => {
                    self.core.manual.nacks += 1;
                    warn!("{response}");
                    self.core.events.push(LinkEvent::Nack {
                        code,
                        count: self.core.manual.nacks,
                    });
                },
            }
            self.dispatch_ack(response);
            return;
        }

        // high bit marks device text
        let ch = if byte >= 0x80 { byte & 0x7F } else { byte };
        match ch {
            b'\n' => {
                let line = mem::take(&mut self.line);
                self.core.events.push(LinkEvent::Line(line.clone()));
                self.dispatch_line(&line);
            },
            b'\r' => {},
            _ => self.line.push(char::from(ch)),
        }
    }

    fn dispatch_line(&mut self, line: &str) {
        if self.line_watches.is_empty() {
            return;
        }
        let mut watches = mem::take(&mut self.line_watches);
        let mut ctx = LinkContext::new(&mut self.core);
        watches.retain_mut(|watch| {
            if ctx.cancelled {
                return false;
            }
            !line.contains(watch.pattern.as_str()) || (watch.action)(line, &mut ctx) == Watch::Keep
        });
        let LinkContext {
            added_lines,
            added_acks,
            cancelled,
            ..
        } = ctx;
        if cancelled {
            watches.clear();
            self.ack_watches.clear();
        }
        watches.extend(added_lines);
        self.line_watches = watches;
        self.ack_watches.extend(added_acks);
    }

    fn dispatch_ack(&mut self, response: Response) {
        if self.ack_watches.is_empty() {
            return;
        }
        let mut watches = mem::take(&mut self.ack_watches);
        let mut ctx = LinkContext::new(&mut self.core);
        watches.retain_mut(|action| !ctx.cancelled && action(response, &mut ctx) == Watch::Keep);
        let LinkContext {
            added_lines,
            added_acks,
            cancelled,
            ..
        } = ctx;
        if cancelled {
            watches.clear();
            self.line_watches.clear();
        }
        watches.extend(added_acks);
        self.ack_watches = watches;
        self.line_watches.extend(added_lines);
    }

    /// Register a line watch.
    pub fn watch_line<F>(&mut self, pattern: impl Into<String>, action: F)
    where
        F: FnMut(&str, &mut LinkContext<'_>) -> Watch + Send + 'static,
    {
        self.line_watches.push(LineWatch {
            pattern: pattern.into(),
            action: Box::new(action),
        });
    }

    /// Register an ACK/NACK watch.
    pub fn watch_ack<F>(&mut self, action: F)
    where
        F: FnMut(Response, &mut LinkContext<'_>) -> Watch + Send + 'static,
    {
        self.ack_watches.push(Box::new(action));
    }

    /// Run `f` with a context and merge the watches it registers.
    fn with_context(&mut self, f: impl FnOnce(&mut LinkContext<'_>)) {
        let mut ctx = LinkContext::new(&mut self.core);
        f(&mut ctx);
        let LinkContext {
            added_lines,
            added_acks,
            cancelled,
            ..
        } = ctx;
        if cancelled {
            self.line_watches.clear();
            self.ack_watches.clear();
        }
        self.line_watches.extend(added_lines);
        self.ack_watches.extend(added_acks);
    }

    fn require_port(&mut self) -> bool {
        if self.core.state == LinkState::PortClosed {
            self.core
                .events
                .push(LinkEvent::Warning("Port not open".into()));
            return false;
        }
        true
    }

    // Automated sequence

    /// Start the automated flash. Only valid when connected.
    pub fn start_auto_flash(&mut self) -> bool {
        if self.core.state != LinkState::Connected {
            self.core.events.push(LinkEvent::Warning(format!(
                "Cannot start automated flash in state {}",
                self.core.state
            )));
            return false;
        }
        // an earlier run may have stopped with its watches still registered
        self.line_watches.clear();
        self.ack_watches.clear();
        self.core.auto = AutoContext::default();
        self.core.set_state(LinkState::AutoInfoStart);
        true
    }

    /// Issue the command of a `...Start` state.
    pub fn advance(&mut self) -> Option<AutoAction> {
        match self.core.state {
            LinkState::AutoInfoStart => {
                self.core.info = DeviceInfo::default();
                self.with_context(|ctx| {
                    register_info_watches(ctx);
                    ctx.watch_ack(auto_info_ack);
                    ctx.send([command::INFO]);
                    ctx.set_state(LinkState::AutoInfoPending);
                });
                None
            },
            LinkState::AutoImageStart => {
                let Some(boot_length) = self.core.info.boot_length else {
                    self.with_context(|ctx| ctx.fail_auto("Bootloader size unknown".into()));
                    return None;
                };
                self.core.set_state(LinkState::AutoImagePending);
                Some(AutoAction::BuildImage { boot_length })
            },
            LinkState::AutoEraseStart => {
                self.core.auto.erase_failures = 0;
                self.with_context(|ctx| {
                    ctx.watch_ack(auto_erase_ack);
                    ctx.watch_line(ERASE_FINISHED_PATTERN, auto_erase_finished);
                    ctx.send([command::ERASE]);
                    ctx.set_state(LinkState::AutoErasePending);
                });
                None
            },
            LinkState::AutoWriteStart => {
                let Some(image) = self.core.image.clone() else {
                    self.with_context(|ctx| ctx.fail_auto("No image to write".into()));
                    return None;
                };
                self.core.auto.cursor = 0;
                self.core.auto.retries = 0;
                self.with_context(|ctx| {
                    send_auto_packet(ctx, &image);
                    ctx.watch_ack(auto_write_ack(image));
                    ctx.set_state(LinkState::AutoWritePending);
                });
                None
            },
            _ => None,
        }
    }

    /// Report the image requested by [`AutoAction::BuildImage`], or an image
    /// made or loaded by hand.
    pub fn image_ready(&mut self, image: Result<Arc<Image>>) {
        let pending = self.core.state == LinkState::AutoImagePending;
        match image {
            Ok(image) => {
                self.core.events.push(LinkEvent::Info(format!(
                    "Image ready: {} packets for {}",
                    image.len(),
                    image.device()
                )));
                self.core.image = Some(image);
                self.core.manual.cursor = 0;
                if pending {
                    self.core.set_state(LinkState::AutoEraseStart);
                }
            },
            Err(e) => {
                let message = format!("Image failed: {e}");
                if pending {
                    self.with_context(|ctx| ctx.fail_auto(message));
                } else {
                    self.core.events.push(LinkEvent::Error(message));
                }
            },
        }
    }

    // Manual commands

    /// Request device info; learns the bootloader size.
    pub fn request_info(&mut self) {
        if !self.require_port() {
            return;
        }
        self.with_context(|ctx| {
            register_info_watches(ctx);
            ctx.send([command::INFO]);
        });
    }

    /// Erase application flash. Resets the manual counters.
    pub fn erase(&mut self) {
        if !self.require_port() {
            return;
        }
        self.core.manual = ManualStats::default();
        self.core.send(vec![command::ERASE]);
    }

    /// Ask the device for the CRC of all flash.
    pub fn request_crc(&mut self) {
        if self.require_port() {
            self.core.send(vec![command::CRC]);
        }
    }

    /// Leave the bootloader.
    pub fn quit_bootloader(&mut self) {
        if self.require_port() {
            self.core.send(vec![command::QUIT]);
        }
    }

    /// Ask a running application to enter the bootloader, then probe again.
    pub fn jump_to_bootloader(&mut self) {
        if self.require_port() {
            self.core.send(vec![command::JUMP_TO_BOOTLOADER]);
            self.core.set_state(LinkState::TryConnect);
        }
    }

    /// Send the next packet of the image, wrapping after the last one. The
    /// last packet registers a watch that reports the ACK/NACK totals.
    pub fn write_next(&mut self) {
        if !self.require_port() {
            return;
        }
        let Some(image) = self.core.image.clone() else {
            self.core
                .events
                .push(LinkEvent::Warning("No image loaded".into()));
            return;
        };
        if image.is_empty() {
            return;
        }

        let index = self.core.manual.cursor % image.len();
        self.core.send(image.packets()[index].clone());
        self.core.events.push(LinkEvent::Progress {
            index,
            total: image.len(),
        });
        self.core.manual.cursor = (index + 1) % image.len();

        if index + 1 == image.len() {
            self.watch_ack(|_, ctx| {
                let (acks, nacks) = (ctx.core.manual.acks, ctx.core.manual.nacks);
                ctx.core.manual.success = nacks == 0;
                ctx.emit(LinkEvent::Info(format!("{acks} ACKs, {nacks} NACKs")));
                Watch::Done
            });
        }
    }
}

fn last_hex_token(line: &str) -> Option<u32> {
    let token = line.split_whitespace().last()?;
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16).ok()
}

fn register_info_watches(ctx: &mut LinkContext<'_>) {
    ctx.watch_line(VERSION_PATTERN, |line, ctx| {
        if let Some((_, version)) = line.split_once(':') {
            ctx.core.info.version = Some(version.trim().to_string());
        }
        Watch::Done
    });
    ctx.watch_line(DEVID_PATTERN, |line, ctx| {
        match last_hex_token(line) {
            Some(id) => {
                debug!("DEVID {id:#010X}");
                ctx.core.info.device_id = Some(id);
            },
            None => ctx.emit(LinkEvent::Warning(format!("Cannot parse DEVID from '{line}'"))),
        }
        Watch::Done
    });
    ctx.watch_line(BOOT_SIZE_PATTERN, |line, ctx| {
        match last_hex_token(line) {
            Some(length) => {
                ctx.core.info.boot_length = Some(length);
                ctx.emit(LinkEvent::Info(format!("Bootloader size {length:#X}")));
            },
            None => ctx.emit(LinkEvent::Warning(format!(
                "Cannot parse bootloader size from '{line}'"
            ))),
        }
        Watch::Done
    });
}

fn auto_info_ack(response: Response, ctx: &mut LinkContext<'_>) -> Watch {
    match response {
        Response::Nack(code) => {
            ctx.fail_auto(format!("Info failed: {}", code.reason()));
            Watch::Done
        },
        Response::Ack(AckCode::Ok) => {
            if ctx.core.info.boot_length.is_none() {
                ctx.fail_auto("Bootloader size not reported".into());
                return Watch::Done;
            }
            if let (Some(device), Some(id)) = (ctx.core.device, ctx.core.info.device_id) {
                if device.device_id != id {
                    ctx.fail_auto(format!(
                        "Device id {id:#010X} does not match {device} ({:#010X})",
                        device.device_id
                    ));
                    return Watch::Done;
                }
            }
            ctx.set_state(LinkState::AutoImageStart);
            Watch::Done
        },
        Response::Ack(_) => Watch::Keep,
    }
}

fn auto_erase_ack(response: Response, ctx: &mut LinkContext<'_>) -> Watch {
    match response {
        Response::Nack(NackCode::EraseFailed) => {
            ctx.core.auto.erase_failures += 1;
            Watch::Keep
        },
        Response::Ack(AckCode::EraseDone) => Watch::Done,
        _ => Watch::Keep,
    }
}

fn auto_erase_finished(_line: &str, ctx: &mut LinkContext<'_>) -> Watch {
    if ctx.state() != LinkState::AutoErasePending {
        return Watch::Done;
    }
    let failures = ctx.core.auto.erase_failures;
    if failures == 0 {
        ctx.set_state(LinkState::AutoWriteStart);
    } else {
        ctx.fail_auto(format!("Erase failed on {failures} pages"));
    }
    Watch::Done
}

fn send_auto_packet(ctx: &mut LinkContext<'_>, image: &Image) {
    let index = ctx.core.auto.cursor;
    ctx.send(image.packets()[index].clone());
    ctx.emit(LinkEvent::Progress {
        index,
        total: image.len(),
    });
}

fn auto_write_ack(image: Arc<Image>) -> impl FnMut(Response, &mut LinkContext<'_>) -> Watch + Send {
    let encrypted = image.is_encrypted();
    move |response, ctx| {
        if ctx.state() != LinkState::AutoWritePending {
            return Watch::Done;
        }
        match response {
            Response::Ack(AckCode::Ok) => {
                ctx.core.auto.acks += 1;
                ctx.core.auto.retries = 0;
                ctx.core.auto.cursor += 1;
                if ctx.core.auto.cursor >= image.len() {
                    let auto = &ctx.core.auto;
                    let summary = format!(
                        "Flash complete: {} packets written, {} NACKs",
                        auto.acks, auto.nacks
                    );
                    ctx.emit(LinkEvent::Info(summary));
                    ctx.emit(LinkEvent::FlashComplete { success: true });
                    ctx.set_state(LinkState::Connected);
                    return Watch::Done;
                }
                send_auto_packet(ctx, &image);
                Watch::Keep
            },
            Response::Ack(_) => Watch::Keep,
            Response::Nack(code) => {
                ctx.core.auto.nacks += 1;
                let index = ctx.core.auto.cursor;
                let retry = code == NackCode::CrcMismatch
                    && !encrypted
                    && ctx.core.auto.retries < MAX_CRC_RETRIES;
                if retry {
                    ctx.core.auto.retries += 1;
                    ctx.emit(LinkEvent::Warning(format!(
                        "CRC mismatch on packet {index}, retry {}",
                        ctx.core.auto.retries
                    )));
                    send_auto_packet(ctx, &image);
                    return Watch::Keep;
                }
                // no FC follows these, and an encrypted stream cannot be resent
                if matches!(code, NackCode::CrcMismatch | NackCode::PacketTooLarge) {
                    ctx.emit(LinkEvent::FlashComplete { success: false });
                    ctx.fail_auto(format!("Write failed at packet {index}: {}", code.reason()));
                    return Watch::Done;
                }
                Watch::Keep
            },
        }
    }
}
