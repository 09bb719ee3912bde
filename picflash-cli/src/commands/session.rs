//! Session command: the interactive or automated bootloader loop.
//!
//! - Main thread: keystrokes (crossterm raw mode) → session commands
//! - Serial reader thread: owned by the transport
//! - Ctrl+C: graceful exit

use anyhow::{Context, Result, bail};
use console::style;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use indicatif::{ProgressBar, ProgressStyle};
use picflash::protocol::{LinkEvent, Response};
use picflash::{Command, Key, SerialConfig, SerialTransport, Session, SessionConfig};
use std::cell::RefCell;
use std::io::{self, IsTerminal, Write as _};
use std::path::PathBuf;
use std::time::Duration;

use crate::commands::device::run_self_tests;
use crate::config::Config;
use crate::files::FileSet;
use crate::{Cli, PolicyArgs, resolve_device, use_fancy_output, warn_all};

/// What a keystroke asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyAction {
    /// A session command.
    Command(Command),
    /// Print the key help.
    Help,
    /// Not bound.
    Unknown(char),
}

/// Map a key to its action.
pub(crate) fn key_action(key: char) -> KeyAction {
    let command = match key.to_ascii_lowercase() {
        'q' => Command::Quit,
        'x' => Command::QuitBootloader,
        'i' => Command::Info,
        'm' => Command::MakeImage,
        'l' => Command::LoadImage,
        'e' => Command::Erase,
        'c' => Command::Crc,
        's' => Command::WriteNext,
        'f' => Command::AutoFlash,
        'b' => Command::JumpToBootloader,
        '?' | 'h' => return KeyAction::Help,
        other => return KeyAction::Unknown(other),
    };
    KeyAction::Command(command)
}

const KEY_HELP: &[(&str, &str)] = &[
    ("q", "quit"),
    ("x", "leave bootloader and start application"),
    ("i", "device info"),
    ("m", "make image from hex"),
    ("l", "load image file"),
    ("e", "erase application flash"),
    ("c", "CRC of device flash"),
    ("s", "send next packet"),
    ("f", "automated flash"),
    ("b", "jump from application to bootloader"),
    ("?", "this help"),
];

/// Terminal output that works in raw mode and around a progress bar.
struct Console {
    raw: bool,
    quiet: bool,
    progress: Option<ProgressBar>,
}

impl Console {
    fn line(&self, message: &str) {
        let print = || {
            if self.raw {
                eprint!("\r\x1b[2K{message}\r\n");
            } else {
                eprintln!("{message}");
            }
            io::stderr().flush().ok();
        };
        match &self.progress {
            Some(pb) => pb.suspend(print),
            None => print(),
        }
    }

    fn help(&self) {
        self.line(&style("Keys").bold().underlined().to_string());
        for (key, what) in KEY_HELP {
            self.line(&format!("  {}  {}", style(key).cyan().bold(), what));
        }
    }

    fn progress(&mut self, index: usize, total: usize) {
        if self.quiet || !use_fancy_output() {
            return;
        }
        if index == 0 || self.progress.is_none() {
            if let Some(pb) = self.progress.take() {
                pb.finish_and_clear();
            }
            let pb = ProgressBar::new(total as u64);
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            self.progress = Some(pb);
        }
        if let Some(pb) = &self.progress {
            pb.set_position(index as u64 + 1);
        }
    }

    fn finish_progress(&mut self) {
        if let Some(pb) = self.progress.take() {
            pb.finish_and_clear();
        }
    }

    fn event(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::Progress { index, total } => {
                self.progress(*index, *total);
                return;
            },
            LinkEvent::FlashComplete { .. } => self.finish_progress(),
            _ => {},
        }
        if let Some(text) = render_event(event, self.quiet) {
            self.line(&text);
        }
    }
}

/// Styled text for an event, or `None` when it is not shown.
pub(crate) fn render_event(event: &LinkEvent, quiet: bool) -> Option<String> {
    let text = match event {
        LinkEvent::Connected => format!("{} Connected to bootloader", style("✓").green()),
        LinkEvent::Ack { code, count } => {
            if quiet {
                return None;
            }
            style(format!("{} [{count}]", Response::Ack(*code)))
                .dim()
                .to_string()
        },
        LinkEvent::Nack { code, count } => format!(
            "{} {} [{count}]",
            style("⚠").yellow(),
            style(Response::Nack(*code)).yellow()
        ),
        LinkEvent::Line(line) => {
            if quiet {
                return None;
            }
            format!("{} {line}", style("<").dim())
        },
        LinkEvent::StateChanged { from, to } => {
            if quiet {
                return None;
            }
            style(format!("{from} -> {to}")).dim().to_string()
        },
        LinkEvent::Info(message) => {
            if quiet {
                return None;
            }
            format!("{} {message}", style("ℹ").blue())
        },
        LinkEvent::Warning(message) => format!("{} {message}", style("⚠").yellow()),
        LinkEvent::Error(message) => format!("{} {message}", style("✗").red().bold()),
        LinkEvent::Progress { .. } => return None,
        LinkEvent::FlashComplete { success: true } => {
            format!("{} Flash complete", style("🎉").green().bold())
        },
        LinkEvent::FlashComplete { success: false } => {
            format!("{} Flash failed", style("✗").red().bold())
        },
    };
    Some(text)
}

struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Read one pending keystroke without blocking.
fn poll_key() -> Result<Option<char>> {
    if !event::poll(Duration::ZERO)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(KeyEvent {
            code: KeyCode::Char('c'),
            modifiers: KeyModifiers::CONTROL,
            ..
        }) => Ok(Some('q')),
        Event::Key(KeyEvent {
            code: KeyCode::Char(c),
            kind: KeyEventKind::Press,
            ..
        }) => Ok(Some(c)),
        Event::Key(KeyEvent {
            code: KeyCode::Esc,
            kind: KeyEventKind::Press,
            ..
        }) => Ok(Some('q')),
        _ => Ok(None),
    }
}

/// Session command implementation. Returns whether an automated flash
/// succeeded.
pub(crate) fn cmd_session(
    cli: &Cli,
    config: &Config,
    files: &[PathBuf],
    auto: bool,
    policy: &PolicyArgs,
) -> Result<bool> {
    let (set, warnings) = FileSet::classify(files);
    warn_all(cli, &warnings);
    if !set.has_firmware() {
        bail!("A .hex or .img file is required");
    }
    // a .img is only an input when there is no .hex to build from
    let input = set.hex.as_ref().or(set.image.as_ref());
    if let Some(path) = input.filter(|p| !p.exists()) {
        bail!("File not found: {}", path.display());
    }

    // nothing touches the port until the cipher checks out
    run_self_tests()?;

    let device = resolve_device(cli, config)?;
    let key = set
        .key
        .as_ref()
        .map(|path| {
            Key::from_file(path).with_context(|| format!("Failed to load key {}", path.display()))
        })
        .transpose()?;

    let session_config = SessionConfig {
        device,
        hex_path: set.hex.clone(),
        image_path: set.image.clone(),
        key,
        allow_boot_flash: policy.allow_boot_flash(config),
        allow_configuration: policy.allow_configuration(config),
        strict_hex: policy.strict(config),
        auto,
    };

    let port = config.port(cli.port.as_deref());
    let baud = config.baud(cli.baud);
    let transport = SerialTransport::new(SerialConfig::new(port.clone().unwrap_or_default(), baud));

    let interactive = !auto;
    if interactive && !io::stdin().is_terminal() {
        bail!("Interactive session needs a terminal; use --auto");
    }

    let console = RefCell::new(Console {
        raw: interactive,
        quiet: cli.quiet,
        progress: None,
    });

    if !cli.quiet {
        eprintln!(
            "{} Waiting for {} on {} at {} baud",
            style("⏳").yellow(),
            style(device).cyan(),
            port.as_deref().unwrap_or("the first serial port"),
            baud
        );
        if interactive {
            eprintln!("{}", style("Press ? for help, q to quit").dim());
        }
    }

    let mut session = Session::new(transport, session_config);

    let raw_guard = if interactive {
        terminal::enable_raw_mode().context("Failed to enable raw terminal mode")?;
        Some(RawModeGuard)
    } else {
        None
    };

    let mut key_error = None;
    let result = session.run(
        || {
            if !interactive || key_error.is_some() {
                return None;
            }
            let key = match poll_key() {
                Ok(key) => key?,
                Err(e) => {
                    key_error = Some(e);
                    return Some(Command::Quit);
                },
            };
            match key_action(key) {
                KeyAction::Command(command) => Some(command),
                KeyAction::Help => {
                    console.borrow().help();
                    None
                },
                KeyAction::Unknown(c) => {
                    console.borrow().line(&format!(
                        "{} Unknown key '{}', press ? for help",
                        style("⚠").yellow(),
                        c.escape_default()
                    ));
                    None
                },
            }
        },
        |event| console.borrow_mut().event(event),
    );
    console.borrow_mut().finish_progress();
    drop(raw_guard);

    if let Some(e) = key_error {
        return Err(e.context("Failed to read keyboard input"));
    }
    result.context("Session failed")
}
