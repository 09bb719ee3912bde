//! Native serial transport using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{PortEnumerator, PortEvent, PortInfo, SerialConfig, Transport},
    },
    log::{debug, info, trace, warn},
    serialport::SerialPort,
    std::{
        io::{ErrorKind, Read, Write},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
            mpsc::{self, Receiver},
        },
        thread::{self, JoinHandle},
        time::{Duration, Instant},
    },
};

const READ_CHUNK: usize = 256;

/// Minimum time between two port enumerations.
const SCAN_INTERVAL: Duration = Duration::from_millis(100);

struct OpenPort {
    name: String,
    writer: Box<dyn SerialPort>,
    rx: Receiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl OpenPort {
    fn open(name: &str, config: &SerialConfig) -> Result<Self> {
        let writer = serialport::new(name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;
        let mut reader = writer.try_clone()?;

        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let thread_stop = Arc::clone(&stop);
        let thread_alive = Arc::clone(&alive);
        let thread_name = name.to_string();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            while !thread_stop.load(Ordering::Relaxed) {
                match reader.read(&mut buf) {
                    Ok(0) => {},
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    },
                    Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {},
                    Err(e) => {
                        warn!("Read from {thread_name} failed: {e}");
                        break;
                    },
                }
            }
            thread_alive.store(false, Ordering::Relaxed);
        });

        info!("Opened {name} at {} baud", config.baud_rate);
        Ok(Self {
            name: name.to_string(),
            writer,
            rx,
            stop,
            alive,
            reader: Some(handle),
        })
    }
}

impl Drop for OpenPort {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        debug!("Closed {}", self.name);
    }
}

/// Serial transport that follows ports as they come and go.
///
/// With a configured port name, that port is opened whenever it exists.
/// Without one, the only port present at start-up, or else the first port
/// that appears later, is opened.
pub struct SerialTransport {
    config: SerialConfig,
    known: Vec<String>,
    first_poll: bool,
    last_scan: Option<Instant>,
    open: Option<OpenPort>,
}

impl SerialTransport {
    /// Create a transport; no port is opened until [`Transport::poll_presence`].
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            known: Vec::new(),
            first_poll: true,
            last_scan: None,
            open: None,
        }
    }

    /// Name of the open port.
    pub fn port_name(&self) -> Option<&str> {
        self.open.as_ref().map(|p| p.name.as_str())
    }

    /// Close the open port, if any.
    pub fn close(&mut self) {
        self.open = None;
    }
}

impl Transport for SerialTransport {
    fn poll_presence(&mut self) -> Result<Option<PortEvent>> {
        if let Some(open) = self.open.take_if(|p| !p.alive.load(Ordering::Relaxed)) {
            let name = open.name.clone();
            info!("Reader for {name} stopped");
            return Ok(Some(PortEvent::Detached(name)));
        }

        let now = Instant::now();
        if !scan_due(self.last_scan, now) {
            return Ok(None);
        }
        self.last_scan = Some(now);

        let names: Vec<String> = serialport::available_ports()?
            .into_iter()
            .map(|p| p.port_name)
            .collect();

        if let Some(open) = &self.open {
            if !names.contains(&open.name) {
                let name = open.name.clone();
                self.open = None;
                self.known = names;
                info!("Port {name} removed");
                return Ok(Some(PortEvent::Detached(name)));
            }
        }

        let mut event = None;
        if self.open.is_none() {
            let candidate = pick_port(&self.config.port_name, &self.known, &names, self.first_poll);
            if let Some(name) = candidate {
                match OpenPort::open(&name, &self.config) {
                    Ok(port) => {
                        self.open = Some(port);
                        event = Some(PortEvent::Attached(name));
                    },
                    Err(e) => {
                        self.known = names;
                        self.first_poll = false;
                        return Err(e);
                    },
                }
            }
        }

        self.known = names;
        self.first_poll = false;
        Ok(event)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(open) = self.open.as_mut() else {
            return Err(Error::Serial(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "Port is closed",
            )));
        };
        trace!("Write {} bytes to {}", bytes.len(), open.name);
        open.writer.write_all(bytes)?;
        open.writer.flush()?;
        Ok(())
    }

    fn drain(&mut self) -> Vec<Vec<u8>> {
        self.open
            .as_ref()
            .map(|p| p.rx.try_iter().collect())
            .unwrap_or_default()
    }

    fn is_open(&self) -> bool {
        self.open.is_some()
    }
}

/// Whether enough time has passed since the last enumeration.
fn scan_due(last_scan: Option<Instant>, now: Instant) -> bool {
    last_scan.is_none_or(|last| now.duration_since(last) >= SCAN_INTERVAL)
}

/// Choose the port to open, if any.
fn pick_port(configured: &str, known: &[String], current: &[String], first_poll: bool) -> Option<String> {
    if !configured.is_empty() {
        return current.iter().find(|n| n.as_str() == configured).cloned();
    }
    if first_poll {
        return match current {
            [only] => Some(only.clone()),
            _ => None,
        };
    }
    current.iter().find(|n| !known.contains(n)).cloned()
}

/// Native port enumerator.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (vid, pid, manufacturer, product, serial_number) = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => (
                        Some(info.vid),
                        Some(info.pid),
                        info.manufacturer.clone(),
                        info.product.clone(),
                        info.serial_number.clone(),
                    ),
                    _ => (None, None, None, None, None),
                };

                PortInfo {
                    name: p.port_name,
                    vid,
                    pid,
                    manufacturer,
                    product,
                    serial_number,
                }
            })
            .collect())
    }
}
