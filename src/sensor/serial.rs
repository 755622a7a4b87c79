// src/sensor/serial.rs
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serialport::{FlowControl, SerialPort};
use std::collections::HashSet;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use super::{ConnectResult, SampleWindow, SensorLink, WindowResult, START_COMMAND, STOP_COMMAND};
use crate::config::{SerialConfig, FREQ};
use crate::error::SensorError;

/// Ports currently held open by this process.
static OPEN_PORTS: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Process-wide reservation of a port name, released on drop.
struct PortClaim {
    port: String,
}

impl PortClaim {
    fn acquire(port: &str) -> Result<Self, SensorError> {
        let mut open = OPEN_PORTS.lock().unwrap_or_else(|e| e.into_inner());
        if !open.insert(port.to_string()) {
            return Err(SensorError::PortBusy(port.to_string()));
        }
        Ok(Self {
            port: port.to_string(),
        })
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        let mut open = OPEN_PORTS.lock().unwrap_or_else(|e| e.into_inner());
        open.remove(&self.port);
    }
}

struct OpenLink {
    reader: BufReader<Box<dyn SerialPort>>,
    _claim: PortClaim,
}

/// Newline-delimited ASCII sensor on a serial port.
pub struct SerialSensor {
    config: SerialConfig,
    link: Option<OpenLink>,
}

impl SerialSensor {
    pub fn new(config: SerialConfig) -> Self {
        Self { config, link: None }
    }

    pub fn port_name(&self) -> &str {
        &self.config.port
    }

    fn send_command(&mut self, command: &str) -> bool {
        let Some(link) = self.link.as_mut() else {
            warn!("serial connection is not open; dropped command {command}");
            return false;
        };
        let port = link.reader.get_mut();
        let sent = port
            .write_all(command.as_bytes())
            .and_then(|_| port.write_all(b"\n"))
            .and_then(|_| port.flush());
        match sent {
            Ok(()) => {
                debug!("sent command: {command}");
                true
            }
            Err(e) => {
                warn!("failed to send {command} to {}: {e}", self.config.port);
                false
            }
        }
    }
}

impl SensorLink for SerialSensor {
    fn connect(&mut self) -> ConnectResult {
        if self.link.is_some() {
            return Err(SensorError::PortBusy(self.config.port.clone()));
        }
        let claim = PortClaim::acquire(&self.config.port)?;
        let mut port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(self.config.timeout())
            .flow_control(FlowControl::None)
            .open()
            .map_err(|source| SensorError::Open {
                port: self.config.port.clone(),
                source,
            })?;
        // Some USB adapters reset the board when DTR/RTS toggle.
        if let Err(e) = port.write_data_terminal_ready(false) {
            debug!("could not clear DTR on {}: {e}", self.config.port);
        }
        if let Err(e) = port.write_request_to_send(false) {
            debug!("could not clear RTS on {}: {e}", self.config.port);
        }
        info!(
            "connected to {} at {} baud",
            self.config.port, self.config.baud_rate
        );
        self.link = Some(OpenLink {
            reader: BufReader::new(port),
            _claim: claim,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn start_reading(&mut self) -> bool {
        self.send_command(START_COMMAND)
    }

    fn stop_reading(&mut self) -> bool {
        self.send_command(STOP_COMMAND)
    }

    fn read_one_second_data(&mut self) -> WindowResult {
        let link = self.link.as_mut().ok_or(SensorError::NotConnected)?;
        read_window(
            &mut link.reader,
            Duration::from_secs_f64(1.0 / FREQ as f64),
        )
    }

    fn disconnect(&mut self) {
        if self.link.take().is_some() {
            info!("disconnected from {}", self.config.port);
        }
    }
}

impl Drop for SerialSensor {
    fn drop(&mut self) {
        if self.link.is_some() {
            self.stop_reading();
            self.disconnect();
        }
    }
}

/// Reads up to `FREQ` lines, one every `period`. Garbled lines are skipped
/// and leave the window short; only a broken link is an error.
fn read_window<R: BufRead>(reader: &mut R, period: Duration) -> WindowResult {
    let started = Instant::now();
    let mut samples = Vec::with_capacity(FREQ);
    let mut line = Vec::new();
    for slot in 1..=FREQ {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => match parse_line(&line) {
                Some(value) => samples.push(value),
                None => debug!(
                    "skipping malformed sample line {:?}",
                    String::from_utf8_lossy(&line)
                ),
            },
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
            Err(e) => return Err(e.into()),
        }
        if period.is_zero() {
            continue;
        }
        let deadline = started + period * slot as u32;
        if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
    SampleWindow::new(samples)
}

/// One decimal ADC code per line.
pub(crate) fn parse_sample(line: &str) -> Option<i32> {
    line.trim().parse().ok()
}

pub(crate) fn parse_line(bytes: &[u8]) -> Option<i32> {
    std::str::from_utf8(bytes).ok().and_then(parse_sample)
}

/// Names of the serial ports visible to the OS.
pub fn list_ports() -> Result<Vec<String>, SensorError> {
    let ports = serialport::available_ports().map_err(|source| SensorError::Open {
        port: "*".to_string(),
        source,
    })?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
