// src/sensor/replay.rs
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::{ConnectResult, SampleWindow, SensorLink, WindowResult, START_COMMAND, STOP_COMMAND};
use crate::error::SensorError;

/// Shared record of the link calls a [`ReplaySensor`] received.
#[derive(Clone, Default, Debug)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    fn push(&self, entry: &str) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }
}

/// In-memory sensor for tests and deterministic playback.
///
/// Each queued vector is handed out as one window; vectors of the wrong
/// length come back as incomplete windows exactly like a short serial read.
pub struct ReplaySensor {
    queue: VecDeque<Vec<i32>>,
    repeat: bool,
    pace: Duration,
    refuse_connect: bool,
    connected: bool,
    log: CommandLog,
}

impl ReplaySensor {
    pub fn new(windows: impl IntoIterator<Item = Vec<i32>>) -> Self {
        Self {
            queue: windows.into_iter().collect(),
            repeat: false,
            pace: Duration::ZERO,
            refuse_connect: false,
            connected: false,
            log: CommandLog::default(),
        }
    }

    /// Cycle through the queued windows forever.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Sleep this long per read to stand in for the one-second acquisition.
    pub fn paced(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Make every `connect` fail, as an unplugged device would.
    pub fn refusing_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }
}

impl SensorLink for ReplaySensor {
    fn connect(&mut self) -> ConnectResult {
        self.log.push("connect");
        if self.refuse_connect {
            return Err(SensorError::NotConnected);
        }
        if self.connected {
            return Err(SensorError::PortBusy("replay".into()));
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn start_reading(&mut self) -> bool {
        self.log.push(START_COMMAND);
        self.connected
    }

    fn stop_reading(&mut self) -> bool {
        self.log.push(STOP_COMMAND);
        self.connected
    }

    fn read_one_second_data(&mut self) -> WindowResult {
        if !self.connected {
            return Err(SensorError::NotConnected);
        }
        if !self.pace.is_zero() {
            thread::sleep(self.pace);
        }
        let next = self.queue.pop_front().ok_or(SensorError::Exhausted)?;
        if self.repeat {
            self.queue.push_back(next.clone());
        }
        SampleWindow::new(next)
    }

    fn disconnect(&mut self) {
        self.log.push("disconnect");
        self.connected = false;
    }
}
