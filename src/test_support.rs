//! In-memory collaborators shared by the unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::EXCEPTION_ILLEGAL_DATA_ADDRESS;
use crate::error::{MeterError, MeterResult};
use crate::ingest::Ingestion;
use crate::reading::ReadingValues;
use crate::session::{RegisterTransport, SessionState, SessionStats};

/// One register read as the mock saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MockRequest {
    pub unit_id: u8,
    pub function_code: u8,
    pub start: u16,
    pub count: u16,
}

/// Gateway backed by a register image
#[derive(Debug, Default)]
pub(crate) struct MockGateway {
    registers: HashMap<(u8, u16), u16>,
    connected: bool,
    pub requests: Vec<MockRequest>,
    /// Errors returned by the next reads, in order, before the image is served
    pub failures: VecDeque<MeterError>,
    /// Connect attempts that fail before one succeeds
    pub connect_failures: u32,
    /// Every connect attempt fails with a configuration error
    pub connect_fatal: bool,
    pub connect_attempts: u32,
    /// Every read panics once the request is recorded
    pub panic_on_read: bool,
    stats: SessionStats,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    pub fn set_register(&mut self, unit_id: u8, address: u16, value: u16) {
        self.registers.insert((unit_id, address), value);
    }

    /// Store a big-endian float across two registers
    pub fn set_float(&mut self, unit_id: u8, address: u16, value: f32) {
        let bits = value.to_bits();
        self.set_register(unit_id, address, (bits >> 16) as u16);
        self.set_register(unit_id, address + 1, bits as u16);
    }

    pub fn fail_next(&mut self, err: MeterError) {
        self.failures.push_back(err);
    }
}

impl RegisterTransport for MockGateway {
    fn state(&self) -> SessionState {
        if self.connected {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    async fn connect(&mut self) -> MeterResult<()> {
        self.connect_attempts += 1;
        if self.connect_fatal {
            return Err(MeterError::configuration("unusable gateway address"));
        }
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            self.stats.connect_failures += 1;
            return Err(MeterError::connection("connection refused"));
        }
        self.connected = true;
        self.stats.connects += 1;
        Ok(())
    }

    async fn read_registers(
        &mut self,
        unit_id: u8,
        function_code: u8,
        start: u16,
        count: u16,
    ) -> MeterResult<Bytes> {
        if !self.connected {
            return Err(MeterError::NotConnected);
        }
        self.requests.push(MockRequest {
            unit_id,
            function_code,
            start,
            count,
        });
        self.stats.requests_sent += 1;
        if self.panic_on_read {
            panic!("gateway image corrupted at {}+{}", start, count);
        }

        if let Some(err) = self.failures.pop_front() {
            if err.closes_session() {
                self.connected = false;
            }
            return Err(err);
        }

        let mut data = BytesMut::with_capacity(count as usize * 2);
        for address in start..start + count {
            match self.registers.get(&(unit_id, address)) {
                Some(&value) => data.put_u16(value),
                None => {
                    return Err(MeterError::exception(
                        function_code,
                        EXCEPTION_ILLEGAL_DATA_ADDRESS,
                    ))
                }
            }
        }
        self.stats.responses_received += 1;
        Ok(data.freeze())
    }

    async fn close(&mut self) {
        self.connected = false;
    }

    fn stats(&self) -> SessionStats {
        self.stats
    }
}

/// A delivery as seen by [`RecordingIngest`]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Delivery {
    pub meter: String,
    pub timestamp: i64,
    pub values: ReadingValues,
}

/// Records every delivery; optionally rejects them all
#[derive(Debug, Default)]
pub(crate) struct RecordingIngest {
    pub deliveries: Mutex<Vec<Delivery>>,
    pub reject: bool,
}

impl RecordingIngest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl Ingestion for RecordingIngest {
    async fn deliver(&self, meter: &str, timestamp: i64, values: &ReadingValues) -> MeterResult<()> {
        self.deliveries.lock().unwrap().push(Delivery {
            meter: meter.to_string(),
            timestamp,
            values: values.clone(),
        });
        if self.reject {
            Err(MeterError::delivery("HTTP 500"))
        } else {
            Ok(())
        }
    }

    async fn health_check(&self) -> MeterResult<bool> {
        Ok(true)
    }
}
