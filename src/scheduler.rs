//! # Poll Scheduler
//!
//! The dual-cadence acquisition loop. Every cycle reads the instant
//! parameters of every meter; the first cycle of each new minute also reads
//! the cumulative counters and delivers them once, stamped with the minute.
//!
//! ```text
//! cycle(now):
//!   connect if needed ──fail──▶ backoff, no meters polled
//!   read_minute = floor(now, 60s) > last_minute
//!   for meter in meters:
//!       read full or instant-only groups
//!       validate ──reject──▶ drop this meter's data
//!       deliver instant subset            @ now
//!       deliver minute subset (if due)    @ floor(now, 60s)
//!       pause inter-meter
//!   last_minute = floor(now, 60s) if read_minute
//! ```
//!
//! The scheduler exclusively owns the transport. Single meter or parameter
//! failures never abort the cycle for the other meters.

use std::convert::Infallible;
use std::fmt;

use tracing::{debug, info, warn};

use crate::config::{AppConfig, DeviceConfig};
use crate::error::MeterResult;
use crate::ingest::Ingestion;
use crate::parameter::Cadence;
use crate::planner::{filter_groups, RegisterGroup, RegisterPlanner};
use crate::reader::DeviceReader;
use crate::reading::{Reading, ReadingValues};
use crate::session::RegisterTransport;
use crate::timing::PollTiming;
use crate::validator::Validator;

/// Start of the minute containing `unix_secs`
#[inline]
pub fn minute_floor(unix_secs: i64) -> i64 {
    unix_secs - unix_secs.rem_euclid(60)
}

/// One meter with both of its read plans
#[derive(Debug, Clone)]
pub struct MeterContext {
    pub device: DeviceConfig,
    /// Every configured parameter
    pub full_groups: Vec<RegisterGroup>,
    /// Instant parameters only, derived from `full_groups`
    pub instant_groups: Vec<RegisterGroup>,
}

impl MeterContext {
    pub fn new(device: DeviceConfig, planner: &RegisterPlanner) -> Self {
        let full_groups = planner.plan(device.parameters.iter().map(|(p, s)| (*p, s)));
        let instant_groups =
            filter_groups(&full_groups, |m| m.parameter.cadence() == Cadence::Instant);
        Self {
            device,
            full_groups,
            instant_groups,
        }
    }

    pub fn name(&self) -> &str {
        &self.device.name
    }

    pub fn groups(&self, read_minute: bool) -> &[RegisterGroup] {
        if read_minute {
            &self.full_groups
        } else {
            &self.instant_groups
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Unix seconds the cycle ran at
    pub timestamp: i64,
    pub read_minute: bool,
    /// False when the gateway could not be reached and nothing was polled
    pub connected: bool,
    pub meters_polled: usize,
    pub meters_rejected: usize,
    /// Meters not polled because the session dropped mid-cycle
    pub meters_skipped: usize,
    pub deliveries: usize,
    pub delivery_failures: usize,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle @{}: {} polled, {} rejected, {} skipped, {} delivered, {} failed deliveries{}",
            self.timestamp,
            self.meters_polled,
            self.meters_rejected,
            self.meters_skipped,
            self.deliveries,
            self.delivery_failures,
            if self.read_minute { " (minute)" } else { "" }
        )
    }
}

/// The acquisition loop
pub struct PollScheduler<T: RegisterTransport, I: Ingestion> {
    transport: T,
    ingest: I,
    meters: Vec<MeterContext>,
    reader: DeviceReader,
    validator: Validator,
    timing: PollTiming,
    /// Minute whose counters were last delivered; 0 before the first
    last_minute: i64,
    cycles: u64,
}

impl<T: RegisterTransport, I: Ingestion> PollScheduler<T, I> {
    pub fn new(
        transport: T,
        ingest: I,
        meters: Vec<MeterContext>,
        validator: Validator,
        timing: PollTiming,
    ) -> Self {
        for meter in &meters {
            info!(
                "{}: {} params grouped into {} batch reads",
                meter.name(),
                meter.device.parameters.len(),
                meter.full_groups.len()
            );
            for group in &meter.full_groups {
                debug!(
                    "{}: registers {}..{} ({} members)",
                    meter.name(),
                    group.start,
                    group.end(),
                    group.members.len()
                );
            }
        }

        Self {
            transport,
            ingest,
            meters,
            reader: DeviceReader::from_timing(&timing),
            validator,
            timing,
            last_minute: 0,
            cycles: 0,
        }
    }

    /// Plan every configured meter and build the scheduler.
    pub fn from_config(config: &AppConfig, transport: T, ingest: I) -> Self {
        let planner = config.settings.planner();
        let meters = config
            .devices
            .iter()
            .cloned()
            .map(|device| MeterContext::new(device, &planner))
            .collect();
        Self::new(
            transport,
            ingest,
            meters,
            config.validator.clone(),
            config.settings.timing,
        )
    }

    pub fn meters(&self) -> &[MeterContext] {
        &self.meters
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn ingest(&self) -> &I {
        &self.ingest
    }

    pub fn last_minute(&self) -> i64 {
        self.last_minute
    }

    /// Cycles that reached the meters
    pub fn cycles_completed(&self) -> u64 {
        self.cycles
    }

    /// Run one cycle at wall-clock time `now` (unix seconds).
    ///
    /// Fails only on errors a reconnect cannot fix.
    pub async fn poll_cycle(&mut self, now: i64) -> MeterResult<CycleReport> {
        let mut report = CycleReport {
            timestamp: now,
            ..CycleReport::default()
        };

        if !self.transport.is_connected() {
            debug!("Connecting to gateway");
            if let Err(e) = self.transport.connect().await {
                if !e.closes_session() {
                    return Err(e);
                }
                warn!(
                    "Connection failed: {}, retrying in {}s",
                    e,
                    self.timing.reconnect_backoff().as_secs_f32()
                );
                tokio::time::sleep(self.timing.reconnect_backoff()).await;
                return Ok(report);
            }
        }
        report.connected = true;

        let current_minute = minute_floor(now);
        report.read_minute = current_minute > self.last_minute;

        for index in 0..self.meters.len() {
            if !self.transport.is_connected() {
                report.meters_skipped = self.meters.len() - index;
                warn!(
                    "Gateway session lost, skipping {} meter(s) this cycle",
                    report.meters_skipped
                );
                break;
            }

            self.poll_meter(index, now, current_minute, &mut report).await;

            if !self.timing.inter_meter_delay().is_zero() {
                tokio::time::sleep(self.timing.inter_meter_delay()).await;
            }
        }

        if report.read_minute {
            self.last_minute = current_minute;
        }
        self.cycles += 1;
        debug!("{}", report);
        Ok(report)
    }

    async fn poll_meter(
        &mut self,
        index: usize,
        now: i64,
        current_minute: i64,
        report: &mut CycleReport,
    ) {
        let meter = &self.meters[index];
        let groups = meter.groups(report.read_minute);
        let read = self
            .reader
            .read_device(
                &mut self.transport,
                meter.device.unit_id,
                meter.device.function_code,
                groups,
            )
            .await;
        report.meters_polled += 1;

        info!(
            "{}: {}/{} read, {}ms ({} groups{})",
            meter.name(),
            read.decoded_count(),
            read.values.len(),
            read.elapsed.as_millis(),
            read.groups,
            if report.read_minute { ", full read" } else { "" }
        );

        let reading = Reading::with_values(meter.name(), now, read.values);
        if let Err(e) = self.validator.validate(&reading) {
            warn!("Invalid readings from {}: {} - skipping", meter.name(), e);
            report.meters_rejected += 1;
            return;
        }

        let (instant, minute) = reading.split();
        if !instant.is_empty() {
            deliver(&self.ingest, meter.name(), now, &instant, report).await;
        }
        if report.read_minute && !minute.is_empty() {
            deliver(&self.ingest, meter.name(), current_minute, &minute, report).await;
        }
    }

    /// Poll forever at the current wall-clock time. Returns only on errors a
    /// reconnect cannot fix.
    pub async fn run(&mut self) -> MeterResult<Infallible> {
        loop {
            let now = chrono::Utc::now().timestamp();
            let report = self.poll_cycle(now).await?;
            if report.connected && !self.timing.inter_cycle_delay().is_zero() {
                tokio::time::sleep(self.timing.inter_cycle_delay()).await;
            }
        }
    }

    /// Close the gateway session. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if self.transport.is_connected() {
            info!("Closing gateway session");
        }
        self.transport.close().await;
    }
}

async fn deliver<I: Ingestion>(
    ingest: &I,
    meter: &str,
    timestamp: i64,
    values: &ReadingValues,
    report: &mut CycleReport,
) {
    match ingest.deliver(meter, timestamp, values).await {
        Ok(()) => report.deliveries += 1,
        Err(e) => {
            report.delivery_failures += 1;
            warn!("Failed to send readings for {}: {}", meter, e);
        }
    }
}

impl<T: RegisterTransport, I: Ingestion> fmt::Debug for PollScheduler<T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollScheduler")
            .field("meters", &self.meters.len())
            .field("state", &self.transport.state())
            .field("last_minute", &self.last_minute)
            .field("cycles", &self.cycles)
            .finish()
    }
}
