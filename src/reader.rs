//! # Device Reader
//!
//! Reads the planned register groups of one meter through a transport and
//! decodes every member independently. One member failing to decode never
//! affects its siblings; a group that yields nothing usable is retried per
//! the configured [`RetryPolicy`].

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::MeterError;
use crate::parameter::Parameter;
use crate::planner::RegisterGroup;
use crate::retry::RetryPolicy;
use crate::session::RegisterTransport;
use crate::timing::PollTiming;
use crate::value::decode_value;

/// Decode every member of `group` from its response data.
///
/// Members whose bytes are missing or malformed come back as `None`.
pub fn decode_group(group: &RegisterGroup, data: &[u8]) -> Vec<(Parameter, Option<f64>)> {
    group
        .members
        .iter()
        .map(|member| {
            let value = match member.span(data) {
                Some(span) => decode_value(
                    span,
                    member.spec.data_type,
                    &member.spec.byte_order,
                    member.spec.scale,
                )
                .map_err(|e| trace!("{}: {}", member.parameter, e))
                .ok(),
                None => {
                    trace!(
                        "{}: response too short ({} of {} bytes)",
                        member.parameter,
                        data.len(),
                        member.byte_offset + member.byte_width()
                    );
                    None
                }
            };
            (member.parameter, value)
        })
        .collect()
}

/// Outcome of reading one group
#[derive(Debug)]
pub struct GroupRead {
    pub values: Vec<(Parameter, Option<f64>)>,
    pub attempts: u32,
    /// Last failure when nothing decoded
    pub error: Option<MeterError>,
}

impl GroupRead {
    pub fn decoded_count(&self) -> usize {
        self.values.iter().filter(|(_, v)| v.is_some()).count()
    }

    pub fn is_success(&self) -> bool {
        self.decoded_count() > 0
    }
}

/// Outcome of reading every group of one meter
#[derive(Debug, Default)]
pub struct DeviceRead {
    pub values: BTreeMap<Parameter, Option<f64>>,
    pub groups: usize,
    pub failed_groups: usize,
    pub elapsed: Duration,
}

impl DeviceRead {
    pub fn decoded_count(&self) -> usize {
        self.values.values().filter(|v| v.is_some()).count()
    }
}

/// Reads groups with bounded retry and paced requests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceReader {
    retry: RetryPolicy,
    inter_group_delay: Duration,
}

impl Default for DeviceReader {
    fn default() -> Self {
        Self::from_timing(&PollTiming::default())
    }
}

impl DeviceReader {
    pub fn new(retry: RetryPolicy, inter_group_delay: Duration) -> Self {
        Self {
            retry,
            inter_group_delay,
        }
    }

    pub fn from_timing(timing: &PollTiming) -> Self {
        Self::new(timing.group_retry(), timing.inter_group_delay())
    }

    /// Read one group, retrying while nothing decodes.
    ///
    /// A transport that lost its session is not retried; the scheduler
    /// reconnects on the next cycle.
    pub async fn read_group<T: RegisterTransport>(
        &self,
        transport: &mut T,
        unit_id: u8,
        function_code: u8,
        group: &RegisterGroup,
    ) -> GroupRead {
        let mut attempts = self.retry.attempts();
        let mut values: Vec<(Parameter, Option<f64>)> =
            group.members.iter().map(|m| (m.parameter, None)).collect();
        let mut error = None;

        while let Some(attempt) = attempts.next().await {
            if !transport.is_connected() {
                error = Some(MeterError::NotConnected);
                break;
            }

            match transport
                .read_registers(unit_id, function_code, group.start, group.count)
                .await
            {
                Ok(data) => {
                    values = decode_group(group, &data);
                    if values.iter().any(|(_, v)| v.is_some()) {
                        return GroupRead {
                            values,
                            attempts: attempt,
                            error: None,
                        };
                    }
                    debug!(
                        "unit {} group {}+{}: no member decoded (attempt {})",
                        unit_id, group.start, group.count, attempt
                    );
                    error = Some(MeterError::decode("no member of the group decoded"));
                }
                Err(e) => {
                    debug!(
                        "unit {} group {}+{}: {} (attempt {})",
                        unit_id, group.start, group.count, e, attempt
                    );
                    error = Some(e);
                }
            }
        }

        GroupRead {
            values,
            attempts: attempts.made(),
            error,
        }
    }

    /// Read every group of one meter in order.
    pub async fn read_device<T: RegisterTransport>(
        &self,
        transport: &mut T,
        unit_id: u8,
        function_code: u8,
        groups: &[RegisterGroup],
    ) -> DeviceRead {
        let started = Instant::now();
        let mut read = DeviceRead {
            groups: groups.len(),
            ..DeviceRead::default()
        };

        for (index, group) in groups.iter().enumerate() {
            if index > 0 && !self.inter_group_delay.is_zero() {
                tokio::time::sleep(self.inter_group_delay).await;
            }

            let group_read = self.read_group(transport, unit_id, function_code, group).await;
            if !group_read.is_success() {
                read.failed_groups += 1;
            }
            read.values.extend(group_read.values);
        }

        read.elapsed = started.elapsed();
        read
    }
}
