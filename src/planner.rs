//! # Register Planning
//!
//! Groups the scattered registers of one meter into as few read requests as
//! possible.
//!
//! ## How It Works
//!
//! Parameters are sorted by register address and walked in order. A
//! parameter joins the current group when it starts no more than `max_gap`
//! registers after the group's end and the grown group still fits in one
//! request; otherwise it opens a new group. Each member remembers its byte
//! offset inside the group's response, so a reply is sliced without any
//! further lookups.
//!
//! The gap trades a few wasted registers for fewer round trips.
//!
//! ## Example
//!
//! ```rust
//! use voltage_meter_logger::{DataType, Parameter, ParameterSpec, RegisterPlanner};
//!
//! let voltage = ParameterSpec::new(10, 2, DataType::Float);
//! let current = ParameterSpec::new(13, 2, DataType::Float);
//! let params = [(Parameter::Voltage, &voltage), (Parameter::Current, &current)];
//!
//! // One register of slack bridges the hole at 12
//! let groups = RegisterPlanner::new().with_max_gap(1).plan(params);
//! assert_eq!(groups.len(), 1);
//! assert_eq!((groups[0].start, groups[0].count), (10, 5));
//! assert_eq!(groups[0].members[1].byte_offset, 6);
//!
//! // No slack, two reads
//! let groups = RegisterPlanner::new().with_max_gap(0).plan(params);
//! assert_eq!(groups.len(), 2);
//! ```

use tracing::debug;

use crate::constants::{MAX_READ_REGISTERS, REGISTER_BYTES};
use crate::parameter::{Parameter, ParameterSpec};

/// Default merge gap in registers.
pub const DEFAULT_MAX_GAP: u16 = 2;

/// Smallest request size the planner accepts; every parameter fits in it.
const MIN_REGISTERS_PER_READ: u16 = 4;

/// One parameter inside a [`RegisterGroup`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMember {
    pub parameter: Parameter,
    pub spec: ParameterSpec,
    /// Offset of the first byte of this value in the group's response data.
    pub byte_offset: usize,
}

impl GroupMember {
    #[inline]
    pub fn byte_width(&self) -> usize {
        self.spec.byte_width()
    }

    /// This member's bytes within a group response, if the response is long
    /// enough to contain them.
    pub fn span<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        data.get(self.byte_offset..self.byte_offset + self.byte_width())
    }
}

/// A contiguous register range read with a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterGroup {
    pub start: u16,
    pub count: u16,
    pub members: Vec<GroupMember>,
}

impl RegisterGroup {
    /// One past the last register, widened so it cannot overflow.
    #[inline]
    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.count)
    }

    /// Expected response data length in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.count as usize * REGISTER_BYTES
    }

    pub fn contains(&self, parameter: Parameter) -> bool {
        self.members.iter().any(|m| m.parameter == parameter)
    }

    /// The group restricted to members matching `keep`, or `None` when no
    /// member survives.
    ///
    /// The start address stays put, so surviving members are carried over
    /// with their offsets untouched; only the tail past the last survivor is
    /// trimmed from the request.
    pub fn filtered<F>(&self, mut keep: F) -> Option<RegisterGroup>
    where
        F: FnMut(&GroupMember) -> bool,
    {
        let members: Vec<GroupMember> =
            self.members.iter().filter(|m| keep(*m)).cloned().collect();

        let end = members.iter().map(|m| m.spec.end_address()).max()?;

        Some(RegisterGroup {
            start: self.start,
            count: (end - u32::from(self.start)) as u16,
            members,
        })
    }
}

/// Derive a reduced group list from a full plan.
///
/// Groups left without members are dropped; the remaining groups keep their
/// order.
pub fn filter_groups<F>(groups: &[RegisterGroup], mut keep: F) -> Vec<RegisterGroup>
where
    F: FnMut(&GroupMember) -> bool,
{
    groups
        .iter()
        .filter_map(|group| group.filtered(&mut keep))
        .collect()
}

/// Partitions parameters into batch reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterPlanner {
    max_gap: u16,
    max_registers: u16,
}

impl Default for RegisterPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterPlanner {
    pub fn new() -> Self {
        Self {
            max_gap: DEFAULT_MAX_GAP,
            max_registers: MAX_READ_REGISTERS as u16,
        }
    }

    pub fn with_max_gap(mut self, max_gap: u16) -> Self {
        self.max_gap = max_gap;
        self
    }

    /// Cap on registers per request, clamped to what a single FC03/FC04
    /// request can carry.
    pub fn with_max_registers(mut self, max_registers: u16) -> Self {
        self.max_registers =
            max_registers.clamp(MIN_REGISTERS_PER_READ, MAX_READ_REGISTERS as u16);
        self
    }

    #[inline]
    pub fn max_gap(&self) -> u16 {
        self.max_gap
    }

    #[inline]
    pub fn max_registers(&self) -> u16 {
        self.max_registers
    }

    /// Plan the reads for a set of parameters.
    ///
    /// The result depends only on the set of inputs, not on their order.
    pub fn plan<'a, I>(&self, params: I) -> Vec<RegisterGroup>
    where
        I: IntoIterator<Item = (Parameter, &'a ParameterSpec)>,
    {
        let mut sorted: Vec<(Parameter, ParameterSpec)> =
            params.into_iter().map(|(p, spec)| (p, *spec)).collect();
        sorted.sort_by_key(|(p, spec)| (spec.address, spec.size, *p));

        let mut groups: Vec<RegisterGroup> = Vec::new();
        // Group under construction and its exclusive end register
        let mut current: Option<(RegisterGroup, u32)> = None;

        for (parameter, spec) in sorted {
            let addr = u32::from(spec.address);
            let spec_end = spec.end_address();
            let member = GroupMember {
                parameter,
                spec,
                byte_offset: 0,
            };

            if let Some((group, end)) = current.as_mut() {
                let start = u32::from(group.start);
                let grown = (*end).max(spec_end);
                if addr <= *end + u32::from(self.max_gap)
                    && grown - start <= u32::from(self.max_registers)
                {
                    *end = grown;
                    group.members.push(member);
                    continue;
                }
            }

            if let Some((group, end)) = current.take() {
                groups.push(Self::finish(group, end));
            }
            current = Some((
                RegisterGroup {
                    start: spec.address,
                    count: 0,
                    members: vec![member],
                },
                spec_end,
            ));
        }

        if let Some((group, end)) = current.take() {
            groups.push(Self::finish(group, end));
        }

        debug!(
            "Planned {} parameters into {} reads (max_gap={}, max_registers={})",
            groups.iter().map(|g| g.members.len()).sum::<usize>(),
            groups.len(),
            self.max_gap,
            self.max_registers
        );

        groups
    }

    /// Fix the register count and member offsets of a completed group
    fn finish(mut group: RegisterGroup, end: u32) -> RegisterGroup {
        group.count = (end - u32::from(group.start)) as u16;
        for member in &mut group.members {
            member.byte_offset = (member.spec.address - group.start) as usize * REGISTER_BYTES;
        }
        group
    }
}

// ============================================================================
// Tests
// ============================================================================
