// src/io/mcpcan/filter.rs
//
// Acceptance filters: hardware slot programming with software fallback.
//
// A rule matches when `received_id & can_mask == can_id & can_mask`; when
// `extended` is set, the frame's framing must agree as well.

use serde::{Deserialize, Serialize};

use super::ascii;
use crate::io::CanFrame;

/// Filter slots on the MCP2515 variant.
pub const MCP2515_FILTER_SLOTS: usize = 2;
/// Filter slots on the MCP2518FD variant.
pub const MCP2518FD_FILTER_SLOTS: usize = 32;

/// One acceptance rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub can_id: u32,
    pub can_mask: u32,
    /// `None` matches both standard and extended frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended: Option<bool>,
}

impl FilterRule {
    pub fn new(can_id: u32, can_mask: u32) -> Self {
        Self {
            can_id,
            can_mask,
            extended: None,
        }
    }

    pub fn extended(mut self, extended: bool) -> Self {
        self.extended = Some(extended);
        self
    }

    pub fn matches(&self, frame: &CanFrame) -> bool {
        if let Some(ext) = self.extended {
            if ext != frame.is_extended {
                return false;
            }
        }
        frame.arbitration_id & self.can_mask == self.can_id & self.can_mask
    }

    /// `W<slot><ext><id:4 bytes><mask:4 bytes>`
    fn slot_command(&self, slot: usize) -> String {
        let mut cmd = String::with_capacity(20);
        cmd.push('W');
        ascii::push_full_byte(&mut cmd, slot as u8);
        cmd.push(if self.extended == Some(true) { '1' } else { '0' });
        ascii::push_u32(&mut cmd, self.can_id);
        ascii::push_u32(&mut cmd, self.can_mask);
        cmd
    }
}

/// Ordered rule set. An empty table matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterTable(pub Vec<FilterRule>);

impl FilterTable {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when any rule accepts the frame, or the table is empty.
    pub fn matches(&self, frame: &CanFrame) -> bool {
        self.is_empty() || self.0.iter().any(|rule| rule.matches(frame))
    }
}

impl From<Vec<FilterRule>> for FilterTable {
    fn from(rules: Vec<FilterRule>) -> Self {
        FilterTable(rules)
    }
}

/// What the adapter can do with filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterCapability {
    pub capacity: usize,
    /// Whether the `W` slot command is available
    pub per_slot_programming: bool,
}

impl FilterCapability {
    /// Only the MCP2518FD firmware accepts slot writes.
    pub fn for_hardware(fd_capable: bool) -> Self {
        if fd_capable {
            Self {
                capacity: MCP2518FD_FILTER_SLOTS,
                per_slot_programming: true,
            }
        } else {
            Self {
                capacity: MCP2515_FILTER_SLOTS,
                per_slot_programming: false,
            }
        }
    }
}

/// Where filtering ended up happening.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOutcome {
    Hardware,
    /// The adapter passes everything; the host must filter.
    SoftwareFallback,
}

/// Filter installation plan: the outcome and the slot commands to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterPlan {
    pub outcome: FilterOutcome,
    pub commands: Vec<String>,
}

/// Slot 0 with a zero mask: the adapter passes every frame again.
pub fn accept_all_command() -> String {
    FilterRule::new(0, 0).slot_command(0)
}

/// Decide between hardware and software filtering and build slot commands.
pub fn install(rules: &FilterTable, capability: FilterCapability) -> FilterPlan {
    if rules.is_empty() {
        return FilterPlan {
            outcome: FilterOutcome::Hardware,
            commands: Vec::new(),
        };
    }

    if rules.len() > capability.capacity || !capability.per_slot_programming {
        return FilterPlan {
            outcome: FilterOutcome::SoftwareFallback,
            commands: Vec::new(),
        };
    }

    FilterPlan {
        outcome: FilterOutcome::Hardware,
        commands: rules
            .0
            .iter()
            .enumerate()
            .map(|(slot, rule)| rule.slot_command(slot))
            .collect(),
    }
}
