// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Blocking register-level transactions between an initiator and a target.

use crate::sim::SimTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Read,
    Write,
    /// Carries no data transfer; targets reject it at mapped addresses.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    #[default]
    Incomplete,
    Ok,
    AddressError,
    CommandError,
}

impl ResponseStatus {
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    pub fn is_error(self) -> bool {
        matches!(self, Self::AddressError | Self::CommandError)
    }
}

/// One bus access. The data buffer belongs to the initiator; a read fills it,
/// a write supplies it.
#[derive(Debug)]
pub struct Transaction<'a> {
    command: Command,
    address: u64,
    data: &'a mut [u8],
    response: ResponseStatus,
}

impl<'a> Transaction<'a> {
    pub fn new(command: Command, address: u64, data: &'a mut [u8]) -> Self {
        Self {
            command,
            address,
            data,
            response: ResponseStatus::Incomplete,
        }
    }

    pub fn read(address: u64, data: &'a mut [u8]) -> Self {
        Self::new(Command::Read, address, data)
    }

    pub fn write(address: u64, data: &'a mut [u8]) -> Self {
        Self::new(Command::Write, address, data)
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn set_address(&mut self, address: u64) {
        self.address = address;
    }

    pub fn data(&self) -> &[u8] {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn response(&self) -> ResponseStatus {
        self.response
    }

    pub fn set_response(&mut self, response: ResponseStatus) {
        self.response = response;
    }

    pub fn is_response_error(&self) -> bool {
        self.response.is_error()
    }
}

/// A bus-addressable component that completes transactions synchronously.
///
/// `b_transport` never suspends. Any time the access costs is added to `delay`;
/// the initiator advances its own time by that amount before it treats the
/// transaction as complete.
pub trait Target: Send {
    fn name(&self) -> &str;
    fn b_transport(&mut self, trans: &mut Transaction<'_>, delay: &mut SimTime);
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}
