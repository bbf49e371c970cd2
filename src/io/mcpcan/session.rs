// src/io/mcpcan/session.rs
//
// Session controller for an MCP-CAN adapter.
//
// Lifecycle: Closed -> Probing -> Open -> ShuttingDown -> Closed.
//
// Startup:
//   1. resolve the bitrate (nothing is sent if it is not in the table)
//   2. identify: C, V (must be DT2518), v, O - retried on a fresh port
//   3. bitrate:  C, S<code>, O
//   4. filters:  W<slot>... or software fallback
//
// All calls are blocking and expected from a single thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::bitrate::{self, DeviceCode};
use super::codec::{DecodeError, McpCanCodec};
use super::command::CommandChannel;
use super::filter::{self, FilterCapability, FilterOutcome, FilterTable};
use crate::io::error::IoError;
use crate::io::serial::utils::device_label;
use crate::io::serial::{detect_fd_capable, SerialPortTransport, SerialTransport};
use crate::io::CanFrame;
use crate::logging::{DiagnosticSink, Level};
use crate::settings::BusConfig;

/// The only hardware model this engine drives.
pub const SUPPORTED_MODEL: &str = "DT2518";

/// Identification attempts before giving up; serial links are flaky at power-on.
pub const IDENTIFY_ATTEMPTS: u32 = 3;

const RECV_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Extra time a line already arriving gets past the caller's deadline.
const LINE_GRACE: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Probing,
    Open,
    ShuttingDown,
}

/// A CAN bus on an MCP-CAN adapter.
pub struct McpCanBus<T: SerialTransport = SerialPortTransport> {
    channel: Option<CommandChannel<T>>,
    state: SessionState,
    device: String,
    codec: McpCanCodec,
    hardware_model: String,
    firmware_version: u32,
    fd_capable: bool,
    fd_enabled: bool,
    hardware_filtered: bool,
    /// Adapter slots holding restrictive rules
    programmed_slots: usize,
    filters: Option<FilterTable>,
    sink: Arc<dyn DiagnosticSink>,
}

impl McpCanBus<SerialPortTransport> {
    /// Open the serial port named in `config` and bring the bus up.
    ///
    /// The MCP2518FD capability comes from `config.fd_capable` or, when unset,
    /// from the port's USB serial number.
    pub fn open(config: &BusConfig, sink: Arc<dyn DiagnosticSink>) -> Result<Self, IoError> {
        config.validate()?;
        let mut config = config.clone();
        if config.fd_capable.is_none() {
            let detected = detect_fd_capable(&config.port);
            tlog!(sink, Level::Debug, "{}: MCP2518FD detected: {}", config.port, detected);
            config.fd_capable = Some(detected);
        }
        Self::connect(&config, sink, || SerialPortTransport::open(&config))
    }
}

impl<T: SerialTransport> McpCanBus<T> {
    /// Bring the bus up over transports produced by `connect`.
    ///
    /// `connect` is called once per identification attempt. A failure to
    /// connect ends initialization immediately.
    pub fn connect<F>(
        config: &BusConfig,
        sink: Arc<dyn DiagnosticSink>,
        mut connect: F,
    ) -> Result<Self, IoError>
    where
        F: FnMut() -> Result<T, IoError>,
    {
        let fd_capable = config.fd_capable.unwrap_or(false);
        let code = resolve_bitrate(config, fd_capable)?;

        let mut bus = Self {
            channel: None,
            state: SessionState::Closed,
            device: device_label(&config.port),
            codec: McpCanCodec::default(),
            hardware_model: String::new(),
            firmware_version: 0,
            fd_capable,
            fd_enabled: config.fd,
            hardware_filtered: false,
            programmed_slots: 0,
            filters: None,
            sink,
        };

        bus.state = SessionState::Probing;
        if let Err(e) = bus.identify(&mut connect, config.response_timeout()) {
            bus.release();
            return Err(e);
        }

        if let Err(e) = bus.configure(code, config.filter_table()) {
            tlog!(bus.sink, Level::Error, "{}: setup failed: {}", bus.device, e);
            bus.release();
            return Err(e);
        }

        bus.state = SessionState::Open;
        tlog!(
            bus.sink,
            Level::Info,
            "{}: open (model {}, firmware {}, bitrate {}{})",
            bus.device,
            bus.hardware_model,
            bus.firmware_version,
            config.bitrate,
            match (config.fd, config.data_bitrate) {
                (true, Some(data)) => format!(", data bitrate {}", data),
                _ => String::new(),
            }
        );
        Ok(bus)
    }

    // ------------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------------

    fn identify<F>(&mut self, connect: &mut F, timeout: Duration) -> Result<(), IoError>
    where
        F: FnMut() -> Result<T, IoError>,
    {
        let mut last_err = None;
        for attempt in 1..=IDENTIFY_ATTEMPTS {
            let transport = connect()?;
            let mut channel = CommandChannel::new(transport, timeout);

            match self.probe(&mut channel) {
                Ok(()) => {
                    self.channel = Some(channel);
                    return Ok(());
                }
                Err(e) => {
                    tlog!(
                        self.sink,
                        Level::Warn,
                        "{}: identification attempt {}/{} failed: {}",
                        self.device,
                        attempt,
                        IDENTIFY_ATTEMPTS,
                        e
                    );
                    channel.close();
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| IoError::connection(&self.device, "no attempts made")))
    }

    /// Close, ask for the model and firmware, reopen.
    fn probe(&mut self, channel: &mut CommandChannel<T>) -> Result<(), IoError> {
        channel.request("C")?;
        channel.clear_input()?;

        let model = channel.request("V")?.text();
        tlog!(self.sink, Level::Debug, "get device type: {}", model);
        if model != SUPPORTED_MODEL {
            return Err(IoError::UnsupportedDevice {
                device: self.device.clone(),
                model,
            });
        }

        let reply = channel.request("v")?.text();
        let firmware_version = reply.parse::<u32>().map_err(|_| IoError::FirmwareQuery {
            device: self.device.clone(),
            message: format!("unexpected reply '{}'", reply),
        })?;
        tlog!(self.sink, Level::Debug, "get device fw version: {}", firmware_version);

        self.expect_ack(channel, "O")?;
        channel.clear_input()?;

        self.hardware_model = model;
        self.firmware_version = firmware_version;
        self.codec = McpCanCodec::new(firmware_version);
        Ok(())
    }

    fn configure(&mut self, code: DeviceCode, filters: Option<FilterTable>) -> Result<(), IoError> {
        let device = self.device.clone();
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| IoError::not_open(&device))?;

        Self::ack(channel, &device, "C")?;
        channel.clear_input()?;
        Self::ack(channel, &device, &code.command())?;
        Self::ack(channel, &device, "O")?;
        tlog!(self.sink, Level::Debug, "set can bitrate: {:X}", code.0);

        if let Some(filters) = filters {
            self.install_filters(filters)?;
        }
        Ok(())
    }

    fn expect_ack(&self, channel: &mut CommandChannel<T>, command: &str) -> Result<(), IoError> {
        Self::ack(channel, &self.device, command)
    }

    fn ack(channel: &mut CommandChannel<T>, device: &str, command: &str) -> Result<(), IoError> {
        let reply = channel.request(command)?;
        if reply.is_nack() {
            return Err(IoError::Rejected {
                device: device.to_string(),
                command: command.to_string(),
            });
        }
        Ok(())
    }

    fn install_filters(&mut self, filters: FilterTable) -> Result<FilterOutcome, IoError> {
        let capability = FilterCapability::for_hardware(self.fd_capable);
        let plan = filter::install(&filters, capability);

        for (slot, cmd) in plan.commands.iter().enumerate() {
            tlog!(self.sink, Level::Debug, "write filtermask{}: {}", slot, cmd);
            self.channel_mut()?.write_command(cmd)?;
        }
        if plan.commands.is_empty() {
            self.open_hardware_filters()?;
        } else {
            self.programmed_slots = self.programmed_slots.max(plan.commands.len());
        }

        match plan.outcome {
            FilterOutcome::Hardware => self.hardware_filtered = true,
            FilterOutcome::SoftwareFallback => {
                tlog!(
                    self.sink,
                    Level::Warn,
                    "{}: {} filters requested, adapter supports {}{}; filtering in software",
                    self.device,
                    filters.len(),
                    capability.capacity,
                    if capability.per_slot_programming { "" } else { " without slot writes" }
                );
                self.hardware_filtered = false;
            }
        }
        self.filters = Some(filters);
        Ok(plan.outcome)
    }

    /// Let every frame through the adapter again if earlier rules are still in its slots.
    fn open_hardware_filters(&mut self) -> Result<(), IoError> {
        if self.programmed_slots == 0 {
            return Ok(());
        }
        let cmd = filter::accept_all_command();
        tlog!(self.sink, Level::Debug, "write filtermask0: {} (accept all)", cmd);
        self.channel_mut()?.write_command(&cmd)?;
        self.programmed_slots = 0;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Steady state
    // ------------------------------------------------------------------------

    /// Transmit a frame. The adapter does not acknowledge data frames.
    pub fn send(&mut self, frame: &CanFrame) -> Result<(), IoError> {
        self.ensure_open()?;
        if frame.is_fd && !self.fd_enabled {
            return Err(IoError::encode("bus is not configured for CAN FD"));
        }
        let cmd = self.codec.encode(frame)?;
        tlog!(self.sink, Level::Debug, "sending: {}", cmd);
        self.channel_mut()?.write_command(&cmd)
    }

    /// Next received frame, or `None` when nothing is waiting.
    ///
    /// Lines that are not frames, or are corrupt, are dropped.
    pub fn receive(&mut self) -> Result<Option<CanFrame>, IoError> {
        self.receive_until(None)
    }

    /// `receive`, giving up on a partial line shortly after `deadline`.
    fn receive_until(&mut self, deadline: Option<Instant>) -> Result<Option<CanFrame>, IoError> {
        self.ensure_open()?;
        loop {
            let line_deadline = deadline.map(|d| d.max(Instant::now() + LINE_GRACE));
            let channel = self.channel_mut()?;
            let polled = match line_deadline {
                Some(d) => channel.poll_line_until(d),
                None => channel.poll_line(),
            };
            let line = match polled {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(e) if e.is_timeout() => {
                    tlog!(self.sink, Level::Debug, "discarding incomplete line: {}", e);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

            match McpCanCodec::decode(line.as_bytes()) {
                Ok(frame) => {
                    tlog!(self.sink, Level::Debug, "recv message: {}", frame);
                    return Ok(Some(frame));
                }
                Err(DecodeError::Ignorable) => continue,
                Err(DecodeError::Malformed(reason)) => {
                    tlog!(
                        self.sink,
                        Level::Debug,
                        "discarding {:?}: {}",
                        String::from_utf8_lossy(line.as_bytes()),
                        reason
                    );
                }
            }
        }
    }

    /// Wait up to `timeout` (forever with `None`) for a frame passing the filters.
    ///
    /// The filter table is always checked on the host; adapter slots may
    /// still hold rules from an earlier, wider table.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<CanFrame>, IoError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.receive_until(deadline)? {
                Some(frame) if self.accepts(&frame) => return Ok(Some(frame)),
                Some(_) => {}
                None => std::thread::sleep(RECV_POLL_INTERVAL),
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(None);
            }
        }
    }

    /// Replace the acceptance filters; `None` clears the host-side table.
    pub fn set_filters(&mut self, filters: Option<FilterTable>) -> Result<(), IoError> {
        self.ensure_open()?;
        match filters {
            Some(filters) => {
                self.install_filters(filters)?;
            }
            None => {
                self.open_hardware_filters()?;
                self.filters = None;
                self.hardware_filtered = false;
            }
        }
        Ok(())
    }

    fn accepts(&self, frame: &CanFrame) -> bool {
        self.filters.as_ref().map_or(true, |f| f.matches(frame))
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Reset the adapter and release the port. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::ShuttingDown;
        tlog!(
            self.sink,
            Level::Info,
            "{}: send hardware reset upon shutdown and be ready for the next session",
            self.device
        );
        if let Some(channel) = self.channel.as_mut() {
            let _ = channel.write_command("H");
        }
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.state = SessionState::Closed;
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn hardware_model(&self) -> &str {
        &self.hardware_model
    }

    pub fn firmware_version(&self) -> u32 {
        self.firmware_version
    }

    /// True only on the MCP2518FD variant.
    pub fn supports_extended_filtering(&self) -> bool {
        self.fd_capable
    }

    /// The installed filters could not go to hardware; the host has to apply them.
    pub fn is_software_filtered(&self) -> bool {
        !self.hardware_filtered && self.filters.as_ref().is_some_and(|f| !f.is_empty())
    }

    pub fn filters(&self) -> Option<&FilterTable> {
        self.filters.as_ref()
    }

    pub fn channel_info(&self) -> String {
        let port = self
            .channel
            .as_ref()
            .map(|c| c.transport().name().to_string())
            .unwrap_or_default();
        format!("Serial interface: {}", port)
    }

    fn ensure_open(&self) -> Result<(), IoError> {
        if self.state == SessionState::Open {
            Ok(())
        } else {
            Err(IoError::not_open(&self.device))
        }
    }

    fn channel_mut(&mut self) -> Result<&mut CommandChannel<T>, IoError> {
        let device = &self.device;
        self.channel.as_mut().ok_or_else(|| IoError::not_open(device))
    }
}

impl<T: SerialTransport> Drop for McpCanBus<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve_bitrate(config: &BusConfig, fd_capable: bool) -> Result<DeviceCode, IoError> {
    let data_bitrate = if config.fd { config.data_bitrate } else { None };
    let invalid = || IoError::InvalidBitrate {
        bitrate: config.bitrate,
        data_bitrate,
    };
    if data_bitrate.is_some() && !fd_capable {
        return Err(invalid());
    }
    bitrate::resolve(config.bitrate, data_bitrate).map_err(|_| invalid())
}
