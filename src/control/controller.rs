use anyhow::Result;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::decoder::CommandDecoder;
use super::event::SystemEvent;
use super::state::StateMachine;
use crate::error::LooperResult;
use crate::timing::{TimerKind, Timers};

/// Reply byte for an accepted frame.
pub const ACCEPT_BYTE: u8 = b'p';
/// Reply byte for a frame that failed to decode or was refused.
pub const REJECT_BYTE: u8 = b'f';

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Input to the control thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// A raw command frame from the serial link; answered with one byte.
    Frame(Vec<u8>),
    /// An already decoded trigger, e.g. from a footswitch. No reply.
    Event(SystemEvent),
}

/// The control thread's loop: decode, validate, schedule, reply.
pub struct Controller {
    decoder: CommandDecoder,
    machine: StateMachine,
    messages: Receiver<ControlMessage>,
    reply: Box<dyn Write + Send>,
    timers: Arc<Timers>,
    shutdown: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(
        decoder: CommandDecoder,
        machine: StateMachine,
        messages: Receiver<ControlMessage>,
        reply: Box<dyn Write + Send>,
        timers: Arc<Timers>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            decoder,
            machine,
            messages,
            reply,
            timers,
            shutdown,
        }
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        let handle = thread::Builder::new()
            .name("control".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Run until shutdown is requested or every message source is gone.
    ///
    /// However the loop ends, the shutdown flag is set on the way out.
    pub fn run(mut self) -> Result<()> {
        log::info!("Control thread started");
        let result = self.serve();
        if let Err(err) = &result {
            log::error!("Control thread failed: {:#}", err);
        }
        self.shutdown.store(true, Ordering::Release);
        log::info!("Control thread stopped");
        result
    }

    fn serve(&mut self) -> Result<()> {
        while !self.shutdown.load(Ordering::Acquire) {
            match self.messages.recv_timeout(POLL_INTERVAL) {
                Ok(ControlMessage::Frame(frame)) => self.handle_frame(&frame)?,
                Ok(ControlMessage::Event(event)) => {
                    self.handle_event(event);
                }
                Err(RecvTimeoutError::Timeout) => self.machine.sync(),
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("Command input closed");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Decode and handle one frame, then answer it.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.timers.start(TimerKind::UartProcessTime);
        let accepted = match self.process_frame(frame) {
            Ok(()) => true,
            Err(err) => {
                log::warn!(
                    "Rejected frame {:?}: {}",
                    String::from_utf8_lossy(frame),
                    err
                );
                false
            }
        };
        let byte = if accepted { ACCEPT_BYTE } else { REJECT_BYTE };
        self.reply.write_all(&[byte])?;
        self.reply.flush()?;
        self.timers.stop(TimerKind::UartProcessTime);
        Ok(())
    }

    pub fn handle_event(&mut self, event: SystemEvent) -> bool {
        match self.machine.handle(event) {
            Ok(()) => {
                log::debug!("Accepted {:?}", event);
                true
            }
            Err(err) => {
                log::warn!("Rejected {:?}: {}", event, err);
                false
            }
        }
    }

    fn process_frame(&mut self, frame: &[u8]) -> LooperResult<()> {
        let event = self.decoder.decode(frame)?;
        self.machine.handle(event)?;
        log::debug!("Accepted {:?}", event);
        Ok(())
    }
}
