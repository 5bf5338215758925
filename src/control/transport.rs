//! Command sources feeding the control thread

use anyhow::{Context, Result};
use crossbeam::channel::Sender;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, ErrorKind, Read};
use std::thread::{self, JoinHandle};

use super::controller::ControlMessage;
use crate::config::SerialConfig;

/// Open the serial device, returning a reader and a writer for replies.
///
/// Line settings (baud rate, raw mode) are expected to be configured on the
/// device beforehand.
pub fn open_serial(config: &SerialConfig) -> Result<(File, File)> {
    let reader = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&config.device)
        .with_context(|| format!("Failed to open serial device {}", config.device))?;
    let writer = reader
        .try_clone()
        .with_context(|| format!("Failed to clone serial handle {}", config.device))?;
    log::info!(
        "Serial device {} opened ({} baud, {}-byte frames)",
        config.device,
        config.baud_rate,
        config.frame_length
    );
    Ok((reader, writer))
}

/// Read fixed-length frames until end of input or a read error.
pub fn spawn_frame_reader<R>(
    mut reader: R,
    frame_length: usize,
    tx: Sender<ControlMessage>,
) -> Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("serial-reader".to_string())
        .spawn(move || {
            loop {
                let mut frame = vec![0u8; frame_length];
                match reader.read_exact(&mut frame) {
                    Ok(()) => {
                        if tx.send(ControlMessage::Frame(frame)).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                        log::info!("Serial input closed");
                        break;
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        log::error!("Serial read failed: {}", err);
                        break;
                    }
                }
            }
        })?;
    Ok(handle)
}

/// One frame per line, for driving the looper from a terminal.
pub fn spawn_line_reader<R>(reader: R, tx: Sender<ControlMessage>) -> Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        log::error!("Failed to read command line: {}", err);
                        break;
                    }
                };
                let frame = line.trim_end_matches('\r');
                if frame.is_empty() {
                    continue;
                }
                if tx
                    .send(ControlMessage::Frame(frame.as_bytes().to_vec()))
                    .is_err()
                {
                    break;
                }
            }
        })?;
    Ok(handle)
}
