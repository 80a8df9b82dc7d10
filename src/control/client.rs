//! Controller side of the gain channel

use std::io::{BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;

use super::message::ControlMessage;
use crate::error::Result;

const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Open a connection, send one message, and close
pub fn send_message<A: ToSocketAddrs>(addr: A, message: &ControlMessage) -> Result<()> {
    send_messages(addr, std::slice::from_ref(message))
}

/// Send several messages over a single connection, in order
pub fn send_messages<A: ToSocketAddrs>(addr: A, messages: &[ControlMessage]) -> Result<()> {
    let stream = TcpStream::connect(addr)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let mut writer = BufWriter::new(stream);
    for message in messages {
        let line = message.to_wire();
        debug!("Sending {}", line);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
