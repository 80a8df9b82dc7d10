//! Gain control listener
//!
//! Accepts TCP connections and applies each line as a [`ControlMessage`].
//! Every connection gets its own thread. A bad line is logged and skipped;
//! nothing a controller sends can stop the listener or disturb gains it did
//! not name.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use super::message::ControlMessage;
use super::GainControl;
use crate::error::Result;

/// How often idle loops re-check the shutdown flag
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest accepted control line, newline excluded
pub const MAX_LINE_BYTES: usize = 4096;

/// Apply one control message
///
/// Returns how many bands changed; out-of-range bands are skipped.
pub fn apply_message(gains: &dyn GainControl, message: &ControlMessage) -> usize {
    match message {
        ControlMessage::SetOneBand { band, gain_db } => {
            usize::from(apply_one(gains, *band, *gain_db))
        }
        ControlMessage::SetAllBands(mapping) => {
            info!("[EQ-UPDATE] Updating {} band(s)", mapping.len());
            mapping
                .iter()
                .filter(|(&band, &gain_db)| apply_one(gains, band, gain_db))
                .count()
        }
    }
}

fn apply_one(gains: &dyn GainControl, band: usize, gain_db: f64) -> bool {
    match gains.set_band_gain_db(band, gain_db) {
        Some(applied) => {
            let label = gains.band_label(band).unwrap_or("?");
            info!("[EQ-UPDATE] Band {} ({}) set to {:.1} dB", band, label, applied);
            true
        }
        None => {
            warn!(
                "[EQ-UPDATE] Ignoring gain {} dB for band {} ({} bands configured)",
                gain_db,
                band,
                gains.num_bands()
            );
            false
        }
    }
}

/// Parse and apply one received line
///
/// Blank lines are ignored. Malformed lines are logged and returned as
/// errors without touching any gain.
pub fn handle_line(gains: &dyn GainControl, line: &str) -> Result<usize> {
    if line.trim().is_empty() {
        return Ok(0);
    }
    match ControlMessage::parse(line) {
        Ok(message) => Ok(apply_message(gains, &message)),
        Err(e) => {
            warn!("[CONTROL] Discarding message {:?}: {}", line.trim(), e);
            Err(e)
        }
    }
}

/// Bound, not yet serving, control listener
pub struct GainControlServer {
    listener: TcpListener,
    gains: Arc<dyn GainControl>,
}

impl GainControlServer {
    pub fn bind<A: ToSocketAddrs>(addr: A, gains: Arc<dyn GainControl>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, gains })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve on a background thread until the handle is shut down
    pub fn spawn(self) -> Result<ControlHandle> {
        let addr = self.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("gain-control".to_string())
            .spawn(move || self.serve(&flag))?;

        info!("[CONTROL] Listening on {}", addr);
        Ok(ControlHandle {
            addr,
            running,
            thread: Some(thread),
        })
    }

    fn serve(self, running: &Arc<AtomicBool>) {
        while running.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let gains = Arc::clone(&self.gains);
                    let running = Arc::clone(running);
                    let spawned = thread::Builder::new()
                        .name(format!("gain-control-{}", peer))
                        .spawn(move || serve_connection(stream, peer, gains.as_ref(), &running));
                    if let Err(e) = spawned {
                        warn!("[CONTROL] Could not start connection thread: {}", e);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    warn!("[CONTROL] Accept failed: {}", e);
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
        debug!("[CONTROL] Listener stopped");
    }
}

fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    gains: &dyn GainControl,
    running: &AtomicBool,
) {
    info!("[CONTROL] Controller connected: {}", peer);

    let configured = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_read_timeout(Some(POLL_INTERVAL)));
    if let Err(e) = configured {
        warn!("[CONTROL] Dropping {}: {}", peer, e);
        return;
    }

    let mut reader = BufReader::new(stream);
    // Survives read timeouts, so a line split across them is not lost
    let mut pending = Vec::new();
    // Set while skipping the rest of an over-long line
    let mut discarding = false;

    while running.load(Ordering::Acquire) {
        if pending.len() > MAX_LINE_BYTES {
            if !discarding {
                warn!(
                    "[CONTROL] Discarding line from {} longer than {} bytes",
                    peer, MAX_LINE_BYTES
                );
            }
            discarding = true;
            pending.clear();
        }

        let room = (MAX_LINE_BYTES + 1 - pending.len()) as u64;
        match reader.by_ref().take(room).read_until(b'\n', &mut pending) {
            Ok(0) => break,
            Ok(_) if pending.ends_with(b"\n") => {
                if discarding {
                    discarding = false;
                } else {
                    let line = String::from_utf8_lossy(&pending);
                    // Malformed lines are already logged
                    let _ = handle_line(gains, &line);
                }
                pending.clear();
            }
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("[CONTROL] Connection error from {}: {}", peer, e);
                break;
            }
        }
    }

    info!("[CONTROL] Controller disconnected: {}", peer);
}

/// Running listener; shuts down when dropped
pub struct ControlHandle {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ControlHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and wait for the listener thread
    ///
    /// Open connections notice within one poll interval and close.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("[CONTROL] Listener thread panicked");
            }
        }
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::BandGains;
    use pretty_assertions::assert_eq;

    fn gains() -> BandGains {
        let labels = ["100 Hz", "330 Hz", "1 kHz", "3.3 kHz", "10 kHz"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        BandGains::new(labels, 12.0)
    }

    #[test]
    fn test_set_all_touches_only_named_bands() {
        let gains = gains();
        gains.set_band_gain_db(1, 2.0);
        gains.set_band_gain_db(3, -1.0);

        let changed = handle_line(&gains, r#"{"type":"setAll","band0":-6.0,"band2":3.0}"#).unwrap();
        assert_eq!(changed, 2);
        assert_eq!(gains.snapshot(), vec![-6.0, 2.0, 3.0, -1.0, 0.0]);
    }

    #[test]
    fn test_set_gain_clamps() {
        let gains = gains();
        handle_line(&gains, r#"{"type":"setGain","band":4,"gainDb":40}"#).unwrap();
        assert_eq!(gains.band_gain_db(4), Some(12.0));
    }

    #[test]
    fn test_out_of_range_band_is_noop() {
        let gains = gains();
        let changed = handle_line(&gains, r#"{"type":"setGain","band":9,"gainDb":3}"#).unwrap();
        assert_eq!(changed, 0);

        let changed = handle_line(&gains, r#"{"type":"setAll","band1":3,"band7":5}"#).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(gains.snapshot(), vec![0.0, 3.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_malformed_line_keeps_state() {
        let gains = gains();
        gains.set_band_gain_db(2, 5.0);
        assert!(handle_line(&gains, r#"{"type":"setGain","band":2"#).is_err());
        assert!(handle_line(&gains, "hello").is_err());
        assert_eq!(gains.band_gain_db(2), Some(5.0));
    }

    #[test]
    fn test_blank_line_ignored() {
        let gains = gains();
        assert_eq!(handle_line(&gains, "  \r\n").unwrap(), 0);
    }
}
