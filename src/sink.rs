//! Outbound event sink: the line-oriented contract the scan engine and
//! scheduler write to, and the reconnect-once-then-fatal policy around it.

use std::io::Write;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink write failed: {0}")]
    Write(std::io::Error),
    #[error("sink reconnect failed after a prior write failure: {0}")]
    ReconnectFailed(std::io::Error),
}

/// Topic an event line belongs to, mirroring the two outbound message
/// classes the scheduler produces: file-change notifications and the
/// start/end markers that bracket a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Syscheck,
    Rootcheck,
}

pub trait EventSink: Send {
    fn send(&mut self, topic: Topic, line: &str) -> Result<(), SinkError>;
}

/// A sink that reconnects exactly once on a write failure. A second failure
/// is returned to the caller, which per the scheduler's contract is
/// expected to treat it as fatal and terminate the process rather than
/// silently drop events.
pub struct ReconnectingSink<W> {
    writer: Option<W>,
    reconnect: Box<dyn FnMut() -> std::io::Result<W> + Send>,
}

impl<W: Write> ReconnectingSink<W> {
    pub fn new(
        writer: W,
        reconnect: impl FnMut() -> std::io::Result<W> + Send + 'static,
    ) -> Self {
        ReconnectingSink {
            writer: Some(writer),
            reconnect: Box::new(reconnect),
        }
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let writer = self.writer.as_mut().expect("writer present between calls");
        writeln!(writer, "{line}")?;
        writer.flush()
    }
}

impl<W: Write + Send> EventSink for ReconnectingSink<W> {
    fn send(&mut self, _topic: Topic, line: &str) -> Result<(), SinkError> {
        if self.write_line(line).is_ok() {
            return Ok(());
        }
        let reconnected = (self.reconnect)().map_err(SinkError::ReconnectFailed)?;
        self.writer = Some(reconnected);
        self.write_line(line).map_err(SinkError::Write)
    }
}
