//! Serial command link to the actuator.
//!
//! Wire format, ASCII, one command per active cycle:
//!
//! ```text
//! &<dx>,<dy>#\r\n      e.g. &-490.0,-210.0#\r\n
//! ```
//!
//! Both values are signed decimals with exactly one fractional digit. There
//! are no other message types. Nothing is written while there is no target.
//! Writes are fire-and-forget: no acknowledgement and no retry of a failed
//! command. A partial write from the driver is continued until the whole
//! command is out; a write that fails or stalls is returned as an error.

use anyhow::{anyhow, bail, Context, Result};
use std::io::Write;
use std::time::Duration;

use crate::mapping::TargetOffset;

pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyAMA0";
pub const DEFAULT_BAUD_RATE: u32 = 57_600;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

const COMMAND_START: char = '&';
const COMMAND_END: &str = "#\r\n";

/// Format one offset command.
pub fn format_command(offset: &TargetOffset) -> String {
    format!(
        "{}{:.1},{:.1}{}",
        COMMAND_START, offset.dx, offset.dy, COMMAND_END
    )
}

/// Parse one command produced by `format_command`.
pub fn parse_command(line: &str) -> Result<TargetOffset> {
    let body = line
        .strip_prefix(COMMAND_START)
        .ok_or_else(|| anyhow!("command must start with '{}'", COMMAND_START))?
        .strip_suffix(COMMAND_END)
        .ok_or_else(|| anyhow!("command must end with '#\\r\\n'"))?;
    let (dx, dy) = body
        .split_once(',')
        .ok_or_else(|| anyhow!("command must hold two comma-separated values"))?;
    Ok(TargetOffset {
        dx: parse_axis(dx)?,
        dy: parse_axis(dy)?,
    })
}

fn parse_axis(raw: &str) -> Result<f32> {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    let valid = match digits.split_once('.') {
        Some((int, frac)) => {
            !int.is_empty()
                && frac.len() == 1
                && int.bytes().all(|b| b.is_ascii_digit())
                && frac.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    };
    if !valid {
        bail!("axis value '{}' is not a one-decimal number", raw);
    }
    raw.parse()
        .map_err(|e| anyhow!("axis value '{}' is not a number: {}", raw, e))
}

/// Persistent link to the actuator.
///
/// Generic over the sink so the same framing runs against a real port, a
/// file or an in-memory buffer.
pub struct SerialLink<W: Write> {
    sink: W,
    name: String,
    messages_sent: u64,
    bytes_sent: u64,
}

impl SerialLink<Box<dyn serialport::SerialPort>> {
    /// Open a serial device once for the lifetime of the loop.
    pub fn open(port: &str, baud_rate: u32, write_timeout: Duration) -> Result<Self> {
        let sink = serialport::new(port, baud_rate)
            .timeout(write_timeout)
            .open()
            .with_context(|| format!("failed to open serial port {} at {} baud", port, baud_rate))?;
        log::info!("serial link open on {} at {} baud", port, baud_rate);
        Ok(Self::new(sink, port))
    }
}

impl<W: Write> SerialLink<W> {
    pub fn new(sink: W, name: impl Into<String>) -> Self {
        Self {
            sink,
            name: name.into(),
            messages_sent: 0,
            bytes_sent: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send the command for `offset`, or nothing when there is no target.
    ///
    /// Returns the number of bytes written.
    pub fn transmit(&mut self, offset: Option<&TargetOffset>) -> Result<Option<usize>> {
        let Some(offset) = offset else {
            return Ok(None);
        };
        let command = format_command(offset);
        let bytes = command.as_bytes();
        self.sink
            .write_all(bytes)
            .with_context(|| format!("serial write to {} failed", self.name))?;
        let written = bytes.len();
        self.messages_sent += 1;
        self.bytes_sent += written as u64;
        log::debug!("sent {} bytes: {}", written, command.trim_end());
        Ok(Some(written))
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Flush and release the sink.
    pub fn close(mut self) -> Result<W> {
        self.sink
            .flush()
            .with_context(|| format!("failed to flush serial link {}", self.name))?;
        log::info!(
            "serial link {} closed ({} messages, {} bytes)",
            self.name,
            self.messages_sent,
            self.bytes_sent
        );
        Ok(self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn formats_one_decimal_with_framing() {
        let offset = TargetOffset {
            dx: -490.0,
            dy: -210.0,
        };
        assert_eq!(format_command(&offset), "&-490.0,-210.0#\r\n");
        assert_eq!(
            format_command(&TargetOffset { dx: 12.26, dy: 0.04 }),
            "&12.3,0.0#\r\n"
        );
    }

    #[test]
    fn parses_its_own_framing() -> Result<()> {
        let offset = parse_command("&-490.0,-210.0#\r\n")?;
        assert_eq!(offset, TargetOffset { dx: -490.0, dy: -210.0 });
        assert!(parse_command("&1.0,2.0#\n").is_err());
        assert!(parse_command("&1,2.0#\r\n").is_err());
        assert!(parse_command("&1.00,2.0#\r\n").is_err());
        assert!(parse_command("1.0,2.0#\r\n").is_err());
        Ok(())
    }

    #[test]
    fn no_target_writes_nothing() -> Result<()> {
        let mut link = SerialLink::new(Vec::new(), "memory");
        assert_eq!(link.transmit(None)?, None);
        assert_eq!(
            link.transmit(Some(&TargetOffset { dx: 1.0, dy: -2.0 }))?,
            Some(12)
        );
        assert_eq!(link.messages_sent(), 1);
        assert_eq!(link.close()?, b"&1.0,-2.0#\r\n".to_vec());
        Ok(())
    }

    /// Driver that accepts at most `chunk` bytes per call.
    struct ChunkedWriter {
        chunk: usize,
        calls: usize,
        data: Vec<u8>,
    }

    impl Write for ChunkedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.calls += 1;
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_driver_writes_complete_the_command() -> Result<()> {
        let writer = ChunkedWriter {
            chunk: 5,
            calls: 0,
            data: Vec::new(),
        };
        let mut link = SerialLink::new(writer, "chunked");
        let sent = link.transmit(Some(&TargetOffset {
            dx: -490.0,
            dy: -210.0,
        }))?;
        assert_eq!(sent, Some(17));
        assert_eq!(link.messages_sent(), 1);
        let writer = link.close()?;
        assert_eq!(writer.calls, 4);
        assert_eq!(writer.data, b"&-490.0,-210.0#\r\n".to_vec());
        Ok(())
    }

    /// Driver that stops accepting bytes.
    struct StalledWriter;

    impl Write for StalledWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stalled_and_failed_writes_are_errors() {
        let offset = TargetOffset { dx: 0.0, dy: 0.0 };
        let mut stalled = SerialLink::new(StalledWriter, "stalled");
        assert!(stalled.transmit(Some(&offset)).is_err());
        assert_eq!(stalled.messages_sent(), 0);

        let mut broken = SerialLink::new(BrokenWriter, "broken");
        let err = broken.transmit(Some(&offset)).unwrap_err();
        assert!(format!("{:#}", err).contains("unplugged"));
    }
}
