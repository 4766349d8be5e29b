//! Byte transports for talking to a GDB server
//!
//! A GDB server is reached either through a serial port (probes that expose
//! their stub as a USB CDC-ACM device) or through a TCP socket (OpenOCD,
//! pyOCD, QEMU and friends).

use std::time::Duration;

use svdlink_core::{Error, Result};

/// Transport trait for reading and writing raw bytes
pub trait Transport: Send {
    /// Write all bytes to the transport
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`
    ///
    /// Returns the number of bytes read, or 0 if nothing arrived in time.
    fn read_nonblock(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Drop any input that is already pending
    fn discard_input(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read_nonblock(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read_nonblock(buf, timeout)
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read_nonblock(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read_nonblock(buf, timeout)
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }
}

/// Socket and serial timeouts of zero mean "block forever"
fn at_least_1ms(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

#[cfg(feature = "serial")]
pub mod serial {
    //! Serial port transport

    use super::*;
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};

    /// Default baud rate. USB CDC-ACM probes ignore it.
    pub const DEFAULT_BAUD: u32 = 115_200;

    /// Serial port transport
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Open a serial port, 8N1 without flow control
        pub fn open(device: &str, baud: Option<u32>) -> Result<Self> {
            let baud_rate = baud.unwrap_or(DEFAULT_BAUD);

            let port = serialport::new(device, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(Duration::from_secs(1))
                .open()
                .map_err(|e| Error::ConnectionFailed(format!("{}: {}", device, e)))?;

            log::info!("Opened serial port {} at {} baud", device, baud_rate);

            Ok(Self { port })
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            self.port.flush()?;
            Ok(())
        }

        fn read_nonblock(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
            let old_timeout = self.port.timeout();
            self.port
                .set_timeout(at_least_1ms(timeout))
                .map_err(std::io::Error::from)?;

            let result = match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if is_timeout(&e) => Ok(0),
                Err(e) => Err(Error::from(e)),
            };

            self.port
                .set_timeout(old_timeout)
                .map_err(std::io::Error::from)?;
            result
        }

        fn discard_input(&mut self) -> Result<()> {
            self.port
                .clear(ClearBuffer::Input)
                .map_err(std::io::Error::from)?;
            Ok(())
        }
    }
}

pub mod tcp {
    //! TCP socket transport

    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
    const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

    /// TCP socket transport
    pub struct TcpTransport {
        stream: TcpStream,
    }

    impl TcpTransport {
        /// Connect to a GDB server at `host:port`
        pub fn connect(host: &str, port: u16) -> Result<Self> {
            let addr = format!("{}:{}", host, port);
            log::info!("Connecting to GDB server at {}", addr);

            let stream = TcpStream::connect(&addr)
                .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))?;

            // The protocol is a strict request/response ping-pong
            stream.set_nodelay(true).map_err(|e| {
                Error::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
            })?;
            stream
                .set_write_timeout(Some(DEFAULT_IO_TIMEOUT))
                .map_err(|e| {
                    Error::ConnectionFailed(format!("Failed to set write timeout: {}", e))
                })?;

            log::info!("Connected to GDB server at {}", addr);

            Ok(Self { stream })
        }
    }

    impl Transport for TcpTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.stream.write_all(data)?;
            Ok(())
        }

        fn read_nonblock(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
            self.stream.set_read_timeout(Some(at_least_1ms(timeout)))?;

            match self.stream.read(buf) {
                Ok(0) => Err(Error::ConnectionFailed(
                    "GDB server closed the connection".to_string(),
                )),
                Ok(n) => Ok(n),
                Err(e) if is_timeout(&e) => Ok(0),
                Err(e) => Err(Error::from(e)),
            }
        }

        fn discard_input(&mut self) -> Result<()> {
            let mut scratch = [0u8; 256];
            while self.read_nonblock(&mut scratch, DRAIN_TIMEOUT)? > 0 {}
            Ok(())
        }
    }
}
