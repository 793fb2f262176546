use log::{debug, trace};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::{Connector, Session};
use crate::config::{LINE_TERMINATOR, parse_address};
use crate::error::PushError;

/// Telnet "interpret as command" byte. Data bytes equal to it are doubled.
const IAC: u8 = 0xFF;

/// Encodes one command for the wire: IAC bytes escaped, CR+LF appended.
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(line.len() + LINE_TERMINATOR.len());
    escape_iac(line.as_bytes(), &mut buf);
    buf.extend_from_slice(LINE_TERMINATOR.as_bytes());
    buf
}

fn escape_iac(data: &[u8], out: &mut Vec<u8>) {
    for &byte in data {
        if byte == IAC {
            out.push(IAC);
        }
        out.push(byte);
    }
}

/// Connector producing plaintext Telnet sessions over TCP.
///
/// No option negotiation is performed and nothing is read back from the
/// device.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelnetConnector;

impl Connector for TelnetConnector {
    type Session = TelnetSession;

    async fn connect(&self, addr: &str) -> Result<TelnetSession, PushError> {
        TelnetSession::connect(addr).await
    }
}

/// A single Telnet connection to one target.
#[derive(Debug)]
pub struct TelnetSession {
    addr: String,
    stream: TcpStream,
    bytes_written: u64,
}

impl TelnetSession {
    /// Dials `addr` (`host:port`, IPv6 hosts bracketed).
    pub async fn connect(addr: &str) -> Result<Self, PushError> {
        let (host, port) = parse_address(addr)?;

        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|source| PushError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true).map_err(|source| PushError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        debug!("{} TCP connection successful", addr);

        Ok(Self {
            addr: addr.to_string(),
            stream,
            bytes_written: 0,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Total bytes put on the wire, escaping and terminators included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Session for TelnetSession {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let bytes = encode_line(line);
        trace!("{} <- {:?}", self.addr, bytes);
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> std::io::Result<()> {
        debug!("{} closing Telnet session", self.addr);
        self.stream.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn encode_line_appends_crlf() {
        assert_eq!(encode_line("wr mem"), b"wr mem\r\n");
        assert_eq!(encode_line(""), b"\r\n");
    }

    #[test]
    fn escape_iac_doubles_iac_bytes() {
        let mut out = Vec::new();
        escape_iac(&[b'a', IAC, b'b', IAC, IAC], &mut out);
        assert_eq!(out, [b'a', IAC, IAC, b'b', IAC, IAC, IAC, IAC]);
    }

    #[test]
    fn encode_line_keeps_utf8_intact() {
        // U+00FF encodes as 0xC3 0xBF, so no IAC byte appears.
        assert_eq!(encode_line("\u{ff}"), b"\xC3\xBF\r\n");
    }

    #[tokio::test]
    async fn session_writes_lines_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.expect("read");
            received
        });

        let mut session = TelnetConnector.connect(&addr).await.expect("connect");
        session.write_line("config t").await.expect("write");
        session.write_line("end").await.expect("write");
        assert_eq!(session.bytes_written(), 15);
        session.close().await.expect("close");

        let received = server.await.expect("server task");
        assert_eq!(received, b"config t\r\nend\r\n");
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        drop(listener);

        let err = TelnetSession::connect(&addr).await.unwrap_err();
        assert!(matches!(err, PushError::Connect { .. }));
        assert!(err.to_string().contains(&addr));
    }

    #[tokio::test]
    async fn connect_rejects_malformed_address() {
        let err = TelnetSession::connect("10.0.0.5").await.unwrap_err();
        assert!(matches!(err, PushError::InvalidAddress(_)));
    }
}
