use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use log::{info, warn};

use crate::error::SourceError;
use crate::model::RawReport;

/// Enables JSON watch mode on a gpsd connection.
pub const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

/// Blocking stream of raw receiver reports.
pub trait ReportSource: Send {
    /// Establish the stream, dropping any previous connection.
    fn reconnect(&mut self) -> Result<(), SourceError>;

    /// Block until the next report arrives.
    fn next_report(&mut self) -> Result<RawReport, SourceError>;
}

/// Report source reading gpsd's JSON watch stream over TCP.
pub struct GpsdSource {
    address: String,
    reader: Option<BufReader<TcpStream>>,
    line: String,
}

impl GpsdSource {
    pub fn new(host: &str, port: u16) -> Self {
        GpsdSource {
            address: format!("{}:{}", host, port),
            reader: None,
            line: String::new(),
        }
    }
}

impl ReportSource for GpsdSource {
    fn reconnect(&mut self) -> Result<(), SourceError> {
        self.reader = None;
        let mut stream = TcpStream::connect(&self.address).map_err(|source| SourceError::Connect {
            addr: self.address.clone(),
            source,
        })?;
        stream.write_all(WATCH_COMMAND)?;
        info!(target: "acquisition", "Connected to gpsd at {}", self.address);
        self.reader = Some(BufReader::new(stream));
        Ok(())
    }

    fn next_report(&mut self) -> Result<RawReport, SourceError> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(SourceError::Closed);
        };
        loop {
            self.line.clear();
            if reader.read_line(&mut self.line)? == 0 {
                self.reader = None;
                return Err(SourceError::Closed);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawReport>(line) {
                Ok(report) => return Ok(report),
                Err(e) => warn!(target: "acquisition", "Skipping malformed gpsd line ({}): {}", e, line),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReportClass;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_gpsd_stream_parsing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut watch = vec![0u8; WATCH_COMMAND.len()];
            conn.read_exact(&mut watch).unwrap();
            conn.write_all(
                b"{\"class\":\"VERSION\",\"release\":\"3.22\"}\n\
                  not json at all\n\
                  \n\
                  {\"class\":\"TPV\",\"device\":\"/dev/ttyACM0\",\"lat\":1.5,\"lon\":2.5,\"alt\":3.0,\"speed\":1.0,\"track\":12.0}\n\
                  {\"class\":\"SKY\",\"device\":\"/dev/ttyACM0\",\"satellites\":[{\"PRN\":4,\"used\":true}]}\n",
            )
            .unwrap();
            watch
        });

        let mut source = GpsdSource::new("127.0.0.1", port);
        assert!(matches!(source.next_report(), Err(SourceError::Closed)));
        source.reconnect().unwrap();

        assert_eq!(source.next_report().unwrap(), RawReport::Other);
        let position = source.next_report().unwrap();
        assert_eq!(position.class(), Some(ReportClass::Position));
        assert_eq!(position.device(), Some("/dev/ttyACM0"));
        assert_eq!(source.next_report().unwrap().class(), Some(ReportClass::Sky));

        assert_eq!(server.join().unwrap(), WATCH_COMMAND);
        assert!(matches!(source.next_report(), Err(SourceError::Closed)));
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut source = GpsdSource::new("127.0.0.1", port);
        assert!(matches!(source.reconnect(), Err(SourceError::Connect { .. })));
    }
}
