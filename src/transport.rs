//! Line-framed transport (C2): owns the TCP socket and exposes an async
//! line-read / line-write abstraction. Framing (where a line ends) is
//! delegated to `tokio_util`'s `LinesCodec`, which already implements the
//! "strip a trailing `\r`" rule this protocol needs.

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::io;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// A permissive line codec: splits on `\n`, strips a trailing `\r`, imposes
/// no line-length limit (AMI `Follows` bodies can be long) and no charset
/// restriction beyond what arrives on the wire.
#[derive(Default)]
struct AmiLineCodec {
    next_index: usize,
}

impl Decoder for AmiLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(newline_offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') {
            let newline_index = self.next_index + newline_offset;
            let mut line = buf.split_to(newline_index + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            self.next_index = 0;
            let line = String::from_utf8(line.to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Some(line))
        } else {
            self.next_index = buf.len();
            Ok(None)
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None if buf.is_empty() => Ok(None),
            None => {
                let line = buf.split_to(buf.len());
                self.next_index = 0;
                let line = String::from_utf8(line.to_vec())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(line))
            }
        }
    }
}

impl Encoder<String> for AmiLineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), io::Error> {
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}

type WriteHalf = futures_util::stream::SplitSink<Framed<TcpStream, AmiLineCodec>, String>;
type ReadHalf = futures_util::stream::SplitStream<Framed<TcpStream, AmiLineCodec>>;

/// Single-consumer read side of the transport. Owned exclusively by the
/// session's read-loop task.
pub struct LineReader {
    inner: ReadHalf,
}

impl LineReader {
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        match self.inner.next().await {
            Some(line) => line.map(Some),
            None => Ok(None),
        }
    }
}

/// Write side of the transport. Wrapped in an async mutex so every action
/// submission and the close handshake can share one writer without
/// interleaving partial packets.
pub struct LineWriter {
    inner: Mutex<WriteHalf>,
}

impl LineWriter {
    pub async fn write_line(&self, line: impl Into<String>) -> io::Result<()> {
        let mut guard = self.inner.lock().await;
        guard.send(line.into()).await
    }

    /// Write every line of an encoded packet, then flush once the whole
    /// packet (plus its blank terminator) has been queued.
    pub async fn write_packet_lines(&self, lines: Vec<String>) -> io::Result<()> {
        let mut guard = self.inner.lock().await;
        for line in lines {
            guard.feed(line).await?;
        }
        guard.feed(String::new()).await?;
        guard.flush().await
    }

    pub async fn close(&self) -> io::Result<()> {
        let mut guard = self.inner.lock().await;
        guard.close().await
    }
}

/// Split a freshly connected socket into single-consumer reader and
/// shareable writer halves.
pub fn split(stream: TcpStream) -> (LineReader, LineWriter) {
    let framed = Framed::new(stream, AmiLineCodec::default());
    let (sink, stream) = framed.split();
    (
        LineReader { inner: stream },
        LineWriter {
            inner: Mutex::new(sink),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn round_trips_crlf_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let (mut reader, _writer) = split(sock);
            reader.read_line().await.unwrap()
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let (_reader, writer) = split(client);
        writer.write_line("Action: Ping").await.unwrap();

        let got = server.await.unwrap();
        assert_eq!(got.as_deref(), Some("Action: Ping"));
    }

    #[tokio::test]
    async fn read_line_returns_none_on_clean_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let (mut reader, _writer) = split(sock);
            reader.read_line().await.unwrap()
        });

        let client = TcpStream::connect(addr).await.unwrap();
        drop(client);

        let got = server.await.unwrap();
        assert_eq!(got, None);
    }
}
