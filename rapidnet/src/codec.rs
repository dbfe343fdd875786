//! Framing of the TCP byte stream.
//!
//! The default wire format is a four byte header followed by the payload:
//!
//! ```text
//! offset 0: 0xFE        magic
//! offset 1: 0xDC        magic
//! offset 2: u16         payload length (big-endian unless configured otherwise)
//! offset 4: payload
//! ```
//!
//! A header with the wrong magic is a fatal framing error; no attempt is made to
//! resynchronise. Other wire formats can be supplied by implementing
//! [`PacketHandlerFactory`].

use crate::config::{ByteOrder, ConnectionSettings};
use crate::error::CodecError;

use async_trait::async_trait;
use std::{io, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};

/// One application message, as extracted from the byte stream.
pub type Frame = Vec<u8>;

pub const FRAME_MAGIC: [u8; 2] = [0xFE, 0xDC];
pub const HEADER_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// The receiving half of a codec.
#[async_trait]
pub trait FrameReader: Send {
    /// Read the next complete frame.
    ///
    /// `Ok(None)` means no complete frame arrived before the read deadline.
    /// Any partial frame read so far is retained for the next call. Errors are
    /// permanent.
    async fn receive(&mut self) -> Result<Option<Frame>, CodecError>;
}

/// The sending half of a codec.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one frame in full. Errors are permanent: the connection must be
    /// closed rather than sent to again.
    async fn send(&mut self, frame: &[u8]) -> Result<(), CodecError>;

    /// Shut down the write side of the socket.
    async fn close(&mut self) -> Result<(), CodecError>;
}

/// A codec instance bound to one socket.
///
/// The two halves are driven by different tasks, so they're stored separately
/// and handed out by [`into_parts`](Self::into_parts).
pub struct PacketHandler {
    reader: Box<dyn FrameReader>,
    writer: Box<dyn FrameWriter>,
}

impl PacketHandler {
    pub fn new(reader: impl FrameReader + 'static, writer: impl FrameWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    pub fn into_parts(self) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (self.reader, self.writer)
    }
}

/// Binds a freshly accepted or dialed socket to a new codec instance.
pub trait PacketHandlerFactory: Send + Sync {
    fn create(&self, stream: TcpStream) -> PacketHandler;
}

impl<F> PacketHandlerFactory for F
where
    F: Fn(TcpStream) -> PacketHandler + Send + Sync,
{
    fn create(&self, stream: TcpStream) -> PacketHandler {
        self(stream)
    }
}

pub type SharedPacketHandlerFactory = Arc<dyn PacketHandlerFactory>;

/// Produces codecs for the default `0xFE 0xDC` wire format.
#[derive(Clone, Debug)]
pub struct DefaultPacketHandlerFactory {
    byte_order: ByteOrder,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl DefaultPacketHandlerFactory {
    pub fn new(settings: &ConnectionSettings) -> Self {
        Self {
            byte_order: settings.byte_order,
            read_timeout: settings.read_timeout(),
            write_timeout: settings.write_timeout(),
        }
    }

    pub fn shared(settings: &ConnectionSettings) -> SharedPacketHandlerFactory {
        Arc::new(Self::new(settings))
    }
}

impl PacketHandlerFactory for DefaultPacketHandlerFactory {
    fn create(&self, stream: TcpStream) -> PacketHandler {
        let (read_half, write_half) = stream.into_split();
        PacketHandler::new(
            DefaultFrameReader::new(read_half, self.byte_order, self.read_timeout),
            DefaultFrameWriter::new(write_half, self.byte_order, self.write_timeout),
        )
    }
}

#[derive(Debug)]
enum DecodeState {
    AwaitingHeader {
        header: [u8; HEADER_LEN],
        filled: usize,
    },
    AwaitingBody {
        body: Vec<u8>,
        filled: usize,
    },
}

impl DecodeState {
    fn idle() -> Self {
        Self::AwaitingHeader {
            header: [0; HEADER_LEN],
            filled: 0,
        }
    }
}

/// Incremental parser for the default wire format.
///
/// A validated header is never re-read; body bytes accumulate across calls
/// until the declared length is reached, at which point the frame is returned
/// and the decoder goes back to waiting for a header. After an error the
/// decoder must be discarded.
#[derive(Debug)]
pub struct FrameDecoder {
    byte_order: ByteOrder,
    state: DecodeState,
}

impl FrameDecoder {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            state: DecodeState::idle(),
        }
    }

    /// True if no part of a frame is buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, DecodeState::AwaitingHeader { filled: 0, .. })
    }

    /// Number of bytes of the current partial frame held by the decoder.
    pub fn buffered(&self) -> usize {
        match &self.state {
            DecodeState::AwaitingHeader { filled, .. } => *filled,
            DecodeState::AwaitingBody { filled, .. } => HEADER_LEN + *filled,
        }
    }

    /// Consume bytes from the front of `input` until a frame completes or the
    /// input runs out. Bytes following a completed frame are left in `input`.
    pub fn decode(&mut self, input: &mut &[u8]) -> Result<Option<Frame>, CodecError> {
        while !input.is_empty() {
            let dest = self.unfilled();
            let n = dest.len().min(input.len());
            dest[..n].copy_from_slice(&input[..n]);
            *input = &input[n..];

            if let Some(frame) = self.advance(n)? {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    // Never empty: each state is left as soon as its buffer fills.
    fn unfilled(&mut self) -> &mut [u8] {
        match &mut self.state {
            DecodeState::AwaitingHeader { header, filled } => &mut header[*filled..],
            DecodeState::AwaitingBody { body, filled } => &mut body[*filled..],
        }
    }

    fn advance(&mut self, n: usize) -> Result<Option<Frame>, CodecError> {
        match &mut self.state {
            DecodeState::AwaitingHeader { header, filled } => {
                *filled += n;
                if *filled < HEADER_LEN {
                    return Ok(None);
                }

                let header = *header;
                if header[..2] != FRAME_MAGIC {
                    return Err(CodecError::InvalidMagic([header[0], header[1]]));
                }

                let len = decode_length([header[2], header[3]], self.byte_order);
                if len == 0 {
                    self.state = DecodeState::idle();
                    return Ok(Some(Frame::new()));
                }

                self.state = DecodeState::AwaitingBody {
                    body: vec![0; len],
                    filled: 0,
                };
                Ok(None)
            }
            DecodeState::AwaitingBody { body, filled } => {
                *filled += n;
                if *filled < body.len() {
                    return Ok(None);
                }

                let frame = std::mem::take(body);
                self.state = DecodeState::idle();
                Ok(Some(frame))
            }
        }
    }
}

fn decode_length(bytes: [u8; 2], byte_order: ByteOrder) -> usize {
    let len = match byte_order {
        ByteOrder::BigEndian => u16::from_be_bytes(bytes),
        ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
    };
    len.into()
}

/// Build the header and payload of one frame as a single buffer.
pub fn encode_frame(payload: &[u8], byte_order: ByteOrder) -> Result<Vec<u8>, CodecError> {
    let len = u16::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;
    let len_bytes = match byte_order {
        ByteOrder::BigEndian => len.to_be_bytes(),
        ByteOrder::LittleEndian => len.to_le_bytes(),
    };

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&FRAME_MAGIC);
    buf.extend_from_slice(&len_bytes);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Reads default-format frames from any byte stream.
pub struct DefaultFrameReader<R> {
    reader: BufReader<R>,
    decoder: FrameDecoder,
    read_timeout: Duration,
}

impl<R> DefaultFrameReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, byte_order: ByteOrder, read_timeout: Duration) -> Self {
        Self {
            reader: BufReader::new(reader),
            decoder: FrameDecoder::new(byte_order),
            read_timeout,
        }
    }

    // Cancel safe: decoder state only changes after a read completes.
    async fn read_frame(&mut self) -> Result<Frame, CodecError> {
        loop {
            let n = self.reader.read(self.decoder.unfilled()).await?;
            if n == 0 {
                return Err(if self.decoder.is_idle() {
                    CodecError::Closed
                } else {
                    CodecError::Truncated(self.decoder.buffered())
                });
            }

            if let Some(frame) = self.decoder.advance(n)? {
                return Ok(frame);
            }
        }
    }
}

#[async_trait]
impl<R> FrameReader for DefaultFrameReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<Frame>, CodecError> {
        match timeout(self.read_timeout, self.read_frame()).await {
            Ok(frame) => frame.map(Some),
            Err(_) => Ok(None),
        }
    }
}

/// Writes default-format frames to any byte stream.
pub struct DefaultFrameWriter<W> {
    writer: W,
    byte_order: ByteOrder,
    write_timeout: Duration,
    poisoned: bool,
}

impl<W> DefaultFrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, byte_order: ByteOrder, write_timeout: Duration) -> Self {
        Self {
            writer,
            byte_order,
            write_timeout,
            poisoned: false,
        }
    }

    async fn write_buf(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf).await?;
        self.writer.flush().await
    }
}

#[async_trait]
impl<W> FrameWriter for DefaultFrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &[u8]) -> Result<(), CodecError> {
        if self.poisoned {
            return Err(CodecError::Poisoned);
        }

        let buf = encode_frame(frame, self.byte_order)?;
        let write_timeout = self.write_timeout;
        let result = match timeout(write_timeout, self.write_buf(&buf)).await {
            Ok(result) => result.map_err(CodecError::from),
            Err(_) => Err(CodecError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "frame write timed out",
            ))),
        };

        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    async fn close(&mut self) -> Result<(), CodecError> {
        self.poisoned = true;
        Ok(self.writer.shutdown().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{duplex, DuplexStream};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn reader(stream: DuplexStream) -> DefaultFrameReader<DuplexStream> {
        DefaultFrameReader::new(stream, ByteOrder::BigEndian, TIMEOUT)
    }

    fn writer(stream: DuplexStream) -> DefaultFrameWriter<DuplexStream> {
        DefaultFrameWriter::new(stream, ByteOrder::BigEndian, TIMEOUT)
    }

    async fn receive_frame(reader: &mut impl FrameReader) -> Result<Frame, CodecError> {
        loop {
            if let Some(frame) = reader.receive().await? {
                return Ok(frame);
            }
        }
    }

    #[test]
    fn exact_frame() {
        let mut decoder = FrameDecoder::new(ByteOrder::BigEndian);
        let mut input: &[u8] = b"\xFE\xDC\x00\x05hello";

        assert_eq!(decoder.decode(&mut input).unwrap(), Some(b"hello".to_vec()));
        assert!(input.is_empty());
        assert!(decoder.is_idle());
    }

    #[test]
    fn bad_magic() {
        let mut decoder = FrameDecoder::new(ByteOrder::BigEndian);
        let mut input: &[u8] = b"\x00\x00\x00\x05hello";

        assert!(matches!(
            decoder.decode(&mut input),
            Err(CodecError::InvalidMagic([0, 0]))
        ));
    }

    #[test]
    fn one_byte_at_a_time() {
        let payload: Vec<u8> = (0..=255).cycle().take(1000).collect();
        let wire = encode_frame(&payload, ByteOrder::BigEndian).unwrap();
        let mut decoder = FrameDecoder::new(ByteOrder::BigEndian);

        let (last, rest) = wire.split_last().unwrap();
        for byte in rest {
            let mut input = std::slice::from_ref(byte);
            assert_eq!(decoder.decode(&mut input).unwrap(), None);
        }
        assert_eq!(decoder.buffered(), wire.len() - 1);

        let mut input = std::slice::from_ref(last);
        assert_eq!(decoder.decode(&mut input).unwrap(), Some(payload));
        assert!(decoder.is_idle());
    }

    #[test]
    fn back_to_back_frames() {
        let mut wire = encode_frame(b"first", ByteOrder::BigEndian).unwrap();
        wire.extend(encode_frame(b"", ByteOrder::BigEndian).unwrap());
        wire.extend(encode_frame(b"third", ByteOrder::BigEndian).unwrap());

        let mut decoder = FrameDecoder::new(ByteOrder::BigEndian);
        let mut input = &wire[..];

        assert_eq!(decoder.decode(&mut input).unwrap(), Some(b"first".to_vec()));
        assert_eq!(decoder.decode(&mut input).unwrap(), Some(Vec::new()));
        assert_eq!(decoder.decode(&mut input).unwrap(), Some(b"third".to_vec()));
        assert_eq!(decoder.decode(&mut input).unwrap(), None);
    }

    #[test]
    fn header_byte_order() {
        assert_eq!(
            encode_frame(b"abc", ByteOrder::BigEndian).unwrap()[..HEADER_LEN],
            [0xFE, 0xDC, 0x00, 0x03]
        );
        assert_eq!(
            encode_frame(b"abc", ByteOrder::LittleEndian).unwrap()[..HEADER_LEN],
            [0xFE, 0xDC, 0x03, 0x00]
        );

        let mut decoder = FrameDecoder::new(ByteOrder::LittleEndian);
        let mut input: &[u8] = b"\xFE\xDC\x02\x00hi";
        assert_eq!(decoder.decode(&mut input).unwrap(), Some(b"hi".to_vec()));
    }

    #[test]
    fn oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode_frame(&payload, ByteOrder::BigEndian),
            Err(CodecError::PayloadTooLarge(65536))
        ));
    }

    #[tokio::test]
    async fn trickled_stream_reassembles() {
        // A one byte pipe forces every read to return a single byte
        let (client, server) = duplex(1);
        let payload = b"partial delivery".to_vec();
        let expected = payload.clone();

        let send_task = tokio::spawn(async move {
            let mut writer = writer(client);
            writer.send(&payload).await.unwrap();
            writer
        });

        let mut reader = reader(server);
        assert_eq!(receive_frame(&mut reader).await.unwrap(), expected);
        send_task.await.unwrap();
    }

    #[tokio::test]
    async fn largest_frame() {
        let (client, server) = duplex(8192);
        let payload: Vec<u8> = (0..MAX_PAYLOAD_LEN).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let send_task = tokio::spawn(async move {
            let mut writer = writer(client);
            writer.send(&payload).await.unwrap();
            writer
        });

        let mut reader = reader(server);
        assert_eq!(receive_frame(&mut reader).await.unwrap(), expected);
        send_task.await.unwrap();
    }

    #[tokio::test]
    async fn idle_read_times_out_quietly() {
        let (client, server) = duplex(64);
        let mut reader = DefaultFrameReader::new(server, ByteOrder::BigEndian, Duration::from_millis(50));
        let mut writer = writer(client);

        assert_eq!(reader.receive().await.unwrap(), None);

        writer.send(b"late").await.unwrap();
        assert_eq!(receive_frame(&mut reader).await.unwrap(), b"late".to_vec());
    }

    #[tokio::test]
    async fn partial_header_survives_timeout() {
        let (mut client, server) = duplex(64);
        let mut reader = DefaultFrameReader::new(server, ByteOrder::BigEndian, Duration::from_millis(50));

        client.write_all(&[0xFE, 0xDC, 0x00]).await.unwrap();
        assert_eq!(reader.receive().await.unwrap(), None);

        client.write_all(b"\x02ok").await.unwrap();
        assert_eq!(receive_frame(&mut reader).await.unwrap(), b"ok".to_vec());
    }

    #[tokio::test]
    async fn eof_between_frames() {
        let (client, server) = duplex(64);
        drop(client);

        let mut reader = reader(server);
        assert!(matches!(reader.receive().await, Err(CodecError::Closed)));
    }

    #[tokio::test]
    async fn eof_inside_frame() {
        let (mut client, server) = duplex(64);
        client.write_all(&[0xFE, 0xDC, 0x00, 0x05, b'h']).await.unwrap();
        drop(client);

        let mut reader = reader(server);
        assert!(matches!(reader.receive().await, Err(CodecError::Truncated(5))));
    }

    #[tokio::test]
    async fn bad_magic_from_stream() {
        let (mut client, server) = duplex(64);
        client.write_all(b"\x00\x00\x00\x05hello").await.unwrap();

        let mut reader = reader(server);
        let err = reader.receive().await.unwrap_err();
        assert!(err.is_framing_error());
    }

    #[tokio::test]
    async fn failed_writer_stays_failed() {
        let (client, server) = duplex(64);
        drop(server);

        let mut writer = writer(client);
        assert!(matches!(writer.send(b"lost").await, Err(CodecError::Io(_))));
        assert!(matches!(writer.send(b"also lost").await, Err(CodecError::Poisoned)));
    }
}
