//! Capture line protocol.
//!
//! The radio front end emits one line per received packet:
//!
//! ```text
//! +<hex>;rs=<int>;rssi=<float>;t=<unix-seconds>.<fraction>;
//! ```
//!
//! Lines starting with `-` are UAT ADS-B downlink and are dropped here;
//! anything else (comments, blank lines) is dropped as well. The hex
//! payload of a ground uplink decodes to exactly 432 bytes, zero padded by
//! the transmitter.

use std::{
    pin::Pin,
    str::FromStr,
    task::{
        Context,
        Poll,
    },
};

use bytes::Bytes;
use chrono::{
    DateTime,
    Utc,
};
use futures_util::Stream;
use pin_project_lite::pin_project;
use tokio::io::{
    AsyncRead,
    ReadBuf,
};

/// Ground uplink application payload length in bytes.
pub const PAYLOAD_LENGTH: usize = 432;

const RECEIVE_BUFFER_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("capture read error")]
    Io(#[from] std::io::Error),
    #[error("capture line longer than {RECEIVE_BUFFER_SIZE} bytes")]
    MaxLineLengthExceeded,
    #[error(transparent)]
    InvalidLine(#[from] LineFromStrError),
}

/// One FIS-B ground uplink as it came off the radio.
#[derive(Clone, Debug)]
pub struct CaptureLine {
    /// Decoded application payload, 432 bytes.
    pub payload: Bytes,
    /// Reed-Solomon errors corrected upstream.
    pub reed_solomon: u32,
    pub rssi: f64,
    /// Receive timestamp from the `t=` trailer; falls back to the wall
    /// clock when the trailer is absent.
    pub rcvd_time: DateTime<Utc>,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum LineFromStrError {
    #[error("not a ground uplink line")]
    NotUplink,
    #[error("missing `;` after payload")]
    MissingDelimiter,
    #[error("payload contains non-hex characters")]
    NotHex,
    #[error("expected {PAYLOAD_LENGTH} payload bytes, got {got}")]
    WrongLength { got: usize },
    #[error("malformed trailer field: {field}")]
    MalformedTrailer { field: String },
}

impl FromStr for CaptureLine {
    type Err = LineFromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix('+').ok_or(LineFromStrError::NotUplink)?;
        let (hex, trailer) = rest
            .split_once(';')
            .ok_or(LineFromStrError::MissingDelimiter)?;

        if hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(LineFromStrError::NotHex);
        }

        let payload: Vec<u8> = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect();

        if payload.len() != PAYLOAD_LENGTH {
            return Err(LineFromStrError::WrongLength {
                got: payload.len(),
            });
        }

        let mut reed_solomon = 0;
        let mut rssi = 0.0;
        let mut rcvd_time = None;

        for field in trailer.split(';') {
            let Some((key, value)) = field.split_once('=')
            else {
                continue;
            };
            let err = || {
                LineFromStrError::MalformedTrailer {
                    field: field.to_owned(),
                }
            };

            match key {
                "rs" => reed_solomon = value.parse().map_err(|_| err())?,
                "rssi" => rssi = value.parse().map_err(|_| err())?,
                "t" => {
                    let seconds: f64 = value.parse().map_err(|_| err())?;
                    rcvd_time =
                        Some(DateTime::from_timestamp_micros((seconds * 1e6) as i64)
                            .ok_or_else(err)?);
                }
                _ => {}
            }
        }

        Ok(Self {
            payload: payload.into(),
            reed_solomon,
            rssi,
            rcvd_time: rcvd_time.unwrap_or_else(Utc::now),
        })
    }
}

pin_project! {
    /// Line reader over the capture stream.
    ///
    /// Yields one [`CaptureLine`] per ground uplink and silently drops
    /// everything that isn't one (ADS-B lines, comments, blanks). Malformed
    /// uplink lines yield an error item; the stream continues afterwards.
    #[derive(Debug)]
    pub struct Reader<R> {
        #[pin]
        reader: R,
        receive_buffer: ReceiveBuffer,
    }
}

impl<R: AsyncRead> Reader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            receive_buffer: ReceiveBuffer::default(),
        }
    }
}

impl<R: AsyncRead> Stream for Reader<R> {
    type Item = Result<CaptureLine, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let this = self.as_mut().project();

            if let Some(line) = this.receive_buffer.next_line() {
                if !line.starts_with(b"+") {
                    // ADS-B, comment, heartbeat. Not ours.
                    continue;
                }

                let line = String::from_utf8_lossy(line);
                match line.trim_end().parse() {
                    Ok(capture_line) => return Poll::Ready(Some(Ok(capture_line))),
                    Err(error) => {
                        return Poll::Ready(Some(Err(Error::InvalidLine(error))));
                    }
                }
            }
            else {
                this.receive_buffer.prepare_read();
                if this.receive_buffer.write_pos >= RECEIVE_BUFFER_SIZE {
                    // A line longer than the whole buffer. Drop it and
                    // resynchronize at the next newline.
                    this.receive_buffer.reset();
                    return Poll::Ready(Some(Err(Error::MaxLineLengthExceeded)));
                }

                let mut read_buf =
                    ReadBuf::new(&mut this.receive_buffer.buffer[this.receive_buffer.write_pos..]);
                match this.reader.poll_read(cx, &mut read_buf) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(error)) => return Poll::Ready(Some(Err(error.into()))),
                    Poll::Ready(Ok(())) => {
                        let num_bytes_read = read_buf.filled().len();
                        if num_bytes_read == 0 {
                            return Poll::Ready(None);
                        }

                        this.receive_buffer.write_pos += num_bytes_read;
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
struct ReceiveBuffer {
    buffer: Box<[u8; RECEIVE_BUFFER_SIZE]>,
    read_pos: usize,
    write_pos: usize,
    no_newline_until: usize,
}

impl ReceiveBuffer {
    fn scan_for_newline(&mut self) -> Option<usize> {
        if let Some(index) = self.buffer[self.no_newline_until..self.write_pos]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let index = index + self.no_newline_until;
            self.no_newline_until = index;
            Some(index)
        }
        else {
            self.no_newline_until = self.write_pos;
            None
        }
    }

    fn next_line(&mut self) -> Option<&[u8]> {
        if let Some(newline) = self.scan_for_newline() {
            let start = self.read_pos;
            self.read_pos = newline + 1;
            self.no_newline_until = self.read_pos;
            Some(&self.buffer[start..newline])
        }
        else {
            None
        }
    }

    fn prepare_read(&mut self) {
        if self.read_pos > 0 {
            self.buffer.copy_within(self.read_pos..self.write_pos, 0);
            self.write_pos -= self.read_pos;
            self.no_newline_until -= self.read_pos;
            self.read_pos = 0;
        }
    }

    fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.no_newline_until = 0;
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self {
            buffer: Box::new([0; RECEIVE_BUFFER_SIZE]),
            read_pos: 0,
            write_pos: 0,
            no_newline_until: 0,
        }
    }
}
