//! Resumable HTTP/1.x message decoder.
//!
//! [`MessageDecoder`] is a push parser: each call to [`MessageDecoder::decode`]
//! consumes as many bytes as it can and reports the state it stopped in. It
//! never blocks and never needs more than the bytes it is given, so a reactor
//! can feed it straight from a socket read buffer.

use std::{
    mem,
    net::{Ipv4Addr, SocketAddrV4},
};

use bytes::{Buf, Bytes, BytesMut};
use http::{Method, StatusCode, Version};
use tokio_util::codec::Decoder;

use super::{DecodeError, LineReader, ProtocolError};
use crate::{
    config::{Limits, ProxyProtocol},
    headers::{self, Headers, split_header_line},
    message::{self, Head, Message, RequestHead, ResponseHead},
};

/// Position of the decoder within a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecodeState {
    /// Waiting for the PROXY preface that opens a connection.
    ConnectionOpen,
    /// Waiting for the request line or status line.
    ReadInitial,
    /// Reading header lines until an empty line.
    ReadHeader,
    /// Reading a body of known length.
    ReadFixedLengthContent,
    /// Reading a chunk-size line.
    ReadChunkSize,
    /// Reading chunk data.
    ReadChunkedContent,
    /// Expecting the empty line after chunk data.
    ReadChunkDelimiter,
    /// Reading trailer lines after the final chunk.
    ReadChunkFooter,
    /// Reading a response body delimited by connection close.
    ReadVariableLengthContent,
    /// A complete message is available.
    AllRead,
    /// The input was rejected; the decoder must be discarded.
    ProtocolError,
}

impl DecodeState {
    /// Returns `true` while body bytes are being consumed.
    #[must_use]
    pub fn in_body(self) -> bool {
        matches!(
            self,
            Self::ReadFixedLengthContent
                | Self::ReadChunkSize
                | Self::ReadChunkedContent
                | Self::ReadChunkDelimiter
                | Self::ReadChunkFooter
                | Self::ReadVariableLengthContent
        )
    }
}

/// Which side of the exchange is being decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Server side: parse request lines.
    Request,
    /// Client side: parse status lines.
    Response,
}

/// How body bytes are handed to the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BodyMode {
    /// Collect the whole body into the finished [`Message`].
    #[default]
    Accumulate,
    /// Leave body bytes for [`MessageDecoder::take_body_chunk`].
    Stream,
}

/// Client and proxy endpoints announced by a PROXY protocol v1 preface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyPreface {
    pub client: SocketAddrV4,
    pub proxy: SocketAddrV4,
}

impl ProxyPreface {
    /// Parse `PROXY TCP4 <client> <proxy> <client port> <proxy port>`.
    ///
    /// Fields are separated by exactly one space, addresses must be dotted
    /// quads without leading zeros and ports must be `1..=65535`.
    ///
    /// ```
    /// use httpwire::codec::ProxyPreface;
    ///
    /// let preface = ProxyPreface::parse("PROXY TCP4 192.0.2.7 10.0.0.1 56324 443").unwrap();
    /// assert_eq!(preface.client.to_string(), "192.0.2.7:56324");
    /// assert_eq!(preface.forwarded_proto(), Some("https"));
    /// assert!(ProxyPreface::parse("PROXY TCP6 ::1 ::1 1 2").is_none());
    /// ```
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split(' ');
        let (Some("PROXY"), Some("TCP4"), Some(client), Some(proxy), Some(client_port), Some(proxy_port), None) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return None;
        };
        Some(Self {
            client: SocketAddrV4::new(client.parse::<Ipv4Addr>().ok()?, parse_port(client_port)?),
            proxy: SocketAddrV4::new(proxy.parse::<Ipv4Addr>().ok()?, parse_port(proxy_port)?),
        })
    }

    /// Scheme implied by the port the proxy accepted on.
    #[must_use]
    pub fn forwarded_proto(&self) -> Option<&'static str> {
        match self.proxy.port() {
            80 => Some("http"),
            443 => Some("https"),
            _ => None,
        }
    }
}

fn parse_port(token: &str) -> Option<u16> {
    if token.starts_with('0') || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok().filter(|&port| port != 0)
}

/// Incremental HTTP/1.x request or response parser.
///
/// # Examples
///
/// ```
/// use httpwire::codec::{DecodeState, MessageDecoder};
///
/// let mut decoder = MessageDecoder::request(8192, 1024);
/// let mut input: &[u8] = b"POST /items HTTP/1.1\r\nContent-Length: 5\r\n\r\nhe";
/// assert_eq!(decoder.decode(&mut input).unwrap(), DecodeState::ReadFixedLengthContent);
///
/// let mut rest: &[u8] = b"llo";
/// assert_eq!(decoder.decode(&mut rest).unwrap(), DecodeState::AllRead);
/// let message = decoder.take_message().unwrap();
/// assert_eq!(message.body().as_ref(), b"hello");
/// ```
#[derive(Debug)]
pub struct MessageDecoder {
    role: Role,
    body_mode: BodyMode,
    proxy_protocol: ProxyProtocol,
    preface: Option<ProxyPreface>,
    max_body: usize,
    state: DecodeState,
    lines: LineReader,
    head: Option<Head>,
    headers: Headers,
    body: BytesMut,
    body_read: u64,
    body_remaining: u64,
    consumed_any: bool,
    no_body_response: bool,
}

impl MessageDecoder {
    /// Create a decoder for the given role and limits.
    #[must_use]
    pub fn new(role: Role, max_line: usize, max_body: usize) -> Self {
        Self {
            role,
            body_mode: BodyMode::Accumulate,
            proxy_protocol: ProxyProtocol::Disabled,
            preface: None,
            max_body,
            state: DecodeState::ReadInitial,
            lines: LineReader::new(max_line),
            head: None,
            headers: Headers::new(),
            body: BytesMut::new(),
            body_read: 0,
            body_remaining: 0,
            consumed_any: false,
            no_body_response: false,
        }
    }

    /// Decoder for incoming requests.
    #[must_use]
    pub fn request(max_line: usize, max_body: usize) -> Self {
        Self::new(Role::Request, max_line, max_body)
    }

    /// Decoder for incoming responses.
    #[must_use]
    pub fn response(max_line: usize, max_body: usize) -> Self {
        Self::new(Role::Response, max_line, max_body)
    }

    /// Decoder configured from shared [`Limits`].
    #[must_use]
    pub fn with_limits(role: Role, limits: &Limits) -> Self {
        Self::new(role, limits.max_line, limits.max_body)
    }

    /// Select how body bytes are surfaced.
    #[must_use]
    pub fn with_body_mode(mut self, mode: BodyMode) -> Self {
        self.body_mode = mode;
        self
    }

    /// Expect a PROXY protocol preface ahead of the first request.
    ///
    /// The preface is read once per connection; its addresses are added to
    /// every later request as `X-Forwarded-For`, `X-Forwarded-Port` and,
    /// for ports 80 and 443, `X-Forwarded-Proto`. Ignored for responses.
    #[must_use]
    pub fn with_proxy_protocol(mut self, mode: ProxyProtocol) -> Self {
        self.proxy_protocol = mode;
        if self.role == Role::Request && mode != ProxyProtocol::Disabled {
            self.state = DecodeState::ConnectionOpen;
        }
        self
    }

    /// Preface read at the start of the connection, if any.
    #[must_use]
    pub fn proxy_preface(&self) -> Option<&ProxyPreface> { self.preface.as_ref() }

    /// Mark the next response as answering a `HEAD` request, which never
    /// carries a body regardless of its headers.
    pub fn expect_no_body(&mut self, no_body: bool) { self.no_body_response = no_body; }

    #[must_use]
    pub fn state(&self) -> DecodeState { self.state }

    #[must_use]
    pub fn role(&self) -> Role { self.role }

    /// Returns `true` until the first byte of a message has been consumed.
    ///
    /// A client uses this to tell a stale keep-alive connection (closed
    /// before any response byte arrived) from a genuine failure.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.state == DecodeState::ReadInitial && !self.consumed_any && !self.lines.has_partial()
    }

    /// Initial line, once parsed.
    #[must_use]
    pub fn head(&self) -> Option<&Head> { self.head.as_ref() }

    /// Headers parsed so far. Complete once the state has moved past
    /// [`DecodeState::ReadHeader`].
    #[must_use]
    pub fn headers(&self) -> &Headers { &self.headers }

    /// Whether the peer waits for `100 Continue` before sending the body.
    #[must_use]
    pub fn expects_continue(&self) -> bool {
        self.role == Role::Request
            && self.state.in_body()
            && self
                .head
                .as_ref()
                .is_some_and(|head| message::expects_continue(head.version(), &self.headers))
    }

    /// Returns `true` if the body is delimited by connection close, which
    /// rules out reusing the connection afterwards.
    #[must_use]
    pub fn reads_until_close(&self) -> bool {
        self.role == Role::Response
            && self.head.is_some()
            && !self.headers.is_chunked()
            && !self.headers.contains(headers::CONTENT_LENGTH)
            && !self.response_has_no_body()
    }

    /// Consume bytes from `src`, returning the state reached.
    ///
    /// Stops as soon as a message completes, leaving any following bytes in
    /// `src` for the next message.
    ///
    /// # Errors
    ///
    /// Any error moves the decoder into [`DecodeState::ProtocolError`];
    /// further calls fail with [`ProtocolError::Poisoned`].
    pub fn decode<B: Buf>(&mut self, src: &mut B) -> Result<DecodeState, DecodeError> {
        if self.state == DecodeState::ProtocolError {
            return Err(ProtocolError::Poisoned.into());
        }
        match self.advance(src) {
            Ok(state) => Ok(state),
            Err(err) => {
                self.state = DecodeState::ProtocolError;
                Err(err)
            }
        }
    }

    /// Signal end of input.
    ///
    /// A body read until close completes here. A decoder that has seen no
    /// bytes of a new message stays in [`DecodeState::ReadInitial`].
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnexpectedEof`] if a message was cut short.
    pub fn decode_eof(&mut self) -> Result<DecodeState, DecodeError> {
        match self.state {
            DecodeState::ReadVariableLengthContent => {
                self.state = DecodeState::AllRead;
                Ok(self.state)
            }
            DecodeState::AllRead => Ok(self.state),
            DecodeState::ConnectionOpen | DecodeState::ReadInitial if !self.lines.has_partial() => {
                Ok(self.state)
            }
            state => {
                self.state = DecodeState::ProtocolError;
                Err(DecodeError::UnexpectedEof { state })
            }
        }
    }

    /// Body bytes decoded since the last call, in [`BodyMode::Stream`] mode.
    pub fn take_body_chunk(&mut self) -> Option<Bytes> {
        if self.body.is_empty() {
            None
        } else {
            Some(self.body.split().freeze())
        }
    }

    /// Take the completed message. Returns `None` unless the state is
    /// [`DecodeState::AllRead`].
    pub fn take_message(&mut self) -> Option<Message> {
        if self.state != DecodeState::AllRead {
            return None;
        }
        let head = self.head.take()?;
        let headers = mem::take(&mut self.headers);
        let body = self.body.split().freeze();
        Some(Message::new(head, headers, body))
    }

    /// Prepare for the next message on the same connection.
    pub fn reset(&mut self) {
        self.state = DecodeState::ReadInitial;
        self.lines.reset();
        self.head = None;
        self.headers.clear();
        self.body.clear();
        self.body_read = 0;
        self.body_remaining = 0;
        self.consumed_any = false;
        self.no_body_response = false;
    }

    fn advance<B: Buf>(&mut self, src: &mut B) -> Result<DecodeState, DecodeError> {
        while src.has_remaining() && self.state != DecodeState::AllRead {
            self.consumed_any = true;
            match self.state {
                DecodeState::ConnectionOpen => {
                    if let Some(line) = self.lines.read_line(src)?
                        && !line.is_empty()
                    {
                        self.read_preface(&line)?;
                    }
                }
                DecodeState::ReadInitial => {
                    if let Some(line) = self.lines.read_line(src)? {
                        // Tolerate stray CRLF between pipelined messages.
                        if !line.is_empty() {
                            self.head = Some(self.parse_initial_line(&line)?);
                            self.state = DecodeState::ReadHeader;
                        }
                    }
                }
                DecodeState::ReadHeader => self.read_headers(src)?,
                DecodeState::ReadFixedLengthContent => {
                    self.read_body(src);
                    if self.body_remaining == 0 {
                        self.state = DecodeState::AllRead;
                    }
                }
                DecodeState::ReadChunkSize => {
                    if let Some(line) = self.lines.read_line(src)?
                        && !line.is_empty()
                    {
                        self.start_chunk(&line)?;
                    }
                }
                DecodeState::ReadChunkedContent => {
                    self.read_body(src);
                    if self.body_remaining == 0 {
                        self.state = DecodeState::ReadChunkDelimiter;
                    }
                }
                DecodeState::ReadChunkDelimiter => {
                    if let Some(line) = self.lines.read_line(src)? {
                        if !line.is_empty() {
                            return Err(ProtocolError::MissingChunkDelimiter.into());
                        }
                        self.state = DecodeState::ReadChunkSize;
                    }
                }
                DecodeState::ReadChunkFooter => {
                    // Trailer fields are read and dropped.
                    if let Some(line) = self.lines.read_line(src)?
                        && line.is_empty()
                    {
                        self.state = DecodeState::AllRead;
                    }
                }
                DecodeState::ReadVariableLengthContent => {
                    let available = src.remaining() as u64;
                    self.check_body_limit(available)?;
                    self.body_remaining = available;
                    self.read_body(src);
                }
                DecodeState::AllRead | DecodeState::ProtocolError => break,
            }
        }
        Ok(self.state)
    }

    #[cfg(test)]
    pub(crate) fn body_capacity(&self) -> usize { self.body.capacity() }

    fn read_preface(&mut self, line: &[u8]) -> Result<(), DecodeError> {
        if line.starts_with(b"PROXY ") {
            let text = String::from_utf8_lossy(line);
            let preface = ProxyPreface::parse(&text).ok_or_else(|| {
                ProtocolError::MalformedProxyHeader {
                    line: text.to_string(),
                }
            })?;
            self.preface = Some(preface);
            self.state = DecodeState::ReadInitial;
            return Ok(());
        }
        if self.proxy_protocol == ProxyProtocol::Optional {
            self.head = Some(self.parse_initial_line(line)?);
            self.state = DecodeState::ReadHeader;
            return Ok(());
        }
        Err(ProtocolError::MissingProxyHeader {
            line: String::from_utf8_lossy(line).into_owned(),
        }
        .into())
    }

    fn parse_initial_line(&self, line: &[u8]) -> Result<Head, DecodeError> {
        let text = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidEncoding)?;
        let malformed = || ProtocolError::MalformedInitialLine { line: text.into() };
        let mut parts = text.split_ascii_whitespace();
        match self.role {
            Role::Request => {
                let (Some(method), Some(target), Some(version), None) =
                    (parts.next(), parts.next(), parts.next(), parts.next())
                else {
                    return Err(malformed().into());
                };
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| ProtocolError::InvalidMethod {
                        method: method.into(),
                    })?;
                Ok(Head::Request(RequestHead {
                    method,
                    target: target.into(),
                    version: parse_version(version),
                }))
            }
            Role::Response => {
                let (Some(version), Some(status)) = (parts.next(), parts.next()) else {
                    return Err(malformed().into());
                };
                let status_code = StatusCode::from_bytes(status.as_bytes()).map_err(|_| {
                    ProtocolError::InvalidStatus {
                        status: status.into(),
                    }
                })?;
                let reason = text
                    .trim_start()
                    .splitn(3, ' ')
                    .nth(2)
                    .unwrap_or_default()
                    .trim()
                    .to_owned();
                Ok(Head::Response(ResponseHead {
                    version: parse_version(version),
                    status: status_code,
                    reason,
                }))
            }
        }
    }

    fn read_headers<B: Buf>(&mut self, src: &mut B) -> Result<(), DecodeError> {
        while let Some(line) = self.lines.read_line(src)? {
            if line.is_empty() {
                return self.finish_headers();
            }
            let text = String::from_utf8_lossy(&line);
            // Lines without a usable name are dropped.
            if let Some((name, value)) = split_header_line(&text) {
                self.headers.insert(name, value);
            }
        }
        Ok(())
    }

    fn response_has_no_body(&self) -> bool {
        match &self.head {
            Some(Head::Response(head)) => {
                self.no_body_response
                    || head.status.is_informational()
                    || head.status == StatusCode::NO_CONTENT
                    || head.status == StatusCode::NOT_MODIFIED
            }
            _ => false,
        }
    }

    fn finish_headers(&mut self) -> Result<(), DecodeError> {
        if let Some(preface) = self.preface {
            self.headers
                .insert(headers::X_FORWARDED_FOR, preface.client.ip().to_string());
            self.headers
                .insert(headers::X_FORWARDED_PORT, preface.proxy.port().to_string());
            if let Some(proto) = preface.forwarded_proto() {
                self.headers.insert(headers::X_FORWARDED_PROTO, proto);
            }
        }
        if self.response_has_no_body() {
            self.state = DecodeState::AllRead;
            return Ok(());
        }
        // Transfer-Encoding takes precedence over Content-Length.
        if self.headers.is_chunked() {
            self.state = DecodeState::ReadChunkSize;
            return Ok(());
        }
        if let Some(value) = self.headers.get(headers::CONTENT_LENGTH) {
            let length: u64 =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::InvalidContentLength {
                        value: value.into(),
                    })?;
            if length == 0 {
                self.state = DecodeState::AllRead;
                return Ok(());
            }
            self.check_body_limit(length)?;
            if self.body_mode == BodyMode::Accumulate {
                // Bounded by max_body above.
                self.body.reserve(usize::try_from(length).unwrap_or(self.max_body));
            }
            self.body_remaining = length;
            self.state = DecodeState::ReadFixedLengthContent;
            return Ok(());
        }
        self.state = match self.role {
            Role::Request => DecodeState::AllRead,
            Role::Response => DecodeState::ReadVariableLengthContent,
        };
        Ok(())
    }

    fn start_chunk(&mut self, line: &[u8]) -> Result<(), DecodeError> {
        let size = parse_chunk_size(line)?;
        if size == 0 {
            self.state = DecodeState::ReadChunkFooter;
            return Ok(());
        }
        self.check_body_limit(size)?;
        self.body_remaining = size;
        self.state = DecodeState::ReadChunkedContent;
        Ok(())
    }

    fn check_body_limit(&self, additional: u64) -> Result<(), DecodeError> {
        let attempted = self.body_read.saturating_add(additional);
        if attempted > self.max_body as u64 {
            return Err(DecodeError::BodyTooLarge {
                attempted,
                max: self.max_body,
            });
        }
        Ok(())
    }

    fn read_body<B: Buf>(&mut self, src: &mut B) {
        let mut wanted = usize::try_from(self.body_remaining)
            .unwrap_or(usize::MAX)
            .min(src.remaining());
        let taken = wanted as u64;
        while wanted > 0 {
            let chunk = src.chunk();
            let n = chunk.len().min(wanted);
            self.body.extend_from_slice(&chunk[..n]);
            src.advance(n);
            wanted -= n;
        }
        self.body_read += taken;
        self.body_remaining -= taken;
    }
}

fn parse_version(token: &str) -> Version {
    if token.eq_ignore_ascii_case("HTTP/1.0") {
        Version::HTTP_10
    } else {
        Version::HTTP_11
    }
}

/// Parse a chunk-size line: hex digits, optionally followed by `;`
/// extensions or whitespace.
fn parse_chunk_size(line: &[u8]) -> Result<u64, DecodeError> {
    let invalid = || ProtocolError::InvalidChunkSize {
        value: String::from_utf8_lossy(line).into_owned(),
    };
    let text = std::str::from_utf8(line).map_err(|_| invalid())?.trim();
    let end = text
        .find(|c: char| c == ';' || c.is_whitespace() || c.is_control())
        .unwrap_or(text.len());
    let digits = &text[..end];
    if digits.is_empty() {
        return Err(invalid().into());
    }
    u64::from_str_radix(digits, 16).map_err(|_| invalid().into())
}

impl Decoder for MessageDecoder {
    type Item = Message;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, DecodeError> {
        if self.state == DecodeState::AllRead {
            self.reset();
        }
        match MessageDecoder::decode(self, src)? {
            DecodeState::AllRead => Ok(self.take_message()),
            _ => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, DecodeError> {
        if let Some(message) = Decoder::decode(self, src)? {
            return Ok(Some(message));
        }
        match MessageDecoder::decode_eof(self)? {
            DecodeState::AllRead => Ok(self.take_message()),
            _ => Ok(None),
        }
    }
}
