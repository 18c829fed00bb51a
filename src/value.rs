//! Typed values stored in an [`Environment`](crate::Environment).
//!
//! The environment is untyped from the point of view of the middleware that
//! share it, so every entry is a [`Value`] variant. Readers go through
//! [`FromValue`], which accepts exactly one variant per target type and
//! treats anything else as "not present".

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::io::{AsyncRead, AsyncWrite};
use futures::FutureExt;

use crate::cancellation::CancellationToken;
use crate::error::Error;

/// Opaque state handed back to an on-sending-headers callback.
pub type CallbackState = Option<Arc<dyn Any + Send + Sync>>;

/// Callback run just before response headers are sent.
pub type SendingHeadersCallback = Box<dyn FnOnce(CallbackState) + Send>;

/// Host delegate that registers an on-sending-headers callback.
pub type OnSendingHeadersFn =
    Arc<dyn Fn(SendingHeadersCallback, CallbackState) -> Result<(), Error> + Send + Sync>;

/// Completion signal of a send-file transfer.
pub type SendFileFuture = BoxFuture<'static, Result<(), Error>>;

/// Host delegate that transfers `(path, offset, length)` of a file.
pub type SendFileFn =
    Arc<dyn Fn(String, u64, Option<u64>, CancellationToken) -> SendFileFuture + Send + Sync>;

/// Host delegate that loads the client certificate on demand.
pub type LoadClientCertFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// One entry of an environment.
#[derive(Clone)]
pub enum Value {
    /// Key present, value null
    Null,
    /// Text value
    Str(String),
    /// Integer value
    Int(i64),
    /// Boolean value
    Bool(bool),
    /// Header collection
    Headers(Headers),
    /// Body stream
    Body(Body),
    /// TLS client certificate
    ClientCertificate(ClientCertificate),
    /// On-sending-headers registrar
    OnSendingHeaders(OnSendingHeadersFn),
    /// Send-file delegate
    SendFile(SendFileFn),
    /// Client certificate loader
    LoadClientCertificate(LoadClientCertFn),
    /// Anything else middleware chooses to share
    Other(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Wraps a closure as an on-sending-headers registrar.
    pub fn on_sending_headers<F>(f: F) -> Self
    where
        F: Fn(SendingHeadersCallback, CallbackState) -> Result<(), Error> + Send + Sync + 'static,
    {
        Value::OnSendingHeaders(Arc::new(f))
    }

    /// Wraps an async closure as a send-file delegate.
    pub fn send_file<F, Fut>(f: F) -> Self
    where
        F: Fn(String, u64, Option<u64>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Value::SendFile(Arc::new(move |path, offset, length, cancel| {
            f(path, offset, length, cancel).boxed()
        }))
    }

    /// Wraps an async closure as a client certificate loader.
    pub fn load_client_certificate<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Value::LoadClientCertificate(Arc::new(move || f().boxed()))
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Str(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Headers(_) => "headers",
            Value::Body(_) => "body",
            Value::ClientCertificate(_) => "client_certificate",
            Value::OnSendingHeaders(_) => "on_sending_headers",
            Value::SendFile(_) => "send_file",
            Value::LoadClientCertificate(_) => "load_client_certificate",
            Value::Other(_) => "other",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Headers(h) => f.debug_tuple("Headers").field(h).finish(),
            Value::Body(b) => f.debug_tuple("Body").field(b).finish(),
            Value::ClientCertificate(c) => f.debug_tuple("ClientCertificate").field(c).finish(),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Headers> for Value {
    fn from(h: Headers) -> Self {
        Value::Headers(h)
    }
}

impl From<Body> for Value {
    fn from(b: Body) -> Self {
        Value::Body(b)
    }
}

impl From<ClientCertificate> for Value {
    fn from(c: ClientCertificate) -> Self {
        Value::ClientCertificate(c)
    }
}

/// Reads a typed value out of an environment entry.
///
/// Returns `None` unless the entry holds the one variant `Self` expects.
/// Callers substitute the type's default for `None`; a wrong variant is
/// never an error.
pub trait FromValue: Sized {
    /// Extracts `Self` from `value`, or `None` on a variant mismatch.
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! from_value {
    ($ty:ty, $variant:ident) => {
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

from_value!(String, Str);
from_value!(i64, Int);
from_value!(bool, Bool);
from_value!(Headers, Headers);
from_value!(Body, Body);
from_value!(ClientCertificate, ClientCertificate);
from_value!(OnSendingHeadersFn, OnSendingHeaders);
from_value!(SendFileFn, SendFile);
from_value!(LoadClientCertFn, LoadClientCertificate);

/// Shared, mutable header collection.
///
/// Cloning yields another reference to the same collection, so a header
/// added through one clone is visible through all of them. Names compare
/// ASCII case-insensitively; insertion order is kept.
#[derive(Clone, Default)]
pub struct Headers {
    entries: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl Headers {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, Vec<String>)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the values stored under `name`.
    pub fn get(&self, name: &str) -> Option<Vec<String>> {
        self.lock()
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    /// Returns the first value stored under `name`.
    pub fn get_first(&self, name: &str) -> Option<String> {
        self.get(name).and_then(|v| v.into_iter().next())
    }

    /// Replaces the values stored under `name`.
    pub fn insert(&self, name: impl Into<String>, values: Vec<String>) -> Option<Vec<String>> {
        let name = name.into();
        let mut entries = self.lock();
        match entries.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => Some(std::mem::replace(existing, values)),
            None => {
                entries.push((name, values));
                None
            }
        }
    }

    /// Appends one value under `name`.
    pub fn append(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let mut entries = self.lock();
        match entries.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => existing.push(value.into()),
            None => entries.push((name, vec![value.into()])),
        }
    }

    /// Removes `name`, returning its values.
    pub fn remove(&self, name: &str) -> Option<Vec<String>> {
        let mut entries = self.lock();
        let idx = entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(entries.remove(idx).1)
    }

    /// Returns whether `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.lock().iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no headers are present.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of all entries, in insertion order.
    pub fn entries(&self) -> Vec<(String, Vec<String>)> {
        self.lock().clone()
    }

    /// Returns whether both handles refer to the same collection.
    pub fn ptr_eq(&self, other: &Headers) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.entries() == other.entries()
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

/// A byte stream that can be both read and written.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// The stream behind a [`Body`].
///
/// Request bodies are usually read-only and response bodies write-only.
/// Using a direction the stream lacks fails with
/// [`io::ErrorKind::Unsupported`]. Flushing or closing a read-only stream
/// succeeds and does nothing.
pub enum BodyStream {
    /// Read-only stream
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// Write-only stream
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
    /// Readable and writable stream
    Duplex(Box<dyn ByteStream>),
}

impl BodyStream {
    /// Whether reads are supported.
    pub fn is_readable(&self) -> bool {
        !matches!(self, BodyStream::Writer(_))
    }

    /// Whether writes are supported.
    pub fn is_writable(&self) -> bool {
        !matches!(self, BodyStream::Reader(_))
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("body stream is not {}", what))
}

impl AsyncRead for BodyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BodyStream::Reader(r) => Pin::new(r).poll_read(cx, buf),
            BodyStream::Duplex(s) => Pin::new(s).poll_read(cx, buf),
            BodyStream::Writer(_) => Poll::Ready(Err(unsupported("readable"))),
        }
    }
}

impl AsyncWrite for BodyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BodyStream::Writer(w) => Pin::new(w).poll_write(cx, buf),
            BodyStream::Duplex(s) => Pin::new(s).poll_write(cx, buf),
            BodyStream::Reader(_) => Poll::Ready(Err(unsupported("writable"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BodyStream::Writer(w) => Pin::new(w).poll_flush(cx),
            BodyStream::Duplex(s) => Pin::new(s).poll_flush(cx),
            BodyStream::Reader(_) => Poll::Ready(Ok(())),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BodyStream::Writer(w) => Pin::new(w).poll_close(cx),
            BodyStream::Duplex(s) => Pin::new(s).poll_close(cx),
            BodyStream::Reader(_) => Poll::Ready(Ok(())),
        }
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BodyStream::Reader(_) => "Reader",
            BodyStream::Writer(_) => "Writer",
            BodyStream::Duplex(_) => "Duplex",
        })
    }
}

/// Shared reference to a body stream.
///
/// The bridge passes bodies through untouched; it never reads, buffers or
/// rewrites them.
#[derive(Clone)]
pub struct Body {
    stream: Arc<futures::lock::Mutex<BodyStream>>,
}

impl Body {
    /// Wraps a readable and writable stream.
    pub fn new(stream: impl ByteStream + 'static) -> Self {
        Self::from_stream(BodyStream::Duplex(Box::new(stream)))
    }

    /// Wraps a read-only stream, such as a request body.
    pub fn reader(stream: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::from_stream(BodyStream::Reader(Box::new(stream)))
    }

    /// Wraps a write-only stream, such as a response body.
    pub fn writer(stream: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self::from_stream(BodyStream::Writer(Box::new(stream)))
    }

    /// Wraps an already classified stream.
    pub fn from_stream(stream: BodyStream) -> Self {
        Self {
            stream: Arc::new(futures::lock::Mutex::new(stream)),
        }
    }

    /// An in-memory body holding `bytes`.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(futures::io::Cursor::new(bytes.into()))
    }

    /// Waits for exclusive access to the stream.
    pub async fn lock(&self) -> futures::lock::MutexGuard<'_, BodyStream> {
        self.stream.lock().await
    }

    /// Returns whether both handles refer to the same stream.
    pub fn ptr_eq(&self, other: &Body) -> bool {
        Arc::ptr_eq(&self.stream, &other.stream)
    }
}

impl PartialEq for Body {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Body({:p})", Arc::as_ptr(&self.stream))
    }
}

/// DER-encoded client certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    der: Bytes,
}

impl ClientCertificate {
    /// Wraps DER bytes.
    pub fn new(der: impl Into<Bytes>) -> Self {
        Self { der: der.into() }
    }

    /// Raw DER bytes.
    pub fn der(&self) -> &Bytes {
        &self.der
    }
}
