//! Typed feature surface over a live environment.

use std::net::IpAddr;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::cancellation::CancellationToken;
use crate::environment::Environment;
use crate::error::{Error, FeatureError};
use crate::feature::{
    ConnectionFeature, EnvironmentFeature, FeatureCollection, FeatureKind, FeatureProvider,
    RequestFeature, ResponseFeature, SendFileFeature, TlsFeature,
};
use crate::keys;
use crate::value::{
    Body, CallbackState, ClientCertificate, FromValue, Headers, OnSendingHeadersFn,
    SendFileFn, SendFileFuture, SendingHeadersCallback, Value,
};

/// Projects one [`Environment`] as every typed feature group at once.
///
/// The adapter holds nothing but the environment handle. Each getter reads
/// the map and each setter writes it, so values written on one side of the
/// bridge are immediately visible on the other. Absent or mistyped entries
/// read as the type's default.
///
/// The adapter is also its own read-only [`FeatureCollection`]: every group
/// it serves resolves to the adapter itself. Send-file and TLS are only
/// listed while the environment supplies what they need.
///
/// One adapter is built per request and dropped with it.
///
/// # Examples
///
/// ```
/// use owin_bridge::{keys, Environment, FeatureAdapter, FeatureCollection, FeatureKind};
///
/// let env = Environment::new();
/// env.insert(keys::REQUEST_SCHEME, "https");
///
/// let adapter = FeatureAdapter::new(env.clone());
/// assert!(!adapter.contains_key(FeatureKind::Tls));
///
/// env.insert(keys::CLIENT_CERTIFICATE, owin_bridge::ClientCertificate::new(vec![0x30]));
/// assert!(adapter.contains_key(FeatureKind::Tls));
/// ```
#[derive(Debug, Clone)]
pub struct FeatureAdapter {
    env: Environment,
}

impl FeatureAdapter {
    /// Wraps `env`.
    pub fn new(env: Environment) -> Self {
        Self { env }
    }

    /// The wrapped environment.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    fn prop<T: FromValue>(&self, key: &str) -> Option<T> {
        self.env.get_as(key)
    }

    fn string(&self, key: &str) -> String {
        self.prop(key).unwrap_or_default()
    }

    fn put(&self, key: &str, value: impl Into<Value>) {
        self.env.insert(key, value);
    }

    fn ip_address(&self, key: &str) -> Option<IpAddr> {
        self.prop::<String>(key)?.parse().ok()
    }

    fn port(&self, key: &str) -> u16 {
        self.prop::<String>(key)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    /// Whether the environment carries a send-file delegate.
    pub fn supports_send_file(&self) -> bool {
        self.env.has_non_null(keys::SEND_FILE_ASYNC)
    }

    /// Whether the request is TLS and a client certificate or a loader for
    /// one is available.
    pub fn supports_client_certificate(&self) -> bool {
        self.string(keys::REQUEST_SCHEME).eq_ignore_ascii_case("https")
            && (self.env.has_non_null(keys::LOAD_CLIENT_CERT_ASYNC)
                || self.env.has_non_null(keys::CLIENT_CERTIFICATE))
    }
}

impl RequestFeature for FeatureAdapter {
    fn protocol(&self) -> String {
        self.string(keys::REQUEST_PROTOCOL)
    }

    fn set_protocol(&self, value: &str) {
        self.put(keys::REQUEST_PROTOCOL, value);
    }

    fn scheme(&self) -> String {
        self.string(keys::REQUEST_SCHEME)
    }

    fn set_scheme(&self, value: &str) {
        self.put(keys::REQUEST_SCHEME, value);
    }

    fn method(&self) -> String {
        self.string(keys::REQUEST_METHOD)
    }

    fn set_method(&self, value: &str) {
        self.put(keys::REQUEST_METHOD, value);
    }

    fn path_base(&self) -> String {
        self.string(keys::REQUEST_PATH_BASE)
    }

    fn set_path_base(&self, value: &str) {
        self.put(keys::REQUEST_PATH_BASE, value);
    }

    fn path(&self) -> String {
        self.string(keys::REQUEST_PATH)
    }

    fn set_path(&self, value: &str) {
        self.put(keys::REQUEST_PATH, value);
    }

    fn query_string(&self) -> String {
        self.string(keys::REQUEST_QUERY_STRING)
    }

    fn set_query_string(&self, value: &str) {
        self.put(keys::REQUEST_QUERY_STRING, value);
    }

    fn headers(&self) -> Option<Headers> {
        self.prop(keys::REQUEST_HEADERS)
    }

    fn set_headers(&self, headers: Headers) {
        self.put(keys::REQUEST_HEADERS, headers);
    }

    fn body(&self) -> Option<Body> {
        self.prop(keys::REQUEST_BODY)
    }

    fn set_body(&self, body: Body) {
        self.put(keys::REQUEST_BODY, body);
    }
}

impl ResponseFeature for FeatureAdapter {
    /// Reads `owin.ResponseStatusCode`. A stored integer outside `0..=65535`
    /// reads as `0`, like an absent one.
    fn status_code(&self) -> u16 {
        self.prop::<i64>(keys::RESPONSE_STATUS_CODE)
            .and_then(|code| u16::try_from(code).ok())
            .unwrap_or_default()
    }

    fn set_status_code(&self, value: u16) {
        self.put(keys::RESPONSE_STATUS_CODE, i64::from(value));
    }

    fn reason_phrase(&self) -> String {
        self.string(keys::RESPONSE_REASON_PHRASE)
    }

    fn set_reason_phrase(&self, value: &str) {
        self.put(keys::RESPONSE_REASON_PHRASE, value);
    }

    fn headers(&self) -> Option<Headers> {
        self.prop(keys::RESPONSE_HEADERS)
    }

    fn set_headers(&self, headers: Headers) {
        self.put(keys::RESPONSE_HEADERS, headers);
    }

    fn body(&self) -> Option<Body> {
        self.prop(keys::RESPONSE_BODY)
    }

    fn set_body(&self, body: Body) {
        self.put(keys::RESPONSE_BODY, body);
    }

    fn on_sending_headers(
        &self,
        callback: SendingHeadersCallback,
        state: CallbackState,
    ) -> Result<(), Error> {
        let register: OnSendingHeadersFn = self
            .prop(keys::ON_SENDING_HEADERS)
            .ok_or_else(|| FeatureError::unsupported(keys::ON_SENDING_HEADERS))?;
        register(callback, state)
    }
}

impl ConnectionFeature for FeatureAdapter {
    fn remote_ip_address(&self) -> Option<IpAddr> {
        self.ip_address(keys::REMOTE_IP_ADDRESS)
    }

    fn set_remote_ip_address(&self, addr: IpAddr) {
        self.put(keys::REMOTE_IP_ADDRESS, addr.to_string());
    }

    fn local_ip_address(&self) -> Option<IpAddr> {
        self.ip_address(keys::LOCAL_IP_ADDRESS)
    }

    fn set_local_ip_address(&self, addr: IpAddr) {
        self.put(keys::LOCAL_IP_ADDRESS, addr.to_string());
    }

    /// Parses `server.RemotePort`. A string that is not a decimal `u16`
    /// (`"70000"`, `"-1"`, `"http"`) reads as `0`.
    fn remote_port(&self) -> u16 {
        self.port(keys::REMOTE_PORT)
    }

    fn set_remote_port(&self, port: u16) {
        self.put(keys::REMOTE_PORT, port.to_string());
    }

    /// Parses `server.LocalPort`, with the same narrowing as `remote_port`.
    fn local_port(&self) -> u16 {
        self.port(keys::LOCAL_PORT)
    }

    fn set_local_port(&self, port: u16) {
        self.put(keys::LOCAL_PORT, port.to_string());
    }

    fn is_local(&self) -> bool {
        self.prop(keys::IS_LOCAL).unwrap_or_default()
    }

    fn set_is_local(&self, value: bool) {
        self.put(keys::IS_LOCAL, value);
    }
}

impl SendFileFeature for FeatureAdapter {
    fn send_file(
        &self,
        path: &str,
        offset: u64,
        length: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<SendFileFuture, FeatureError> {
        let send: SendFileFn = self
            .prop(keys::SEND_FILE_ASYNC)
            .ok_or_else(|| FeatureError::unsupported(keys::SEND_FILE_ASYNC))?;
        Ok(send(path.to_string(), offset, length, cancel))
    }
}

impl TlsFeature for FeatureAdapter {
    fn client_certificate(&self) -> Option<ClientCertificate> {
        self.prop(keys::CLIENT_CERTIFICATE)
    }

    fn set_client_certificate(&self, cert: ClientCertificate) {
        self.put(keys::CLIENT_CERTIFICATE, cert);
    }

    fn load_client_certificate(&self) -> Result<BoxFuture<'static, Result<(), Error>>, FeatureError> {
        Err(FeatureError::not_implemented("load_client_certificate"))
    }
}

impl EnvironmentFeature for FeatureAdapter {
    fn environment(&self) -> Environment {
        self.env.clone()
    }
}

impl FeatureProvider for FeatureAdapter {
    fn as_request(&self) -> Option<&dyn RequestFeature> {
        Some(self)
    }

    fn as_response(&self) -> Option<&dyn ResponseFeature> {
        Some(self)
    }

    fn as_connection(&self) -> Option<&dyn ConnectionFeature> {
        Some(self)
    }

    fn as_send_file(&self) -> Option<&dyn SendFileFeature> {
        Some(self)
    }

    fn as_tls(&self) -> Option<&dyn TlsFeature> {
        Some(self)
    }

    fn as_environment(&self) -> Option<&dyn EnvironmentFeature> {
        Some(self)
    }

    /// Any provider over the same environment is the same view.
    fn same_provider(&self, other: &dyn FeatureProvider) -> bool {
        std::ptr::addr_eq(self, other)
            || other
                .as_environment()
                .is_some_and(|feature| feature.environment().ptr_eq(&self.env))
    }
}

impl FeatureCollection for FeatureAdapter {
    fn try_get(&self, kind: FeatureKind) -> Option<&dyn FeatureProvider> {
        let supported = match kind {
            FeatureKind::SendFile => self.supports_send_file(),
            FeatureKind::Tls => self.supports_client_certificate(),
            _ => true,
        };
        if supported && self.provides(kind) {
            Some(self)
        } else {
            None
        }
    }

    fn keys(&self) -> Vec<FeatureKind> {
        FeatureKind::ALL
            .into_iter()
            .filter(|kind| self.try_get(*kind).is_some())
            .collect()
    }

    fn insert(
        &mut self,
        kind: FeatureKind,
        _provider: Arc<dyn FeatureProvider>,
    ) -> Result<(), FeatureError> {
        Err(read_only("insert", kind))
    }

    fn set(
        &mut self,
        kind: FeatureKind,
        _provider: Arc<dyn FeatureProvider>,
    ) -> Result<(), FeatureError> {
        Err(read_only("set", kind))
    }

    fn remove(&mut self, kind: FeatureKind) -> Result<bool, FeatureError> {
        Err(read_only("remove", kind))
    }

    fn clear(&mut self) -> Result<(), FeatureError> {
        Err(FeatureError::unsupported(
            "clear: environment feature registry is read-only",
        ))
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn revision(&self) -> u64 {
        0
    }
}

fn read_only(op: &str, kind: FeatureKind) -> FeatureError {
    FeatureError::unsupported(format!(
        "{} {}: environment feature registry is read-only",
        op, kind
    ))
}
