//! Typed feature groups and the registry that discovers them.
//!
//! A typed context never knows its capabilities up front. It asks its
//! [`FeatureCollection`] for a [`FeatureKind`] and receives a
//! [`FeatureProvider`], whose accessors expose the concrete feature trait.
//! One provider may serve several groups at once.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::cancellation::CancellationToken;
use crate::environment::Environment;
use crate::error::{Error, FeatureError, FeatureErrorKind};
use crate::value::{
    Body, CallbackState, ClientCertificate, Headers, SendFileFuture, SendingHeadersCallback,
};

/// Identifier of a feature group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureKind {
    /// Request line, headers and body
    Request,
    /// Response line, headers and body
    Response,
    /// Connection addresses and ports
    Connection,
    /// Zero-copy file transfer
    SendFile,
    /// TLS client certificate
    Tls,
    /// Pass-through access to the backing environment
    Environment,
}

impl FeatureKind {
    /// Every feature group, in declaration order.
    pub const ALL: [FeatureKind; 6] = [
        FeatureKind::Request,
        FeatureKind::Response,
        FeatureKind::Connection,
        FeatureKind::SendFile,
        FeatureKind::Tls,
        FeatureKind::Environment,
    ];

    /// Stable name of the group.
    pub fn name(self) -> &'static str {
        match self {
            FeatureKind::Request => "HttpRequestFeature",
            FeatureKind::Response => "HttpResponseFeature",
            FeatureKind::Connection => "HttpConnectionFeature",
            FeatureKind::SendFile => "HttpSendFileFeature",
            FeatureKind::Tls => "HttpTransportLayerSecurityFeature",
            FeatureKind::Environment => "OwinEnvironmentFeature",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Request line, headers and body.
///
/// Setters take `&self`: providers write through to shared storage.
pub trait RequestFeature: Send + Sync {
    /// Protocol, e.g. `HTTP/1.1`.
    fn protocol(&self) -> String;
    /// Sets the protocol.
    fn set_protocol(&self, value: &str);
    /// Scheme, e.g. `https`.
    fn scheme(&self) -> String;
    /// Sets the scheme.
    fn set_scheme(&self, value: &str);
    /// Method.
    fn method(&self) -> String;
    /// Sets the method.
    fn set_method(&self, value: &str);
    /// Path base.
    fn path_base(&self) -> String;
    /// Sets the path base.
    fn set_path_base(&self, value: &str);
    /// Path.
    fn path(&self) -> String;
    /// Sets the path.
    fn set_path(&self, value: &str);
    /// Query string.
    fn query_string(&self) -> String;
    /// Sets the query string.
    fn set_query_string(&self, value: &str);
    /// Request headers.
    fn headers(&self) -> Option<Headers>;
    /// Sets the request headers.
    fn set_headers(&self, headers: Headers);
    /// Request body.
    fn body(&self) -> Option<Body>;
    /// Sets the request body.
    fn set_body(&self, body: Body);
}

/// Response line, headers and body.
pub trait ResponseFeature: Send + Sync {
    /// Status code, or `0` when unset or not representable as `u16`.
    fn status_code(&self) -> u16;
    /// Sets the status code.
    fn set_status_code(&self, value: u16);
    /// Reason phrase.
    fn reason_phrase(&self) -> String;
    /// Sets the reason phrase.
    fn set_reason_phrase(&self, value: &str);
    /// Response headers.
    fn headers(&self) -> Option<Headers>;
    /// Sets the response headers.
    fn set_headers(&self, headers: Headers);
    /// Response body.
    fn body(&self) -> Option<Body>;
    /// Sets the response body.
    fn set_body(&self, body: Body);
    /// Registers `callback` to run with `state` just before headers are sent.
    fn on_sending_headers(
        &self,
        callback: SendingHeadersCallback,
        state: CallbackState,
    ) -> Result<(), Error>;
}

/// Connection addresses and ports.
pub trait ConnectionFeature: Send + Sync {
    /// Remote address.
    fn remote_ip_address(&self) -> Option<IpAddr>;
    /// Sets the remote address.
    fn set_remote_ip_address(&self, addr: IpAddr);
    /// Local address.
    fn local_ip_address(&self) -> Option<IpAddr>;
    /// Sets the local address.
    fn set_local_ip_address(&self, addr: IpAddr);
    /// Remote port, or `0` when unset or not representable as `u16`.
    fn remote_port(&self) -> u16;
    /// Sets the remote port.
    fn set_remote_port(&self, port: u16);
    /// Local port, or `0` when unset or not representable as `u16`.
    fn local_port(&self) -> u16;
    /// Sets the local port.
    fn set_local_port(&self, port: u16);
    /// Whether the request came from the local machine.
    fn is_local(&self) -> bool;
    /// Sets the is-local flag.
    fn set_is_local(&self, value: bool);
}

/// Zero-copy file transfer.
pub trait SendFileFeature: Send + Sync {
    /// Starts sending `length` bytes (or the rest) of `path` from `offset`.
    ///
    /// Fails immediately when the transfer cannot even be started; transfer
    /// failures surface through the returned future.
    fn send_file(
        &self,
        path: &str,
        offset: u64,
        length: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<SendFileFuture, FeatureError>;
}

/// TLS client certificate.
pub trait TlsFeature: Send + Sync {
    /// The client certificate, if one has been resolved.
    fn client_certificate(&self) -> Option<ClientCertificate>;
    /// Sets the client certificate.
    fn set_client_certificate(&self, cert: ClientCertificate);
    /// Loads the client certificate.
    fn load_client_certificate(&self) -> Result<BoxFuture<'static, Result<(), Error>>, FeatureError>;
}

/// Access to the environment backing a context.
pub trait EnvironmentFeature: Send + Sync {
    /// The backing environment.
    fn environment(&self) -> Environment;
}

/// An object that implements one or more feature groups.
///
/// Each accessor returns `Some` for the groups the provider implements.
pub trait FeatureProvider: Send + Sync {
    /// Request feature.
    fn as_request(&self) -> Option<&dyn RequestFeature> {
        None
    }
    /// Response feature.
    fn as_response(&self) -> Option<&dyn ResponseFeature> {
        None
    }
    /// Connection feature.
    fn as_connection(&self) -> Option<&dyn ConnectionFeature> {
        None
    }
    /// Send-file feature.
    fn as_send_file(&self) -> Option<&dyn SendFileFeature> {
        None
    }
    /// TLS feature.
    fn as_tls(&self) -> Option<&dyn TlsFeature> {
        None
    }
    /// Environment pass-through.
    fn as_environment(&self) -> Option<&dyn EnvironmentFeature> {
        None
    }

    /// Returns whether this provider implements `kind` at all.
    fn provides(&self, kind: FeatureKind) -> bool {
        match kind {
            FeatureKind::Request => self.as_request().is_some(),
            FeatureKind::Response => self.as_response().is_some(),
            FeatureKind::Connection => self.as_connection().is_some(),
            FeatureKind::SendFile => self.as_send_file().is_some(),
            FeatureKind::Tls => self.as_tls().is_some(),
            FeatureKind::Environment => self.as_environment().is_some(),
        }
    }

    /// Returns whether `other` is the same provider as `self`.
    ///
    /// Defaults to address equality. Providers that are views over shared
    /// state override this to compare the state instead.
    fn same_provider(&self, other: &dyn FeatureProvider) -> bool {
        std::ptr::addr_eq(self, other)
    }
}

/// Slot type accepted by [`FeatureCollection::copy_to`].
pub type FeatureEntry<'a> = (FeatureKind, &'a dyn FeatureProvider);

/// Per-request lookup table from feature group to provider.
pub trait FeatureCollection: Send + Sync + fmt::Debug {
    /// Resolves `kind`, or `None` if the group is not available.
    fn try_get(&self, kind: FeatureKind) -> Option<&dyn FeatureProvider>;

    /// Groups currently available.
    fn keys(&self) -> Vec<FeatureKind>;

    /// Adds a provider for a group not yet present.
    fn insert(
        &mut self,
        kind: FeatureKind,
        provider: Arc<dyn FeatureProvider>,
    ) -> Result<(), FeatureError>;

    /// Sets the provider for `kind`, replacing any existing one.
    fn set(
        &mut self,
        kind: FeatureKind,
        provider: Arc<dyn FeatureProvider>,
    ) -> Result<(), FeatureError>;

    /// Removes `kind`, returning whether it was present.
    fn remove(&mut self, kind: FeatureKind) -> Result<bool, FeatureError>;

    /// Removes every provider.
    fn clear(&mut self) -> Result<(), FeatureError>;

    /// Whether mutation is rejected.
    fn is_read_only(&self) -> bool;

    /// Counter bumped on every successful mutation.
    fn revision(&self) -> u64;

    /// Returns whether `kind` resolves.
    fn contains_key(&self, kind: FeatureKind) -> bool {
        self.try_get(kind).is_some()
    }

    /// Resolves `kind`, failing with `KeyNotFound` if absent.
    fn get(&self, kind: FeatureKind) -> Result<&dyn FeatureProvider, FeatureError> {
        self.try_get(kind)
            .ok_or_else(|| FeatureError::key_not_found(kind.name()))
    }

    /// Number of available groups.
    fn len(&self) -> usize {
        self.keys().len()
    }

    /// Returns `true` if no group is available.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether `kind` resolves to a provider equal to `provider`.
    ///
    /// Equality is [`FeatureProvider::same_provider`] on the resolved
    /// provider, and `provider` must itself implement `kind`.
    fn contains(&self, kind: FeatureKind, provider: &dyn FeatureProvider) -> bool {
        provider.provides(kind)
            && self
                .try_get(kind)
                .is_some_and(|resolved| resolved.same_provider(provider))
    }

    /// `(kind, provider)` for every available group.
    fn entries(&self) -> Vec<FeatureEntry<'_>> {
        self.keys()
            .into_iter()
            .filter_map(|kind| self.try_get(kind).map(|p| (kind, p)))
            .collect()
    }

    /// Writes [`entries`](Self::entries) into `dest` starting at `index`.
    fn copy_to<'a>(
        &'a self,
        dest: &mut [Option<FeatureEntry<'a>>],
        index: usize,
    ) -> Result<(), FeatureError> {
        if index > dest.len() {
            return Err(FeatureError::new(
                FeatureErrorKind::ArgumentOutOfRange,
                format!("index {} exceeds destination length {}", index, dest.len()),
            ));
        }
        let entries = self.entries();
        if entries.len() > dest.len() - index {
            return Err(FeatureError::new(
                FeatureErrorKind::Argument,
                format!(
                    "{} entries do not fit in {} remaining slots",
                    entries.len(),
                    dest.len() - index
                ),
            ));
        }
        for (slot, entry) in dest[index..].iter_mut().zip(entries) {
            *slot = Some(entry);
        }
        Ok(())
    }
}

/// Host-side feature registry.
///
/// Built up with [`FeatureMap::with`] or the mutating methods, then handed
/// to [`HttpContext::new`](crate::HttpContext::new), after which it is
/// read-only.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use owin_bridge::{Environment, FeatureAdapter, FeatureCollection, FeatureKind, FeatureMap};
///
/// let adapter = Arc::new(FeatureAdapter::new(Environment::new()));
/// let features = FeatureMap::new()
///     .with(FeatureKind::Request, adapter.clone())
///     .with(FeatureKind::Response, adapter);
///
/// assert!(features.contains_key(FeatureKind::Request));
/// assert!(!features.contains_key(FeatureKind::Tls));
/// ```
#[derive(Default, Clone)]
pub struct FeatureMap {
    providers: HashMap<FeatureKind, Arc<dyn FeatureProvider>>,
    revision: u64,
}

impl FeatureMap {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](FeatureCollection::set).
    pub fn with(mut self, kind: FeatureKind, provider: Arc<dyn FeatureProvider>) -> Self {
        self.providers.insert(kind, provider);
        self.revision += 1;
        self
    }
}

impl fmt::Debug for FeatureMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.keys();
        keys.sort();
        f.debug_struct("FeatureMap")
            .field("keys", &keys)
            .field("revision", &self.revision)
            .finish()
    }
}

impl FeatureCollection for FeatureMap {
    fn try_get(&self, kind: FeatureKind) -> Option<&dyn FeatureProvider> {
        let provider = self.providers.get(&kind)?;
        if provider.provides(kind) {
            Some(provider.as_ref())
        } else {
            None
        }
    }

    fn keys(&self) -> Vec<FeatureKind> {
        self.providers
            .iter()
            .filter(|(kind, p)| p.provides(**kind))
            .map(|(kind, _)| *kind)
            .collect()
    }

    fn insert(
        &mut self,
        kind: FeatureKind,
        provider: Arc<dyn FeatureProvider>,
    ) -> Result<(), FeatureError> {
        if self.providers.contains_key(&kind) {
            return Err(FeatureError::new(
                FeatureErrorKind::Argument,
                format!("{} is already registered", kind),
            ));
        }
        self.providers.insert(kind, provider);
        self.revision += 1;
        Ok(())
    }

    fn set(
        &mut self,
        kind: FeatureKind,
        provider: Arc<dyn FeatureProvider>,
    ) -> Result<(), FeatureError> {
        self.providers.insert(kind, provider);
        self.revision += 1;
        Ok(())
    }

    fn remove(&mut self, kind: FeatureKind) -> Result<bool, FeatureError> {
        let removed = self.providers.remove(&kind).is_some();
        if removed {
            self.revision += 1;
        }
        Ok(removed)
    }

    fn clear(&mut self) -> Result<(), FeatureError> {
        self.providers.clear();
        self.revision += 1;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}
