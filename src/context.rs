use std::fmt;
use std::sync::Arc;

use crate::environment::Environment;
use crate::error::FeatureError;
use crate::feature::{
    ConnectionFeature, FeatureCollection, FeatureKind, FeatureProvider, RequestFeature,
    ResponseFeature, SendFileFeature, TlsFeature,
};

/// Typed per-request context.
///
/// `HttpContext` owns nothing but its feature registry. Every capability is
/// discovered through it, so the same context type serves a native host
/// and a context synthesized over an [`Environment`].
///
/// The registry is frozen once the context is built; cloning the context
/// shares it.
///
/// # Examples
///
/// ```
/// use owin_bridge::{keys, Environment, FeatureAdapter, FeatureErrorKind, HttpContext};
///
/// let env = Environment::new();
/// env.insert(keys::REQUEST_METHOD, "POST");
///
/// let ctx = HttpContext::new(FeatureAdapter::new(env));
/// assert_eq!(ctx.request().unwrap().method(), "POST");
///
/// // No send-file delegate in the environment, so no send-file feature.
/// let err = ctx.send_file().err().unwrap();
/// assert_eq!(err.kind, FeatureErrorKind::KeyNotFound);
/// ```
#[derive(Clone)]
pub struct HttpContext {
    features: Arc<dyn FeatureCollection>,
}

impl HttpContext {
    /// Creates a context over `features`.
    pub fn new(features: impl FeatureCollection + 'static) -> Self {
        Self {
            features: Arc::new(features),
        }
    }

    /// The feature registry.
    pub fn features(&self) -> &dyn FeatureCollection {
        self.features.as_ref()
    }

    /// Resolves `kind`, or `None` if unsupported.
    pub fn feature(&self, kind: FeatureKind) -> Option<&dyn FeatureProvider> {
        self.features.try_get(kind)
    }

    /// Returns the request feature.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the registry has no request feature.
    pub fn request(&self) -> Result<&dyn RequestFeature, FeatureError> {
        self.resolve(FeatureKind::Request, |p| p.as_request())
    }

    /// Returns the response feature.
    pub fn response(&self) -> Result<&dyn ResponseFeature, FeatureError> {
        self.resolve(FeatureKind::Response, |p| p.as_response())
    }

    /// Returns the connection feature.
    pub fn connection(&self) -> Result<&dyn ConnectionFeature, FeatureError> {
        self.resolve(FeatureKind::Connection, |p| p.as_connection())
    }

    /// Returns the send-file feature.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` when the host cannot send files for this
    /// request.
    pub fn send_file(&self) -> Result<&dyn SendFileFeature, FeatureError> {
        self.resolve(FeatureKind::SendFile, |p| p.as_send_file())
    }

    /// Returns the TLS feature.
    pub fn tls(&self) -> Result<&dyn TlsFeature, FeatureError> {
        self.resolve(FeatureKind::Tls, |p| p.as_tls())
    }

    /// Returns the environment backing this context.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the context was not built over an
    /// environment.
    pub fn environment(&self) -> Result<Environment, FeatureError> {
        self.resolve(FeatureKind::Environment, |p| p.as_environment())
            .map(|f| f.environment())
    }

    /// Returns whether both handles share one registry.
    pub fn ptr_eq(&self, other: &HttpContext) -> bool {
        Arc::ptr_eq(&self.features, &other.features)
    }

    fn resolve<'a, T: ?Sized + 'a>(
        &'a self,
        kind: FeatureKind,
        project: impl FnOnce(&'a dyn FeatureProvider) -> Option<&'a T>,
    ) -> Result<&'a T, FeatureError> {
        let provider = self.features.get(kind)?;
        project(provider).ok_or_else(|| FeatureError::key_not_found(kind.name()))
    }
}

impl fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContext")
            .field("features", &self.features)
            .finish()
    }
}
