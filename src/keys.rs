//! Environment key vocabulary.
//!
//! Middleware on either side of the bridge must use exactly these strings to
//! interoperate.

/// Version of the environment contract, set on projected environments.
pub const OWIN_VERSION: &str = "owin.Version";

/// Request protocol, e.g. `HTTP/1.1`.
pub const REQUEST_PROTOCOL: &str = "owin.RequestProtocol";
/// Request scheme, e.g. `https`.
pub const REQUEST_SCHEME: &str = "owin.RequestScheme";
/// Request method.
pub const REQUEST_METHOD: &str = "owin.RequestMethod";
/// Portion of the path corresponding to the application root.
pub const REQUEST_PATH_BASE: &str = "owin.RequestPathBase";
/// Request path relative to the path base.
pub const REQUEST_PATH: &str = "owin.RequestPath";
/// Query string without the leading `?`.
pub const REQUEST_QUERY_STRING: &str = "owin.RequestQueryString";
/// Request header collection.
pub const REQUEST_HEADERS: &str = "owin.RequestHeaders";
/// Request body stream.
pub const REQUEST_BODY: &str = "owin.RequestBody";

/// Response status code.
pub const RESPONSE_STATUS_CODE: &str = "owin.ResponseStatusCode";
/// Response reason phrase.
pub const RESPONSE_REASON_PHRASE: &str = "owin.ResponseReasonPhrase";
/// Response header collection.
pub const RESPONSE_HEADERS: &str = "owin.ResponseHeaders";
/// Response body stream.
pub const RESPONSE_BODY: &str = "owin.ResponseBody";

/// Registrar for callbacks that run just before response headers are sent.
pub const ON_SENDING_HEADERS: &str = "server.OnSendingHeaders";
/// Remote IP address, textual form.
pub const REMOTE_IP_ADDRESS: &str = "server.RemoteIpAddress";
/// Local IP address, textual form.
pub const LOCAL_IP_ADDRESS: &str = "server.LocalIpAddress";
/// Remote port, decimal string.
pub const REMOTE_PORT: &str = "server.RemotePort";
/// Local port, decimal string.
pub const LOCAL_PORT: &str = "server.LocalPort";
/// Whether the request originated on the local machine.
pub const IS_LOCAL: &str = "server.IsLocal";

/// Client certificate presented during the TLS handshake.
pub const CLIENT_CERTIFICATE: &str = "ssl.ClientCertificate";
/// Delegate that loads the client certificate on demand.
pub const LOAD_CLIENT_CERT_ASYNC: &str = "ssl.LoadClientCertAsync";

/// Send-file delegate.
pub const SEND_FILE_ASYNC: &str = "sendfile.SendAsync";
