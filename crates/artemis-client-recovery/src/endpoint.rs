//! Broker endpoints and failover selection.

use parking_lot::Mutex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

/// Transport scheme of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scheme {
    /// Plain TCP (`amqp://`, default port 5672).
    #[default]
    Amqp,
    /// TLS (`amqps://`, default port 5671).
    Amqps,
}

impl Scheme {
    /// The IANA port for this scheme.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Amqp => 5672,
            Scheme::Amqps => 5671,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Scheme::Amqp => "amqp",
            Scheme::Amqps => "amqps",
        }
    }
}

/// Address and credentials of a broker.
///
/// Endpoints are immutable values; two endpoints are equal when their host
/// and port match, whatever their credentials.
#[derive(Clone)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
}

impl Endpoint {
    /// Creates an `amqp://` endpoint without credentials.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Amqp,
            host: host.into(),
            port,
            user: None,
            password: None,
        }
    }

    /// Creates an `amqp://` endpoint with credentials.
    pub fn create(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, port).with_credentials(user, password)
    }

    /// Returns a copy of this endpoint carrying credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Returns a copy of this endpoint using `scheme`.
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Errors produced when parsing an endpoint URI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointParseError {
    #[error("unsupported scheme `{0}`, expected amqp or amqps")]
    UnsupportedScheme(String),
    #[error("endpoint is missing a host")]
    MissingHost,
    #[error("invalid port `{0}`")]
    InvalidPort(String),
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// Parses `amqp[s]://[user:password@]host[:port]`.
    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = match uri.split_once("://") {
            Some(("amqp", rest)) => (Scheme::Amqp, rest),
            Some(("amqps", rest)) => (Scheme::Amqps, rest),
            Some((other, _)) => return Err(EndpointParseError::UnsupportedScheme(other.to_string())),
            None => (Scheme::Amqp, uri),
        };
        let rest = rest.trim_end_matches('/');

        let (credentials, authority) = match rest.rsplit_once('@') {
            Some((credentials, authority)) => (Some(credentials), authority),
            None => (None, rest),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| EndpointParseError::InvalidPort(port.to_string()))?;
                (host, port)
            }
            None => (authority, scheme.default_port()),
        };
        if host.is_empty() {
            return Err(EndpointParseError::MissingHost);
        }

        let endpoint = Endpoint::new(host, port).with_scheme(scheme);
        Ok(match credentials {
            Some(credentials) => {
                let (user, password) = credentials.split_once(':').unwrap_or((credentials, ""));
                endpoint.with_credentials(user, password)
            }
            None => endpoint,
        })
    }
}

/// Returned when an [`EndpointSelector`] is built from an empty list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("endpoint list must not be empty")]
pub struct EmptyEndpointList;

/// Type alias for a custom failover function.
///
/// Receives the number of endpoints and the index last attempted (if any), and
/// returns the index to try next. Out-of-range results wrap around.
pub type CustomSelectorFn = Arc<dyn Fn(usize, Option<usize>) -> usize + Send + Sync>;

/// Strategy used by [`EndpointSelector::next`].
#[derive(Clone, Default)]
pub enum SelectionStrategy {
    /// Move to the endpoint after the one last attempted, wrapping around.
    #[default]
    RoundRobin,

    /// Use a custom selector implementation.
    Custom(CustomSelectorFn),
}

impl fmt::Debug for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionStrategy::RoundRobin => write!(f, "RoundRobin"),
            SelectionStrategy::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[derive(Debug, Default)]
struct Cursor {
    last_attempted: Option<usize>,
    connected: Option<usize>,
}

/// Ordered, non-empty list of endpoints with a failover cursor.
#[derive(Debug)]
pub struct EndpointSelector {
    endpoints: Vec<Endpoint>,
    strategy: SelectionStrategy,
    cursor: Mutex<Cursor>,
}

impl EndpointSelector {
    /// Creates a round-robin selector.
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, EmptyEndpointList> {
        Self::with_strategy(endpoints, SelectionStrategy::RoundRobin)
    }

    /// Creates a selector with an explicit strategy.
    pub fn with_strategy(
        endpoints: Vec<Endpoint>,
        strategy: SelectionStrategy,
    ) -> Result<Self, EmptyEndpointList> {
        if endpoints.is_empty() {
            return Err(EmptyEndpointList);
        }
        Ok(Self {
            endpoints,
            strategy,
            cursor: Mutex::new(Cursor::default()),
        })
    }

    /// Returns the first endpoint in the list and records it as attempted.
    pub fn first(&self) -> Endpoint {
        self.cursor.lock().last_attempted = Some(0);
        self.endpoints[0].clone()
    }

    /// Returns the next endpoint to try and records it as attempted.
    ///
    /// Before any attempt this is the first endpoint.
    pub fn next(&self) -> Endpoint {
        let mut cursor = self.cursor.lock();
        let len = self.endpoints.len();
        let index = match (&self.strategy, cursor.last_attempted) {
            (SelectionStrategy::RoundRobin, None) => 0,
            (SelectionStrategy::RoundRobin, Some(last)) => (last + 1) % len,
            (SelectionStrategy::Custom(select), last) => select(len, last) % len,
        };
        cursor.last_attempted = Some(index);
        self.endpoints[index].clone()
    }

    /// Marks the endpoint last attempted as the connected one.
    pub fn mark_connected(&self) {
        let mut cursor = self.cursor.lock();
        cursor.connected = cursor.last_attempted;
    }

    /// Clears the connected endpoint.
    pub fn mark_disconnected(&self) {
        self.cursor.lock().connected = None;
    }

    /// The endpoint the connection is currently attached to, if any.
    pub fn connected(&self) -> Option<Endpoint> {
        self.cursor
            .lock()
            .connected
            .map(|index| self.endpoints[index].clone())
    }

    /// The endpoint most recently handed out.
    pub fn last_attempted(&self) -> Option<Endpoint> {
        self.cursor
            .lock()
            .last_attempted
            .map(|index| self.endpoints[index].clone())
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }
}
