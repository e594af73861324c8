use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;

use crate::error::AdmissionError;
use crate::rate_limit::RateLimiter;

/// Quota information attached to an admitted response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    /// Bucket capacity.
    pub limit: f64,
    /// Tokens left after this request.
    pub remaining: f64,
}

impl Quota {
    /// Header carrying the fixed capacity.
    pub const LIMIT_HEADER: &'static str = "X-RateLimit-Limit";
    /// Header carrying the remaining tokens.
    pub const REMAINING_HEADER: &'static str = "X-RateLimit-Remaining";

    /// Informational headers for a transport to copy onto its response.
    ///
    /// ```
    /// use tollgate::rate_limit::Quota;
    /// let quota = Quota { limit: 5.0, remaining: 3.5 };
    /// assert_eq!(
    ///     quota.headers(),
    ///     [("X-RateLimit-Limit", "5".to_string()), ("X-RateLimit-Remaining", "3.50".to_string())]
    /// );
    /// ```
    pub fn headers(&self) -> [(&'static str, String); 2] {
        let limit = if self.limit.fract() == 0.0 {
            format!("{:.0}", self.limit)
        } else {
            self.limit.to_string()
        };
        [(Self::LIMIT_HEADER, limit), (Self::REMAINING_HEADER, format!("{:.2}", self.remaining))]
    }
}

/// Response of an admitted request together with its quota.
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted<R> {
    /// What the inner service answered.
    pub response: R,
    /// Quota after this request.
    pub quota: Quota,
}

impl<R> Admitted<R> {
    /// Drop the quota and keep the response.
    pub fn into_inner(self) -> R {
        self.response
    }
}

/// Caller identifier for a peer address: the host with any port stripped.
///
/// Accepts `ip:port`, `host:port` and `[v6]:port`. Anything that does not split
/// cleanly (a bare IPv4 or IPv6 address, an empty host) is used as given.
///
/// ```
/// use tollgate::rate_limit::peer_identifier;
/// assert_eq!(peer_identifier("203.0.113.7:51234"), "203.0.113.7");
/// assert_eq!(peer_identifier("[2001:db8::1]:443"), "2001:db8::1");
/// assert_eq!(peer_identifier("2001:db8::1"), "2001:db8::1");
/// ```
pub fn peer_identifier(addr: &str) -> String {
    split_host(addr).unwrap_or(addr).to_string()
}

fn split_host(addr: &str) -> Option<&str> {
    const BRACKETS: &[char] = &['[', ']'];
    let (host, port) = addr.rsplit_once(':')?;
    if port.contains(BRACKETS) {
        return None;
    }
    let host = match host.strip_prefix('[') {
        Some(bracketed) => bracketed.strip_suffix(']').filter(|h| !h.contains(BRACKETS))?,
        None if host.contains(':') || host.contains(BRACKETS) => return None,
        None => host,
    };
    Some(host).filter(|h| !h.is_empty())
}

/// A layer that checks every request against a [`RateLimiter`].
///
/// `identify` extracts the caller identifier (for example the client IP) from the request.
#[derive(Clone, Debug)]
pub struct AdmissionLayer<L, F> {
    limiter: Arc<L>,
    identify: F,
}

impl<L, F> AdmissionLayer<L, F> {
    /// Create a new admission layer.
    pub fn new(limiter: L, identify: F) -> Self {
        Self::shared(Arc::new(limiter), identify)
    }

    /// Create a layer over a limiter that is also used elsewhere.
    pub fn shared(limiter: Arc<L>, identify: F) -> Self {
        Self { limiter, identify }
    }
}

impl<S, L, F> Layer<S> for AdmissionLayer<L, F>
where
    L: RateLimiter + 'static,
    F: Clone,
{
    type Service = AdmissionService<S, L, F>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            limiter: self.limiter.clone(),
            identify: self.identify.clone(),
        }
    }
}

/// Middleware service that admits or rejects each request exactly once.
///
/// A rejected request never reaches the inner service and is not retried here.
#[derive(Clone, Debug)]
pub struct AdmissionService<S, L, F> {
    inner: S,
    limiter: Arc<L>,
    identify: F,
}

impl<S, L, F, Req> Service<Req> for AdmissionService<S, L, F>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    L: RateLimiter + 'static,
    F: Fn(&Req) -> String,
    Req: Send + 'static,
{
    type Response = Admitted<S::Response>;
    type Error = AdmissionError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let identifier = (self.identify)(&req);
        let limiter = self.limiter.clone();
        // Keep the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let admission = limiter.allow(&identifier).await;
            let limit = limiter.limit();
            if !admission.allowed {
                tracing::debug!(target: "tollgate::middleware", identifier = %identifier, "request rejected");
                return Err(AdmissionError::Rejected { limit });
            }
            let response = inner.call(req).await.map_err(AdmissionError::Inner)?;
            Ok(Admitted { response, quota: Quota { limit, remaining: admission.remaining } })
        })
    }
}
