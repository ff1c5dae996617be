//! Scripted transport for tests.
//!
//! Routes match on method plus a URL fragment; the longest matching
//! fragment wins. Each route replays its queued responses in order and
//! keeps repeating the last one. Unmatched requests get a 404.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assetdesk_core::TransportError;
use async_trait::async_trait;

use crate::transport::{HttpMethod, HttpTransport, UpstreamRequest, UpstreamResponse};

type Handler =
    Arc<dyn Fn(&UpstreamRequest) -> Result<UpstreamResponse, TransportError> + Send + Sync>;

#[derive(Clone)]
enum Scripted {
    Response(UpstreamResponse),
    Failure(TransportError),
    Handler(Handler),
}

impl Scripted {
    fn resolve(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        match self {
            Self::Response(response) => Ok(response.clone()),
            Self::Failure(err) => Err(err.clone()),
            Self::Handler(handler) => handler(request),
        }
    }
}

struct Route {
    method: HttpMethod,
    fragment: String,
    queue: VecDeque<Scripted>,
}

/// In-memory [`HttpTransport`] that replays scripted responses and records
/// every request it sees.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<UpstreamRequest>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every request for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a response for `method` requests whose URL contains `fragment`.
    pub fn respond(&self, method: HttpMethod, fragment: &str, response: UpstreamResponse) {
        self.push(method, fragment, Scripted::Response(response));
    }

    /// Queue a transport failure.
    pub fn fail(&self, method: HttpMethod, fragment: &str, error: TransportError) {
        self.push(method, fragment, Scripted::Failure(error));
    }

    /// Queue a handler computing the response from the request.
    pub fn respond_with<F>(&self, method: HttpMethod, fragment: &str, handler: F)
    where
        F: Fn(&UpstreamRequest) -> Result<UpstreamResponse, TransportError> + Send + Sync + 'static,
    {
        self.push(method, fragment, Scripted::Handler(Arc::new(handler)));
    }

    /// Every request seen so far, in arrival order.
    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Requests with `method` whose URL contains `fragment`.
    pub fn requests_matching(&self, method: HttpMethod, fragment: &str) -> Vec<UpstreamRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.url.contains(fragment))
            .collect()
    }

    /// Highest number of requests in progress at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn push(&self, method: HttpMethod, fragment: &str, scripted: Scripted) {
        let Ok(mut routes) = self.routes.lock() else {
            return;
        };
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.fragment == fragment)
        {
            Some(route) => route.queue.push_back(scripted),
            None => routes.push(Route {
                method,
                fragment: fragment.to_string(),
                queue: VecDeque::from([scripted]),
            }),
        }
    }

    fn next_for(&self, request: &UpstreamRequest) -> Option<Scripted> {
        let mut routes = self.routes.lock().ok()?;
        let route = routes
            .iter_mut()
            .filter(|r| r.method == request.method && request.url.contains(&r.fragment))
            .max_by_key(|r| r.fragment.len())?;
        if route.queue.len() > 1 {
            route.queue.pop_front()
        } else {
            route.queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = match self.next_for(request) {
            Some(scripted) => scripted.resolve(request),
            None => Ok(UpstreamResponse::new(404, "no scripted response")),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("latency", &self.latency)
            .field("requests", &self.request_count())
            .finish()
    }
}
