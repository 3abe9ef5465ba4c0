//! HTTP transport: `POST /message` carries requests and `/sse` streams
//! notifications.

mod listener;
mod request;
mod response;
mod sse;

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

pub use self::listener::HttpListener;
pub use self::sse::SseHub;

use self::request::{HttpRequest, RequestError, read_request};
use self::response::HttpResponse;
use super::TRANSPORT_TARGET;
use crate::dispatch::Dispatcher;

/// Routes HTTP requests to the dispatcher or the event hub.
pub struct HttpRouter {
    dispatcher: Dispatcher,
    hub: Arc<SseHub>,
    request_timeout: Duration,
}

enum Routed {
    Reply(HttpResponse),
    Subscribe,
}

impl HttpRouter {
    pub fn new(dispatcher: Dispatcher, hub: Arc<SseHub>, request_timeout: Duration) -> Self {
        Self {
            dispatcher,
            hub,
            request_timeout,
        }
    }

    pub fn hub(&self) -> &Arc<SseHub> {
        &self.hub
    }

    /// Serves a single connection: one request, one response, then close.
    /// Event-stream connections are handed to the hub and kept open.
    pub fn serve(&self, mut stream: TcpStream) {
        let reply = match read_request(&mut stream, self.request_timeout) {
            Ok(request) => match self.route(&request) {
                Routed::Reply(reply) => reply,
                Routed::Subscribe => {
                    if let Err(error) = self.hub.subscribe(stream) {
                        debug!(target: TRANSPORT_TARGET, %error, "event subscriber went away during setup");
                    }
                    return;
                }
            },
            Err(RequestError::Closed) => return,
            Err(RequestError::Io(error)) => {
                debug!(target: TRANSPORT_TARGET, %error, "http read failed");
                return;
            }
            Err(error) => {
                debug!(target: TRANSPORT_TARGET, %error, "rejecting http request");
                rejection(&error)
            }
        };
        if let Err(error) = reply.write_to(&mut stream) {
            warn!(target: TRANSPORT_TARGET, %error, status = reply.status(), "failed to write http response");
        }
    }

    fn route(&self, request: &HttpRequest) -> Routed {
        match (request.method.as_str(), request.path.as_str()) {
            ("OPTIONS", _) => Routed::Reply(HttpResponse::empty(204)),
            ("POST", "/message") => Routed::Reply(match self.dispatcher.handle(&request.body) {
                Some(line) => HttpResponse::json(200, line),
                None => HttpResponse::empty(202),
            }),
            ("GET" | "POST", "/sse") => Routed::Subscribe,
            _ => Routed::Reply(HttpResponse::error(404, "Endpoint not found")),
        }
    }
}

fn rejection(error: &RequestError) -> HttpResponse {
    match error {
        RequestError::Timeout => HttpResponse::error(408, "Request timeout"),
        RequestError::HeadTooLarge => HttpResponse::error(431, "Request head too large"),
        RequestError::BodyTooLarge => HttpResponse::error(413, "Request body too large"),
        RequestError::Malformed(reason) => HttpResponse::error(400, reason),
        RequestError::Closed | RequestError::Io(_) => HttpResponse::error(400, "Bad request"),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(RequestError::Timeout, 408)]
    #[case(RequestError::HeadTooLarge, 431)]
    #[case(RequestError::BodyTooLarge, 413)]
    #[case(RequestError::Malformed("missing request line"), 400)]
    fn rejections_map_to_statuses(#[case] error: RequestError, #[case] status: u16) {
        assert_eq!(rejection(&error).status(), status);
    }
}
