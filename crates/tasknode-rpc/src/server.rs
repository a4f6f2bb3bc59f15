use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::codec::FrameCodec;
use crate::frames::{codes, decode, encode, ErrorShape, Frame, Outcome, ReqFrame, ResFrame};
use crate::methods;

/// A named service object exposing a fixed set of methods.
#[async_trait]
pub trait Service: Send + Sync {
    /// Service half of the wire name, e.g. `"CrontabServe"`.
    fn name(&self) -> &'static str;

    /// Method halves this service answers, e.g. `["List", "Add"]`.
    fn methods(&self) -> &'static [&'static str];

    /// Handle one call. `method` is one of [`Service::methods`]; `body` is the
    /// bincode-encoded argument value.
    async fn call(&self, method: &str, body: &[u8]) -> Result<Vec<u8>, ErrorShape>;
}

/// Decode call arguments, mapping failures to `BAD_REQUEST`.
pub fn decode_args<T: DeserializeOwned>(body: &[u8]) -> Result<T, ErrorShape> {
    decode(body).map_err(|e| ErrorShape::new(codes::BAD_REQUEST, e.to_string()))
}

/// Encode a reply value, mapping failures to `INTERNAL_ERROR`.
pub fn encode_reply<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ErrorShape> {
    encode(value).map_err(|e| ErrorShape::new(codes::INTERNAL_ERROR, e.to_string()))
}

/// Dispatch table from `"Service.Method"` to its service, built once at
/// startup.
#[derive(Default, Clone)]
pub struct Router {
    routes: HashMap<String, Arc<dyn Service>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, service: Arc<dyn Service>) -> Self {
        for method in service.methods() {
            self.routes
                .insert(format!("{}.{}", service.name(), method), service.clone());
        }
        self
    }

    /// Every routable method name, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn dispatch(&self, req: ReqFrame) -> ResFrame {
        let Some(service) = self.routes.get(&req.method) else {
            return ResFrame::err(
                req.id,
                codes::METHOD_NOT_FOUND,
                &format!("method '{}' not found", req.method),
            );
        };
        let method = methods::split(&req.method).map_or(req.method.as_str(), |(_, m)| m);
        match service.call(method, &req.body).await {
            Ok(payload) => ResFrame::ok(req.id, payload),
            Err(shape) => ResFrame {
                id: req.id,
                outcome: Outcome::Err(shape),
            },
        }
    }
}

/// Accept connections on `listener` until `shutdown` flips.
///
/// Each connection gets its own task and has its requests served one at a
/// time, in arrival order.
pub async fn serve(listener: TcpListener, router: Arc<Router>, mut shutdown: watch::Receiver<bool>) {
    info!(
        addr = ?listener.local_addr().ok(),
        methods = router.routes.len(),
        "rpc server listening"
    );
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(stream, peer, router.clone(), shutdown.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            _ = shutdown.changed() => {
                info!("rpc server shutting down");
                break;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(%peer, "rpc connection opened");
    let mut framed = Framed::new(stream, FrameCodec::new());
    loop {
        let frame = tokio::select! {
            frame = framed.next() => frame,
            _ = shutdown.changed() => break,
        };
        match frame {
            Some(Ok(Frame::Request(req))) => {
                let method = req.method.clone();
                let res = router.dispatch(req).await;
                if let Outcome::Err(shape) = &res.outcome {
                    debug!(%peer, %method, code = %shape.code, message = %shape.message, "call failed");
                }
                if let Err(e) = framed.send(Frame::Response(res)).await {
                    warn!(%peer, error = %e, "rpc reply failed");
                    break;
                }
            }
            Some(Ok(Frame::Response(res))) => {
                debug!(%peer, id = res.id, "unexpected response frame");
            }
            Some(Err(e)) => {
                warn!(%peer, error = %e, "bad frame, closing connection");
                break;
            }
            None => break,
        }
    }
    debug!(%peer, "rpc connection closed");
}
