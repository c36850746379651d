//! ZMQ PUB transport for rendered templates.
//!
//! Each template goes out as a two-frame message: the topic string,
//! then the rendered body. Publishing never blocks and losing a
//! subscriber is not an error.

use anyhow::{Context, Result};
use catcierge_output::Publisher;
use tracing::{info, warn};

pub struct ZmqPublisher {
    // The context must outlive the socket.
    _ctx: zmq::Context,
    socket: zmq::Socket,
}

impl ZmqPublisher {
    pub fn bind(transport: &str, iface: &str, port: u16) -> Result<Self> {
        let ctx = zmq::Context::new();
        let socket = ctx
            .socket(zmq::PUB)
            .context("failed to create ZMQ publisher socket")?;

        let endpoint = format!("{transport}://{iface}:{port}");
        socket
            .bind(&endpoint)
            .with_context(|| format!("failed to bind ZMQ publisher to {endpoint}"))?;

        info!(%endpoint, "ZMQ publishing enabled");

        Ok(Self { _ctx: ctx, socket })
    }
}

impl Publisher for ZmqPublisher {
    fn publish(&mut self, topic: &str, body: &str) {
        let sent = self
            .socket
            .send(topic, zmq::SNDMORE | zmq::DONTWAIT)
            .and_then(|()| self.socket.send(body, zmq::DONTWAIT));

        if let Err(e) = sent {
            warn!("ZMQ publish on topic \"{topic}\" failed: {e}");
        }
    }
}
