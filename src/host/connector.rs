//! How the host reaches an isolated context

use std::sync::mpsc;
use std::thread::JoinHandle;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::TransportError;
use crate::isolate::{self, IsolateConfig};

/// Sending half of a connection
pub trait Link: Send {
    fn post(&self, raw: String) -> Result<(), TransportError>;

    /// Whether the context can still process messages
    fn is_alive(&self) -> bool;
}

/// A freshly created isolated context
pub struct Connection {
    pub link: Box<dyn Link>,
    pub inbound: UnboundedReceiver<String>,
}

/// Creates isolated contexts
pub trait Connector: Send + 'static {
    fn connect(&mut self) -> Result<Connection, TransportError>;
}

/// Isolated contexts on dedicated threads
#[derive(Debug, Clone, Default)]
pub struct ThreadConnector {
    config: IsolateConfig,
}

impl ThreadConnector {
    pub fn new(config: IsolateConfig) -> Self {
        Self { config }
    }
}

impl Connector for ThreadConnector {
    fn connect(&mut self) -> Result<Connection, TransportError> {
        let (inbox, outbox, thread) = isolate::spawn(self.config.clone())?.into_parts();
        Ok(Connection {
            link: Box::new(ThreadLink { inbox, thread }),
            inbound: outbox,
        })
    }
}

struct ThreadLink {
    inbox: mpsc::Sender<String>,
    thread: JoinHandle<()>,
}

impl Link for ThreadLink {
    fn post(&self, raw: String) -> Result<(), TransportError> {
        self.inbox.send(raw).map_err(|_| TransportError::Closed)
    }

    fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }
}
