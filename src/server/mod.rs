//! TCP front end: length-prefixed messages, a `user:password` handshake,
//! then SQL statements answered with JSON rows and an `END` sentinel.

mod config;
pub mod protocol;
mod session;

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use log::{error, info, warn};

use crate::catalog::Database;
use crate::common::{DbConfig, Result};
use crate::execution::Executor;

pub use config::*;
pub use session::{json_row, Session};

/// Accepts connections and serves each on its own thread.
pub struct Server {
    listener: TcpListener,
    executor: Arc<Executor>,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Opens the data root and binds the listen address.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let db = Database::open(&config.data, DbConfig::new())?;
        Self::with_database(config, Arc::new(db))
    }

    pub fn with_database(config: ServerConfig, db: Arc<Database>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen)?;
        if config.users.is_empty() {
            warn!("no users configured, accepting any credential");
        }
        Ok(Self {
            listener,
            executor: Arc::new(Executor::new(db)),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn database(&self) -> &Arc<Database> {
        self.executor.database()
    }

    /// Serves until the listener fails.
    pub fn run(self) -> Result<()> {
        info!(
            "listening on {} with data root {}",
            self.local_addr()?,
            self.config.data.display()
        );
        for conn in self.listener.incoming() {
            let stream = match conn {
                Ok(stream) => stream,
                Err(e) => {
                    error!("accept failed: {}", e);
                    continue;
                }
            };
            let session = match Session::new(stream, self.executor.clone(), self.config.clone()) {
                Ok(session) => session,
                Err(e) => {
                    error!("connection setup failed: {}", e);
                    continue;
                }
            };
            thread::spawn(move || {
                if let Err(e) = session.run() {
                    error!("connection failed: {}", e);
                }
            });
        }
        Ok(())
    }
}
