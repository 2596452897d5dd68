use std::io::{self, BufWriter, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use log::{debug, warn};

use crate::common::{DbError, Result};
use crate::execution::Executor;
use crate::tuple::Value;

use super::protocol::{read_message, write_message, write_response, AUTH_SUCCEED, END};
use super::ServerConfig;

/// One client connection: an auth handshake, then one response per
/// statement until the client hangs up.
pub struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    executor: Arc<Executor>,
    config: Arc<ServerConfig>,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        executor: Arc<Executor>,
        config: Arc<ServerConfig>,
    ) -> Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            executor,
            config,
        })
    }

    pub fn run(mut self) -> Result<()> {
        if !self.authenticate()? {
            return Ok(());
        }
        let mut writer = BufWriter::new(self.stream.try_clone()?);
        while let Some(msg) = read_message(&mut self.stream, self.config.max_message_size)? {
            let sql = String::from_utf8_lossy(&msg);
            debug!("{}: {}", self.peer, sql);
            self.respond(&mut writer, sql.trim())?;
        }
        debug!("{} disconnected", self.peer);
        Ok(())
    }

    /// Reads the `user:password` message under the auth timeout. A rejected
    /// client is told so before the connection drops.
    fn authenticate(&mut self) -> Result<bool> {
        self.stream
            .set_read_timeout(Some(self.config.auth_timeout))?;
        let msg = match read_message(&mut self.stream, self.config.max_message_size) {
            Ok(msg) => msg,
            Err(DbError::Io(e)) if is_timeout(&e) => {
                warn!("{} did not authenticate in time", self.peer);
                None
            }
            Err(e) => return Err(e),
        };
        let accepted = msg
            .as_deref()
            .and_then(|m| std::str::from_utf8(m).ok())
            .is_some_and(|credential| self.config.authenticate(credential));

        if !accepted {
            warn!("authentication failed for {}", self.peer);
            let reply = format!("Error: {}", DbError::AuthFailed);
            write_response(&mut self.stream, [reply])?;
            return Ok(false);
        }
        self.stream.set_read_timeout(None)?;
        write_response(&mut self.stream, [AUTH_SUCCEED])?;
        Ok(true)
    }

    /// Streams the statement's rows as JSON arrays, then `END`. A failure
    /// part way through is reported after the rows already sent.
    fn respond<W: Write>(&self, w: &mut W, sql: &str) -> Result<()> {
        if sql.is_empty() {
            return write_response(w, std::iter::empty::<&[u8]>());
        }
        match self.executor.execute(sql) {
            Ok(rows) => {
                for row in rows {
                    match row {
                        Ok(values) => write_message(w, json_row(&values).as_bytes())?,
                        Err(e) => {
                            write_message(w, error_message(&e).as_bytes())?;
                            break;
                        }
                    }
                }
            }
            Err(e) => write_message(w, error_message(&e).as_bytes())?,
        }
        write_message(w, END)?;
        w.flush()?;
        Ok(())
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn error_message(e: &DbError) -> String {
    format!("Error: {}", e)
}

/// One result row as a top-level JSON array of scalars.
pub fn json_row(values: &[Value]) -> String {
    serde_json::Value::Array(values.iter().map(Value::to_json).collect()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_row() {
        let row = vec![Value::Int32(-4), Value::from("it's"), Value::Float64(0.5)];
        assert_eq!(json_row(&row), r#"[-4,"it's",0.5]"#);
        assert_eq!(json_row(&[]), "[]");
    }
}
