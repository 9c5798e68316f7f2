//! Session over a live server connection.

use async_trait::async_trait;
use bytes::Bytes;
use keyferry_client::{Connection, ConnectionConfig, Error, Result, Value};

use super::Session;

/// A [`Session`] backed by one [`Connection`].
pub struct RemoteSession {
    conn: Connection,
    label: String,
}

impl RemoteSession {
    /// Connect, authenticate and select the configured database.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn = Connection::connect(config).await?;
        Ok(Self {
            conn,
            label: config.addr(),
        })
    }
}

#[async_trait]
impl Session for RemoteSession {
    fn label(&self) -> &str {
        &self.label
    }

    async fn execute(&mut self, args: Vec<Bytes>) -> Result<Value> {
        self.conn.execute(&args).await
    }

    /// Pipelines `MULTI`, the commands and `EXEC` in one round trip.
    ///
    /// A command rejected at queue time makes the server discard the whole
    /// transaction; that rejection is returned instead of the generic
    /// `EXECABORT`.
    async fn execute_atomic(&mut self, commands: Vec<Vec<Bytes>>) -> Result<Vec<Value>> {
        let expected = commands.len();
        let mut batch = Vec::with_capacity(expected + 2);
        batch.push(vec![Bytes::from_static(b"MULTI")]);
        batch.extend(commands);
        batch.push(vec![Bytes::from_static(b"EXEC")]);

        let mut replies = self.conn.pipeline(&batch).await?.into_iter();

        match replies.next() {
            Some(Ok(reply)) if reply.is_ok() => {}
            Some(Ok(reply)) => {
                return Err(Error::Protocol(format!(
                    "unexpected MULTI response: {}",
                    reply
                )))
            }
            Some(Err(e)) => return Err(e),
            None => return Err(Error::ConnectionClosed),
        }

        let mut queue_error = None;
        for _ in 0..expected {
            if let Some(Err(e)) = replies.next() {
                queue_error.get_or_insert(e);
            }
        }

        let exec = replies.next().unwrap_or(Err(Error::ConnectionClosed));
        if let Some(e) = queue_error {
            return Err(e);
        }

        match exec? {
            Value::Array(results) => {
                // Runtime errors inside EXEC do not roll back earlier slots.
                if let Some(Value::Error(msg)) =
                    results.iter().find(|r| matches!(r, Value::Error(_)))
                {
                    return Err(Error::Server(msg.clone()));
                }
                Ok(results)
            }
            Value::Nil => Err(Error::Server("transaction aborted".into())),
            other => Err(Error::UnexpectedResponse {
                expected: "array",
                actual: other.type_name().to_string(),
            }),
        }
    }
}
