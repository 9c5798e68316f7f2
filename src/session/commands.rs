//! Typed helpers for the keyspace commands the engine issues.

use bytes::Bytes;
use keyferry_client::{Error, Result, ToArg, Value};

use super::Session;

fn cmd(name: &'static str, rest: &[Bytes]) -> Vec<Bytes> {
    let mut args = Vec::with_capacity(rest.len() + 1);
    args.push(Bytes::from_static(name.as_bytes()));
    args.extend_from_slice(rest);
    args
}

/// `SCAN cursor COUNT count`: returns the next cursor and a page of keys.
pub async fn scan<S: Session + ?Sized>(
    session: &mut S,
    cursor: u64,
    count: usize,
) -> Result<(u64, Vec<Bytes>)> {
    let reply = session
        .execute(cmd(
            "SCAN",
            &[cursor.to_arg(), Bytes::from_static(b"COUNT"), count.to_arg()],
        ))
        .await?;

    let mut parts = reply.into_array()?.into_iter();
    let (Some(next), Some(keys)) = (parts.next(), parts.next()) else {
        return Err(Error::Protocol("SCAN reply must have two elements".into()));
    };

    let next = next
        .into_string()?
        .parse::<u64>()
        .map_err(|e| Error::Protocol(format!("invalid SCAN cursor: {}", e)))?;

    let keys = keys
        .into_array()?
        .into_iter()
        .map(|k| {
            k.into_bytes()?
                .ok_or_else(|| Error::Protocol("nil key in SCAN reply".into()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((next, keys))
}

/// `TYPE key`: the native type name, `none` when the key is absent.
pub async fn key_type<S: Session + ?Sized>(session: &mut S, key: &Bytes) -> Result<String> {
    session
        .execute(cmd("TYPE", std::slice::from_ref(key)))
        .await?
        .into_string()
}

/// `PTTL key`: milliseconds left, `-1` without expiry, `-2` when absent.
pub async fn pttl<S: Session + ?Sized>(session: &mut S, key: &Bytes) -> Result<i64> {
    session
        .execute(cmd("PTTL", std::slice::from_ref(key)))
        .await?
        .into_integer()
}

/// `EXISTS key`.
pub async fn exists<S: Session + ?Sized>(session: &mut S, key: &Bytes) -> Result<bool> {
    let n = session
        .execute(cmd("EXISTS", std::slice::from_ref(key)))
        .await?
        .into_integer()?;
    Ok(n > 0)
}

/// `FLUSHDB`: drop every key of the selected database.
pub async fn flush_db<S: Session + ?Sized>(session: &mut S) -> Result<()> {
    expect_ok(session.execute(cmd("FLUSHDB", &[])).await?, "FLUSHDB")
}

/// `DBSIZE`: number of keys in the selected database.
pub async fn db_size<S: Session + ?Sized>(session: &mut S) -> Result<u64> {
    let n = session.execute(cmd("DBSIZE", &[])).await?.into_integer()?;
    Ok(n.max(0) as u64)
}

/// `PING`.
pub async fn ping<S: Session + ?Sized>(session: &mut S) -> Result<()> {
    match session.execute(cmd("PING", &[])).await? {
        Value::Status(ref s) if s == "PONG" => Ok(()),
        other => Err(Error::UnexpectedResponse {
            expected: "PONG",
            actual: other.to_string(),
        }),
    }
}

fn expect_ok(reply: Value, command: &str) -> Result<()> {
    if reply.is_ok() {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "unexpected {} response: {}",
            command, reply
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::super::MemoryStore;
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_type_ttl_exists() {
        let store = MemoryStore::new();
        store.set_string("a", "1");
        store.push_list("l", ["x"]);
        store.expire("l", Duration::from_secs(60));
        let mut session = store.session();

        let a = Bytes::from("a");
        let l = Bytes::from("l");
        let missing = Bytes::from("missing");

        assert_eq!(key_type(&mut session, &a).await.unwrap(), "string");
        assert_eq!(key_type(&mut session, &l).await.unwrap(), "list");
        assert_eq!(key_type(&mut session, &missing).await.unwrap(), "none");

        assert_eq!(pttl(&mut session, &a).await.unwrap(), -1);
        let ttl = pttl(&mut session, &l).await.unwrap();
        assert!(ttl > 59_000 && ttl <= 60_000);
        assert_eq!(pttl(&mut session, &missing).await.unwrap(), -2);

        assert!(exists(&mut session, &a).await.unwrap());
        assert!(!exists(&mut session, &missing).await.unwrap());
    }

    #[tokio::test]
    async fn test_flush_and_size() {
        let store = MemoryStore::new();
        store.set_string("a", "1");
        store.set_string("b", "2");
        let mut session = store.session();

        ping(&mut session).await.unwrap();
        assert_eq!(db_size(&mut session).await.unwrap(), 2);
        flush_db(&mut session).await.unwrap();
        assert_eq!(db_size(&mut session).await.unwrap(), 0);
    }
}
