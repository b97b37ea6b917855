//! Queue-depth probing against a Redis broker.
//!
//! Queues live as plain Redis lists, so depth is `LLEN`. The broker also
//! keeps routing metadata under the same name prefix (e.g. `.binding`
//! sets); those keys must be skipped, not reported as empty queues.
//!
//! ## Probe shape
//!
//! ```text
//! SCAN (cursor, never KEYS) → TYPE pipeline → LLEN pipeline (lists only)
//! ```
//!
//! Construction only parses the URL into a connect target; connections
//! are opened per probe call. Four URL forms are accepted: plain TCP
//! (`redis://`), TLS (`rediss://`), unix socket
//! (`redis+socket:///path?db=N`) and sentinel
//! (`sentinel://[:password@]host:port/dbIndex/serviceName`), the last
//! discovering the master address by service name on every probe.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{debug, trace};
use url::Url;

use crate::{BrokerStats, QueueInfo};

use super::{BrokerError, BrokerMonitor, BrokerResult};

/// How many keys one SCAN round asks for
const SCAN_COUNT: usize = 200;

/// Where a probe connects to
enum RedisTarget {
    /// Client for redis://, rediss:// and unix-socket URLs.
    /// Opening the client parses the URL but performs no I/O.
    Direct(redis::Client),

    /// Master discovered through a sentinel on every probe
    Sentinel {
        host: String,
        port: u16,
        password: Option<String>,
        db: i64,
        service_name: String,
    },
}

/// Monitor reading queue depths straight from Redis lists
pub struct RedisBrokerMonitor {
    target: RedisTarget,
    prefix: String,
    timeout: Duration,
}

impl RedisBrokerMonitor {
    pub fn new(broker_url: &str, prefix: &str, timeout: Duration) -> BrokerResult<Self> {
        let parsed =
            Url::parse(broker_url).map_err(|e| BrokerError::InvalidUrl(e.to_string()))?;

        let target = match parsed.scheme() {
            "redis" | "rediss" => RedisTarget::Direct(
                redis::Client::open(broker_url)
                    .map_err(|e| BrokerError::InvalidUrl(e.to_string()))?,
            ),

            "redis+socket" => {
                let db = parsed
                    .query_pairs()
                    .find(|(key, _)| key == "db")
                    .and_then(|(_, value)| value.parse::<i64>().ok())
                    .unwrap_or(0);
                let socket_url = format!("redis+unix://{}?db={}", parsed.path(), db);
                RedisTarget::Direct(
                    redis::Client::open(socket_url.as_str())
                        .map_err(|e| BrokerError::InvalidUrl(e.to_string()))?,
                )
            }

            "sentinel" => {
                let host = parsed
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| BrokerError::InvalidUrl("missing sentinel host".to_string()))?
                    .to_string();
                let port = parsed.port().unwrap_or(26379);
                let password = parsed.password().map(|p| p.to_string());

                let mut segments = parsed.path().trim_matches('/').split('/');
                let db = segments
                    .next()
                    .filter(|s| !s.is_empty())
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(0);
                let service_name = segments
                    .next()
                    .filter(|s| !s.is_empty())
                    .unwrap_or("mymaster")
                    .to_string();

                RedisTarget::Sentinel {
                    host,
                    port,
                    password,
                    db,
                    service_name,
                }
            }

            other => return Err(BrokerError::UnsupportedScheme(other.to_string())),
        };

        Ok(Self {
            target,
            prefix: prefix.to_string(),
            timeout,
        })
    }

    /// Test Redis connectivity.
    pub async fn ping(&self) -> bool {
        let attempt = async {
            let mut conn = self.connect().await?;
            let reply: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(BrokerError::from)?;
            Ok::<_, BrokerError>(reply)
        };

        matches!(tokio::time::timeout(self.timeout, attempt).await, Ok(Ok(_)))
    }

    async fn connect(&self) -> BrokerResult<MultiplexedConnection> {
        match &self.target {
            RedisTarget::Direct(client) => {
                Ok(client.get_multiplexed_async_connection().await?)
            }

            RedisTarget::Sentinel {
                host,
                port,
                password,
                db,
                service_name,
            } => {
                let auth = password
                    .as_deref()
                    .map(|p| format!(":{p}@"))
                    .unwrap_or_default();

                let sentinel = redis::Client::open(format!("redis://{auth}{host}:{port}"))
                    .map_err(|e| BrokerError::InvalidUrl(e.to_string()))?;
                let mut sentinel_conn = sentinel.get_multiplexed_async_connection().await?;

                let (master_host, master_port): (String, String) =
                    redis::cmd("SENTINEL")
                        .arg("get-master-addr-by-name")
                        .arg(service_name)
                        .query_async(&mut sentinel_conn)
                        .await?;

                debug!("sentinel resolved {service_name} to {master_host}:{master_port}");

                let master = redis::Client::open(format!(
                    "redis://{auth}{master_host}:{master_port}/{db}"
                ))
                .map_err(|e| BrokerError::Unreachable(e.to_string()))?;

                Ok(master.get_multiplexed_async_connection().await?)
            }
        }
    }

    /// Incremental, non-blocking key discovery by prefix.
    async fn discover_keys(&self, conn: &mut MultiplexedConnection) -> BrokerResult<Vec<String>> {
        let pattern = if self.prefix.contains('*') {
            self.prefix.clone()
        } else {
            format!("*{}*", self.prefix)
        };

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(conn)
                .await?;

            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        trace!("discovered {} candidate keys for {pattern}", keys.len());

        // Always check at least the default queue name
        if keys.is_empty() {
            keys.push(self.prefix.clone());
        }

        Ok(keys)
    }

    async fn probe(&self, queue_names: Option<&[String]>) -> BrokerResult<BrokerStats> {
        let mut conn = self.connect().await?;

        let candidates = match queue_names {
            Some(names) => names.to_vec(),
            None => self.discover_keys(&mut conn).await?,
        };

        let always_report: Vec<String> = match queue_names {
            Some(names) => names.to_vec(),
            None => vec![self.prefix.clone()],
        };

        let mut type_pipe = redis::pipe();
        for key in &candidates {
            type_pipe.cmd("TYPE").arg(key);
        }
        let types: Vec<String> = type_pipe.query_async(&mut conn).await?;

        let list_keys = retain_list_keys(candidates, &types);

        let lengths: Vec<u64> = if list_keys.is_empty() {
            Vec::new()
        } else {
            let mut llen_pipe = redis::pipe();
            for key in &list_keys {
                llen_pipe.cmd("LLEN").arg(key);
            }
            llen_pipe.query_async(&mut conn).await?
        };

        let depths: Vec<(String, u64)> = list_keys.into_iter().zip(lengths).collect();
        Ok(assemble_queue_stats(depths, &always_report))
    }
}

#[async_trait]
impl BrokerMonitor for RedisBrokerMonitor {
    async fn queue_lengths(&self, queue_names: Option<&[String]>) -> BrokerResult<BrokerStats> {
        tokio::time::timeout(self.timeout, self.probe(queue_names))
            .await
            .map_err(|_| {
                BrokerError::Unreachable(format!("probe timed out after {:?}", self.timeout))
            })?
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Keep only keys whose TYPE reply is `list`.
///
/// Routing metadata (e.g. `_kombu.binding.*` sets) matches the discovery
/// prefix but must never be reported as a queue.
fn retain_list_keys(candidates: Vec<String>, types: &[String]) -> Vec<String> {
    candidates
        .into_iter()
        .zip(types.iter())
        .filter(|(_, key_type)| key_type.as_str() == "list")
        .map(|(key, _)| key)
        .collect()
}

/// Build the stats document from measured list depths.
///
/// Empty queues are reported only when their name was explicitly asked
/// for (or is the default queue name); results are deduplicated by name,
/// first occurrence wins.
fn assemble_queue_stats(depths: Vec<(String, u64)>, always_report: &[String]) -> BrokerStats {
    let mut seen = std::collections::HashSet::new();
    let mut queues = Vec::new();
    let mut total_messages = 0;

    for (name, length) in depths {
        if length == 0 && !always_report.contains(&name) {
            continue;
        }
        if !seen.insert(name.clone()) {
            continue;
        }

        total_messages += length;
        queues.push(QueueInfo {
            name,
            messages_ready: length,
            messages_unacknowledged: 0,
            messages: length,
            consumers: 0,
            state: "running".to_string(),
        });
    }

    BrokerStats {
        queues,
        total_messages,
        total_consumers: 0,
    }
}
