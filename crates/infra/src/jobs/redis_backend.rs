//! Redis-backed job queue and job store.
//!
//! ## Keys
//!
//! - `mlq:queue:{name}`: ready list (LPUSH on enqueue, RPOP on dequeue)
//! - `mlq:queue:{name}:members`: set of ids that are ready or leased
//! - `mlq:queue:{name}:leases`: sorted set of leased ids scored by deadline (ms)
//! - `mlq:queue:{name}:tokens`: hash id -> lease token
//! - `mlq:queue:{name}:deliveries`: hash id -> delivery counter
//! - `mlq:job:{id}`: JSON job record
//! - `mlq:jobs`: set of all job ids (for stats)
//!
//! Every queue operation is a single Lua script, so the reap-then-pop of
//! `try_dequeue` is atomic across competing workers. Lease deadlines use the
//! caller's wall clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use mlq_core::{DomainResult, Job, JobId};
use redis::{ConnectionLike, Script};
use tracing::{instrument, warn};

use super::queue::{DEFAULT_LEASE_TIMEOUT, JobQueue, Lease, LeaseToken, QueueError};
use super::store::{JobStats, JobStore, JobStoreError};

const ENQUEUE: &str = r#"
if redis.call('SADD', KEYS[2], ARGV[1]) == 1 then
  redis.call('LPUSH', KEYS[1], ARGV[1])
  return 1
end
return 0
"#;

const DEQUEUE: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[3], id)
  redis.call('HDEL', KEYS[4], id)
  redis.call('RPUSH', KEYS[1], id)
end
local id = redis.call('RPOP', KEYS[1])
if not id then
  return false
end
redis.call('ZADD', KEYS[3], ARGV[2], id)
redis.call('HSET', KEYS[4], id, ARGV[3])
local n = redis.call('HINCRBY', KEYS[5], id, 1)
return {id, n}
"#;

const HEARTBEAT: &str = r#"
if redis.call('HGET', KEYS[2], ARGV[1]) ~= ARGV[2] then
  return 0
end
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
return 1
"#;

const ACK: &str = r#"
if redis.call('HGET', KEYS[2], ARGV[1]) ~= ARGV[2] then
  return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('SREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
return 1
"#;

const RELEASE: &str = r#"
if redis.call('HGET', KEYS[2], ARGV[1]) ~= ARGV[2] then
  return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('LPUSH', KEYS[3], ARGV[1])
return 1
"#;

const REMOVE: &str = r#"
local n = redis.call('LREM', KEYS[1], 0, ARGV[1])
if n > 0 then
  redis.call('SREM', KEYS[2], ARGV[1])
  redis.call('HDEL', KEYS[3], ARGV[1])
end
return n
"#;

fn queue_err(e: impl std::fmt::Display) -> QueueError {
    QueueError::Storage(e.to_string())
}

fn store_err(e: impl std::fmt::Display) -> JobStoreError {
    JobStoreError::Storage(e.to_string())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Idle connections kept for reuse per pool.
const MAX_IDLE_CONNECTIONS: usize = 8;

/// Synchronous connections reused across operations. A connection goes back
/// to the idle list only after a successful operation.
struct ConnectionPool {
    client: redis::Client,
    idle: Mutex<Vec<redis::Connection>>,
}

impl ConnectionPool {
    fn open(redis_url: &str) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            idle: Mutex::new(Vec::new()),
        })
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> redis::RedisResult<T> {
        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let mut conn = match reused {
            Some(conn) => conn,
            None => self.client.get_connection()?,
        };

        let result = f(&mut conn);
        if result.is_ok() && conn.is_open() {
            if let Ok(mut idle) = self.idle.lock() {
                if idle.len() < MAX_IDLE_CONNECTIONS {
                    idle.push(conn);
                }
            }
        }
        result
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

impl core::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle", &self.idle_count())
            .finish_non_exhaustive()
    }
}

/// Redis list + sorted-set lease queue.
#[derive(Debug, Clone)]
pub struct RedisJobQueue {
    pool: Arc<ConnectionPool>,
    name: String,
    lease_timeout: Duration,
    ready_key: String,
    members_key: String,
    leases_key: String,
    tokens_key: String,
    deliveries_key: String,
}

impl RedisJobQueue {
    pub fn new(redis_url: impl AsRef<str>, name: impl Into<String>) -> Result<Self, QueueError> {
        let pool = ConnectionPool::open(redis_url.as_ref()).map_err(queue_err)?;
        let name = name.into();
        let base = format!("mlq:queue:{name}");

        Ok(Self {
            pool: Arc::new(pool),
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            ready_key: base.clone(),
            members_key: format!("{base}:members"),
            leases_key: format!("{base}:leases"),
            tokens_key: format!("{base}:tokens"),
            deliveries_key: format!("{base}:deliveries"),
            name,
        })
    }

    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    fn run<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, QueueError> {
        self.pool.with_connection(f).map_err(queue_err)
    }

    fn deadline_ms(&self) -> i64 {
        now_ms() + self.lease_timeout.as_millis() as i64
    }

    /// Run a lease-checking script; 1 means the token still held the lease.
    fn lease_script(
        &self,
        script: &str,
        keys: &[&str],
        lease: &Lease,
        extra: Option<i64>,
    ) -> Result<(), QueueError> {
        let held: i64 = self.run(|conn| {
            let script = Script::new(script);
            let mut invocation = script.prepare_invoke();
            for key in keys {
                invocation.key(*key);
            }
            invocation.arg(lease.job_id.to_string()).arg(lease.token.to_string());
            if let Some(extra) = extra {
                invocation.arg(extra);
            }
            invocation.invoke(conn)
        })?;
        if held == 1 {
            Ok(())
        } else {
            Err(QueueError::LeaseLost(lease.job_id))
        }
    }
}

impl JobQueue for RedisJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(queue = %self.name), err)]
    fn enqueue(&self, id: JobId) -> Result<bool, QueueError> {
        let added: i64 = self.run(|conn| {
            Script::new(ENQUEUE)
                .key(&self.ready_key)
                .key(&self.members_key)
                .arg(id.to_string())
                .invoke(conn)
        })?;
        Ok(added == 1)
    }

    fn try_dequeue(&self, worker: &str) -> Result<Option<Lease>, QueueError> {
        let token = LeaseToken::new();
        let popped: Option<(String, u32)> = self.run(|conn| {
            Script::new(DEQUEUE)
                .key(&self.ready_key)
                .key(&self.members_key)
                .key(&self.leases_key)
                .key(&self.tokens_key)
                .key(&self.deliveries_key)
                .arg(now_ms())
                .arg(self.deadline_ms())
                .arg(token.to_string())
                .invoke(conn)
        })?;

        let Some((raw_id, deliveries)) = popped else {
            return Ok(None);
        };
        let job_id: JobId = raw_id.parse().map_err(queue_err)?;
        if deliveries > 1 {
            warn!(queue = %self.name, job_id = %job_id, deliveries, "redelivering job");
        }

        Ok(Some(Lease {
            job_id,
            token,
            worker: worker.to_string(),
            deliveries,
        }))
    }

    fn heartbeat(&self, lease: &Lease) -> Result<(), QueueError> {
        self.lease_script(
            HEARTBEAT,
            &[self.leases_key.as_str(), self.tokens_key.as_str()],
            lease,
            Some(self.deadline_ms()),
        )
    }

    fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        self.lease_script(
            ACK,
            &[
                self.leases_key.as_str(),
                self.tokens_key.as_str(),
                self.members_key.as_str(),
                self.deliveries_key.as_str(),
            ],
            lease,
            None,
        )
    }

    fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        self.lease_script(
            RELEASE,
            &[self.leases_key.as_str(), self.tokens_key.as_str(), self.ready_key.as_str()],
            lease,
            None,
        )
    }

    fn remove(&self, id: JobId) -> Result<bool, QueueError> {
        let removed: i64 = self.run(|conn| {
            Script::new(REMOVE)
                .key(&self.ready_key)
                .key(&self.members_key)
                .key(&self.deliveries_key)
                .arg(id.to_string())
                .invoke(conn)
        })?;
        Ok(removed > 0)
    }

    fn len(&self) -> Result<usize, QueueError> {
        self.run(|conn| redis::cmd("LLEN").arg(&self.ready_key).query(conn))
    }
}

const JOB_INDEX_KEY: &str = "mlq:jobs";

/// Redis job record store (one JSON string per job).
#[derive(Debug, Clone)]
pub struct RedisJobStore {
    pool: Arc<ConnectionPool>,
}

impl RedisJobStore {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, JobStoreError> {
        let pool = ConnectionPool::open(redis_url.as_ref()).map_err(store_err)?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn run<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, JobStoreError> {
        self.pool.with_connection(f).map_err(store_err)
    }

    fn key(id: JobId) -> String {
        format!("mlq:job:{id}")
    }
}

impl JobStore for RedisJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id()), err)]
    fn insert(&self, job: Job) -> Result<bool, JobStoreError> {
        let payload = serde_json::to_string(&job).map_err(store_err)?;
        self.run(|conn| {
            let created: Option<String> = redis::cmd("SET")
                .arg(Self::key(job.id()))
                .arg(&payload)
                .arg("NX")
                .query(conn)?;
            if created.is_none() {
                return Ok(false);
            }
            redis::cmd("SADD")
                .arg(JOB_INDEX_KEY)
                .arg(job.id().to_string())
                .query::<i64>(conn)?;
            Ok(true)
        })
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let raw: Option<String> = self.run(|conn| redis::cmd("GET").arg(Self::key(id)).query(conn))?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(store_err))
            .transpose()
    }

    fn modify(
        &self,
        id: JobId,
        f: &mut dyn FnMut(&mut Job) -> DomainResult<()>,
    ) -> Result<Job, JobStoreError> {
        let key = Self::key(id);

        // Optimistic WATCH/MULTI loop: the transition is re-evaluated against
        // the fresh record whenever a concurrent writer wins. The outer result
        // carries Redis errors, the inner one everything else.
        self.run(|conn| loop {
            redis::cmd("WATCH").arg(&key).query::<()>(conn)?;

            let raw: Option<String> = redis::cmd("GET").arg(&key).query(conn)?;
            let mut job: Job = match raw.as_deref().map(serde_json::from_str::<Job>) {
                Some(Ok(job)) => job,
                Some(Err(e)) => {
                    redis::cmd("UNWATCH").query::<()>(conn)?;
                    return Ok(Err(store_err(e)));
                }
                None => {
                    redis::cmd("UNWATCH").query::<()>(conn)?;
                    return Ok(Err(JobStoreError::NotFound(id)));
                }
            };
            if let Err(e) = f(&mut job) {
                redis::cmd("UNWATCH").query::<()>(conn)?;
                return Ok(Err(e.into()));
            }

            let payload = match serde_json::to_string(&job) {
                Ok(payload) => payload,
                Err(e) => {
                    redis::cmd("UNWATCH").query::<()>(conn)?;
                    return Ok(Err(store_err(e)));
                }
            };
            let committed: Option<(String,)> = redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(&key)
                .arg(&payload)
                .query(conn)?;
            if committed.is_some() {
                return Ok(Ok(job));
            }
        })?
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let raws: Vec<Option<String>> = self.run(|conn| {
            let ids: Vec<String> = redis::cmd("SMEMBERS").arg(JOB_INDEX_KEY).query(conn)?;
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let keys: Vec<String> = ids.iter().map(|id| format!("mlq:job:{id}")).collect();
            redis::cmd("MGET").arg(&keys).query(conn)
        })?;

        let mut stats = JobStats::default();
        for raw in raws.into_iter().flatten() {
            let job: Job = serde_json::from_str(&raw).map_err(store_err)?;
            stats.record(job.state());
        }
        Ok(stats)
    }
}
