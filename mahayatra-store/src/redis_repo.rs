use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mahayatra_core::{
    Bus, BusId, Hold, LockAttempt, LockError, LockGrant, LockResult, ReleaseReport, SeatStore, SessionId,
};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::collections::HashSet;
use tracing::{debug, info, warn};

// Seat hold values are "session|expires_ms". A hold whose expiry is <= the
// caller's now is absent, even if Redis has not evicted the key yet.
const HOLDER_FN: &str = r#"
local function holder(raw, now)
    if not raw then return nil end
    local sep = string.find(raw, '|', 1, true)
    if not sep then return nil end
    local expires = tonumber(string.sub(raw, sep + 1))
    if not expires or expires <= now then return nil end
    return string.sub(raw, 1, sep - 1)
end
"#;

// KEYS: booked set, session index, seat keys...
// ARGV: session, now_ms, expires_ms, ttl_ms, max_held, seat key prefix, seat numbers...
const LOCK_BODY: &str = r#"
local session = ARGV[1]
local now = tonumber(ARGV[2])
local prefix = ARGV[6]

local taken = {}
for i = 3, #KEYS do
    local seat = ARGV[i + 4]
    if redis.call('SISMEMBER', KEYS[1], seat) == 1 then
        table.insert(taken, seat)
    else
        local owner = holder(redis.call('GET', KEYS[i]), now)
        if owner and owner ~= session then
            table.insert(taken, seat)
        end
    end
end
if #taken > 0 then
    table.insert(taken, 1, 'UNAVAILABLE')
    return taken
end

local requested = {}
for i = 7, #ARGV do requested[ARGV[i]] = true end
local kept = 0
for _, seat in ipairs(redis.call('SMEMBERS', KEYS[2])) do
    if not requested[seat] then
        local owner = holder(redis.call('GET', prefix .. seat), now)
        if owner == session and redis.call('SISMEMBER', KEYS[1], seat) == 0 then
            kept = kept + 1
        else
            redis.call('SREM', KEYS[2], seat)
        end
    end
end
if kept + (#ARGV - 6) > tonumber(ARGV[5]) then
    return {'LIMIT'}
end

local value = session .. '|' .. ARGV[3]
for i = 3, #KEYS do
    redis.call('SET', KEYS[i], value, 'PX', ARGV[4])
    redis.call('SADD', KEYS[2], ARGV[i + 4])
end
redis.call('PEXPIRE', KEYS[2], ARGV[4])
return {'OK'}
"#;

// KEYS: session index, seat keys...
// ARGV: session, now_ms, seat numbers...
const RELEASE_BODY: &str = r#"
local released = {}
for i = 2, #KEYS do
    local raw = redis.call('GET', KEYS[i])
    if raw then
        local sep = string.find(raw, '|', 1, true)
        if sep and string.sub(raw, 1, sep - 1) == ARGV[1] then
            redis.call('DEL', KEYS[i])
            redis.call('SREM', KEYS[1], ARGV[i + 1])
            if holder(raw, tonumber(ARGV[2])) then
                table.insert(released, ARGV[i + 1])
            end
        end
    end
end
return released
"#;

// KEYS: booked set, session index, seat keys...
// ARGV: session, now_ms, seat numbers...
// Replies {'OK', expires_ms...} in seat order, or {'EXPIRED', seats...}.
const COMMIT_BODY: &str = r#"
local now = tonumber(ARGV[2])
local lapsed = {}
for i = 3, #KEYS do
    local seat = ARGV[i]
    local held = redis.call('SISMEMBER', KEYS[1], seat) == 0
        and holder(redis.call('GET', KEYS[i]), now) == ARGV[1]
    if not held then
        table.insert(lapsed, seat)
    end
end
if #lapsed > 0 then
    table.insert(lapsed, 1, 'EXPIRED')
    return lapsed
end

local consumed = {'OK'}
for i = 3, #KEYS do
    local raw = redis.call('GET', KEYS[i])
    local sep = string.find(raw, '|', 1, true)
    table.insert(consumed, string.sub(raw, sep + 1))
    redis.call('SADD', KEYS[1], ARGV[i])
    redis.call('DEL', KEYS[i])
    redis.call('SREM', KEYS[2], ARGV[i])
end
return consumed
"#;

// KEYS: booked set, then (seat key, session index) per hold.
// ARGV: now_ms, then (seat, session, expires_ms) per hold.
const REINSTATE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local held = {}
for j = 1, (#KEYS - 1) / 2 do
    local seat = ARGV[3 * j - 1]
    local expires = tonumber(ARGV[3 * j + 1])
    if redis.call('SREM', KEYS[1], seat) == 1 and expires > now then
        local ttl = expires - now
        redis.call('SET', KEYS[2 * j], ARGV[3 * j] .. '|' .. ARGV[3 * j + 1], 'PX', ttl)
        redis.call('SADD', KEYS[2 * j + 1], seat)
        if redis.call('PTTL', KEYS[2 * j + 1]) < ttl then
            redis.call('PEXPIRE', KEYS[2 * j + 1], ttl)
        end
        table.insert(held, seat)
    end
end
return held
"#;

// KEYS: booked set. ARGV: seat numbers...
const FREE_SCRIPT: &str = r#"
local freed = {}
for i = 1, #ARGV do
    if redis.call('SREM', KEYS[1], ARGV[i]) == 1 then
        table.insert(freed, ARGV[i])
    end
end
return freed
"#;

/// Set of every registered bus id.
const BUSES_KEY: &str = "buses";

fn bus_key(bus_id: &BusId) -> String {
    format!("bus:{}", bus_id)
}

fn booked_key(bus_id: &BusId) -> String {
    format!("bus:{}:booked", bus_id)
}

fn session_key(bus_id: &BusId, session: &SessionId) -> String {
    format!("bus:{}:holds:{}", bus_id, session)
}

fn seat_prefix(bus_id: &BusId) -> String {
    format!("seat:{}:", bus_id)
}

fn seat_key(bus_id: &BusId, seat_number: &str) -> String {
    format!("seat:{}:{}", bus_id, seat_number)
}

fn store_err(e: redis::RedisError) -> LockError {
    LockError::Store(e.to_string())
}

/// Parses a stored hold, dropping anything malformed or already lapsed at `now`.
fn parse_hold(raw: &str, now: DateTime<Utc>) -> Option<(SessionId, DateTime<Utc>)> {
    let (session, expires_ms) = raw.rsplit_once('|')?;
    let expires_at = DateTime::from_timestamp_millis(expires_ms.parse().ok()?)?;
    if expires_at <= now {
        return None;
    }
    Some((SessionId::parse(session).ok()?, expires_at))
}

/// Seat store shared between API instances through Redis.
///
/// The bus layout is written once as JSON. Live state is split into a set of
/// booked seat numbers and one key per held seat carrying a PX TTL, so Redis
/// evicts abandoned holds on its own. Every mutation runs as a Lua script and
/// is therefore atomic across all seats of the request.
#[derive(Clone)]
pub struct RedisSeatStore {
    conn: MultiplexedConnection,
    lock_script: Script,
    release_script: Script,
    commit_script: Script,
    reinstate_script: Script,
    free_script: Script,
}

impl RedisSeatStore {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis seat store");
        Ok(Self {
            conn,
            lock_script: Script::new(&format!("{}{}", HOLDER_FN, LOCK_BODY)),
            release_script: Script::new(&format!("{}{}", HOLDER_FN, RELEASE_BODY)),
            commit_script: Script::new(&format!("{}{}", HOLDER_FN, COMMIT_BODY)),
            reinstate_script: Script::new(REINSTATE_SCRIPT),
            free_script: Script::new(FREE_SCRIPT),
        })
    }

    async fn layout(&self, bus_id: &BusId) -> LockResult<Bus> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(bus_key(bus_id)).await.map_err(store_err)?;
        let raw = raw.ok_or_else(|| LockError::BusNotFound(bus_id.clone()))?;
        serde_json::from_str(&raw).map_err(|e| LockError::Store(format!("corrupt bus record {}: {}", bus_id, e)))
    }
}

#[async_trait]
impl SeatStore for RedisSeatStore {
    async fn insert_bus(&self, mut bus: Bus) -> LockResult<()> {
        for seat in &mut bus.seats {
            seat.free();
        }
        let json = serde_json::to_string(&bus).map_err(|e| LockError::Store(e.to_string()))?;

        let mut conn = self.conn.clone();
        let created: bool = conn.set_nx(bus_key(&bus.id), json).await.map_err(store_err)?;
        if !created {
            return Err(LockError::DuplicateBus(bus.id));
        }
        let _: () = conn.sadd(BUSES_KEY, bus.id.as_str()).await.map_err(store_err)?;
        Ok(())
    }

    async fn load_bus(&self, bus_id: &BusId, now: DateTime<Utc>) -> LockResult<Option<Bus>> {
        let mut bus = match self.layout(bus_id).await {
            Ok(bus) => bus,
            Err(LockError::BusNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut conn = self.conn.clone();
        let booked: HashSet<String> = conn.smembers(booked_key(bus_id)).await.map_err(store_err)?;
        let keys: Vec<String> = bus.seats.iter().map(|s| seat_key(bus_id, &s.seat_number)).collect();
        let holds: Vec<Option<String>> = if keys.is_empty() {
            Vec::new()
        } else {
            conn.mget(&keys).await.map_err(store_err)?
        };

        for (seat, hold) in bus.seats.iter_mut().zip(holds) {
            if booked.contains(&seat.seat_number) {
                seat.book();
            } else if let Some((session, expires_at)) = hold.as_deref().and_then(|raw| parse_hold(raw, now)) {
                seat.lock(session, expires_at);
            }
        }
        Ok(Some(bus))
    }

    async fn list_buses(&self, now: DateTime<Utc>) -> LockResult<Vec<Bus>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn.smembers(BUSES_KEY).await.map_err(store_err)?;
        ids.sort();

        let mut buses = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bus) = self.load_bus(&BusId::new(id), now).await? {
                buses.push(bus);
            }
        }
        Ok(buses)
    }

    async fn try_lock(&self, attempt: LockAttempt<'_>) -> LockResult<LockGrant> {
        let bus = self.layout(attempt.bus_id).await?;
        let unknown = bus.unknown_seats(attempt.seats);
        if !unknown.is_empty() {
            return Err(LockError::UnknownSeats(unknown));
        }

        let ttl_ms = (attempt.expires_at - attempt.now).num_milliseconds().max(1);
        let mut invocation = self.lock_script.prepare_invoke();
        invocation
            .key(booked_key(attempt.bus_id))
            .key(session_key(attempt.bus_id, attempt.session));
        for seat in attempt.seats {
            invocation.key(seat_key(attempt.bus_id, seat));
        }
        invocation
            .arg(attempt.session.as_str())
            .arg(attempt.now.timestamp_millis())
            .arg(attempt.expires_at.timestamp_millis())
            .arg(ttl_ms)
            .arg(attempt.max_held)
            .arg(seat_prefix(attempt.bus_id));
        for seat in attempt.seats {
            invocation.arg(seat.as_str());
        }

        let mut conn = self.conn.clone();
        let reply: Vec<String> = invocation.invoke_async(&mut conn).await.map_err(store_err)?;
        match reply.split_first() {
            Some((status, _)) if status == "OK" => Ok(LockGrant {
                bus_id: attempt.bus_id.clone(),
                session_id: attempt.session.clone(),
                seats: attempt.seats.to_vec(),
                expires_at: attempt.expires_at,
            }),
            Some((status, taken)) if status == "UNAVAILABLE" => Err(LockError::SeatUnavailable(taken.to_vec())),
            Some((status, _)) if status == "LIMIT" => Err(LockError::SeatLimitExceeded {
                limit: attempt.max_held,
            }),
            other => {
                warn!("Unexpected lock script reply: {:?}", other);
                Err(LockError::Store("unexpected lock script reply".to_string()))
            }
        }
    }

    async fn release(
        &self,
        bus_id: &BusId,
        seats: &[String],
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> LockResult<ReleaseReport> {
        self.layout(bus_id).await?;

        let mut invocation = self.release_script.prepare_invoke();
        invocation.key(session_key(bus_id, session));
        for seat in seats {
            invocation.key(seat_key(bus_id, seat));
        }
        invocation.arg(session.as_str()).arg(now.timestamp_millis());
        for seat in seats {
            invocation.arg(seat.as_str());
        }

        let mut conn = self.conn.clone();
        let released: Vec<String> = invocation.invoke_async(&mut conn).await.map_err(store_err)?;
        let skipped = seats.iter().filter(|s| !released.contains(s)).cloned().collect();
        debug!("Released {:?} on bus {} for {}", released, bus_id, session);
        Ok(ReleaseReport { released, skipped })
    }

    async fn commit_holds(
        &self,
        bus_id: &BusId,
        seats: &[String],
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> LockResult<Vec<Hold>> {
        let bus = self.layout(bus_id).await?;
        let unknown = bus.unknown_seats(seats);
        if !unknown.is_empty() {
            return Err(LockError::UnknownSeats(unknown));
        }

        let mut invocation = self.commit_script.prepare_invoke();
        invocation.key(booked_key(bus_id)).key(session_key(bus_id, session));
        for seat in seats {
            invocation.key(seat_key(bus_id, seat));
        }
        invocation.arg(session.as_str()).arg(now.timestamp_millis());
        for seat in seats {
            invocation.arg(seat.as_str());
        }

        let mut conn = self.conn.clone();
        let reply: Vec<String> = invocation.invoke_async(&mut conn).await.map_err(store_err)?;
        match reply.split_first() {
            Some((status, expiries)) if status == "OK" && expiries.len() == seats.len() => seats
                .iter()
                .zip(expiries)
                .map(|(seat, expires_ms)| -> LockResult<Hold> {
                    let expires_at = expires_ms
                        .parse::<i64>()
                        .ok()
                        .and_then(DateTime::from_timestamp_millis)
                        .ok_or_else(|| LockError::Store(format!("corrupt hold expiry for seat {}", seat)))?;
                    Ok(Hold {
                        bus_id: bus_id.clone(),
                        seat_number: seat.clone(),
                        session_id: session.clone(),
                        expires_at,
                    })
                })
                .collect(),
            Some((status, lapsed)) if status == "EXPIRED" => Err(LockError::HoldExpired(lapsed.to_vec())),
            other => {
                warn!("Unexpected commit script reply: {:?}", other);
                Err(LockError::Store("unexpected commit script reply".to_string()))
            }
        }
    }

    async fn reinstate_holds(&self, bus_id: &BusId, holds: &[Hold], now: DateTime<Utc>) -> LockResult<Vec<String>> {
        self.layout(bus_id).await?;
        if holds.is_empty() {
            return Ok(Vec::new());
        }

        let mut invocation = self.reinstate_script.prepare_invoke();
        invocation.key(booked_key(bus_id));
        for hold in holds {
            invocation
                .key(seat_key(bus_id, &hold.seat_number))
                .key(session_key(bus_id, &hold.session_id));
        }
        invocation.arg(now.timestamp_millis());
        for hold in holds {
            invocation
                .arg(hold.seat_number.as_str())
                .arg(hold.session_id.as_str())
                .arg(hold.expires_at.timestamp_millis());
        }

        let mut conn = self.conn.clone();
        let held: Vec<String> = invocation.invoke_async(&mut conn).await.map_err(store_err)?;
        debug!("Reinstated {:?} on bus {}", held, bus_id);
        Ok(held)
    }

    async fn free_seats(&self, bus_id: &BusId, seats: &[String]) -> LockResult<Vec<String>> {
        self.layout(bus_id).await?;

        let mut invocation = self.free_script.prepare_invoke();
        invocation.key(booked_key(bus_id));
        for seat in seats {
            invocation.arg(seat.as_str());
        }

        let mut conn = self.conn.clone();
        invocation.invoke_async(&mut conn).await.map_err(store_err)
    }
}
