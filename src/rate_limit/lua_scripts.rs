/// Lua script for counter increment with first-write expiry
///
/// The counter gets its TTL only when the increment creates it, so later
/// requests in the same window never push the expiry out.
///
/// KEYS[1] = the counter key
/// ARGV[1] = ttl (milliseconds)
///
/// Returns: post-increment value
pub const INCREMENT_WITH_EXPIRY_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])

if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
elseif redis.call('PTTL', KEYS[1]) == -1 then
    -- Counter survived without an expiry (e.g. a failed PEXPIRE); bound it now
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end

return current
"#;

/// Lua script for token bucket rate limiting in Redis
///
/// Runs the whole refill-then-consume step server-side so concurrent callers
/// never both observe the bucket before the other's write. The arithmetic
/// matches `bucket::refill_and_consume` exactly.
///
/// KEYS[1] = the bucket key
/// ARGV[1] = current timestamp (milliseconds)
/// ARGV[2] = refill rate (tokens per second)
/// ARGV[3] = maximum tokens (capacity)
/// ARGV[4] = window duration (milliseconds)
/// ARGV[5] = bucket ttl (milliseconds)
///
/// Returns: [limited (0/1), remaining tokens, reset_at (epoch ms)]
pub const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local max_tokens = tonumber(ARGV[3])
local window = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local state = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(state[1])
local last_refill = tonumber(state[2])

-- A missing bucket is full and starts its refill clock now
if tokens == nil or last_refill == nil then
    tokens = max_tokens
    last_refill = now
end

local elapsed = math.max(0, now - last_refill) / 1000
local new_tokens = math.min(max_tokens, tokens + math.floor(elapsed * refill_rate))

-- Only advance the refill clock when whole tokens were added
if new_tokens > tokens then
    last_refill = now
end

if new_tokens >= 1 then
    local left = new_tokens - 1
    redis.call('HSET', key, 'tokens', left, 'last_refill', last_refill)
    redis.call('PEXPIRE', key, ttl)
    return {0, math.floor(left), now + window}
end

redis.call('HSET', key, 'tokens', new_tokens, 'last_refill', last_refill)
redis.call('PEXPIRE', key, ttl)

return {1, 0, now + math.ceil((1 - tokens) * (1000 / refill_rate))}
"#;
