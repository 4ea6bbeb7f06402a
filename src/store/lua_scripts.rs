/// Lua script for atomic increment with first-write expiry
///
/// The expiry is set only on the transition to 1, so later increments in the
/// same window never extend it.
///
/// KEYS[1] = the counter key
/// ARGV[1] = TTL in milliseconds
///
/// Returns: [value after increment, remaining TTL in milliseconds]
pub const INCR_WITH_TTL_SCRIPT: &str = r#"
local v = redis.call('INCR', KEYS[1])
if v == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {v, ttl}
"#;

