use cadence_core::ScheduleKey;
use sha2::{Digest, Sha256};

/// Rule engines commonly cap names at 64 characters.
const MAX_NAME_LEN: usize = 64;
const HASH_LEN: usize = 8;

/// Deterministic rule name for `key`: `{prefix}-{tenant}-{sync_type}-{hash}`.
///
/// The tenant part is lowercased, reduced to `[a-z0-9-]` and shortened to fit;
/// the hash covers the exact `(tenant_id, sync_type)` pair, so two tenants
/// that sanitize to the same text still get distinct names.
pub fn rule_name(prefix: &str, key: &ScheduleKey) -> String {
    let digest = Sha256::digest(format!("{}\n{}", key.tenant_id, key.sync_type).as_bytes());
    let encoded = hex::encode(digest);
    let hash = &encoded[..HASH_LEN];

    let prefix = sanitize(prefix);
    let sync_type = key.sync_type.as_str();
    // three separators: prefix-tenant-type-hash
    let fixed = prefix.len() + sync_type.len() + HASH_LEN + 3;
    let room = MAX_NAME_LEN.saturating_sub(fixed);

    let mut tenant = sanitize(&key.tenant_id);
    tenant.truncate(room);
    let tenant = tenant.trim_end_matches('-');

    if tenant.is_empty() {
        format!("{prefix}-{sync_type}-{hash}")
    } else {
        format!("{prefix}-{tenant}-{sync_type}-{hash}")
    }
}

/// Listing prefix matching every rule [`rule_name`] produces for `prefix`.
pub fn rule_prefix(prefix: &str) -> String {
    format!("{}-", sanitize(prefix))
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}
