//! Composite index-key encoding.
//!
//! Every variable-length component is length-prefixed (u16 BE) so prefix
//! scans can never bleed across component boundaries ("ab"+"c" vs "a"+"bc").
//! Timestamps are encoded sign-flipped so byte order equals numeric order.

use mnema_core::{EdgeId, FactId, Timestamp};

/// Owner column tag bytes. Global rows sort before tenant rows.
const OWNER_GLOBAL: u8 = 0x00;
const OWNER_TENANT: u8 = 0x01;

fn push_component(buf: &mut Vec<u8>, component: &str) {
    let bytes = component.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn push_owner(buf: &mut Vec<u8>, owner: &Option<String>) {
    match owner {
        None => buf.push(OWNER_GLOBAL),
        Some(id) => {
            buf.push(OWNER_TENANT);
            push_component(buf, id);
        }
    }
}

fn push_timestamp(buf: &mut Vec<u8>, ts: Timestamp) {
    buf.extend_from_slice(&((ts as u64) ^ (1 << 63)).to_be_bytes());
}

/// Scan prefix for all versions of one (owner, subject, predicate) key.
pub fn fact_spo_prefix(owner: &Option<String>, subject: &str, predicate: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + subject.len() + predicate.len());
    push_owner(&mut buf, owner);
    push_component(&mut buf, subject);
    push_component(&mut buf, predicate);
    buf
}

/// Full index key for one fact version. Versions for the same key sort by
/// `valid_from` ascending, then id for total order.
pub fn fact_spo_key(
    owner: &Option<String>,
    subject: &str,
    predicate: &str,
    valid_from: Timestamp,
    id: &FactId,
) -> Vec<u8> {
    let mut buf = fact_spo_prefix(owner, subject, predicate);
    push_timestamp(&mut buf, valid_from);
    buf.extend_from_slice(id.as_bytes());
    buf
}

/// Scan prefix for all versions of one (owner, source, target, relation) edge.
pub fn edge_identity_prefix(
    owner: &Option<String>,
    source_id: &FactId,
    target_id: &FactId,
    relation_type: &str,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(40 + relation_type.len());
    push_owner(&mut buf, owner);
    buf.extend_from_slice(source_id.as_bytes());
    buf.extend_from_slice(target_id.as_bytes());
    push_component(&mut buf, relation_type);
    buf
}

/// Full index key for one edge version.
pub fn edge_identity_key(
    owner: &Option<String>,
    source_id: &FactId,
    target_id: &FactId,
    relation_type: &str,
    valid_from: Timestamp,
    id: &EdgeId,
) -> Vec<u8> {
    let mut buf = edge_identity_prefix(owner, source_id, target_id, relation_type);
    push_timestamp(&mut buf, valid_from);
    buf.extend_from_slice(id.as_bytes());
    buf
}

/// Membership key in the by-source (or by-target) edge index.
pub fn edge_endpoint_key(endpoint: &FactId, id: &EdgeId) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    buf.extend_from_slice(endpoint.as_bytes());
    buf.extend_from_slice(id.as_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_prevents_component_bleed() {
        // ("ab", "c") and ("a", "bc") must produce distinct prefixes.
        let ab_c = fact_spo_prefix(&None, "ab", "c");
        let a_bc = fact_spo_prefix(&None, "a", "bc");
        assert_ne!(ab_c, a_bc);
        assert!(!ab_c.starts_with(&a_bc));
    }

    #[test]
    fn global_and_tenant_prefixes_are_disjoint() {
        let global = fact_spo_prefix(&None, "s", "p");
        let tenant = fact_spo_prefix(&Some("u1".into()), "s", "p");
        assert!(!tenant.starts_with(&global));
        assert!(!global.starts_with(&tenant));
    }

    #[test]
    fn version_keys_sort_by_valid_from() {
        let id = FactId::generate();
        let early = fact_spo_key(&None, "s", "p", -5, &id);
        let mid = fact_spo_key(&None, "s", "p", 0, &id);
        let late = fact_spo_key(&None, "s", "p", 1_000_000, &id);
        assert!(early < mid);
        assert!(mid < late);
    }

    #[test]
    fn version_keys_share_the_scan_prefix() {
        let key = fact_spo_key(&Some("u1".into()), "s", "p", 42, &FactId::generate());
        assert!(key.starts_with(&fact_spo_prefix(&Some("u1".into()), "s", "p")));
    }
}
