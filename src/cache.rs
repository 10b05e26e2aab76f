//! In-flight request cache.
//!
//! Reply bodies omit the request-side parameters, so the gateway parks the
//! typed request here between publish and history insert. Entries are only
//! evicted after a successful insert; a failed insert leaves the entry in
//! place so a later reply for the same task can re-attempt.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::models::ScanRequest;

#[derive(Default)]
pub struct RequestCache {
    inner: Mutex<HashMap<String, ScanRequest>>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a request under its task id. A second registration for the
    /// same id overwrites and loses the older request.
    pub fn insert(&self, request: ScanRequest) {
        let task_id = request.task_id().to_string();
        self.inner.lock().insert(task_id, request);
    }

    pub fn get(&self, task_id: &str) -> Option<ScanRequest> {
        self.inner.lock().get(task_id).cloned()
    }

    pub fn remove(&self, task_id: &str) {
        self.inner.lock().remove(task_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArpRequest;

    fn arp(task_id: &str, range: &str) -> ScanRequest {
        ScanRequest::Arp(ArpRequest {
            task_id: task_id.into(),
            interface_name: "eth0".into(),
            ip_range: range.into(),
        })
    }

    #[test]
    fn test_insert_get_remove() {
        let cache = RequestCache::new();
        cache.insert(arp("t1", "10.0.0.0/30"));
        assert_eq!(cache.len(), 1);

        match cache.get("t1") {
            Some(ScanRequest::Arp(r)) => assert_eq!(r.ip_range, "10.0.0.0/30"),
            other => panic!("unexpected entry: {other:?}"),
        }

        cache.remove("t1");
        assert!(cache.get("t1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_second_registration_overwrites() {
        let cache = RequestCache::new();
        cache.insert(arp("t1", "10.0.0.0/30"));
        cache.insert(arp("t1", "192.168.1.0/24"));
        assert_eq!(cache.len(), 1);
        match cache.get("t1") {
            Some(ScanRequest::Arp(r)) => assert_eq!(r.ip_range, "192.168.1.0/24"),
            other => panic!("unexpected entry: {other:?}"),
        }
    }
}
