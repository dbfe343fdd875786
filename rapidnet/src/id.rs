use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

static NEXT_ENDPOINT_ID: AtomicI64 = AtomicI64::new(1);

/// Identifies one server listener or one client dialer within the process.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EndpointId(i64);

impl EndpointId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Allocate an endpoint ID that no other endpoint in this process has used.
    pub fn next() -> Self {
        Self(NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Identifies a single connection. Unique within the process for as long as
/// endpoint IDs are allocated with [`EndpointId::next`].
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConnectionId(EndpointId, i64);

impl ConnectionId {
    pub const fn new(endpoint: EndpointId, local: i64) -> Self {
        Self(endpoint, local)
    }

    pub fn endpoint(&self) -> EndpointId {
        self.0
    }

    pub fn local(&self) -> i64 {
        self.1
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0 .0, self.1)
    }
}

/// Sequential ID allocator for the connections of one endpoint.
#[derive(Debug)]
pub struct ConnectionIdGenerator {
    endpoint: EndpointId,
    next: AtomicI64,
}

impl ConnectionIdGenerator {
    pub fn new(endpoint: EndpointId, start: i64) -> Self {
        Self {
            endpoint,
            next: AtomicI64::new(start),
        }
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.endpoint, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids() {
        let generator = ConnectionIdGenerator::new(EndpointId::new(7), 1);
        let first = generator.next();
        let second = generator.next();

        assert_eq!(first, ConnectionId::new(EndpointId::new(7), 1));
        assert_eq!(second.local(), 2);
        assert_eq!(second.endpoint().value(), 7);
        assert_eq!(second.to_string(), "7:2");
    }

    #[test]
    fn endpoints_are_distinct() {
        assert_ne!(EndpointId::next(), EndpointId::next());
    }
}
