use ulid::Ulid;

/// Well-known ID prefixes.
pub mod prefix {
    pub const CONNECTION: &str = "conn";
    pub const CALL: &str = "call";
}

/// Generates a new ULID-based ID with the given prefix.
///
/// ```
/// let id = realtime_common::id::prefixed_ulid("conn");
/// assert!(id.starts_with("conn_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// A fresh identifier for one live transport connection.
pub fn connection_id() -> String {
    prefixed_ulid(prefix::CONNECTION)
}

/// A fresh identifier for one call session.
pub fn call_id() -> String {
    prefixed_ulid(prefix::CALL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_ulid() {
        let id = connection_id();
        let ulid = id.strip_prefix("conn_").expect("connection prefix");
        assert_eq!(ulid.len(), 26);
        assert!(Ulid::from_string(ulid).is_ok());

        assert!(call_id().starts_with("call_"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(call_id(), call_id());
    }
}
