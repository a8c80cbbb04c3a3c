use uuid::Uuid;

/// All identifiers in this system are opaque 128-bit hex strings (a UUIDv4
/// rendered without dashes), never sequential integers — every entity is
/// user-scoped and ids must not leak ordering or count.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_32_hex_chars() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn new_id_is_unique() {
        assert_ne!(new_id(), new_id());
    }
}
