//! Shared identifier types.

use uuid::Uuid;

pub type UserId = Uuid;
pub type EnvironmentId = Uuid;
pub type ReservationId = Uuid;

/// Shorten a UUID for log fields (first group only).
pub fn abbrev_uuid(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap();
        assert_eq!(abbrev_uuid(&id), "a1b2c3d4");
    }
}
