//! Per-drive nonce sequence state.

use serde::{Deserialize, Serialize};

use driftvault_common::{AuthId, DriveId, Error, Result};
use driftvault_crypto::nonce::{self, NONCE_SIZE};

/// Lifecycle of a nonce sequence.
///
/// `New → Active → Revoked`, strictly forward. A sequence is created `New`
/// (registered, no range yet), becomes `Active` once a range is authorized,
/// and `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Registered, no authorized range yet.
    New,
    /// Holds an authorized range and may allocate.
    Active,
    /// Terminal; allocation is permanently refused.
    Revoked,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::New => "New",
            Status::Active => "Active",
            Status::Revoked => "Revoked",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "New" => Ok(Status::New),
            "Active" => Ok(Status::Active),
            "Revoked" => Ok(Status::Revoked),
            other => Err(Error::Serialization(format!(
                "Unknown sequence status: {}",
                other
            ))),
        }
    }
}

/// The persisted sequencing state for one drive.
///
/// `next_nonce` is the next value to hand out; `max_nonce` is the exclusive
/// upper bound of the authorized range. Both are absent while the sequence
/// is `New`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceSequence {
    drive_id: DriveId,
    auth_id: AuthId,
    next_nonce: Option<[u8; NONCE_SIZE]>,
    max_nonce: Option<[u8; NONCE_SIZE]>,
    status: Status,
}

impl NonceSequence {
    /// Create a fresh sequence in the `New` state.
    pub fn new(drive_id: DriveId, auth_id: AuthId) -> Self {
        Self {
            drive_id,
            auth_id,
            next_nonce: None,
            max_nonce: None,
            status: Status::New,
        }
    }

    /// Rebuild a sequence from persisted fields.
    pub fn from_parts(
        drive_id: DriveId,
        auth_id: AuthId,
        next_nonce: Option<[u8; NONCE_SIZE]>,
        max_nonce: Option<[u8; NONCE_SIZE]>,
        status: Status,
    ) -> Self {
        Self {
            drive_id,
            auth_id,
            next_nonce,
            max_nonce,
            status,
        }
    }

    pub fn drive_id(&self) -> &DriveId {
        &self.drive_id
    }

    pub fn auth_id(&self) -> &AuthId {
        &self.auth_id
    }

    pub fn next_nonce(&self) -> Option<&[u8; NONCE_SIZE]> {
        self.next_nonce.as_ref()
    }

    pub fn max_nonce(&self) -> Option<&[u8; NONCE_SIZE]> {
        self.max_nonce.as_ref()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether the authorized range has been fully consumed.
    pub fn is_exhausted(&self) -> bool {
        match (self.next_nonce, self.max_nonce) {
            (Some(next), Some(max)) => nonce::to_u64(&next) >= nonce::to_u64(&max),
            _ => false,
        }
    }

    /// Authorize a range, activating the sequence.
    ///
    /// Allowed from `New`, and from `Active` only once the current range is
    /// exhausted; the new range must not step backwards, so nonces already
    /// handed out can never be re-issued.
    ///
    /// # Errors
    /// - `SequenceRevoked` on a revoked sequence
    /// - `SequenceInvalidState` for an empty range, for re-ranging an
    ///   active, non-exhausted sequence, or when the new range overlaps
    ///   nonces already issued
    pub fn authorize(&mut self, auth_id: AuthId, start: [u8; NONCE_SIZE], max: [u8; NONCE_SIZE]) -> Result<()> {
        if nonce::to_u64(&start) >= nonce::to_u64(&max) {
            return Err(Error::SequenceInvalidState(
                "Nonce range start must be below its upper bound".to_string(),
            ));
        }
        match self.status {
            Status::Revoked => {
                return Err(Error::SequenceRevoked(self.drive_id.to_string()));
            }
            Status::Active => {
                if !self.is_exhausted() {
                    return Err(Error::SequenceInvalidState(format!(
                        "Drive {} still holds an unexhausted range",
                        self.drive_id
                    )));
                }
                if let Some(next) = self.next_nonce {
                    if nonce::to_u64(&start) < nonce::to_u64(&next) {
                        return Err(Error::SequenceInvalidState(format!(
                            "New range for drive {} overlaps issued nonces",
                            self.drive_id
                        )));
                    }
                }
            }
            Status::New => {}
        }
        self.auth_id = auth_id;
        self.next_nonce = Some(start);
        self.max_nonce = Some(max);
        self.status = Status::Active;
        Ok(())
    }

    /// Lower the range's upper bound, surrendering the tail of the range
    /// (used when handing part of a range to another authority). The bound
    /// can never grow here; extension goes through re-authorization.
    ///
    /// # Errors
    /// - `SequenceRevoked` / `SequenceInvalidState` per lifecycle
    /// - `InvalidInput` when the new bound grows the range or falls below
    ///   `next_nonce`
    pub fn set_max_nonce(&mut self, max: [u8; NONCE_SIZE]) -> Result<()> {
        if self.status == Status::Revoked {
            return Err(Error::SequenceRevoked(self.drive_id.to_string()));
        }
        let (next, current_max) = match (self.next_nonce, self.max_nonce) {
            (Some(next), Some(max)) => (next, max),
            _ => {
                return Err(Error::SequenceInvalidState(format!(
                    "Drive {} has no active range",
                    self.drive_id
                )));
            }
        };
        let max_value = nonce::to_u64(&max);
        if max_value > nonce::to_u64(&current_max) || max_value < nonce::to_u64(&next) {
            return Err(Error::InvalidInput(
                "Upper bound can only shrink, and not below the next nonce".to_string(),
            ));
        }
        self.max_nonce = Some(max);
        Ok(())
    }

    /// Take the next nonce from the range, advancing the cursor.
    ///
    /// # Errors
    /// - `SequenceRevoked` / `SequenceInvalidState` per lifecycle
    /// - `RangeExceeded` once the range is exhausted
    pub fn allocate(&mut self) -> Result<[u8; NONCE_SIZE]> {
        match self.status {
            Status::Revoked => {
                return Err(Error::SequenceRevoked(self.drive_id.to_string()));
            }
            Status::New => {
                return Err(Error::SequenceInvalidState(format!(
                    "Drive {} has no authorized range",
                    self.drive_id
                )));
            }
            Status::Active => {}
        }
        let (next, max) = match (self.next_nonce, self.max_nonce) {
            (Some(next), Some(max)) => (next, max),
            _ => {
                return Err(Error::SequenceInvalidState(format!(
                    "Drive {} has no authorized range",
                    self.drive_id
                )));
            }
        };
        if nonce::to_u64(&next) >= nonce::to_u64(&max) {
            return Err(Error::RangeExceeded(format!(
                "Nonce range exhausted for drive {}",
                self.drive_id
            )));
        }
        self.next_nonce = Some(nonce::increase(&next, &max)?);
        Ok(next)
    }

    /// Permanently revoke the sequence.
    ///
    /// # Errors
    /// - `SequenceRevoked` if already revoked
    pub fn revoke(&mut self) -> Result<()> {
        if self.status == Status::Revoked {
            return Err(Error::SequenceRevoked(self.drive_id.to_string()));
        }
        self.status = Status::Revoked;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftvault_crypto::nonce::from_u64;

    fn seq() -> NonceSequence {
        NonceSequence::new(
            DriveId::new("drive-1").unwrap(),
            AuthId::new("auth-1").unwrap(),
        )
    }

    #[test]
    fn test_allocation_walks_range_then_exhausts() {
        let mut s = seq();
        s.authorize(AuthId::new("auth-1").unwrap(), from_u64(1), from_u64(4))
            .unwrap();

        assert_eq!(s.allocate().unwrap(), from_u64(1));
        assert_eq!(s.allocate().unwrap(), from_u64(2));
        assert_eq!(s.allocate().unwrap(), from_u64(3));
        assert!(matches!(s.allocate(), Err(Error::RangeExceeded(_))));
        // still exhausted on retry, not wrapped
        assert!(matches!(s.allocate(), Err(Error::RangeExceeded(_))));
    }

    #[test]
    fn test_allocate_requires_active_range() {
        let mut s = seq();
        assert!(matches!(
            s.allocate(),
            Err(Error::SequenceInvalidState(_))
        ));
    }

    #[test]
    fn test_reauthorize_only_after_exhaustion() {
        let mut s = seq();
        s.authorize(AuthId::new("a").unwrap(), from_u64(1), from_u64(3))
            .unwrap();
        // range still live
        assert!(matches!(
            s.authorize(AuthId::new("a").unwrap(), from_u64(10), from_u64(20)),
            Err(Error::SequenceInvalidState(_))
        ));

        s.allocate().unwrap();
        s.allocate().unwrap();
        assert!(s.is_exhausted());
        // stepping backwards would re-issue nonces
        assert!(matches!(
            s.authorize(AuthId::new("a").unwrap(), from_u64(1), from_u64(20)),
            Err(Error::SequenceInvalidState(_))
        ));
        s.authorize(AuthId::new("a").unwrap(), from_u64(3), from_u64(20))
            .unwrap();
        assert_eq!(s.allocate().unwrap(), from_u64(3));
    }

    #[test]
    fn test_revoked_is_terminal() {
        let mut s = seq();
        s.authorize(AuthId::new("a").unwrap(), from_u64(1), from_u64(100))
            .unwrap();
        s.revoke().unwrap();

        assert!(matches!(s.allocate(), Err(Error::SequenceRevoked(_))));
        assert!(matches!(
            s.authorize(AuthId::new("a").unwrap(), from_u64(200), from_u64(300)),
            Err(Error::SequenceRevoked(_))
        ));
        assert!(matches!(s.revoke(), Err(Error::SequenceRevoked(_))));
    }

    #[test]
    fn test_set_max_nonce_shrinks_range() {
        let mut s = seq();
        s.authorize(AuthId::new("a").unwrap(), from_u64(1), from_u64(100))
            .unwrap();
        s.set_max_nonce(from_u64(3)).unwrap();

        assert_eq!(s.allocate().unwrap(), from_u64(1));
        assert_eq!(s.allocate().unwrap(), from_u64(2));
        assert!(matches!(s.allocate(), Err(Error::RangeExceeded(_))));
    }

    #[test]
    fn test_set_max_nonce_cannot_grow_or_pass_next() {
        let mut s = seq();
        s.authorize(AuthId::new("a").unwrap(), from_u64(10), from_u64(20))
            .unwrap();
        assert!(s.set_max_nonce(from_u64(30)).is_err());
        assert!(s.set_max_nonce(from_u64(5)).is_err());
    }

    #[test]
    fn test_empty_range_rejected() {
        let mut s = seq();
        assert!(s
            .authorize(AuthId::new("a").unwrap(), from_u64(5), from_u64(5))
            .is_err());
    }

    #[test]
    fn test_status_round_trips_through_display() {
        for status in [Status::New, Status::Active, Status::Revoked] {
            let parsed: Status = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
