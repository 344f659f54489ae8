//! Reconnection tokens - HMAC-signed (room, player) pairs issued at join

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::game::PlayerId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Malformed session token")]
    Malformed,

    #[error("Invalid session token signature")]
    InvalidSignature,

    #[error("Invalid session secret")]
    InvalidSecret,
}

/// Who a verified token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClaims {
    pub room_id: Uuid,
    pub player_id: PlayerId,
}

/// Issues and verifies `room.player.signature` tokens
#[derive(Clone)]
pub struct SessionSigner {
    secret: Vec<u8>,
}

impl SessionSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256, SessionError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| SessionError::InvalidSecret)?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    pub fn issue(&self, room_id: Uuid, player_id: PlayerId) -> Result<String, SessionError> {
        let payload = format!("{}.{}", room_id, player_id);
        let signature = hex::encode(self.mac(&payload)?.finalize().into_bytes());
        Ok(format!("{}.{}", payload, signature))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let mut parts = token.split('.');
        let (Some(room), Some(player), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SessionError::Malformed);
        };

        let room_id = Uuid::parse_str(room).map_err(|_| SessionError::Malformed)?;
        let player_id = Uuid::parse_str(player).map_err(|_| SessionError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| SessionError::Malformed)?;

        self.mac(&format!("{}.{}", room, player))?
            .verify_slice(&signature)
            .map_err(|_| SessionError::InvalidSignature)?;

        Ok(SessionClaims { room_id, player_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify() {
        let signer = SessionSigner::new("secret");
        let room = Uuid::new_v4();
        let player = Uuid::new_v4();
        let token = signer.issue(room, player).unwrap();

        assert_eq!(
            signer.verify(&token).unwrap(),
            SessionClaims { room_id: room, player_id: player }
        );
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let signer = SessionSigner::new("secret");
        let token = signer.issue(Uuid::new_v4(), Uuid::new_v4()).unwrap();

        let other = SessionSigner::new("another");
        assert_eq!(other.verify(&token), Err(SessionError::InvalidSignature));

        let swapped = format!("{}.{}.{}", Uuid::new_v4(), Uuid::new_v4(), token.rsplit('.').next().unwrap());
        assert_eq!(signer.verify(&swapped), Err(SessionError::InvalidSignature));
        assert_eq!(signer.verify("not-a-token"), Err(SessionError::Malformed));
    }
}
