//! Signed token claims for organizational actors and patient-scoped grants

use anyhow::{Result, anyhow};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use proto::Actor;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tonic::Status;
use tonic::metadata::MetadataMap;

/// Audience for ordinary actor tokens.
pub const ACTOR_AUDIENCE: &str = "medichain";

/// Audience for patient-scoped grant-authorization tokens.
pub const GRANT_AUDIENCE: &str = "medichain-grant";

/// JWT claims structure shared by actor and patient-scoped tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,   // Actor id (patient id for grant tokens)
    pub group: String, // Actor group label, e.g. "HOSPITAL"
    pub name: String,  // Display name
    pub exp: u64,      // Expiration timestamp
    pub iat: u64,      // Issued at timestamp
    pub aud: String,   // Audience
}

/// Authenticated identity extracted from a verified actor token
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub id: String,
    pub group: Actor,
    pub display_name: String,
}

impl AuthInfo {
    /// Check that the authenticated identity matches the given (group, id) pair.
    pub fn matches(&self, group: Actor, id: &str) -> bool {
        self.group == group && self.id == id
    }
}

/// Map an actor group label from token claims back to the proto enum.
pub fn actor_from_str(label: &str) -> Actor {
    match label {
        "PATIENT" => Actor::Patient,
        "HOSPITAL" => Actor::Hospital,
        "INSURANCE" => Actor::Insurance,
        "GOVERNMENT" => Actor::Government,
        "ADMIN" => Actor::Admin,
        _ => Actor::Unspecified,
    }
}

/// Label used for an actor group inside token claims.
pub fn actor_label(actor: Actor) -> &'static str {
    match actor {
        Actor::Patient => "PATIENT",
        Actor::Hospital => "HOSPITAL",
        Actor::Insurance => "INSURANCE",
        Actor::Government => "GOVERNMENT",
        Actor::Admin => "ADMIN",
        Actor::Unspecified => "UNSPECIFIED",
    }
}

fn now_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Verifies and mints tokens with a shared HS256 secret.
///
/// All services in one deployment share the same signing secret; per-actor
/// asymmetric keys are deliberately out of scope here.
#[derive(Clone)]
pub struct AuthVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Read the secret from the `AUTH_JWT_SECRET` environment variable.
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("AUTH_JWT_SECRET")
            .map_err(|_| anyhow!("AUTH_JWT_SECRET environment variable must be set"))?;
        if secret.is_empty() {
            return Err(anyhow!("AUTH_JWT_SECRET must not be empty"));
        }
        Ok(Self::new(&secret))
    }

    /// Create a signed actor token valid for `duration_secs`.
    pub fn create_actor_token(
        &self,
        id: &str,
        group: Actor,
        display_name: &str,
        duration_secs: u64,
    ) -> Result<String> {
        let now = now_secs()?;
        let claims = Claims {
            sub: id.to_string(),
            group: actor_label(group).to_string(),
            name: display_name.to_string(),
            exp: now + duration_secs,
            iat: now,
            aud: ACTOR_AUDIENCE.to_string(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    /// Verify an actor token and return the authenticated identity.
    pub fn verify_actor_token(&self, token: &str) -> Result<AuthInfo> {
        let claims = self.verify(token, ACTOR_AUDIENCE)?;
        let group = actor_from_str(&claims.group);
        if group == Actor::Unspecified {
            return Err(anyhow!("Unknown actor group in token: {}", claims.group));
        }
        Ok(AuthInfo {
            id: claims.sub,
            group,
            display_name: claims.name,
        })
    }

    /// Create a patient-scoped grant-authorization token.
    ///
    /// The token proves the patient authorized a specific grant request; it
    /// is not a general patient credential.
    pub fn create_patient_token(&self, patient_id: &str, duration_secs: u64) -> Result<String> {
        let now = now_secs()?;
        let claims = Claims {
            sub: patient_id.to_string(),
            group: actor_label(Actor::Patient).to_string(),
            name: String::new(),
            exp: now + duration_secs,
            iat: now,
            aud: GRANT_AUDIENCE.to_string(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    /// Verify a patient-scoped token and return its subject (the patient id).
    pub fn verify_patient_token(&self, token: &str) -> Result<String> {
        let claims = self.verify(token, GRANT_AUDIENCE)?;
        Ok(claims.sub)
    }

    fn verify(&self, token: &str, audience: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow!("Token verification failed: {}", e))?;
        Ok(data.claims)
    }

    /// Authenticate the caller from `authorization: Bearer <token>` metadata.
    pub fn authenticate(&self, metadata: &MetadataMap) -> Result<AuthInfo, Status> {
        let value = metadata
            .get("authorization")
            .ok_or_else(|| Status::unauthenticated("Missing authorization metadata"))?;
        let value = value
            .to_str()
            .map_err(|_| Status::unauthenticated("Invalid authorization metadata"))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| Status::unauthenticated("Authorization must be a Bearer token"))?;
        self.verify_actor_token(token)
            .map_err(|e| Status::unauthenticated(format!("Invalid token: {}", e)))
    }

    /// Require that the caller is the given (group, id) actor.
    pub fn require_actor(
        &self,
        metadata: &MetadataMap,
        group: Actor,
        id: &str,
    ) -> Result<AuthInfo, Status> {
        let info = self.authenticate(metadata)?;
        if !info.matches(group, id) {
            return Err(Status::permission_denied(
                "Caller identity does not match the requested actor",
            ));
        }
        Ok(info)
    }

    /// Require that the caller is an admin.
    pub fn require_super_admin(&self, metadata: &MetadataMap) -> Result<AuthInfo, Status> {
        let info = self.authenticate(metadata)?;
        if info.group != Actor::Admin {
            return Err(Status::permission_denied(
                "Only a super admin may perform this operation",
            ));
        }
        Ok(info)
    }
}
