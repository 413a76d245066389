use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An identity issued by the backend auth service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    /// Free-form `user_metadata`; the console only writes `display_name`.
    #[serde(default)]
    pub metadata: Value,
}

impl Principal {
    pub fn display_name(&self) -> String {
        self.metadata
            .get("display_name")
            .or_else(|| self.metadata.get("name"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.email.split('@').next().unwrap_or(&self.email).to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSession {
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub principal: Principal,
}

/// Session-change notifications pushed by the backend client.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    SignedOut,
    TokenRefreshed(AuthSession),
    UserUpdated(Principal),
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDisplayNameRequest {
    pub display_name: String,
}

/// Claims the console reads from an access token. The signature is the
/// backend's business; only the expiry is used locally.
#[derive(Debug, Deserialize)]
struct AccessClaims {
    exp: i64,
}

/// Expiry of a backend access token, if it is a readable JWT.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    use jsonwebtoken::{decode, DecodingKey, Validation};

    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    DateTime::from_timestamp(data.claims.exp, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    #[test]
    fn display_name_prefers_metadata() {
        let p = Principal {
            id: Uuid::new_v4(),
            email: "coach@sportiko.eu".into(),
            metadata: json!({ "display_name": "Coach Ana" }),
        };
        assert_eq!(p.display_name(), "Coach Ana");

        let p = Principal { metadata: Value::Null, ..p };
        assert_eq!(p.display_name(), "coach");
    }

    #[test]
    fn expiry_is_read_from_exp_claim() {
        let token = encode(
            &Header::default(),
            &json!({ "sub": "abc", "exp": 1_900_000_000, "aud": "authenticated" }),
            &EncodingKey::from_secret(b"backend-secret"),
        )
        .unwrap();
        let exp = token_expiry(&token).unwrap();
        assert_eq!(exp.timestamp(), 1_900_000_000);
    }

    #[test]
    fn opaque_tokens_have_no_expiry() {
        assert!(token_expiry("not-a-jwt").is_none());
    }
}
