use std::future::{ready, Ready};
use std::str::FromStr;
use std::sync::OnceLock;

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{post, web, FromRequest, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Settings;

const PBKDF2_ROUNDS: u32 = 100_000;
const HASH_LEN: usize = 32;

// Admin password hash, derived on the first login attempt rather than at
// startup so a slow KDF never delays boot.
static ADMIN_HASH: OnceLock<[u8; HASH_LEN]> = OnceLock::new();

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Fold-XOR comparison over equal-length byte slices; runtime does not depend
/// on where the first difference sits.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn derive_password_hash(password: &str, username: &str) -> [u8; HASH_LEN] {
    // Single-analyst bootstrap model: the salt only needs to differ per
    // identity, not per record.
    let salt = format!("argus-bridge::{}", username);
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), PBKDF2_ROUNDS, &mut out);
    out
}

fn verify_credentials(settings: &Settings, username: &str, password: &str) -> bool {
    // Constant-time username comparison over fixed-length digests prevents
    // username enumeration via timing.
    let submitted = Sha256::digest(username.as_bytes());
    let expected = Sha256::digest(settings.admin_username.as_bytes());
    let username_ok = ct_eq(submitted.as_slice(), expected.as_slice());

    let admin_hash =
        ADMIN_HASH.get_or_init(|| derive_password_hash(&settings.admin_password, &settings.admin_username));
    let candidate = derive_password_hash(password, &settings.admin_username);
    let password_ok = ct_eq(admin_hash, &candidate);

    username_ok && password_ok
}

fn signing_algorithm(settings: &Settings) -> Algorithm {
    Algorithm::from_str(&settings.algorithm).unwrap_or(Algorithm::HS256)
}

pub fn create_access_token(settings: &Settings, subject: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: subject.to_string(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::minutes(settings.access_token_expire_minutes)).timestamp(),
    };
    encode(
        &Header::new(signing_algorithm(settings)),
        &claims,
        &EncodingKey::from_secret(settings.secret_key.as_bytes()),
    )
}

pub fn decode_subject(settings: &Settings, token: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.secret_key.as_bytes()),
        &Validation::new(signing_algorithm(settings)),
    )?;
    Ok(data.claims.sub)
}

/// Reviewer identity extracted from a valid bearer token. Handlers take this
/// as an argument; the identity is never read from the request body.
pub struct AuthedAnalyst(pub String);

impl FromRequest for AuthedAnalyst {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let settings = match req.app_data::<web::Data<Settings>>() {
            Some(s) => s.get_ref().clone(),
            None => {
                return ready(Err(actix_web::error::ErrorInternalServerError(
                    "settings not configured",
                )))
            }
        };

        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")));

        match token.map(|t| decode_subject(&settings, t)) {
            Some(Ok(subject)) => ready(Ok(AuthedAnalyst(subject))),
            Some(Err(e)) => {
                log::warn!("[Auth] Rejected bearer token: {}", e);
                ready(Err(actix_web::error::ErrorUnauthorized(
                    "Could not validate credentials. Please log in.",
                )))
            }
            None => ready(Err(actix_web::error::ErrorUnauthorized(
                "Could not validate credentials. Please log in.",
            ))),
        }
    }
}

#[post("/auth/login")]
pub async fn login(settings: web::Data<Settings>, form: web::Form<LoginForm>) -> impl Responder {
    let LoginForm { username, password } = form.into_inner();

    if !verify_credentials(&settings, &username, &password) {
        log::warn!("[Auth] Failed login attempt for username: {:?}", username);
        return HttpResponse::Unauthorized()
            .insert_header(("WWW-Authenticate", "Bearer"))
            .json(serde_json::json!({ "error": "Incorrect username or password" }));
    }

    match create_access_token(&settings, &username) {
        Ok(token) => {
            log::info!("[Auth] Token issued for: {:?}", username);
            HttpResponse::Ok().json(serde_json::json!({
                "access_token": token,
                "token_type": "bearer",
                "expires_in": settings.access_token_expire_minutes * 60,
                "username": username,
            }))
        }
        Err(e) => {
            log::error!("[Auth] Token signing failed: {}", e);
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "token signing failed" }))
        }
    }
}
