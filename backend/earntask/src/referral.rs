//! Referral codes and their resolution at registration time.

use rand::Rng;
use sqlx::SqliteConnection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::Result;

/// Unambiguous characters only (no 0/O, 1/I).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 8;

/// Canonical form of a user-typed code; `None` for blank input.
pub fn normalize_code(code: &str) -> Option<String> {
    let code = code.trim();
    if code.is_empty() {
        None
    } else {
        Some(code.to_uppercase())
    }
}

/// A fresh random code. Uniqueness is checked by the caller against the store.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Look up the referrer for `code`.
///
/// Unknown codes are not an error: the referral is optional and silently
/// dropped. A code that resolves to `new_account_id` itself is treated as
/// no referrer.
pub async fn resolve_referral(
    conn: &mut SqliteConnection,
    code: &str,
    new_account_id: Uuid,
) -> Result<Option<Uuid>> {
    let Some(code) = normalize_code(code) else {
        return Ok(None);
    };

    let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM accounts WHERE referral_code = ?1")
        .bind(&code)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        None => {
            debug!("referral code {code} not found, ignoring");
            Ok(None)
        }
        Some((referrer,)) if referrer == new_account_id => {
            warn!(%new_account_id, "self-referral ignored");
            Ok(None)
        }
        Some((referrer,)) => Ok(Some(referrer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{register_user, test_pool};

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize_code("  ab12cd34 ").as_deref(), Some("AB12CD34"));
        assert_eq!(normalize_code("   "), None);
        assert_eq!(normalize_code(""), None);
    }

    #[test]
    fn generated_codes_use_alphabet() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
            assert_eq!(normalize_code(&code).as_deref(), Some(code.as_str()));
        }
    }

    #[tokio::test]
    async fn resolves_case_insensitively() {
        let pool = test_pool().await;
        let referrer = register_user(&pool, "owner@example.com").await;
        let mut conn = pool.acquire().await.unwrap();

        let lower = referrer.referral_code.to_lowercase();
        let resolved = resolve_referral(&mut conn, &lower, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(resolved, Some(referrer.id));
    }

    #[tokio::test]
    async fn unknown_and_self_referrals_resolve_to_none() {
        let pool = test_pool().await;
        let referrer = register_user(&pool, "self@example.com").await;
        let mut conn = pool.acquire().await.unwrap();

        let unknown = resolve_referral(&mut conn, "NOPE2345", Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(unknown, None);

        let own = resolve_referral(&mut conn, &referrer.referral_code, referrer.id)
            .await
            .unwrap();
        assert_eq!(own, None);
    }
}
