//! URL slugs for articles.
//!
//! `generate_slug` is pure. `ensure_unique_slug` takes the lookup as a closure
//! so the same resolution loop runs against Postgres in handlers and against a
//! map in tests.

use lazy_static::lazy_static;
use regex::Regex;
use sqlx::PgPool;
use std::future::Future;
use uuid::Uuid;

use crate::error::AppError;

/// Suffixed candidates tried before falling back to a random suffix.
pub const MAX_SLUG_ATTEMPTS: u32 = 100;

/// Width of the `articles.slug` column.
pub const MAX_SLUG_LEN: usize = 255;

/// Longest suffix `ensure_unique_slug` appends: `-` plus 8 hex digits.
const MAX_SUFFIX_LEN: usize = 9;

lazy_static! {
    static ref DISALLOWED: Regex = Regex::new(r"[^a-z0-9 -]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref DASHES: Regex = Regex::new(r"-+").unwrap();
}

/// `"Hello, World!"` becomes `"hello-world"`. May return an empty string.
///
/// The result leaves room for any suffix `ensure_unique_slug` may add while
/// still fitting `MAX_SLUG_LEN`.
pub fn generate_slug(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = DISALLOWED.replace_all(&lowered, "");
    let dashed = WHITESPACE.replace_all(&stripped, "-");
    let collapsed = DASHES.replace_all(&dashed, "-");
    truncate_slug(collapsed.trim_matches('-'), MAX_SLUG_LEN - MAX_SUFFIX_LEN)
}

fn truncate_slug(slug: &str, max_len: usize) -> String {
    let cut = slug
        .char_indices()
        .map(|(idx, ch)| idx + ch.len_utf8())
        .take_while(|end| *end <= max_len)
        .last()
        .unwrap_or(0);
    slug[..cut].trim_end_matches('-').to_string()
}

/// Finds a free slug starting from `base`.
///
/// `lookup(candidate)` returns the id of the article holding `candidate`, if
/// any. A candidate held by `exclude_id` counts as free, so an article keeps
/// its own slug on update. Tries `base`, then `base-1` up to
/// `base-MAX_SLUG_ATTEMPTS`, then one random 8-hex suffix.
pub async fn ensure_unique_slug<F, Fut>(
    base: &str,
    exclude_id: Option<i32>,
    mut lookup: F,
) -> Result<String, AppError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Option<i32>, AppError>>,
{
    let is_free = |holder: Option<i32>| match holder {
        None => true,
        Some(id) => Some(id) == exclude_id,
    };

    if is_free(lookup(base.to_string()).await?) {
        return Ok(base.to_string());
    }

    for counter in 1..=MAX_SLUG_ATTEMPTS {
        let candidate = format!("{}-{}", base, counter);
        if is_free(lookup(candidate.clone()).await?) {
            return Ok(candidate);
        }
    }

    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    let candidate = format!("{}-{}", base, suffix);
    if is_free(lookup(candidate.clone()).await?) {
        log::warn!(
            "Slug '{}' exhausted {} suffixes, using random suffix",
            base,
            MAX_SLUG_ATTEMPTS
        );
        return Ok(candidate);
    }

    Err(AppError::Conflict(format!(
        "Could not find a free slug for '{}'",
        base
    )))
}

/// `ensure_unique_slug` against the `articles` table.
pub async fn unique_article_slug(
    pool: &PgPool,
    base: &str,
    exclude_id: Option<i32>,
) -> Result<String, AppError> {
    ensure_unique_slug(base, exclude_id, move |candidate| async move {
        let holder: Option<i32> = sqlx::query_scalar("SELECT id FROM articles WHERE slug = $1")
            .bind(candidate)
            .fetch_optional(pool)
            .await?;
        Ok::<_, AppError>(holder)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use std::collections::HashMap;

    async fn resolve(taken: &HashMap<String, i32>, base: &str, exclude: Option<i32>) -> String {
        ensure_unique_slug(base, exclude, |candidate| {
            let holder = taken.get(&candidate).copied();
            async move { Ok::<_, AppError>(holder) }
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_generate_slug() {
        assert_eq!(generate_slug("Hello, World!"), "hello-world");
        assert_eq!(generate_slug("  Rust   in  Production "), "rust-in-production");
        assert_eq!(generate_slug("C++ -- the good parts"), "c-the-good-parts");
        assert_eq!(generate_slug("Ünïcode Ωmega 2024"), "ncode-mega-2024");
        assert_eq!(generate_slug("!!!"), "");
    }

    #[actix_rt::test]
    async fn test_long_title_leaves_room_for_suffixes() {
        let title = "a".repeat(MAX_SLUG_LEN);
        let base = generate_slug(&title);
        assert_eq!(base.len(), MAX_SLUG_LEN - 9);

        let taken = HashMap::from([(base.clone(), 1)]);
        let second = resolve(&taken, &base, None).await;
        assert_eq!(second, format!("{}-1", base));
        assert!(second.len() <= MAX_SLUG_LEN);

        let fallback = ensure_unique_slug(&base, None, |candidate| {
            let prefix_len = base.len();
            async move {
                let suffix = candidate[prefix_len..].trim_start_matches('-');
                Ok::<_, AppError>((suffix.len() != 8).then_some(1))
            }
        })
        .await
        .unwrap();
        assert_eq!(fallback.len(), MAX_SLUG_LEN);
    }

    #[test]
    fn test_truncation_does_not_end_on_a_dash() {
        let title = format!("{} tail", "b".repeat(MAX_SLUG_LEN - 10));
        let slug = generate_slug(&title);
        assert_eq!(slug, "b".repeat(MAX_SLUG_LEN - 10));
        assert!(!slug.ends_with('-'));
    }

    #[actix_rt::test]
    async fn test_same_title_twice() {
        let mut taken = HashMap::new();

        let first = resolve(&taken, &generate_slug("Hello, World!"), None).await;
        assert_eq!(first, "hello-world");
        taken.insert(first, 1);

        let second = resolve(&taken, &generate_slug("Hello, World!"), None).await;
        assert_eq!(second, "hello-world-1");
        taken.insert(second, 2);

        assert_eq!(resolve(&taken, "hello-world", None).await, "hello-world-2");
    }

    #[actix_rt::test]
    async fn test_own_slug_is_kept() {
        let taken = HashMap::from([("hello-world".to_string(), 7)]);
        assert_eq!(resolve(&taken, "hello-world", Some(7)).await, "hello-world");
        assert_eq!(resolve(&taken, "hello-world", Some(8)).await, "hello-world-1");
    }

    #[actix_rt::test]
    async fn test_lookups_match_collisions() {
        let taken: HashMap<String, i32> = (0..5)
            .map(|n| {
                let slug = if n == 0 {
                    "post".to_string()
                } else {
                    format!("post-{}", n)
                };
                (slug, n + 1)
            })
            .collect();

        let calls = Cell::new(0);
        let slug = ensure_unique_slug("post", None, |candidate| {
            calls.set(calls.get() + 1);
            let holder = taken.get(&candidate).copied();
            async move { Ok::<_, AppError>(holder) }
        })
        .await
        .unwrap();

        assert_eq!(slug, "post-5");
        assert_eq!(calls.get(), 6);
    }

    #[actix_rt::test]
    async fn test_random_suffix_after_exhaustion() {
        let slug = ensure_unique_slug("busy", None, |candidate| async move {
            let suffix = candidate.trim_start_matches("busy").trim_start_matches('-');
            Ok::<_, AppError>((suffix.len() != 8).then_some(1))
        })
        .await
        .unwrap();

        let suffix = slug.strip_prefix("busy-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[actix_rt::test]
    async fn test_everything_taken_is_a_conflict() {
        let result = ensure_unique_slug("full", None, |_| async { Ok::<_, AppError>(Some(1)) }).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }
}
