use crate::config::engine_config::SlugConfig;
use crate::utils::error::{RegistryError, Result};
use regex::Regex;
use std::future::Future;
use std::sync::LazyLock;

static DISALLOWED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").expect("slug pattern is valid"));
static REPEATED_HYPHENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{2,}").expect("slug pattern is valid"));

/// 將顯示名稱轉為 slug，並在唯一性範圍內找出第一個可用的變體
#[derive(Debug, Clone)]
pub struct SlugRules {
    min_length: usize,
    max_length: usize,
    max_probes: u32,
}

impl Default for SlugRules {
    fn default() -> Self {
        Self::from_config(&SlugConfig::default())
    }
}

impl SlugRules {
    pub fn from_config(config: &SlugConfig) -> Self {
        Self {
            min_length: config.min_length,
            max_length: config.max_length,
            max_probes: config.max_probes,
        }
    }

    pub fn canonicalize(&self, display_name: &str) -> Result<String> {
        let lowered: String = display_name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_whitespace() || c == '_' { '-' } else { c })
            .collect();

        let stripped = DISALLOWED_CHARS.replace_all(&lowered, "");
        let collapsed = REPEATED_HYPHENS.replace_all(&stripped, "-");
        let mut slug = collapsed.trim_matches('-').to_string();

        // 只剩 ASCII，可以直接以位元組截斷
        if slug.len() > self.max_length {
            slug.truncate(self.max_length);
            slug = slug.trim_end_matches('-').to_string();
        }

        if slug.len() < self.min_length {
            return Err(RegistryError::InvalidName {
                name: display_name.to_string(),
                reason: format!(
                    "canonical form '{}' is shorter than {} characters",
                    slug, self.min_length
                ),
            });
        }

        Ok(slug)
    }

    /// 第 n 個候選；n <= 1 即為 base 本身。加上後綴超過長度上限時以字元截短 base
    ///
    /// 截短後若什麼都不剩，回傳 `InvalidName`，不產生只有後綴的 slug。
    pub fn candidate(&self, base: &str, n: u32) -> Result<String> {
        if n <= 1 {
            return Ok(base.to_string());
        }

        let suffix = format!("-{}", n);
        let room = self.max_length.saturating_sub(suffix.len());
        let head = match base.char_indices().nth(room) {
            Some((cut, _)) => &base[..cut],
            None => base,
        }
        .trim_end_matches('-');

        if head.is_empty() {
            return Err(RegistryError::InvalidName {
                name: base.to_string(),
                reason: format!(
                    "no room for suffix '{}' within {} characters",
                    suffix, self.max_length
                ),
            });
        }
        Ok(format!("{}{}", head, suffix))
    }

    /// 依序嘗試 base, base-2, base-3 ... 直到 `exists` 回報未被使用
    ///
    /// 這只是讀取當下的判斷，真正的仲裁仍是儲存層的唯一性約束。
    pub async fn disambiguate<F, Fut>(&self, base: &str, mut exists: F) -> Result<String>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        if !exists(base.to_string()).await? {
            return Ok(base.to_string());
        }

        for n in 2..=self.max_probes.saturating_add(1) {
            let candidate = self.candidate(base, n)?;
            if !exists(candidate.clone()).await? {
                tracing::debug!("Slug '{}' taken, using '{}'", base, candidate);
                return Ok(candidate);
            }
        }

        Err(RegistryError::InvalidName {
            name: base.to_string(),
            reason: format!("no free variant after {} probes", self.max_probes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn taken(slugs: &[&str]) -> HashSet<String> {
        slugs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_canonicalize_display_names() {
        let rules = SlugRules::default();
        assert_eq!(rules.canonicalize("CodeOps Server").unwrap(), "codeops-server");
        assert_eq!(rules.canonicalize("  My--App!! ").unwrap(), "my-app");
        assert_eq!(rules.canonicalize("user_profile_API").unwrap(), "user-profile-api");
        assert_eq!(rules.canonicalize("Café Ordering v2").unwrap(), "caf-ordering-v2");
    }

    #[test]
    fn test_canonicalize_rejects_short_names() {
        let rules = SlugRules::default();
        let err = rules.canonicalize("!!!").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName { .. }));
        assert!(rules.canonicalize("a").is_err());
    }

    #[test]
    fn test_canonicalize_truncates_and_retrims() {
        let rules = SlugRules::from_config(&SlugConfig {
            min_length: 2,
            max_length: 8,
            max_probes: 10,
        });
        // "billing-" 截斷後尾端連字號需再去除
        assert_eq!(rules.canonicalize("Billing Gateway").unwrap(), "billing");
    }

    #[tokio::test]
    async fn test_disambiguate_returns_base_when_free() {
        let rules = SlugRules::default();
        let existing = taken(&["other"]);
        let slug = rules
            .disambiguate("x", |c| {
                let hit = existing.contains(&c);
                async move { Ok(hit) }
            })
            .await
            .unwrap();
        assert_eq!(slug, "x");
    }

    #[tokio::test]
    async fn test_disambiguate_tries_suffixes() {
        let rules = SlugRules::default();
        let existing = taken(&["x", "x-2", "x-3"]);
        let slug = rules
            .disambiguate("x", |c| {
                let hit = existing.contains(&c);
                async move { Ok(hit) }
            })
            .await
            .unwrap();
        assert_eq!(slug, "x-4");
    }

    #[tokio::test]
    async fn test_disambiguate_respects_max_length() {
        let rules = SlugRules::from_config(&SlugConfig {
            min_length: 2,
            max_length: 10,
            max_probes: 50,
        });
        let existing = taken(&["inventory", "inventor-2"]);
        let slug = rules
            .disambiguate("inventory", |c| {
                let hit = existing.contains(&c);
                async move { Ok(hit) }
            })
            .await
            .unwrap();
        assert_eq!(slug, "inventor-3");
        assert!(slug.len() <= 10);
    }

    #[tokio::test]
    async fn test_disambiguate_gives_up_after_max_probes() {
        let rules = SlugRules::from_config(&SlugConfig {
            min_length: 1,
            max_length: 63,
            max_probes: 3,
        });
        let result = rules.disambiguate("x", |_| async { Ok(true) }).await;
        assert!(matches!(result, Err(RegistryError::InvalidName { .. })));
    }

    #[tokio::test]
    async fn test_tiny_max_length_never_yields_bare_suffix() {
        let rules = SlugRules::from_config(&SlugConfig {
            min_length: 2,
            max_length: 2,
            max_probes: 5,
        });
        let result = rules.disambiguate("ab", |c| async move { Ok(c == "ab") }).await;
        assert!(matches!(result, Err(RegistryError::InvalidName { .. })));

        let rules = SlugRules::from_config(&SlugConfig {
            min_length: 2,
            max_length: 3,
            max_probes: 20,
        });
        let existing: HashSet<String> = ["abc".to_string()]
            .into_iter()
            .chain((2..10).map(|n| format!("a-{}", n)))
            .collect();
        let result = rules
            .disambiguate("abc", |c| {
                let hit = existing.contains(&c);
                async move { Ok(hit) }
            })
            .await;
        match result {
            Err(RegistryError::InvalidName { .. }) => {}
            other => panic!("expected InvalidName, got {other:?}"),
        }
        assert_eq!(rules.candidate("abc", 2).unwrap(), "a-2");
    }

    #[test]
    fn test_candidate_truncates_on_char_boundaries() {
        let rules = SlugRules::from_config(&SlugConfig {
            min_length: 2,
            max_length: 5,
            max_probes: 5,
        });
        assert_eq!(rules.candidate("café-bar", 2).unwrap(), "caf-2");
        assert_eq!(rules.candidate("日本語サービス", 3).unwrap(), "日本語-3");
    }

    proptest! {
        #[test]
        fn canonical_slugs_are_fixed_points(name in "[ -~]{0,80}") {
            let rules = SlugRules::default();
            if let Ok(slug) = rules.canonicalize(&name) {
                prop_assert_eq!(rules.canonicalize(&slug).unwrap(), slug.clone());
                prop_assert!(slug.len() <= 63);
                prop_assert!(!slug.starts_with('-') && !slug.ends_with('-'));
                prop_assert!(!slug.contains("--"));
            }
        }
    }
}
