use std::fmt;

use crate::error::AppError;

const ENV_URL: &str = "SUPABASE_URL";
const ENV_ANON_KEY: &str = "SUPABASE_ANON_KEY";
const ENV_ACCESS_TOKEN: &str = "SUPABASE_ACCESS_TOKEN";

/// Connection settings for the Supabase project backing the dashboard.
#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    /// Public client key; row access is governed by RLS, not by this secret.
    pub anon_key: String,
    /// Signed-in user's JWT. Requests fall back to the anon key without it.
    pub access_token: Option<String>,
}

impl fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &"<redacted>")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Resolve from compile-time values first, then the runtime environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = option_env!("SUPABASE_URL")
            .map(String::from)
            .or_else(|| lookup(ENV_URL))
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Config(format!("{ENV_URL} not configured")))?;
        let anon_key = option_env!("SUPABASE_ANON_KEY")
            .map(String::from)
            .or_else(|| lookup(ENV_ANON_KEY))
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Config(format!("{ENV_ANON_KEY} not configured")))?;

        url::Url::parse(&url).map_err(|e| AppError::Config(format!("{ENV_URL} is not a valid URL: {e}")))?;

        let mut config = Self::new(url, anon_key);
        config.access_token = lookup(ENV_ACCESS_TOKEN).filter(|v| !v.is_empty());
        Ok(config)
    }

    /// Token sent as `Authorization: Bearer`.
    pub fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_debug_redacts_keys() {
        let cfg = SupabaseConfig::new("https://x.supabase.co", "anon-secret").with_access_token("jwt");
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("anon-secret"));
        assert!(!dbg.contains("jwt\""));
        assert!(dbg.contains("x.supabase.co"));
    }

    #[test]
    fn test_bearer_prefers_access_token() {
        let cfg = SupabaseConfig::new("https://x.supabase.co/", "anon");
        assert_eq!(cfg.url, "https://x.supabase.co");
        assert_eq!(cfg.bearer(), "anon");
        assert_eq!(cfg.with_access_token("user-jwt").bearer(), "user-jwt");
    }

    // Compile-time values would shadow the lookup.
    #[test]
    fn test_from_lookup() {
        if option_env!("SUPABASE_URL").is_some() || option_env!("SUPABASE_ANON_KEY").is_some() {
            return;
        }
        let cfg = SupabaseConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_ACCESS_TOKEN", "tok"),
        ]))
        .unwrap();
        assert_eq!(cfg.bearer(), "tok");

        let err = SupabaseConfig::from_lookup(lookup(&[("SUPABASE_URL", "https://x.supabase.co")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = SupabaseConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "not a url"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
