use std::env;

/// Used when `BACKEND_URL` is absent: every call fails at runtime instead of
/// refusing to start.
pub const PLACEHOLDER_URL: &str = "https://placeholder.invalid";
pub const PLACEHOLDER_ANON_KEY: &str = "placeholder-anon-key";

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub anon_key: String,
    pub service_role_key: Option<String>,
    pub host: String,
    pub port: u16,
    pub superadmin_seed_email: String,
    pub trainer_seed_emails: Vec<String>,
    /// Grants an unrecognised principal a synthesized trainer profile.
    pub fallback_trainer_profile: bool,
    /// Tenant reads that the backend rejects are answered from fixtures.
    pub simulate_on_backend_error: bool,
    pub connectivity_probe_secs: u64,
    pub upload_max_bytes: usize,
    pub config_cache_path: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend_url = env::var("BACKEND_URL").ok().filter(|s| !s.is_empty());
        let anon_key = env::var("BACKEND_ANON_KEY").ok().filter(|s| !s.is_empty());
        if backend_url.is_none() || anon_key.is_none() {
            tracing::warn!("BACKEND_URL / BACKEND_ANON_KEY missing; using placeholders, backend calls will fail");
        }

        Ok(Self {
            backend_url: backend_url
                .unwrap_or_else(|| PLACEHOLDER_URL.into())
                .trim_end_matches('/')
                .to_string(),
            anon_key: anon_key.unwrap_or_else(|| PLACEHOLDER_ANON_KEY.into()),
            service_role_key: env::var("BACKEND_SERVICE_ROLE_KEY").ok().filter(|s| !s.is_empty()),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8787".into())
                .parse()?,
            superadmin_seed_email: env::var("SUPERADMIN_SEED_EMAIL")
                .unwrap_or_else(|_| "admin@sportiko.eu".into())
                .to_lowercase(),
            trainer_seed_emails: parse_list(
                &env::var("TRAINER_SEED_EMAILS").unwrap_or_else(|_| "trainer_pt@sportiko.eu".into()),
            ),
            fallback_trainer_profile: parse_flag("FALLBACK_TRAINER_PROFILE", false)?,
            simulate_on_backend_error: parse_flag("SIMULATE_ON_BACKEND_ERROR", true)?,
            connectivity_probe_secs: env::var("CONNECTIVITY_PROBE_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
            upload_max_bytes: env::var("UPLOAD_MAX_BYTES")
                .unwrap_or_else(|_| (5 * 1024 * 1024).to_string())
                .parse()?,
            config_cache_path: env::var("CONFIG_CACHE_PATH")
                .unwrap_or_else(|_| ".sportiko/connection.json".into()),
        })
    }

    pub fn is_placeholder(&self) -> bool {
        self.backend_url == PLACEHOLDER_URL || self.anon_key == PLACEHOLDER_ANON_KEY
    }

    /// Configuration for tests and tools that run against an in-process backend.
    pub fn local() -> Self {
        Self {
            backend_url: PLACEHOLDER_URL.into(),
            anon_key: PLACEHOLDER_ANON_KEY.into(),
            service_role_key: None,
            host: "127.0.0.1".into(),
            port: 8787,
            superadmin_seed_email: "admin@sportiko.eu".into(),
            trainer_seed_emails: vec!["trainer_pt@sportiko.eu".into()],
            fallback_trainer_profile: false,
            simulate_on_backend_error: true,
            connectivity_probe_secs: 30,
            upload_max_bytes: 5 * 1024 * 1024,
            config_cache_path: ".sportiko/connection.json".into(),
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_flag(key: &str, default: bool) -> anyhow::Result<bool> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow::anyhow!("Invalid boolean for {}: {}", key, v)),
        },
        _ => Ok(default),
    }
}
