use std::env;

/// Which credential the backend connection is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialTier {
    /// Restricted credentials, used by the customer and inbox views.
    Restricted,
    /// Elevated credentials, used by the marketplace sync function.
    Service,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub service_database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub sync_marketplace_id: i64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let service_database_url = env::var("SERVICE_DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let sync_marketplace_id = env::var("SYNC_MARKETPLACE_ID")
            .ok()
            .and_then(|id| id.parse::<i64>().ok())
            .unwrap_or(2);
        Ok(Self {
            database_url,
            service_database_url,
            host,
            port,
            sync_marketplace_id,
        })
    }

    /// Connection string for the given tier. The service tier falls back to
    /// the restricted URL when no dedicated one is configured.
    pub fn url_for(&self, tier: CredentialTier) -> &str {
        match tier {
            CredentialTier::Restricted => &self.database_url,
            CredentialTier::Service => self
                .service_database_url
                .as_deref()
                .unwrap_or(&self.database_url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(service: Option<&str>) -> AppConfig {
        AppConfig {
            database_url: "postgres://anon@localhost/crm".into(),
            service_database_url: service.map(str::to_string),
            host: "127.0.0.1".into(),
            port: 3000,
            sync_marketplace_id: 2,
        }
    }

    #[test]
    fn service_tier_prefers_dedicated_url() {
        let cfg = config(Some("postgres://service@localhost/crm"));
        assert_eq!(
            cfg.url_for(CredentialTier::Service),
            "postgres://service@localhost/crm"
        );
        assert_eq!(
            cfg.url_for(CredentialTier::Restricted),
            "postgres://anon@localhost/crm"
        );
    }

    #[test]
    fn service_tier_falls_back_to_restricted_url() {
        let cfg = config(None);
        assert_eq!(
            cfg.url_for(CredentialTier::Service),
            "postgres://anon@localhost/crm"
        );
    }
}
