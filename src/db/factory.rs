//! Backend factory for dependency injection.
//!
//! A [`Backend`] bundles the administrative repositories and the site
//! connector as trait objects. Callers wire the bundle into the engine
//! and scheduler explicitly; there is no process-wide singleton.

use std::str::FromStr;
use std::sync::Arc;

use crate::config::AnalyticsConfig;
use crate::db::cache::CacheRepository;
use crate::db::connector::SiteConnector;
use crate::db::registry::SiteRegistry;
use crate::db::repositories::LocalBackend;
#[cfg(feature = "postgres-repo")]
use crate::db::repositories::{PostgresAdminRepository, PostgresSiteConnector, SitePoolConfig};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::indicators::catalog::IndicatorFlagStore;

/// Backend type configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Postgres + Diesel implementation
    Postgres,
    /// In-memory local backend
    Local,
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "local" => Ok(Self::Local),
            _ => Err(format!("Unknown backend type: {}", s)),
        }
    }
}

impl BackendType {
    /// Get backend type from environment.
    ///
    /// Reads `ANALYTICS_BACKEND`. Defaults to Postgres if
    /// `ADMIN_DATABASE_URL` is present, otherwise Local.
    pub fn from_env() -> Self {
        if let Ok(val) = std::env::var("ANALYTICS_BACKEND") {
            return val.parse().unwrap_or(Self::Local);
        }

        if std::env::var("ADMIN_DATABASE_URL").is_ok() {
            Self::Postgres
        } else {
            Self::Local
        }
    }
}

/// The wired set of storage services the engine and scheduler consume.
#[derive(Clone)]
pub struct Backend {
    pub registry: Arc<dyn SiteRegistry>,
    pub cache: Arc<dyn CacheRepository>,
    pub flags: Arc<dyn IndicatorFlagStore>,
    pub connector: Arc<dyn SiteConnector>,
}

/// Factory for creating backend instances.
///
/// # Example
/// ```ignore
/// use art_analytics::db::{Backend, BackendFactory, BackendType};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = BackendFactory::from_env().await?;
///     Ok(())
/// }
/// ```
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend based on type.
    ///
    /// # Arguments
    /// * `backend_type` - Type of backend to create
    /// * `config` - Configuration (required for Postgres)
    ///
    /// # Returns
    /// * `Ok(Backend)` - Wired backend bundle
    /// * `Err(ConfigurationError)` - If creation fails
    pub async fn create(
        backend_type: BackendType,
        config: Option<&AnalyticsConfig>,
    ) -> AnalyticsResult<Backend> {
        match backend_type {
            BackendType::Postgres => {
                #[cfg(feature = "postgres-repo")]
                {
                    let config = config.ok_or_else(|| {
                        AnalyticsError::configuration(
                            "Postgres backend requires admin and site database configuration",
                        )
                    })?;
                    Self::create_postgres(config).await
                }
                #[cfg(not(feature = "postgres-repo"))]
                {
                    let _ = config;
                    Err(AnalyticsError::configuration(
                        "Postgres backend feature not enabled",
                    ))
                }
            }
            BackendType::Local => Ok(Self::create_local()),
        }
    }

    /// Create an in-memory local backend.
    pub fn create_local() -> Backend {
        let local = LocalBackend::new();
        let connector = local.connector();
        Backend {
            registry: Arc::new(local.clone()),
            cache: Arc::new(local.clone()),
            flags: Arc::new(local),
            connector: Arc::new(connector),
        }
    }

    /// Create a Postgres backend.
    ///
    /// Runs pending administrative schema migrations, then wires the
    /// site connector against the registry.
    #[cfg(feature = "postgres-repo")]
    pub async fn create_postgres(config: &AnalyticsConfig) -> AnalyticsResult<Backend> {
        let admin = Arc::new(PostgresAdminRepository::new(config.admin.clone())?);
        admin.run_migrations().await?;

        let pool_config = SitePoolConfig::new(
            config.sites.url_template.clone(),
            config.sites.max_pool_size,
            config.sites.connect_timeout,
        )?;
        let connector = PostgresSiteConnector::new(admin.clone(), pool_config);

        Ok(Backend {
            registry: admin.clone(),
            cache: admin.clone(),
            flags: admin,
            connector: Arc::new(connector),
        })
    }

    /// Create a backend from environment configuration.
    ///
    /// Reads `ANALYTICS_BACKEND` to determine which backend to create.
    pub async fn from_env() -> AnalyticsResult<Backend> {
        let backend_type = BackendType::from_env();

        match backend_type {
            BackendType::Postgres => {
                #[cfg(feature = "postgres-repo")]
                {
                    let config = AnalyticsConfig {
                        admin: crate::config::AdminDbSettings::from_env()?,
                        sites: crate::config::SiteDbSettings::from_env()?,
                        ..Default::default()
                    };
                    Self::create_postgres(&config).await
                }
                #[cfg(not(feature = "postgres-repo"))]
                {
                    Err(AnalyticsError::configuration(
                        "Postgres backend feature not enabled",
                    ))
                }
            }
            BackendType::Local => Ok(Self::create_local()),
        }
    }

    /// Create a backend from a TOML configuration file.
    pub async fn from_config_file<P: AsRef<std::path::Path>>(
        config_path: P,
    ) -> AnalyticsResult<Backend> {
        let config = AnalyticsConfig::from_file(config_path)?;
        Self::from_config(&config).await
    }

    /// Create a backend from the default configuration file location.
    pub async fn from_default_config() -> AnalyticsResult<Backend> {
        let config = AnalyticsConfig::from_default_location()?;
        Self::from_config(&config).await
    }

    /// Create a backend from a parsed configuration.
    pub async fn from_config(config: &AnalyticsConfig) -> AnalyticsResult<Backend> {
        let backend_type = config.backend_type()?;
        Self::create(backend_type, Some(config)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::registry::{Site, SiteStatus};

    #[test]
    fn test_backend_type_from_str() {
        assert_eq!(BackendType::from_str("local").unwrap(), BackendType::Local);
        assert_eq!(
            BackendType::from_str("postgres").unwrap(),
            BackendType::Postgres
        );
        assert_eq!(BackendType::from_str("Pg").unwrap(), BackendType::Postgres);
        assert!(BackendType::from_str("invalid").is_err());
    }

    #[tokio::test]
    async fn test_create_local_backend() {
        let backend = BackendFactory::create_local();
        assert!(backend.registry.list_sites().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_backend_shares_state() {
        let local = LocalBackend::new();
        local.add_site(Site {
            code: "S1".to_string(),
            display_name: "Site One".to_string(),
            database_name: "site_one".to_string(),
            status: SiteStatus::Active,
        });
        let connector = local.connector();

        // the connector sees registry writes made through the backend
        let sites = connector.list_active_sites().await.unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].code, "S1");
    }
}
