//! Server configuration from CLI flags and environment variables.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::network::{ConnectionConfig, NetworkConfig, TlsConfig};
use crate::world::GameSettings;

/// Tilefall game server.
#[derive(Debug, Clone, Parser)]
#[command(name = "tilefall-server", version, about)]
pub struct ServerArgs {
    /// Bind address.
    #[arg(long, env = "TILEFALL_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port. 0 picks an ephemeral port.
    #[arg(long, env = "TILEFALL_PORT", default_value_t = 4000)]
    pub port: u16,

    /// PostgreSQL connection string. Without one the server runs
    /// cache-only: nothing survives a restart.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Connection pool size for the durable store.
    #[arg(long, env = "TILEFALL_DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// HMAC secret for session token verification.
    #[arg(long, env = "TILEFALL_JWT_SECRET", default_value = "insecure-dev-secret")]
    pub jwt_secret: String,

    /// Directory of `*.json` map files. Without one a built-in test map
    /// is used.
    #[arg(long, env = "TILEFALL_MAPS_DIR")]
    pub maps_dir: Option<PathBuf>,

    /// Map new players spawn on.
    #[arg(long, env = "TILEFALL_DEFAULT_MAP", default_value = "samplemap")]
    pub default_map: String,

    /// Seconds between batch sync cycles.
    #[arg(long, env = "TILEFALL_SYNC_INTERVAL_SECS", default_value_t = 3.0)]
    pub sync_interval_secs: f64,

    /// AI / sweep tick frequency in Hz.
    #[arg(long, env = "TILEFALL_TICK_HZ", default_value_t = 5.0)]
    pub tick_hz: f64,

    /// Minimum interval between two moves of one player.
    #[arg(long, env = "TILEFALL_MOVEMENT_COOLDOWN_SECS", default_value_t = 0.5)]
    pub movement_cooldown_secs: f64,

    /// Ground-item privacy window in seconds.
    #[arg(long, env = "TILEFALL_GROUND_ITEM_PRIVACY_SECS", default_value_t = 60.0)]
    pub ground_item_privacy_secs: f64,

    /// Ground-item lifetime in seconds.
    #[arg(long, env = "TILEFALL_GROUND_ITEM_DESPAWN_SECS", default_value_t = 300.0)]
    pub ground_item_despawn_secs: f64,

    /// Port for the Prometheus metrics exporter. Disabled when absent.
    #[arg(long, env = "TILEFALL_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// TLS certificate path (PEM). Enables TLS together with `--tls-key`.
    #[arg(long, env = "TILEFALL_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key path (PEM).
    #[arg(long, env = "TILEFALL_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Seed for the combat RNG. Random when absent; set for
    /// reproducible runs.
    #[arg(long, env = "TILEFALL_RNG_SEED")]
    pub rng_seed: Option<u64>,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, env = "TILEFALL_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl ServerArgs {
    /// Resolves the network configuration.
    #[must_use]
    pub fn network_config(&self) -> NetworkConfig {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        };
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls,
            connection: ConnectionConfig::default(),
            ..NetworkConfig::default()
        }
    }

    /// Resolves the game-rule settings.
    #[must_use]
    pub fn game_settings(&self) -> GameSettings {
        GameSettings {
            movement_cooldown_secs: self.movement_cooldown_secs,
            ground_item_privacy_secs: self.ground_item_privacy_secs,
            ground_item_despawn_secs: self.ground_item_despawn_secs,
            ..GameSettings::default()
        }
    }

    /// The interval between two AI ticks.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz.clamp(1.0, 60.0))
    }

    /// The interval between two batch sync cycles.
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sync_interval_secs.clamp(0.5, 60.0))
    }
}
