use crate::error::AppError;
use crate::models::NotificationType;
use dotenvy::dotenv;
use std::collections::{HashMap, HashSet};
use std::env;
use std::time::Duration;

/// Grouping, expiry and retention rules for the notification engine.
#[derive(Debug, Clone)]
pub struct NotificationPolicy {
    /// Unread notifications with the same group key created within this
    /// window are updated in place instead of multiplied.
    pub grouping_window: chrono::Duration,
    /// Aggregate-type events eligible for grouping.
    pub groupable_types: HashSet<NotificationType>,
    /// Types that expire automatically, with their lifetime.
    pub ttl: HashMap<NotificationType, chrono::Duration>,
    /// Read notifications older than this are garbage-collected.
    pub read_retention: chrono::Duration,
}

impl NotificationPolicy {
    pub fn is_groupable(&self, notification_type: NotificationType) -> bool {
        self.groupable_types.contains(&notification_type)
    }

    pub fn ttl_for(&self, notification_type: NotificationType) -> Option<chrono::Duration> {
        self.ttl.get(&notification_type).copied()
    }
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            grouping_window: chrono::Duration::hours(24),
            groupable_types: [NotificationType::PostLiked, NotificationType::PostCommented]
                .into_iter()
                .collect(),
            ttl: [
                (NotificationType::ConnectionRequest, chrono::Duration::days(30)),
                (NotificationType::Announcement, chrono::Duration::days(7)),
            ]
            .into_iter()
            .collect(),
            read_retention: chrono::Duration::days(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// When unset the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: usize,
    pub jwt_public_key_pem: String,
    pub notification: NotificationPolicy,
    pub notification_gc_interval: Duration,
    pub websocket: WebSocketConfig,
}

impl Config {
    fn parse_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
        match env::var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw}"))),
            Err(_) => Ok(default),
        }
    }

    /// Direct messages and connection requests are never grouped.
    fn parse_groupable_types(value: &str) -> Result<HashSet<NotificationType>, AppError> {
        Self::parse_list(value)
            .iter()
            .map(|s| {
                let kind = s.parse::<NotificationType>().map_err(AppError::Config)?;
                match kind {
                    NotificationType::MessageReceived | NotificationType::ConnectionRequest => {
                        Err(AppError::Config(format!("{} cannot be grouped", kind.as_str())))
                    }
                    _ => Ok(kind),
                }
            })
            .collect()
    }

    fn seconds(name: &str, value: i64) -> Result<chrono::Duration, AppError> {
        chrono::Duration::try_seconds(value)
            .filter(|d| *d >= chrono::Duration::zero())
            .ok_or_else(|| AppError::Config(format!("{name} out of range: {value}")))
    }

    fn days(name: &str, value: i64) -> Result<chrono::Duration, AppError> {
        chrono::Duration::try_days(value)
            .filter(|d| *d >= chrono::Duration::zero())
            .ok_or_else(|| AppError::Config(format!("{name} out of range: {value}")))
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let port = Self::parse_var("PORT", 8085u16)?;
        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty());
        let database_max_connections = Self::parse_var("DATABASE_MAX_CONNECTIONS", 16usize)?;
        let jwt_public_key_pem = env::var("JWT_PUBLIC_KEY_PEM")
            .map_err(|_| AppError::Config("JWT_PUBLIC_KEY_PEM missing".into()))?;

        let defaults = NotificationPolicy::default();
        let grouping_window_secs = Self::parse_var(
            "NOTIFICATION_GROUPING_WINDOW_SECS",
            defaults.grouping_window.num_seconds(),
        )?;
        let groupable_types = match env::var("NOTIFICATION_GROUPABLE_TYPES") {
            Ok(raw) => Self::parse_groupable_types(&raw)?,
            Err(_) => defaults.groupable_types.clone(),
        };
        let connection_request_days =
            Self::parse_var("NOTIFICATION_CONNECTION_REQUEST_TTL_DAYS", 30i64)?;
        let announcement_days = Self::parse_var("NOTIFICATION_ANNOUNCEMENT_TTL_DAYS", 7i64)?;
        let read_retention_days = Self::parse_var("NOTIFICATION_READ_RETENTION_DAYS", 30i64)?;
        let gc_interval_secs = Self::parse_var("NOTIFICATION_GC_INTERVAL_SECS", 3600u64)?;

        let notification = NotificationPolicy {
            grouping_window: Self::seconds(
                "NOTIFICATION_GROUPING_WINDOW_SECS",
                grouping_window_secs,
            )?,
            groupable_types,
            ttl: [
                (
                    NotificationType::ConnectionRequest,
                    Self::days(
                        "NOTIFICATION_CONNECTION_REQUEST_TTL_DAYS",
                        connection_request_days,
                    )?,
                ),
                (
                    NotificationType::Announcement,
                    Self::days("NOTIFICATION_ANNOUNCEMENT_TTL_DAYS", announcement_days)?,
                ),
            ]
            .into_iter()
            .collect(),
            read_retention: Self::days("NOTIFICATION_READ_RETENTION_DAYS", read_retention_days)?,
        };

        let websocket = WebSocketConfig {
            heartbeat_interval: Duration::from_secs(Self::parse_var(
                "WS_HEARTBEAT_INTERVAL_SECS",
                5u64,
            )?),
            client_timeout: Duration::from_secs(Self::parse_var("WS_CLIENT_TIMEOUT_SECS", 30u64)?),
        };

        Ok(Config {
            port,
            database_url,
            database_max_connections,
            jwt_public_key_pem,
            notification,
            notification_gc_interval: Duration::from_secs(gc_interval_secs),
            websocket,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_groups_only_aggregate_types() {
        let policy = NotificationPolicy::default();
        assert!(policy.is_groupable(NotificationType::PostLiked));
        assert!(policy.is_groupable(NotificationType::PostCommented));
        assert!(!policy.is_groupable(NotificationType::ConnectionRequest));
        assert!(!policy.is_groupable(NotificationType::MessageReceived));
    }

    #[test]
    fn test_default_policy_expiry() {
        let policy = NotificationPolicy::default();
        assert_eq!(
            policy.ttl_for(NotificationType::ConnectionRequest),
            Some(chrono::Duration::days(30))
        );
        assert_eq!(
            policy.ttl_for(NotificationType::Announcement),
            Some(chrono::Duration::days(7))
        );
        assert_eq!(policy.ttl_for(NotificationType::PostLiked), None);
    }

    #[test]
    fn test_parse_groupable_types() {
        let parsed = Config::parse_groupable_types("post_liked, announcement").unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.contains(&NotificationType::Announcement));
        assert!(Config::parse_groupable_types("post_liked,nope").is_err());
    }

    #[test]
    fn test_direct_and_connection_types_are_never_groupable() {
        assert!(matches!(
            Config::parse_groupable_types("post_liked,message_received"),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            Config::parse_groupable_types("connection_request"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_out_of_range_durations_are_config_errors() {
        assert!(matches!(
            Config::seconds("NOTIFICATION_GROUPING_WINDOW_SECS", i64::MAX),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            Config::days("NOTIFICATION_READ_RETENTION_DAYS", i64::MAX / 2),
            Err(AppError::Config(_))
        ));
        assert!(Config::days("NOTIFICATION_ANNOUNCEMENT_TTL_DAYS", -1).is_err());
        assert_eq!(
            Config::days("NOTIFICATION_ANNOUNCEMENT_TTL_DAYS", 7).unwrap(),
            chrono::Duration::days(7)
        );
    }
}
