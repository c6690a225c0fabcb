use serde::{Deserialize, Serialize};

use std::{collections::HashMap, env, fs, path::Path};

const DEFAULT_SMTP_PORT: u16 = 587;

/// Where SMTP settings are read from. Production reads the process
/// environment; tests hand in a map.
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// An SMTP setting looked up under its primary key, then its shorter fallback.
struct Key {
    primary: &'static str,
    fallback: &'static str,
}

const HOST: Key = Key {
    primary: "EMAIL_SMTP_HOST",
    fallback: "SMTP_HOST",
};
const PORT: Key = Key {
    primary: "EMAIL_SMTP_PORT",
    fallback: "SMTP_PORT",
};
const SECURE: Key = Key {
    primary: "EMAIL_SMTP_SECURE",
    fallback: "SMTP_SECURE",
};
const USER: Key = Key {
    primary: "EMAIL_SMTP_USER",
    fallback: "SMTP_USER",
};
const PASS: Key = Key {
    primary: "EMAIL_SMTP_PASS",
    fallback: "SMTP_PASS",
};
const FROM: Key = Key {
    primary: "EMAIL_SMTP_FROM",
    fallback: "SMTP_FROM",
};

impl Key {
    /// First non-blank value, returned untouched. Passwords may carry spaces.
    fn raw(&self, env: &impl EnvSource) -> Option<String> {
        [self.primary, self.fallback]
            .into_iter()
            .filter_map(|key| env.var(key))
            .find(|value| !value.trim().is_empty())
    }

    fn lookup(&self, env: &impl EnvSource) -> Option<String> {
        self.raw(env).map(|value| value.trim().to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("incomplete SMTP configuration, missing: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub user: String,
    pub pass: String,
    pub from: String,
}

impl SmtpConfig {
    /// Resolves the relay settings for one send. Fails before anything touches
    /// the network when host, user or password are unset.
    pub fn resolve(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let host = HOST.lookup(env);
        let user = USER.lookup(env);
        let pass = PASS.raw(env);

        let (Some(host), Some(user), Some(pass)) = (host.clone(), user.clone(), pass.clone())
        else {
            let missing = [(host, HOST.primary), (user, USER.primary), (pass, PASS.primary)]
                .into_iter()
                .filter_map(|(value, key)| value.is_none().then_some(key))
                .collect();
            return Err(ConfigError::Missing(missing));
        };

        let port = match PORT.lookup(env) {
            Some(raw) => raw.parse::<u16>().unwrap_or_else(|e| {
                tracing::warn!(
                    "Ignoring unparseable SMTP port '{}' ({}), using {}",
                    raw,
                    e,
                    DEFAULT_SMTP_PORT
                );
                DEFAULT_SMTP_PORT
            }),
            None => DEFAULT_SMTP_PORT,
        };

        let secure = SECURE
            .lookup(env)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"));

        let from = FROM.lookup(env).unwrap_or_else(|| user.clone());

        Ok(Self {
            host,
            port,
            secure,
            user,
            pass,
            from,
        })
    }
}

/// Settings for the HTTP service mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8025
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

const SERVICE_CONFIG_FILES: [&str; 2] = ["config.yaml", "config.example.yaml"];

/// Reads the service config from `EMAIL_SERVICE_CONFIG`, then `config.yaml`,
/// then `config.example.yaml`. Defaults apply when none of them exist.
pub fn load_service_config() -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    let requested = env::var("EMAIL_SERVICE_CONFIG").ok();
    let candidates: Vec<&str> = requested
        .as_deref()
        .into_iter()
        .chain(SERVICE_CONFIG_FILES)
        .collect();

    read_service_config(&candidates)
}

fn read_service_config(
    candidates: &[&str],
) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    for (i, path) in candidates.iter().copied().enumerate() {
        if !Path::new(path).exists() {
            continue;
        }
        if i > 0 {
            tracing::warn!(
                "Config file '{}' not found, falling back to '{}'",
                candidates[0],
                path
            );
        }
        let contents = fs::read_to_string(path)?;
        return serde_yaml::from_str(&contents).map_err(Into::into);
    }

    tracing::warn!(
        "No service config file found (tried {}), using defaults",
        candidates.join(", ")
    );
    Ok(ServiceConfig::default())
}
