use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use crate::error::{Error, Result};

pub const HAMMERSPOON_CLI_PATH: &str = "/Applications/Hammerspoon.app/Contents/Frameworks/hs/hs";
pub const DEFAULT_NAMESPACE: &str = "__rust_bridge_storage";

pub const ENV_CLI: &str = "HSBRIDGE_CLI";
pub const ENV_TIMEOUT_MS: &str = "HSBRIDGE_TIMEOUT_MS";
pub const ENV_NAMESPACE: &str = "HSBRIDGE_NAMESPACE";
pub const ENV_CALLBACK_ADDR: &str = "HSBRIDGE_CALLBACK_ADDR";

/// How the front end is invoked: `program [args...] <code>`.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub program: PathBuf,
    /// Arguments placed before the code snippet.
    pub args: Vec<String>,
    /// Default per-call deadline.
    pub timeout: Duration,
}

impl ChannelConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// `hs -c <code>`.
    #[must_use]
    pub fn hammerspoon() -> Self {
        Self::new(HAMMERSPOON_CLI_PATH).arg("-c")
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::hammerspoon()
    }
}

/// Resident dispatch listener that remote stubs post to.
#[derive(Clone, Debug)]
pub struct CallbackConfig {
    pub bind: SocketAddr,
    /// Lua function used by stubs to reach the listener. Called as
    /// `f(url, body, headers)` and expected to return `status, body`.
    /// `hs.http.post` is synchronous and blocks all other Lua execution until
    /// the host callable returns.
    pub post_function: String,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            post_function: "hs.http.post".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub channel: ChannelConfig,
    /// Name of the remote global table holding stored values.
    pub namespace: String,
    /// `None` disables host callbacks.
    pub callbacks: Option<CallbackConfig>,
    pub worker_threads: usize,
}

impl BridgeConfig {
    pub const DEFAULT_WORKER_THREADS: usize = 2;

    /// Defaults for Hammerspoon's `hs` command-line tool.
    #[must_use]
    pub fn hammerspoon() -> Self {
        Self {
            channel: ChannelConfig::hammerspoon(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            callbacks: Some(CallbackConfig::default()),
            worker_threads: Self::DEFAULT_WORKER_THREADS,
        }
    }

    /// Hammerspoon defaults overridden by `HSBRIDGE_*` environment variables.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if a variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if a variable holds an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::hammerspoon();
        if let Some(cli) = lookup(ENV_CLI) {
            cfg.channel.program = PathBuf::from(cli);
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS) {
            let ms = ms.trim().parse::<u64>().map_err(|e| Error::Config {
                key: ENV_TIMEOUT_MS,
                message: e.to_string(),
            })?;
            cfg.channel.timeout = Duration::from_millis(ms);
        }
        if let Some(ns) = lookup(ENV_NAMESPACE) {
            cfg.namespace = ns;
        }
        if let Some(addr) = lookup(ENV_CALLBACK_ADDR) {
            cfg.callbacks = if addr.eq_ignore_ascii_case("off") {
                None
            } else {
                let bind = addr.trim().parse().map_err(|e| Error::Config {
                    key: ENV_CALLBACK_ADDR,
                    message: format!("{e}"),
                })?;
                Some(CallbackConfig {
                    bind,
                    ..CallbackConfig::default()
                })
            };
        }
        cfg.validate()?;
        Ok(cfg)
    }

    #[must_use]
    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn callbacks(mut self, callbacks: Option<CallbackConfig>) -> Self {
        self.callbacks = callbacks;
        self
    }

    #[must_use]
    pub const fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.channel.timeout = timeout;
        self
    }

    /// # Errors
    /// Returns [`Error::Config`] if the namespace is not a Lua identifier or the
    /// timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if !is_lua_identifier(&self.namespace) {
            return Err(Error::Config {
                key: ENV_NAMESPACE,
                message: format!("`{}` is not a Lua identifier", self.namespace),
            });
        }
        if self.channel.timeout.is_zero() {
            return Err(Error::Config {
                key: ENV_TIMEOUT_MS,
                message: "timeout must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::hammerspoon()
    }
}

pub(crate) fn is_lua_identifier(name: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if",
        "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
    ];
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !KEYWORDS.contains(&name)
}
