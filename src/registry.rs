//! Backend registries
//!
//! A `Registry` maps a URI scheme (`sqlite`, `memory`, `channel`, ...) to an
//! async constructor. Registries are built once at startup and passed by
//! reference; there is no process-global registration.

use std::collections::HashMap;
use std::future::Future;

use futures::future::BoxFuture;

use crate::error::{AppError, Result};

type Constructor<C, T> = Box<dyn Fn(String, C) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Scheme-keyed table of backend constructors
pub struct Registry<C, T> {
    kind: &'static str,
    constructors: HashMap<String, Constructor<C, T>>,
}

impl<C, T> Registry<C, T> {
    /// Create an empty registry
    ///
    /// # Arguments
    /// * `kind` - Backend family name used in error messages (e.g. "storage")
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            constructors: HashMap::new(),
        }
    }

    /// Register a constructor for a scheme, replacing any previous one
    pub fn register<F, Fut>(&mut self, scheme: &str, constructor: F) -> &mut Self
    where
        F: Fn(String, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.constructors.insert(
            scheme.to_ascii_lowercase(),
            Box::new(move |uri, context| Box::pin(constructor(uri, context))),
        );
        self
    }

    /// Construct the backend named by `uri`
    ///
    /// # Errors
    /// `AppError::Config` when the URI has no scheme or the scheme is unknown
    pub async fn open(&self, uri: &str, context: C) -> Result<T> {
        let scheme = uri_scheme(uri)?.to_ascii_lowercase();
        let constructor = self.constructors.get(&scheme).ok_or_else(|| {
            AppError::Config(format!(
                "Unsupported {} scheme '{}' (known: {})",
                self.kind,
                scheme,
                self.schemes().join(", ")
            ))
        })?;

        tracing::debug!(kind = self.kind, %scheme, "Opening backend");
        constructor(uri.to_string(), context).await
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }
}

/// Scheme part of a backend URI (text before the first ':')
pub fn uri_scheme(uri: &str) -> Result<&str> {
    match uri.split_once(':') {
        Some((scheme, _)) if !scheme.is_empty() => Ok(scheme),
        _ => Err(AppError::Config(format!("Missing scheme in URI '{}'", uri))),
    }
}

/// Text after `scheme://`, without the query string
pub fn uri_path(uri: &str) -> &str {
    let rest = uri
        .split_once("://")
        .map(|(_, rest)| rest)
        .or_else(|| uri.split_once(':').map(|(_, rest)| rest))
        .unwrap_or(uri);
    rest.split('?').next().unwrap_or(rest)
}

/// Decoded query parameters of a backend URI
pub fn uri_params(uri: &str) -> HashMap<String, String> {
    let Some((_, query)) = uri.split_once('?') else {
        return HashMap::new();
    };

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| value.to_string());
            (key.to_string(), value)
        })
        .collect()
}
