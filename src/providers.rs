//! Component source provider
//!
//! Fetches component source code from the upstream repositories and memoizes
//! it in the `components` partition under `{framework}:{name}:default`, the
//! same key [`CacheVersionManager::invalidate_component`] removes.
//!
//! [`CacheVersionManager::invalidate_component`]: crate::version::CacheVersionManager::invalidate_component

use crate::cache::DurableStore;
use crate::error::{CacheError, Result};
use crate::http::HttpClient;
use crate::version::component_cache_key;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Public raw-content host
pub const RAW_GITHUB_URL: &str = "https://raw.githubusercontent.com";

/// Environment variable overriding [`RAW_GITHUB_URL`]
pub const ENV_RAW_GITHUB_URL: &str = "GITHUB_RAW_URL";

/// Default lifetime of a fetched component (24 hours)
pub const DEFAULT_COMPONENT_TTL_SECS: u64 = 24 * 60 * 60;

/// UI framework a component implementation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    /// material-web (Lit web components)
    Web,
    /// Flutter material library
    Flutter,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Web => "web",
            Framework::Flutter => "flutter",
        }
    }

    /// Path of the component's main source file relative to the raw host
    fn source_path(&self, name: &str) -> String {
        match self {
            Framework::Web => {
                let dir = name.replace(['-', '_'], "");
                format!(
                    "material-components/material-web/main/{}/internal/{}.ts",
                    dir, dir
                )
            }
            Framework::Flutter => format!(
                "flutter/flutter/master/packages/flutter/lib/src/material/{}.dart",
                name.replace('-', "_")
            ),
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "web" => Ok(Framework::Web),
            "flutter" => Ok(Framework::Flutter),
            other => Err(CacheError::Validation(format!(
                "unsupported framework {:?}; expected web or flutter",
                other
            ))),
        }
    }
}

/// Source code of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSource {
    pub name: String,
    pub framework: Framework,
    /// Where the code came from; `None` for bundled fallback code
    pub source_url: Option<String>,
    pub code: String,
    /// `false` when upstream was unreachable and fallback code is served
    pub live: bool,
}

/// Cached access to upstream component sources
pub struct ComponentSourceProvider {
    http: HttpClient,
    cache: Arc<DurableStore>,
    raw_base: String,
    ttl_secs: u64,
}

impl ComponentSourceProvider {
    pub fn new(http: HttpClient, cache: Arc<DurableStore>) -> Self {
        Self::with_raw_base(http, cache, RAW_GITHUB_URL)
    }

    /// Point at a different raw-content host
    pub fn with_raw_base(
        http: HttpClient,
        cache: Arc<DurableStore>,
        raw_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            cache,
            raw_base: raw_base.into().trim_end_matches('/').to_string(),
            ttl_secs: DEFAULT_COMPONENT_TTL_SECS,
        }
    }

    /// Raw host from `GITHUB_RAW_URL`, or the public one
    pub fn from_env(http: HttpClient, cache: Arc<DurableStore>) -> Self {
        match std::env::var(ENV_RAW_GITHUB_URL) {
            Ok(base) if !base.trim().is_empty() => Self::with_raw_base(http, cache, base.trim()),
            _ => Self::new(http, cache),
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Source of `name` for `framework`
    ///
    /// Served from cache when fresh. On a miss the upstream file is fetched
    /// and cached; if that fails, bundled fallback code is returned and
    /// nothing is cached, so the next call retries upstream.
    pub async fn get_component(&self, name: &str, framework: &str) -> Result<ComponentSource> {
        let name = validate_name(name)?;
        let framework: Framework = framework.parse()?;
        let key = component_cache_key(framework.as_str(), name);

        let fetched = self
            .cache
            .wrap(&key, || self.fetch(name, framework), self.ttl_secs)
            .await;

        match fetched {
            Ok(source) => Ok(source),
            Err(e) => {
                warn!(
                    "Fetching {} source for {} failed, serving fallback: {}",
                    framework, name, e
                );
                Ok(fallback_source(name, framework))
            }
        }
    }

    async fn fetch(&self, name: &str, framework: Framework) -> Result<ComponentSource> {
        let url = format!("{}/{}", self.raw_base, framework.source_path(name));
        debug!("Fetching component source from {}", url);

        let code = self.http.get_text(&url).await?;

        Ok(ComponentSource {
            name: name.to_string(),
            framework,
            source_url: Some(url),
            code,
            live: true,
        })
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CacheError::Validation(
            "component name must not be empty".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CacheError::Validation(format!(
            "invalid component name {:?}",
            name
        )));
    }
    Ok(name)
}

fn fallback_source(name: &str, framework: Framework) -> ComponentSource {
    let code = match framework {
        Framework::Web => {
            let class = pascal_case(name);
            format!(
                "import {{LitElement, html}} from 'lit';\n\
                 import {{customElement}} from 'lit/decorators.js';\n\n\
                 @customElement('md-{tag}')\n\
                 export class Md{class} extends LitElement {{\n  \
                   render() {{\n    return html`<slot></slot>`;\n  }}\n\
                 }}\n",
                tag = name,
                class = class
            )
        }
        Framework::Flutter => {
            let class = pascal_case(name);
            format!(
                "import 'package:flutter/material.dart';\n\n\
                 class {class} extends StatelessWidget {{\n  \
                   const {class}({{super.key}});\n\n  \
                   @override\n  \
                   Widget build(BuildContext context) {{\n    return const Placeholder();\n  }}\n\
                 }}\n",
                class = class
            )
        }
    };

    ComponentSource {
        name: name.to_string(),
        framework,
        source_url: None,
        code,
        live: false,
    }
}

fn pascal_case(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
