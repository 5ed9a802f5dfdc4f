//! Build identity and the published version descriptor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one build: the pair that names its cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildIdentity {
    /// `YYYYMMDD` stamp of the build.
    pub build_date: String,
    /// Exact version string; compared verbatim against the descriptor.
    pub manual_version: String,
}

impl BuildIdentity {
    /// Identity baked in at compile time through `SWKIT_BUILD_DATE` and
    /// `SWKIT_MANUAL_VERSION`, falling back to the crate version.
    pub fn compiled() -> Self {
        Self {
            build_date: option_env!("SWKIT_BUILD_DATE")
                .unwrap_or("00000000")
                .to_string(),
            manual_version: option_env!("SWKIT_MANUAL_VERSION")
                .unwrap_or(env!("CARGO_PKG_VERSION"))
                .to_string(),
        }
    }

    /// Stamp a fresh identity for `app_version` built at `now`.
    ///
    /// The manual version is `{app_version}-{unix millis}`, so every build
    /// yields a new string even when the app version is unchanged.
    pub fn stamp(app_version: &str, now: DateTime<Utc>) -> Self {
        Self {
            build_date: now.format("%Y%m%d").to_string(),
            manual_version: format!("{app_version}-{}", swkit_common::unix_millis(now)),
        }
    }

    /// Cache generation name under `prefix`.
    pub fn generation_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}-{}", self.build_date, self.manual_version)
    }
}

impl Default for BuildIdentity {
    fn default() -> Self {
        Self::compiled()
    }
}

/// Contents of `/version.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    pub version: String,
    pub build_date: String,
    pub build_time: DateTime<Utc>,
    pub app_version: String,
}

impl VersionDescriptor {
    /// Descriptor published alongside a stamped build.
    pub fn for_build(identity: &BuildIdentity, app_version: &str, built_at: DateTime<Utc>) -> Self {
        Self {
            version: identity.manual_version.clone(),
            build_date: identity.build_date.clone(),
            build_time: built_at,
            app_version: app_version.to_string(),
        }
    }
}
