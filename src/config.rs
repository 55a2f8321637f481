//! Device profiles and engine configuration.
//!
//! A [`DeviceProfile`] describes what the engine needs to know about a CLI
//! dialect to push configuration: the lines that enter and leave
//! configuration mode, and the response lines that mean a command was
//! rejected. Built-in profiles cover common vendors; callers may also
//! deserialize their own.

use once_cell::sync::Lazy;
use regex::RegexSet;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Names of the built-in device profiles.
pub const BUILTIN_PROFILES: &[&str] = &["cisco", "huawei", "h3c", "hillstone", "juniper", "array"];

/// Config-mode framing and response error patterns for one CLI dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceProfile {
    pub name: String,
    /// Lines sent before every configuration batch.
    pub config_enter: Vec<String>,
    /// Lines sent after every configuration batch.
    pub config_exit: Vec<String>,
    /// A response line matching any of these marks the batch as rejected.
    pub error_patterns: Vec<String>,
    /// Error lines matching any of these are tolerated.
    #[serde(default)]
    pub ignore_errors: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn profile_for(name: &str) -> Option<DeviceProfile> {
    let profile = match name {
        "cisco" => DeviceProfile {
            name: "cisco".to_string(),
            config_enter: strings(&["configure terminal"]),
            config_exit: strings(&["end"]),
            error_patterns: strings(&[
                r"% Invalid command at '\^' marker\.",
                r"% Invalid parameter detected at '\^' marker\.",
                r"invalid vlan \(reserved value\) at '\^' marker\.",
                r"ERROR: VLAN \d+ is not a primary vlan",
                r"^\s*\^$",
                r"^%.+",
                r"^Command authorization failed.*",
                r"^Command rejected:.*",
                r"ERROR:.+",
            ]),
            ignore_errors: strings(&[r"ERROR: object \(.+\) does not exist."]),
        },
        "huawei" => DeviceProfile {
            name: "huawei".to_string(),
            config_enter: strings(&["system-view"]),
            config_exit: strings(&["return"]),
            error_patterns: strings(&[r"Error: .+$", r"^\s*\^$"]),
            ignore_errors: strings(&[
                r"Error: The delete configuration does not exist.",
                r"Error: Worng parameter found at.*",
            ]),
        },
        "h3c" => DeviceProfile {
            name: "h3c".to_string(),
            config_enter: strings(&["system-view"]),
            config_exit: strings(&["return"]),
            error_patterns: strings(&[
                r".+\^.+",
                r".+%.+",
                r".+doesn't exist.+",
                r".+does not exist.+",
            ]),
            ignore_errors: Vec::new(),
        },
        "hillstone" => DeviceProfile {
            name: "hillstone".to_string(),
            config_enter: strings(&["config"]),
            config_exit: strings(&["end"]),
            error_patterns: strings(&[
                r"^Error: .+",
                r".+\^.+",
                r".+%.+",
                r"Object group with given name exists with different type.",
            ]),
            ignore_errors: strings(&[
                r"Error: This entity already exists",
                r"Error: Deleting a service not configured",
            ]),
        },
        "juniper" => DeviceProfile {
            name: "juniper".to_string(),
            config_enter: strings(&["configure"]),
            config_exit: strings(&["commit and-quit"]),
            error_patterns: strings(&[
                r".*unknown command.*",
                r"syntax error.*",
                r"error:.+",
                r"invalid value .+",
                r"invalid ip address .+",
                r".*invalid prefix length .+",
                r"\s+\^$",
            ]),
            ignore_errors: strings(&[
                r"warning: statement not found",
                r"warning: element \S+ not found",
            ]),
        },
        "array" => DeviceProfile {
            name: "array".to_string(),
            config_enter: strings(&["config terminal"]),
            config_exit: strings(&["exit"]),
            error_patterns: strings(&[
                r"Virtual site .+ is not configured",
                r"Access denied!",
                r"Netpool .+ does not exist",
                r"Resource group .+ does not exist",
                r"^\s*\^$",
            ]),
            ignore_errors: Vec::new(),
        },
        _ => return None,
    };
    Some(profile)
}

/// Returns names of all built-in profiles.
pub fn available_profiles() -> &'static [&'static str] {
    BUILTIN_PROFILES
}

impl DeviceProfile {
    /// Looks up a built-in profile by name (case-insensitive).
    pub fn builtin(name: &str) -> Result<Self, ConfigError> {
        let key = name.to_ascii_lowercase();
        profile_for(&key).ok_or_else(|| ConfigError::ProfileNotFound(name.to_string()))
    }

    /// A profile with no framing and no error detection.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_enter: Vec::new(),
            config_exit: Vec::new(),
            error_patterns: Vec::new(),
            ignore_errors: Vec::new(),
        }
    }

    /// Compiles the error and ignore patterns.
    pub fn response_check(&self) -> Result<ResponseCheck, ConfigError> {
        ResponseCheck::new(&self.error_patterns, &self.ignore_errors)
    }
}

/// Compiled rejection detector for command batch responses.
#[derive(Debug, Clone)]
pub struct ResponseCheck {
    errors: RegexSet,
    ignore: Option<RegexSet>,
}

impl ResponseCheck {
    pub fn new<S: AsRef<str>>(errors: &[S], ignore: &[S]) -> Result<Self, ConfigError> {
        let errors = RegexSet::new(errors.iter().map(AsRef::as_ref))
            .map_err(|err| ConfigError::InvalidPattern(format!("error patterns: {err}")))?;
        let ignore = if ignore.is_empty() {
            None
        } else {
            Some(
                RegexSet::new(ignore.iter().map(AsRef::as_ref))
                    .map_err(|err| ConfigError::InvalidPattern(format!("ignore patterns: {err}")))?,
            )
        };
        Ok(Self { errors, ignore })
    }

    /// First response line that signals a rejected command, if any.
    pub fn check(&self, response: &str) -> Option<String> {
        response
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .find(|line| self.errors.is_match(line) && !self.ignored(line))
            .map(str::to_string)
    }

    fn ignored(&self, line: &str) -> bool {
        self.ignore
            .as_ref()
            .map(|set| set.is_match(line))
            .unwrap_or(false)
    }
}

static PLAIN_CHECK: Lazy<ResponseCheck> = Lazy::new(|| {
    match ResponseCheck::new::<&str>(&[], &[]) {
        Ok(check) => check,
        Err(err) => panic!("invalid empty response check: {err}"),
    }
});

impl Default for ResponseCheck {
    fn default() -> Self {
        PLAIN_CHECK.clone()
    }
}

fn default_profile() -> String {
    "cisco".to_string()
}

/// Settings for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    /// Built-in profile name, used when `custom_profile` is absent.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Replaces the built-in profile entirely.
    #[serde(default)]
    pub custom_profile: Option<DeviceProfile>,
    /// Upper bound on devices reconciled at once.
    #[serde(default)]
    pub max_concurrent_devices: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            custom_profile: None,
            max_concurrent_devices: None,
        }
    }
}

impl EngineConfig {
    pub fn for_profile(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|err| ConfigError::InvalidDocument(err.to_string()))
    }

    /// The effective profile.
    pub fn device_profile(&self) -> Result<DeviceProfile, ConfigError> {
        match &self.custom_profile {
            Some(profile) => Ok(profile.clone()),
            None => DeviceProfile::builtin(&self.profile),
        }
    }
}
