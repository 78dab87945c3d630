use hyper::Uri;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Options for configuring the proxy validating process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOptions {
    /// URL every candidate must fetch through itself.
    pub target_url: String,
    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of probes in flight.
    pub concurrency: usize,
    /// How many failures are kept as samples in the summary.
    pub max_failure_samples: usize,
    /// Truncate the candidate list to this many entries; `None` is unlimited.
    pub max_proxies: Option<usize>,
    /// Pass deadline in milliseconds; `None` lets the cache derive one.
    pub max_duration_ms: Option<u64>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            target_url: "https://www.youtube.com/".to_string(),
            timeout_ms: 7000,
            concurrency: 100,
            max_failure_samples: 25,
            max_proxies: Some(5000),
            max_duration_ms: None,
        }
    }
}

impl ValidationOptions {
    /// Checks the preconditions of a validation pass and parses the target.
    pub fn target_uri(&self) -> Result<Uri> {
        if self.timeout_ms == 0 {
            return Err(Error::engine("timeoutMs must be greater than zero"));
        }
        if self.concurrency == 0 {
            return Err(Error::engine("concurrency must be at least 1"));
        }
        let uri = self
            .target_url
            .parse::<Uri>()
            .map_err(|e| Error::engine(format!("invalid target URL {:?}: {}", self.target_url, e)))?;
        match (uri.scheme_str(), uri.host()) {
            (Some("http" | "https"), Some(_)) => Ok(uri),
            _ => Err(Error::engine(format!(
                "target URL {:?} must be an absolute http(s) URL",
                self.target_url
            ))),
        }
    }

    /// Returns a copy with `update` applied, or the first validation error.
    ///
    /// Nothing is applied unless every supplied field is valid.
    pub fn with_update(&self, update: &OptionsUpdate) -> Result<Self> {
        let mut next = self.clone();

        if let Some(max_proxies) = update.max_proxies {
            next.max_proxies = match max_proxies {
                None => None,
                Some(value) if !value.is_finite() || value < 0.0 => {
                    return Err(Error::invalid_options("invalid value for maxProxies"));
                }
                Some(value) if value == 0.0 => None,
                Some(value) => {
                    let floored = value.floor();
                    if floored < 1.0 {
                        return Err(Error::invalid_options(
                            "maxProxies must be at least 1, or zero for unlimited",
                        ));
                    }
                    Some(floored as usize)
                }
            };
        }

        if let Some(concurrency) = update.concurrency {
            if !concurrency.is_finite() || concurrency <= 0.0 {
                return Err(Error::invalid_options(
                    "concurrency must be a positive integer",
                ));
            }
            next.concurrency = (concurrency.round() as usize).max(1);
        }

        if let Some(timeout_ms) = update.timeout_ms {
            if !timeout_ms.is_finite() || timeout_ms <= 0.0 {
                return Err(Error::invalid_options(
                    "timeoutMs must be a number greater than zero",
                ));
            }
            next.timeout_ms = (timeout_ms.round() as u64).max(1);
        }

        Ok(next)
    }
}

/// A partial runtime update of [`ValidationOptions`].
///
/// Absent fields are left alone. `maxProxies: null` is distinct from an
/// absent `maxProxies` and means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsUpdate {
    #[serde(default, deserialize_with = "present")]
    pub max_proxies: Option<Option<f64>>,
    pub concurrency: Option<f64>,
    pub timeout_ms: Option<f64>,
}

impl OptionsUpdate {
    pub fn is_empty(&self) -> bool {
        self.max_proxies.is_none() && self.concurrency.is_none() && self.timeout_ms.is_none()
    }
}

/// Marks a field as supplied even when its value is `null`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// The options in effect after an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedOptions {
    pub max_proxies: Option<usize>,
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub max_duration_ms: Option<u64>,
}

impl From<&ValidationOptions> for AppliedOptions {
    fn from(options: &ValidationOptions) -> Self {
        Self {
            max_proxies: options.max_proxies,
            concurrency: options.concurrency,
            timeout_ms: options.timeout_ms,
            max_duration_ms: options.max_duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(json: &str) -> OptionsUpdate {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn distinguishes_null_from_absent_limit() {
        assert_eq!(update("{}").max_proxies, None);
        assert_eq!(update(r#"{"maxProxies": null}"#).max_proxies, Some(None));
        assert_eq!(update(r#"{"maxProxies": 10}"#).max_proxies, Some(Some(10.0)));
    }

    #[test]
    fn zero_or_null_limit_means_unlimited() {
        let options = ValidationOptions::default();
        let next = options.with_update(&update(r#"{"maxProxies": 0}"#)).unwrap();
        assert_eq!(next.max_proxies, None);
        let next = options.with_update(&update(r#"{"maxProxies": null}"#)).unwrap();
        assert_eq!(next.max_proxies, None);
    }

    #[test]
    fn limit_is_floored() {
        let next = ValidationOptions::default()
            .with_update(&update(r#"{"maxProxies": 12.9}"#))
            .unwrap();
        assert_eq!(next.max_proxies, Some(12));
    }

    #[test]
    fn fractional_limit_below_one_is_rejected() {
        let err = ValidationOptions::default()
            .with_update(&update(r#"{"maxProxies": 0.5}"#))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }

    #[test]
    fn negative_limit_is_rejected() {
        assert!(ValidationOptions::default()
            .with_update(&update(r#"{"maxProxies": -3}"#))
            .is_err());
    }

    #[test]
    fn concurrency_and_timeout_are_rounded() {
        let next = ValidationOptions::default()
            .with_update(&update(r#"{"concurrency": 2.5, "timeoutMs": 0.4}"#))
            .unwrap();
        assert_eq!(next.concurrency, 3);
        assert_eq!(next.timeout_ms, 1);
    }

    #[test]
    fn one_invalid_field_rejects_the_whole_update() {
        let options = ValidationOptions::default();
        let bad = OptionsUpdate {
            max_proxies: Some(Some(10.0)),
            concurrency: Some(-5.0),
            timeout_ms: Some(100.0),
        };
        assert!(options.with_update(&bad).is_err());

        let non_finite = OptionsUpdate {
            timeout_ms: Some(f64::INFINITY),
            ..Default::default()
        };
        assert!(options.with_update(&non_finite).is_err());
    }

    #[test]
    fn target_must_be_absolute_http() {
        let mut options = ValidationOptions::default();
        assert!(options.target_uri().is_ok());
        options.target_url = "ftp://example.com/".to_string();
        assert!(options.target_uri().is_err());
        options.target_url = "/relative".to_string();
        assert!(options.target_uri().is_err());
    }

    #[test]
    fn zero_timeout_is_a_precondition_violation() {
        let options = ValidationOptions {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(options.target_uri(), Err(Error::Engine(_))));
    }
}
