//! Run configuration, validation and fingerprinting.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

/// Remove every `tag` element whose text contains `text_contains`,
/// independent of how often it repeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerRule {
    pub text_contains: String,
    #[serde(default = "default_banner_tag")]
    pub tag: String,
}

fn default_banner_tag() -> String {
    "div".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    pub banner_enabled: bool,
    /// Fraction of spine documents a snippet must appear in to be a banner.
    pub banner_min_repeat: f64,
    pub banner_top_chars: usize,
    pub banner_bottom_chars: usize,
    pub banners: Vec<BannerRule>,

    pub force: bool,
    pub dry_run: bool,

    /// Characters that end a sentence for the paragraph merge heuristic.
    pub closing_punctuation: String,

    pub whitelist: Vec<String>,
    pub whitelist_path: Option<PathBuf>,
    pub dictionary_dir: Option<PathBuf>,

    pub blacklist: Vec<String>,
    pub blacklist_path: Option<PathBuf>,
    pub blacklist_max_line_len: usize,
    pub builtin_watermarks: bool,
    /// Elements removed wherever they appear.
    pub blacklist_tags: Vec<String>,
    /// Attributes removed from every element.
    pub blacklist_attributes: Vec<String>,
    /// Attributes removed from the named tags only.
    pub blacklist_attributes_on_tags: BTreeMap<String, Vec<String>>,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            banner_enabled: true,
            banner_min_repeat: 0.5,
            banner_top_chars: 300,
            banner_bottom_chars: 300,
            banners: Vec::new(),
            force: false,
            dry_run: false,
            closing_punctuation: ".!?\u{2026}:".to_string(),
            whitelist: Vec::new(),
            whitelist_path: None,
            dictionary_dir: None,
            blacklist: Vec::new(),
            blacklist_path: None,
            blacklist_max_line_len: 160,
            builtin_watermarks: true,
            blacklist_tags: Vec::new(),
            blacklist_attributes: Vec::new(),
            blacklist_attributes_on_tags: BTreeMap::new(),
        }
    }
}

impl CleanConfig {
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_path = config_path.as_ref();
        let content = std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            config_path: config_path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            config_path: config_path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Checks the settings that do not need any file access.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.banner_min_repeat.is_finite() || !(0.0..=1.0).contains(&self.banner_min_repeat) {
            return Err(ConfigError::ThresholdOutOfRange(self.banner_min_repeat));
        }
        if self.closing_punctuation.trim().is_empty() {
            return Err(ConfigError::NoClosingPunctuation);
        }
        Ok(())
    }

    pub fn closing_chars(&self) -> Vec<char> {
        self.closing_punctuation
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect()
    }
}

/// SHA-256 over everything that changes what the pipeline writes.
/// `force` and `dry_run` are run modes, not part of the identity.
pub fn fingerprint(config: &CleanConfig, whitelist: &[String], blacklist: &[String]) -> String {
    let mut whitelist: Vec<String> = whitelist.iter().map(|w| w.to_lowercase()).collect();
    whitelist.sort();
    whitelist.dedup();

    let mut hasher = Sha256::new();
    let mut field = |name: &str, value: &str| {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    };
    field("banner_enabled", &config.banner_enabled.to_string());
    field("banner_min_repeat", &config.banner_min_repeat.to_string());
    field("banner_top_chars", &config.banner_top_chars.to_string());
    field("banner_bottom_chars", &config.banner_bottom_chars.to_string());
    for rule in &config.banners {
        field("banner", &format!("{}|{}", rule.tag, rule.text_contains));
    }
    field("closing_punctuation", &config.closing_punctuation);
    field("blacklist_max_line_len", &config.blacklist_max_line_len.to_string());
    field("builtin_watermarks", &config.builtin_watermarks.to_string());
    field(
        "dictionary",
        &config
            .dictionary_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    );
    for word in &whitelist {
        field("whitelist", word);
    }
    for pattern in blacklist {
        field("blacklist", pattern);
    }
    for tag in &config.blacklist_tags {
        field("blacklist_tag", tag);
    }
    for attr in &config.blacklist_attributes {
        field("blacklist_attribute", attr);
    }
    for (tag, attrs) in &config.blacklist_attributes_on_tags {
        field("blacklist_attributes_on_tag", &format!("{tag}|{}", attrs.join(",")));
    }

    let digest = hasher.finalize();
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = CleanConfig::from_toml_str("").unwrap();
        assert_eq!(config, CleanConfig::default());
        assert_eq!(config.blacklist_max_line_len, 160);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides() {
        let config = CleanConfig::from_toml_str(
            r#"
            banner_min_repeat = 0.8
            whitelist = ["well-being"]

            [[banners]]
            text_contains = "Project Gutenberg"
            tag = "p"
            "#,
        )
        .unwrap();
        assert_eq!(config.banner_min_repeat, 0.8);
        assert_eq!(config.whitelist, vec!["well-being".to_string()]);
        assert_eq!(config.banners[0].tag, "p");
        assert!(config.banner_enabled);
    }

    #[test]
    fn test_threshold_out_of_range() {
        let config = CleanConfig {
            banner_min_repeat: 1.5,
            ..CleanConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange(_))
        ));
        let config = CleanConfig {
            banner_min_repeat: f64::NAN,
            ..CleanConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fingerprint_ignores_run_modes() {
        let base = CleanConfig::default();
        let forced = CleanConfig {
            force: true,
            dry_run: true,
            ..CleanConfig::default()
        };
        assert_eq!(fingerprint(&base, &[], &[]), fingerprint(&forced, &[], &[]));

        let stricter = CleanConfig {
            banner_min_repeat: 0.9,
            ..CleanConfig::default()
        };
        assert_ne!(fingerprint(&base, &[], &[]), fingerprint(&stricter, &[], &[]));
    }

    #[test]
    fn test_markup_blacklist_from_toml() {
        let config = CleanConfig::from_toml_str(
            r#"
            blacklist_tags = ["script"]
            blacklist_attributes = ["style"]

            [blacklist_attributes_on_tags]
            img = ["width", "height"]
            "#,
        )
        .unwrap();
        assert_eq!(config.blacklist_tags, vec!["script".to_string()]);
        assert_eq!(config.blacklist_attributes_on_tags["img"], vec!["width", "height"]);
        assert_ne!(
            fingerprint(&config, &[], &[]),
            fingerprint(&CleanConfig::default(), &[], &[])
        );
    }

    #[test]
    fn test_fingerprint_whitelist_is_order_and_case_insensitive() {
        let config = CleanConfig::default();
        let a = fingerprint(&config, &["Well-Being".into(), "x-ray".into()], &[]);
        let b = fingerprint(&config, &["x-ray".into(), "well-being".into()], &[]);
        assert_eq!(a, b);
        let c = fingerprint(&config, &["x-ray".into()], &["^Scanned".into()]);
        assert_ne!(a, c);
    }
}
