//! Config file handling for `~/.arbiter/config.toml`.
//!
//! Every section of [`ArbiterConfig`] is optional in the file; missing
//! sections keep the bundled defaults.

use arbiter_types::{ArbiterConfig, EnforcementMode, RiskLevel};
use std::fs;
use std::path::{Path, PathBuf};

/// Return the path to `~/.arbiter/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".arbiter").join("config.toml")
}

/// Load and validate the config at `path`. Returns `None` if the file does
/// not exist.
pub fn load_from(path: &Path) -> Result<Option<ArbiterConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: ArbiterConfig = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    cfg.validate().map_err(|e| format!("Invalid config at {}: {}", path.display(), e))?;
    Ok(Some(cfg))
}

/// Apply `ARBITER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARBITER_TICK_MS` | `tick_period_ms` |
/// | `ARBITER_ENFORCEMENT` | `policy.enforcement` (`strict` / `standard`) |
/// | `ARBITER_MAX_RISK` | `gate.max_risk` (`low` … `critical`) |
/// | `ARBITER_LLM_URL` | `llm.base_url` |
/// | `ARBITER_LLM_MODEL` | `llm.model` |
/// | `ARBITER_LLM_ENABLED` | `llm.enabled` (`true` / `false`) |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut ArbiterConfig) {
    if let Ok(v) = std::env::var("ARBITER_TICK_MS")
        && let Ok(ms) = v.parse::<u64>()
        && ms > 0
    {
        cfg.tick_period_ms = ms;
    }
    if let Ok(v) = std::env::var("ARBITER_ENFORCEMENT") {
        match v.to_ascii_lowercase().as_str() {
            "strict" => cfg.policy.enforcement = EnforcementMode::Strict,
            "standard" => cfg.policy.enforcement = EnforcementMode::Standard,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("ARBITER_MAX_RISK")
        && let Some(level) = parse_risk(&v)
    {
        cfg.gate.max_risk = level;
    }
    if let Ok(v) = std::env::var("ARBITER_LLM_URL") {
        cfg.llm.base_url = v;
    }
    if let Ok(v) = std::env::var("ARBITER_LLM_MODEL") {
        cfg.llm.model = v;
    }
    if let Ok(v) = std::env::var("ARBITER_LLM_ENABLED")
        && let Ok(enabled) = v.parse::<bool>()
    {
        cfg.llm.enabled = enabled;
    }
}

fn parse_risk(raw: &str) -> Option<RiskLevel> {
    match raw.to_ascii_lowercase().as_str() {
        "low" => Some(RiskLevel::Low),
        "medium" => Some(RiskLevel::Medium),
        "high" => Some(RiskLevel::High),
        "critical" => Some(RiskLevel::Critical),
        _ => None,
    }
}

/// Write `cfg` to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &ArbiterConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only (rwx------): the file carries policy rules.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_points_to_arbiter_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".arbiter"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = ArbiterConfig::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.capabilities, cfg.capabilities);
        assert_eq!(loaded.routing.len(), cfg.routing.len());
        assert_eq!(loaded.policy.rules.len(), cfg.policy.rules.len());
        assert_eq!(loaded.needs.mappings.len(), cfg.needs.mappings.len());
        assert_eq!(loaded.budgets.emergency.total_ms(), cfg.budgets.emergency.total_ms());
    }

    #[test]
    fn partial_file_keeps_default_sections() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[preemption]\nqueue_limit = 4\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.preemption.queue_limit, 4);
        assert!(!loaded.capabilities.is_empty());
    }

    #[test]
    fn invalid_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[preemption]\nqueue_limit = \"many\"\n").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&ArbiterConfig::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = std::fs::metadata(path.parent().unwrap()).expect("dir metadata").permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    // Each test below owns a distinct variable so they may run in parallel.

    #[test]
    fn apply_env_overrides_changes_tick_period() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ARBITER_TICK_MS", "100") };
        let mut cfg = ArbiterConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.tick_period_ms, 100);
        unsafe { std::env::remove_var("ARBITER_TICK_MS") };
    }

    #[test]
    fn apply_env_overrides_changes_enforcement() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ARBITER_ENFORCEMENT", "STRICT") };
        let mut cfg = ArbiterConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.policy.enforcement, EnforcementMode::Strict);
        unsafe { std::env::remove_var("ARBITER_ENFORCEMENT") };
    }

    #[test]
    fn apply_env_overrides_ignores_unknown_risk() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ARBITER_MAX_RISK", "apocalyptic") };
        let mut cfg = ArbiterConfig::default();
        let original = cfg.gate.max_risk;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.gate.max_risk, original);
        unsafe { std::env::remove_var("ARBITER_MAX_RISK") };
    }

    #[test]
    fn apply_env_overrides_changes_llm_endpoint() {
        // SAFETY: no other test touches these variables.
        unsafe {
            std::env::set_var("ARBITER_LLM_URL", "http://planner-host:11434");
            std::env::set_var("ARBITER_LLM_MODEL", "mistral");
        }
        let mut cfg = ArbiterConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.llm.base_url, "http://planner-host:11434");
        assert_eq!(cfg.llm.model, "mistral");
        unsafe {
            std::env::remove_var("ARBITER_LLM_URL");
            std::env::remove_var("ARBITER_LLM_MODEL");
        }
    }

    #[test]
    fn risk_levels_parse_case_insensitively() {
        assert_eq!(parse_risk("High"), Some(RiskLevel::High));
        assert_eq!(parse_risk("critical"), Some(RiskLevel::Critical));
        assert_eq!(parse_risk(""), None);
    }
}
