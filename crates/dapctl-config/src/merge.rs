use toml::Value;

use crate::config::Config;
use crate::error::ConfigError;

/// Layer the TOML document `overlay` from `origin` on top of `base`.
///
/// Tables merge key by key, so a project file can add one adapter or
/// override a single log setting. Arrays are replaced outright: a project
/// that declares `[[configurations]]` replaces the global list.
pub fn merge_configs(base: &Config, origin: &str, overlay: &str) -> Result<Config, ConfigError> {
    let overlay: Value = toml::from_str(overlay).map_err(|e| ConfigError::parse(origin, e))?;
    let mut merged = Value::try_from(base).map_err(|e| ConfigError::parse(origin, e))?;
    overlay_value(&mut merged, overlay);
    merged.try_into().map_err(|e: toml::de::Error| ConfigError::parse(origin, e))
}

fn overlay_value(target: &mut Value, overlay: Value) {
    match (target, overlay) {
        (Value::Table(target), Value::Table(overlay)) => {
            for (key, value) in overlay {
                match target.get_mut(&key) {
                    Some(existing) => overlay_value(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, overlay) => *target = overlay,
    }
}
