use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::info;

use neuro_types::{DeviceConfig, DeviceError, DeviceResult};

/// Load the simulator configuration from a JSON file.
///
/// A missing file yields the defaults. A file that exists but cannot be parsed, or that
/// holds values the device cannot run with, is an error.
pub fn load_config(path: impl AsRef<Path>) -> DeviceResult<DeviceConfig> {
    let path = path.as_ref();
    let config = match fs::read_to_string(path) {
        Ok(contents) => {
            let config: DeviceConfig = serde_json::from_str(&contents).map_err(|e| {
                DeviceError::Configuration(format!(
                    "Could not parse configuration file at '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            info!(path = %path.display(), "Loaded configuration");
            config
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "Configuration file not found, using defaults");
            DeviceConfig::default()
        }
        Err(e) => return Err(e.into()),
    };

    config.validate()?;
    Ok(config)
}
