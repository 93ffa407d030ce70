use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::Figment;
use figment::providers::{Format, Json, Serialized};
use snafu::{ResultExt, Snafu};

use murmur_core::ChatOptions;

const OPTIONS_DIRECTORY_NAME: &str = "murmur";
const OPTIONS_FILE_NAME: &str = "options.json";

/// Chat options that persist across restarts.
///
/// Reads go through an `ArcSwap` so the session can grab the current value
/// without locking; updates persist first and swap after.
pub struct OptionsStore {
    options: Arc<ArcSwap<ChatOptions>>,
    config_path: PathBuf,
}

impl OptionsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(OPTIONS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(format!(".{OPTIONS_DIRECTORY_NAME}")))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(OPTIONS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let options = Self::load_from_disk(&config_path);
        Self {
            options: Arc::new(ArcSwap::from_pointee(options)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn options(&self) -> Arc<ChatOptions> {
        self.options.load_full()
    }

    pub fn update(&self, options: ChatOptions) -> Result<(), OptionsError> {
        self.persist(&options)?;
        self.options.store(Arc::new(options));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> ChatOptions {
        if !path.exists() {
            tracing::info!("options file not found at {:?}, using defaults", path);
            return ChatOptions::default();
        }

        let figment =
            Figment::from(Serialized::defaults(ChatOptions::default())).merge(Json::file(path));

        match figment.extract::<ChatOptions>() {
            Ok(options) => options,
            Err(error) => {
                tracing::warn!(
                    "failed to parse options from {:?}: {}. using defaults",
                    path,
                    error
                );
                ChatOptions::default()
            }
        }
    }

    fn persist(&self, options: &ChatOptions) -> Result<(), OptionsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-options-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(options).context(SerializeOptionsSnafu {
            stage: "serialize-options-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-options-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-options-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved chat options to {:?}", self.config_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(file_name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("murmur-options-tests-{}", std::process::id()))
            .join(file_name)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = OptionsStore::new(scratch_path("never-written.json"));
        assert!(store.options().is_empty());
    }

    #[test]
    fn update_round_trips_through_disk() {
        let path = scratch_path("round-trip.json");
        let store = OptionsStore::new(path.clone());

        let mut options = ChatOptions::default();
        options.model = Some("house-model".to_string());
        options.temperature = Some(0.4);
        store.update(options.clone()).unwrap();

        let reloaded = OptionsStore::new(path.clone());
        assert_eq!(*reloaded.options(), options);

        let _ = std::fs::remove_file(path);
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OptionsError {
    #[snafu(display("failed to create options directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize options on `{stage}`: {source}"))]
    SerializeOptions {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write options file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to move options file from {from:?} to {to:?} on `{stage}`: {source}"))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}
