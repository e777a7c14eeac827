mod settings;

pub use settings::{
    AutoSaveConfig, LocalConfig, LoggingConfig, RemoteConfig, Settings, UserConfig,
};
