#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid {kind} handle: {raw:#x}")]
    InvalidHandle { kind: &'static str, raw: u64 },

    #[error("{kind} handle {raw:#x} is already registered")]
    DuplicateHandle { kind: &'static str, raw: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid API version: {0}")]
    InvalidVersion(String),

    #[error("cannot copy a pNext struct of type {0:?}")]
    UncopyableStruct(ash::vk::StructureType),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
