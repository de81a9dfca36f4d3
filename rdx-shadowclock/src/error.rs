use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShadowError {
    #[error("Insufficient resources for {0}")]
    InsufficientResources(String),

    #[error("Unknown reduction method: {0}")]
    UnknownReductionMethod(String),

    #[error("Requirements not met for {0}")]
    RequirementNotMet(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Upgrade already purchased: {0}")]
    AlreadyPurchased(String),

    #[error("Namespace already claimed: {0}")]
    NamespaceClaimed(String),

    #[error("Invalid namespace: {0:?}")]
    InvalidNamespace(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ShadowError>;
