/// Contract errors raised before anything is spawned.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Required field '{0}' is missing or blank")]
    MissingField(&'static str),

    #[error("Command template not found: {0}")]
    TemplateNotFound(String),
}
