use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Definition / parameter errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required input '{input}' for node {node}")]
    MissingRequiredInput { node: String, input: String },

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    // Registry errors
    #[error("Unknown node type: {node_type} ({version})")]
    UnknownNodeType { node_type: String, version: String },

    // Graph errors
    #[error("Node not found in flow: {0}")]
    NodeNotFound(String),

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    // Runner errors
    #[error("Node runner failed: {node}: {message}")]
    Runner { node: String, message: String },

    #[error("Run cannot suspend here: {0}")]
    Suspension(String),

    // Collaborator errors
    #[error("Code execution failed: {0}")]
    CodeExecution(String),

    #[error("Outbound delivery failed: {0}")]
    Outbound(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Shorthand for a runner failure attributed to a node.
    pub fn runner(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runner {
            node: node.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
