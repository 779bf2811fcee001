use thiserror::Error;

/// A node-local, user-recoverable validation issue.
///
/// These never abort anything: a node carrying an issue simply refuses to
/// compile until the user fixes its configuration or connections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeIssue {
    #[error("Node has no input connected")]
    NoInput,

    #[error("Node requires at least {required} inputs, but only {connected} are connected")]
    TooFewSources { required: usize, connected: usize },

    #[error("Node '{node_id}' would depend on itself")]
    SelfReference { node_id: String },

    #[error("Upstream node is invalid: {cause}")]
    UpstreamInvalid { cause: String },

    #[error("Column '{column}' no longer exists upstream")]
    MissingColumns { column: String },

    #[error("Inputs have no columns in common")]
    NoCommonColumns,

    #[error("No columns survive join deduplication")]
    NoExposableColumns,

    #[error(
        "Query must be zero or more module includes followed by a single SELECT/WITH statement"
    )]
    MalformedStatementSequence,

    #[error("Query text is empty")]
    EmptyQuery,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by graph-level operations: lookups, edge edits and
/// deserialization. Unlike [`NodeIssue`], these are hard failures of the
/// requested operation.
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("Node '{node_id}' does not exist in the graph")]
    NodeNotFound { node_id: String },

    #[error("Document references node '{missing_node_id}', which was never created")]
    DanglingReference { missing_node_id: String },

    #[error("Unknown node kind '{kind}'")]
    UnknownNodeKind { kind: String },

    #[error("Connecting '{from}' to '{to}' would create a cycle")]
    CycleDetected { from: String, to: String },

    #[error("Node '{node_id}' already has the maximum of {max} secondary inputs")]
    PortFull { node_id: String, max: usize },

    #[error("Node '{node_id}' does not accept a '{port}' input")]
    PortUnsupported {
        node_id: String,
        port: &'static str,
    },

    #[error("Malformed graph document: {0}")]
    MalformedDocument(String),
}
