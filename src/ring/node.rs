use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum NodeError {
    #[error("node, {0:?}, has an empty server")]
    EmptyServer(String),
}

/// A placement target on the ring: a server plus an optional instance qualifier for
/// servers running several logical processes. An empty `instance` means "no instance".
#[derive(Clone)]
pub struct Node {
    server: String,
    instance: String,
}

impl Node {
    /// `server` must be non-empty; parse untrusted input with [`FromStr`] to get a checked
    /// [`NodeError`] instead.
    pub fn new<S, I>(server: S, instance: I) -> Self
    where
        S: Into<String>,
        I: Into<String>,
    {
        let server = server.into();
        debug_assert!(!server.is_empty(), "node server must be non-empty");
        Self { server, instance: instance.into() }
    }

    pub fn server(&self) -> &str { self.server.as_str() }

    pub fn instance(&self) -> Option<&str> {
        if self.instance.is_empty() { None } else { Some(self.instance.as_str()) }
    }

    /// Renders the node the way Graphite's python ring renders its `(server, instance)`
    /// tuple, which is the input fed to the position function for every replica.
    pub fn key_value(&self) -> String {
        match self.instance() {
            None => format!("('{}', None)", self.server),
            Some(instance) => format!("('{}', '{}')", self.server, instance),
        }
    }

    /// Placement identity; equality, hashing and removal all compare this string.
    pub fn identity(&self) -> String { self.to_string() }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.instance() {
            None => write!(f, "{}", self.server),
            Some(instance) => write!(f, "{}:{}", self.server, instance),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({})", self)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool { self.identity() == other.identity() }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) { self.identity().hash(state) }
}

impl FromStr for Node {
    type Err = NodeError;

    /// Parses `server` or `server:instance`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (server, instance) = match s.trim().split_once(':') {
            Some((server, instance)) => (server, instance),
            None => (s.trim(), ""),
        };

        if server.is_empty() {
            Err(NodeError::EmptyServer(s.to_string()))
        } else {
            Ok(Node::new(server, instance))
        }
    }
}
