//! `system.git` scripting function
//!
//! Scripts call `system.git.call(operation, options)`. Options are a flat map whose
//! recognized keys depend on the operation; anything else is refused so a typo
//! does not silently fall back to a default.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{GitFailure, ScopeBridge};
use crate::git::ErrorKind;
use crate::server::protocol::GitOperationRequest;
use crate::transport::CredentialReference;

pub const NAMESPACE: &str = "system.git";

/// Signature of a function handed to the host's scripting registry
pub type ScriptFunction =
    Box<dyn Fn(&str, &Map<String, Value>) -> Result<Value, GitFailure> + Send + Sync>;

/// The host's scripting-function registry
pub trait ScriptFunctionRegistry {
    fn register(&mut self, qualified_name: &str, function: ScriptFunction);
}

fn invalid(message: impl Into<String>) -> GitFailure {
    GitFailure::new(ErrorKind::InvalidRequest, message)
}

/// Recognized option keys per operation (besides `path`)
fn recognized_options(operation: &str) -> Option<&'static [&'static str]> {
    let options: &'static [&'static str] = match operation {
        "clone" | "open" => &["remote", "branch", "credential"],
        "fetch" => &["remote", "credential"],
        "pull" | "push" => &["remote", "branch", "credential"],
        "commit" => &["message", "authorName", "authorEmail", "paths"],
        "status" | "branches" | "close" => &[],
        _ => return None,
    };
    Some(options)
}

struct Options<'a> {
    map: &'a Map<String, Value>,
}

impl Options<'_> {
    fn string(&self, key: &str) -> Result<Option<String>, GitFailure> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(invalid(format!(
                "option '{}' must be a string, got {}",
                key, other
            ))),
        }
    }

    fn strings(&self, key: &str) -> Result<Vec<String>, GitFailure> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(format!("option '{}' must hold strings", key)))
                })
                .collect(),
            Some(other) => Err(invalid(format!(
                "option '{}' must be a list of strings, got {}",
                key, other
            ))),
        }
    }

    fn credential(&self) -> Result<Option<CredentialReference>, GitFailure> {
        Ok(self.string("credential")?.map(CredentialReference::new))
    }
}

/// Turn a script call into a repository path plus wire request
pub fn build_request(
    operation: &str,
    options: &Map<String, Value>,
) -> Result<(String, GitOperationRequest), GitFailure> {
    let operation = operation.trim().to_ascii_lowercase();
    let recognized = recognized_options(&operation)
        .ok_or_else(|| invalid(format!("unknown git operation '{}'", operation)))?;

    if let Some(unknown) = options
        .keys()
        .find(|k| k.as_str() != "path" && !recognized.contains(&k.as_str()))
    {
        return Err(invalid(format!(
            "option '{}' is not recognized by '{}'",
            unknown, operation
        )));
    }

    let opts = Options { map: options };
    let path = opts
        .string("path")?
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| invalid("option 'path' is required"))?;

    let request = match operation.as_str() {
        "clone" | "open" => GitOperationRequest::Clone {
            remote_url: opts.string("remote")?,
            branch: opts.string("branch")?,
            credential: opts.credential()?,
        },
        "fetch" => GitOperationRequest::Fetch {
            remote: opts.string("remote")?,
            credential: opts.credential()?,
        },
        "pull" => GitOperationRequest::Pull {
            remote: opts.string("remote")?,
            branch: opts.string("branch")?,
            credential: opts.credential()?,
        },
        "push" => GitOperationRequest::Push {
            remote: opts.string("remote")?,
            branch: opts.string("branch")?,
            credential: opts.credential()?,
        },
        "commit" => GitOperationRequest::Commit {
            message: opts.string("message")?.unwrap_or_default(),
            author_name: opts.string("authorName")?.unwrap_or_default(),
            author_email: opts.string("authorEmail")?.unwrap_or_default(),
            paths: opts.strings("paths")?,
        },
        "status" => GitOperationRequest::Status,
        "branches" => GitOperationRequest::Branches,
        _ => GitOperationRequest::Close,
    };
    Ok((path, request))
}

/// The scripting module registered under [`NAMESPACE`]
#[derive(Clone)]
pub struct GitScriptModule {
    bridge: ScopeBridge,
}

impl GitScriptModule {
    pub fn new(bridge: ScopeBridge) -> Self {
        Self { bridge }
    }

    /// `system.git.call(operation, options)`: the result payload as a JSON map
    pub fn call(&self, operation: &str, options: &Map<String, Value>) -> Result<Value, GitFailure> {
        let (path, request) = build_request(operation, options)?;
        let result = self.bridge.invoke(&path, request)?;
        serde_json::to_value(result)
            .map_err(|e| GitFailure::new(ErrorKind::InternalOperation, e.to_string()))
    }

    pub fn register(self: Arc<Self>, registry: &mut dyn ScriptFunctionRegistry) {
        let name = format!("{}.call", NAMESPACE);
        registry.register(
            &name,
            Box::new(move |operation: &str, options: &Map<String, Value>| {
                self.call(operation, options)
            }),
        );
    }
}
