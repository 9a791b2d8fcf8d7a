use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;

use super::InvalidateReason;

/// Stable identity of a node in the request graph, independent of its index
pub type ContentKey = String;

/// The kind of work a request node performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RequestType {
  AtlaspackBuild = 1,
  BundleGraph = 2,
  AssetGraph = 3,
  Entry = 4,
  Target = 5,
  AtlaspackConfig = 6,
  Path = 7,
  DevDep = 8,
  Asset = 9,
  Config = 10,
  WriteBundles = 11,
  Package = 12,
  WriteBundle = 13,
  Validation = 14,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestNode<T> {
  pub id: ContentKey,
  pub request_type: RequestType,
  pub invalidate_reason: InvalidateReason,
  /// Result of the last successful run. Empty when the result lives under `result_cache_key`
  /// and hasn't been read back yet.
  pub result: Option<Arc<T>>,
  pub result_cache_key: Option<String>,
}

impl<T> RequestNode<T> {
  pub fn new(id: ContentKey, request_type: RequestType) -> Self {
    Self {
      id,
      request_type,
      invalidate_reason: InvalidateReason::INITIAL_BUILD,
      result: None,
      result_cache_key: None,
    }
  }
}

/// Nodes of the request graph.
///
/// Request nodes are units of work; every other variant is a signal that requests attach
/// invalidation edges to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestGraphNode<T> {
  Request(RequestNode<T>),
  /// A project-relative file path
  File { path: PathBuf },
  Glob { pattern: String },
  /// One segment of a file name pattern, linked to its parent segment by `Dirname` edges
  FileName { name: String },
  Env { name: String, value: Option<String> },
  Option { name: String, hash: String },
  ConfigKey {
    path: PathBuf,
    key: String,
    content_hash: String,
  },
}

impl<T> RequestGraphNode<T> {
  pub fn request(id: ContentKey, request_type: RequestType) -> Self {
    RequestGraphNode::Request(RequestNode::new(id, request_type))
  }

  pub fn file(path: impl Into<PathBuf>) -> Self {
    RequestGraphNode::File { path: path.into() }
  }

  pub fn content_key(&self) -> ContentKey {
    match self {
      RequestGraphNode::Request(request) => request.id.clone(),
      RequestGraphNode::File { path } => file_content_key(path),
      RequestGraphNode::Glob { pattern } => glob_content_key(pattern),
      RequestGraphNode::FileName { name } => file_name_content_key(name),
      RequestGraphNode::Env { name, .. } => env_content_key(name),
      RequestGraphNode::Option { name, .. } => option_content_key(name),
      RequestGraphNode::ConfigKey { path, key, .. } => config_key_content_key(path, key),
    }
  }

  pub fn as_request(&self) -> Option<&RequestNode<T>> {
    match self {
      RequestGraphNode::Request(request) => Some(request),
      _ => None,
    }
  }

  pub fn as_request_mut(&mut self) -> Option<&mut RequestNode<T>> {
    match self {
      RequestGraphNode::Request(request) => Some(request),
      _ => None,
    }
  }
}

pub fn file_content_key(path: &Path) -> ContentKey {
  path.to_string_lossy().into_owned()
}

pub fn glob_content_key(pattern: &str) -> ContentKey {
  format!("glob:{pattern}")
}

pub fn file_name_content_key(name: &str) -> ContentKey {
  format!("file_name:{name}")
}

pub fn env_content_key(name: &str) -> ContentKey {
  format!("env:{name}")
}

pub fn option_content_key(name: &str) -> ContentKey {
  format!("option:{name}")
}

pub fn config_key_content_key(path: &Path, key: &str) -> ContentKey {
  format!("config_key:{}:{key}", path.to_string_lossy())
}

/// Edge types of the request graph. Numbering is part of the persisted format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RequestEdgeType {
  /// Parent request -> request it ran
  SubRequest = 2,
  /// Request -> file, env, option or config key it must rerun after when they change
  InvalidatedByUpdate = 3,
  /// Request -> file it must rerun after when deleted
  InvalidatedByDelete = 4,
  /// Request -> file or glob it must rerun after when created
  InvalidatedByCreate = 5,
  /// File <-> file name segments of a "created above this file" pattern
  InvalidatedByCreateAbove = 6,
  /// File name segment -> segment of its parent directory
  Dirname = 7,
}

/// How a request wants to be invalidated on file creation
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileCreateInvalidation {
  /// A file at exactly this path is created
  Path { file_path: PathBuf },
  /// Any file matching the glob is created
  Glob { glob: String },
  /// A file called `file_name` is created in any directory containing `above_file_path`
  FileNameAbove {
    file_name: String,
    above_file_path: PathBuf,
  },
}

/// A previous update-type invalidation of a request, handed back to it when it reruns
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestInvalidation {
  File { file_path: PathBuf },
  Env { key: String },
  Option { key: String },
}

/// The three states a request node can be in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
  Valid,
  Invalid,
  Incomplete,
}
