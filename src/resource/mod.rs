//! Remote artifacts attached to a job and their localisation inside the
//! execution environment.
//!
//! A [`Resource`] names a remote object (for example `s3://bucket/key`). Its
//! name doubles as the environment variable through which the job script
//! discovers the local copy, so localisation must be deterministic: the same
//! URL always maps to the same path below the execution root.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Environment variable carrying the remote URL for lifecycle scripts.
pub const REMOTE_URL_ENV: &str = "REMOTE_URL";
/// Environment variable carrying the localised path for lifecycle scripts.
pub const LOCAL_PATH_ENV: &str = "LOCAL_PATH";
/// Environment variable telling lifecycle scripts to transfer a tree.
pub const RECURSIVE_ENV: &str = "RECURSIVE";

/// A single `NAME=value` binding exported into a job container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Env {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

impl Env {
    /// Creates a binding.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Renders the binding as `NAME=value`.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Errors raised while mapping a URL onto the execution root.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LocalizeError {
    /// Raised when the URL has no `scheme://` prefix.
    #[error("resource URL `{url}` has no scheme")]
    MissingScheme {
        /// Offending URL.
        url: String,
    },
    /// Raised when the URL has no bucket or host component.
    #[error("resource URL `{url}` has no host")]
    MissingHost {
        /// Offending URL.
        url: String,
    },
    /// Raised when a path segment would escape the execution root.
    #[error("resource URL `{url}` escapes the execution root")]
    Traversal {
        /// Offending URL.
        url: String,
    },
}

/// Named remote artifact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resource {
    /// Environment variable name exposed to the job script.
    pub name: String,
    /// Remote location, for example `s3://bucket/prefix/object`.
    pub url: String,
    /// Whether the URL denotes a directory tree rather than a single object.
    pub recursive: bool,
}

impl Resource {
    /// Creates a single-object resource.
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            recursive: false,
        }
    }

    /// Marks the resource as a directory tree (or not).
    #[must_use]
    pub const fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Maps the URL to `<root>/<scheme>/<host>/<path>`.
    ///
    /// Query strings and fragments are dropped; empty and `.` segments are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LocalizeError`] when the URL lacks a scheme or host, or when
    /// a `..` segment appears.
    pub fn localized_path(&self, root: &Utf8Path) -> Result<Utf8PathBuf, LocalizeError> {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return Err(LocalizeError::MissingScheme {
                url: self.url.clone(),
            });
        };
        if scheme.is_empty() {
            return Err(LocalizeError::MissingScheme {
                url: self.url.clone(),
            });
        }

        let location = rest.split(['?', '#']).next().unwrap_or_default();
        let (host, path) = location.split_once('/').unwrap_or((location, ""));
        if host.is_empty() {
            return Err(LocalizeError::MissingHost {
                url: self.url.clone(),
            });
        }

        let mut local = root.join(scheme).join(host);
        for segment in path.split('/').filter(|seg| !seg.is_empty() && *seg != ".") {
            if segment == ".." {
                return Err(LocalizeError::Traversal {
                    url: self.url.clone(),
                });
            }
            local.push(segment);
        }
        Ok(local)
    }

    /// Environment handed to the download and upload lifecycle scripts.
    #[must_use]
    pub fn transfer_env(&self, local_path: &Utf8Path) -> Vec<Env> {
        vec![
            Env::new(REMOTE_URL_ENV, self.url.as_str()),
            Env::new(LOCAL_PATH_ENV, local_path.as_str()),
            Env::new(RECURSIVE_ENV, if self.recursive { "true" } else { "false" }),
        ]
    }
}

/// Resource downloaded before the job script runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Input {
    /// The remote artifact.
    pub resource: Resource,
    /// Local path assigned by [`Input::localize`].
    pub local_path: Option<Utf8PathBuf>,
}

impl Input {
    /// Wraps a resource that has not been localised yet.
    #[must_use]
    pub const fn new(resource: Resource) -> Self {
        Self {
            resource,
            local_path: None,
        }
    }

    /// Computes and records the local path under `root`.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalizeError`] from [`Resource::localized_path`].
    pub fn localize(&mut self, root: &Utf8Path) -> Result<&Utf8Path, LocalizeError> {
        let path = self.resource.localized_path(root)?;
        Ok(self.local_path.insert(path).as_path())
    }

    /// Binding of the resource name to its local path, once localised.
    #[must_use]
    pub fn env(&self) -> Option<Env> {
        self.local_path
            .as_ref()
            .map(|path| Env::new(self.resource.name.as_str(), path.as_str()))
    }
}

/// Resource uploaded after the job script succeeds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Output {
    /// The remote artifact.
    pub resource: Resource,
    /// Local path assigned by [`Output::localize`].
    pub local_path: Option<Utf8PathBuf>,
}

impl Output {
    /// Wraps a resource that has not been localised yet.
    #[must_use]
    pub const fn new(resource: Resource) -> Self {
        Self {
            resource,
            local_path: None,
        }
    }

    /// Computes and records the local path under `root`.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalizeError`] from [`Resource::localized_path`].
    pub fn localize(&mut self, root: &Utf8Path) -> Result<&Utf8Path, LocalizeError> {
        let path = self.resource.localized_path(root)?;
        Ok(self.local_path.insert(path).as_path())
    }

    /// Directory that must exist before the script writes its result.
    ///
    /// A recursive output is itself a directory; a single object only needs
    /// its parent.
    #[must_use]
    pub fn ensure_dir(&self) -> Option<&Utf8Path> {
        let path = self.local_path.as_deref()?;
        if self.resource.recursive {
            Some(path)
        } else {
            path.parent()
        }
    }

    /// Binding of the resource name to its local path, once localised.
    #[must_use]
    pub fn env(&self) -> Option<Env> {
        self.local_path
            .as_ref()
            .map(|path| Env::new(self.resource.name.as_str(), path.as_str()))
    }
}

/// Local file copied into the execution root before the script runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Include {
    /// Optional variable through which the script finds the copy.
    pub name: Option<String>,
    /// Path on the operator's machine.
    pub local_path: Utf8PathBuf,
}

impl Include {
    /// Creates an include bound to `name`.
    #[must_use]
    pub fn named(name: impl Into<String>, local_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: Some(name.into()),
            local_path: local_path.into(),
        }
    }

    /// Creates an anonymous include.
    #[must_use]
    pub fn anonymous(local_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: None,
            local_path: local_path.into(),
        }
    }

    /// Destination inside the execution root. `position` keeps includes
    /// sharing a file name apart.
    #[must_use]
    pub fn container_path(&self, root: &Utf8Path, position: usize) -> Utf8PathBuf {
        let file_name = self.local_path.file_name().unwrap_or("include");
        root.join("include").join(position.to_string()).join(file_name)
    }
}
