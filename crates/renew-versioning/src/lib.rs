//! ---
//! renew_section: "14-versioning"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Version parsing, remote descriptors and installed-version resolution."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Build metadata, the dotted release-version ordering, the remote version
//! descriptor, and the resolver that decides whether an update is warranted.

pub mod build_info;
pub mod descriptor;
pub mod resolver;
pub mod version;

pub use build_info::VersionInfo;
pub use descriptor::{ResolvedUpdate, VersionDescriptor};
pub use resolver::{ResolveError, ResolveOutcome, VersionResolver};
pub use version::{ReleaseVersion, VersionParseError};
