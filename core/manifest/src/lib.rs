//! Manifest decoding for gitmount workspaces.
//!
//! An AOSP-style XML manifest describes the projects, remotes, and
//! defaults of a multi-repository workspace. This crate only decodes the
//! document; repository layout and mounting live in `gitmount-fs`.

pub mod parser;

pub use parser::{Copyfile, Defaults, Linkfile, Manifest, Project, Remote};
