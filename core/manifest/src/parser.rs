//! Manifest document model and XML decoding.
//!
//! The manifest enumerates many project repositories that together form a
//! single workspace. Attributes map verbatim to fields; the only derived
//! state is the per-project group set.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use gitmount_common::{Error, Result};

/// `<copyfile>` child of a project.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct Copyfile {
    #[serde(rename = "@src")]
    pub src: Option<String>,
    #[serde(rename = "@dest")]
    pub dest: Option<String>,
}

/// `<linkfile>` child of a project.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct Linkfile {
    #[serde(rename = "@src")]
    pub src: Option<String>,
    #[serde(rename = "@dest")]
    pub dest: Option<String>,
}

/// One `<project>` element.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct Project {
    #[serde(rename = "@path")]
    pub path: Option<String>,
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@remote")]
    pub remote: Option<String>,
    #[serde(rename = "@revision")]
    pub revision: Option<String>,
    #[serde(rename = "@groups")]
    pub groups: Option<String>,

    #[serde(rename = "@dest-branch")]
    pub dest_branch: Option<String>,
    #[serde(rename = "@sync-j")]
    pub sync_j: Option<String>,
    #[serde(rename = "@sync-c")]
    pub sync_c: Option<String>,
    #[serde(rename = "@sync-s")]
    pub sync_s: Option<String>,
    #[serde(rename = "@upstream")]
    pub upstream: Option<String>,
    #[serde(rename = "@clone-depth")]
    pub clone_depth: Option<String>,
    #[serde(rename = "@force-path")]
    pub force_path: Option<String>,

    #[serde(rename = "copyfile", default)]
    pub copyfiles: Vec<Copyfile>,
    #[serde(rename = "linkfile", default)]
    pub linkfiles: Vec<Linkfile>,

    /// Derived from `groups`, populated by [`Manifest::parse`].
    #[serde(skip)]
    pub group_set: HashSet<String>,
}

impl Project {
    fn parse_groups(&mut self) {
        if let Some(groups) = &self.groups {
            self.group_set = groups
                .split(',')
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Whether the project belongs to the named group.
    pub fn in_group(&self, group: &str) -> bool {
        self.group_set.contains(group)
    }

    /// Projects in group `notdefault` are excluded from the workspace.
    pub fn active(&self) -> bool {
        !self.in_group("notdefault")
    }

    /// Path relative to the workspace root, defaulting to empty.
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }
}

/// The `<remote>` element.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct Remote {
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@alias")]
    pub alias: Option<String>,
    #[serde(rename = "@fetch")]
    pub fetch: Option<String>,
    #[serde(rename = "@review")]
    pub review: Option<String>,
    #[serde(rename = "@revision")]
    pub revision: Option<String>,
}

/// The `<default>` element.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct Defaults {
    #[serde(rename = "@revision")]
    pub revision: Option<String>,
    #[serde(rename = "@remote")]
    pub remote: Option<String>,
    #[serde(rename = "@dest-branch")]
    pub dest_branch: Option<String>,
    #[serde(rename = "@sync-j")]
    pub sync_j: Option<String>,
    #[serde(rename = "@sync-c")]
    pub sync_c: Option<String>,
    #[serde(rename = "@sync-s")]
    pub sync_s: Option<String>,
}

/// The `<manifest>` document.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    #[serde(rename = "default", default)]
    pub default: Defaults,
    #[serde(rename = "remote", default)]
    pub remote: Remote,
    #[serde(rename = "project", default)]
    pub projects: Vec<Project>,
}

impl Manifest {
    /// Decode a manifest document.
    ///
    /// # Errors
    /// - `Manifest` on malformed XML. No semantic validation is done
    ///   beyond group parsing.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut manifest: Manifest = quick_xml::de::from_str(contents)
            .map_err(|e| Error::Manifest(e.to_string()))?;
        for project in &mut manifest.projects {
            project.parse_groups();
        }
        Ok(manifest)
    }

    /// Read and decode a manifest file.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Projects not excluded by the `notdefault` group.
    pub fn active_projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.iter().filter(|p| p.active())
    }

    /// Effective remote for a project, falling back to the manifest remote.
    pub fn effective_remote<'a>(&'a self, project: &'a Project) -> Option<&'a str> {
        project
            .remote
            .as_deref()
            .or(self.remote.name.as_deref())
    }

    /// Effective revision for a project, falling back to the default.
    pub fn effective_revision<'a>(&'a self, project: &'a Project) -> Option<&'a str> {
        project
            .revision
            .as_deref()
            .or(self.default.revision.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AOSP_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest>
  <remote  name="aosp"
           fetch=".."
           review="https://android-review.googlesource.com/" />
  <default revision="master"
           remote="aosp"
           sync-j="4" />

  <project path="build" name="platform/build" groups="pdk,tradefed" >
    <copyfile src="core/root.mk" dest="Makefile" />
  </project>
  <project path="build/soong" name="platform/build/soong" groups="pdk,tradefed" >
    <linkfile src="root.bp" dest="Android.bp" />
  </project>
</manifest>"#;

    #[test]
    fn test_parse_aosp_manifest() {
        let manifest = Manifest::parse(AOSP_MANIFEST).unwrap();

        assert_eq!(manifest.remote.name.as_deref(), Some("aosp"));
        assert_eq!(manifest.remote.fetch.as_deref(), Some(".."));
        assert_eq!(
            manifest.remote.review.as_deref(),
            Some("https://android-review.googlesource.com/")
        );
        assert_eq!(manifest.default.revision.as_deref(), Some("master"));
        assert_eq!(manifest.default.remote.as_deref(), Some("aosp"));
        assert_eq!(manifest.default.sync_j.as_deref(), Some("4"));

        assert_eq!(manifest.projects.len(), 2);
        let build = &manifest.projects[0];
        assert_eq!(build.path.as_deref(), Some("build"));
        assert_eq!(build.name.as_deref(), Some("platform/build"));
        assert_eq!(
            build.copyfiles,
            vec![Copyfile {
                src: Some("core/root.mk".to_string()),
                dest: Some("Makefile".to_string()),
            }]
        );

        let soong = &manifest.projects[1];
        assert_eq!(soong.path.as_deref(), Some("build/soong"));
        assert_eq!(
            soong.linkfiles,
            vec![Linkfile {
                src: Some("root.bp".to_string()),
                dest: Some("Android.bp".to_string()),
            }]
        );
    }

    #[test]
    fn test_group_sets() {
        let manifest = Manifest::parse(AOSP_MANIFEST).unwrap();
        for project in &manifest.projects {
            assert!(project.in_group("pdk"));
            assert!(project.in_group("tradefed"));
            assert!(!project.in_group("notdefault"));
            assert!(project.active());
        }
    }

    #[test]
    fn test_notdefault_filter() {
        let xml = r#"<manifest>
  <project path="a" name="a" />
  <project path="b" name="b" groups="notdefault" />
  <project path="c" name="c" groups="x,,notdefault" />
</manifest>"#;
        let manifest = Manifest::parse(xml).unwrap();
        let active: Vec<&str> = manifest.active_projects().map(|p| p.path()).collect();
        assert_eq!(active, ["a"]);
    }

    #[test]
    fn test_effective_fallbacks() {
        let manifest = Manifest::parse(AOSP_MANIFEST).unwrap();
        let build = &manifest.projects[0];
        assert_eq!(manifest.effective_remote(build), Some("aosp"));
        assert_eq!(manifest.effective_revision(build), Some("master"));

        let mut pinned = build.clone();
        pinned.remote = Some("other".to_string());
        pinned.revision = Some("refs/tags/v1".to_string());
        assert_eq!(manifest.effective_remote(&pinned), Some("other"));
        assert_eq!(manifest.effective_revision(&pinned), Some("refs/tags/v1"));
    }

    #[test]
    fn test_malformed_xml() {
        match Manifest::parse("<manifest><project") {
            Err(Error::Manifest(_)) => {}
            other => panic!("expected Manifest error, got {:?}", other),
        }
    }
}
