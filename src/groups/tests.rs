//! Tests for group configuration loading and merging.

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use crate::resource::ResourceId;

use super::{Groups, GroupsError};

struct Fixture {
    _dir: TempDir,
    site: Utf8PathBuf,
    user: Utf8PathBuf,
}

impl Fixture {
    fn new(site_yaml: Option<&str>, user_yaml: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8Path::from_path(dir.path())
            .unwrap_or_else(|| panic!("tempdir path is not UTF-8"))
            .to_owned();
        let site = root.join("imgr.yaml");
        let user = root.join(".imgr.yaml");
        if let Some(yaml) = site_yaml {
            std::fs::write(&site, yaml).unwrap_or_else(|err| panic!("write site config: {err}"));
        }
        if let Some(yaml) = user_yaml {
            std::fs::write(&user, yaml).unwrap_or_else(|err| panic!("write user config: {err}"));
        }
        Self {
            _dir: dir,
            site,
            user,
        }
    }

    fn load(&self) -> Result<Groups, GroupsError> {
        Groups::from_paths(&self.site, &self.user)
    }
}

#[test]
fn resolves_a_group_to_its_instance_ids() {
    let fixture = Fixture::new(Some("web: [i-1, i-2]\n"), None);
    let groups = fixture.load().unwrap_or_else(|err| panic!("load: {err}"));

    let ids = groups
        .resolve("web")
        .unwrap_or_else(|err| panic!("resolve: {err}"));
    assert_eq!(ids, vec![ResourceId::from("i-1"), ResourceId::from("i-2")]);
}

#[test]
fn user_entries_override_site_entries_per_key() {
    let fixture = Fixture::new(
        Some("web: [i-site]\nworkers: [i-w1]\n"),
        Some("web: [i-user]\n"),
    );
    let groups = fixture.load().unwrap_or_else(|err| panic!("load: {err}"));

    let web = groups
        .resolve("web")
        .unwrap_or_else(|err| panic!("resolve web: {err}"));
    assert_eq!(web, vec![ResourceId::from("i-user")]);

    // Keys only present in the site file survive the merge.
    let workers = groups
        .resolve("workers")
        .unwrap_or_else(|err| panic!("resolve workers: {err}"));
    assert_eq!(workers, vec![ResourceId::from("i-w1")]);
}

#[test]
fn missing_files_yield_an_empty_config() {
    let fixture = Fixture::new(None, None);
    let groups = fixture.load().unwrap_or_else(|err| panic!("load: {err}"));
    assert!(groups.is_empty());
}

#[test]
fn malformed_yaml_fails_fast_with_the_offending_path() {
    let fixture = Fixture::new(None, Some("web: {not: [a, list of ids\n"));
    let err = fixture.load().expect_err("expected parse failure");
    assert!(
        matches!(&err, GroupsError::Parse { path, .. } if path.as_str().ends_with(".imgr.yaml")),
        "unexpected error: {err}"
    );
}

#[test]
fn wrong_shape_is_a_parse_error_not_a_silent_merge() {
    let fixture = Fixture::new(Some("web: i-not-a-list\n"), None);
    let err = fixture.load().expect_err("expected parse failure");
    assert!(matches!(err, GroupsError::Parse { .. }));
}

#[test]
fn unknown_group_is_a_lookup_error() {
    let fixture = Fixture::new(Some("web: [i-1]\n"), None);
    let groups = fixture.load().unwrap_or_else(|err| panic!("load: {err}"));
    let err = groups.resolve("db").expect_err("expected unknown group");
    assert!(matches!(err, GroupsError::UnknownGroup(name) if name == "db"));
}

#[test]
fn names_are_sorted() {
    let fixture = Fixture::new(Some("web: [i-1]\napi: [i-2]\n"), None);
    let groups = fixture.load().unwrap_or_else(|err| panic!("load: {err}"));
    assert_eq!(groups.names(), vec!["api", "web"]);
}
