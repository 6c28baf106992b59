//! PostgreSQL connection service files (`pg_service.conf`).
//!
//! Lookup order follows libpq: `PGSERVICEFILE`, `~/.pg_service.conf`,
//! `PGSYSCONFDIR/pg_service.conf`, then the Debian default location.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::StoreError;

/// Key/value pairs of one `[service]` section.
pub type ServiceEntry = IndexMap<String, String>;

pub fn parse(contents: &str) -> IndexMap<String, ServiceEntry> {
    let mut services: IndexMap<String, ServiceEntry> = IndexMap::new();
    let mut current: Option<String> = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            services.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let (Some(section), Some((key, value))) = (&current, line.split_once('=')) {
            if let Some(entry) = services.get_mut(section) {
                entry.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    services
}

pub fn candidate_files() -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(path) = std::env::var("PGSERVICEFILE") {
        files.push(PathBuf::from(path));
    }
    if let Ok(home) = std::env::var("HOME") {
        files.push(Path::new(&home).join(".pg_service.conf"));
    }
    if let Ok(dir) = std::env::var("PGSYSCONFDIR") {
        files.push(Path::new(&dir).join("pg_service.conf"));
    }
    files.push(PathBuf::from("/etc/postgresql-common/pg_service.conf"));
    files
}

/// Finds `name` in the default service files.
pub fn lookup(name: &str) -> Result<ServiceEntry, StoreError> {
    lookup_in(&candidate_files(), name)
}

/// Finds `name` in the first of `files` that defines it.
pub fn lookup_in(files: &[PathBuf], name: &str) -> Result<ServiceEntry, StoreError> {
    for path in files.iter().filter(|path| path.is_file()) {
        let contents = std::fs::read_to_string(path).map_err(|source| StoreError::ServiceFile {
            path: path.clone(),
            source,
        })?;
        if let Some(entry) = parse(&contents).swap_remove(name) {
            return Ok(entry);
        }
    }
    Err(StoreError::UnknownService(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SERVICES: &str = "
# comment
[qwc_configdb]
host=db
port=5432
dbname = qwc_services
user=qwc_admin

[geodb]
host=geo
";

    #[test]
    fn sections_and_keys_are_parsed() {
        let services = parse(SERVICES);
        let names: Vec<_> = services.keys().cloned().collect();
        assert_eq!(names, vec!["qwc_configdb", "geodb"]);
        assert_eq!(services["qwc_configdb"]["dbname"], "qwc_services");
        assert_eq!(services["geodb"].len(), 1);
    }

    #[test]
    fn lookup_searches_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.conf");
        let second = dir.path().join("second.conf");
        std::fs::write(&first, "[other]\nhost=x\n").unwrap();
        std::fs::write(&second, SERVICES).unwrap();
        let files = vec![dir.path().join("missing.conf"), first, second];

        let entry = lookup_in(&files, "geodb").unwrap();
        assert_eq!(entry["host"], "geo");
        assert!(matches!(
            lookup_in(&files, "nope"),
            Err(StoreError::UnknownService(name)) if name == "nope"
        ));
    }
}
