//! One-plan-per-file YAML store.
//!
//! Writes are whole-file atomic replacements (tempfile → fsync → rename), so
//! concurrent readers never observe a partial document. The store keeps no
//! cache: every read goes to disk, which is what lets the orchestrator
//! observe plan edits made by an executing backend between iterations.

use std::collections::HashMap;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::error::PlanError;
use crate::model::Plan;

/// A plan together with the file it was read from.
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub path: Utf8PathBuf,
    pub plan: Plan,
}

/// Snapshot of every plan in a directory.
///
/// Duplicate ids are quarantined: an id that appears in more than one file is
/// recorded in `duplicates` and never appears in `plans`, which blocks
/// resolution of that id until the operator fixes the files.
#[derive(Debug, Default)]
pub struct PlanCollection {
    pub plans: HashMap<u32, PlanFile>,
    pub duplicates: HashMap<u32, Vec<Utf8PathBuf>>,
}

impl PlanCollection {
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&PlanFile> {
        self.plans.get(&id)
    }

    /// Ids of plans whose `parent` field names the given plan, in ascending
    /// id order so discovery order is deterministic.
    #[must_use]
    pub fn children_of(&self, parent_id: u32) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .plans
            .values()
            .filter(|pf| pf.plan.parent == Some(parent_id))
            .map(|pf| pf.plan.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Explicit, injectable store over a plan directory.
///
/// Construct one per run; there is no process-wide plan cache.
#[derive(Debug, Clone)]
pub struct PlanStore {
    root: Utf8PathBuf,
}

impl PlanStore {
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Read and parse a single plan file.
    ///
    /// If the plan has no `uuid`, one is generated and persisted back to the
    /// file. The write-back is best-effort: on failure the in-memory uuid is
    /// still used and a warning is logged.
    pub fn read_plan_file(&self, path: &Utf8Path) -> Result<Plan, PlanError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlanError::NotFound {
                    ident: path.to_string(),
                }
            } else {
                PlanError::Io(e)
            }
        })?;

        let mut plan: Plan =
            serde_yaml::from_str(&content).map_err(|e| PlanError::Malformed {
                path: path.to_owned(),
                reason: e.to_string(),
            })?;

        if plan.uuid.is_none() {
            plan.uuid = Some(Uuid::new_v4());
            if let Err(e) = self.write_plan_file(path, &plan) {
                tracing::warn!(path = %path, error = %e, "Failed to persist generated plan uuid");
            }
        }

        Ok(plan)
    }

    /// Atomically replace a plan file with the serialized plan.
    pub fn write_plan_file(&self, path: &Utf8Path, plan: &Plan) -> Result<(), PlanError> {
        let yaml = serde_yaml::to_string(plan).map_err(|e| PlanError::WriteFailed {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        write_file_atomic(path, &yaml).map_err(|e| PlanError::WriteFailed {
            path: path.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Scan the plan directory for `*.plan.yaml` / `*.plan.yml` files and
    /// return a fresh snapshot. Other YAML in the directory is ignored.
    ///
    /// Plan files that fail to parse are skipped with a warning so that
    /// listing and resolution stay usable with one broken file present;
    /// reading the broken file directly still surfaces the error.
    pub fn read_all(&self) -> Result<PlanCollection, PlanError> {
        let mut collection = PlanCollection::default();

        let mut paths: Vec<Utf8PathBuf> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            let Some(name) = path.file_name() else {
                continue;
            };
            if (name.ends_with(".plan.yaml") || name.ends_with(".plan.yml")) && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let content = fs::read_to_string(&path)?;
            let plan: Plan = match serde_yaml::from_str(&content) {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Skipping unparseable plan file");
                    continue;
                }
            };

            let id = plan.id;
            if let Some(existing) = collection.duplicates.get_mut(&id) {
                existing.push(path);
                continue;
            }
            if let Some(first) = collection.plans.remove(&id) {
                collection.duplicates.insert(id, vec![first.path, path]);
                continue;
            }
            collection.plans.insert(id, PlanFile { path, plan });
        }

        Ok(collection)
    }

    /// Resolve a CLI-style plan argument: a numeric id looked up in the plan
    /// directory, or a path to a plan file.
    pub fn resolve(&self, arg: &str) -> Result<PlanFile, PlanError> {
        if let Ok(id) = arg.parse::<u32>() {
            let collection = self.read_all()?;
            if let Some(paths) = collection.duplicates.get(&id) {
                return Err(PlanError::DuplicateId {
                    id,
                    paths: paths.clone(),
                });
            }
            return collection
                .plans
                .get(&id)
                .cloned()
                .ok_or(PlanError::NotFound { ident: arg.into() });
        }

        let path = Utf8PathBuf::from(arg);
        let plan = self.read_plan_file(&path)?;
        Ok(PlanFile { path, plan })
    }
}

/// Write a file atomically: tempfile in the target directory, fsync, rename.
fn write_file_atomic(path: &Utf8Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlanStatus, Task};
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> PlanStore {
        PlanStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap())
    }

    fn write_raw(dir: &TempDir, name: &str, content: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn round_trip_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let path = write_raw(
            &dir,
            "7.plan.yaml",
            "id: 7\ntitle: widget\nstatus: pending\ndocsLink: https://example.invalid/7\n",
        );

        let mut plan = store.read_plan_file(&path).unwrap();
        plan.status = PlanStatus::InProgress;
        store.write_plan_file(&path, &plan).unwrap();

        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("docsLink"));
        let back = store.read_plan_file(&path).unwrap();
        assert_eq!(back.status, PlanStatus::InProgress);
    }

    #[test]
    fn uuid_backfilled_and_persisted_on_first_read() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let path = write_raw(&dir, "3.plan.yaml", "id: 3\ntitle: no uuid yet\n");

        let first = store.read_plan_file(&path).unwrap();
        let uuid = first.uuid.expect("uuid generated on read");

        let second = store.read_plan_file(&path).unwrap();
        assert_eq!(second.uuid, Some(uuid));
    }

    #[test]
    fn duplicate_ids_are_quarantined() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        write_raw(&dir, "a.plan.yaml", "id: 5\ntitle: first\n");
        write_raw(&dir, "b.plan.yaml", "id: 5\ntitle: second\n");
        write_raw(&dir, "c.plan.yaml", "id: 6\ntitle: fine\n");

        let collection = store.read_all().unwrap();
        assert!(collection.get(5).is_none());
        assert_eq!(collection.duplicates.get(&5).map(Vec::len), Some(2));
        assert!(collection.get(6).is_some());
    }

    #[test]
    fn resolve_duplicate_id_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        write_raw(&dir, "a.plan.yaml", "id: 9\ntitle: one\n");
        write_raw(&dir, "b.plan.yaml", "id: 9\ntitle: two\n");

        let err = store.resolve("9").unwrap_err();
        assert!(matches!(err, PlanError::DuplicateId { id: 9, .. }));
    }

    #[test]
    fn resolve_by_id_and_by_path() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let path = write_raw(&dir, "12.plan.yaml", "id: 12\ntitle: by id\n");

        let by_id = store.resolve("12").unwrap();
        assert_eq!(by_id.plan.title, "by id");

        let by_path = store.resolve(path.as_str()).unwrap();
        assert_eq!(by_path.plan.id, 12);

        assert!(matches!(
            store.resolve("99").unwrap_err(),
            PlanError::NotFound { .. }
        ));
    }

    #[test]
    fn read_all_skips_malformed_but_direct_read_errors() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        write_raw(&dir, "ok.plan.yaml", "id: 1\ntitle: good\n");
        let bad = write_raw(&dir, "bad.plan.yaml", "id: [not a number\n");

        let collection = store.read_all().unwrap();
        assert!(collection.get(1).is_some());
        assert_eq!(collection.plans.len(), 1);

        assert!(matches!(
            store.read_plan_file(&bad).unwrap_err(),
            PlanError::Malformed { .. }
        ));
    }

    #[test]
    fn read_all_ignores_yaml_without_plan_suffix() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        write_raw(&dir, "1.plan.yaml", "id: 1\ntitle: real\n");
        write_raw(&dir, "2.plan.yml", "id: 2\ntitle: short suffix\n");
        // Plan-shaped content under a non-plan name stays invisible.
        write_raw(&dir, "notes.yaml", "id: 99\ntitle: stray\n");
        write_raw(&dir, "ci.yml", "jobs: [build]\n");

        let collection = store.read_all().unwrap();
        assert_eq!(collection.plans.len(), 2);
        assert!(collection.get(1).is_some());
        assert!(collection.get(2).is_some());
        assert!(collection.get(99).is_none());
    }

    #[test]
    fn children_discovered_in_id_order() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        write_raw(&dir, "p1.plan.yaml", "id: 1\ntitle: parent\n");
        write_raw(&dir, "p4.plan.yaml", "id: 4\ntitle: late child\nparent: 1\n");
        write_raw(&dir, "p2.plan.yaml", "id: 2\ntitle: early child\nparent: 1\n");

        let collection = store.read_all().unwrap();
        assert_eq!(collection.children_of(1), vec![2, 4]);
    }

    #[test]
    fn tasks_and_steps_parse() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let path = write_raw(
            &dir,
            "20.plan.yaml",
            concat!(
                "id: 20\n",
                "title: tasked\n",
                "tasks:\n",
                "  - title: first\n",
                "    steps:\n",
                "      - prompt: do a thing\n",
                "      - prompt: do another\n",
                "        done: true\n",
            ),
        );

        let plan = store.read_plan_file(&path).unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].steps.len(), 2);
        assert!(!plan.tasks[0].steps[0].done);
        assert!(plan.tasks[0].steps[1].done);
        assert_eq!(plan.tasks.iter().filter(|t| Task::is_done(t)).count(), 0);
    }
}
