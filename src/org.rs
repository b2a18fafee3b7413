use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::reaper;

/// Manages per-organization engines. Each org gets its own Engine + WAL +
/// reaper + compactor; nothing is shared across orgs, so the same resource
/// or user ids may exist independently in two of them.
pub struct OrgManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl OrgManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create an engine for the given org.
    pub fn get_or_create(&self, org: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(org) {
            return Ok(engine.value().clone());
        }
        if org.len() > MAX_ORG_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "org name too long",
            ));
        }
        if self.engines.len() >= MAX_ORGS {
            return Err(std::io::Error::other("too many orgs"));
        }

        // Sanitize org name to prevent path traversal
        let safe_name: String = org
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty org name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path)?);

        // Spawn reaper + compactor for this org
        let reaper_engine = engine.clone();
        tokio::spawn(async move {
            reaper::run_reaper(reaper_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(org.to_string(), engine.clone());
        metrics::gauge!(crate::observability::ORGS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("timeshare_test_org").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn org_isolation() {
        let dir = test_data_dir("isolation");
        let om = OrgManager::new(dir, 1000);

        let eng_a = om.get_or_create("org_a").unwrap();
        let eng_b = om.get_or_create("org_b").unwrap();

        let rid = Ulid::new();
        let uid = Ulid::new();

        // Create the same resource and user ids in both orgs
        for eng in [&eng_a, &eng_b] {
            eng.create_resource(rid, "Room".into(), None, 1, None).await.unwrap();
            eng.register_user(uid, "u".into(), "u@example.com".into(), "hash".into())
                .await
                .unwrap();
        }

        // Book a slot in org A only
        eng_a
            .create_booking(Ulid::new(), rid, uid, 10_000, 20_000, true, None)
            .await
            .unwrap();

        // Org B's ledger is untouched — the same slot is still free there
        let b_bookings = eng_b.list_bookings(rid, 0, 30_000, false).await.unwrap();
        assert!(b_bookings.is_empty());
        eng_b
            .create_booking(Ulid::new(), rid, uid, 10_000, 20_000, true, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn org_lazy_creation() {
        let dir = test_data_dir("lazy");
        let om = OrgManager::new(dir.clone(), 1000);

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        // Create an org
        let _eng = om.get_or_create("my_org").unwrap();

        // WAL file should now exist
        assert!(dir.join("my_org.wal").exists());
    }

    #[tokio::test]
    async fn org_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let om = OrgManager::new(dir, 1000);

        let eng1 = om.get_or_create("foo").unwrap();
        let eng2 = om.get_or_create("foo").unwrap();

        // Should be the same Arc
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn org_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let om = OrgManager::new(dir.clone(), 1000);

        // Path traversal attempt
        let _eng = om.get_or_create("../evil").unwrap();
        // Should create "evil.wal", not "../evil.wal"
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = om.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn org_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let om = OrgManager::new(dir, 1000);

        let long_name = "x".repeat(MAX_ORG_NAME_LEN + 1);
        let result = om.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("org name too long"));
    }

    #[tokio::test]
    async fn org_count_limit() {
        let dir = test_data_dir("count_limit");
        let om = OrgManager::new(dir, 1000);

        for i in 0..MAX_ORGS {
            om.get_or_create(&format!("t{i}")).unwrap();
        }
        let result = om.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many orgs"));
    }
}
