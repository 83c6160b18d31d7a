//! Provisioning of the embedded index service for one shard.

use std::path::{Path, PathBuf};

use tantivy::Index;
use tracing::{debug, info};

use crate::error::IndexServiceError;
use crate::schema::{load_bundle_schema, ShardSchema};
use crate::service::EmbeddedIndexService;

/// Name of the single logical core a shard service is bound to.
pub const CORE_NAME: &str = "core1";

/// Subdirectory of the shard output directory that holds index data.
pub const DATA_DIR_NAME: &str = "data";

/// Properties the embedded instance is constructed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceProperties {
    /// Configuration bundle root
    pub home: PathBuf,
    /// Index data location
    pub data_dir: PathBuf,
    /// Logical core name
    pub core_name: String,
}

impl InstanceProperties {
    /// Properties as `(key, value)` pairs, for logging and diagnostics.
    pub fn as_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("index.home", self.home.display().to_string()),
            ("index.data.dir", self.data_dir.display().to_string()),
            ("index.core.name", self.core_name.clone()),
        ]
    }
}

/// Create the embedded index service for a shard.
///
/// `config_dir` is the resolved bundle directory; `None` means resolution never
/// produced one. Index data goes to `<output_shard_dir>/data`, which is
/// created when missing.
pub fn create_index_service(
    config_dir: Option<&Path>,
    output_shard_dir: &Path,
    writer_memory_mb: usize,
) -> Result<EmbeddedIndexService, IndexServiceError> {
    let home = config_dir.ok_or_else(|| {
        IndexServiceError::MissingConfiguration("unable to find index home setting".into())
    })?;
    info!(home = ?home, "Index home");

    let data_dir = output_shard_dir.join(DATA_DIR_NAME);
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir).map_err(|source| IndexServiceError::StorageInit {
            path: data_dir.clone(),
            source,
        })?;
    }

    let schema = load_bundle_schema(home)?;
    let index = open_or_create_index(&data_dir, &schema)?;

    let memory_budget = writer_memory_mb * 1024 * 1024;
    let writer = index.writer(memory_budget)?;
    debug!(memory_mb = writer_memory_mb, "Created index writer");

    let properties = InstanceProperties {
        home: home.to_path_buf(),
        data_dir,
        core_name: CORE_NAME.to_string(),
    };
    info!(
        home = ?properties.home,
        data_dir = ?properties.data_dir,
        core = %properties.core_name,
        shard_dir = ?output_shard_dir,
        "Constructed embedded index instance"
    );
    for (key, value) in properties.as_pairs() {
        debug!(key, value = %value, "Instance property");
    }

    Ok(EmbeddedIndexService::new(index, schema, writer, properties))
}

/// Open the index in `path`, or create it with the bundle schema.
///
/// An existing index must have been built with the same schema.
fn open_or_create_index(path: &Path, schema: &ShardSchema) -> Result<Index, IndexServiceError> {
    if path.join("meta.json").exists() {
        debug!(path = ?path, "Opening existing index");
        let index = Index::open_in_dir(path)?;
        schema.ensure_matches(&index.schema())?;
        Ok(index)
    } else {
        info!(path = ?path, "Creating new index");
        let index = Index::create_in_dir(path, schema.schema().clone())?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SCHEMA_FILE_NAME;
    use tantivy::schema::{Schema, STORED, STRING, TEXT};
    use tempfile::TempDir;

    fn write_bundle(root: &Path, fields: &[&str]) -> PathBuf {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        for field in fields {
            builder.add_text_field(field, TEXT);
        }
        let bundle = root.join("bundle");
        std::fs::create_dir_all(bundle.join("conf")).unwrap();
        std::fs::write(
            bundle.join("conf").join(SCHEMA_FILE_NAME),
            serde_json::to_string(&builder.build()).unwrap(),
        )
        .unwrap();
        bundle
    }

    #[test]
    fn test_creates_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = write_bundle(temp_dir.path(), &["body"]);
        let shard = temp_dir.path().join("out").join("shard-0000003-000");

        let service = create_index_service(Some(&bundle), &shard, 15).unwrap();

        let data_dir = shard.join(DATA_DIR_NAME);
        assert!(data_dir.is_dir());
        assert!(data_dir.join("meta.json").exists());
        assert_eq!(service.properties().data_dir, data_dir);
        assert_eq!(service.properties().home, bundle);
        assert_eq!(service.properties().core_name, CORE_NAME);
    }

    #[test]
    fn test_missing_config_dir() {
        let temp_dir = TempDir::new().unwrap();
        let result = create_index_service(None, temp_dir.path(), 15);
        assert!(matches!(
            result,
            Err(IndexServiceError::MissingConfiguration(_))
        ));
    }

    #[test]
    fn test_storage_init_failure() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = write_bundle(temp_dir.path(), &["body"]);
        // A regular file where the shard directory should be
        let blocker = temp_dir.path().join("blocked");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let result = create_index_service(Some(&bundle), &blocker, 15);
        assert!(matches!(result, Err(IndexServiceError::StorageInit { .. })));
    }

    #[test]
    fn test_reopen_existing_index() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = write_bundle(temp_dir.path(), &["body"]);
        let shard = temp_dir.path().join("shard");

        let first = create_index_service(Some(&bundle), &shard, 15).unwrap();
        drop(first);

        let second = create_index_service(Some(&bundle), &shard, 15);
        assert!(second.is_ok());
    }

    #[test]
    fn test_reopen_with_different_schema() {
        let temp_dir = TempDir::new().unwrap();
        let shard = temp_dir.path().join("shard");

        let bundle = write_bundle(temp_dir.path(), &["body"]);
        drop(create_index_service(Some(&bundle), &shard, 15).unwrap());

        let other = TempDir::new().unwrap();
        let changed = write_bundle(other.path(), &["title"]);
        let result = create_index_service(Some(&changed), &shard, 15);
        assert!(matches!(result, Err(IndexServiceError::SchemaMismatch(_))));
    }

    #[test]
    fn test_properties_pairs() {
        let props = InstanceProperties {
            home: PathBuf::from("/cache/bundle.zip"),
            data_dir: PathBuf::from("/out/shard/data"),
            core_name: CORE_NAME.to_string(),
        };
        let pairs = props.as_pairs();
        assert_eq!(pairs[0], ("index.home", "/cache/bundle.zip".to_string()));
        assert_eq!(pairs[1], ("index.data.dir", "/out/shard/data".to_string()));
        assert_eq!(pairs[2], ("index.core.name", "core1".to_string()));
    }
}
