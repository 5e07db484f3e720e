use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info};

use super::collection::{Collection, CreateParams};
use super::cursor::{self, Direction, TableScan};
use super::datafile::FileSet;
use super::document::Document;
use super::extent::{initial_extent_size, EXTENT_HEADER_LEN};
use super::freelist::quantize;
use super::index::{IndexDefinition, IndexDescriptor, IndexKey};
use super::metrics::{default_metrics, StorageMetrics};
use super::namespace::{namespace_catalog, Namespace};
use super::options::StoreOptions;
use super::record::RECORD_HEADER_LEN;
use crate::types::{DiskLoc, OpContext, Result, StoreError};

/// Largest explicit initial extent a collection-creation request may ask for.
const MAX_REQUESTED_EXTENT: u64 = (1 << 30) + 256;

/// Record length assumed when a collection is created without a size hint.
const DEFAULT_CREATE_RECORD_LEN: u32 = 128;

struct Database {
    files: Arc<FileSet>,
    collections: RwLock<BTreeMap<String, Arc<Collection>>>,
}

#[derive(Debug, Default, Deserialize)]
struct CreateRequest {
    #[serde(default)]
    capped: bool,
    size: Option<f64>,
    max: Option<f64>,
}

/// Entry point of the record store.
///
/// Owns the file set of every database it has touched and the metadata of
/// every collection in them. All operations are synchronous; each write locks
/// exactly one collection at a time.
pub struct StorageManager {
    opts: StoreOptions,
    metrics: Arc<dyn StorageMetrics>,
    databases: RwLock<BTreeMap<String, Arc<Database>>>,
}

impl StorageManager {
    /// Opens a store with `opts`, creating the data directory if needed.
    pub fn open(opts: StoreOptions) -> Result<Self> {
        opts.validate()?;
        if let Some(dir) = &opts.dir {
            std::fs::create_dir_all(dir)?;
        }
        info!(dir = ?opts.dir, base_file_size = opts.base_file_size, "store.open");
        let metrics = opts.metrics.clone().unwrap_or_else(default_metrics);
        Ok(Self {
            opts,
            metrics,
            databases: RwLock::new(BTreeMap::new()),
        })
    }

    /// Opens an in-memory store with default options.
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreOptions::in_memory())
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.opts
    }

    fn database(&self, db: &str) -> Result<Arc<Database>> {
        if let Some(found) = self.databases.read().get(db) {
            return Ok(Arc::clone(found));
        }
        let mut dbs = self.databases.write();
        if let Some(found) = dbs.get(db) {
            return Ok(Arc::clone(found));
        }
        let database = Arc::new(Database {
            files: Arc::new(FileSet::new(db, &self.opts)?),
            collections: RwLock::new(BTreeMap::new()),
        });
        dbs.insert(db.to_owned(), Arc::clone(&database));
        Ok(database)
    }

    /// The collection named `ns`.
    pub fn collection(&self, ns: &str) -> Result<Arc<Collection>> {
        let name = Namespace::parse(ns)?;
        let db = self
            .databases
            .read()
            .get(name.db())
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let found = db.collections.read().get(ns).cloned();
        found.ok_or(StoreError::NotFound)
    }

    /// Every collection of every database, ordered by namespace.
    pub fn collections(&self) -> Vec<Arc<Collection>> {
        let dbs: Vec<Arc<Database>> = self.databases.read().values().cloned().collect();
        dbs.iter()
            .flat_map(|db| db.collections.read().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Names of the databases touched so far.
    pub fn database_names(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }

    /// Number of data files of database `db`.
    pub fn file_count(&self, db: &str) -> usize {
        self.databases
            .read()
            .get(db)
            .map_or(0, |found| found.files.file_count())
    }

    /// Creates a collection from a `{ capped, size, max }` request.
    ///
    /// `size` sets the initial extent, rounded as `(size + 256) & !0xff`;
    /// `max` bounds the record count of a capped collection.
    pub fn create_collection(&self, ctx: &OpContext, ns: &str, request: &Document) -> Result<()> {
        let name = Namespace::parse(ns)?;
        if name.is_reserved() && !ctx.is_system() {
            return Err(StoreError::Unauthorized { ns: ns.to_owned() });
        }
        let request: CreateRequest = serde_json::from_value(request.clone().into_value())
            .map_err(|err| StoreError::invalid(format!("bad collection options: {err}")))?;

        let extent_size = match request.size {
            Some(size) if !(size >= 0.0) => {
                return Err(StoreError::invalid("collection size must be non-negative"));
            }
            Some(size) => {
                let rounded = (size as u64 + 256) & !0xff;
                if rounded > MAX_REQUESTED_EXTENT {
                    return Err(StoreError::invalid("collection size exceeds 1 GiB"));
                }
                rounded as u32
            }
            None => initial_extent_size(DEFAULT_CREATE_RECORD_LEN)?,
        };
        let max_records = match request.max {
            Some(max) if request.capped && max >= 1.0 => Some(max as u64),
            _ => None,
        };
        let params = CreateParams {
            capped: request.capped,
            max_records,
            extent_size,
            min_extent: extent_size,
        };

        let db = self.database(name.db())?;
        {
            let mut map = db.collections.write();
            if map.contains_key(ns) {
                return Err(StoreError::CollectionExists { ns: ns.to_owned() });
            }
            let coll = Collection::create(Arc::clone(&db.files), Arc::clone(&self.metrics), ns, params)?;
            map.insert(ns.to_owned(), Arc::new(coll));
        }
        self.record_namespace(&name)
    }

    fn collection_or_create(&self, name: &Namespace<'_>, payload_len: usize) -> Result<Arc<Collection>> {
        let ns = name.as_str();
        let db = self.database(name.db())?;
        if let Some(found) = db.collections.read().get(ns) {
            return Ok(Arc::clone(found));
        }
        let created = {
            let mut map = db.collections.write();
            if let Some(found) = map.get(ns) {
                return Ok(Arc::clone(found));
            }
            let payload_len = u32::try_from(payload_len)
                .map_err(|_| StoreError::invalid("record length overflow"))?;
            let record_len = quantize(payload_len.saturating_add(RECORD_HEADER_LEN as u32))?;
            let params = CreateParams {
                capped: false,
                max_records: None,
                extent_size: initial_extent_size(payload_len)?,
                min_extent: EXTENT_HEADER_LEN as u32 + record_len,
            };
            let coll = Arc::new(Collection::create(
                Arc::clone(&db.files),
                Arc::clone(&self.metrics),
                ns,
                params,
            )?);
            map.insert(ns.to_owned(), Arc::clone(&coll));
            coll
        };
        self.record_namespace(name)?;
        Ok(created)
    }

    fn record_namespace(&self, name: &Namespace<'_>) -> Result<()> {
        if name.is_namespace_catalog() {
            return Ok(());
        }
        let entry = Document::new().with("name", name.as_str());
        self.insert(&OpContext::system(), &namespace_catalog(name.db()), &entry)?;
        Ok(())
    }

    /// Inserts `doc` into `ns`, creating the collection on first write.
    ///
    /// A document inserted into `<db>.system.indexes` defines an index: it is
    /// validated, stored, and the target collection is indexed in full. An
    /// unusable definition is ignored and yields `Ok(None)`.
    pub fn insert(&self, ctx: &OpContext, ns: &str, doc: &Document) -> Result<Option<DiskLoc>> {
        let name = Namespace::parse(ns)?;
        let definition = if name.is_index_catalog() {
            match self.admit_index(&name, doc) {
                Ok(definition) => Some(definition),
                Err(reason) => {
                    info!(ns, reason, "index.definition.ignored");
                    return Ok(None);
                }
            }
        } else {
            if name.is_reserved() && !ctx.is_system() {
                return Err(StoreError::Unauthorized { ns: ns.to_owned() });
            }
            None
        };

        let payload = doc.encode(self.opts.max_document_len)?;
        let coll = self.collection_or_create(&name, payload.len())?;
        let loc = coll.write(|st| coll.insert_record(st, &payload, doc))?;

        if let Some(definition) = definition {
            if !self.build_index(definition, loc)? {
                coll.write(|st| coll.delete_record(st, loc))?;
                return Ok(None);
            }
        }
        Ok(Some(loc))
    }

    fn admit_index(&self, catalog: &Namespace<'_>, doc: &Document) -> std::result::Result<IndexDefinition, &'static str> {
        let definition = IndexDefinition::parse(doc)?;
        let target = Namespace::parse(&definition.ns).map_err(|_| "index namespace is malformed")?;
        if target.db() != catalog.db() {
            return Err("index namespace belongs to another database");
        }
        if target.is_reserved() {
            return Err("reserved namespaces cannot be indexed");
        }
        let coll = self
            .collection(&definition.ns)
            .map_err(|_| "index target collection does not exist")?;
        let st = coll.lock();
        if st.indexes.len() >= self.opts.max_indexes {
            return Err("collection has the maximum number of indexes");
        }
        if st.indexes.iter().any(|ix| ix.name() == definition.name) {
            return Err("index already exists");
        }
        Ok(definition)
    }

    /// Registers the index described by the record at `info` and backfills it.
    ///
    /// Returns false when a concurrent definition won the name or the last slot.
    fn build_index(&self, definition: IndexDefinition, info: DiskLoc) -> Result<bool> {
        let coll = self.collection(&definition.ns)?;
        let metrics = Arc::clone(&self.metrics);
        coll.write(|st| {
            if st.indexes.len() >= self.opts.max_indexes
                || st.indexes.iter().any(|ix| ix.name() == definition.name)
            {
                return Ok(false);
            }
            let head = (self.opts.index_factory)(&definition.pattern, self.opts.max_index_key_len);
            let mut ix = IndexDescriptor::new(definition.name, definition.pattern, info, head);
            let mut loc = cursor::start(coll.files(), &st.details, Direction::Forward)?;
            let mut records = 0u64;
            while !loc.is_null() {
                let doc = coll.read_document(loc)?;
                ix.add_document(coll.ns(), &doc, loc, metrics.as_ref());
                loc = cursor::step(coll.files(), loc, Direction::Forward)?;
                records += 1;
            }
            info!(ns = coll.ns(), index = ix.name(), records, entries = ix.index().len(), "index.build");
            st.indexes.push(ix);
            Ok(true)
        })
    }

    fn authorize_change(ctx: &OpContext, name: &Namespace<'_>) -> Result<()> {
        if name.is_reserved() && !ctx.is_system() {
            return Err(StoreError::Unauthorized {
                ns: name.as_str().to_owned(),
            });
        }
        Ok(())
    }

    /// Replaces the record at `loc` with `doc`.
    ///
    /// Returns the record's location afterwards: `loc` itself when the new
    /// document fits, a new location when it had to move.
    pub fn update(&self, ctx: &OpContext, ns: &str, loc: DiskLoc, doc: &Document) -> Result<DiskLoc> {
        let name = Namespace::parse(ns)?;
        Self::authorize_change(ctx, &name)?;
        let payload = doc.encode(self.opts.max_document_len)?;
        let coll = self.collection(ns)?;
        coll.write(|st| {
            coll.check_live(loc)?;
            coll.update_record(st, loc, &payload, doc)
        })
    }

    /// Deletes the record at `loc`. Capped collections refuse deletes.
    pub fn delete(&self, ctx: &OpContext, ns: &str, loc: DiskLoc) -> Result<()> {
        let name = Namespace::parse(ns)?;
        Self::authorize_change(ctx, &name)?;
        let coll = self.collection(ns)?;
        coll.write(|st| {
            if st.details.capped {
                return Err(StoreError::invalid(format!(
                    "cannot delete from capped collection {ns}"
                )));
            }
            coll.check_live(loc)?;
            coll.delete_record(st, loc)
        })?;
        debug!(ns, loc = %loc, "store.delete");
        Ok(())
    }

    /// Reads the document at `loc`.
    ///
    /// Reserved namespaces other than the two catalogs need system privilege.
    pub fn find(&self, ctx: &OpContext, ns: &str, loc: DiskLoc) -> Result<Document> {
        let name = Namespace::parse(ns)?;
        let catalog = name.is_index_catalog() || name.is_namespace_catalog();
        if name.is_reserved() && !catalog && !ctx.is_system() {
            return Err(StoreError::Unauthorized { ns: ns.to_owned() });
        }
        let coll = self.collection(ns)?;
        let _st = coll.lock();
        coll.check_live(loc)?;
        coll.read_document(loc)
    }

    /// Opens a natural-order scan; `{ "$natural": -1 }` scans in reverse.
    pub fn scan(&self, ns: &str, order: Option<&Document>) -> Result<TableScan> {
        self.scan_direction(ns, Direction::from_order(order))
    }

    /// Opens a natural-order scan in `direction`.
    pub fn scan_direction(&self, ns: &str, direction: Direction) -> Result<TableScan> {
        TableScan::open(self.collection(ns)?, direction)
    }

    /// Names of the indexes of `ns`, in creation order.
    pub fn index_names(&self, ns: &str) -> Result<Vec<String>> {
        let coll = self.collection(ns)?;
        let st = coll.lock();
        Ok(st.indexes.iter().map(|ix| ix.name().to_owned()).collect())
    }

    /// Locations whose documents index under `key` in index `index` of `ns`.
    ///
    /// `key` supplies one value per pattern field, by path; absent paths match
    /// documents missing that field.
    pub fn lookup(&self, ns: &str, index: &str, key: &Document) -> Result<Vec<DiskLoc>> {
        let coll = self.collection(ns)?;
        let st = coll.lock();
        let ix = st
            .indexes
            .iter()
            .find(|ix| ix.name() == index)
            .ok_or(StoreError::NotFound)?;
        let values: Vec<_> = ix
            .pattern()
            .fields()
            .iter()
            .map(|field| key.get_path(&field.path))
            .collect();
        let key = IndexKey::from_values(ix.pattern(), &values);
        Ok(ix.index().lookup(&key))
    }

    /// Flushes every data file.
    pub fn sync_all(&self) -> Result<()> {
        let dbs: Vec<Arc<Database>> = self.databases.read().values().cloned().collect();
        for db in dbs {
            db.files.sync_all()?;
        }
        Ok(())
    }

    pub(crate) fn files(&self, db: &str) -> Option<Arc<FileSet>> {
        self.databases
            .read()
            .get(db)
            .map(|found| Arc::clone(&found.files))
    }
}
