//! Per-table statistics for cost-based planning.
//!
//! Statistics are built by scanning a table twice under a transient
//! transaction: the first pass finds each integer field's range and the
//! tuple count, the second fills one histogram per field. The transient
//! transaction commits when the scans finish so its read locks are dropped.

pub mod histogram;

use std::collections::HashMap;
use std::sync::Arc;

use granite::cursor::Cursor;
use granite::database::Database;
use granite::errors::DbError;
use granite::tuple::{Field, FieldType, Op};

use crate::quarry_debug_log;
use crate::stats::histogram::{IntHistogram, StringHistogram};

/// Buckets per histogram.
pub const HIST_BINS: usize = 100;
/// Default cost charged per page read by a sequential scan.
pub const IO_COST_PER_PAGE: f64 = 1000.0;

pub struct TableStats {
    io_cost_per_page: f64,
    num_tuples: usize,
    num_pages: u32,
    int_histograms: HashMap<usize, IntHistogram>,
    string_histograms: HashMap<usize, StringHistogram>,
}

impl TableStats {
    /// Builds statistics for `table_id`.
    pub fn build(db: &Database, table_id: u32, io_cost_per_page: f64) -> Result<Self, DbError> {
        let file = db.catalog().file(table_id)?;
        let desc = file.desc().clone();
        let tx = db.begin_transaction();
        let mut cursor = file.clone().cursor(db.buffer_pool().clone(), tx);

        let num_fields = desc.num_fields();
        let mut mins = vec![i32::MAX; num_fields];
        let mut maxs = vec![i32::MIN; num_fields];
        let mut num_tuples = 0usize;

        cursor.open()?;
        while let Some(t) = cursor.next()? {
            num_tuples += 1;
            for i in 0..num_fields {
                if let Field::Int(v) = t.field(i) {
                    mins[i] = mins[i].min(*v);
                    maxs[i] = maxs[i].max(*v);
                }
            }
        }

        let mut int_histograms = HashMap::new();
        let mut string_histograms = HashMap::new();
        if num_tuples > 0 {
            for i in 0..num_fields {
                match desc.field_type(i) {
                    FieldType::Int => {
                        int_histograms.insert(i, IntHistogram::new(HIST_BINS, mins[i], maxs[i]));
                    }
                    FieldType::Str(_) => {
                        string_histograms.insert(i, StringHistogram::new(HIST_BINS));
                    }
                }
            }
            cursor.rewind()?;
            while let Some(t) = cursor.next()? {
                for i in 0..num_fields {
                    match t.field(i) {
                        Field::Int(v) => {
                            if let Some(h) = int_histograms.get_mut(&i) {
                                h.add_value(*v);
                            }
                        }
                        Field::Str(s) => {
                            if let Some(h) = string_histograms.get_mut(&i) {
                                h.add_value(s);
                            }
                        }
                    }
                }
            }
        }
        cursor.close();

        let num_pages = file.num_pages()?;
        db.buffer_pool().transaction_complete(tx, true)?;
        quarry_debug_log!(
            "[TableStats::build] table {table_id}: {num_tuples} tuples over {num_pages} page(s)"
        );

        Ok(Self {
            io_cost_per_page,
            num_tuples,
            num_pages,
            int_histograms,
            string_histograms,
        })
    }

    /// Cost of scanning the whole table: whole pages are read even when
    /// mostly empty.
    pub fn estimate_scan_cost(&self) -> f64 {
        self.num_pages as f64 * self.io_cost_per_page
    }

    /// Expected number of tuples surviving a predicate of the given
    /// selectivity.
    pub fn estimate_table_cardinality(&self, selectivity: f64) -> usize {
        (self.num_tuples as f64 * selectivity).ceil() as usize
    }

    /// Selectivity of `field op constant` against this table. Fields with no
    /// histogram (or constants of the wrong kind) estimate 1.0.
    pub fn estimate_selectivity(&self, field: usize, op: Op, constant: &Field) -> f64 {
        match constant {
            Field::Int(v) => self
                .int_histograms
                .get(&field)
                .map_or(1.0, |h| h.estimate_selectivity(op, *v)),
            Field::Str(s) => self
                .string_histograms
                .get(&field)
                .map_or(1.0, |h| h.estimate_selectivity(op, s)),
        }
    }

    pub fn total_tuples(&self) -> usize {
        self.num_tuples
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }
}

/// Builds statistics for every table in the catalog, keyed by table name.
pub fn compute_statistics(
    db: &Database,
    io_cost_per_page: f64,
) -> Result<HashMap<String, Arc<TableStats>>, DbError> {
    let mut stats = HashMap::new();
    for table_id in db.catalog().table_ids() {
        let table_stats = TableStats::build(db, table_id, io_cost_per_page)?;
        if let Some(name) = db.catalog().table_name(table_id) {
            stats.insert(name, Arc::new(table_stats));
        }
    }
    Ok(stats)
}
